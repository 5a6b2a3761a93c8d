//! Default notifier. Concrete transports (webhook, chat bots) are a declared
//! spec non-goal, so the daemon registers only a `log` channel that routes
//! alerts through `tracing` like everything else it emits.

use process_tracker_core::alert::Notifier;
use tracing::warn;

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, title: &str, body: &str) -> Result<(), String> {
        warn!(%title, %body, "alert notification");
        Ok(())
    }
}
