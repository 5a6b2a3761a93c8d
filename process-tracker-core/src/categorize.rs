//! Classifies a process into a small, closed tag set.

const BROWSER_NAMES: &[&str] = &["chrome", "firefox", "safari", "edge", "opera"];
const DEV_NAMES: &[&str] = &[
    "node", "python", "go", "java", "rustc", "cargo", "make", "gcc", "clang", "code", "idea", "vim",
];

/// System-process name prefixes, shared with the sampler's filter (§4.4).
pub const KERNEL_PREFIXES: &[&str] = &[
    "kworker",
    "ksoftirqd",
    "migration",
    "rcu_",
    "watchdog",
    "khugepaged",
    "kthreadd",
    "kswapd",
    "cpuhp",
    "irq",
    "jbd2",
    "ext4",
    "xfs",
    "loop",
    "sr_",
    "ata_",
    "scsi_",
    "usb",
    "pci",
    "idle_inject",
    "systemd",
    "dbus-daemon",
    "containerd-shim",
    "s6-supervise",
    "docker-proxy",
    "pipewire",
    "pulseaudio",
    "gvfsd",
    "gnome-keyring",
    "xdg-desktop-portal",
];

pub const KERNEL_EXACT: &[&str] = &["system", "init", "bash", "ssh"];

fn is_system_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    KERNEL_PREFIXES.iter().any(|p| lower.starts_with(p)) || KERNEL_EXACT.contains(&lower.as_str())
}

fn is_docker(name: &str, command: &str, working_dir: &str) -> bool {
    if name.starts_with("docker:") {
        return true;
    }
    let haystacks = [command, working_dir];
    haystacks
        .iter()
        .any(|h| h.contains("/var/lib/docker") || h.contains("containerd") || h.contains("runc"))
}

/// Classifies a process by name/command, in the precedence order of §4.3.
/// The tag set is closed: `docker`, `browser`, `development`, `system`, `other`.
pub fn categorize(name: &str, command: &str) -> &'static str {
    categorize_with_cwd(name, command, "")
}

/// As `categorize`, but also considers the working directory for the docker
/// container-runtime signature.
pub fn categorize_with_cwd(name: &str, command: &str, working_dir: &str) -> &'static str {
    let lower_name = name.to_ascii_lowercase();
    let lower_cmd = command.to_ascii_lowercase();

    if is_docker(&lower_name, &lower_cmd, working_dir) {
        return "docker";
    }
    if BROWSER_NAMES.iter().any(|b| lower_name.contains(b)) {
        return "browser";
    }
    if DEV_NAMES
        .iter()
        .any(|d| lower_name.contains(d) || lower_cmd.contains(d))
    {
        return "development";
    }
    if is_system_name(name) {
        return "system";
    }
    "other"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_by_prefix() {
        assert_eq!(categorize("docker:myctr", ""), "docker");
    }

    #[test]
    fn docker_by_runtime_signature() {
        assert_eq!(categorize("shim", "/usr/bin/containerd-shim"), "docker");
    }

    #[test]
    fn browser_case_insensitive() {
        assert_eq!(categorize("Google Chrome", ""), "browser");
    }

    #[test]
    fn development_by_command() {
        assert_eq!(categorize("myapp", "/usr/bin/python3 myapp.py"), "development");
    }

    #[test]
    fn system_by_prefix() {
        assert_eq!(categorize("kworker/0:1", ""), "system");
    }

    #[test]
    fn system_by_exact_match() {
        assert_eq!(categorize("bash", ""), "system");
    }

    #[test]
    fn falls_back_to_other() {
        assert_eq!(categorize("my-custom-service", ""), "other");
    }

    #[test]
    fn precedence_docker_over_development() {
        // docker: prefix wins even if the command also looks dev-ish
        assert_eq!(categorize("docker:python-runner", "python app.py"), "docker");
    }
}
