//! Pure parsers for the subset of `/proc` files the collector needs.

/// Error produced by a malformed `/proc` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fields pulled out of `/proc/[pid]/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u32,
    pub starttime: u64,
    pub vsize: u64,
    pub rss_pages: i64,
}

/// Parses `/proc/[pid]/stat`. The `comm` field is parenthesized and may itself
/// contain spaces or parentheses, so it is located by the last `)` rather than
/// split on whitespace.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();
    let open = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close <= open {
        return Err(ParseError::new("malformed comm field in stat"));
    }

    let pid: u32 = content[..open]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("bad pid in stat"))?;
    let comm = content[open + 1..close].to_string();

    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    // rest[0] = state, rest[1] = ppid, ... (3-based index per proc(5), 0-indexed here
    // starting right after comm, so state is index 0).
    if rest.len() < 22 {
        return Err(ParseError::new("too few fields after comm in stat"));
    }

    let state = rest[0].chars().next().unwrap_or('?');
    let ppid: u32 = rest[1].parse().map_err(|_| ParseError::new("bad ppid"))?;
    let utime: u64 = rest[11].parse().map_err(|_| ParseError::new("bad utime"))?;
    let stime: u64 = rest[12].parse().map_err(|_| ParseError::new("bad stime"))?;
    let num_threads: u32 = rest[17].parse().map_err(|_| ParseError::new("bad num_threads"))?;
    let starttime: u64 = rest[19].parse().map_err(|_| ParseError::new("bad starttime"))?;
    let vsize: u64 = rest[20].parse().map_err(|_| ParseError::new("bad vsize"))?;
    let rss_pages: i64 = rest[21].parse().map_err(|_| ParseError::new("bad rss"))?;

    Ok(ProcStat {
        pid,
        comm,
        state,
        ppid,
        utime,
        stime,
        num_threads,
        starttime,
        vsize,
        rss_pages,
    })
}

/// Fields pulled out of `/proc/[pid]/io`. Missing entirely (permission denied)
/// is handled by the caller, which substitutes `ProcIo::default()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcIo {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    let mut io = ProcIo::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "read_bytes" => io.read_bytes = value.parse().unwrap_or(0),
            "write_bytes" => io.write_bytes = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(io)
}

/// Extracts the kernel boot time (seconds since epoch) from `/proc/stat`'s `btime` line.
pub fn parse_boot_time(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        line.strip_prefix("btime ")
            .and_then(|v| v.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STAT: &str =
        "1234 (bash) S 1 1234 1234 0 -1 4194304 100 0 0 0 10 5 0 0 20 0 1 0 12345 123456789 4096 18446744073709551615";

    #[test]
    fn parses_basic_stat() {
        let stat = parse_proc_stat(SAMPLE_STAT).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.utime, 10);
        assert_eq!(stat.stime, 5);
        assert_eq!(stat.num_threads, 1);
        assert_eq!(stat.starttime, 123456789);
        assert_eq!(stat.vsize, 4096);
    }

    #[test]
    fn parses_comm_with_spaces_and_parens() {
        let content = "5000 (Web Content (sandboxed)) S 4000 5000 5000 0 -1 4194304 100 0 0 0 20 10 0 0 20 0 4 0 999 123456789 4096 5000";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.comm, "Web Content (sandboxed)");
        assert_eq!(stat.num_threads, 4);
    }

    #[test]
    fn rejects_truncated_stat() {
        let result = parse_proc_stat("1 (x) S 0 1");
        assert!(result.is_err());
    }

    #[test]
    fn parses_io() {
        let io = parse_proc_io("rchar: 100\nwchar: 50\nread_bytes: 4096\nwrite_bytes: 2048\n").unwrap();
        assert_eq!(io.read_bytes, 4096);
        assert_eq!(io.write_bytes, 2048);
    }

    #[test]
    fn parses_boot_time() {
        let stat = "cpu  100 0 50 1000 0 0 0 0\nbtime 1700000000\n";
        assert_eq!(parse_boot_time(stat), Some(1700000000));
    }
}
