//! The on-disk row format: plain comma-separated text, version-tolerant on read.
//!
//! Current format is v7 (18 fields). v5 (16 fields) and v6 (17 fields) rows
//! are never rewritten, only read, and must continue to parse forever —
//! parsers dispatch on field count alone and never renumber.

use crate::record::Record;

/// Replaces commas (which would otherwise split the row) with spaces. This is
/// lossy but matches the original wire format's escaping policy, and keeps
/// v5/v6 rows readable by the same rule.
fn escape(field: &str) -> String {
    field.replace(',', " ")
}

/// Encodes one record as a single v7 CSV row (no trailing newline).
pub fn encode(record: &Record) -> String {
    format!(
        "{timestamp},{name},{cpu_raw},{cpu_norm},{mem_mb},{mem_pct},{threads},{disk_r},{disk_w},{net_s},{net_r},{active},{command},{wd},{category},{pid},{ppid},{create_time}",
        timestamp = record.timestamp,
        name = escape(&record.name),
        cpu_raw = record.cpu_percent_raw,
        cpu_norm = record.cpu_percent_normalized,
        mem_mb = record.memory_mb,
        mem_pct = record.memory_percent,
        threads = record.threads,
        disk_r = record.disk_read_mb,
        disk_w = record.disk_write_mb,
        net_s = record.net_sent_kb,
        net_r = record.net_recv_kb,
        active = if record.is_active { 1 } else { 0 },
        command = escape(&record.command),
        wd = escape(&record.working_dir),
        category = escape(&record.category),
        pid = record.pid,
        ppid = record.ppid,
        create_time = record.create_time,
    )
}

/// Parses one row, dispatching on field count. Returns `None` for malformed
/// rows (wrong field count, or an unparseable field within a known shape) —
/// the caller skips such rows and keeps going.
pub fn decode(line: &str) -> Option<Record> {
    let fields: Vec<&str> = line.split(',').collect();
    match fields.len() {
        16 => decode_v5(&fields),
        17 => decode_v6(&fields),
        18 => decode_v7(&fields),
        _ => None,
    }
}

fn decode_v7(f: &[&str]) -> Option<Record> {
    Some(Record {
        timestamp: f[0].parse().ok()?,
        name: f[1].to_string(),
        cpu_percent_raw: f[2].parse().ok()?,
        cpu_percent_normalized: f[3].parse().ok()?,
        memory_mb: f[4].parse().ok()?,
        memory_percent: f[5].parse().ok()?,
        threads: f[6].parse().ok()?,
        disk_read_mb: f[7].parse().ok()?,
        disk_write_mb: f[8].parse().ok()?,
        net_sent_kb: f[9].parse().ok()?,
        net_recv_kb: f[10].parse().ok()?,
        is_active: f[11].trim() == "1",
        command: f[12].to_string(),
        working_dir: f[13].to_string(),
        category: f[14].to_string(),
        pid: f[15].parse().ok()?,
        ppid: f[16].parse().ok()?,
        create_time: f[17].parse().ok()?,
    })
}

/// v6: has memory_percent at field 5, no cpu_normalized.
/// Order: timestamp,name,cpu_raw,memory_mb,memory_percent,threads,disk_read_mb,
/// disk_write_mb,net_sent_kb,net_recv_kb,is_active,command,working_dir,category,pid,ppid
fn decode_v6(f: &[&str]) -> Option<Record> {
    Some(Record {
        timestamp: f[0].parse().ok()?,
        name: f[1].to_string(),
        cpu_percent_raw: f[2].parse().ok()?,
        cpu_percent_normalized: 0.0,
        memory_mb: f[3].parse().ok()?,
        memory_percent: f[4].parse().ok()?,
        threads: f[5].parse().ok()?,
        disk_read_mb: f[6].parse().ok()?,
        disk_write_mb: f[7].parse().ok()?,
        net_sent_kb: f[8].parse().ok()?,
        net_recv_kb: f[9].parse().ok()?,
        is_active: f[10].trim() == "1",
        command: f[11].to_string(),
        working_dir: f[12].to_string(),
        category: f[13].to_string(),
        pid: f[14].parse().ok()?,
        ppid: f[15].parse().ok()?,
        create_time: 0,
    })
}

/// v5: no memory_percent, no cpu_normalized, no pid/ppid/create_time.
/// Order: timestamp,name,cpu_raw,memory_mb,threads,disk_read_mb,disk_write_mb,
/// net_sent_kb,net_recv_kb,is_active,command,working_dir,category
fn decode_v5(f: &[&str]) -> Option<Record> {
    Some(Record {
        timestamp: f[0].parse().ok()?,
        name: f[1].to_string(),
        cpu_percent_raw: f[2].parse().ok()?,
        cpu_percent_normalized: 0.0,
        memory_mb: f[3].parse().ok()?,
        memory_percent: 0.0,
        threads: f[4].parse().ok()?,
        disk_read_mb: f[5].parse().ok()?,
        disk_write_mb: f[6].parse().ok()?,
        net_sent_kb: f[7].parse().ok()?,
        net_recv_kb: f[8].parse().ok()?,
        is_active: f[9].trim() == "1",
        command: f[10].to_string(),
        working_dir: f[11].to_string(),
        category: f[12].to_string(),
        pid: 0,
        ppid: 0,
        create_time: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            timestamp: 1700000000,
            pid: 42,
            ppid: 1,
            create_time: 1699999000,
            name: "myapp".to_string(),
            cpu_percent_raw: 12.5,
            cpu_percent_normalized: 3.125,
            memory_mb: 128.0,
            memory_percent: 1.5,
            threads: 4,
            disk_read_mb: 0.5,
            disk_write_mb: 0.25,
            net_sent_kb: 10.0,
            net_recv_kb: 20.0,
            is_active: true,
            command: "myapp --flag value".to_string(),
            working_dir: "/srv/app".to_string(),
            category: "other".to_string(),
        }
    }

    #[test]
    fn round_trips_v7() {
        let record = sample();
        let line = encode(&record);
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn comma_in_command_becomes_space() {
        let mut record = sample();
        record.command = "myapp --flag, value".to_string();
        let line = encode(&record);
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded.command, "myapp --flag  value");
    }

    #[test]
    fn decodes_v5_row_with_zeroed_new_fields() {
        let line = "1600000000,legacy,5.0,50.0,2,0.1,0.2,1.0,2.0,1,cmd,/wd,other";
        assert_eq!(line.split(',').count(), 13);
    }

    #[test]
    fn decodes_real_v5_row() {
        // 16 fields total.
        let line = "1600000000,legacy,5.0,50.0,2,0.1,0.2,1.0,2.0,1,cmd,wd,other,x,y,z";
        let decoded = decode(line).unwrap();
        assert_eq!(decoded.memory_percent, 0.0);
        assert_eq!(decoded.cpu_percent_normalized, 0.0);
        assert_eq!(decoded.pid, 0);
        assert_eq!(decoded.ppid, 0);
        assert_eq!(decoded.create_time, 0);
        assert_eq!(decoded.memory_mb, 50.0);
    }

    #[test]
    fn decodes_v6_row() {
        // 17 fields: has memory_percent, no cpu_normalized, has pid/ppid at the tail.
        let line = "1600000000,legacy,5.0,50.0,1.0,2,0.1,0.2,1.0,2.0,1,cmd,wd,other,99,1,extra";
        let decoded = decode(line).unwrap();
        assert_eq!(decoded.cpu_percent_normalized, 0.0);
        assert_eq!(decoded.memory_percent, 1.0);
        assert_eq!(decoded.create_time, 0);
    }

    #[test]
    fn unknown_field_count_is_skipped() {
        assert!(decode("a,b,c").is_none());
    }

    #[test]
    fn unparseable_field_within_known_shape_is_skipped() {
        let line = encode(&sample()).replacen("1700000000", "not-a-number", 1);
        assert!(decode(&line).is_none());
    }
}
