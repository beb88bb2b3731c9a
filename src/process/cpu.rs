//! Parsing of `/proc/<pid>/stat`.

use once_cell::sync::Lazy;
use std::fs;
use std::io;
use std::path::Path;

/// Get system clock ticks per second (usually 100, but can vary).
fn get_clk_tck() -> f64 {
    // SAFETY: sysconf is safe to call with _SC_CLK_TCK
    // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
    unsafe {
        let tck = libc::sysconf(libc::_SC_CLK_TCK);
        if tck > 0 {
            return tck as f64;
        }
    }
    100.0
}

fn get_page_size() -> f64 {
    // SAFETY: sysconf is safe to call with _SC_PAGESIZE
    unsafe {
        let size = libc::sysconf(libc::_SC_PAGESIZE);
        if size > 0 {
            return size as f64;
        }
    }
    4096.0
}

/// System clock ticks per second (for CPU time calculation).
pub static CLK_TCK: Lazy<f64> = Lazy::new(get_clk_tck);

pub static PAGE_SIZE: Lazy<f64> = Lazy::new(get_page_size);

/// The fields of a process stat line the collector reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcStat {
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub start_ticks: u64,
    pub rss_pages: u64,
}

impl ProcStat {
    /// Total CPU time (user+system) in seconds.
    pub fn cpu_time_seconds(&self) -> f64 {
        (self.utime_ticks + self.stime_ticks) as f64 / *CLK_TCK
    }

    /// Start time in seconds since the epoch given the host boot time.
    pub fn start_time_seconds(&self, boot_time: u64) -> f64 {
        boot_time as f64 + self.start_ticks as f64 / *CLK_TCK
    }

    pub fn resident_bytes(&self) -> f64 {
        self.rss_pages as f64 * *PAGE_SIZE
    }
}

pub fn read_proc_stat(proc_path: &Path) -> Result<ProcStat, io::Error> {
    parse_proc_stat(&fs::read_to_string(proc_path.join("stat"))?)
}

/// Parses a stat line. The command name may contain spaces and parentheses,
/// so fields are counted from the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, io::Error> {
    let rest = content
        .rfind(')')
        .map(|i| &content[i + 1..])
        .ok_or_else(|| io::Error::other("Invalid stat format"))?;

    // rest starts at field 3 (state)
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 22 {
        return Err(io::Error::other("Invalid stat format"));
    }

    let field = |n: usize| -> Result<u64, io::Error> {
        parts[n - 3]
            .parse()
            .map_err(|_| io::Error::other(format!("Failed to parse stat field {}", n)))
    };

    Ok(ProcStat {
        utime_ticks: field(14)?,
        stime_ticks: field(15)?,
        start_ticks: field(22)?,
        rss_pages: field(24)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat_with_spaces_in_name() {
        let line = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 500 0 0 0 250 50 0 0 20 0 1 0 9000 10000000 300 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let stat = parse_proc_stat(line).unwrap();
        assert_eq!(stat.utime_ticks, 250);
        assert_eq!(stat.stime_ticks, 50);
        assert_eq!(stat.start_ticks, 9000);
        assert_eq!(stat.rss_pages, 300);
        assert_eq!(stat.cpu_time_seconds(), 300.0 / *CLK_TCK);
    }

    #[test]
    fn test_parse_proc_stat_rejects_truncated_line() {
        assert!(parse_proc_stat("1 (init) S 1 1").is_err());
        assert!(parse_proc_stat("garbage").is_err());
    }
}
