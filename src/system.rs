//! Host-wide statistics read from procfs: per-CPU time, memory and load.
//!
//! Every reader takes the procfs root so tests and containerized agents can
//! point it somewhere other than `/proc`.

use ahash::AHashMap as HashMap;
use std::fs;
use std::path::Path;

/// System load averages for 1, 5, and 15 minute intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

/// Per-CPU time counters in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// (mode, ticks) pairs in node-exporter mode naming.
    pub fn modes(&self) -> [(&'static str, u64); 8] {
        [
            ("user", self.user),
            ("nice", self.nice),
            ("system", self.system),
            ("idle", self.idle),
            ("iowait", self.iowait),
            ("irq", self.irq),
            ("softirq", self.softirq),
            ("steal", self.steal),
        ]
    }
}

fn read(procfs: &Path, name: &str) -> Result<String, String> {
    let path = procfs.join(name);
    fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

/// Reads load average from `<procfs>/loadavg`.
pub fn read_load_average(procfs: &Path) -> Result<LoadAverage, String> {
    parse_load_average(&read(procfs, "loadavg")?)
}

/// Format: "0.00 0.01 0.05 1/234 5678"
pub fn parse_load_average(content: &str) -> Result<LoadAverage, String> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(format!(
            "Invalid loadavg format: expected at least 3 fields, got {}",
            parts.len()
        ));
    }

    let parse = |i: usize| {
        parts[i]
            .parse::<f64>()
            .map_err(|e| format!("Failed to parse load average {:?}: {}", parts[i], e))
    };

    Ok(LoadAverage {
        one_min: parse(0)?,
        five_min: parse(1)?,
        fifteen_min: parse(2)?,
    })
}

/// Reads `<procfs>/meminfo` into a map of field name to bytes.
pub fn read_meminfo(procfs: &Path) -> Result<HashMap<String, u64>, String> {
    let fields = parse_meminfo(&read(procfs, "meminfo")?);
    if fields.is_empty() {
        return Err("no fields found in meminfo".to_string());
    }
    Ok(fields)
}

/// Values suffixed with `kB` are converted to bytes.
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    let mut fields = HashMap::new();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let Some(Ok(value)) = parts.next().map(str::parse::<u64>) else {
            continue;
        };
        let value = match parts.next() {
            Some("kB") => value * 1024,
            _ => value,
        };
        fields.insert(key.trim().to_string(), value);
    }
    fields
}

/// Reads per-CPU counters from `<procfs>/stat`, keyed by CPU index. The
/// aggregate `cpu` line is ignored.
pub fn read_cpu_stats(procfs: &Path) -> Result<Vec<(String, CpuStat)>, String> {
    let stats = parse_cpu_stats(&read(procfs, "stat")?);
    if stats.is_empty() {
        return Err("no per-cpu lines found in stat".to_string());
    }
    Ok(stats)
}

pub fn parse_cpu_stats(content: &str) -> Vec<(String, CpuStat)> {
    let mut stats = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(index) = parts.first().and_then(|p| p.strip_prefix("cpu")) else {
            continue;
        };
        if index.is_empty() || parts.len() < 8 {
            continue;
        }

        let field = |i: usize| parts.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        stats.push((
            index.to_string(),
            CpuStat {
                user: field(1),
                nice: field(2),
                system: field(3),
                idle: field(4),
                iowait: field(5),
                irq: field(6),
                softirq: field(7),
                steal: field(8),
            },
        ));
    }

    stats
}

/// Reads the boot time (seconds since the epoch) from `<procfs>/stat`.
pub fn read_boot_time(procfs: &Path) -> Result<u64, String> {
    read(procfs, "stat")?
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| "btime not found in stat".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_average() {
        let load = parse_load_average("0.25 0.50 1.00 1/234 5678\n").unwrap();
        assert_eq!(load.one_min, 0.25);
        assert_eq!(load.fifteen_min, 1.0);
        assert!(parse_load_average("0.25").is_err());
    }

    #[test]
    fn test_parse_meminfo_converts_kb() {
        let fields = parse_meminfo(
            "MemTotal:        2048 kB\nMemFree:   1024 kB\nHugePages_Total:       0\n",
        );
        assert_eq!(fields["MemTotal"], 2048 * 1024);
        assert_eq!(fields["MemFree"], 1024 * 1024);
        assert_eq!(fields["HugePages_Total"], 0);
    }

    #[test]
    fn test_parse_cpu_stats_skips_aggregate_line() {
        let content = "\
cpu  200 0 100 1000 10 0 5 1 0 0
cpu0 100 0 50 500 5 0 3 1 0 0
cpu1 100 0 50 500 5 0 2 0 0 0
intr 12345
btime 1700000000
";
        let stats = parse_cpu_stats(content);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, "0");
        assert_eq!(stats[1].1.softirq, 2);
        assert_eq!(stats[0].1.modes()[0], ("user", 100));
    }

    #[test]
    fn test_read_boot_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stat"), "cpu0 1 2 3 4 5 6 7\nbtime 1700000000\n").unwrap();
        assert_eq!(read_boot_time(dir.path()).unwrap(), 1_700_000_000);
    }
}
