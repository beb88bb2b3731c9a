//! Block device I/O statistics from `/proc/diskstats`.

use ahash::AHashMap as HashMap;
use std::fs;
use std::path::Path;

/// Statistics for a single block device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub reads_completed: u64,
    pub sectors_read: u64,
    pub time_reading_ms: u64,
    pub writes_completed: u64,
    pub sectors_written: u64,
    pub time_writing_ms: u64,
    /// Discard counters, present on kernels 4.18+.
    pub discards: Option<DiscardStats>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscardStats {
    pub completed: u64,
    pub sectors: u64,
    pub time_ms: u64,
}

/// Reads `<procfs>/diskstats`.
pub fn read_diskstats(procfs: &Path) -> Result<HashMap<String, DiskStats>, String> {
    let path = procfs.join("diskstats");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(parse_diskstats(&content))
}

/// Parses diskstats content. Format:
/// major minor name reads merged sectors ms writes merged sectors ms
/// in_flight io_ms weighted_ms [discards merged sectors ms [flushes ms]]
pub fn parse_diskstats(content: &str) -> HashMap<String, DiskStats> {
    let mut stats = HashMap::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }

        let device = parts[2];
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }

        let field = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
        let discards = (parts.len() >= 18).then(|| DiscardStats {
            completed: field(14),
            sectors: field(16),
            time_ms: field(17),
        });

        stats.insert(
            device.to_string(),
            DiskStats {
                reads_completed: field(3),
                sectors_read: field(5),
                time_reading_ms: field(6),
                writes_completed: field(7),
                sectors_written: field(9),
                time_writing_ms: field(10),
                discards,
            },
        );
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   7       0 loop0 10 0 20 0 0 0 0 0 0 4 0
 252       0 vda 1000 5 8000 400 2000 10 16000 900 0 1200 1300
 252       1 vda1 900 5 7000 350 1900 10 15000 850 0 1100 1200 12 0 96 3 0 0
";

    #[test]
    fn test_parse_diskstats() {
        let stats = parse_diskstats(SAMPLE);
        assert_eq!(stats.len(), 2, "loop devices are skipped");

        let vda = &stats["vda"];
        assert_eq!(vda.sectors_read, 8000);
        assert_eq!(vda.writes_completed, 2000);
        assert_eq!(vda.time_writing_ms, 900);
        assert!(vda.discards.is_none());

        let vda1 = &stats["vda1"];
        assert_eq!(
            vda1.discards,
            Some(DiscardStats {
                completed: 12,
                sectors: 96,
                time_ms: 3
            })
        );
    }

    #[test]
    fn test_read_diskstats_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_diskstats(dir.path()).is_err());
    }
}
