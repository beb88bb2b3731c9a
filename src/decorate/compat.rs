//! Compatibility decorators mapping node-exporter output onto sonar names
//! and units.

use super::Decorator;
use crate::model::MetricFamily;
use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use tracing::debug;

const SECTOR_SIZE: f64 = 512.0;

/// Lowercased node-exporter name to sonar name.
static NAME_CONVERSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("node_network_receive_bytes_total", "sonar_network_receive_bytes"),
        ("node_network_transmit_bytes_total", "sonar_network_transmit_bytes"),
        ("node_memory_memtotal_bytes", "sonar_memory_total"),
        ("node_memory_memfree_bytes", "sonar_memory_free"),
        ("node_memory_cached_bytes", "sonar_memory_cached"),
        ("node_memory_memavailable_bytes", "sonar_memory_available"),
        ("node_memory_swapcached_bytes", "sonar_memory_swap_cached"),
        ("node_memory_swapfree_bytes", "sonar_memory_swap_free"),
        ("node_memory_swaptotal_bytes", "sonar_memory_swap_total"),
        ("node_filesystem_size_bytes", "sonar_filesystem_size"),
        ("node_filesystem_free_bytes", "sonar_filesystem_free"),
        ("node_load1", "sonar_load1"),
        ("node_load5", "sonar_load5"),
        ("node_load15", "sonar_load15"),
        ("node_disk_reads_completed_total", "sonar_disk_reads_completed_total"),
        ("node_disk_read_time_seconds_total", "sonar_disk_read_time_seconds_total"),
        ("node_disk_writes_completed_total", "sonar_disk_writes_completed_total"),
        ("node_disk_write_time_seconds_total", "sonar_disk_write_time_seconds_total"),
        ("node_disk_discards_completed_total", "sonar_disk_discards_completed_total"),
        ("node_disk_discarded_sectors_total", "sonar_disk_discarded_sectors_total"),
        ("node_disk_discard_time_seconds_total", "sonar_disk_discard_time_seconds_total"),
    ]
    .into_iter()
    .collect()
});

/// Renames node-exporter families to their sonar equivalents. Matching is
/// case-insensitive.
pub struct Names;

impl Decorator for Names {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            if let Some(new) = NAME_CONVERSIONS.get(mf.name.to_lowercase().as_str()) {
                mf.name = (*new).to_string();
            }
        }
    }

    fn name(&self) -> &str {
        "Names"
    }
}

/// Converts disk byte counters into 512-byte sector counters.
pub struct Disk;

impl Disk {
    fn sector_name(name: &str) -> Option<&'static str> {
        if name.eq_ignore_ascii_case("node_disk_read_bytes_total") {
            Some("sonar_disk_sectors_read")
        } else if name.eq_ignore_ascii_case("node_disk_written_bytes_total") {
            Some("sonar_disk_sectors_written")
        } else {
            None
        }
    }
}

impl Decorator for Disk {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            let Some(new) = Self::sector_name(&mf.name) else {
                continue;
            };
            mf.name = new.to_string();
            for sample in mf.samples.iter_mut() {
                sample.value_mut().map_scalar(|bytes| bytes / SECTOR_SIZE);
            }
        }
    }

    fn name(&self) -> &str {
        "Disk"
    }
}

/// Renames the node CPU counter to `sonar_cpu` and turns `cpu="3"` into
/// `cpu="cpu3"`. Non-numeric values are left as they are.
pub struct Cpu;

impl Decorator for Cpu {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            if !mf.name.eq_ignore_ascii_case("node_cpu_seconds_total") {
                continue;
            }
            mf.name = "sonar_cpu".to_string();

            for sample in mf.samples.iter_mut() {
                for label in sample.labels_mut().iter_mut() {
                    if !label.name.eq_ignore_ascii_case("cpu") {
                        continue;
                    }
                    match label.value.parse::<u32>() {
                        Ok(num) => label.value = format!("cpu{}", num),
                        Err(e) => debug!("Failed to parse cpu number {:?}: {}", label.value, e),
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        "Cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, Sample};

    #[test]
    fn test_names_match_case_insensitively() {
        let mut mfs = vec![
            MetricFamily::new("node_memory_MemAvailable_bytes", "", MetricKind::Gauge),
            MetricFamily::new("NODE_LOAD1", "", MetricKind::Gauge),
            MetricFamily::new("unrelated", "", MetricKind::Gauge),
        ];
        Names.decorate(&mut mfs);
        assert_eq!(mfs[0].name, "sonar_memory_available");
        assert_eq!(mfs[1].name, "sonar_load1");
        assert_eq!(mfs[2].name, "unrelated");
    }

    #[test]
    fn test_disk_converts_to_sectors() {
        let mut mfs = vec![
            MetricFamily::new("node_disk_written_bytes_total", "", MetricKind::Counter)
                .with_sample(Sample::counter(1024.0).with_label("device", "sda")),
            MetricFamily::new("node_disk_reads_completed_total", "", MetricKind::Counter)
                .with_sample(Sample::counter(1024.0)),
        ];
        Disk.decorate(&mut mfs);
        assert_eq!(mfs[0].name, "sonar_disk_sectors_written");
        assert_eq!(mfs[0].samples[0].value().scalar(), Some(2.0));
        // untouched
        assert_eq!(mfs[1].samples[0].value().scalar(), Some(1024.0));
    }

    #[test]
    fn test_cpu_label_rewrite() {
        let mut mfs = vec![MetricFamily::new(
            "node_cpu_seconds_total",
            "",
            MetricKind::Counter,
        )
        .with_sample(
            Sample::counter(1.5)
                .with_label("cpu", "3")
                .with_label("mode", "user"),
        )
        .with_sample(Sample::counter(2.0).with_label("cpu", "total"))];

        Cpu.decorate(&mut mfs);
        assert_eq!(mfs[0].name, "sonar_cpu");
        assert_eq!(mfs[0].samples[0].label("cpu"), Some("cpu3"));
        assert_eq!(mfs[0].samples[0].label("mode"), Some("user"));
        assert_eq!(mfs[0].samples[1].label("cpu"), Some("total"));
    }

    #[test]
    fn test_cpu_rewrite_is_idempotent() {
        let mut mfs = vec![MetricFamily::new(
            "node_cpu_seconds_total",
            "",
            MetricKind::Counter,
        )
        .with_sample(Sample::counter(1.0).with_label("cpu", "0"))];
        Cpu.decorate(&mut mfs);
        let once = mfs.clone();
        Cpu.decorate(&mut mfs);
        assert_eq!(once, mfs);
    }
}
