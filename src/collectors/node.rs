//! Built-in host collector.
//!
//! Emits node-exporter compatible families from procfs so the compat
//! decorators can map them onto sonar names. A failing source is logged at
//! debug and skipped; the collector only fails when every source fails.

use super::diskstats::{self, DiskStats};
use super::filesystem;
use super::netdev;
use super::{CollectError, Collector};
use crate::model::{MetricFamily, MetricKind, Sample};
use crate::process::CLK_TCK;
use crate::system;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

const SECTOR_SIZE: f64 = 512.0;

/// Physical NICs only; VPN, bridge and container interfaces are left out.
static PHYSICAL_NIC: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(eno|eth|ens)\d+").ok());

const MEMINFO_FIELDS: &[&str] = &[
    "MemTotal",
    "MemFree",
    "Cached",
    "MemAvailable",
    "SwapCached",
    "SwapFree",
    "SwapTotal",
];

type Source = fn(&Path) -> Result<Vec<MetricFamily>, String>;

const SOURCES: &[(&str, Source)] = &[
    ("cpu", cpu_families),
    ("meminfo", memory_families),
    ("loadavg", load_families),
    ("diskstats", disk_families),
    ("netdev", network_families),
    ("filesystem", filesystem_families),
];

pub struct NodeCollector {
    procfs: PathBuf,
}

impl NodeCollector {
    pub fn new(procfs: impl Into<PathBuf>) -> Self {
        Self {
            procfs: procfs.into(),
        }
    }

    /// Reads every source synchronously.
    pub fn gather(procfs: &Path) -> Result<Vec<MetricFamily>, CollectError> {
        let mut families = Vec::new();
        let mut failed = 0;
        for (name, source) in SOURCES {
            match source(procfs) {
                Ok(mfs) => families.extend(mfs),
                Err(e) => {
                    debug!("node source {} failed: {}", name, e);
                    failed += 1;
                }
            }
        }

        if failed == SOURCES.len() {
            return Err(CollectError::gather(
                "node",
                format!("no readable sources under {}", procfs.display()),
            ));
        }
        Ok(families)
    }
}

#[async_trait]
impl Collector for NodeCollector {
    fn name(&self) -> &str {
        "node"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let procfs = self.procfs.clone();
        tokio::task::spawn_blocking(move || Self::gather(&procfs))
            .await
            .map_err(|e| CollectError::gather("node", e.to_string()))?
    }
}

fn cpu_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let mut mf = MetricFamily::new(
        "node_cpu_seconds_total",
        "Seconds the CPUs spent in each mode.",
        MetricKind::Counter,
    );
    for (cpu, stat) in system::read_cpu_stats(procfs)? {
        for (mode, ticks) in stat.modes() {
            mf.samples.push(
                Sample::counter(ticks as f64 / *CLK_TCK)
                    .with_label("cpu", cpu.as_str())
                    .with_label("mode", mode),
            );
        }
    }
    Ok(vec![mf])
}

fn memory_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let fields = system::read_meminfo(procfs)?;
    Ok(MEMINFO_FIELDS
        .iter()
        .filter_map(|field| {
            let bytes = fields.get(*field)?;
            Some(
                MetricFamily::new(
                    format!("node_memory_{}_bytes", field),
                    format!("Memory information field {}_bytes.", field),
                    MetricKind::Gauge,
                )
                .with_sample(Sample::gauge(*bytes as f64)),
            )
        })
        .collect())
}

fn load_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let load = system::read_load_average(procfs)?;
    Ok([
        ("node_load1", "1m load average.", load.one_min),
        ("node_load5", "5m load average.", load.five_min),
        ("node_load15", "15m load average.", load.fifteen_min),
    ]
    .into_iter()
    .map(|(name, help, value)| {
        MetricFamily::new(name, help, MetricKind::Gauge).with_sample(Sample::gauge(value))
    })
    .collect())
}

fn disk_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let stats = diskstats::read_diskstats(procfs)?;
    let mut devices: Vec<(&String, &DiskStats)> = stats.iter().collect();
    devices.sort_by(|a, b| a.0.cmp(b.0));

    let counters: [(&str, &str, fn(&DiskStats) -> Option<f64>); 9] = [
        ("node_disk_read_bytes_total", "The total number of bytes read successfully.", |d| {
            Some(d.sectors_read as f64 * SECTOR_SIZE)
        }),
        ("node_disk_written_bytes_total", "The total number of bytes written successfully.", |d| {
            Some(d.sectors_written as f64 * SECTOR_SIZE)
        }),
        ("node_disk_reads_completed_total", "The total number of reads completed successfully.", |d| {
            Some(d.reads_completed as f64)
        }),
        ("node_disk_writes_completed_total", "The total number of writes completed successfully.", |d| {
            Some(d.writes_completed as f64)
        }),
        ("node_disk_read_time_seconds_total", "The total number of seconds spent by all reads.", |d| {
            Some(d.time_reading_ms as f64 / 1000.0)
        }),
        ("node_disk_write_time_seconds_total", "This is the total number of seconds spent by all writes.", |d| {
            Some(d.time_writing_ms as f64 / 1000.0)
        }),
        ("node_disk_discards_completed_total", "The total number of discards completed successfully.", |d| {
            d.discards.as_ref().map(|x| x.completed as f64)
        }),
        ("node_disk_discarded_sectors_total", "The total number of sectors discarded successfully.", |d| {
            d.discards.as_ref().map(|x| x.sectors as f64)
        }),
        ("node_disk_discard_time_seconds_total", "This is the total number of seconds spent by all discards.", |d| {
            d.discards.as_ref().map(|x| x.time_ms as f64 / 1000.0)
        }),
    ];

    Ok(counters
        .iter()
        .map(|(name, help, value)| {
            let mut mf = MetricFamily::new(*name, *help, MetricKind::Counter);
            for (device, stat) in &devices {
                if let Some(v) = value(stat) {
                    mf.samples
                        .push(Sample::counter(v).with_label("device", device.as_str()));
                }
            }
            mf
        })
        .filter(|mf| !mf.is_empty())
        .collect())
}

fn network_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let stats = netdev::read_netdev_stats(procfs)?;
    let mut devices: Vec<_> = stats
        .iter()
        .filter(|(dev, _)| PHYSICAL_NIC.as_ref().is_some_and(|re| re.is_match(dev)))
        .collect();
    devices.sort_by(|a, b| a.0.cmp(b.0));

    let mut rx = MetricFamily::new(
        "node_network_receive_bytes_total",
        "Network device statistic receive_bytes.",
        MetricKind::Counter,
    );
    let mut tx = MetricFamily::new(
        "node_network_transmit_bytes_total",
        "Network device statistic transmit_bytes.",
        MetricKind::Counter,
    );
    for (dev, stat) in devices {
        rx.samples
            .push(Sample::counter(stat.receive_bytes as f64).with_label("device", dev.as_str()));
        tx.samples
            .push(Sample::counter(stat.transmit_bytes as f64).with_label("device", dev.as_str()));
    }
    Ok(vec![rx, tx])
}

fn filesystem_families(procfs: &Path) -> Result<Vec<MetricFamily>, String> {
    let mut size = MetricFamily::new(
        "node_filesystem_size_bytes",
        "Filesystem size in bytes.",
        MetricKind::Gauge,
    );
    let mut free = MetricFamily::new(
        "node_filesystem_free_bytes",
        "Filesystem free space in bytes.",
        MetricKind::Gauge,
    );
    for fs in filesystem::read_filesystem_stats(procfs)? {
        let labelled = |v: u64| {
            Sample::gauge(v as f64)
                .with_label("device", fs.mount.device.as_str())
                .with_label("fstype", fs.mount.fstype.as_str())
                .with_label("mountpoint", fs.mount.mount_point.as_str())
        };
        size.samples.push(labelled(fs.size_bytes));
        free.samples.push(labelled(fs.free_bytes));
    }
    Ok(vec![size, free])
}
