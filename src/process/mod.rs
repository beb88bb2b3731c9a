//! Per-process collector.
//!
//! Scans `<procfs>/[pid]` and reports CPU time, resident memory, open file
//! descriptors and start time labeled `{process, pid}`. The top-K decorator
//! later trims these families to the heaviest processes.

pub mod cpu;
pub mod scanner;

pub use cpu::{parse_proc_stat, read_proc_stat, ProcStat, CLK_TCK, PAGE_SIZE};
pub use scanner::{collect_proc_entries, count_open_fds, read_process_name, ProcEntry};

use crate::collectors::{CollectError, Collector};
use crate::model::{MetricFamily, MetricKind, Sample};
use crate::system;
use async_trait::async_trait;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// One scanned process.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub stat: ProcStat,
    pub open_fds: Option<usize>,
}

/// Reads one process. Returns `None` when it vanished mid-scan.
pub fn read_process(entry: &ProcEntry) -> Option<ProcessSample> {
    let stat = match read_proc_stat(&entry.proc_path) {
        Ok(stat) => stat,
        Err(e) => {
            debug!("Failed to read stat for pid {}: {}", entry.pid, e);
            return None;
        }
    };
    let name = read_process_name(&entry.proc_path)?;
    Some(ProcessSample {
        pid: entry.pid,
        name,
        stat,
        open_fds: count_open_fds(&entry.proc_path),
    })
}

pub struct ProcessCollector {
    procfs: PathBuf,
}

impl ProcessCollector {
    pub fn new(procfs: impl Into<PathBuf>) -> Self {
        Self {
            procfs: procfs.into(),
        }
    }

    pub fn gather(procfs: &Path) -> Result<Vec<MetricFamily>, CollectError> {
        let start = Instant::now();
        let entries = collect_proc_entries(procfs);
        if entries.is_empty() {
            return Err(CollectError::gather(
                "processes",
                format!("no processes found under {}", procfs.display()),
            ));
        }

        let samples: Vec<ProcessSample> = entries.par_iter().filter_map(read_process).collect();
        let boot_time = system::read_boot_time(procfs).unwrap_or_else(|e| {
            debug!("Failed to read boot time: {}", e);
            0
        });
        debug!(
            "scanned {} of {} processes in {:?}",
            samples.len(),
            entries.len(),
            start.elapsed()
        );

        Ok(to_families(&samples, boot_time))
    }
}

pub fn to_families(samples: &[ProcessSample], boot_time: u64) -> Vec<MetricFamily> {
    let mut cpu = MetricFamily::new(
        "sonar_process_cpu_seconds_total",
        "Total user and system CPU time spent in seconds.",
        MetricKind::Counter,
    );
    let mut rss = MetricFamily::new(
        "sonar_process_resident_memory_bytes",
        "Resident memory size in bytes.",
        MetricKind::Gauge,
    );
    let mut fds = MetricFamily::new(
        "sonar_process_open_fds",
        "Number of open file descriptors.",
        MetricKind::Gauge,
    );
    let mut started = MetricFamily::new(
        "sonar_process_start_time_seconds",
        "Start time of the process since unix epoch in seconds.",
        MetricKind::Gauge,
    );

    for p in samples {
        let pid = p.pid.to_string();
        let labelled = |s: Sample| {
            s.with_label("process", p.name.as_str())
                .with_label("pid", pid.as_str())
        };
        cpu.samples
            .push(labelled(Sample::counter(p.stat.cpu_time_seconds())));
        rss.samples
            .push(labelled(Sample::gauge(p.stat.resident_bytes())));
        if let Some(n) = p.open_fds {
            fds.samples.push(labelled(Sample::gauge(n as f64)));
        }
        started
            .samples
            .push(labelled(Sample::gauge(p.stat.start_time_seconds(boot_time))));
    }

    vec![cpu, rss, fds, started]
        .into_iter()
        .filter(|mf| !mf.is_empty())
        .collect()
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "processes"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let procfs = self.procfs.clone();
        tokio::task::spawn_blocking(move || Self::gather(&procfs))
            .await
            .map_err(|e| CollectError::gather("processes", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_proc(root: &Path, pid: u32, name: &str, utime: u64) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::write(dir.join("comm"), format!("{}\n", name)).unwrap();
        fs::write(
            dir.join("stat"),
            format!(
                "{} ({}) S 1 1 1 0 -1 0 0 0 0 0 {} 0 0 0 20 0 1 0 100 1000 10 0",
                pid, name, utime
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_gather_labels_by_process_and_pid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stat"), "btime 1000\n").unwrap();
        write_proc(dir.path(), 1, "init", 100);
        write_proc(dir.path(), 42, "nginx", 200);
        // a pid directory without stat vanished mid-scan
        fs::create_dir(dir.path().join("99")).unwrap();

        let families = ProcessCollector::gather(dir.path()).unwrap();
        let cpu = families
            .iter()
            .find(|mf| mf.name == "sonar_process_cpu_seconds_total")
            .unwrap();
        assert_eq!(cpu.samples.len(), 2);
        let nginx = cpu
            .samples
            .iter()
            .find(|s| s.label("process") == Some("nginx"))
            .unwrap();
        assert_eq!(nginx.label("pid"), Some("42"));
        assert_eq!(nginx.value().scalar(), Some(200.0 / *CLK_TCK));

        let started = families
            .iter()
            .find(|mf| mf.name == "sonar_process_start_time_seconds")
            .unwrap();
        assert_eq!(
            started.samples[0].value().scalar(),
            Some(1000.0 + 100.0 / *CLK_TCK)
        );
    }

    #[test]
    fn test_gather_without_processes_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProcessCollector::gather(dir.path()).is_err());
    }
}
