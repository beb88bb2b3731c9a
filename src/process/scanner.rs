//! Process discovery under the procfs root.

use std::fs;
use std::path::{Path, PathBuf};

/// Process entry representing a directory in /proc filesystem.
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Scans `root` for directories with numeric names.
pub fn collect_proc_entries(root: &Path) -> Vec<ProcEntry> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut out: Vec<ProcEntry> = entries
        .flatten()
        .filter_map(|entry| {
            let p = entry.path();
            let pid = p.file_name()?.to_str()?.parse::<u32>().ok()?;
            Some(ProcEntry { pid, proc_path: p })
        })
        .collect();
    out.sort_by_key(|e| e.pid);
    out
}

/// Reads process name from comm file or extracts from cmdline.
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let first = std::str::from_utf8(first).ok()?;
    Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Number of entries in `/proc/<pid>/fd`. Unreadable for other users'
/// processes unless running as root.
pub fn count_open_fds(proc_path: &Path) -> Option<usize> {
    fs::read_dir(proc_path.join("fd"))
        .ok()
        .map(|entries| entries.count())
}
