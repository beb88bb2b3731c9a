//! Mounted filesystem capacity from `/proc/mounts` and `statvfs`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

const IGNORED_FS_TYPES: &[&str] = &[
    "aufs",
    "autofs",
    "binfmt_misc",
    "cifs",
    "cgroup",
    "debugfs",
    "devpts",
    "devtmpfs",
    "ecryptfs",
    "efivarfs",
    "fuse",
    "hugetlbfs",
    "mqueue",
    "nfs",
    "overlayfs",
    "proc",
    "pstore",
    "rpc_pipefs",
    "securityfs",
    "smb",
    "sysfs",
    "tmpfs",
    "tracefs",
    "squashfs",
    "nsfs",
];

static IGNORED_MOUNT_POINTS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^/(rootfs/)?(boot|sys|proc|dev|host|etc|var/(lib|run)/docker/[^$]+|run/docker/[^$]+)($|/)",
    )
    .ok()
});

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub device: String,
    pub mount_point: String,
    pub fstype: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemStats {
    pub mount: Mount,
    pub size_bytes: u64,
    pub free_bytes: u64,
}

/// Reads `<procfs>/mounts` and stats every mount that is not ignored.
/// Mounts that cannot be stat'ed are skipped.
pub fn read_filesystem_stats(procfs: &Path) -> Result<Vec<FilesystemStats>, String> {
    let path = procfs.join("mounts");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    Ok(parse_mounts(&content)
        .into_iter()
        .filter_map(|mount| {
            let (size_bytes, free_bytes) = statvfs(&mount.mount_point).ok()?;
            Some(FilesystemStats {
                mount,
                size_bytes,
                free_bytes,
            })
        })
        .collect())
}

/// Parses mounts content, dropping pseudo filesystems and system mount
/// points.
pub fn parse_mounts(content: &str) -> Vec<Mount> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let (device, mount_point, fstype) = (parts.next()?, parts.next()?, parts.next()?);
            if should_skip_filesystem(fstype, mount_point) {
                return None;
            }
            Some(Mount {
                device: device.to_string(),
                mount_point: mount_point.to_string(),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

fn should_skip_filesystem(fstype: &str, mount_point: &str) -> bool {
    if IGNORED_FS_TYPES.contains(&fstype) {
        return true;
    }
    IGNORED_MOUNT_POINTS
        .as_ref()
        .is_some_and(|re| re.is_match(mount_point))
}

/// Returns (size, free) in bytes.
fn statvfs(path: &str) -> Result<(u64, u64), String> {
    use std::ffi::CString;
    use std::mem;

    let c_path = CString::new(path).map_err(|e| format!("Invalid path: {}", e))?;

    // SAFETY: c_path is a valid NUL-terminated string and stat is a plain C struct.
    unsafe {
        let mut stat: libc::statvfs = mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(format!("statvfs failed for {}", path));
        }

        let block_size = stat.f_frsize as u64;
        Ok((
            block_size * stat.f_blocks as u64,
            block_size * stat.f_bfree as u64,
        ))
    }
}
