//! Memory-cgroup tree handling.
//!
//! The scan engine only ever sees cgroup inode numbers (from
//! `/proc/kpagecgroup`); this module maps them back to cgroup paths by
//! walking the memcg mount point, summing each directory's stats into its
//! ancestors on the way up.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::DirEntryExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, FileOp, Result};
use crate::stats::IdleMemStat;

pub const MTAB_PATH: &str = "/etc/mtab";

/// Locates the memory-cgroup mount point (typically
/// `/sys/fs/cgroup/memory`).
pub fn mount_point() -> Result<PathBuf> {
    let path = Path::new(MTAB_PATH);
    let content = fs::read_to_string(path).map_err(|e| Error::open(path, e))?;
    parse_mount_point(&content)
        .map(PathBuf::from)
        .ok_or_else(|| Error::Config("no memory cgroup mount in /etc/mtab".to_owned()))
}

fn parse_mount_point(mtab: &str) -> Option<&str> {
    mtab.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_dev, path, "cgroup", opts, ..] if opts.split(',').any(|o| o == "memory") => {
                Some(*path)
            }
            _ => None,
        }
    })
}

/// Rolls the per-inode stats up the cgroup directory tree.
///
/// Every directory under `root` gets an entry (zero stats if it owned no
/// counted page), keyed by its `/`-rooted cgroup path. Each entry is the
/// directory's own contribution plus the sum over all descendants. The
/// root itself is left out: it would double-count the whole host.
pub(crate) fn collect_tree(
    root: &Path,
    cg_stats: &HashMap<u64, IdleMemStat>,
) -> Result<HashMap<String, IdleMemStat>> {
    let mut result = HashMap::new();
    collect_dir(root, "/", 0, cg_stats, &mut result)?;
    result.remove("/");
    Ok(result)
}

fn collect_dir(
    root: &Path,
    path: &str,
    ino: u64,
    cg_stats: &HashMap<u64, IdleMemStat>,
    result: &mut HashMap<String, IdleMemStat>,
) -> Result<IdleMemStat> {
    let dir = root.join(path.trim_start_matches('/'));

    let mut acc = if ino != 0 {
        cg_stats.get(&ino).cloned().unwrap_or_default()
    } else {
        IdleMemStat::default()
    };

    let read_err = |e| Error::Io {
        path: dir.clone(),
        op: FileOp::Read,
        offset: 0,
        len: 0,
        source: e,
    };

    for entry in fs::read_dir(&dir).map_err(|e| Error::open(&dir, e))? {
        let entry = entry.map_err(read_err)?;
        if !entry.file_type().map_err(read_err)?.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let child_path = if ino != 0 {
            format!("{}/{}", path, name)
        } else {
            format!("/{}", name)
        };

        let child = collect_dir(root, &child_path, entry.ino(), cg_stats, result)?;
        if ino != 0 {
            acc += &child;
        }
    }

    result.insert(path.to_owned(), acc.clone());
    Ok(acc)
}
