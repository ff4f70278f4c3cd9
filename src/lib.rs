//! Idle-memory working-set scanning for Linux memory cgroups.
//!
//! Drives the kernel's idle page tracking facility: every page frame is
//! marked idle through `/sys/kernel/mm/page_idle/bitmap`, and on the next
//! scan cycle the pages whose bit survived (the kernel clears it on
//! access) are counted as idle. Each page is attributed to the memory
//! cgroup owning it via `/proc/kpagecgroup` and classified anon/file via
//! `/proc/kpageflags`, producing per-cgroup histograms over how many
//! consecutive cycles each page has stayed idle. Callers use the
//! histograms to estimate a cgroup's working set at different coldness
//! cutoffs.
//!
//! Requires a kernel with `CONFIG_IDLE_PAGE_TRACKING` and `CONFIG_MEMCG`,
//! and enough privilege to read `/proc/kpageflags` (root or
//! CAP_SYS_ADMIN). Only LRU-tracked memory is measured; slabs and other
//! non-LRU allocations are invisible to the idle bitmap.
//!
//! The idle bitmap is host-global kernel state: run at most one scanner
//! per host.

pub mod error;
pub mod kpage;
pub mod memcg;
pub mod scan;
pub mod stats;
pub mod util;
pub mod zoneinfo;

/// Pfns per I/O window. A multiple of 64 for the sake of the idle bitmap,
/// and of the page size so that sampling never strands partial pages of
/// the age table.
pub const BATCH_SIZE: usize = 4096;

/// Pfns one `iter()` call covers before sampling stretches it.
pub const SCAN_CHUNK: usize = 32768;

/// Number of age buckets. Ages saturate at `MAX_AGE - 1` so that one byte
/// per tracked page suffices; a 2- or 4-bit packing would halve the table
/// but cut the history too short to be useful.
pub const MAX_AGE: usize = 256;

pub use error::{Error, FileOp, Result};
pub use scan::{IdleMemScanner, ScanConfig};
pub use stats::{IdleMemStat, MemType};

/// Whether the running kernel exposes idle page tracking.
pub fn available() -> bool {
    std::path::Path::new(kpage::IDLE_PAGE_BITMAP_PATH).exists()
}
