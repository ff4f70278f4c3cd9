//! The idle-page scan engine.
//!
//! A scan cycle walks every pfn in `[0, END_PFN)` in fixed windows,
//! coupling three kernel streams per window: page flags, page ownership
//! and the idle bitmap. Pages still flagged idle since the previous cycle
//! are counted into the owning cgroup's histogram, bucketed by how many
//! consecutive cycles they have now been idle, and the bitmap is then
//! re-armed for the next cycle.

use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::kpage::{
    KPageFlags, WordFile, IDLE_PAGE_BITMAP_PATH, KPAGECGROUP_PATH, KPAGEFLAGS_PATH,
};
use crate::memcg;
use crate::stats::{IdleMemStat, MemType};
use crate::zoneinfo::{self, ZONEINFO_PATH};
use crate::{BATCH_SIZE, MAX_AGE, SCAN_CHUNK};

/// Locations of the kernel inputs consumed by the scanner. Every path can
/// be redirected, which is how the test suite fabricates a host.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub zoneinfo: PathBuf,
    pub kpageflags: PathBuf,
    pub kpagecgroup: PathBuf,
    pub idle_bitmap: PathBuf,
    /// Memory-cgroup mount point; discovered from `/etc/mtab` when unset.
    pub memcg_root: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            zoneinfo: ZONEINFO_PATH.into(),
            kpageflags: KPAGEFLAGS_PATH.into(),
            kpagecgroup: KPAGECGROUP_PATH.into(),
            idle_bitmap: IDLE_PAGE_BITMAP_PATH.into(),
            memcg_root: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ScanState {
    /// At a cycle boundary; the next `iter()` starts a fresh cycle.
    Idle,
    /// Mid-cycle; holds the index of the next iteration.
    Scanning(usize),
}

/// State latched at the last compound head (or order-0 page) seen.
///
/// Tail pages carry no usable flags of their own; the kernel accounts a
/// compound page at its head, so every `COMPOUND_TAIL` pfn is classified
/// by this latch, idle bit included. The latch must survive window
/// refills: a 2MB page regularly straddles them.
#[derive(Clone, Copy, Default)]
struct Head {
    cg: u64,
    lru: bool,
    anon: bool,
    unevictable: bool,
    idle: bool,
}

/// The scan engine.
///
/// Holds the open kernel streams, the byte-per-pfn age table and the
/// per-cgroup counters of the current cycle. Operations are serialized by
/// `&mut self`; the engine has no internal parallelism.
///
/// The idle bitmap is host-global kernel state. The engine assumes it is
/// its sole writer: a second scanner on the same host would clobber the
/// marks and both would report garbage.
pub struct IdleMemScanner {
    end_pfn: u64,
    memcg_root: PathBuf,
    f_flags: WordFile,
    f_cg: WordFile,
    f_idle: WordFile,

    /// `page_age[pfn]`: consecutive cycles the pfn has been observed
    /// idle, saturating at `MAX_AGE - 1`. Lives for the whole process;
    /// cycles only ever update it, never reset it wholesale.
    page_age: Vec<u8>,

    /// cgroup inode -> stats of the current cycle.
    cg_stats: HashMap<u64, IdleMemStat>,

    sampling: u64,
    iter_span: u64,
    state: ScanState,
    completed: bool,
}

impl IdleMemScanner {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let end_pfn = zoneinfo::end_pfn(&config.zoneinfo)?;
        let memcg_root = match &config.memcg_root {
            Some(path) => path.clone(),
            None => memcg::mount_point()?,
        };

        let f_flags = WordFile::open(&config.kpageflags, false)?;
        let f_cg = WordFile::open(&config.kpagecgroup, false)?;
        let f_idle = WordFile::open(&config.idle_bitmap, true)?;

        info!(
            "scanning {} pfns, memcg root '{}'",
            end_pfn,
            memcg_root.display()
        );

        Ok(Self {
            end_pfn,
            memcg_root,
            f_flags,
            f_cg,
            f_idle,
            page_age: vec![0; end_pfn as usize],
            cg_stats: HashMap::new(),
            sampling: 1,
            iter_span: SCAN_CHUNK as u64,
            state: ScanState::Idle,
            completed: false,
        })
    }

    pub fn end_pfn(&self) -> u64 {
        self.end_pfn
    }

    pub fn sampling(&self) -> u64 {
        self.sampling
    }

    /// Age of `pfn`: consecutive completed cycles it has stayed idle.
    /// Meaningful only for pfns a scan has visited.
    pub fn page_age(&self, pfn: u64) -> Option<u8> {
        self.page_age.get(pfn as usize).copied()
    }

    /// Number of `iter()` calls a full cycle takes at the current
    /// sampling.
    pub fn nr_iters(&self) -> usize {
        ((self.end_pfn + self.iter_span - 1) / self.iter_span) as usize
    }

    /// Sets the fraction of memory to scan, `value` in `(0.0, 1.0]`.
    ///
    /// Scanning `1/n` of memory means observing every n-th window of
    /// `BATCH_SIZE` pfns; pages in skipped windows keep their age. Only
    /// valid at a cycle boundary: changing the stride mid-cycle would
    /// leave the windows already scanned inconsistent with the rest.
    pub fn set_sampling(&mut self, value: f64) -> Result<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(Error::Config(
                "sampling must be in range (0.0, 1.0]".to_owned(),
            ));
        }
        if self.state != ScanState::Idle {
            return Err(Error::Config("sampling changed mid-scan".to_owned()));
        }

        /* the inverse ratio fits the window arithmetic better */
        self.sampling = ((1.0 / value) as u64).max(1);
        self.iter_span = SCAN_CHUNK as u64 * self.sampling;
        Ok(())
    }

    /// Runs one scan iteration and re-arms the idle bitmap behind it.
    ///
    /// Returns `(iters_done, iters_left)` for the current cycle; when
    /// `iters_left` reaches 0 the cycle is complete and `result()` reflects
    /// it. The iteration slot is consumed even on error, so a failed chunk
    /// is skipped rather than double-counted on the next call; its pages
    /// simply go unobserved this cycle.
    ///
    /// A page reparented between the idle-bit read and the ownership read
    /// is attributed to the new cgroup; without kernel cooperation this
    /// race is unavoidable, and it is noise-level in practice.
    pub fn iter(&mut self) -> Result<(usize, usize)> {
        let cur_iter = match self.state {
            ScanState::Idle => 0,
            ScanState::Scanning(i) => i,
        };
        if cur_iter == 0 {
            self.cg_stats.clear();
        }

        let start_pfn = cur_iter as u64 * self.iter_span;
        let end_pfn = (start_pfn + self.iter_span).min(self.end_pfn);

        let iters_done = cur_iter + 1;
        let iters_left =
            (((self.end_pfn - end_pfn) + self.iter_span - 1) / self.iter_span) as usize;

        self.state = if iters_left == 0 {
            ScanState::Idle
        } else {
            ScanState::Scanning(iters_done)
        };

        debug!(
            "iter {}/{}: pfns [{}, {}), sampling 1/{}",
            iters_done,
            iters_done + iters_left,
            start_pfn,
            end_pfn,
            self.sampling
        );

        self.count_idle_pages(start_pfn, end_pfn)?;
        write_idle_marks(&mut self.f_idle, start_pfn, end_pfn, self.sampling)?;

        if iters_left == 0 {
            self.completed = true;
        }
        Ok((iters_done, iters_left))
    }

    /// Resolves the per-inode counters against the cgroup directory tree.
    ///
    /// Returns cgroup path -> stats, each entry already including all
    /// descendants. Available once a full cycle has completed; between
    /// iterations of a later cycle it reflects whatever that cycle has
    /// accumulated so far.
    pub fn result(&self) -> Result<HashMap<String, IdleMemStat>> {
        if !self.completed {
            return Err(Error::Config("no completed scan cycle".to_owned()));
        }
        memcg::collect_tree(&self.memcg_root, &self.cg_stats)
    }

    /// Walks `[start_pfn, end_pfn)` window by window, classifying every
    /// pfn and updating the age table and per-cgroup counters.
    fn count_idle_pages(&mut self, start_pfn: u64, end_pfn: u64) -> Result<()> {
        let mut buf_flags = vec![0u64; BATCH_SIZE];
        let mut buf_cg = vec![0u64; BATCH_SIZE];
        let mut buf_idle = vec![0u64; BATCH_SIZE / 64];

        let mut head = Head::default();
        let mut buf_index = BATCH_SIZE;

        /* the idle bitmap is word-granular: start at the enclosing word
         * boundary and swallow the slop below start_pfn uncounted */
        let mut pfn = start_pfn & !63;
        while pfn < end_pfn {
            if buf_index >= BATCH_SIZE {
                let n = ((end_pfn - pfn) as usize).min(BATCH_SIZE);
                self.f_flags.read_words(pfn, &mut buf_flags[..n])?;
                self.f_cg.read_words(pfn, &mut buf_cg[..n])?;
                self.f_idle
                    .read_words(pfn / 64, &mut buf_idle[..(n + 63) / 64])?;
                buf_index = 0;
            }

            if pfn >= start_pfn {
                let flags = KPageFlags::new(buf_flags[buf_index]);

                if !flags.compound_tail() {
                    head = Head {
                        cg: buf_cg[buf_index],
                        lru: flags.lru(),
                        anon: flags.anon(),
                        unevictable: flags.unevictable(),
                        idle: buf_idle[buf_index / 64] >> (buf_index & 63) & 1 != 0,
                    };
                }

                if head.lru && !head.unevictable {
                    let mem_type = if head.anon { MemType::Anon } else { MemType::File };
                    let stat = self.cg_stats.entry(head.cg).or_default();

                    stat.inc_nr_total(mem_type);
                    if head.idle {
                        let age = self.page_age[pfn as usize];
                        if (age as usize) + 1 < MAX_AGE {
                            self.page_age[pfn as usize] = age + 1;
                        }
                        stat.inc_nr_idle(mem_type, age);
                    } else {
                        self.page_age[pfn as usize] = 0;
                    }
                }
            }

            /* a full window advances the cursor past the windows sampling
             * skips; their pfns keep their previous age */
            buf_index += 1;
            if buf_index >= BATCH_SIZE {
                pfn += BATCH_SIZE as u64 * (self.sampling - 1);
            }
            pfn += 1;
        }

        Ok(())
    }
}

/// Marks every page in `[start_pfn, end_pfn)` idle, arming the bitmap for
/// the next cycle.
///
/// The bitmap is only writable in 64-pfn words, so the range is widened to
/// word boundaries and the first and last words masked down to the
/// requested pfns. Under sampling only every `sampling`-th window is
/// touched, the same windows the scan reads.
fn write_idle_marks(
    bitmap: &mut WordFile,
    start_pfn: u64,
    end_pfn: u64,
    sampling: u64,
) -> Result<()> {
    let start_aligned = start_pfn & !63;
    let end_aligned = (end_pfn + 63) & !63;

    let mut buf = vec![!0u64; BATCH_SIZE / 64];

    let mut pfn = start_aligned;
    while pfn < end_pfn {
        let n = ((end_aligned - pfn) as usize).min(BATCH_SIZE);
        let nr_words = n / 64;

        buf[0] = !0;
        buf[nr_words - 1] = !0;
        if pfn < start_pfn {
            buf[0] &= !((1u64 << (start_pfn & 63)) - 1);
        }
        if pfn + n as u64 > end_pfn {
            buf[nr_words - 1] &= (1u64 << (end_pfn & 63)) - 1;
        }

        bitmap.write_words(pfn / 64, &buf[..nr_words])?;
        pfn += BATCH_SIZE as u64 * sampling;
    }

    Ok(())
}
