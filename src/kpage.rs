//! Word-granular access to the kernel's per-pfn pseudo-files.
//!
//! `/proc/kpageflags` and `/proc/kpagecgroup` hold one 64-bit word per pfn
//! at byte offset `pfn * 8`; `/sys/kernel/mm/page_idle/bitmap` packs one
//! bit per pfn, 64 per word, LSB first, and is only writable in whole
//! words.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian};

use crate::error::{Error, FileOp, Result};

pub const KPAGEFLAGS_PATH: &str = "/proc/kpageflags";
pub const KPAGECGROUP_PATH: &str = "/proc/kpagecgroup";
pub const IDLE_PAGE_BITMAP_PATH: &str = "/sys/kernel/mm/page_idle/bitmap";

/* Bit numbers from <linux/kernel-page-flags.h> */
pub const KPF_LRU: u32 = 5;
pub const KPF_ANON: u32 = 12;
pub const KPF_COMPOUND_TAIL: u32 = 16;
pub const KPF_UNEVICTABLE: u32 = 18;

/// One `/proc/kpageflags` word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct KPageFlags(u64);

impl KPageFlags {
    pub const fn new(word: u64) -> Self {
        Self(word)
    }

    pub const fn lru(&self) -> bool {
        self.0 & (1 << KPF_LRU) != 0
    }

    pub const fn anon(&self) -> bool {
        self.0 & (1 << KPF_ANON) != 0
    }

    pub const fn compound_tail(&self) -> bool {
        self.0 & (1 << KPF_COMPOUND_TAIL) != 0
    }

    pub const fn unevictable(&self) -> bool {
        self.0 & (1 << KPF_UNEVICTABLE) != 0
    }
}

/// An open kernel pseudo-file addressed in 64-bit words.
///
/// The file is opened once and kept for the lifetime of the owner; reads
/// and writes are exact-length, any short transfer is an error. Batching
/// is the caller's job.
pub struct WordFile {
    file: File,
    path: PathBuf,
    scratch: Vec<u8>,
}

impl WordFile {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| Error::open(path, e))?;

        Ok(Self {
            file,
            path: path.to_owned(),
            scratch: Vec::new(),
        })
    }

    fn io_error(&self, op: FileOp, word_pos: u64, nr_words: usize, source: std::io::Error) -> Error {
        Error::Io {
            path: self.path.clone(),
            op,
            offset: word_pos * 8,
            len: nr_words as u64 * 8,
            source,
        }
    }

    fn seek(&mut self, word_pos: u64, nr_words: usize) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(word_pos * 8))
            .map_err(|e| self.io_error(FileOp::Seek, word_pos, nr_words, e))?;
        Ok(())
    }

    /// Reads `buf.len()` words starting at word offset `word_pos`.
    pub fn read_words(&mut self, word_pos: u64, buf: &mut [u64]) -> Result<()> {
        self.seek(word_pos, buf.len())?;

        self.scratch.resize(buf.len() * 8, 0);
        if let Err(e) = self.file.read_exact(&mut self.scratch) {
            return Err(self.io_error(FileOp::Read, word_pos, buf.len(), e));
        }

        NativeEndian::read_u64_into(&self.scratch, buf);
        Ok(())
    }

    /// Writes `words` starting at word offset `word_pos`.
    pub fn write_words(&mut self, word_pos: u64, words: &[u64]) -> Result<()> {
        self.seek(word_pos, words.len())?;

        self.scratch.resize(words.len() * 8, 0);
        NativeEndian::write_u64_into(words, &mut self.scratch);
        if let Err(e) = self.file.write_all(&self.scratch) {
            return Err(self.io_error(FileOp::Write, word_pos, words.len(), e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn flag_bits() {
        let flags = KPageFlags::new(1 << KPF_LRU | 1 << KPF_ANON);
        assert!(flags.lru());
        assert!(flags.anon());
        assert!(!flags.compound_tail());
        assert!(!flags.unevictable());
    }

    #[test]
    fn word_roundtrip() {
        let f = NamedTempFile::new().unwrap();
        let mut wf = WordFile::open(f.path(), true).unwrap();

        wf.write_words(2, &[0xdead_beef, !0]).unwrap();

        let mut buf = [0u64; 2];
        wf.read_words(2, &mut buf).unwrap();
        assert_eq!(buf, [0xdead_beef, !0]);
    }

    #[test]
    fn short_read_reports_offset() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 8]).unwrap();

        let mut wf = WordFile::open(f.path(), false).unwrap();
        let mut buf = [0u64; 4];
        match wf.read_words(1, &mut buf) {
            Err(Error::Io {
                op: FileOp::Read,
                offset: 8,
                len: 32,
                ..
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn open_missing_fails() {
        assert!(WordFile::open(Path::new("/nonexistent/kpageflags"), false).is_err());
    }
}
