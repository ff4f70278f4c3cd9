//! `/proc/zoneinfo` parsing.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const ZONEINFO_PATH: &str = "/proc/zoneinfo";

/// Upper bound of valid pfns: the maximum of `start_pfn + spanned` over
/// all zones.
pub fn end_pfn(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path).map_err(|e| Error::open(path, e))?;
    parse_end_pfn(&content)
        .ok_or_else(|| Error::Config(format!("failed to parse '{}'", path.display())))
}

fn parse_end_pfn(content: &str) -> Option<u64> {
    let mut spanned = 0u64;
    let mut end_pfn = 0u64;

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("spanned") => {
                spanned = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            Some("start_pfn:") => {
                if let Some(start) = tokens.next().and_then(|v| v.parse::<u64>().ok()) {
                    end_pfn = end_pfn.max(start + spanned);
                }
                spanned = 0;
            }
            _ => {}
        }
    }

    if end_pfn == 0 {
        None
    } else {
        Some(end_pfn)
    }
}
