//! Chunk ranges and contiguity

use std::str::FromStr;

use crate::error::{RegistryError, RegistryResult};

/// Inclusive byte range a client claims for a chunk, from `Content-Range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset, inclusive.
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes the range covers.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl FromStr for ChunkRange {
    type Err = RegistryError;

    /// Accepts `<start>-<end>`, optionally prefixed by `bytes=` or `bytes `
    /// and optionally followed by `/<total>` or `/*`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::BlobUploadInvalid(format!("malformed Content-Range {s:?}"));

        let value = s.trim();
        let value = value
            .strip_prefix("bytes=")
            .or_else(|| value.strip_prefix("bytes "))
            .unwrap_or(value);
        let value = match value.split_once('/') {
            Some((range, total)) => {
                if total != "*" && total.parse::<u64>().is_err() {
                    return Err(invalid());
                }
                range
            }
            None => value,
        };

        let (start, end) = value.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.trim().parse().map_err(|_| invalid())?;
        let end: u64 = end.trim().parse().map_err(|_| invalid())?;
        if end < start || end == u64::MAX {
            return Err(invalid());
        }

        Ok(ChunkRange { start, end })
    }
}

/// Check a chunk against the session offset before anything is written.
///
/// Without a range the chunk is placed at `offset`. With one, it must start
/// exactly at `offset` and cover exactly `len` bytes.
pub(crate) fn check_contiguous(
    offset: u64,
    range: Option<ChunkRange>,
    len: u64,
) -> RegistryResult<()> {
    let Some(range) = range else {
        return offset.checked_add(len).map(|_| ()).ok_or_else(|| {
            RegistryError::RangeNotSatisfiable {
                offset,
                reason: "upload too large".into(),
            }
        });
    };

    if range.start != offset {
        return Err(RegistryError::RangeNotSatisfiable {
            offset,
            reason: format!("chunk starts at {}, expected {offset}", range.start),
        });
    }
    if range.byte_count() != len {
        return Err(RegistryError::RangeNotSatisfiable {
            offset,
            reason: format!(
                "range {}-{} covers {} bytes, body has {len}",
                range.start,
                range.end,
                range.byte_count()
            ),
        });
    }
    Ok(())
}

/// Render the `Range` header for a session that has accepted `offset` bytes.
pub(crate) fn range_header(offset: u64) -> String {
    format!("0-{}", offset.saturating_sub(1))
}
