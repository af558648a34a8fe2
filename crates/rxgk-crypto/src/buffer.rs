//! Segmented network buffers
//!
//! A packet arrives as a chain of discontiguous fragments. Crypto operations
//! address a byte range of the whole chain; the range is mapped onto at most
//! [`MAX_FRAGMENTS`] fragments, gathered into a scratch copy, transformed, and
//! scattered back.

use std::ops::Range;

use bytes::BytesMut;
use zeroize::Zeroizing;

use crate::error::Krb5Error;

/// Most fragments a single operation may touch.
pub const MAX_FRAGMENTS: usize = 16;

/// A packet held as a list of fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentedBuffer {
    fragments: Vec<BytesMut>,
}

impl SegmentedBuffer {
    /// Empty buffer with no fragments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding `bytes` as one fragment.
    pub fn contiguous(bytes: &[u8]) -> Self {
        Self { fragments: vec![BytesMut::from(bytes)] }
    }

    /// Split `bytes` into fragments of `fragment_len` bytes (the last may be
    /// shorter).
    pub fn chunked(bytes: &[u8], fragment_len: usize) -> Self {
        let fragment_len = fragment_len.max(1);
        Self { fragments: bytes.chunks(fragment_len).map(BytesMut::from).collect() }
    }

    /// Append a fragment.
    pub fn push_fragment(&mut self, fragment: BytesMut) {
        self.fragments.push(fragment);
    }

    /// Number of fragments, including empty ones.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Total length across all fragments.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(BytesMut::len).sum()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the whole buffer into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    /// Map `range` onto `(fragment index, range within fragment)` pieces.
    ///
    /// Fails if the range runs off the end or touches more than
    /// [`MAX_FRAGMENTS`] non-empty fragments.
    pub fn map_range(&self, range: Range<usize>) -> Result<Vec<(usize, Range<usize>)>, Krb5Error> {
        let buffer_len = self.len();
        if range.start > range.end || range.end > buffer_len {
            return Err(Krb5Error::OutOfBounds {
                offset: range.start,
                len: range.end.saturating_sub(range.start),
                buffer_len,
            });
        }

        let mut pieces = Vec::new();
        let mut fragment_start = 0;
        for (index, fragment) in self.fragments.iter().enumerate() {
            let fragment_end = fragment_start + fragment.len();
            let start = range.start.max(fragment_start);
            let end = range.end.min(fragment_end);
            if start < end {
                pieces.push((index, start - fragment_start..end - fragment_start));
            }
            fragment_start = fragment_end;
            if fragment_start >= range.end {
                break;
            }
        }

        if pieces.len() > MAX_FRAGMENTS {
            return Err(Krb5Error::TooManyFragments { count: pieces.len(), max: MAX_FRAGMENTS });
        }
        Ok(pieces)
    }

    /// The range `offset..offset + len`, failing instead of wrapping when the
    /// end does not fit in a `usize`.
    pub fn span(&self, offset: usize, len: usize) -> Result<Range<usize>, Krb5Error> {
        let end = offset.checked_add(len).ok_or(Krb5Error::OutOfBounds {
            offset,
            len,
            buffer_len: self.len(),
        })?;
        Ok(offset..end)
    }

    /// Copy `range` out into a contiguous scratch buffer that is wiped on
    /// drop.
    pub fn gather(&self, range: Range<usize>) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
        let pieces = self.map_range(range.clone())?;
        let mut out = Zeroizing::new(Vec::with_capacity(range.len()));
        for (index, within) in pieces {
            out.extend_from_slice(&self.fragments[index][within]);
        }
        Ok(out)
    }

    /// Write `bytes` into the buffer starting at `offset`.
    pub fn scatter(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Krb5Error> {
        let pieces = self.map_range(self.span(offset, bytes.len())?)?;
        let mut consumed = 0;
        for (index, within) in pieces {
            let n = within.len();
            self.fragments[index][within].copy_from_slice(&bytes[consumed..consumed + n]);
            consumed += n;
        }
        Ok(())
    }
}
