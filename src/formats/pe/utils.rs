//! Utility functions for PE parsing

use crate::formats::pe::types::{PeError, Result};

/// Extension trait for reading primitive types from byte slices
pub trait ReadExt {
    fn read_u8_at(&self, offset: usize) -> Option<u8>;
    fn read_u16_le_at(&self, offset: usize) -> Option<u16>;
    fn read_u32_le_at(&self, offset: usize) -> Option<u32>;
    fn read_u64_le_at(&self, offset: usize) -> Option<u64>;
    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&[u8]>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u8_at(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline(always)]
    fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        self.get(offset..offset.checked_add(2)?)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_u32_le_at(&self, offset: usize) -> Option<u32> {
        self.get(offset..offset.checked_add(4)?)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_u64_le_at(&self, offset: usize) -> Option<u64> {
        self.get(offset..offset.checked_add(8)?)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }

    /// Bytes of a NUL-terminated string starting at `offset`.
    ///
    /// The terminator must appear within `max_len` bytes and before the end
    /// of the slice; otherwise the string is considered unreadable.
    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&[u8]> {
        let rest = self.get(offset..)?;
        let window = &rest[..rest.len().min(max_len.saturating_add(1))];
        let len = memchr::memchr(0, window)?;
        Some(&window[..len])
    }
}

/// Header field readers that turn a short buffer into `TruncatedHeader`.
pub(crate) fn header_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.read_u16_le_at(offset).ok_or(PeError::TruncatedHeader {
        expected: offset + 2,
        actual: data.len(),
    })
}

pub(crate) fn header_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.read_u32_le_at(offset).ok_or(PeError::TruncatedHeader {
        expected: offset + 4,
        actual: data.len(),
    })
}

pub(crate) fn header_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.read_u64_le_at(offset).ok_or(PeError::TruncatedHeader {
        expected: offset + 8,
        actual: data.len(),
    })
}

pub(crate) fn header_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.read_u8_at(offset).ok_or(PeError::TruncatedHeader {
        expected: offset + 1,
        actual: data.len(),
    })
}

/// Decode a symbol or library name. Non-UTF-8 bytes are replaced rather than
/// rejected so that one odd name does not hide the entry.
pub fn name_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
