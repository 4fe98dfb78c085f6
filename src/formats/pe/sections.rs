//! Section management for PE files

use std::cell::OnceCell;

use bytes::Bytes;

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

/// A section header plus its lazily loaded raw bytes.
///
/// The byte cache is a `OnceCell`: filled on first access, read many times
/// afterwards, and not shareable across threads.
#[derive(Debug, Clone)]
pub struct Section {
    pub header: SectionHeader,
    cache: OnceCell<Bytes>,
}

impl Section {
    pub fn new(header: SectionHeader) -> Self {
        Self {
            header,
            cache: OnceCell::new(),
        }
    }

    pub fn name(&self) -> String {
        self.header.name()
    }

    pub fn virtual_address(&self) -> u32 {
        self.header.virtual_address
    }

    pub fn virtual_size(&self) -> u32 {
        self.header.virtual_size
    }

    pub fn file_offset(&self) -> u32 {
        self.header.pointer_to_raw_data
    }

    pub fn file_size(&self) -> u32 {
        self.header.size_of_raw_data
    }

    /// Cached bytes, if they have been loaded.
    pub fn cached(&self) -> Option<&Bytes> {
        self.cache.get()
    }

    /// Store freshly read bytes; a concurrent first fill is impossible since
    /// the cell is `!Sync`, so the first stored value always wins.
    pub(crate) fn fill(&self, data: Bytes) -> &Bytes {
        self.cache.get_or_init(|| data)
    }

    /// Drop cached bytes, releasing the buffer.
    pub fn release(&mut self) {
        self.cache.take();
    }
}

/// Section table in file order.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn new(headers: Vec<SectionHeader>) -> Self {
        Self {
            sections: headers.into_iter().map(Section::new).collect(),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.name() == name)
    }

    /// First section whose virtual range contains `rva`.
    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.contains_rva(rva))
    }

    /// `max(pointer_to_raw_data + size_of_raw_data)` over all sections.
    pub fn last_file_end(&self) -> u64 {
        self.sections
            .iter()
            .map(|s| s.header.file_end())
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn release_all(&mut self) {
        for section in &mut self.sections {
            section.release();
        }
    }
}

/// Borrowed view of one section's bytes addressed by RVA.
///
/// Every accessor checks both the section's virtual range and the length of
/// the bytes actually present, so a lookup either lands inside the buffer or
/// yields `None`.
#[derive(Debug, Clone, Copy)]
pub struct SectionView<'a> {
    pub header: &'a SectionHeader,
    pub data: &'a [u8],
}

impl<'a> SectionView<'a> {
    pub fn new(header: &'a SectionHeader, data: &'a [u8]) -> Self {
        Self { header, data }
    }

    pub fn contains(&self, rva: u32) -> bool {
        self.header.contains_rva(rva)
    }

    /// Offset into `data` for an RVA inside this section.
    pub fn offset_of(&self, rva: u32) -> Option<usize> {
        if !self.contains(rva) {
            return None;
        }
        Some((rva - self.header.virtual_address) as usize)
    }

    /// Bytes from `rva` to the end of the section's file data.
    pub fn bytes_from(&self, rva: u32) -> Option<&'a [u8]> {
        let data = self.data;
        data.get(self.offset_of(rva)?..)
    }

    pub fn u16_at(&self, rva: u32) -> Option<u16> {
        self.data.read_u16_le_at(self.offset_of(rva)?)
    }

    pub fn u32_at(&self, rva: u32) -> Option<u32> {
        self.data.read_u32_le_at(self.offset_of(rva)?)
    }

    /// NUL-terminated string at `rva`, bounded by `max_len` and the section.
    pub fn cstring_at(&self, rva: u32, max_len: usize) -> Option<&'a [u8]> {
        let data = self.data;
        data.read_cstring_at(self.offset_of(rva)?, max_len)
    }
}
