//! Overlay location for ELF and Mach-O images.
//!
//! An overlay is whatever follows the last byte the container format
//! accounts for: PE sections, ELF sections and header tables, Mach-O
//! segments. Self-extracting archives and installers keep their payload
//! there. PE images are handled by [`crate::formats::pe::PeFile::overlay`].

use object::read::elf::{ElfFile, FileHeader};
use object::read::macho::{MachHeader, MachOFile};
use object::{FileKind, Object, ObjectSection, ObjectSegment};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::formats::pe::PeFile;

/// `[offset, offset + size)` of trailing data in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySpan {
    pub offset: u64,
    pub size: u64,
}

impl OverlaySpan {
    /// Span from `image_end` to `file_size`, or `None` when it would be empty.
    pub fn after(image_end: u64, file_size: u64) -> Option<Self> {
        (file_size > image_end).then(|| Self {
            offset: image_end,
            size: file_size - image_end,
        })
    }

    /// The overlay bytes inside `data`, when `data` is the whole file.
    pub fn slice<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let start = usize::try_from(self.offset).ok()?;
        let end = usize::try_from(self.offset.checked_add(self.size)?).ok()?;
        data.get(start..end)
    }
}

/// Detect the container format of `data` and locate its overlay.
pub fn detect_overlay(data: &[u8]) -> Option<OverlaySpan> {
    match FileKind::parse(data).ok()? {
        FileKind::Pe32 | FileKind::Pe64 => PeFile::from_bytes(data.to_vec())
            .ok()?
            .overlay_span()
            .ok(),
        FileKind::Elf32 | FileKind::Elf64 => elf_overlay(data),
        FileKind::MachO32 | FileKind::MachO64 => macho_overlay(data),
        kind => {
            debug!(?kind, "No overlay support for format");
            None
        }
    }
}

/// Overlay of an ELF file: bytes past every section, the ELF header and both
/// header tables.
pub fn elf_overlay(data: &[u8]) -> Option<OverlaySpan> {
    let end = match FileKind::parse(data).ok()? {
        FileKind::Elf64 => elf_image_end::<object::elf::FileHeader64<object::Endianness>>(data)?,
        FileKind::Elf32 => elf_image_end::<object::elf::FileHeader32<object::Endianness>>(data)?,
        _ => return None,
    };
    OverlaySpan::after(end, data.len() as u64)
}

fn elf_image_end<Elf: FileHeader<Endian = object::Endianness>>(data: &[u8]) -> Option<u64> {
    let elf = ElfFile::<Elf>::parse(data).ok()?;
    let endian = elf.endian();
    let header = elf.elf_header();

    let sections_end = elf
        .sections()
        .filter_map(|section| section.file_range())
        .map(|(offset, size)| offset.saturating_add(size))
        .max()
        .unwrap_or(0);

    let section_count = elf.sections().count() as u64;
    let shoff: u64 = header.e_shoff(endian).into();
    let section_table_end = if shoff == 0 {
        0
    } else {
        shoff.saturating_add(section_count * header.e_shentsize(endian) as u64)
    };

    let phoff: u64 = header.e_phoff(endian).into();
    let program_table_end =
        phoff.saturating_add(header.e_phnum(endian) as u64 * header.e_phentsize(endian) as u64);

    let header_end = header.e_ehsize(endian) as u64;

    Some(
        sections_end
            .max(section_table_end)
            .max(program_table_end)
            .max(header_end),
    )
}

/// Overlay of a Mach-O file: bytes past the last segment's file range.
pub fn macho_overlay(data: &[u8]) -> Option<OverlaySpan> {
    let end = match FileKind::parse(data).ok()? {
        FileKind::MachO64 => {
            macho_image_end::<object::macho::MachHeader64<object::Endianness>>(data)?
        }
        FileKind::MachO32 => {
            macho_image_end::<object::macho::MachHeader32<object::Endianness>>(data)?
        }
        _ => return None,
    };
    OverlaySpan::after(end, data.len() as u64)
}

fn macho_image_end<Mach: MachHeader<Endian = object::Endianness>>(data: &[u8]) -> Option<u64> {
    let macho = MachOFile::<Mach>::parse(data).ok()?;
    Some(
        macho
            .segments()
            .map(|segment| {
                let (offset, size) = segment.file_range();
                offset.saturating_add(size)
            })
            .max()
            .unwrap_or(0),
    )
}
