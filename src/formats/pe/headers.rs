//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::{header_u16, header_u32, header_u64, header_u8};

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(PeError::TruncatedHeader {
            expected: DOS_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let e_magic = header_u16(data, 0)?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    Ok(DosHeader {
        e_magic,
        e_lfanew: header_u32(data, 60)?,
    })
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    if offset + COFF_HEADER_SIZE > data.len() {
        return Err(PeError::TruncatedHeader {
            expected: offset + COFF_HEADER_SIZE,
            actual: data.len(),
        });
    }

    Ok(CoffHeader {
        machine: Machine::from(header_u16(data, offset)?),
        number_of_sections: header_u16(data, offset + 2)?,
        time_date_stamp: header_u32(data, offset + 4)?,
        pointer_to_symbol_table: header_u32(data, offset + 8)?,
        number_of_symbols: header_u32(data, offset + 12)?,
        size_of_optional_header: header_u16(data, offset + 16)?,
        characteristics: header_u16(data, offset + 18)?,
    })
}

/// Parse the optional header at `offset`.
///
/// Returns `Ok(None)` when the COFF header declares no optional header, as in
/// object files; the container then refuses every directory lookup.
pub fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> Result<Option<OptionalHeader>> {
    if size == 0 {
        return Ok(None);
    }
    if size < 2 || offset + size as usize > data.len() {
        return Err(PeError::TruncatedHeader {
            expected: offset + (size as usize).max(2),
            actual: data.len(),
        });
    }

    let magic = header_u16(data, offset)?;
    let header = match magic {
        PE32_MAGIC => parse_optional_header32(data, offset, size)?,
        PE32PLUS_MAGIC => parse_optional_header64(data, offset, size)?,
        _ => return Err(PeError::InvalidMagic(magic)),
    };
    Ok(Some(header))
}

// Both layouts agree on these offsets; NumberOfRvaAndSizes is always the
// last field of the fixed part, whose length is `fixed`.
fn parse_common(data: &[u8], offset: usize, fixed: usize) -> Result<OptionalHeaderCommon> {
    Ok(OptionalHeaderCommon {
        magic: header_u16(data, offset)?,
        major_linker_version: header_u8(data, offset + 2)?,
        minor_linker_version: header_u8(data, offset + 3)?,
        size_of_code: header_u32(data, offset + 4)?,
        address_of_entry_point: header_u32(data, offset + 16)?,
        base_of_code: header_u32(data, offset + 20)?,
        section_alignment: header_u32(data, offset + 32)?,
        file_alignment: header_u32(data, offset + 36)?,
        size_of_image: header_u32(data, offset + 56)?,
        size_of_headers: header_u32(data, offset + 60)?,
        checksum: header_u32(data, offset + 64)?,
        subsystem: header_u16(data, offset + 68)?,
        dll_characteristics: header_u16(data, offset + 70)?,
        number_of_rva_and_sizes: header_u32(data, offset + fixed - 4)?,
    })
}

fn parse_optional_header32(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    if (size as usize) < OPTIONAL_HEADER32_FIXED_SIZE {
        return Err(PeError::TruncatedHeader {
            expected: offset + OPTIONAL_HEADER32_FIXED_SIZE,
            actual: offset + size as usize,
        });
    }

    Ok(OptionalHeader::Pe32(OptionalHeader32 {
        common: parse_common(data, offset, OPTIONAL_HEADER32_FIXED_SIZE)?,
        base_of_data: header_u32(data, offset + 24)?,
        image_base: header_u32(data, offset + 28)?,
    }))
}

fn parse_optional_header64(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    if (size as usize) < OPTIONAL_HEADER64_FIXED_SIZE {
        return Err(PeError::TruncatedHeader {
            expected: offset + OPTIONAL_HEADER64_FIXED_SIZE,
            actual: offset + size as usize,
        });
    }

    Ok(OptionalHeader::Pe32Plus(OptionalHeader64 {
        common: parse_common(data, offset, OPTIONAL_HEADER64_FIXED_SIZE)?,
        image_base: header_u64(data, offset + 24)?,
    }))
}

/// Parse the data directory array that follows the fixed optional header.
///
/// Only entries that are both declared and physically inside the optional
/// header are returned, so the result may be shorter than the declared count.
pub fn parse_data_directories(
    data: &[u8],
    optional_offset: usize,
    optional_size: u16,
    header: &OptionalHeader,
) -> Vec<DataDirectory> {
    let start = optional_offset + header.fixed_size();
    let room = (optional_size as usize).saturating_sub(header.fixed_size()) / DATA_DIRECTORY_SIZE;
    let count = (header.number_of_rva_and_sizes() as usize)
        .min(MAX_DATA_DIRECTORIES)
        .min(room);

    (0..count)
        .map_while(|i| {
            let off = start + i * DATA_DIRECTORY_SIZE;
            Some(DataDirectory {
                virtual_address: header_u32(data, off).ok()?,
                size: header_u32(data, off + 4).ok()?,
            })
        })
        .collect()
}

/// Parse section headers from data
pub fn parse_section_headers(data: &[u8], offset: usize, count: u16) -> Result<Vec<SectionHeader>> {
    let mut sections = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let section_offset = offset + i * SECTION_HEADER_SIZE;
        if section_offset + SECTION_HEADER_SIZE > data.len() {
            return Err(PeError::TruncatedHeader {
                expected: section_offset + SECTION_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut name = [0u8; 8];
        name.copy_from_slice(&data[section_offset..section_offset + 8]);

        sections.push(SectionHeader {
            name,
            virtual_size: header_u32(data, section_offset + 8)?,
            virtual_address: header_u32(data, section_offset + 12)?,
            size_of_raw_data: header_u32(data, section_offset + 16)?,
            pointer_to_raw_data: header_u32(data, section_offset + 20)?,
            characteristics: header_u32(data, section_offset + 36)?,
        });
    }

    Ok(sections)
}
