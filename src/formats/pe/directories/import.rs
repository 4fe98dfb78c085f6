//! Import table parsing

use tracing::{debug, trace};

use crate::config::ParseOptions;
use crate::formats::pe::sections::SectionView;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::{name_to_string, ReadExt};
use crate::formats::pe::PeFile;
use crate::io::ByteSource;

/// Mask for the hint/name RVA carried by a non-ordinal thunk.
const NAME_RVA_MASK: u64 = 0x7FFF_FFFF;

/// Resolve the standard import directory into per-library symbol lists.
///
/// An absent directory, or one that maps to no section, is an empty table.
/// Descriptors are decoded until the first zero lookup-table RVA or until the
/// section runs out; a descriptor whose name cannot be read is skipped.
pub fn parse_imports<S: ByteSource>(
    pe: &PeFile<S>,
    options: &ParseOptions,
) -> Result<Vec<ImportedLibrary>> {
    let width = pe.address_width()?;
    let (directory, view) = match pe.locate(DirectoryEntry::Import) {
        Ok(found) => found,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            debug!(error = %e, "No import table");
            return Ok(Vec::new());
        }
    };

    let mut libraries = Vec::new();
    let mut rva = directory.virtual_address;

    for _ in 0..options.max_libraries {
        let Some(descriptor) = read_import_descriptor(&view, rva) else {
            trace!(rva, "Import descriptors ran past the section");
            break;
        };
        if descriptor.original_first_thunk == 0 {
            break;
        }

        match view.cstring_at(descriptor.name_rva, options.max_name_len) {
            Some(name) => {
                let functions = decode_thunks(
                    &view,
                    descriptor.original_first_thunk,
                    width,
                    0,
                    options,
                );
                merge_library(&mut libraries, name_to_string(name), functions);
            }
            None => debug!(
                descriptor_rva = rva,
                name_rva = descriptor.name_rva,
                "Skipping import descriptor with unreadable name"
            ),
        }

        match rva.checked_add(IMPORT_DESCRIPTOR_SIZE as u32) {
            Some(next) => rva = next,
            None => break,
        }
    }

    debug!(libraries = libraries.len(), "Resolved import table");
    Ok(libraries)
}

/// Read one 20-byte import descriptor at `rva`.
pub fn read_import_descriptor(view: &SectionView<'_>, rva: u32) -> Option<ImportDescriptor> {
    let record = view.bytes_from(rva)?.get(..IMPORT_DESCRIPTOR_SIZE)?;
    Some(ImportDescriptor {
        original_first_thunk: record.read_u32_le_at(0)?,
        time_date_stamp: record.read_u32_le_at(4)?,
        forwarder_chain: record.read_u32_le_at(8)?,
        name_rva: record.read_u32_le_at(12)?,
        first_thunk: record.read_u32_le_at(16)?,
    })
}

/// Walk a thunk array starting at `start`.
///
/// Thunks are `width` sized; a zero thunk ends the list and so does the end of
/// the section. Ordinal thunks keep their low 16 bits. Name thunks point at a
/// `u16` hint followed by a NUL-terminated name; `bias` is subtracted from
/// that pointer first, which converts legacy virtual addresses to RVAs.
/// Thunks whose hint/name cannot be read are skipped.
pub(crate) fn decode_thunks(
    view: &SectionView<'_>,
    start: u32,
    width: AddressWidth,
    bias: u64,
    options: &ParseOptions,
) -> Vec<ImportedFunction> {
    let Some(slots) = view.bytes_from(start) else {
        debug!(rva = start, "Thunk array outside its section");
        return Vec::new();
    };

    let mut functions = Vec::new();
    for slot in slots
        .chunks_exact(width.thunk_size())
        .take(options.max_imports_per_library)
    {
        let value = match width {
            AddressWidth::Bits32 => slot.read_u32_le_at(0).map(u64::from),
            AddressWidth::Bits64 => slot.read_u64_le_at(0),
        };
        let Some(value) = value else { break };
        if value == 0 {
            break;
        }

        if value & width.ordinal_flag() != 0 {
            functions.push(ImportedFunction::ByOrdinal {
                ordinal: (value & 0xFFFF) as u16,
            });
            continue;
        }

        let name_rva = value
            .checked_sub(bias)
            .map(|rva| (rva & NAME_RVA_MASK) as u32);
        match name_rva.and_then(|rva| read_hint_name(view, rva, options.max_name_len)) {
            Some(function) => functions.push(function),
            None => trace!(thunk = value, "Skipping thunk with unreadable hint/name"),
        }
    }
    functions
}

fn read_hint_name(view: &SectionView<'_>, rva: u32, max_name_len: usize) -> Option<ImportedFunction> {
    let hint = view.u16_at(rva)?;
    let name = view.cstring_at(rva.checked_add(2)?, max_name_len)?;
    Some(ImportedFunction::ByName {
        name: name_to_string(name),
        hint,
    })
}

/// Append `functions` under `name`, merging with an earlier library of
/// exactly the same name so first-appearance order is kept.
pub(crate) fn merge_library(
    libraries: &mut Vec<ImportedLibrary>,
    name: String,
    functions: Vec<ImportedFunction>,
) {
    match libraries.iter_mut().find(|lib| lib.name == name) {
        Some(existing) => existing.functions.extend(functions),
        None => libraries.push(ImportedLibrary { name, functions }),
    }
}
