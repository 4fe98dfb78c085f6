//! Delay-load import table parsing

use tracing::{debug, trace};

use crate::config::ParseOptions;
use crate::formats::pe::directories::import::{decode_thunks, merge_library};
use crate::formats::pe::sections::SectionView;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::{name_to_string, ReadExt};
use crate::formats::pe::PeFile;
use crate::io::ByteSource;

/// Resolve the delay-load import directory.
///
/// Same output shape as [`super::import::parse_imports`]. Descriptors are 32
/// bytes and the array ends at the first zero import-address-table RVA. Old
/// 32-bit linkers wrote virtual addresses instead of RVAs (attribute bit 0
/// clear); those are rebased against the image base before use.
pub fn parse_delay_imports<S: ByteSource>(
    pe: &PeFile<S>,
    options: &ParseOptions,
) -> Result<Vec<ImportedLibrary>> {
    let width = pe.address_width()?;
    let image_base = pe.image_base().unwrap_or(0);
    let (directory, view) = match pe.locate(DirectoryEntry::DelayImport) {
        Ok(found) => found,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            debug!(error = %e, "No delay import table");
            return Ok(Vec::new());
        }
    };

    let mut libraries = Vec::new();
    let mut rva = directory.virtual_address;

    for _ in 0..options.max_libraries {
        let Some(descriptor) = read_delay_import_descriptor(&view, rva) else {
            trace!(rva, "Delay import descriptors ran past the section");
            break;
        };
        if descriptor.import_address_table_rva == 0 {
            break;
        }

        let bias = if descriptor.uses_virtual_addresses() && width == AddressWidth::Bits32 {
            image_base
        } else {
            0
        };

        let name = rebase(descriptor.dll_name_rva, bias)
            .and_then(|name_rva| view.cstring_at(name_rva, options.max_name_len));
        match name {
            Some(name) => {
                // The INT RVA is checked against this section before slicing.
                let functions = match rebase(descriptor.import_name_table_rva, bias)
                    .filter(|&int_rva| view.contains(int_rva))
                {
                    Some(int_rva) => decode_thunks(&view, int_rva, width, bias, options),
                    None => {
                        debug!(
                            int_rva = descriptor.import_name_table_rva,
                            "Delay import name table outside its section"
                        );
                        Vec::new()
                    }
                };
                merge_library(&mut libraries, name_to_string(name), functions);
            }
            None => debug!(
                descriptor_rva = rva,
                name_rva = descriptor.dll_name_rva,
                "Skipping delay import descriptor with unreadable name"
            ),
        }

        match rva.checked_add(DELAY_IMPORT_DESCRIPTOR_SIZE as u32) {
            Some(next) => rva = next,
            None => break,
        }
    }

    debug!(libraries = libraries.len(), "Resolved delay import table");
    Ok(libraries)
}

/// Read one 32-byte delay-load descriptor at `rva`.
pub fn read_delay_import_descriptor(
    view: &SectionView<'_>,
    rva: u32,
) -> Option<DelayImportDescriptor> {
    let record = view
        .bytes_from(rva)?
        .get(..DELAY_IMPORT_DESCRIPTOR_SIZE)?;
    Some(DelayImportDescriptor {
        attributes: record.read_u32_le_at(0)?,
        dll_name_rva: record.read_u32_le_at(4)?,
        module_handle_rva: record.read_u32_le_at(8)?,
        import_address_table_rva: record.read_u32_le_at(12)?,
        import_name_table_rva: record.read_u32_le_at(16)?,
        bound_import_address_table_rva: record.read_u32_le_at(20)?,
        unload_information_table_rva: record.read_u32_le_at(24)?,
        time_date_stamp: record.read_u32_le_at(28)?,
    })
}

fn rebase(address: u32, bias: u64) -> Option<u32> {
    u32::try_from((address as u64).checked_sub(bias)?).ok()
}
