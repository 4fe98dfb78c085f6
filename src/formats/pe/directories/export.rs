//! Export table parsing

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ParseOptions;
use crate::formats::pe::sections::SectionView;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::{name_to_string, ReadExt};
use crate::formats::pe::PeFile;
use crate::io::ByteSource;

/// Export table of one module, ordinal ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTable {
    /// Name the module gives itself in its export directory.
    pub module_name: Option<String>,
    pub ordinal_base: u32,
    pub symbols: Vec<ExportedSymbol>,
}

impl ExportTable {
    /// Get export by name
    pub fn get_by_name(&self, name: &str) -> Option<&ExportedSymbol> {
        self.symbols
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }

    /// Get export by ordinal
    pub fn get_by_ordinal(&self, ordinal: u32) -> Option<&ExportedSymbol> {
        self.symbols.iter().find(|s| s.ordinal == ordinal)
    }

    /// Names of the named exports, in ordinal order
    pub fn names(&self) -> Vec<&str> {
        self.symbols.iter().filter_map(|s| s.name.as_deref()).collect()
    }

    pub fn count(&self) -> usize {
        self.symbols.len()
    }

    pub fn named_count(&self) -> usize {
        self.symbols.iter().filter(|s| s.name.is_some()).count()
    }

    pub fn forwarders(&self) -> impl Iterator<Item = &ExportedSymbol> {
        self.symbols.iter().filter(|s| s.is_forwarder())
    }
}

/// Resolve the export directory.
///
/// An absent directory, or one that maps to no section, is an empty table. A
/// directory header that does not fit in its section fails with
/// `BoundsViolation`. Otherwise one symbol is produced per readable slot of
/// the address table; names and hints come from the name table.
pub fn parse_exports<S: ByteSource>(pe: &PeFile<S>, options: &ParseOptions) -> Result<ExportTable> {
    let (directory, view) = match pe.locate(DirectoryEntry::Export) {
        Ok(found) => found,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            debug!(error = %e, "No export table");
            return Ok(ExportTable::default());
        }
    };

    let header = read_export_directory(&view, directory.virtual_address).ok_or(
        PeError::BoundsViolation {
            directory: DirectoryEntry::Export,
            rva: directory.virtual_address,
        },
    )?;

    let module_name = match header.name_rva {
        0 => None,
        rva => view
            .cstring_at(rva, options.max_name_len)
            .map(name_to_string),
    };

    let mut table = ExportTable {
        module_name,
        ordinal_base: header.ordinal_base,
        symbols: Vec::new(),
    };
    if header.number_of_functions == 0 {
        return Ok(table);
    }

    let mut slots = resolve_addresses(&view, &directory, &header, options);
    if header.number_of_names > 0 {
        attach_names(&view, &header, &mut slots, options);
    }

    table.symbols = slots.into_iter().flatten().collect();
    debug!(
        module = ?table.module_name,
        exports = table.count(),
        named = table.named_count(),
        "Resolved export table"
    );
    Ok(table)
}

/// Read the 40-byte export directory header at `rva`.
pub fn read_export_directory(view: &SectionView<'_>, rva: u32) -> Option<ExportDirectory> {
    let record = view.bytes_from(rva)?.get(..EXPORT_DIRECTORY_SIZE)?;
    Some(ExportDirectory {
        characteristics: record.read_u32_le_at(0)?,
        time_date_stamp: record.read_u32_le_at(4)?,
        major_version: record.read_u16_le_at(8)?,
        minor_version: record.read_u16_le_at(10)?,
        name_rva: record.read_u32_le_at(12)?,
        ordinal_base: record.read_u32_le_at(16)?,
        number_of_functions: record.read_u32_le_at(20)?,
        number_of_names: record.read_u32_le_at(24)?,
        address_of_functions: record.read_u32_le_at(28)?,
        address_of_names: record.read_u32_le_at(32)?,
        address_of_name_ordinals: record.read_u32_le_at(36)?,
    })
}

// First pass: one slot per address-table entry, ordinal = index + base. An
// address inside the directory's own range is a forwarder string.
fn resolve_addresses(
    view: &SectionView<'_>,
    directory: &DataDirectory,
    header: &ExportDirectory,
    options: &ParseOptions,
) -> Vec<Option<ExportedSymbol>> {
    let Some(table) = view.bytes_from(header.address_of_functions) else {
        debug!(
            rva = header.address_of_functions,
            "Export address table outside its section"
        );
        return Vec::new();
    };

    let count = (header.number_of_functions as usize)
        .min(options.max_exports)
        .min(table.len() / 4);

    table
        .chunks_exact(4)
        .take(count)
        .enumerate()
        .map(|(index, entry)| {
            let address = entry.read_u32_le_at(0)?;
            let ordinal = header.ordinal_base.checked_add(index as u32)?;
            let target = if directory.contains(address) {
                match view.cstring_at(address, options.max_name_len) {
                    Some(forward) => ExportTarget::Forward(name_to_string(forward)),
                    None => {
                        trace!(ordinal, address, "Dropping unreadable forwarder");
                        return None;
                    }
                }
            } else {
                ExportTarget::Address(address)
            };
            Some(ExportedSymbol {
                ordinal,
                target,
                name: None,
                hint: None,
            })
        })
        .collect()
}

// Second pass: the name table and name-ordinal table run in parallel; entry
// `i` names slot `ordinals[i]` and gives it hint `i`.
fn attach_names(
    view: &SectionView<'_>,
    header: &ExportDirectory,
    slots: &mut [Option<ExportedSymbol>],
    options: &ParseOptions,
) {
    let (Some(names), Some(ordinals)) = (
        view.bytes_from(header.address_of_names),
        view.bytes_from(header.address_of_name_ordinals),
    ) else {
        debug!("Export name tables outside their section");
        return;
    };

    let count = (header.number_of_names as usize).min(options.max_exports);
    for (hint, (name_entry, ordinal_entry)) in names
        .chunks_exact(4)
        .zip(ordinals.chunks_exact(2))
        .take(count)
        .enumerate()
    {
        let (Some(name_rva), Some(index)) =
            (name_entry.read_u32_le_at(0), ordinal_entry.read_u16_le_at(0))
        else {
            break;
        };

        if index as u32 >= header.number_of_functions {
            trace!(hint, index, "Dropping name with out-of-range ordinal index");
            continue;
        }
        let Some(symbol) = slots.get_mut(index as usize).and_then(Option::as_mut) else {
            continue;
        };
        match view.cstring_at(name_rva, options.max_name_len) {
            Some(name) => {
                symbol.name = Some(name_to_string(name));
                symbol.hint = Some(hint as u32);
            }
            None => trace!(hint, name_rva, "Skipping unreadable export name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(ordinal: u32, rva: u32, name: Option<&str>) -> ExportedSymbol {
        ExportedSymbol {
            ordinal,
            target: ExportTarget::Address(rva),
            name: name.map(String::from),
            hint: None,
        }
    }

    #[test]
    fn test_export_table_queries() {
        let table = ExportTable {
            module_name: Some("sample.dll".into()),
            ordinal_base: 1,
            symbols: vec![
                symbol(1, 0x1000, Some("Function1")),
                symbol(2, 0x2000, Some("Function2")),
                symbol(3, 0x3000, None),
            ],
        };

        // Test by-name lookup
        let export = table.get_by_name("Function1").unwrap();
        assert_eq!(export.ordinal, 1);
        assert_eq!(export.address(), Some(0x1000));

        // Test by-ordinal lookup
        let export = table.get_by_ordinal(3).unwrap();
        assert!(export.name.is_none());
        assert_eq!(export.address(), Some(0x3000));

        // Test counts
        assert_eq!(table.count(), 3);
        assert_eq!(table.named_count(), 2);
        assert_eq!(table.names(), vec!["Function1", "Function2"]);
        assert_eq!(table.forwarders().count(), 0);
    }

    fn export_section() -> (SectionHeader, Vec<u8>) {
        let header = SectionHeader {
            name: *b".edata\0\0",
            virtual_size: 0x200,
            virtual_address: 0x4000,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: 0x800,
            characteristics: IMAGE_SCN_MEM_READ,
        };
        let mut data = vec![0u8; 0x200];
        let put = |data: &mut Vec<u8>, off: usize, v: u32| {
            data[off..off + 4].copy_from_slice(&v.to_le_bytes())
        };
        // Directory at 0x4000, size 0x100: base 10, 3 functions, 2 names.
        put(&mut data, 16, 10);
        put(&mut data, 20, 3);
        put(&mut data, 24, 2);
        put(&mut data, 28, 0x4040);
        put(&mut data, 32, 0x4060);
        put(&mut data, 36, 0x4070);
        // Address table: code, forwarder, code.
        put(&mut data, 0x40, 0x1000);
        put(&mut data, 0x44, 0x4080);
        put(&mut data, 0x48, 0x1010);
        // Name table and name ordinals: "Beta" -> index 2, "Zeta" -> index 7.
        put(&mut data, 0x60, 0x40A0);
        put(&mut data, 0x64, 0x40B0);
        data[0x70..0x72].copy_from_slice(&2u16.to_le_bytes());
        data[0x72..0x74].copy_from_slice(&7u16.to_le_bytes());
        data[0x80..0x8D].copy_from_slice(b"NTDLL.RtlFoo\0");
        data[0xA0..0xA5].copy_from_slice(b"Beta\0");
        data[0xB0..0xB5].copy_from_slice(b"Zeta\0");
        (header, data)
    }

    #[test]
    fn test_resolve_and_name_passes() {
        let (header, data) = export_section();
        let view = SectionView::new(&header, &data);
        let directory = DataDirectory {
            virtual_address: 0x4000,
            size: 0x100,
        };
        let export_dir = read_export_directory(&view, 0x4000).unwrap();
        let options = ParseOptions::default();

        let mut slots = resolve_addresses(&view, &directory, &export_dir, &options);
        attach_names(&view, &export_dir, &mut slots, &options);
        let symbols: Vec<_> = slots.into_iter().flatten().collect();

        assert_eq!(symbols.len(), 3);
        assert_eq!(
            symbols.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
            vec![10, 11, 12]
        );
        assert_eq!(symbols[0].address(), Some(0x1000));
        assert_eq!(symbols[0].name, None);
        assert_eq!(symbols[1].forward_name(), Some("NTDLL.RtlFoo"));
        assert_eq!(symbols[2].name.as_deref(), Some("Beta"));
        assert_eq!(symbols[2].hint, Some(0));
    }

    #[test]
    fn test_export_caps() {
        let (header, data) = export_section();
        let view = SectionView::new(&header, &data);
        let directory = DataDirectory {
            virtual_address: 0x4000,
            size: 0x100,
        };
        let export_dir = read_export_directory(&view, 0x4000).unwrap();
        let options = ParseOptions {
            max_exports: 2,
            ..ParseOptions::default()
        };

        let slots = resolve_addresses(&view, &directory, &export_dir, &options);
        assert_eq!(slots.len(), 2);
        assert!(read_export_directory(&view, 0x41F0).is_none());
    }
}
