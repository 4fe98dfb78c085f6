//! Function table: imports, delay imports and exports of one image.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ParseOptions;
use crate::formats::pe::directories::{parse_delay_imports, parse_exports, parse_imports};
use crate::formats::pe::types::*;
use crate::formats::pe::PeFile;
use crate::io::ByteSource;
use crate::span_trace;

/// Everything an image imports and exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTable {
    /// Load-time imports, libraries and functions in table order. Descriptors
    /// naming the same library, byte for byte, share one entry.
    pub imports: Vec<ImportedLibrary>,
    /// Delay-load imports, same shape as `imports`.
    pub delay_imports: Vec<ImportedLibrary>,
    /// Exports, ordinal ascending.
    pub exports: Vec<ExportedSymbol>,
    /// The module's own name from its export directory.
    pub module_name: Option<String>,
}

impl FunctionTable {
    /// Sorted, deduplicated names of every library the image depends on.
    pub fn dependencies(&self) -> Vec<String> {
        self.imports
            .iter()
            .chain(&self.delay_imports)
            .map(|lib| lib.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Load-time import entry for `name` (ASCII case-insensitive).
    pub fn import_library(&self, name: &str) -> Option<&ImportedLibrary> {
        self.imports
            .iter()
            .find(|lib| lib.name.eq_ignore_ascii_case(name))
    }

    /// Delay-load import entry for `name` (ASCII case-insensitive).
    pub fn delay_import_library(&self, name: &str) -> Option<&ImportedLibrary> {
        self.delay_imports
            .iter()
            .find(|lib| lib.name.eq_ignore_ascii_case(name))
    }

    /// Whether `function` is imported by name from any library, delay-loaded or not.
    pub fn imports_function(&self, function: &str) -> bool {
        self.imports
            .iter()
            .chain(&self.delay_imports)
            .flat_map(|lib| &lib.functions)
            .any(|f| f.name() == Some(function))
    }

    pub fn export_by_name(&self, name: &str) -> Option<&ExportedSymbol> {
        self.exports
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }

    pub fn export_by_ordinal(&self, ordinal: u32) -> Option<&ExportedSymbol> {
        self.exports.iter().find(|s| s.ordinal == ordinal)
    }

    /// Number of imported functions, delay-loaded included.
    pub fn import_count(&self) -> usize {
        self.imports
            .iter()
            .chain(&self.delay_imports)
            .map(|lib| lib.functions.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.delay_imports.is_empty() && self.exports.is_empty()
    }
}

impl<S: ByteSource> PeFile<S> {
    /// Resolve all three tables.
    ///
    /// Structural problems with the optional header abort before any table
    /// is read. After that, a table that cannot be resolved for any other
    /// reason, a failed section read included, is left empty and the
    /// remaining tables still run.
    pub fn function_table(&self, options: &ParseOptions) -> Result<FunctionTable> {
        let span = span_trace!("function_table", sections = self.sections().len());
        let _guard = span.enter();

        self.address_width()?;
        for kind in [
            DirectoryEntry::Import,
            DirectoryEntry::DelayImport,
            DirectoryEntry::Export,
        ] {
            self.directory(kind)?;
        }

        let mut table = FunctionTable::default();
        if options.parse_imports {
            table.imports = tolerate(DirectoryEntry::Import, parse_imports(self, options))?;
        }
        if options.parse_delay_imports {
            table.delay_imports =
                tolerate(DirectoryEntry::DelayImport, parse_delay_imports(self, options))?;
        }
        if options.parse_exports {
            let exports = tolerate(DirectoryEntry::Export, parse_exports(self, options))?;
            table.module_name = exports.module_name;
            table.exports = exports.symbols;
        }

        debug!(
            imports = table.imports.len(),
            delay_imports = table.delay_imports.len(),
            exports = table.exports.len(),
            "Built function table"
        );
        Ok(table)
    }
}

// Headers are already parsed here, so only structural errors abort. I/O
// failures while loading one table's section leave that table empty.
fn tolerate<T: Default>(directory: DirectoryEntry, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == ErrorKind::Structural => Err(e),
        Err(e) => {
            warn!(%directory, error = %e, "Table unavailable, continuing without it");
            Ok(T::default())
        }
    }
}
