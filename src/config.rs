//! Parser configuration.
//!
//! Every table walk over untrusted input is bounded by the structure of the
//! file itself; these options add explicit caps on top of that and let callers
//! switch individual tables off.

use serde::{Deserialize, Serialize};

use crate::error::{DependsError, Result};

/// Options controlling which tables are resolved and how much work each may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Resolve the standard import directory.
    pub parse_imports: bool,
    /// Resolve the delay-load import directory.
    pub parse_delay_imports: bool,
    /// Resolve the export directory.
    pub parse_exports: bool,
    /// Maximum number of import descriptors decoded per directory.
    pub max_libraries: usize,
    /// Maximum number of thunks decoded for a single library.
    pub max_imports_per_library: usize,
    /// Maximum number of export slots allocated.
    pub max_exports: usize,
    /// Longest NUL-terminated name accepted, terminator excluded. Longer
    /// names make their entry unreadable. MSVC decorated names run up to
    /// 4096 bytes.
    pub max_name_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            parse_imports: true,
            parse_delay_imports: true,
            parse_exports: true,
            max_libraries: 4096,
            max_imports_per_library: 65536,
            max_exports: 65536,
            max_name_len: 4096,
        }
    }
}

impl ParseOptions {
    /// Load options from a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DependsError::Serialization(e.to_string()))
    }

    /// Serialize options to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DependsError::Serialization(e.to_string()))
    }
}
