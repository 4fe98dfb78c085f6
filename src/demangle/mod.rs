//! Symbol demangling for display.
//!
//! The scheme is picked from the name's prefix alone: `_Z`, `__Z` and `___Z`
//! are Itanium C++, `_R` is Rust v0, and everything else goes to the MSVC
//! undecorator. Names that fail to demangle are returned unchanged.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolFlavor {
    Itanium,
    Rust,
    Msvc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if itanium_body(s).is_some() {
        SymbolFlavor::Itanium
    } else if s.starts_with("_R") {
        SymbolFlavor::Rust
    } else {
        SymbolFlavor::Msvc
    }
}

// Mach-O adds one leading underscore and blocks add two; the demangler wants `_Z...`.
fn itanium_body(s: &str) -> Option<&str> {
    ["___Z", "__Z", "_Z"]
        .iter()
        .find(|prefix| s.starts_with(*prefix))
        .map(|prefix| &s[prefix.len() - 2..])
}

/// Attempt to demangle a single symbol. Returns None when it does not decode.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    let flavor = detect_flavor(s);
    let demangled = match flavor {
        SymbolFlavor::Itanium => {
            let body = itanium_body(s)?;
            cpp_demangle::Symbol::new(body).ok()?.to_string()
        }
        SymbolFlavor::Rust => rustc_demangle::try_demangle(s).ok()?.to_string(),
        SymbolFlavor::Msvc => {
            msvc_demangler::demangle(s, msvc_demangler::DemangleFlags::COMPLETE).ok()?
        }
    };
    Some(DemangleResult {
        original: s.to_string(),
        demangled,
        flavor,
    })
}

/// Display form of `s`: demangled when possible, otherwise `s` itself.
pub fn demangle(s: &str) -> String {
    demangle_one(s)
        .map(|r| r.demangled)
        .unwrap_or_else(|| s.to_string())
}
