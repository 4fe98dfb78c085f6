//! Executable container formats.

pub mod overlay;
pub mod pe;

pub use overlay::{detect_overlay, elf_overlay, macho_overlay, OverlaySpan};
