//! Core PE data types and structures

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::error::IoError;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

// Record sizes
pub const DOS_HEADER_SIZE: usize = 64;
pub const COFF_HEADER_SIZE: usize = 20;
pub const SECTION_HEADER_SIZE: usize = 40;
pub const DATA_DIRECTORY_SIZE: usize = 8;
pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;
pub const DELAY_IMPORT_DESCRIPTOR_SIZE: usize = 32;
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Offset of the data directory array inside a PE32 optional header.
pub const OPTIONAL_HEADER32_FIXED_SIZE: usize = 96;
/// Offset of the data directory array inside a PE32+ optional header.
pub const OPTIONAL_HEADER64_FIXED_SIZE: usize = 112;
pub const MAX_DATA_DIRECTORIES: usize = 16;

// Delay-load attributes
pub const DELAY_ATTRIBUTE_RVA: u32 = 0x1;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x00000020;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x20000000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x80000000;

/// Data directory slots, numbered as in the PE/COFF specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectoryEntry {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Security = 4,
    BaseReloc = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImport = 13,
    ComDescriptor = 14,
    Reserved = 15,
}

impl DirectoryEntry {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Export => "export",
            Self::Import => "import",
            Self::Resource => "resource",
            Self::Exception => "exception",
            Self::Security => "security",
            Self::BaseReloc => "base relocation",
            Self::Debug => "debug",
            Self::Architecture => "architecture",
            Self::GlobalPtr => "global pointer",
            Self::Tls => "TLS",
            Self::LoadConfig => "load config",
            Self::BoundImport => "bound import",
            Self::Iat => "IAT",
            Self::DelayImport => "delay import",
            Self::ComDescriptor => "CLR runtime",
            Self::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

/// Why the container cannot serve a directory at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralReason {
    MissingOptionalHeader,
    DirectoryCountTooSmall { directory: DirectoryEntry, available: u32 },
}

impl fmt::Display for StructuralReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOptionalHeader => write!(f, "optional header missing"),
            Self::DirectoryCountTooSmall {
                directory,
                available,
            } => write!(
                f,
                "{} directory (index {}) not covered by {} declared data directories",
                directory,
                directory.index(),
                available
            ),
        }
    }
}

/// PE parsing error types
#[derive(Debug, Error)]
pub enum PeError {
    #[error("Invalid DOS signature")]
    InvalidDosSignature,
    #[error("Invalid PE signature")]
    InvalidPeSignature,
    #[error("Invalid optional header magic: 0x{0:04x}")]
    InvalidMagic(u16),
    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
    #[error("Structural error: {0}")]
    Structural(StructuralReason),
    #[error("No {directory} directory present")]
    DirectoryAbsent { directory: DirectoryEntry },
    #[error("{directory} directory RVA 0x{rva:08x} maps to no section")]
    SectionNotFound { directory: DirectoryEntry, rva: u32 },
    #[error("{directory} directory: RVA 0x{rva:08x} reads outside its section")]
    BoundsViolation { directory: DirectoryEntry, rva: u32 },
    #[error("No overlay: image ends at 0x{offset:x}, file size 0x{file_size:x}")]
    NoOverlay { offset: u64, file_size: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Coarse classification of [`PeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not a well-formed PE image at all.
    Malformed,
    Structural,
    DirectoryAbsent,
    SectionNotFound,
    BoundsViolation,
    NoOverlay,
    Io,
}

impl PeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDosSignature
            | Self::InvalidPeSignature
            | Self::InvalidMagic(_)
            | Self::TruncatedHeader { .. } => ErrorKind::Malformed,
            Self::Structural(_) => ErrorKind::Structural,
            Self::DirectoryAbsent { .. } => ErrorKind::DirectoryAbsent,
            Self::SectionNotFound { .. } => ErrorKind::SectionNotFound,
            Self::BoundsViolation { .. } => ErrorKind::BoundsViolation,
            Self::NoOverlay { .. } => ErrorKind::NoOverlay,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors that abort a whole function-table pass rather than one table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Malformed | ErrorKind::Structural | ErrorKind::Io
        )
    }
}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Machine {
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    Arm64,  // 0xaa64
    ArmNT,  // 0x01c4
    IA64,   // 0x0200
    EBC,    // 0x0ebc
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0x01c4 => Self::ArmNT,
            0x0200 => Self::IA64,
            0x0ebc => Self::EBC,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

/// Pointer width of the image, which fixes thunk stride and ordinal flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressWidth {
    Bits32,
    Bits64,
}

impl AddressWidth {
    /// Size of one thunk slot in bytes.
    pub fn thunk_size(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Bit that marks an import-by-ordinal thunk.
    pub fn ordinal_flag(self) -> u64 {
        match self {
            Self::Bits32 => 1 << 31,
            Self::Bits64 => 1 << 63,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

/// DOS header, reduced to the fields the parser needs.
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub e_magic: u16,  // Magic number (MZ)
    pub e_lfanew: u32, // File address of PE header
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }

    /// Whether `rva` falls inside `[virtual_address, virtual_address + size)`.
    pub fn contains(&self, rva: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.size as u64;
        (start..end).contains(&(rva as u64))
    }
}

/// Optional header - fields shared by both widths
#[derive(Debug, Clone)]
pub struct OptionalHeaderCommon {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

/// 32-bit optional header
#[derive(Debug, Clone)]
pub struct OptionalHeader32 {
    pub common: OptionalHeaderCommon,
    pub base_of_data: u32,
    pub image_base: u32,
}

/// 64-bit optional header
#[derive(Debug, Clone)]
pub struct OptionalHeader64 {
    pub common: OptionalHeaderCommon,
    pub image_base: u64,
}

/// Combined optional header enum
#[derive(Debug, Clone)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn common(&self) -> &OptionalHeaderCommon {
        match self {
            Self::Pe32(h) => &h.common,
            Self::Pe32Plus(h) => &h.common,
        }
    }

    pub fn magic(&self) -> u16 {
        self.common().magic
    }

    pub fn entry_point(&self) -> u32 {
        self.common().address_of_entry_point
    }

    pub fn image_base(&self) -> u64 {
        match self {
            Self::Pe32(h) => h.image_base as u64,
            Self::Pe32Plus(h) => h.image_base,
        }
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        self.common().number_of_rva_and_sizes
    }

    pub fn address_width(&self) -> AddressWidth {
        match self {
            Self::Pe32(_) => AddressWidth::Bits32,
            Self::Pe32Plus(_) => AddressWidth::Bits64,
        }
    }

    /// Size of the fixed part that precedes the data directory array.
    pub fn fixed_size(&self) -> usize {
        match self {
            Self::Pe32(_) => OPTIONAL_HEADER32_FIXED_SIZE,
            Self::Pe32Plus(_) => OPTIONAL_HEADER64_FIXED_SIZE,
        }
    }
}

/// Section header
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).to_string()
    }

    /// `virtual_address <= rva < virtual_address + virtual_size`
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.virtual_size as u64;
        (start..end).contains(&(rva as u64))
    }

    /// One past the last file byte the section claims.
    pub fn file_end(&self) -> u64 {
        self.pointer_to_raw_data as u64 + self.size_of_raw_data as u64
    }

    pub fn is_executable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_EXECUTE) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_WRITE) != 0
    }
}

/// Standard import descriptor (20 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub first_thunk: u32,
}

/// Delay-load import descriptor (32 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayImportDescriptor {
    pub attributes: u32,
    pub dll_name_rva: u32,
    pub module_handle_rva: u32,
    pub import_address_table_rva: u32,
    pub import_name_table_rva: u32,
    pub bound_import_address_table_rva: u32,
    pub unload_information_table_rva: u32,
    pub time_date_stamp: u32,
}

impl DelayImportDescriptor {
    /// Pre-RVA (VC6) descriptors store virtual addresses instead of RVAs.
    pub fn uses_virtual_addresses(&self) -> bool {
        self.attributes & DELAY_ATTRIBUTE_RVA == 0
    }
}

/// Export directory table (40 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name_rva: u32,
    pub ordinal_base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: u32,
    pub address_of_names: u32,
    pub address_of_name_ordinals: u32,
}

/// One imported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportedFunction {
    ByName { name: String, hint: u16 },
    ByOrdinal { ordinal: u16 },
}

impl ImportedFunction {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::ByName { name, .. } => Some(name),
            Self::ByOrdinal { .. } => None,
        }
    }

    pub fn ordinal(&self) -> Option<u16> {
        match self {
            Self::ByName { .. } => None,
            Self::ByOrdinal { ordinal } => Some(*ordinal),
        }
    }
}

impl fmt::Display for ImportedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName { name, .. } => f.write_str(name),
            Self::ByOrdinal { ordinal } => write!(f, "Ordinal{}", ordinal),
        }
    }
}

/// All symbols imported from one library, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedLibrary {
    pub name: String,
    pub functions: Vec<ImportedFunction>,
}

/// Where an export slot points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    /// RVA of code or data in this module.
    Address(u32),
    /// `Module.Symbol` redirect into another module.
    Forward(String),
}

/// One slot of the export address table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedSymbol {
    pub ordinal: u32,
    pub target: ExportTarget,
    pub name: Option<String>,
    /// Index into the export name table, when the slot is named.
    pub hint: Option<u32>,
}

impl ExportedSymbol {
    pub fn is_forwarder(&self) -> bool {
        matches!(self.target, ExportTarget::Forward(_))
    }

    pub fn address(&self) -> Option<u32> {
        match self.target {
            ExportTarget::Address(rva) => Some(rva),
            ExportTarget::Forward(_) => None,
        }
    }

    pub fn forward_name(&self) -> Option<&str> {
        match &self.target {
            ExportTarget::Address(_) => None,
            ExportTarget::Forward(name) => Some(name),
        }
    }
}
