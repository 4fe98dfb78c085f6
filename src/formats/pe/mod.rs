//! PE container: headers, data directories and lazily loaded sections.
//!
//! A [`PeFile`] is built once per input and is immutable afterwards, apart
//! from the per-section byte cache. The table resolvers in [`directories`]
//! are read-only passes over it and [`PeFile::function_table`] runs them all.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::io::{ByteSource, IOLimits, MappedFile};

pub mod directories;
pub mod functions;
pub mod headers;
pub mod overlay;
pub mod sections;
pub mod types;
pub mod utils;

pub use functions::FunctionTable;
pub use overlay::OverlayReader;
pub use sections::{Section, SectionTable, SectionView};
pub use types::*;

use headers::*;

/// Offset of the optional header relative to `e_lfanew`: signature plus COFF header.
const NT_HEADERS_PREFIX: usize = 4 + COFF_HEADER_SIZE;

/// A parsed PE image over some byte source.
///
/// Section bytes are read from the source on first use and cached in a
/// `OnceCell`, so a `PeFile` is `Send` when its source is but never `Sync`.
/// Sharing one across threads needs an external lock; alternatively give
/// each thread its own `PeFile` over a cheaply cloned `Bytes`.
pub struct PeFile<S: ByteSource = Bytes> {
    source: S,
    dos_header: DosHeader,
    coff_header: CoffHeader,
    optional_header: Option<OptionalHeader>,
    data_directories: Vec<DataDirectory>,
    section_table: SectionTable,
}

impl PeFile<Bytes> {
    /// Parse an in-memory image.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::parse(data.into())
    }
}

impl PeFile<MappedFile> {
    /// Memory-map `path` under `limits` and parse it.
    pub fn open<P: AsRef<Path>>(path: P, limits: IOLimits) -> Result<Self> {
        Self::parse(MappedFile::open(path, limits)?)
    }
}

impl<S: ByteSource> PeFile<S> {
    /// Parse the headers and section table of `source`.
    ///
    /// Only header bytes are read here; section contents are loaded on demand.
    pub fn parse(source: S) -> Result<Self> {
        let dos = source.read_at(0, DOS_HEADER_SIZE as u64)?;
        let dos_header = parse_dos_header(&dos)?;

        let nt_offset = dos_header.e_lfanew as u64;
        let nt = source.read_at(nt_offset, NT_HEADERS_PREFIX as u64)?;
        if nt.len() < 4 {
            return Err(PeError::TruncatedHeader {
                expected: 4,
                actual: nt.len(),
            });
        }
        if nt[..4] != PE_SIGNATURE {
            return Err(PeError::InvalidPeSignature);
        }
        let coff_header = parse_coff_header(&nt, 4)?;

        let optional_offset = nt_offset + NT_HEADERS_PREFIX as u64;
        let optional_size = coff_header.size_of_optional_header;
        let optional = source.read_at(optional_offset, optional_size as u64)?;
        let optional_header = parse_optional_header(&optional, 0, optional_size)?;
        let data_directories = match &optional_header {
            Some(header) => parse_data_directories(&optional, 0, optional_size, header),
            None => Vec::new(),
        };

        let section_offset = optional_offset + optional_size as u64;
        let section_count = coff_header.number_of_sections;
        let table = source.read_at(
            section_offset,
            section_count as u64 * SECTION_HEADER_SIZE as u64,
        )?;
        let section_headers = parse_section_headers(&table, 0, section_count)?;

        debug!(
            machine = ?coff_header.machine,
            width = ?optional_header.as_ref().map(|h| h.address_width().bits()),
            sections = section_headers.len(),
            directories = data_directories.len(),
            "Parsed PE headers"
        );

        Ok(Self {
            source,
            dos_header,
            coff_header,
            optional_header,
            data_directories,
            section_table: SectionTable::new(section_headers),
        })
    }

    // Header access

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Total size of the underlying file.
    pub fn file_size(&self) -> u64 {
        self.source.size()
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff_header
    }

    /// The optional header, absent in object-file style images.
    pub fn optional_header(&self) -> Option<&OptionalHeader> {
        self.optional_header.as_ref()
    }

    pub fn machine(&self) -> Machine {
        self.coff_header.machine
    }

    pub fn image_base(&self) -> Option<u64> {
        self.optional_header.as_ref().map(|h| h.image_base())
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.optional_header.as_ref().map(|h| h.entry_point())
    }

    /// Pointer width of the image, taken from the optional header magic.
    pub fn address_width(&self) -> Result<AddressWidth> {
        self.optional_header
            .as_ref()
            .map(|h| h.address_width())
            .ok_or(PeError::Structural(StructuralReason::MissingOptionalHeader))
    }

    /// Look up a data directory.
    ///
    /// Fails with `Structural` when the optional header is missing or does not
    /// declare enough entries to cover `kind`. A zeroed entry is `Ok(None)`.
    pub fn directory(&self, kind: DirectoryEntry) -> Result<Option<DataDirectory>> {
        if self.optional_header.is_none() {
            return Err(PeError::Structural(StructuralReason::MissingOptionalHeader));
        }
        let entry = self.data_directories.get(kind.index()).ok_or(PeError::Structural(
            StructuralReason::DirectoryCountTooSmall {
                directory: kind,
                available: self.data_directories.len() as u32,
            },
        ))?;
        Ok(entry.is_present().then_some(*entry))
    }

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    // Sections

    pub fn sections(&self) -> &[Section] {
        self.section_table.sections()
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.section_table
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.section_table.section_by_name(name)
    }

    /// First section whose virtual range holds `rva`.
    pub fn section_containing(&self, rva: u32) -> Option<&Section> {
        self.section_table.section_containing_rva(rva)
    }

    /// Raw file bytes of `section`, read once and then served from cache.
    pub fn section_data<'a>(&'a self, section: &'a Section) -> Result<&'a [u8]> {
        if let Some(data) = section.cached() {
            return Ok(&data[..]);
        }

        let data = self.source.read_at(
            section.file_offset() as u64,
            section.file_size() as u64,
        )?;
        trace!(
            section = %section.name(),
            offset = section.file_offset(),
            len = data.len(),
            "Loaded section bytes"
        );
        Ok(&section.fill(data)[..])
    }

    /// RVA-addressed view of `section`, clipped to its virtual size.
    pub fn section_view<'a>(&'a self, section: &'a Section) -> Result<SectionView<'a>> {
        let data = self.section_data(section)?;
        let len = data.len().min(section.virtual_size() as usize);
        Ok(SectionView::new(&section.header, &data[..len]))
    }

    /// Resolve a directory to its entry and the view of its owning section.
    pub fn locate(&self, kind: DirectoryEntry) -> Result<(DataDirectory, SectionView<'_>)> {
        let directory = self
            .directory(kind)?
            .ok_or(PeError::DirectoryAbsent { directory: kind })?;
        let section = self.section_containing(directory.virtual_address).ok_or(
            PeError::SectionNotFound {
                directory: kind,
                rva: directory.virtual_address,
            },
        )?;
        Ok((directory, self.section_view(section)?))
    }

    /// Drop every cached section buffer.
    pub fn release(&mut self) {
        self.section_table.release_all();
    }
}
