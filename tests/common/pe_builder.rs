//! Synthetic PE images for integration tests.
//!
//! [`PeBuilder`] lays out DOS/COFF/optional headers and sections with a file
//! alignment of 0x200, so an image with no trailer ends exactly at its last
//! section. [`Blob`] assembles section contents and hands back the RVA of
//! everything it places. The scenario helpers at the bottom build complete
//! import, delay-import and export images.

pub const FILE_ALIGNMENT: usize = 0x200;
pub const IMAGE_BASE_32: u64 = 0x0040_0000;
pub const IMAGE_BASE_64: u64 = 0x0001_4000_0000;

pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_DELAY_IMPORT: usize = 13;

/// Section contents addressed by RVA.
#[derive(Debug, Clone)]
pub struct Blob {
    base: u32,
    data: Vec<u8>,
}

impl Blob {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            data: Vec::new(),
        }
    }

    /// RVA of the next byte to be written.
    pub fn rva(&self) -> u32 {
        self.base + self.data.len() as u32
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn reserve(&mut self, len: usize) -> u32 {
        let rva = self.rva();
        self.data.resize(self.data.len() + len, 0);
        rva
    }

    pub fn align(&mut self, to: usize) {
        while self.data.len() % to != 0 {
            self.data.push(0);
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> u32 {
        let rva = self.rva();
        self.data.extend_from_slice(bytes);
        rva
    }

    pub fn u16(&mut self, v: u16) -> u32 {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> u32 {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> u32 {
        self.bytes(&v.to_le_bytes())
    }

    pub fn cstr(&mut self, s: &str) -> u32 {
        let rva = self.bytes(s.as_bytes());
        self.data.push(0);
        rva
    }

    /// `u16` hint followed by a NUL-terminated name.
    pub fn hint_name(&mut self, hint: u16, name: &str) -> u32 {
        self.align(2);
        let rva = self.u16(hint);
        self.cstr(name);
        rva
    }

    pub fn patch_u16(&mut self, rva: u32, v: u16) {
        let off = (rva - self.base) as usize;
        self.data[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn patch_u32(&mut self, rva: u32, v: u32) {
        let off = (rva - self.base) as usize;
        self.data[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone)]
pub struct SectionSpec {
    pub name: String,
    pub virtual_address: u32,
    pub data: Vec<u8>,
    pub virtual_size: Option<u32>,
}

/// Builder for a complete PE32 or PE32+ image.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    pub is_64: bool,
    pub image_base: u64,
    pub number_of_rva_and_sizes: u32,
    pub directories: [(u32, u32); 16],
    pub sections: Vec<SectionSpec>,
    pub trailer: Vec<u8>,
    pub omit_optional_header: bool,
}

impl PeBuilder {
    pub fn new(is_64: bool) -> Self {
        Self {
            is_64,
            image_base: if is_64 { IMAGE_BASE_64 } else { IMAGE_BASE_32 },
            number_of_rva_and_sizes: 16,
            directories: [(0, 0); 16],
            sections: vec![SectionSpec {
                name: ".text".into(),
                virtual_address: 0x1000,
                data: vec![0xC3; 0x10],
                virtual_size: None,
            }],
            trailer: Vec::new(),
            omit_optional_header: false,
        }
    }

    pub fn section(mut self, name: &str, blob: Blob) -> Self {
        let base = blob.base();
        self.sections.push(SectionSpec {
            name: name.into(),
            virtual_address: base,
            data: blob.into_data(),
            virtual_size: None,
        });
        self
    }

    pub fn imports(self, libraries: &[Library]) -> Self {
        let (blob, rva, size) = import_section(self.is_64, libraries);
        self.section(".idata", blob).directory(DIR_IMPORT, rva, size)
    }

    pub fn delay_imports(self, libraries: &[Library], legacy: bool) -> Self {
        let (blob, rva, size) = delay_import_section(self.is_64, libraries, legacy);
        self.section(".didat", blob)
            .directory(DIR_DELAY_IMPORT, rva, size)
    }

    pub fn exports(self, spec: &ExportSpec) -> Self {
        let (blob, rva, size) = export_section(spec);
        self.section(".edata", blob).directory(DIR_EXPORT, rva, size)
    }

    /// Override the virtual size of the most recently added section.
    pub fn last_virtual_size(mut self, size: u32) -> Self {
        if let Some(section) = self.sections.last_mut() {
            section.virtual_size = Some(size);
        }
        self
    }

    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories[index] = (rva, size);
        self
    }

    pub fn directory_count(mut self, count: u32) -> Self {
        self.number_of_rva_and_sizes = count;
        self
    }

    pub fn trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }

    pub fn without_optional_header(mut self) -> Self {
        self.omit_optional_header = true;
        self
    }

    fn optional_header(&self) -> Vec<u8> {
        if self.omit_optional_header {
            return Vec::new();
        }
        let fixed = if self.is_64 { 112 } else { 96 };
        let mut h = vec![0u8; fixed + 16 * 8];
        let put16 = |h: &mut Vec<u8>, off: usize, v: u16| h[off..off + 2].copy_from_slice(&v.to_le_bytes());
        let put32 = |h: &mut Vec<u8>, off: usize, v: u32| h[off..off + 4].copy_from_slice(&v.to_le_bytes());

        put16(&mut h, 0, if self.is_64 { 0x20B } else { 0x10B });
        h[2] = 14; // linker version
        put32(&mut h, 16, 0x1000); // entry point
        put32(&mut h, 20, 0x1000); // base of code
        if self.is_64 {
            h[24..32].copy_from_slice(&self.image_base.to_le_bytes());
        } else {
            put32(&mut h, 28, self.image_base as u32);
        }
        put32(&mut h, 32, 0x1000); // section alignment
        put32(&mut h, 36, FILE_ALIGNMENT as u32);
        let image_end = self
            .sections
            .iter()
            .map(|s| s.virtual_address + s.data.len() as u32)
            .max()
            .unwrap_or(0x1000);
        put32(&mut h, 56, (image_end + 0xFFF) & !0xFFF);
        put32(&mut h, 60, FILE_ALIGNMENT as u32 * 2);
        put16(&mut h, 68, 3); // console subsystem
        put32(&mut h, fixed - 4, self.number_of_rva_and_sizes);
        for (i, (rva, size)) in self.directories.iter().enumerate() {
            put32(&mut h, fixed + i * 8, *rva);
            put32(&mut h, fixed + i * 8 + 4, *size);
        }
        h
    }

    pub fn build(&self) -> Vec<u8> {
        let e_lfanew = 0x80usize;
        let optional = self.optional_header();
        let section_table = e_lfanew + 24 + optional.len();
        let headers_end = section_table + self.sections.len() * 40;
        let mut cursor = align_up(headers_end.max(FILE_ALIGNMENT * 2), FILE_ALIGNMENT);

        let mut out = vec![0u8; cursor];
        out[0] = b'M';
        out[1] = b'Z';
        out[60..64].copy_from_slice(&(e_lfanew as u32).to_le_bytes());
        out[e_lfanew..e_lfanew + 4].copy_from_slice(b"PE\0\0");

        let coff = e_lfanew + 4;
        let machine: u16 = if self.is_64 { 0x8664 } else { 0x014C };
        out[coff..coff + 2].copy_from_slice(&machine.to_le_bytes());
        out[coff + 2..coff + 4].copy_from_slice(&(self.sections.len() as u16).to_le_bytes());
        out[coff + 16..coff + 18].copy_from_slice(&(optional.len() as u16).to_le_bytes());
        out[coff + 18..coff + 20].copy_from_slice(&0x0102u16.to_le_bytes());
        out[coff + 20..coff + 20 + optional.len()].copy_from_slice(&optional);

        for (i, section) in self.sections.iter().enumerate() {
            let raw_size = align_up(section.data.len(), FILE_ALIGNMENT);
            let header = section_table + i * 40;
            let name = section.name.as_bytes();
            out[header..header + name.len().min(8)].copy_from_slice(&name[..name.len().min(8)]);
            let vsize = section.virtual_size.unwrap_or(section.data.len() as u32);
            out[header + 8..header + 12].copy_from_slice(&vsize.to_le_bytes());
            out[header + 12..header + 16].copy_from_slice(&section.virtual_address.to_le_bytes());
            out[header + 16..header + 20].copy_from_slice(&(raw_size as u32).to_le_bytes());
            out[header + 20..header + 24].copy_from_slice(&(cursor as u32).to_le_bytes());
            out[header + 36..header + 40].copy_from_slice(&0x4000_0040u32.to_le_bytes());

            out.extend_from_slice(&section.data);
            out.resize(cursor + raw_size, 0);
            cursor += raw_size;
        }

        out.extend_from_slice(&self.trailer);
        out
    }
}

pub fn align_up(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

/// One import thunk.
#[derive(Debug, Clone)]
pub enum Thunk {
    Name(u16, String),
    Ordinal(u16),
}

pub fn by_name(hint: u16, name: &str) -> Thunk {
    Thunk::Name(hint, name.to_string())
}

/// A library and its imported functions.
#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    pub thunks: Vec<Thunk>,
}

pub fn library(name: &str, thunks: Vec<Thunk>) -> Library {
    Library {
        name: name.to_string(),
        thunks,
    }
}

/// Write a zero-terminated thunk array; name thunks hold `rva + bias`.
fn write_thunks(blob: &mut Blob, is_64: bool, thunks: &[Thunk], bias: u64) -> u32 {
    let entries: Vec<u64> = thunks
        .iter()
        .map(|thunk| match thunk {
            Thunk::Name(hint, name) => blob.hint_name(*hint, name) as u64 + bias,
            Thunk::Ordinal(ordinal) => {
                let flag = if is_64 { 1u64 << 63 } else { 1u64 << 31 };
                flag | *ordinal as u64
            }
        })
        .collect();

    blob.align(8);
    let start = blob.rva();
    for entry in entries.iter().chain(std::iter::once(&0)) {
        if is_64 {
            blob.u64(*entry);
        } else {
            blob.u32(*entry as u32);
        }
    }
    start
}

pub const IMPORT_SECTION_RVA: u32 = 0x2000;

/// `.idata` contents for `libraries`: (section, directory RVA, directory size).
pub fn import_section(is_64: bool, libraries: &[Library]) -> (Blob, u32, u32) {
    let mut blob = Blob::new(IMPORT_SECTION_RVA);
    let descriptors = blob.reserve((libraries.len() + 1) * 20);

    for (i, lib) in libraries.iter().enumerate() {
        let name = blob.cstr(&lib.name);
        let int = write_thunks(&mut blob, is_64, &lib.thunks, 0);
        let iat = write_thunks(&mut blob, is_64, &lib.thunks, 0);
        let d = descriptors + (i as u32) * 20;
        blob.patch_u32(d, int);
        blob.patch_u32(d + 12, name);
        blob.patch_u32(d + 16, iat);
    }

    let size = (libraries.len() as u32 + 1) * 20;
    (blob, descriptors, size)
}

/// Image whose `.idata` section holds an import directory for `libraries`.
pub fn import_image(is_64: bool, libraries: &[Library]) -> PeBuilder {
    PeBuilder::new(is_64).imports(libraries)
}

pub const DELAY_SECTION_RVA: u32 = 0x3000;

/// `.didat` contents for a delay-load directory.
///
/// With `legacy`, descriptors carry attribute 0 and every address is a
/// virtual address (`image_base + rva`), as old 32-bit linkers emitted.
pub fn delay_import_section(is_64: bool, libraries: &[Library], legacy: bool) -> (Blob, u32, u32) {
    let image_base = if is_64 { IMAGE_BASE_64 } else { IMAGE_BASE_32 };
    let bias = if legacy { image_base } else { 0 };
    let mut blob = Blob::new(DELAY_SECTION_RVA);
    let descriptors = blob.reserve((libraries.len() + 1) * 32);

    for (i, lib) in libraries.iter().enumerate() {
        let name = blob.cstr(&lib.name);
        let handle = blob.reserve(8);
        let int = write_thunks(&mut blob, is_64, &lib.thunks, bias);
        let iat = write_thunks(&mut blob, is_64, &lib.thunks, bias);
        let d = descriptors + (i as u32) * 32;
        blob.patch_u32(d, if legacy { 0 } else { 1 });
        blob.patch_u32(d + 4, (name as u64 + bias) as u32);
        blob.patch_u32(d + 8, (handle as u64 + bias) as u32);
        blob.patch_u32(d + 12, (iat as u64 + bias) as u32);
        blob.patch_u32(d + 16, (int as u64 + bias) as u32);
    }

    let size = (libraries.len() as u32 + 1) * 32;
    (blob, descriptors, size)
}

/// Image whose `.didat` section holds a delay-load directory.
pub fn delay_import_image(is_64: bool, libraries: &[Library], legacy: bool) -> PeBuilder {
    PeBuilder::new(is_64).delay_imports(libraries, legacy)
}

/// One export address table slot.
#[derive(Debug, Clone)]
pub enum ExportSlot {
    Code(u32),
    Forward(String),
}

#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub module: Option<String>,
    pub base: u32,
    pub slots: Vec<ExportSlot>,
    /// `(name, index into slots)`, in name-table order.
    pub names: Vec<(String, u16)>,
}

pub const EXPORT_SECTION_RVA: u32 = 0x4000;

/// `.edata` contents for `spec`.
///
/// The directory range covers the whole section, so forwarder strings land
/// inside it.
pub fn export_section(spec: &ExportSpec) -> (Blob, u32, u32) {
    let mut blob = Blob::new(EXPORT_SECTION_RVA);
    let dir = blob.reserve(40);

    let module = spec.module.as_deref().map(|m| blob.cstr(m)).unwrap_or(0);
    let forwards: Vec<Option<u32>> = spec
        .slots
        .iter()
        .map(|slot| match slot {
            ExportSlot::Forward(target) => Some(blob.cstr(target)),
            ExportSlot::Code(_) => None,
        })
        .collect();
    let names: Vec<u32> = spec.names.iter().map(|(n, _)| blob.cstr(n)).collect();

    blob.align(4);
    let eat = blob.rva();
    for (slot, forward) in spec.slots.iter().zip(&forwards) {
        match (slot, forward) {
            (ExportSlot::Code(rva), _) => blob.u32(*rva),
            (ExportSlot::Forward(_), Some(rva)) => blob.u32(*rva),
            (ExportSlot::Forward(_), None) => unreachable!(),
        };
    }
    let ent = blob.rva();
    for rva in &names {
        blob.u32(*rva);
    }
    let eot = blob.rva();
    for (_, index) in &spec.names {
        blob.u16(*index);
    }

    blob.patch_u32(dir + 12, module);
    blob.patch_u32(dir + 16, spec.base);
    blob.patch_u32(dir + 20, spec.slots.len() as u32);
    blob.patch_u32(dir + 24, spec.names.len() as u32);
    blob.patch_u32(dir + 28, eat);
    blob.patch_u32(dir + 32, ent);
    blob.patch_u32(dir + 36, eot);

    let size = blob.rva() - dir;
    (blob, dir, size)
}

/// Image whose `.edata` section holds an export directory for `spec`.
pub fn export_image(is_64: bool, spec: &ExportSpec) -> PeBuilder {
    PeBuilder::new(is_64).exports(spec)
}
