//! Trailing data after the last PE section.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;
use tracing::debug;

use crate::formats::overlay::OverlaySpan;
use crate::formats::pe::types::{PeError, Result};
use crate::formats::pe::PeFile;
use crate::io::ByteSource;

impl<S: ByteSource> PeFile<S> {
    /// File offset where the image ends: `max(pointer_to_raw_data + size_of_raw_data)`.
    pub fn overlay_offset(&self) -> u64 {
        self.section_table().last_file_end()
    }

    /// Offset and length of the overlay, or `NoOverlay` when nothing follows the image.
    pub fn overlay_span(&self) -> Result<OverlaySpan> {
        let offset = self.overlay_offset();
        let file_size = self.file_size();
        OverlaySpan::after(offset, file_size).ok_or(PeError::NoOverlay { offset, file_size })
    }

    /// Copy of every byte past the end of the image.
    pub fn overlay(&self) -> Result<Bytes> {
        let span = self.overlay_span()?;
        let data = self.source().read_at(span.offset, span.size)?;
        debug!(offset = span.offset, size = data.len(), "Read overlay");
        Ok(data)
    }

    /// Lazy reader anchored at the overlay start.
    ///
    /// Unlike [`PeFile::overlay`] this does not require a non-empty overlay
    /// and imposes no upper length; reads past the end of the file return 0.
    pub fn overlay_reader(&self) -> OverlayReader<'_, S> {
        OverlayReader {
            source: self.source(),
            start: self.overlay_offset(),
            position: 0,
        }
    }
}

/// Random-access and streaming reader over the bytes after the image.
///
/// Offsets are relative to the overlay start.
pub struct OverlayReader<'a, S: ByteSource> {
    source: &'a S,
    start: u64,
    position: u64,
}

impl<S: ByteSource> OverlayReader<'_, S> {
    /// Absolute file offset of overlay byte 0.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Fill `buf` from `offset` (relative to the overlay), returning the count read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Some(absolute) = self.start.checked_add(offset) else {
            return Ok(0);
        };
        let data = self
            .source
            .read_at(absolute, buf.len() as u64)
            .map_err(io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<S: ByteSource> Read for OverlayReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: ByteSource> Seek for OverlayReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let end = self.source.size().saturating_sub(self.start);
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
