//! KLV (Key-Length-Value) streaming access.
//!
//! [`KlvCursor`] gives access to a single KLV item inside an MXF file.
//! Huge values are handled safely by materialising them a chunk at a
//! time; the cursor also records where the item lives so the same
//! region can be rewritten in place.
//!
//! The cursor holds independent source and destination records. When a
//! source is set and no destination has been chosen, the destination
//! aliases the source, which is the common in-place rewrite pattern.
//!
//! Note that the cursor provides no interlock for concurrent access:
//! modified data held in the chunk but not yet written back is not
//! visible through a parallel read of the same file region.

use crate::codec;
use crate::error::{MxfError, Result};
use crate::file::{FileRef, MxfFile, Position, UNKNOWN_POSITION};
use crate::ul::{labels, Ul};
use std::cell::RefCell;
use std::rc::Rc;

/// Request "all remaining bytes" from a read or write operation.
pub const READ_ALL: usize = usize::MAX;

/// Encoding of the key of a KLV item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFormat {
    /// No key is present.
    None,
    /// 1-byte local tag.
    OneByte,
    /// 2-byte local tag.
    TwoByte,
    /// 4-byte local tag.
    FourByte,
    /// Infer from scope: file-scope keys are full 16-byte ULs.
    #[default]
    Auto,
}

/// Encoding of the length of a KLV item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LenFormat {
    /// No length field is present.
    None,
    /// 1-byte unsigned.
    OneByte,
    /// 2-byte big-endian unsigned.
    TwoByte,
    /// 4-byte big-endian unsigned.
    FourByte,
    /// BER variable-length.
    #[default]
    Ber,
}

impl LenFormat {
    /// Fixed field width, or `None` for BER / absent lengths.
    fn fixed_width(&self) -> Option<usize> {
        match self {
            LenFormat::OneByte => Some(1),
            LenFormat::TwoByte => Some(2),
            LenFormat::FourByte => Some(4),
            _ => None,
        }
    }
}

/// Where a KLV item lives in a file.
#[derive(Clone)]
pub struct KlvInfo {
    /// Source or destination file.
    pub file: Option<FileRef>,
    /// Offset of the first byte of the key, or the unknown sentinel.
    pub offset: Position,
    /// Length of the entire readable value space. Plain KLV items keep
    /// this equal to the value length; wrapped variants may differ.
    pub outer_length: i64,
    /// Size of the key and length fields, or -1 if not known.
    pub kl_size: i32,
    /// Set once the record describes a real location.
    pub valid: bool,
}

impl Default for KlvInfo {
    fn default() -> Self {
        KlvInfo {
            file: None,
            offset: UNKNOWN_POSITION,
            outer_length: 0,
            kl_size: -1,
            valid: false,
        }
    }
}

/// Immutable identity of a KLV item, as visible to read handlers.
#[derive(Clone, Debug)]
pub struct KlvIdentity {
    /// The item's UL, if known.
    pub ul: Option<Ul>,
    /// Length of the value field.
    pub value_length: i64,
    /// Offset of the key in the source file.
    pub source_offset: Position,
    /// Size of the key and length fields in the source file.
    pub kl_size: i32,
}

/// Supplies value bytes for a KLV item in place of direct file reads.
///
/// A handler must replace the buffer contents entirely (no append
/// semantics), may return fewer bytes than requested at end of source,
/// and may consult only the item's immutable identity. Handlers are
/// invoked only when a value is materialised, never during key/length
/// parsing.
pub trait KlvReadHandler {
    /// Fill `buffer` with up to `size` bytes starting at `start` within
    /// the value field. `READ_ALL` requests everything available.
    fn read_data(
        &mut self,
        buffer: &mut Vec<u8>,
        klv: &KlvIdentity,
        start: Position,
        size: usize,
    ) -> Result<usize>;
}

/// Shared handle to a read handler; handlers may serve many cursors.
pub type ReadHandlerRef = Rc<RefCell<dyn KlvReadHandler>>;

/// Cursor over a single KLV item.
///
/// All inherent methods are non-overridable base behaviour; the
/// [`KlvItem`] trait builds variant types on top of them.
pub struct KlvCursor {
    source: KlvInfo,
    dest: KlvInfo,
    ul: Option<Ul>,
    local_tag: Option<u32>,
    value_length: i64,
    data: Vec<u8>,
    data_base: i64,
    read_handler: Option<ReadHandlerRef>,
    key_format: KeyFormat,
    len_format: LenFormat,
}

impl Default for KlvCursor {
    fn default() -> Self {
        KlvCursor::new(None)
    }
}

impl KlvCursor {
    /// Create a cursor, optionally with a known UL.
    pub fn new(ul: Option<Ul>) -> Self {
        KlvCursor {
            source: KlvInfo::default(),
            dest: KlvInfo::default(),
            ul,
            local_tag: None,
            value_length: 0,
            data: Vec::new(),
            data_base: 0,
            read_handler: None,
            key_format: KeyFormat::Auto,
            len_format: LenFormat::Ber,
        }
    }

    /// Create a cursor with explicit key and length formats.
    pub fn with_formats(ul: Option<Ul>, key_format: KeyFormat, len_format: LenFormat) -> Self {
        KlvCursor {
            key_format,
            len_format,
            ..KlvCursor::new(ul)
        }
    }

    /// Set the source location after the item has been found in a file.
    ///
    /// A negative `location` means "the file's current position". If no
    /// destination has been set, the destination aliases the source.
    pub fn set_source(&mut self, file: &FileRef, location: Position) -> Result<()> {
        let offset = if location < 0 {
            file.borrow_mut().tell()?
        } else {
            location
        };
        self.source.valid = true;
        self.source.file = Some(Rc::clone(file));
        self.source.offset = offset;

        if !self.dest.valid {
            self.dest = self.source.clone();
        }
        Ok(())
    }

    /// Set the destination location for writing.
    pub fn set_destination(&mut self, file: &FileRef, location: Position) -> Result<()> {
        let offset = if location < 0 {
            file.borrow_mut().tell()?
        } else {
            location
        };
        self.dest.valid = true;
        self.dest.file = Some(Rc::clone(file));
        self.dest.offset = offset;
        Ok(())
    }

    /// The item's UL, if known.
    pub fn ul(&self) -> Option<&Ul> {
        self.ul.as_ref()
    }

    /// Set the item's UL.
    pub fn set_ul(&mut self, ul: Ul) {
        self.ul = Some(ul);
    }

    /// The local tag read in place of a UL, for tagged key formats.
    pub fn local_tag(&self) -> Option<u32> {
        self.local_tag
    }

    /// Length of the value field.
    pub fn value_length(&self) -> i64 {
        self.value_length
    }

    /// Set the length of the value field.
    pub fn set_value_length(&mut self, length: i64) {
        self.value_length = length;
        self.source.outer_length = length;
        self.dest.outer_length = length;
    }

    /// The currently materialised chunk.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the materialised chunk.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Offset within the value field of the chunk's first byte.
    pub fn data_base(&self) -> i64 {
        self.data_base
    }

    /// Size of the key and length fields (source if known, else
    /// destination).
    pub fn kl_size(&self) -> i32 {
        if self.source.kl_size >= 0 {
            self.source.kl_size
        } else {
            self.dest.kl_size
        }
    }

    /// Set the key-and-length size used when writing. The source KL
    /// size cannot be changed.
    pub fn set_kl_size(&mut self, kl_size: i32) {
        self.dest.kl_size = kl_size;
    }

    /// Offset of the key in the source file.
    pub fn source_offset(&self) -> Position {
        self.source.offset
    }

    /// Install a handler to supply value bytes on reads.
    pub fn set_read_handler(&mut self, handler: Option<ReadHandlerRef>) {
        self.read_handler = handler;
    }

    /// Immutable identity for handler callbacks and diagnostics.
    pub fn identity(&self) -> KlvIdentity {
        KlvIdentity {
            ul: self.ul,
            value_length: self.value_length,
            source_offset: self.source.offset,
            kl_size: self.source.kl_size,
        }
    }

    /// Text describing where this item came from.
    pub fn source_description(&self) -> String {
        match &self.source.file {
            Some(file) => format!("0x{:x} in {}", self.source.offset, file.borrow().name()),
            None => "KLV item created in memory".into(),
        }
    }

    /// Read the key and length at the source offset.
    ///
    /// Populates the UL (or local tag), value length and KL size, and
    /// leaves the file positioned at the first value byte. Returns the
    /// KL size.
    pub fn read_kl(&mut self) -> Result<i32> {
        let file_ref = self
            .source
            .file
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        let mut file = file_ref.borrow_mut();

        if self.source.offset < 0 {
            self.source.offset = file.tell()?;
        } else {
            file.seek(self.source.offset)?;
        }
        let offset = self.source.offset;

        let key_size = self.read_key(&mut file, offset)?;
        let (length, len_size) = self.read_length(&mut file, offset)?;

        self.value_length = length as i64;
        self.source.outer_length = self.value_length;
        self.source.kl_size = (key_size + len_size) as i32;
        self.source.valid = true;

        let aliased = match (&self.dest.file, &self.source.file) {
            (Some(d), Some(s)) => Rc::ptr_eq(d, s) && self.dest.offset == self.source.offset,
            _ => false,
        };
        if !self.dest.valid || aliased {
            self.dest = self.source.clone();
        }

        Ok(self.source.kl_size)
    }

    fn read_key(&mut self, file: &mut MxfFile, offset: Position) -> Result<usize> {
        let key_size = match self.key_format {
            KeyFormat::None => 0,
            KeyFormat::OneByte => 1,
            KeyFormat::TwoByte => 2,
            KeyFormat::FourByte => 4,
            KeyFormat::Auto => 16,
        };
        if key_size == 0 {
            return Ok(0);
        }

        let bytes = file.read(key_size)?;
        if bytes.len() < key_size {
            return Err(MxfError::TruncatedKl { offset });
        }

        match self.key_format {
            KeyFormat::Auto => {
                self.ul = Ul::from_slice(&bytes);
                self.local_tag = None;
            }
            _ => {
                let mut tag: u32 = 0;
                for byte in &bytes {
                    tag = (tag << 8) | (*byte as u32);
                }
                self.local_tag = Some(tag);
                self.ul = None;
            }
        }
        Ok(key_size)
    }

    fn read_length(&mut self, file: &mut MxfFile, offset: Position) -> Result<(u64, usize)> {
        if let Some(width) = self.len_format.fixed_width() {
            let bytes = file.read(width)?;
            if bytes.len() < width {
                return Err(MxfError::TruncatedKl { offset });
            }
            let mut length: u64 = 0;
            for byte in &bytes {
                length = (length << 8) | (*byte as u64);
            }
            return Ok((length, width));
        }
        if matches!(self.len_format, LenFormat::None) {
            return Ok((0, 0));
        }

        // BER
        let first = file.read(1)?;
        if first.is_empty() {
            return Err(MxfError::TruncatedKl { offset });
        }
        let first = first[0];
        if first < 0x80 {
            return Ok((first as u64, 1));
        }

        let count = (first & 0x7f) as usize;
        if count == 0 {
            return Err(MxfError::MalformedLength(
                "indefinite (0x80) length not supported".into(),
            ));
        }
        if count > 8 {
            return Err(MxfError::MalformedLength(format!(
                "length-of-length {} exceeds 8",
                count
            )));
        }

        let bytes = file.read(count)?;
        if bytes.len() < count {
            return Err(MxfError::TruncatedKl { offset });
        }
        let mut length: u64 = 0;
        for byte in &bytes {
            length = (length << 8) | (*byte as u64);
        }
        if length > codec::MAX_LENGTH {
            return Err(MxfError::LengthOverflow {
                length,
                limit: codec::MAX_LENGTH,
            });
        }
        Ok((length, 1 + count))
    }

    /// Materialise up to `size` bytes from the start of the value.
    pub fn read_data(&mut self, size: usize) -> Result<usize> {
        self.read_data_from(0, size)
    }

    /// Materialise up to `size` bytes starting at `offset` within the
    /// value field, replacing any previously materialised chunk.
    ///
    /// Afterwards the chunk base equals `offset` and the chunk holds
    /// exactly the bytes returned.
    pub fn read_data_from(&mut self, offset: Position, size: usize) -> Result<usize> {
        if offset < 0 || offset > self.value_length {
            return Err(MxfError::BadPosition(offset));
        }

        if let Some(handler_ref) = self.read_handler.clone() {
            let identity = self.identity();
            let mut buffer = std::mem::take(&mut self.data);
            let outcome = handler_ref
                .borrow_mut()
                .read_data(&mut buffer, &identity, offset, size);
            self.data = buffer;
            let count = outcome?;
            self.data.truncate(count);
            self.data_base = offset;
            return Ok(count);
        }

        let file_ref = self
            .source
            .file
            .clone()
            .ok_or(MxfError::Unattached("source file or read handler"))?;
        if self.source.kl_size < 0 {
            return Err(MxfError::Unattached("key/length"));
        }

        let available = (self.value_length - offset) as u64;
        let want = if size == READ_ALL {
            available
        } else {
            (size as u64).min(available)
        };
        let want =
            usize::try_from(want).map_err(|_| MxfError::ChunkTooLarge { size: available })?;

        let mut file = file_ref.borrow_mut();
        file.seek(self.source.offset + self.source.kl_size as i64 + offset)?;
        self.data = file.read(want)?;
        self.data_base = offset;
        Ok(self.data.len())
    }

    /// Write the key and length to the destination offset.
    ///
    /// `len_size` is the total size of the length field in bytes; zero
    /// means "match the configured KL size if possible, else minimum
    /// width". The cursor's value length is written. Returns the new
    /// destination KL size.
    pub fn write_kl(&mut self, len_size: usize) -> Result<i32> {
        self.write_kl_with(len_size, None)
    }

    /// As [`KlvCursor::write_kl`], but `override_length` replaces the
    /// cursor's value length in the emitted length field.
    pub fn write_kl_with(&mut self, len_size: usize, override_length: Option<u64>) -> Result<i32> {
        let file_ref = self
            .dest
            .file
            .clone()
            .ok_or(MxfError::Unattached("destination file"))?;
        let mut file = file_ref.borrow_mut();

        if self.dest.offset < 0 {
            self.dest.offset = file.tell()?;
        } else {
            file.seek(self.dest.offset)?;
        }

        let key_size = match self.key_format {
            KeyFormat::None => 0,
            KeyFormat::OneByte => 1,
            KeyFormat::TwoByte => 2,
            KeyFormat::FourByte => 4,
            KeyFormat::Auto => 16,
        };
        match self.key_format {
            KeyFormat::None => {}
            KeyFormat::Auto => {
                let ul = self.ul.as_ref().ok_or(MxfError::Unattached("UL"))?;
                file.write(ul.as_bytes())?;
            }
            _ => {
                let tag = self.local_tag.ok_or(MxfError::Unattached("local tag"))?;
                let bytes = tag.to_be_bytes();
                file.write(&bytes[4 - key_size..])?;
            }
        }

        let length = override_length.unwrap_or(self.value_length.max(0) as u64);
        let len_bytes = match self.len_format.fixed_width() {
            Some(width) => {
                let mut out = Vec::new();
                codec::write_fixed_length(&mut out, length, width)?;
                out
            }
            None if matches!(self.len_format, LenFormat::None) => Vec::new(),
            None => {
                let width = if len_size > 0 {
                    len_size
                } else if self.dest.kl_size > key_size as i32 {
                    (self.dest.kl_size as usize) - key_size
                } else {
                    0
                };
                if width > 0 {
                    codec::encode_ber_length_exact(length, width)?
                } else {
                    codec::encode_ber_length(length)
                }
            }
        };
        file.write(&len_bytes)?;

        self.dest.kl_size = (key_size + len_bytes.len()) as i32;
        self.dest.valid = true;
        Ok(self.dest.kl_size)
    }

    /// Write the whole chunk to the same offsets in the destination.
    pub fn write_data(&mut self) -> Result<usize> {
        self.write_data_from_to(0, 0, READ_ALL)
    }

    /// Write `size` chunk bytes starting at `chunk_start` to
    /// destination-value-offset `dest_offset`.
    ///
    /// Chunk sizes are bounded by the platform size type, so a single
    /// write can never exceed the addressable range.
    pub fn write_data_from_to(
        &mut self,
        dest_offset: Position,
        chunk_start: usize,
        size: usize,
    ) -> Result<usize> {
        if chunk_start >= self.data.len() {
            return Ok(0);
        }
        let mut count = self.data.len() - chunk_start;
        if size != READ_ALL && size < count {
            count = size;
        }

        let data = std::mem::take(&mut self.data);
        let outcome = self.write_data_to(&data[chunk_start..chunk_start + count], dest_offset);
        self.data = data;
        outcome
    }

    /// Write bytes from an arbitrary buffer to destination-value-offset
    /// `dest_offset`.
    pub fn write_data_to(&mut self, buffer: &[u8], dest_offset: Position) -> Result<usize> {
        let file_ref = self
            .dest
            .file
            .clone()
            .ok_or(MxfError::Unattached("destination file"))?;
        if self.dest.kl_size < 0 {
            return Err(MxfError::Unattached("destination key/length"));
        }

        let mut file = file_ref.borrow_mut();
        file.seek(self.dest.offset + self.dest.kl_size as i64 + dest_offset)?;
        file.write(buffer)?;
        Ok(buffer.len())
    }

    /// Offset of the first byte past this item in the source file.
    pub fn end_offset(&self) -> Position {
        self.source.offset + self.source.kl_size.max(0) as i64 + self.value_length
    }
}

/// Capability trait for KLV item variants (plain, encrypted, wrapped).
///
/// Default method bodies delegate only to the inherent methods of the
/// exposed [`KlvCursor`], which cannot be overridden, so an
/// implementation may call them to compose base behaviour without
/// re-entering its own overrides.
pub trait KlvItem {
    /// The underlying plain cursor.
    fn cursor(&mut self) -> &mut KlvCursor;

    /// Read the key and length at the source offset.
    fn read_kl(&mut self) -> Result<i32> {
        self.cursor().read_kl()
    }

    /// Materialise up to `size` value bytes from the start.
    fn read_data(&mut self, size: usize) -> Result<usize> {
        self.cursor().read_data_from(0, size)
    }

    /// Materialise up to `size` value bytes from `offset`.
    fn read_data_from(&mut self, offset: Position, size: usize) -> Result<usize> {
        self.cursor().read_data_from(offset, size)
    }

    /// Write the key and length to the destination.
    fn write_kl(&mut self, len_size: usize) -> Result<i32> {
        self.cursor().write_kl(len_size)
    }

    /// Write the whole chunk to the destination.
    fn write_data(&mut self) -> Result<usize> {
        self.cursor().write_data_from_to(0, 0, READ_ALL)
    }
}

impl KlvItem for KlvCursor {
    fn cursor(&mut self) -> &mut KlvCursor {
        self
    }
}

/// Bytes of fill needed to carry `position` (relative to the partition
/// start) to the next KAG boundary, or `None` if already aligned.
///
/// A fill item cannot be smaller than 17 bytes (key plus one length
/// byte), so a short gap is padded through to a later boundary.
pub fn fill_size_for(position: u64, kag: u32) -> Option<u64> {
    let kag = kag.max(1) as u64;
    let remainder = position % kag;
    if remainder == 0 {
        return None;
    }
    let mut pad = kag - remainder;
    while pad < 17 {
        pad += kag;
    }
    Some(pad)
}

/// Emit a KLV-Fill item occupying exactly `total` bytes including its
/// key and length fields.
pub fn write_fill(file: &mut MxfFile, total: u64) -> Result<()> {
    if total < 17 {
        return Err(MxfError::InvalidPartition(format!(
            "fill of {} bytes is smaller than the minimum KLV",
            total
        )));
    }

    for len_size in 1..=9u64 {
        if total < 16 + len_size {
            break;
        }
        let value = total - 16 - len_size;
        let encoded = match codec::encode_ber_length_exact(value, len_size as usize) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        file.write(labels::FILL_ITEM.as_bytes())?;
        file.write(&encoded)?;
        file.write(&vec![0u8; value as usize])?;
        return Ok(());
    }

    Err(MxfError::InvalidPartition(format!(
        "fill of {} bytes is not expressible",
        total
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MxfFile;
    use crate::ul::labels;

    fn essence_ul() -> Ul {
        Ul([
            0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x15, 0x01,
            0x05, 0x01,
        ])
    }

    fn single_klv(value: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(essence_ul().as_bytes());
        bytes.extend_from_slice(&codec::encode_ber_length(value.len() as u64));
        bytes.extend_from_slice(value);
        bytes
    }

    #[test]
    fn test_read_kl() {
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&[1, 2, 3, 4, 5]));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        let kl_size = klv.read_kl().unwrap();

        assert_eq!(kl_size, 17);
        assert!(klv.ul().unwrap().matches(&essence_ul()));
        assert_eq!(klv.value_length(), 5);
        assert_eq!(file.borrow_mut().tell().unwrap(), 17);
    }

    #[test]
    fn test_read_kl_truncated() {
        let (file, _buffer) = MxfFile::from_bytes(essence_ul().as_bytes()[..10].to_vec());
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        assert!(matches!(
            klv.read_kl(),
            Err(MxfError::TruncatedKl { offset: 0 })
        ));
    }

    #[test]
    fn test_read_data_chunks() {
        let value: Vec<u8> = (0..100u8).collect();
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&value));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        klv.read_kl().unwrap();

        assert_eq!(klv.read_data_from(0, 10).unwrap(), 10);
        assert_eq!(klv.data(), &value[..10]);
        assert_eq!(klv.data_base(), 0);

        // The second chunk fully replaces the first
        assert_eq!(klv.read_data_from(10, 20).unwrap(), 20);
        assert_eq!(klv.data(), &value[10..30]);
        assert_eq!(klv.data_base(), 10);

        // Clamped at the end of the value
        assert_eq!(klv.read_data_from(90, 50).unwrap(), 10);
        assert_eq!(klv.data_base() + klv.data().len() as i64, 100);
    }

    #[test]
    fn test_read_data_all() {
        let value = vec![7u8; 33];
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&value));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        klv.read_kl().unwrap();

        assert_eq!(klv.read_data(READ_ALL).unwrap(), 33);
        assert_eq!(klv.data(), &value[..]);
    }

    #[test]
    fn test_read_data_past_end_rejected() {
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&[1, 2, 3]));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        klv.read_kl().unwrap();

        assert!(matches!(
            klv.read_data_from(4, 1),
            Err(MxfError::BadPosition(4))
        ));
    }

    struct PatternHandler;

    impl KlvReadHandler for PatternHandler {
        fn read_data(
            &mut self,
            buffer: &mut Vec<u8>,
            klv: &KlvIdentity,
            start: Position,
            size: usize,
        ) -> Result<usize> {
            let available = (klv.value_length - start).max(0) as usize;
            let count = if size == READ_ALL {
                available
            } else {
                size.min(available)
            };
            buffer.clear();
            buffer.extend((0..count).map(|i| ((start as usize + i) % 251) as u8));
            Ok(count)
        }
    }

    #[test]
    fn test_read_handler_chunked() {
        // A large value served entirely by the handler: no source file
        // bytes beyond the KL are needed.
        let mut klv = KlvCursor::new(Some(essence_ul()));
        klv.set_value_length(1 << 30);
        klv.set_read_handler(Some(Rc::new(RefCell::new(PatternHandler))));

        assert_eq!(klv.read_data_from(0, 65536).unwrap(), 65536);
        assert_eq!(klv.data().len(), 65536);
        assert_eq!(klv.data_base(), 0);

        assert_eq!(klv.read_data_from(65536, 65536).unwrap(), 65536);
        assert_eq!(klv.data_base(), 65536);
        assert_eq!(klv.data().len(), 65536);
        assert_eq!(klv.data()[0], (65536u32 % 251) as u8);
    }

    #[test]
    fn test_write_kl_and_data() {
        let (file, buffer) = MxfFile::memory();
        let file = file.shared();

        let mut klv = KlvCursor::new(Some(essence_ul()));
        klv.set_destination(&file, 0).unwrap();
        klv.set_value_length(4);
        let kl_size = klv.write_kl(0).unwrap();
        assert_eq!(kl_size, 17);

        klv.data_mut().extend_from_slice(&[9, 8, 7, 6]);
        assert_eq!(klv.write_data().unwrap(), 4);

        let bytes = buffer.contents();
        assert_eq!(&bytes[..16], essence_ul().as_bytes());
        assert_eq!(bytes[16], 4);
        assert_eq!(&bytes[17..21], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_write_kl_forced_width() {
        let (file, buffer) = MxfFile::memory();
        let file = file.shared();

        let mut klv = KlvCursor::new(Some(essence_ul()));
        klv.set_destination(&file, 0).unwrap();
        klv.set_value_length(4);
        let kl_size = klv.write_kl(4).unwrap();

        assert_eq!(kl_size, 20);
        let bytes = buffer.contents();
        assert_eq!(&bytes[16..20], &[0x83, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_write_kl_override_length() {
        let (file, buffer) = MxfFile::memory();
        let file = file.shared();

        let mut klv = KlvCursor::new(Some(essence_ul()));
        klv.set_destination(&file, 0).unwrap();
        klv.set_value_length(4);
        klv.write_kl_with(1, Some(99)).unwrap();

        assert_eq!(buffer.contents()[16], 99);
    }

    #[test]
    fn test_in_place_rewrite_aliases_source() {
        let value: Vec<u8> = (0..8u8).collect();
        let (file, buffer) = MxfFile::from_bytes(single_klv(&value));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        klv.read_kl().unwrap();

        // No explicit destination: writes land over the source bytes
        klv.data_mut().extend_from_slice(&[0xaa, 0xbb]);
        klv.write_data_from_to(2, 0, READ_ALL).unwrap();

        let bytes = buffer.contents();
        assert_eq!(&bytes[17..25], &[0, 1, 0xaa, 0xbb, 4, 5, 6, 7]);
    }

    #[test]
    fn test_local_tag_formats() {
        let mut bytes = vec![0x3c, 0x0a, 0x00, 0x03];
        bytes.extend_from_slice(&[1, 2, 3]);
        let (file, _buffer) = MxfFile::from_bytes(bytes);
        let file = file.shared();

        let mut klv = KlvCursor::with_formats(None, KeyFormat::TwoByte, LenFormat::TwoByte);
        klv.set_source(&file, 0).unwrap();
        let kl_size = klv.read_kl().unwrap();

        assert_eq!(kl_size, 4);
        assert_eq!(klv.local_tag(), Some(0x3c0a));
        assert_eq!(klv.value_length(), 3);
    }

    #[test]
    fn test_fill_size_for() {
        assert_eq!(fill_size_for(0, 512), None);
        assert_eq!(fill_size_for(512, 512), None);
        assert_eq!(fill_size_for(100, 512), Some(412));
        // Short gaps pad through to a later boundary
        assert_eq!(fill_size_for(500, 512), Some(524));
        assert_eq!(fill_size_for(5, 1), None);
    }

    #[test]
    fn test_write_fill_exact_size() {
        for total in [17u64, 100, 144, 145, 70000] {
            let (mut file, buffer) = MxfFile::memory();
            write_fill(&mut file, total).unwrap();
            let bytes = buffer.contents();
            assert_eq!(bytes.len() as u64, total, "total {}", total);
            assert!(Ul::from_slice(&bytes[..16]).unwrap().is_fill());
        }

        let (mut file, _buffer) = MxfFile::memory();
        assert!(write_fill(&mut file, 16).is_err());
    }

    /// A counting variant: overrides `read_kl`, composes the base
    /// behaviour through the inherent method without re-entry.
    struct CountingKlv {
        inner: KlvCursor,
        kl_reads: u32,
    }

    impl KlvItem for CountingKlv {
        fn cursor(&mut self) -> &mut KlvCursor {
            &mut self.inner
        }

        fn read_kl(&mut self) -> Result<i32> {
            self.kl_reads += 1;
            self.inner.read_kl()
        }
    }

    #[test]
    fn test_variant_composes_base_behaviour() {
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&[5, 6, 7]));
        let file = file.shared();

        let mut counting = CountingKlv {
            inner: KlvCursor::default(),
            kl_reads: 0,
        };
        counting.cursor().set_source(&file, 0).unwrap();

        assert_eq!(KlvItem::read_kl(&mut counting).unwrap(), 17);
        assert_eq!(counting.kl_reads, 1);

        // Default trait methods reach the plain cursor directly
        assert_eq!(counting.read_data(READ_ALL).unwrap(), 3);
        assert_eq!(counting.cursor().data(), &[5, 6, 7]);
    }

    #[test]
    fn test_invariant_chunk_within_value() {
        let value = vec![3u8; 50];
        let (file, _buffer) = MxfFile::from_bytes(single_klv(&value));
        let file = file.shared();

        let mut klv = KlvCursor::default();
        klv.set_source(&file, 0).unwrap();
        klv.read_kl().unwrap();

        for (offset, size) in [(0i64, 10usize), (25, 25), (49, 10), (50, 5)] {
            klv.read_data_from(offset, size).unwrap();
            assert!(klv.data_base() >= 0);
            assert!(klv.data_base() + klv.data().len() as i64 <= klv.value_length());
        }
    }
}
