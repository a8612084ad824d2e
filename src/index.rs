//! Index table segments: edit-unit to byte-offset maps for essence.
//!
//! Each segment is a KLV local set with static tags. Constant-rate
//! streams carry a non-zero edit unit byte count; variable-rate
//! streams carry an entry per edit unit instead.

use crate::codec;
use crate::diag::DiagnosticSink;
use crate::error::{MxfError, Result};
use crate::file::MxfFile;
use crate::types::Rational;
use crate::ul::labels;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use uuid::Uuid;

const TAG_INSTANCE_UID: u16 = 0x3c0a;
const TAG_EDIT_UNIT_BYTE_COUNT: u16 = 0x3f05;
const TAG_INDEX_SID: u16 = 0x3f06;
const TAG_BODY_SID: u16 = 0x3f07;
const TAG_SLICE_COUNT: u16 = 0x3f08;
const TAG_DELTA_ENTRIES: u16 = 0x3f09;
const TAG_INDEX_ENTRIES: u16 = 0x3f0a;
const TAG_INDEX_EDIT_RATE: u16 = 0x3f0b;
const TAG_INDEX_START_POSITION: u16 = 0x3f0c;
const TAG_INDEX_DURATION: u16 = 0x3f0d;

/// Delta entry for interleaved multi-element edit units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEntry {
    /// Index into the position table, or -1 for none.
    pub pos_table_index: i8,
    /// Slice this element lives in.
    pub slice: u8,
    /// Byte offset of the element from the start of the edit unit.
    pub element_delta: u32,
}

/// One edit unit of a variable-rate stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Display-order offset of this edit unit, in edit units.
    pub temporal_offset: i8,
    /// Offset to the previous random-access point, in edit units.
    pub key_frame_offset: i8,
    /// Coding flags.
    pub flags: u8,
    /// Byte offset of the edit unit within its essence stream.
    pub stream_offset: u64,
    /// Per-slice byte offsets for interleaved essence.
    pub slice_offsets: Vec<u32>,
}

impl IndexEntry {
    pub const FLAG_RANDOM_ACCESS: u8 = 0x80;
    pub const FLAG_SEQUENCE_HEADER: u8 = 0x40;
    pub const FLAG_FORWARD_PREDICTION: u8 = 0x20;
    pub const FLAG_BACKWARD_PREDICTION: u8 = 0x10;

    /// Check if this edit unit is a random access point.
    pub fn is_random_access(&self) -> bool {
        (self.flags & Self::FLAG_RANDOM_ACCESS) != 0
    }
}

/// One KLV-encoded index table segment.
#[derive(Debug, Clone)]
pub struct IndexTableSegment {
    /// Segment identity.
    pub instance_uid: Uuid,
    /// Edit rate the positions are counted in.
    pub index_edit_rate: Rational,
    /// First edit unit this segment covers.
    pub index_start_position: i64,
    /// Number of edit units covered.
    pub index_duration: i64,
    /// Bytes per edit unit, or 0 for variable-rate streams.
    pub edit_unit_byte_count: u32,
    /// Index stream this segment belongs to.
    pub index_sid: u32,
    /// Essence stream this segment indexes.
    pub body_sid: u32,
    /// Number of slices per edit unit (interleaved essence).
    pub slice_count: u8,
    /// Element layout of one edit unit.
    pub delta_entries: Vec<DeltaEntry>,
    /// Per-edit-unit entries for variable-rate streams.
    pub index_entries: Vec<IndexEntry>,
}

impl Default for IndexTableSegment {
    fn default() -> Self {
        IndexTableSegment {
            instance_uid: Uuid::nil(),
            index_edit_rate: Rational::new(25, 1),
            index_start_position: 0,
            index_duration: 0,
            edit_unit_byte_count: 0,
            index_sid: 1,
            body_sid: 1,
            slice_count: 0,
            delta_entries: Vec::new(),
            index_entries: Vec::new(),
        }
    }
}

impl IndexTableSegment {
    /// Last edit unit covered, exclusive.
    pub fn end_position(&self) -> i64 {
        self.index_start_position + self.index_duration
    }

    /// Check whether `position` falls inside this segment.
    pub fn contains(&self, position: i64) -> bool {
        position >= self.index_start_position
            && (self.index_duration == 0 || position < self.end_position())
    }

    /// Stream offset of an edit unit, if this segment can answer.
    pub fn offset_for(&self, position: i64) -> Option<u64> {
        if !self.contains(position) {
            return None;
        }
        let relative = (position - self.index_start_position) as u64;
        if self.edit_unit_byte_count > 0 {
            return Some(relative * self.edit_unit_byte_count as u64);
        }
        self.index_entries
            .get(relative as usize)
            .map(|entry| entry.stream_offset)
    }

    /// Parse a segment from the value bytes of its KLV.
    pub fn parse_value(value: &[u8], diag: &mut dyn DiagnosticSink) -> Result<Self> {
        let mut segment = IndexTableSegment::default();
        let mut offset = 0usize;

        while offset < value.len() {
            if offset + 4 > value.len() {
                return Err(MxfError::InvalidSet(format!(
                    "truncated index item header at value offset {}",
                    offset
                )));
            }
            let tag = u16::from_be_bytes([value[offset], value[offset + 1]]);
            let length = u16::from_be_bytes([value[offset + 2], value[offset + 3]]) as usize;
            offset += 4;
            if offset + length > value.len() {
                return Err(MxfError::TruncatedValue {
                    needed: length as u64,
                    available: (value.len() - offset) as u64,
                });
            }
            let item = &value[offset..offset + length];
            offset += length;

            let mut cursor = Cursor::new(item);
            match tag {
                TAG_INSTANCE_UID => segment.instance_uid = codec::read_uuid(&mut cursor)?,
                TAG_EDIT_UNIT_BYTE_COUNT => {
                    segment.edit_unit_byte_count = cursor.read_u32::<BigEndian>()?
                }
                TAG_INDEX_SID => segment.index_sid = cursor.read_u32::<BigEndian>()?,
                TAG_BODY_SID => segment.body_sid = cursor.read_u32::<BigEndian>()?,
                TAG_SLICE_COUNT => segment.slice_count = cursor.read_u8()?,
                TAG_INDEX_EDIT_RATE => {
                    let numerator = cursor.read_i32::<BigEndian>()?;
                    let denominator = cursor.read_i32::<BigEndian>()?;
                    segment.index_edit_rate = Rational::new(numerator, denominator);
                }
                TAG_INDEX_START_POSITION => {
                    segment.index_start_position = cursor.read_i64::<BigEndian>()?
                }
                TAG_INDEX_DURATION => segment.index_duration = cursor.read_i64::<BigEndian>()?,
                TAG_DELTA_ENTRIES => segment.delta_entries = parse_delta_entries(item)?,
                TAG_INDEX_ENTRIES => segment.index_entries = parse_index_entries(item)?,
                _ => diag.warning(format!(
                    "unknown index segment tag 0x{:04x} ({} bytes)",
                    tag, length
                )),
            }
        }

        segment.check_monotonic(diag);
        Ok(segment)
    }

    /// Warn if stream offsets run backwards within the segment.
    fn check_monotonic(&self, diag: &mut dyn DiagnosticSink) {
        let monotonic = self
            .index_entries
            .windows(2)
            .all(|pair| pair[0].stream_offset <= pair[1].stream_offset);
        if !monotonic {
            diag.warning(format!(
                "index segment for body SID {} has decreasing stream offsets",
                self.body_sid
            ));
        }
    }

    /// Serialise the segment as local set value bytes.
    pub fn write_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        write_item(&mut out, TAG_INSTANCE_UID, self.instance_uid.as_bytes())?;

        let mut scratch = Vec::new();
        scratch.write_u32::<BigEndian>(self.edit_unit_byte_count)?;
        write_item(&mut out, TAG_EDIT_UNIT_BYTE_COUNT, &scratch)?;

        scratch.clear();
        scratch.write_u32::<BigEndian>(self.index_sid)?;
        write_item(&mut out, TAG_INDEX_SID, &scratch)?;

        scratch.clear();
        scratch.write_u32::<BigEndian>(self.body_sid)?;
        write_item(&mut out, TAG_BODY_SID, &scratch)?;

        scratch.clear();
        scratch.write_u8(self.slice_count)?;
        write_item(&mut out, TAG_SLICE_COUNT, &scratch)?;

        if !self.delta_entries.is_empty() {
            let encoded = encode_delta_entries(&self.delta_entries)?;
            write_item(&mut out, TAG_DELTA_ENTRIES, &encoded)?;
        }
        if !self.index_entries.is_empty() {
            let encoded = encode_index_entries(&self.index_entries, self.slice_count)?;
            write_item(&mut out, TAG_INDEX_ENTRIES, &encoded)?;
        }

        scratch.clear();
        scratch.write_i32::<BigEndian>(self.index_edit_rate.numerator)?;
        scratch.write_i32::<BigEndian>(self.index_edit_rate.denominator)?;
        write_item(&mut out, TAG_INDEX_EDIT_RATE, &scratch)?;

        scratch.clear();
        scratch.write_i64::<BigEndian>(self.index_start_position)?;
        write_item(&mut out, TAG_INDEX_START_POSITION, &scratch)?;

        scratch.clear();
        scratch.write_i64::<BigEndian>(self.index_duration)?;
        write_item(&mut out, TAG_INDEX_DURATION, &scratch)?;

        Ok(out)
    }

    /// Emit the segment as a KLV set at the file's current position.
    /// Returns the total bytes written.
    pub fn write(&self, file: &mut MxfFile) -> Result<u64> {
        let value = self.write_value()?;
        let length = codec::encode_ber_length(value.len() as u64);
        file.write(labels::INDEX_TABLE_SEGMENT.as_bytes())?;
        file.write(&length)?;
        file.write(&value)?;
        Ok(16 + length.len() as u64 + value.len() as u64)
    }
}

fn write_item(out: &mut Vec<u8>, tag: u16, bytes: &[u8]) -> Result<()> {
    if bytes.len() > u16::MAX as usize {
        return Err(MxfError::InvalidSet(format!(
            "index item of {} bytes exceeds a local item",
            bytes.len()
        )));
    }
    out.write_u16::<BigEndian>(tag)?;
    out.write_u16::<BigEndian>(bytes.len() as u16)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn parse_delta_entries(item: &[u8]) -> Result<Vec<DeltaEntry>> {
    let mut cursor = Cursor::new(item);
    let (count, size) = codec::read_batch_header(&mut cursor)?;
    if size < 6 {
        return Err(MxfError::InvalidSet(format!(
            "delta entry size {} (expected >= 6)",
            size
        )));
    }
    let start = cursor.position() as usize;
    let needed = count as u64 * size as u64;
    if ((item.len() - start) as u64) < needed {
        return Err(MxfError::TruncatedValue {
            needed,
            available: (item.len() - start) as u64,
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let from = start + i * size as usize;
        let mut cursor = Cursor::new(&item[from..from + size as usize]);
        entries.push(DeltaEntry {
            pos_table_index: cursor.read_i8()?,
            slice: cursor.read_u8()?,
            element_delta: cursor.read_u32::<BigEndian>()?,
        });
    }
    Ok(entries)
}

fn encode_delta_entries(entries: &[DeltaEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    codec::write_batch_header(&mut out, entries.len() as u32, 6)?;
    for entry in entries {
        out.write_i8(entry.pos_table_index)?;
        out.write_u8(entry.slice)?;
        out.write_u32::<BigEndian>(entry.element_delta)?;
    }
    Ok(out)
}

fn parse_index_entries(item: &[u8]) -> Result<Vec<IndexEntry>> {
    let mut cursor = Cursor::new(item);
    let (count, size) = codec::read_batch_header(&mut cursor)?;
    if size < 11 {
        return Err(MxfError::InvalidSet(format!(
            "index entry size {} (expected >= 11)",
            size
        )));
    }
    let start = cursor.position() as usize;
    let needed = count as u64 * size as u64;
    if ((item.len() - start) as u64) < needed {
        return Err(MxfError::TruncatedValue {
            needed,
            available: (item.len() - start) as u64,
        });
    }

    let slice_count = ((size - 11) / 4) as usize;
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let from = start + i * size as usize;
        let mut cursor = Cursor::new(&item[from..from + size as usize]);
        let temporal_offset = cursor.read_i8()?;
        let key_frame_offset = cursor.read_i8()?;
        let flags = cursor.read_u8()?;
        let stream_offset = cursor.read_u64::<BigEndian>()?;
        let mut slice_offsets = Vec::with_capacity(slice_count);
        for _ in 0..slice_count {
            slice_offsets.push(cursor.read_u32::<BigEndian>()?);
        }
        entries.push(IndexEntry {
            temporal_offset,
            key_frame_offset,
            flags,
            stream_offset,
            slice_offsets,
        });
    }
    Ok(entries)
}

fn encode_index_entries(entries: &[IndexEntry], slice_count: u8) -> Result<Vec<u8>> {
    let size = 11 + slice_count as u32 * 4;
    let mut out = Vec::new();
    codec::write_batch_header(&mut out, entries.len() as u32, size)?;
    for entry in entries {
        if entry.slice_offsets.len() != slice_count as usize {
            return Err(MxfError::InvalidSet(format!(
                "index entry has {} slice offsets (segment declares {})",
                entry.slice_offsets.len(),
                slice_count
            )));
        }
        out.write_i8(entry.temporal_offset)?;
        out.write_i8(entry.key_frame_offset)?;
        out.write_u8(entry.flags)?;
        out.write_u64::<BigEndian>(entry.stream_offset)?;
        for slice_offset in &entry.slice_offsets {
            out.write_u32::<BigEndian>(*slice_offset)?;
        }
    }
    Ok(out)
}

/// Segments of one or more index streams, merged and queryable.
#[derive(Debug, Default)]
pub struct IndexTable {
    segments: Vec<IndexTableSegment>,
}

impl IndexTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged segments, ordered by stream then start position.
    pub fn segments(&self) -> &[IndexTableSegment] {
        &self.segments
    }

    /// Add a segment, keeping stream order and reporting timeline gaps
    /// or overlaps against its neighbours.
    pub fn add_segment(&mut self, segment: IndexTableSegment, diag: &mut dyn DiagnosticSink) {
        let key = (segment.body_sid, segment.index_sid, segment.index_start_position);
        let at = self
            .segments
            .partition_point(|s| (s.body_sid, s.index_sid, s.index_start_position) < key);

        if at > 0 {
            let previous = &self.segments[at - 1];
            if previous.body_sid == segment.body_sid
                && previous.index_sid == segment.index_sid
                && previous.end_position() != segment.index_start_position
            {
                diag.warning(format!(
                    "index timeline for body SID {} jumps from {} to {}",
                    segment.body_sid,
                    previous.end_position(),
                    segment.index_start_position
                ));
            }
        }

        self.segments.insert(at, segment);
    }

    /// Stream offset of an edit unit within a body stream.
    pub fn offset_for(&self, body_sid: u32, position: i64) -> Option<u64> {
        self.segments
            .iter()
            .filter(|s| s.body_sid == body_sid)
            .find_map(|s| s.offset_for(position))
    }
}
