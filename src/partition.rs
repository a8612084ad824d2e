//! MXF partitions.
//!
//! A partition is a top-level container: a partition pack, an optional
//! primer and header metadata graph, optional index table segments,
//! and optional essence. [`Partition`] owns its metadata objects in an
//! arena indexed by [`ObjId`]; dropping the partition drops all of its
//! sets.

use crate::codec;
use crate::diag::DiagnosticSink;
use crate::error::{MxfError, Result};
use crate::file::{FileRef, MxfFile, Position, UNKNOWN_POSITION};
use crate::index::{IndexTable, IndexTableSegment};
use crate::klv::{self, KlvCursor, READ_ALL};
use crate::metadata::{MetadataObject, ObjId};
use crate::primer::Primer;
use crate::resolve::{DeferredRef, Resolver};
use crate::ul::{labels, Ul};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Read};
use uuid::Uuid;

/// Partition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// Header partition (first in the file).
    Header,
    /// Body partition.
    Body,
    /// Footer partition (last in the file).
    Footer,
}

/// The partition pack: fixed-layout leading KLV of every partition.
///
/// The open/closed and incomplete/complete status bits live in the
/// pack's key. Transitions are monotonic: once a pack has been closed
/// or marked complete in a write session it stays that way.
#[derive(Debug, Clone)]
pub struct PartitionPack {
    /// Partition kind.
    pub kind: PartitionKind,
    closed: bool,
    complete: bool,
    /// Major version (1 for SMPTE 377).
    pub major_version: u16,
    /// Minor version.
    pub minor_version: u16,
    /// KLV alignment grid of this partition.
    pub kag_size: u32,
    /// Absolute byte offset of this partition.
    pub this_partition: u64,
    /// Absolute byte offset of the previous partition, or 0.
    pub previous_partition: u64,
    /// Absolute byte offset of the footer partition, or 0.
    pub footer_partition: u64,
    /// Bytes of header metadata (primer through last set).
    pub header_byte_count: u64,
    /// Bytes of index table segments.
    pub index_byte_count: u64,
    /// Stream ID of the index data in this partition.
    pub index_sid: u32,
    /// Byte offset of this partition's essence within its stream.
    pub body_offset: u64,
    /// Stream ID of the essence in this partition.
    pub body_sid: u32,
    /// Operational pattern label.
    pub operational_pattern: Ul,
    /// Essence container labels used in the file.
    pub essence_containers: Vec<Ul>,
}

impl PartitionPack {
    /// Create a pack of the given kind, open and incomplete.
    pub fn new(kind: PartitionKind) -> Self {
        PartitionPack {
            kind,
            closed: false,
            complete: false,
            major_version: 1,
            minor_version: 3,
            kag_size: 1,
            this_partition: 0,
            previous_partition: 0,
            footer_partition: 0,
            header_byte_count: 0,
            index_byte_count: 0,
            index_sid: 0,
            body_offset: 0,
            body_sid: 0,
            operational_pattern: labels::OP1A,
            essence_containers: Vec::new(),
        }
    }

    /// Check whether the partition is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check whether the partition is complete.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Close the partition. Sticky.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Mark the partition complete. Sticky.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// The pack key for the current kind and status.
    pub fn pack_ul(&self) -> Ul {
        match (self.kind, self.closed, self.complete) {
            (PartitionKind::Header, false, false) => labels::HEADER_PARTITION_OPEN_INCOMPLETE,
            (PartitionKind::Header, true, false) => labels::HEADER_PARTITION_CLOSED_INCOMPLETE,
            (PartitionKind::Header, false, true) => labels::HEADER_PARTITION_OPEN_COMPLETE,
            (PartitionKind::Header, true, true) => labels::HEADER_PARTITION_CLOSED_COMPLETE,
            (PartitionKind::Body, false, false) => labels::BODY_PARTITION_OPEN_INCOMPLETE,
            (PartitionKind::Body, true, false) => labels::BODY_PARTITION_CLOSED_INCOMPLETE,
            (PartitionKind::Body, false, true) => labels::BODY_PARTITION_OPEN_COMPLETE,
            (PartitionKind::Body, true, true) => labels::BODY_PARTITION_CLOSED_COMPLETE,
            (PartitionKind::Footer, _, false) => labels::FOOTER_PARTITION_CLOSED_INCOMPLETE,
            (PartitionKind::Footer, _, true) => labels::FOOTER_PARTITION_CLOSED_COMPLETE,
        }
    }

    /// Add an essence container label if not already present.
    pub fn add_essence_container(&mut self, ul: Ul) {
        if !self.essence_containers.iter().any(|e| e.matches(&ul)) {
            self.essence_containers.push(ul);
        }
    }

    /// Parse a pack from its key and value bytes.
    pub fn parse(key: &Ul, value: &[u8]) -> Result<PartitionPack> {
        if !key.is_partition_pack() {
            return Err(MxfError::InvalidPartition(format!(
                "{} is not a partition pack key",
                key
            )));
        }

        let kind = match key.as_bytes()[13] {
            0x02 => PartitionKind::Header,
            0x03 => PartitionKind::Body,
            0x04 => PartitionKind::Footer,
            other => {
                return Err(MxfError::InvalidPartition(format!(
                    "unknown partition kind 0x{:02x}",
                    other
                )))
            }
        };
        let status = key.as_bytes()[14];
        let closed = matches!(status, 0x02 | 0x04) || kind == PartitionKind::Footer;
        let complete = matches!(status, 0x03 | 0x04);

        if value.len() < 88 {
            return Err(MxfError::TruncatedValue {
                needed: 88,
                available: value.len() as u64,
            });
        }

        let mut cursor = Cursor::new(value);
        let major_version = cursor.read_u16::<BigEndian>()?;
        let minor_version = cursor.read_u16::<BigEndian>()?;
        let kag_size = cursor.read_u32::<BigEndian>()?;
        let this_partition = cursor.read_u64::<BigEndian>()?;
        let previous_partition = cursor.read_u64::<BigEndian>()?;
        let footer_partition = cursor.read_u64::<BigEndian>()?;
        let header_byte_count = cursor.read_u64::<BigEndian>()?;
        let index_byte_count = cursor.read_u64::<BigEndian>()?;
        let index_sid = cursor.read_u32::<BigEndian>()?;
        let body_offset = cursor.read_u64::<BigEndian>()?;
        let body_sid = cursor.read_u32::<BigEndian>()?;

        let mut op = [0u8; 16];
        cursor.read_exact(&mut op)?;
        let operational_pattern = Ul(op);

        let (count, size) = codec::read_batch_header(&mut cursor)?;
        let mut essence_containers = Vec::new();
        for _ in 0..count {
            if size == 16 {
                let mut ul = [0u8; 16];
                cursor.read_exact(&mut ul).map_err(|_| MxfError::TruncatedValue {
                    needed: count as u64 * 16,
                    available: value.len() as u64,
                })?;
                essence_containers.push(Ul(ul));
            } else {
                cursor.set_position(cursor.position() + size as u64);
            }
        }

        Ok(PartitionPack {
            kind,
            closed,
            complete,
            major_version,
            minor_version,
            kag_size,
            this_partition,
            previous_partition,
            footer_partition,
            header_byte_count,
            index_byte_count,
            index_sid,
            body_offset,
            body_sid,
            operational_pattern,
            essence_containers,
        })
    }

    /// Serialise the pack value.
    pub fn write_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size());
        out.write_u16::<BigEndian>(self.major_version)?;
        out.write_u16::<BigEndian>(self.minor_version)?;
        out.write_u32::<BigEndian>(self.kag_size)?;
        out.write_u64::<BigEndian>(self.this_partition)?;
        out.write_u64::<BigEndian>(self.previous_partition)?;
        out.write_u64::<BigEndian>(self.footer_partition)?;
        out.write_u64::<BigEndian>(self.header_byte_count)?;
        out.write_u64::<BigEndian>(self.index_byte_count)?;
        out.write_u32::<BigEndian>(self.index_sid)?;
        out.write_u64::<BigEndian>(self.body_offset)?;
        out.write_u32::<BigEndian>(self.body_sid)?;
        out.extend_from_slice(self.operational_pattern.as_bytes());
        codec::write_batch_header(&mut out, self.essence_containers.len() as u32, 16)?;
        for container in &self.essence_containers {
            out.extend_from_slice(container.as_bytes());
        }
        Ok(out)
    }

    /// Emit the pack as a KLV at the file's current position. Returns
    /// the total bytes written.
    pub fn write(&self, file: &mut MxfFile) -> Result<u64> {
        let value = self.write_value()?;
        let length = codec::encode_ber_length(value.len() as u64);
        file.write(self.pack_ul().as_bytes())?;
        file.write(&length)?;
        file.write(&value)?;
        Ok(16 + length.len() as u64 + value.len() as u64)
    }

    /// Total size of the pack KLV.
    pub fn size(&self) -> usize {
        let value_size = 88 + self.essence_containers.len() * 16;
        16 + codec::ber_length_size(value_size as u64) + value_size
    }
}

/// One partition: pack, primer, metadata graph, index and essence
/// access.
pub struct Partition {
    /// The partition pack.
    pub pack: PartitionPack,
    /// The primer, once parsed or built.
    pub primer: Option<Primer>,
    objects: Vec<MetadataObject>,
    all_metadata: Vec<ObjId>,
    top_level: Vec<ObjId>,
    resolver: Resolver,
    source: Option<FileRef>,
    source_offset: Position,
    body_location: u64,
    next_body_location: u64,
}

impl Partition {
    /// Create an in-memory partition around a pack.
    pub fn new(pack: PartitionPack) -> Self {
        Partition {
            pack,
            primer: None,
            objects: Vec::new(),
            all_metadata: Vec::new(),
            top_level: Vec::new(),
            resolver: Resolver::new(),
            source: None,
            source_offset: UNKNOWN_POSITION,
            body_location: 0,
            next_body_location: 0,
        }
    }

    /// Create an in-memory header partition.
    pub fn header() -> Self {
        Partition::new(PartitionPack::new(PartitionKind::Header))
    }

    /// Create an in-memory body partition.
    pub fn body() -> Self {
        Partition::new(PartitionPack::new(PartitionKind::Body))
    }

    /// Create an in-memory footer partition.
    pub fn footer() -> Self {
        let mut pack = PartitionPack::new(PartitionKind::Footer);
        pack.close();
        Partition::new(pack)
    }

    /// Parse a partition pack at the file's current position and wrap
    /// it. The file is left positioned after the pack.
    pub fn read_from(file: &FileRef) -> Result<Partition> {
        let start = file.borrow_mut().tell()?;
        let mut klv = KlvCursor::default();
        klv.set_source(file, start)?;
        klv.read_kl()?;

        let key = *klv
            .ul()
            .ok_or_else(|| MxfError::InvalidPartition("keyless KLV".into()))?;
        if !key.is_partition_pack() {
            return Err(MxfError::InvalidPartition(format!(
                "expected a partition pack at offset {}, found {}",
                start, key
            )));
        }

        klv.read_data(READ_ALL)?;
        let pack = PartitionPack::parse(&key, klv.data())?;
        file.borrow_mut().seek(klv.end_offset())?;

        let mut partition = Partition::new(pack);
        partition.source = Some(file.clone());
        partition.source_offset = start;
        Ok(partition)
    }

    /// Offset of the pack key in the source file.
    pub fn source_offset(&self) -> Position {
        self.source_offset
    }

    /// Set the KAG for this partition.
    pub fn set_kag(&mut self, kag: u32) {
        self.pack.kag_size = kag;
    }

    /// Check whether the partition is closed.
    pub fn is_closed(&self) -> bool {
        self.pack.is_closed()
    }

    /// Check whether the partition is complete.
    pub fn is_complete(&self) -> bool {
        self.pack.is_complete()
    }

    /// All metadata objects, in parse/add order.
    pub fn all_metadata(&self) -> &[ObjId] {
        &self.all_metadata
    }

    /// Metadata objects not strongly referenced by any other object in
    /// this partition.
    pub fn top_level_metadata(&self) -> &[ObjId] {
        &self.top_level
    }

    /// Access an object by handle.
    pub fn object(&self, id: ObjId) -> Option<&MetadataObject> {
        self.objects.get(id.0)
    }

    /// Mutable access to an object by handle.
    pub fn object_mut(&mut self, id: ObjId) -> Option<&mut MetadataObject> {
        self.objects.get_mut(id.0)
    }

    /// Handles of every object of the given set type.
    pub fn objects_of_type(&self, ul: &Ul) -> Vec<ObjId> {
        self.all_metadata
            .iter()
            .copied()
            .filter(|id| self.objects[id.0].ul.matches(ul))
            .collect()
    }

    /// Find an object by its InstanceUID.
    pub fn object_by_uuid(&self, uuid: &Uuid) -> Option<ObjId> {
        self.resolver.targets().get(uuid).copied()
    }

    /// Seen reference targets: InstanceUID to object handle.
    pub fn ref_targets(&self) -> &HashMap<Uuid, ObjId> {
        self.resolver.targets()
    }

    /// References that never found their target.
    pub fn unmatched_refs(&self) -> &[DeferredRef] {
        self.resolver.unmatched()
    }

    /// The object holding a strong reference to `child`, if any.
    pub fn find_link_parent(&self, child: ObjId) -> Option<ObjId> {
        self.all_metadata.iter().copied().find(|id| {
            self.objects[id.0]
                .resolved_strong_targets()
                .contains(&child)
        })
    }

    /// Add a metadata object, registering its identity and references.
    pub fn add_metadata(
        &mut self,
        object: MetadataObject,
        diag: &mut dyn DiagnosticSink,
    ) -> ObjId {
        let id = ObjId(self.objects.len());
        self.objects.push(object);
        self.all_metadata.push(id);

        if let Some(uuid) = self.objects[id.0].instance_uid {
            self.resolver
                .register_target(uuid, id, &mut self.objects, diag);
        }
        for (slot, strong, uuid) in self.objects[id.0].reference_slots() {
            self.resolver
                .register_reference(uuid, id, slot, strong, &mut self.objects);
        }

        self.update_top_level();
        id
    }

    /// Drop all header metadata, including the primer.
    pub fn clear_metadata(&mut self) {
        self.primer = None;
        self.objects.clear();
        self.all_metadata.clear();
        self.top_level.clear();
        self.resolver.clear();
    }

    fn update_top_level(&mut self) {
        let mut referenced: HashSet<ObjId> = HashSet::new();
        for id in &self.all_metadata {
            referenced.extend(self.objects[id.0].resolved_strong_targets());
        }
        self.top_level = self
            .all_metadata
            .iter()
            .copied()
            .filter(|id| !referenced.contains(id))
            .collect();
    }

    /// Resolve outstanding references and recompute top-level
    /// metadata. Dangling strong references fail the partition.
    pub fn finalize_metadata(&mut self, diag: &mut dyn DiagnosticSink) -> Result<()> {
        let outcome = self.resolver.finalize(&mut self.objects, diag);
        self.update_top_level();
        outcome
    }

    /// Read this partition's header metadata from its source file,
    /// using the pack's header byte count as the limit.
    pub fn read_metadata(
        &mut self,
        registry: &dyn crate::registry::TypeRegistry,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<u64> {
        let file = self
            .source
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        self.seek_after_pack(&file)?;

        // KAG fill between the pack and the primer is not part of the
        // header byte count
        let position = file.borrow_mut().tell()? as u64;
        let position = self.skip_fill(&file, position)?;
        file.borrow_mut().seek(position as Position)?;

        let size = self.pack.header_byte_count;
        self.read_metadata_from(&file, size, registry, diag)
    }

    /// Read header metadata KLVs from the file's current position.
    ///
    /// Stops once `size` bytes are consumed (0 means no byte limit) or
    /// the next KLV is not header metadata. The primer, if present,
    /// must be the first KLV. Returns the bytes consumed.
    pub fn read_metadata_from(
        &mut self,
        file: &FileRef,
        size: u64,
        registry: &dyn crate::registry::TypeRegistry,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<u64> {
        if self.source.is_none() {
            self.source = Some(file.clone());
        }
        let limit = if size == 0 { u64::MAX } else { size };
        let mut consumed: u64 = 0;

        while consumed < limit {
            let start = {
                let mut f = file.borrow_mut();
                if f.at_eof()? {
                    break;
                }
                f.tell()?
            };

            let mut klv = KlvCursor::default();
            klv.set_source(file, start)?;
            let kl_size = klv.read_kl()?;
            let key = *klv
                .ul()
                .ok_or_else(|| MxfError::InvalidPartition("keyless KLV in header".into()))?;
            let total = kl_size as u64 + klv.value_length() as u64;

            if key.is_fill() {
                file.borrow_mut().seek(klv.end_offset())?;
                consumed += total;
                continue;
            }

            if key.is_primer_pack() {
                if self.primer.is_some() || !self.all_metadata.is_empty() {
                    diag.warning(
                        "primer pack is not the first KLV of the header metadata".into(),
                    );
                }
                klv.read_data(READ_ALL)?;
                self.primer = Some(Primer::parse_value(klv.data())?);
                file.borrow_mut().seek(klv.end_offset())?;
                consumed += total;
                continue;
            }

            if key.is_metadata_set() {
                klv.read_data(READ_ALL)?;
                let empty = Primer::new();
                let primer = self.primer.as_ref().unwrap_or(&empty);
                let object =
                    MetadataObject::parse_set(key, klv.data(), primer, registry, diag)?;
                self.add_metadata(object, diag);
                file.borrow_mut().seek(klv.end_offset())?;
                consumed += total;
                continue;
            }

            // Not header metadata: rewind and stop
            file.borrow_mut().seek(start)?;
            break;
        }

        self.finalize_metadata(diag)?;
        Ok(consumed)
    }

    /// Write the pack and all header metadata at the file's current
    /// position, rebuilding the primer and fixing up the pack's byte
    /// counts. Returns the total bytes written.
    pub fn write(
        &mut self,
        file: &FileRef,
        registry: &dyn crate::registry::TypeRegistry,
    ) -> Result<u64> {
        let start = file.borrow_mut().tell()?;
        self.pack.this_partition = start as u64;
        self.source = Some(file.clone());
        self.source_offset = start;

        self.pack.header_byte_count = 0;
        self.pack.index_byte_count = 0;
        {
            let mut f = file.borrow_mut();
            self.pack.write(&mut f)?;
        }

        if !self.all_metadata.is_empty() || self.primer.is_some() {
            self.align(file)?;
            let metadata_start = file.borrow_mut().tell()?;

            let (primer, sets) = self.serialise_metadata(registry)?;
            {
                let mut f = file.borrow_mut();
                primer.write(&mut f)?;
            }
            for (ul, value) in &sets {
                self.align(file)?;
                let mut f = file.borrow_mut();
                f.write(ul.as_bytes())?;
                f.write(&codec::encode_ber_length(value.len() as u64))?;
                f.write(value)?;
            }
            self.primer = Some(primer);

            let metadata_end = file.borrow_mut().tell()?;
            self.pack.header_byte_count = (metadata_end - metadata_start) as u64;
        }

        let end = file.borrow_mut().tell()?;
        self.rewrite_pack(file)?;
        file.borrow_mut().seek(end)?;
        Ok((end - start) as u64)
    }

    /// Serialise the metadata graph: top-level objects in (type UL,
    /// InstanceUID) order, children breadth-first behind their
    /// parents, all against a freshly built primer.
    fn serialise_metadata(
        &self,
        registry: &dyn crate::registry::TypeRegistry,
    ) -> Result<(Primer, Vec<(Ul, Vec<u8>)>)> {
        let mut primer = Primer::new();
        let mut roots = self.top_level.clone();
        roots.sort_by_key(|id| {
            let object = &self.objects[id.0];
            (
                *object.ul.as_bytes(),
                object
                    .instance_uid
                    .map(|u| *u.as_bytes())
                    .unwrap_or([0u8; 16]),
            )
        });

        let mut queue: VecDeque<ObjId> = roots.into();
        let mut visited: HashSet<ObjId> = HashSet::new();
        let mut sets = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let object = &self.objects[id.0];
            sets.push((object.ul, object.write_set(registry, &mut primer)?));
            for child in object.resolved_strong_targets() {
                queue.push_back(child);
            }
        }

        Ok((primer, sets))
    }

    /// Rewrite the pack in place at its recorded offset.
    pub fn rewrite_pack(&self, file: &FileRef) -> Result<()> {
        if self.source_offset < 0 {
            return Err(MxfError::Unattached("pack offset"));
        }
        let mut f = file.borrow_mut();
        f.seek(self.source_offset)?;
        self.pack.write(&mut f)?;
        Ok(())
    }

    /// Pad with a KLV-Fill up to the next KAG boundary, relative to the
    /// partition start. Returns the fill bytes written.
    pub fn align(&self, file: &FileRef) -> Result<u64> {
        let mut f = file.borrow_mut();
        let position = (f.tell()? as u64).saturating_sub(self.pack.this_partition);
        match klv::fill_size_for(position, self.pack.kag_size) {
            Some(pad) => {
                klv::write_fill(&mut f, pad)?;
                Ok(pad)
            }
            None => Ok(0),
        }
    }

    /// Write index table segments after the metadata, updating the
    /// pack's index byte count. Returns the bytes written.
    pub fn write_index(
        &mut self,
        file: &FileRef,
        segments: &[IndexTableSegment],
    ) -> Result<u64> {
        self.align(file)?;
        let start = file.borrow_mut().tell()?;
        for segment in segments {
            self.align(file)?;
            let mut f = file.borrow_mut();
            segment.write(&mut f)?;
        }
        let end = file.borrow_mut().tell()?;
        self.pack.index_byte_count = (end - start) as u64;
        self.rewrite_pack(file)?;
        file.borrow_mut().seek(end)?;
        Ok((end - start) as u64)
    }

    /// Read any index table segments in this partition.
    pub fn read_index(&mut self, diag: &mut dyn DiagnosticSink) -> Result<Vec<IndexTableSegment>> {
        let file = self
            .source
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        self.seek_after_pack(&file)?;
        self.skip_bytes(&file, self.pack.header_byte_count)?;

        // KAG fill between the metadata and the first segment is not
        // part of the index byte count
        let position = file.borrow_mut().tell()? as u64;
        let position = self.skip_fill(&file, position)?;
        file.borrow_mut().seek(position as Position)?;

        self.read_index_from(&file, self.pack.index_byte_count, diag)
    }

    /// Read index segments from the file's current position, up to
    /// `size` bytes (0 means no byte limit) or the first KLV that is
    /// neither an index segment nor fill.
    pub fn read_index_from(
        &mut self,
        file: &FileRef,
        size: u64,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<Vec<IndexTableSegment>> {
        let limit = if size == 0 { u64::MAX } else { size };
        let mut consumed: u64 = 0;
        let mut segments = Vec::new();

        while consumed < limit {
            let start = {
                let mut f = file.borrow_mut();
                if f.at_eof()? {
                    break;
                }
                f.tell()?
            };

            let mut klv = KlvCursor::default();
            klv.set_source(file, start)?;
            let kl_size = klv.read_kl()?;
            let key = *klv
                .ul()
                .ok_or_else(|| MxfError::InvalidPartition("keyless KLV in index".into()))?;
            let total = kl_size as u64 + klv.value_length() as u64;

            if key.is_fill() {
                file.borrow_mut().seek(klv.end_offset())?;
                consumed += total;
                continue;
            }
            if key.is_index_segment() {
                klv.read_data(READ_ALL)?;
                segments.push(IndexTableSegment::parse_value(klv.data(), diag)?);
                file.borrow_mut().seek(klv.end_offset())?;
                consumed += total;
                continue;
            }

            file.borrow_mut().seek(start)?;
            break;
        }

        Ok(segments)
    }

    /// Read this partition's index segments into a merged table.
    /// Returns true if any segment was found.
    pub fn read_index_into(
        &mut self,
        table: &mut IndexTable,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<bool> {
        let segments = self.read_index(diag)?;
        let found = !segments.is_empty();
        for segment in segments {
            table.add_segment(segment, diag);
        }
        Ok(found)
    }

    /// Position the file at the first essence KLV of this partition.
    ///
    /// Skips the pack, primer, header metadata, index segments and any
    /// fill. Returns false if no essence precedes the next partition
    /// pack (or end of file).
    pub fn seek_essence(&mut self) -> Result<bool> {
        let file = self
            .source
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        self.seek_after_pack(&file)?;

        loop {
            let start = {
                let mut f = file.borrow_mut();
                if f.at_eof()? {
                    return Ok(false);
                }
                f.tell()?
            };

            let mut klv = KlvCursor::default();
            klv.set_source(&file, start)?;
            klv.read_kl()?;
            let key = *klv
                .ul()
                .ok_or_else(|| MxfError::InvalidPartition("keyless KLV in body".into()))?;

            if key.is_partition_pack() || key.is_rip() {
                file.borrow_mut().seek(start)?;
                return Ok(false);
            }
            if key.is_fill()
                || key.is_primer_pack()
                || key.is_metadata_set()
                || key.is_index_segment()
            {
                file.borrow_mut().seek(klv.end_offset())?;
                continue;
            }

            file.borrow_mut().seek(start)?;
            return Ok(true);
        }
    }

    /// Start sequential essence iteration. Returns false if the
    /// partition holds no essence.
    pub fn start_elements(&mut self) -> Result<bool> {
        if !self.seek_essence()? {
            return Ok(false);
        }
        let file = self
            .source
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        self.body_location = 0;
        self.next_body_location = file.borrow_mut().tell()? as u64;
        Ok(true)
    }

    /// Return a cursor for the current essence element and advance
    /// past it, or `None` once the next partition pack (or end of
    /// file) is reached.
    ///
    /// The element's value is not materialised; read it on demand
    /// through the cursor. A single interleaved KLV-Fill after the
    /// element is skipped; consecutive fill items are not iterated.
    pub fn next_element(&mut self) -> Result<Option<KlvCursor>> {
        let file = self
            .source
            .clone()
            .ok_or(MxfError::Unattached("source file"))?;
        self.body_location = self.next_body_location;

        {
            let mut f = file.borrow_mut();
            if self.body_location >= f.size()? {
                return Ok(None);
            }
            f.seek(self.body_location as Position)?;
        }

        let mut klv = KlvCursor::default();
        klv.set_source(&file, self.body_location as Position)?;
        klv.read_kl()?;
        let key = *klv
            .ul()
            .ok_or_else(|| MxfError::InvalidPartition("keyless KLV in body".into()))?;

        if key.is_partition_pack() || key.is_rip() {
            return Ok(None);
        }

        self.next_body_location = self.skip_fill(&file, klv.end_offset() as u64)?;
        Ok(Some(klv))
    }

    /// Skip a single KLV-Fill at `position`, returning the offset past
    /// it (or `position` unchanged if there is none).
    fn skip_fill(&self, file: &FileRef, position: u64) -> Result<u64> {
        {
            let mut f = file.borrow_mut();
            if position + 17 > f.size()? {
                return Ok(position);
            }
        }

        let mut klv = KlvCursor::default();
        klv.set_source(file, position as Position)?;
        match klv.read_kl() {
            Ok(_) => {}
            Err(MxfError::TruncatedKl { .. }) => return Ok(position),
            Err(e) => return Err(e),
        }
        match klv.ul() {
            Some(key) if key.is_fill() => Ok(klv.end_offset() as u64),
            _ => Ok(position),
        }
    }

    fn seek_after_pack(&self, file: &FileRef) -> Result<()> {
        if self.source_offset < 0 {
            return Err(MxfError::Unattached("pack offset"));
        }
        {
            let mut f = file.borrow_mut();
            f.seek(self.source_offset)?;
        }
        let mut klv = KlvCursor::default();
        klv.set_source(file, self.source_offset)?;
        klv.read_kl()?;
        file.borrow_mut().seek(klv.end_offset())?;
        Ok(())
    }

    /// Skip `count` bytes of fill-then-content from the current
    /// position, tolerating a leading fill not counted by the pack.
    fn skip_bytes(&self, file: &FileRef, count: u64) -> Result<()> {
        let position = file.borrow_mut().tell()? as u64;
        let position = self.skip_fill(file, position)?;
        file.borrow_mut().seek((position + count) as Position)?;
        Ok(())
    }
}

/// One entry of the random index pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipEntry {
    /// Body stream of the partition (0 for header and footer).
    pub body_sid: u32,
    /// Absolute byte offset of the partition pack.
    pub byte_offset: u64,
}

/// Random index pack: the partition directory at the end of the file.
#[derive(Debug, Clone, Default)]
pub struct RandomIndexPack {
    /// Entries in file order.
    pub entries: Vec<RipEntry>,
}

impl RandomIndexPack {
    /// Create an empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partition entry.
    pub fn add_entry(&mut self, body_sid: u32, byte_offset: u64) {
        self.entries.push(RipEntry {
            body_sid,
            byte_offset,
        });
    }

    /// Total size of the pack KLV.
    pub fn size(&self) -> usize {
        let value_size = self.entries.len() * 12 + 4;
        16 + codec::ber_length_size(value_size as u64) + value_size
    }

    /// Emit the pack at the file's current position. Returns the total
    /// bytes written.
    pub fn write(&self, file: &mut MxfFile) -> Result<u64> {
        let value_size = self.entries.len() * 12 + 4;
        let length = codec::encode_ber_length(value_size as u64);
        let overall = 16 + length.len() + value_size;

        let mut out = Vec::with_capacity(overall);
        out.extend_from_slice(labels::RANDOM_INDEX_PACK.as_bytes());
        out.extend_from_slice(&length);
        for entry in &self.entries {
            out.write_u32::<BigEndian>(entry.body_sid)?;
            out.write_u64::<BigEndian>(entry.byte_offset)?;
        }
        out.write_u32::<BigEndian>(overall as u32)?;

        file.write(&out)?;
        Ok(overall as u64)
    }

    /// Parse a pack from its complete KLV bytes (key through trailing
    /// overall length).
    pub fn parse(data: &[u8]) -> Result<RandomIndexPack> {
        if data.len() < 16 + 1 + 4 {
            return Err(MxfError::TruncatedValue {
                needed: 21,
                available: data.len() as u64,
            });
        }
        let key = Ul::from_slice(&data[..16])
            .ok_or_else(|| MxfError::InvalidPartition("short RIP key".into()))?;
        if !key.is_rip() {
            return Err(MxfError::InvalidPartition(format!(
                "{} is not a random index pack key",
                key
            )));
        }

        let (value_length, len_size) = codec::decode_ber_length(&data[16..])?;
        let value_start = 16 + len_size;
        if value_length < 4 {
            return Err(MxfError::InvalidPartition(
                "random index pack too short for its overall length".into(),
            ));
        }
        if ((data.len() - value_start) as u64) < value_length {
            return Err(MxfError::TruncatedValue {
                needed: value_length,
                available: (data.len() - value_start) as u64,
            });
        }

        let entry_count = (value_length as usize - 4) / 12;
        let mut entries = Vec::with_capacity(entry_count);
        let mut cursor = Cursor::new(&data[value_start..]);
        for _ in 0..entry_count {
            let body_sid = cursor.read_u32::<BigEndian>()?;
            let byte_offset = cursor.read_u64::<BigEndian>()?;
            entries.push(RipEntry {
                body_sid,
                byte_offset,
            });
        }

        Ok(RandomIndexPack { entries })
    }
}
