//! Header metadata objects.
//!
//! A [`MetadataObject`] is one typed node of a partition's metadata
//! graph, parsed from a KLV local set against the primer and the type
//! registry. Strong references own child nodes in the same partition;
//! weak references are non-owning edges. Both are stored as the target
//! UUID plus an optional resolved arena handle that never extends the
//! target's lifetime.

use crate::codec;
use crate::diag::DiagnosticSink;
use crate::error::{MxfError, Result};
use crate::primer::Primer;
use crate::registry::{PropertyKind, ScalarKind, TypeDescriptor, TypeRegistry};
use crate::types::{Rational, Timestamp};
use crate::ul::{labels, Ul};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use uuid::Uuid;

/// Handle to a metadata object in its partition's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub usize);

/// A strong or weak reference edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    /// InstanceUID of the target object.
    pub uuid: Uuid,
    /// Arena handle of the target once resolved.
    pub target: Option<ObjId>,
}

impl Reference {
    /// An unresolved reference to `uuid`.
    pub fn to(uuid: Uuid) -> Self {
        Reference { uuid, target: None }
    }
}

/// Decoded value of one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Boolean(bool),
    Ul(Ul),
    Uuid(Uuid),
    Utf16(String),
    Timestamp(Timestamp),
    Rational(Rational),
    /// Bytes kept opaque: unknown tags and raw-typed properties.
    Raw(Vec<u8>),
    /// Batch of scalar values.
    Array(Vec<PropertyValue>),
    StrongRef(Reference),
    StrongRefArray(Vec<Reference>),
    WeakRef(Reference),
    WeakRefArray(Vec<Reference>),
}

/// One property of a metadata object.
#[derive(Debug, Clone)]
pub struct Property {
    /// The property's UL; [`Ul::ZERO`] when only the tag is known.
    pub ul: Ul,
    /// Registry name, or "Unknown".
    pub name: String,
    /// Local tag the property was read with (0 if built in memory).
    pub tag: u16,
    /// Decoded value.
    pub value: PropertyValue,
}

/// Location of a reference inside an object, for the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefSlot {
    /// Index into the object's property list.
    pub property: usize,
    /// Element index for reference batches.
    pub element: Option<usize>,
}

/// A typed node in a partition's metadata graph.
#[derive(Debug, Clone)]
pub struct MetadataObject {
    /// The set's UL.
    pub ul: Ul,
    /// Registry name of the type, or "Unknown".
    pub name: String,
    /// The object's identity for inter-object references.
    pub instance_uid: Option<Uuid>,
    /// Decoded properties.
    pub properties: Vec<Property>,
    /// Raw value bytes for sets whose UL is not in the registry; such
    /// objects are carried opaquely and re-emitted verbatim.
    pub opaque: Option<Vec<u8>>,
}

impl MetadataObject {
    /// Create an empty object of the given type.
    pub fn new(ul: Ul, name: impl Into<String>) -> Self {
        MetadataObject {
            ul,
            name: name.into(),
            instance_uid: None,
            properties: Vec::new(),
            opaque: None,
        }
    }

    /// Create an empty object of a registry type with a fresh
    /// InstanceUID.
    pub fn of_type(descriptor: &TypeDescriptor) -> Self {
        MetadataObject {
            ul: descriptor.ul,
            name: descriptor.name.clone(),
            instance_uid: Some(Uuid::new_v4()),
            properties: Vec::new(),
            opaque: None,
        }
    }

    /// Set (or replace) a property by its registry name.
    pub fn set_property(
        &mut self,
        descriptor: &TypeDescriptor,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        let property = descriptor
            .properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                MxfError::InvalidSet(format!("{} has no property {}", descriptor.name, name))
            })?;

        if let Some(existing) = self
            .properties
            .iter_mut()
            .find(|p| p.ul.matches(&property.ul))
        {
            existing.value = value;
            return Ok(());
        }

        self.properties.push(Property {
            ul: property.ul,
            name: property.name.clone(),
            tag: property.tag,
            value,
        });
        Ok(())
    }

    /// Find a property by registry name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a property by UL.
    pub fn property_by_ul(&self, ul: &Ul) -> Option<&Property> {
        self.properties.iter().find(|p| p.ul.matches(ul))
    }

    /// All reference slots in this object: `(slot, is_strong, uuid)`.
    pub fn reference_slots(&self) -> Vec<(RefSlot, bool, Uuid)> {
        let mut slots = Vec::new();
        for (index, property) in self.properties.iter().enumerate() {
            match &property.value {
                PropertyValue::StrongRef(r) => slots.push((
                    RefSlot {
                        property: index,
                        element: None,
                    },
                    true,
                    r.uuid,
                )),
                PropertyValue::WeakRef(r) => slots.push((
                    RefSlot {
                        property: index,
                        element: None,
                    },
                    false,
                    r.uuid,
                )),
                PropertyValue::StrongRefArray(refs) => {
                    for (element, r) in refs.iter().enumerate() {
                        slots.push((
                            RefSlot {
                                property: index,
                                element: Some(element),
                            },
                            true,
                            r.uuid,
                        ));
                    }
                }
                PropertyValue::WeakRefArray(refs) => {
                    for (element, r) in refs.iter().enumerate() {
                        slots.push((
                            RefSlot {
                                property: index,
                                element: Some(element),
                            },
                            false,
                            r.uuid,
                        ));
                    }
                }
                _ => {}
            }
        }
        slots
    }

    /// Mutable access to the reference in a slot.
    pub fn reference_mut(&mut self, slot: RefSlot) -> Option<&mut Reference> {
        let property = self.properties.get_mut(slot.property)?;
        match (&mut property.value, slot.element) {
            (PropertyValue::StrongRef(r), None) | (PropertyValue::WeakRef(r), None) => Some(r),
            (PropertyValue::StrongRefArray(refs), Some(i))
            | (PropertyValue::WeakRefArray(refs), Some(i)) => refs.get_mut(i),
            _ => None,
        }
    }

    /// Arena handles of all resolved strong reference targets, in
    /// property order.
    pub fn resolved_strong_targets(&self) -> Vec<ObjId> {
        self.reference_slots()
            .into_iter()
            .filter(|(_, strong, _)| *strong)
            .filter_map(|(slot, _, _)| {
                let property = &self.properties[slot.property];
                match (&property.value, slot.element) {
                    (PropertyValue::StrongRef(r), None) => r.target,
                    (PropertyValue::StrongRefArray(refs), Some(i)) => refs[i].target,
                    _ => None,
                }
            })
            .collect()
    }

    /// Parse a metadata set from the value bytes of its KLV.
    ///
    /// Inner items carry 2-byte primer tags with 2-byte lengths. A set
    /// whose UL is not in the registry is preserved opaquely with a
    /// warning; an unmapped tag becomes a raw property with a warning.
    pub fn parse_set(
        ul: Ul,
        value: &[u8],
        primer: &Primer,
        registry: &dyn TypeRegistry,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<MetadataObject> {
        let descriptor = match registry.lookup_ul(&ul) {
            Some(d) => d,
            None => {
                diag.warning(format!("{}", MxfError::UnknownUl(ul)));
                let mut object = MetadataObject::new(ul, "Unknown");
                object.opaque = Some(value.to_vec());
                // Still surface the identity so references to this
                // object can resolve
                object.instance_uid = scan_instance_uid(value, primer);
                return Ok(object);
            }
        };

        let mut object = MetadataObject::new(ul, descriptor.name.clone());
        let mut offset = 0usize;

        while offset < value.len() {
            if offset + 4 > value.len() {
                return Err(MxfError::InvalidSet(format!(
                    "truncated item header at value offset {}",
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

            let item_ul = match primer.lookup_by_tag(tag) {
                Some(ul) => *ul,
                None => {
                    diag.warning(format!("{} in {}", MxfError::UnknownTag(tag), object.name));
                    object.properties.push(Property {
                        ul: Ul::ZERO,
                        name: "Unknown".into(),
                        tag,
                        value: PropertyValue::Raw(item.to_vec()),
                    });
                    continue;
                }
            };

            if item_ul.matches(&labels::INSTANCE_UID) {
                if item.len() >= 16 {
                    object.instance_uid = Some(uuid_from(&item[..16]));
                } else {
                    diag.warning(format!("short InstanceUID in {}", object.name));
                }
                continue;
            }

            let (name, kind) = match descriptor.property_by_ul(&item_ul) {
                Some((_, p)) => (p.name.clone(), p.kind),
                None => {
                    diag.warning(format!(
                        "property {} not in layout of {}",
                        item_ul, object.name
                    ));
                    object.properties.push(Property {
                        ul: item_ul,
                        name: "Unknown".into(),
                        tag,
                        value: PropertyValue::Raw(item.to_vec()),
                    });
                    continue;
                }
            };

            let decoded = decode_property(kind, item)?;
            object.properties.push(Property {
                ul: item_ul,
                name,
                tag,
                value: decoded,
            });
        }

        Ok(object)
    }

    /// Serialise the object as local set value bytes.
    ///
    /// Properties are emitted in type-descriptor order; the primer is
    /// updated with every UL used. Opaque objects re-emit their
    /// original bytes.
    pub fn write_set(
        &self,
        registry: &dyn TypeRegistry,
        primer: &mut Primer,
    ) -> Result<Vec<u8>> {
        if let Some(raw) = &self.opaque {
            return Ok(raw.clone());
        }

        let descriptor = registry.lookup_ul(&self.ul);
        let mut out = Vec::new();

        if let Some(uuid) = &self.instance_uid {
            let tag = primer.tag_for_ul(&labels::INSTANCE_UID, 0x3c0a)?;
            write_item(&mut out, tag, uuid.as_bytes())?;
        }

        // Descriptor order; properties the descriptor does not know
        // keep their stored order at the end.
        let mut order: Vec<usize> = (0..self.properties.len()).collect();
        if let Some(descriptor) = descriptor {
            order.sort_by_key(|&i| {
                descriptor
                    .property_by_ul(&self.properties[i].ul)
                    .map(|(index, _)| index)
                    .unwrap_or(usize::MAX)
            });
        }

        for index in order {
            let property = &self.properties[index];
            let tag = if property.ul == Ul::ZERO {
                // Unknown tag preserved from parse: pass it through
                property.tag
            } else {
                let preferred = descriptor
                    .and_then(|d| d.property_by_ul(&property.ul))
                    .map(|(_, p)| p.tag)
                    .unwrap_or(property.tag);
                primer.tag_for_ul(&property.ul, preferred)?
            };

            let encoded = encode_property(&property.value)?;
            write_item(&mut out, tag, &encoded)?;
        }

        Ok(out)
    }
}

fn write_item(out: &mut Vec<u8>, tag: u16, bytes: &[u8]) -> Result<()> {
    if bytes.len() > u16::MAX as usize {
        return Err(MxfError::InvalidSet(format!(
            "property of {} bytes exceeds a local item",
            bytes.len()
        )));
    }
    out.write_u16::<BigEndian>(tag)?;
    out.write_u16::<BigEndian>(bytes.len() as u16)?;
    out.extend_from_slice(bytes);
    Ok(())
}

/// Pull an InstanceUID out of a set that cannot otherwise be parsed.
fn scan_instance_uid(value: &[u8], primer: &Primer) -> Option<Uuid> {
    let mut offset = 0usize;
    while offset + 4 <= value.len() {
        let tag = u16::from_be_bytes([value[offset], value[offset + 1]]);
        let length = u16::from_be_bytes([value[offset + 2], value[offset + 3]]) as usize;
        offset += 4;
        if offset + length > value.len() {
            return None;
        }
        if let Some(ul) = primer.lookup_by_tag(tag) {
            if ul.matches(&labels::INSTANCE_UID) && length >= 16 {
                return Some(uuid_from(&value[offset..offset + 16]));
            }
        }
        offset += length;
    }
    None
}

fn decode_property(kind: PropertyKind, bytes: &[u8]) -> Result<PropertyValue> {
    match kind {
        PropertyKind::Scalar(scalar) => decode_scalar(scalar, bytes),
        PropertyKind::Array(scalar) => {
            let mut cursor = Cursor::new(bytes);
            let (count, size) = codec::read_batch_header(&mut cursor)?;
            let start = cursor.position() as usize;
            let needed = count as u64 * size as u64;
            if ((bytes.len() - start) as u64) < needed {
                return Err(MxfError::TruncatedValue {
                    needed,
                    available: (bytes.len() - start) as u64,
                });
            }
            let mut elements = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let from = start + i * size as usize;
                elements.push(decode_scalar(scalar, &bytes[from..from + size as usize])?);
            }
            Ok(PropertyValue::Array(elements))
        }
        PropertyKind::StrongRef => Ok(PropertyValue::StrongRef(Reference::to(read_ref(bytes)?))),
        PropertyKind::WeakRef => Ok(PropertyValue::WeakRef(Reference::to(read_ref(bytes)?))),
        PropertyKind::StrongRefArray => Ok(PropertyValue::StrongRefArray(read_ref_batch(bytes)?)),
        PropertyKind::WeakRefArray => Ok(PropertyValue::WeakRefArray(read_ref_batch(bytes)?)),
    }
}

/// Build a UUID from a slice already known to hold 16 bytes.
fn uuid_from(bytes: &[u8]) -> Uuid {
    let mut array = [0u8; 16];
    array.copy_from_slice(&bytes[..16]);
    Uuid::from_bytes(array)
}

fn read_ref(bytes: &[u8]) -> Result<Uuid> {
    if bytes.len() < 16 {
        return Err(MxfError::TruncatedValue {
            needed: 16,
            available: bytes.len() as u64,
        });
    }
    Ok(uuid_from(bytes))
}

fn read_ref_batch(bytes: &[u8]) -> Result<Vec<Reference>> {
    let mut cursor = Cursor::new(bytes);
    let (count, size) = codec::read_batch_header(&mut cursor)?;
    if size != 16 {
        return Err(MxfError::InvalidSet(format!(
            "reference batch element size {} (expected 16)",
            size
        )));
    }
    let start = cursor.position() as usize;
    let needed = count as u64 * 16;
    if ((bytes.len() - start) as u64) < needed {
        return Err(MxfError::TruncatedValue {
            needed,
            available: (bytes.len() - start) as u64,
        });
    }

    let mut references = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let from = start + i * 16;
        references.push(Reference::to(uuid_from(&bytes[from..from + 16])));
    }
    Ok(references)
}

fn decode_scalar(kind: ScalarKind, bytes: &[u8]) -> Result<PropertyValue> {
    if let Some(size) = kind.wire_size() {
        if bytes.len() < size as usize {
            return Err(MxfError::TruncatedValue {
                needed: size as u64,
                available: bytes.len() as u64,
            });
        }
    }
    let mut cursor = Cursor::new(bytes);
    let value = match kind {
        ScalarKind::UInt8 => PropertyValue::UInt8(cursor.read_u8()?),
        ScalarKind::UInt16 => PropertyValue::UInt16(cursor.read_u16::<BigEndian>()?),
        ScalarKind::UInt32 => PropertyValue::UInt32(cursor.read_u32::<BigEndian>()?),
        ScalarKind::UInt64 => PropertyValue::UInt64(cursor.read_u64::<BigEndian>()?),
        ScalarKind::Int8 => PropertyValue::Int8(cursor.read_i8()?),
        ScalarKind::Int16 => PropertyValue::Int16(cursor.read_i16::<BigEndian>()?),
        ScalarKind::Int32 => PropertyValue::Int32(cursor.read_i32::<BigEndian>()?),
        ScalarKind::Int64 => PropertyValue::Int64(cursor.read_i64::<BigEndian>()?),
        ScalarKind::Boolean => PropertyValue::Boolean(cursor.read_u8()? != 0),
        ScalarKind::Ul => PropertyValue::Ul(codec::read_ul(&mut cursor)?),
        ScalarKind::Uuid => PropertyValue::Uuid(codec::read_uuid(&mut cursor)?),
        ScalarKind::Utf16 => PropertyValue::Utf16(decode_utf16be(bytes)),
        ScalarKind::Timestamp => PropertyValue::Timestamp(codec::read_timestamp(&mut cursor)?),
        ScalarKind::Rational => {
            let numerator = cursor.read_i32::<BigEndian>()?;
            let denominator = cursor.read_i32::<BigEndian>()?;
            PropertyValue::Rational(Rational::new(numerator, denominator))
        }
        ScalarKind::Raw => PropertyValue::Raw(bytes.to_vec()),
    };
    Ok(value)
}

fn encode_property(value: &PropertyValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match value {
        PropertyValue::Array(elements) => {
            let mut encoded = Vec::with_capacity(elements.len());
            for element in elements {
                encoded.push(encode_property(element)?);
            }
            let size = encoded.first().map(|e| e.len()).unwrap_or(0);
            if encoded.iter().any(|e| e.len() != size) {
                return Err(MxfError::InvalidSet(
                    "array elements of unequal size".into(),
                ));
            }
            codec::write_batch_header(&mut out, elements.len() as u32, size as u32)?;
            for element in encoded {
                out.extend_from_slice(&element);
            }
        }
        PropertyValue::StrongRef(r) | PropertyValue::WeakRef(r) => {
            out.extend_from_slice(r.uuid.as_bytes());
        }
        PropertyValue::StrongRefArray(refs) | PropertyValue::WeakRefArray(refs) => {
            codec::write_batch_header(&mut out, refs.len() as u32, 16)?;
            for r in refs {
                out.extend_from_slice(r.uuid.as_bytes());
            }
        }
        PropertyValue::UInt8(v) => out.write_u8(*v)?,
        PropertyValue::UInt16(v) => out.write_u16::<BigEndian>(*v)?,
        PropertyValue::UInt32(v) => out.write_u32::<BigEndian>(*v)?,
        PropertyValue::UInt64(v) => out.write_u64::<BigEndian>(*v)?,
        PropertyValue::Int8(v) => out.write_i8(*v)?,
        PropertyValue::Int16(v) => out.write_i16::<BigEndian>(*v)?,
        PropertyValue::Int32(v) => out.write_i32::<BigEndian>(*v)?,
        PropertyValue::Int64(v) => out.write_i64::<BigEndian>(*v)?,
        PropertyValue::Boolean(v) => out.write_u8(*v as u8)?,
        PropertyValue::Ul(ul) => out.extend_from_slice(ul.as_bytes()),
        PropertyValue::Uuid(uuid) => out.extend_from_slice(uuid.as_bytes()),
        PropertyValue::Utf16(text) => out.extend_from_slice(&encode_utf16be(text)),
        PropertyValue::Timestamp(ts) => out.extend_from_slice(&ts.to_bytes()),
        PropertyValue::Rational(r) => {
            out.write_i32::<BigEndian>(r.numerator)?;
            out.write_i32::<BigEndian>(r.denominator)?;
        }
        PropertyValue::Raw(bytes) => out.extend_from_slice(bytes),
    }
    Ok(out)
}

fn decode_utf16be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn encode_utf16be(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CollectSink;
    use crate::registry::StaticRegistry;

    fn primer_for(registry: &StaticRegistry, names: &[&str]) -> Primer {
        let mut primer = Primer::new();
        primer
            .insert(0x3c0a, labels::INSTANCE_UID)
            .unwrap();
        for name in names {
            let descriptor = registry.lookup_name(name).unwrap();
            for property in &descriptor.properties {
                primer.insert(property.tag, property.ul).unwrap();
            }
        }
        primer
    }

    #[test]
    fn test_build_and_serialise_roundtrip() {
        let registry = StaticRegistry::baseline();
        let descriptor = registry.lookup_name("TimelineTrack").unwrap();

        let mut track = MetadataObject::of_type(descriptor);
        track
            .set_property(descriptor, "TrackID", PropertyValue::UInt32(3))
            .unwrap();
        track
            .set_property(descriptor, "TrackName", PropertyValue::Utf16("V1".into()))
            .unwrap();
        track
            .set_property(
                descriptor,
                "EditRate",
                PropertyValue::Rational(Rational::new(25, 1)),
            )
            .unwrap();

        let mut primer = Primer::new();
        let bytes = track.write_set(&registry, &mut primer).unwrap();

        let mut sink = CollectSink::new();
        let parsed = MetadataObject::parse_set(
            labels::TIMELINE_TRACK,
            &bytes,
            &primer,
            &registry,
            &mut sink,
        )
        .unwrap();

        assert!(sink.warnings.is_empty());
        assert_eq!(parsed.instance_uid, track.instance_uid);
        assert_eq!(
            parsed.property("TrackID").unwrap().value,
            PropertyValue::UInt32(3)
        );
        assert_eq!(
            parsed.property("TrackName").unwrap().value,
            PropertyValue::Utf16("V1".into())
        );
        assert_eq!(
            parsed.property("EditRate").unwrap().value,
            PropertyValue::Rational(Rational::new(25, 1))
        );
    }

    #[test]
    fn test_parse_strong_ref() {
        let registry = StaticRegistry::baseline();
        let descriptor = registry.lookup_name("TimelineTrack").unwrap();
        let child_uuid = Uuid::new_v4();

        let mut track = MetadataObject::of_type(descriptor);
        track
            .set_property(
                descriptor,
                "Sequence",
                PropertyValue::StrongRef(Reference::to(child_uuid)),
            )
            .unwrap();

        let mut primer = Primer::new();
        let bytes = track.write_set(&registry, &mut primer).unwrap();

        let mut sink = CollectSink::new();
        let parsed = MetadataObject::parse_set(
            labels::TIMELINE_TRACK,
            &bytes,
            &primer,
            &registry,
            &mut sink,
        )
        .unwrap();

        let slots = parsed.reference_slots();
        assert_eq!(slots.len(), 1);
        let (slot, strong, uuid) = slots[0];
        assert!(strong);
        assert_eq!(uuid, child_uuid);
        assert_eq!(parsed.properties[slot.property].name, "Sequence");
    }

    #[test]
    fn test_unknown_set_kept_opaque() {
        let registry = StaticRegistry::baseline();
        let primer = primer_for(&registry, &[]);
        let unknown_ul = Ul([
            0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x77, 0x00,
        ]);
        let uuid = Uuid::new_v4();
        let mut value = vec![0x3c, 0x0a, 0x00, 0x10];
        value.extend_from_slice(uuid.as_bytes());

        let mut sink = CollectSink::new();
        let object =
            MetadataObject::parse_set(unknown_ul, &value, &primer, &registry, &mut sink).unwrap();

        assert_eq!(sink.warnings.len(), 1);
        assert_eq!(object.opaque.as_deref(), Some(&value[..]));
        // Identity still surfaced so references to it can resolve
        assert_eq!(object.instance_uid, Some(uuid));

        // Opaque objects re-emit their original bytes
        let mut primer_out = Primer::new();
        assert_eq!(object.write_set(&registry, &mut primer_out).unwrap(), value);
    }

    #[test]
    fn test_unknown_tag_kept_raw() {
        let registry = StaticRegistry::baseline();
        let primer = primer_for(&registry, &["Sequence"]);

        let mut value = vec![0x7f, 0x7f, 0x00, 0x03];
        value.extend_from_slice(&[0xaa, 0xbb, 0xcc]);

        let mut sink = CollectSink::new();
        let object = MetadataObject::parse_set(
            labels::SEQUENCE,
            &value,
            &primer,
            &registry,
            &mut sink,
        )
        .unwrap();

        assert_eq!(sink.warnings.len(), 1);
        assert_eq!(object.properties.len(), 1);
        assert_eq!(object.properties[0].tag, 0x7f7f);
        assert_eq!(
            object.properties[0].value,
            PropertyValue::Raw(vec![0xaa, 0xbb, 0xcc])
        );
    }

    #[test]
    fn test_truncated_item_rejected() {
        let registry = StaticRegistry::baseline();
        let primer = primer_for(&registry, &["Sequence"]);

        // Header says 10 bytes but only 2 follow
        let value = vec![0x02, 0x02, 0x00, 0x0a, 0x01, 0x02];
        let mut sink = CollectSink::new();
        assert!(matches!(
            MetadataObject::parse_set(labels::SEQUENCE, &value, &primer, &registry, &mut sink),
            Err(MxfError::TruncatedValue { .. })
        ));
    }

    #[test]
    fn test_descriptor_order_on_write() {
        let registry = StaticRegistry::baseline();
        let descriptor = registry.lookup_name("Sequence").unwrap();

        let mut sequence = MetadataObject::of_type(descriptor);
        // Insert out of descriptor order
        sequence
            .set_property(descriptor, "Duration", PropertyValue::Int64(50))
            .unwrap();
        sequence
            .set_property(
                descriptor,
                "DataDefinition",
                PropertyValue::Ul(labels::SEQUENCE),
            )
            .unwrap();

        let mut primer = Primer::new();
        let bytes = sequence.write_set(&registry, &mut primer).unwrap();

        // InstanceUID first, then DataDefinition (0x0201), then
        // Duration (0x0202)
        let first_tag = u16::from_be_bytes([bytes[0], bytes[1]]);
        assert_eq!(first_tag, 0x3c0a);
        let second_tag = u16::from_be_bytes([bytes[20], bytes[21]]);
        assert_eq!(second_tag, 0x0201);
    }

    #[test]
    fn test_utf16_roundtrip() {
        let text = "Ärger im Büro";
        let encoded = encode_utf16be(text);
        assert_eq!(decode_utf16be(&encoded), text);

        // Trailing NUL padding is stripped
        let mut padded = encoded.clone();
        padded.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode_utf16be(&padded), text);
    }
}
