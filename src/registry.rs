//! Type registry: read-only dictionary of metadata set layouts.
//!
//! The registry maps set ULs to [`TypeDescriptor`]s that drive local
//! set parsing and serialisation. Dictionaries are supplied externally
//! through the [`TypeRegistry`] trait; [`StaticRegistry`] is an
//! in-memory implementation with a builder, and
//! [`StaticRegistry::baseline`] carries the standard structural sets.

use crate::ul::{labels, Ul, UlBytes};
use std::collections::HashMap;

/// Wire type of a scalar property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Boolean,
    /// 16-byte universal label.
    Ul,
    /// 16-byte UUID.
    Uuid,
    /// UTF-16BE string.
    Utf16,
    /// 8-byte timestamp.
    Timestamp,
    /// Two 4-byte signed integers, numerator then denominator.
    Rational,
    /// Opaque bytes.
    Raw,
}

impl ScalarKind {
    /// Fixed wire size in bytes, or `None` for variable-size kinds.
    pub fn wire_size(&self) -> Option<u32> {
        match self {
            ScalarKind::UInt8 | ScalarKind::Int8 | ScalarKind::Boolean => Some(1),
            ScalarKind::UInt16 | ScalarKind::Int16 => Some(2),
            ScalarKind::UInt32 | ScalarKind::Int32 => Some(4),
            ScalarKind::UInt64 | ScalarKind::Int64 | ScalarKind::Timestamp => Some(8),
            ScalarKind::Rational => Some(8),
            ScalarKind::Ul | ScalarKind::Uuid => Some(16),
            ScalarKind::Utf16 | ScalarKind::Raw => None,
        }
    }
}

/// Shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Single scalar value.
    Scalar(ScalarKind),
    /// Batch of scalars behind a count/size header.
    Array(ScalarKind),
    /// UUID of an owned child object in the same partition.
    StrongRef,
    /// Batch of UUIDs of owned child objects.
    StrongRefArray,
    /// UUID of an unowned peer object.
    WeakRef,
    /// Batch of UUIDs of unowned peer objects.
    WeakRefArray,
}

/// One property of a metadata set.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// The property's UL.
    pub ul: Ul,
    /// Registry name.
    pub name: String,
    /// Static local tag, or 0 for dynamically assigned tags.
    pub tag: u16,
    /// Wire shape.
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    /// Describe a scalar property.
    pub fn scalar(name: impl Into<String>, ul: Ul, tag: u16, kind: ScalarKind) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::Scalar(kind),
        }
    }

    /// Describe a batch property.
    pub fn array(name: impl Into<String>, ul: Ul, tag: u16, kind: ScalarKind) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::Array(kind),
        }
    }

    /// Describe a strong reference property.
    pub fn strong_ref(name: impl Into<String>, ul: Ul, tag: u16) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::StrongRef,
        }
    }

    /// Describe a strong reference batch property.
    pub fn strong_ref_array(name: impl Into<String>, ul: Ul, tag: u16) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::StrongRefArray,
        }
    }

    /// Describe a weak reference property.
    pub fn weak_ref(name: impl Into<String>, ul: Ul, tag: u16) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::WeakRef,
        }
    }

    /// Describe a weak reference batch property.
    pub fn weak_ref_array(name: impl Into<String>, ul: Ul, tag: u16) -> Self {
        PropertyDescriptor {
            ul,
            name: name.into(),
            tag,
            kind: PropertyKind::WeakRefArray,
        }
    }
}

/// Layout of one metadata set type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// The set's UL.
    pub ul: Ul,
    /// Registry name.
    pub name: String,
    /// Properties in serialisation order.
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>, ul: Ul, properties: Vec<PropertyDescriptor>) -> Self {
        TypeDescriptor {
            ul,
            name: name.into(),
            properties,
        }
    }

    /// Find a property by UL, with its serialisation index.
    pub fn property_by_ul(&self, ul: &Ul) -> Option<(usize, &PropertyDescriptor)> {
        self.properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.ul.matches(ul))
    }
}

/// Read-only lookup of set layouts by UL and by name.
pub trait TypeRegistry {
    /// Look up a descriptor by set UL (effective equality).
    fn lookup_ul(&self, ul: &Ul) -> Option<&TypeDescriptor>;

    /// Look up a descriptor by registry name.
    fn lookup_name(&self, name: &str) -> Option<&TypeDescriptor>;
}

/// In-memory registry.
pub struct StaticRegistry {
    types: Vec<TypeDescriptor>,
    by_ul: HashMap<UlBytes, usize>,
    by_name: HashMap<String, usize>,
}

impl StaticRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { types: Vec::new() }
    }

    /// The standard structural metadata dictionary.
    pub fn baseline() -> StaticRegistry {
        baseline_types()
    }
}

impl TypeRegistry for StaticRegistry {
    fn lookup_ul(&self, ul: &Ul) -> Option<&TypeDescriptor> {
        self.by_ul.get(&ul.masked_bytes()).map(|i| &self.types[*i])
    }

    fn lookup_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).map(|i| &self.types[*i])
    }
}

/// Builder for [`StaticRegistry`].
pub struct RegistryBuilder {
    types: Vec<TypeDescriptor>,
}

impl RegistryBuilder {
    /// Add a set type. A later descriptor with the same UL replaces an
    /// earlier one.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Finish the registry.
    pub fn build(self) -> StaticRegistry {
        let mut by_ul = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, descriptor) in self.types.iter().enumerate() {
            by_ul.insert(descriptor.ul.masked_bytes(), index);
            by_name.insert(descriptor.name.clone(), index);
        }
        StaticRegistry {
            types: self.types,
            by_ul,
            by_name,
        }
    }
}

fn baseline_types() -> StaticRegistry {
    use PropertyDescriptor as P;
    use ScalarKind as S;

    let generation_uid = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x08, 0x00, 0x00,
        0x00,
    ]);

    StaticRegistry::builder()
        .with_type(TypeDescriptor::new(
            "Preface",
            labels::PREFACE,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar("GenerationUID", generation_uid, 0x0102, S::Uuid),
                P::scalar(
                    "LastModifiedDate",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10,
                        0x02, 0x04, 0x00, 0x00,
                    ]),
                    0x3b02,
                    S::Timestamp,
                ),
                P::scalar(
                    "Version",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x01,
                        0x05, 0x00, 0x00, 0x00,
                    ]),
                    0x3b05,
                    S::UInt16,
                ),
                P::strong_ref(
                    "ContentStorage",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x02, 0x01, 0x00, 0x00,
                    ]),
                    0x3b03,
                ),
                P::strong_ref_array(
                    "Identifications",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x06, 0x04, 0x00, 0x00,
                    ]),
                    0x3b06,
                ),
                P::weak_ref(
                    "PrimaryPackage",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x06, 0x01, 0x01, 0x04,
                        0x01, 0x08, 0x00, 0x00,
                    ]),
                    0x3b08,
                ),
                P::scalar(
                    "OperationalPattern",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x01, 0x02, 0x02, 0x03,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x3b09,
                    S::Ul,
                ),
                P::array(
                    "EssenceContainers",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x01, 0x02, 0x02, 0x10,
                        0x02, 0x01, 0x00, 0x00,
                    ]),
                    0x3b0a,
                    S::Ul,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "Identification",
            labels::IDENTIFICATION,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar(
                    "ThisGenerationUID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01,
                        0x01, 0x00, 0x00, 0x00,
                    ]),
                    0x3c09,
                    S::Uuid,
                ),
                P::scalar(
                    "CompanyName",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01,
                        0x02, 0x01, 0x00, 0x00,
                    ]),
                    0x3c01,
                    S::Utf16,
                ),
                P::scalar(
                    "ProductName",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01,
                        0x03, 0x01, 0x00, 0x00,
                    ]),
                    0x3c02,
                    S::Utf16,
                ),
                P::scalar(
                    "VersionString",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01,
                        0x05, 0x01, 0x00, 0x00,
                    ]),
                    0x3c04,
                    S::Utf16,
                ),
                P::scalar(
                    "ProductUID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01,
                        0x07, 0x00, 0x00, 0x00,
                    ]),
                    0x3c05,
                    S::Uuid,
                ),
                P::scalar(
                    "ModificationDate",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10,
                        0x02, 0x03, 0x00, 0x00,
                    ]),
                    0x3c06,
                    S::Timestamp,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "ContentStorage",
            labels::CONTENT_STORAGE,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::strong_ref_array(
                    "Packages",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x05, 0x01, 0x00, 0x00,
                    ]),
                    0x1901,
                ),
                P::strong_ref_array(
                    "EssenceContainerData",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x05, 0x02, 0x00, 0x00,
                    ]),
                    0x1902,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "EssenceContainerData",
            labels::ESSENCE_CONTAINER_DATA,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar(
                    "LinkedPackageUID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x06,
                        0x01, 0x00, 0x00, 0x00,
                    ]),
                    0x2701,
                    S::Raw,
                ),
                P::scalar(
                    "IndexSID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x01, 0x03, 0x04, 0x05,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x3f06,
                    S::UInt32,
                ),
                P::scalar(
                    "BodySID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x01, 0x03, 0x04, 0x04,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x3f07,
                    S::UInt32,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "MaterialPackage",
            labels::MATERIAL_PACKAGE,
            package_properties(false),
        ))
        .with_type(TypeDescriptor::new(
            "SourcePackage",
            labels::SOURCE_PACKAGE,
            package_properties(true),
        ))
        .with_type(TypeDescriptor::new(
            "TimelineTrack",
            labels::TIMELINE_TRACK,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar(
                    "TrackID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x07, 0x01, 0x01,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x4801,
                    S::UInt32,
                ),
                P::scalar(
                    "TrackNumber",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x04, 0x01, 0x03,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x4804,
                    S::UInt32,
                ),
                P::scalar(
                    "TrackName",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x07, 0x01, 0x02,
                        0x01, 0x00, 0x00, 0x00,
                    ]),
                    0x4802,
                    S::Utf16,
                ),
                P::scalar(
                    "EditRate",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x30, 0x04, 0x05,
                        0x00, 0x00, 0x00, 0x00,
                    ]),
                    0x4b01,
                    S::Rational,
                ),
                P::scalar(
                    "Origin",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x03,
                        0x01, 0x03, 0x00, 0x00,
                    ]),
                    0x4b02,
                    S::Int64,
                ),
                P::strong_ref(
                    "Sequence",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x02, 0x04, 0x00, 0x00,
                    ]),
                    0x4803,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "Sequence",
            labels::SEQUENCE,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar("DataDefinition", data_definition_ul(), 0x0201, S::Ul),
                P::scalar("Duration", duration_ul(), 0x0202, S::Int64),
                P::strong_ref_array(
                    "StructuralComponents",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04,
                        0x06, 0x09, 0x00, 0x00,
                    ]),
                    0x1001,
                ),
            ],
        ))
        .with_type(TypeDescriptor::new(
            "SourceClip",
            labels::SOURCE_CLIP,
            vec![
                P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
                P::scalar("DataDefinition", data_definition_ul(), 0x0201, S::Ul),
                P::scalar("Duration", duration_ul(), 0x0202, S::Int64),
                P::scalar(
                    "StartPosition",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x03,
                        0x01, 0x04, 0x00, 0x00,
                    ]),
                    0x1201,
                    S::Int64,
                ),
                P::scalar(
                    "SourcePackageID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x03,
                        0x01, 0x00, 0x00, 0x00,
                    ]),
                    0x1101,
                    S::Raw,
                ),
                P::scalar(
                    "SourceTrackID",
                    Ul([
                        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x03,
                        0x02, 0x00, 0x00, 0x00,
                    ]),
                    0x1102,
                    S::UInt32,
                ),
            ],
        ))
        .build()
}

fn data_definition_ul() -> Ul {
    Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x07, 0x01, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ])
}

fn duration_ul() -> Ul {
    Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x02, 0x01, 0x01, 0x03, 0x00,
        0x00,
    ])
}

fn package_properties(with_descriptor: bool) -> Vec<PropertyDescriptor> {
    use PropertyDescriptor as P;
    use ScalarKind as S;

    let mut properties = vec![
        P::scalar("InstanceUID", labels::INSTANCE_UID, 0x3c0a, S::Uuid),
        P::scalar(
            "PackageUID",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x15, 0x10, 0x00,
                0x00, 0x00, 0x00,
            ]),
            0x4401,
            S::Raw,
        ),
        P::scalar(
            "Name",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x03, 0x03, 0x02, 0x01,
                0x00, 0x00, 0x00,
            ]),
            0x4402,
            S::Utf16,
        ),
        P::scalar(
            "PackageCreationDate",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x01,
                0x03, 0x00, 0x00,
            ]),
            0x4405,
            S::Timestamp,
        ),
        P::scalar(
            "PackageModifiedDate",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x02,
                0x05, 0x00, 0x00,
            ]),
            0x4404,
            S::Timestamp,
        ),
        P::strong_ref_array(
            "Tracks",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x06,
                0x05, 0x00, 0x00,
            ]),
            0x4403,
        ),
    ];

    if with_descriptor {
        properties.push(P::strong_ref(
            "Descriptor",
            Ul([
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x02,
                0x03, 0x00, 0x00,
            ]),
            0x4701,
        ));
    }
    properties
}
