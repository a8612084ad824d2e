//! Universal Label (UL) types.
//!
//! Universal Labels are 16-byte SMPTE-registered identifiers naming
//! every element in an MXF file. Two labels of the same family compare
//! equal under an effective equality that ignores designated version
//! bytes; [`Ul::matches`] is the single canonical comparison and every
//! key test in this crate goes through it or a predicate built on it.

use std::fmt;

/// Raw bytes of a universal label.
pub type UlBytes = [u8; 16];

/// A 16-byte universal label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ul(pub UlBytes);

impl Ul {
    /// The all-zero label, used for properties with no known UL.
    pub const ZERO: Ul = Ul([0; 16]);

    /// SMPTE label prefix.
    pub const SMPTE_PREFIX: [u8; 4] = [0x06, 0x0e, 0x2b, 0x34];

    /// Create from raw bytes.
    pub fn new(bytes: UlBytes) -> Self {
        Ul(bytes)
    }

    /// Create from a slice, if it holds exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: UlBytes = bytes.try_into().ok()?;
        Some(Ul(array))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &UlBytes {
        &self.0
    }

    /// Check if this is a SMPTE-registered label.
    pub fn is_smpte(&self) -> bool {
        self.0[0..4] == Self::SMPTE_PREFIX
    }

    /// Get the category code (byte 5).
    pub fn category(&self) -> u8 {
        self.0[4]
    }

    /// Get the registry designator (byte 6).
    pub fn registry(&self) -> u8 {
        self.0[5]
    }

    /// Get the version (byte 8).
    pub fn version(&self) -> u8 {
        self.0[7]
    }

    /// Effective equality.
    ///
    /// For SMPTE-registered labels the version byte (index 7) is
    /// ignored; all other labels compare exactly. Reflexive and
    /// symmetric; transitive because the mask depends only on the
    /// fixed prefix.
    pub fn matches(&self, other: &Ul) -> bool {
        self.matches_prefix(other, 16)
    }

    /// Effective equality over the first `len` bytes only.
    ///
    /// Family predicates use this to test a label against a family
    /// base whose trailing bytes vary.
    pub fn matches_prefix(&self, other: &Ul, len: usize) -> bool {
        let masked = self.is_smpte() && other.is_smpte();
        for i in 0..len.min(16) {
            if masked && i == 7 {
                continue;
            }
            if self.0[i] != other.0[i] {
                return false;
            }
        }
        true
    }

    /// Bytes with the version byte zeroed for SMPTE labels.
    ///
    /// Suitable as a hash key consistent with [`Ul::matches`].
    pub fn masked_bytes(&self) -> UlBytes {
        let mut bytes = self.0;
        if self.is_smpte() {
            bytes[7] = 0;
        }
        bytes
    }

    /// Check if this is a partition pack key of any kind or status.
    pub fn is_partition_pack(&self) -> bool {
        // Primer pack shares the prefix with byte 13 = 0x05
        self.matches_prefix(&labels::PARTITION_PACK_BASE, 13)
            && (0x02..=0x04).contains(&self.0[13])
    }

    /// Check if this is a primer pack key.
    pub fn is_primer_pack(&self) -> bool {
        self.matches_prefix(&labels::PRIMER_PACK, 15)
    }

    /// Check if this is a KLV-Fill key.
    pub fn is_fill(&self) -> bool {
        self.matches_prefix(&labels::FILL_ITEM, 13)
    }

    /// Check if this is an index table segment key.
    pub fn is_index_segment(&self) -> bool {
        self.matches_prefix(&labels::INDEX_TABLE_SEGMENT, 15)
    }

    /// Check if this is a random index pack key.
    pub fn is_rip(&self) -> bool {
        self.matches_prefix(&labels::RANDOM_INDEX_PACK, 15)
    }

    /// Check if this is a header metadata set key.
    ///
    /// Groups carry category 0x02; partition machinery keys share that
    /// category and are excluded.
    pub fn is_metadata_set(&self) -> bool {
        self.is_smpte()
            && self.category() == 0x02
            && !self.is_partition_pack()
            && !self.is_primer_pack()
            && !self.is_index_segment()
            && !self.is_rip()
    }

    /// Check if this is an essence element key.
    pub fn is_essence_element(&self) -> bool {
        self.is_smpte() && self.category() == 0x01 && !self.is_fill()
    }

    /// Classify the label.
    pub fn kind(&self) -> LabelKind {
        if self.is_partition_pack() {
            LabelKind::PartitionPack
        } else if self.is_primer_pack() {
            LabelKind::PrimerPack
        } else if self.is_fill() {
            LabelKind::FillItem
        } else if self.is_index_segment() {
            LabelKind::IndexTable
        } else if self.is_rip() {
            LabelKind::RandomIndexPack
        } else if self.is_essence_element() {
            LabelKind::EssenceElement
        } else if self.is_metadata_set() {
            LabelKind::MetadataSet
        } else {
            LabelKind::Unknown
        }
    }
}

impl fmt::Debug for Ul {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UL(")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Ul {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:smpte:ul:")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl From<UlBytes> for Ul {
    fn from(bytes: UlBytes) -> Self {
        Ul(bytes)
    }
}

/// Kind of universal label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Partition pack.
    PartitionPack,
    /// Primer pack.
    PrimerPack,
    /// Fill item (KLV fill).
    FillItem,
    /// Index table segment.
    IndexTable,
    /// Random index pack.
    RandomIndexPack,
    /// Essence element.
    EssenceElement,
    /// Metadata set.
    MetadataSet,
    /// Unknown.
    Unknown,
}

/// Well-known universal labels.
pub mod labels {
    use super::Ul;

    /// Partition pack base (bytes 13..16 vary with kind and status).
    pub const PARTITION_PACK_BASE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00,
        0x00,
    ]);

    /// Header partition, open incomplete.
    pub const HEADER_PARTITION_OPEN_INCOMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x02, 0x01,
        0x00,
    ]);

    /// Header partition, closed incomplete.
    pub const HEADER_PARTITION_CLOSED_INCOMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x02, 0x02,
        0x00,
    ]);

    /// Header partition, open complete.
    pub const HEADER_PARTITION_OPEN_COMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x02, 0x03,
        0x00,
    ]);

    /// Header partition, closed complete.
    pub const HEADER_PARTITION_CLOSED_COMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x02, 0x04,
        0x00,
    ]);

    /// Body partition, open incomplete.
    pub const BODY_PARTITION_OPEN_INCOMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x03, 0x01,
        0x00,
    ]);

    /// Body partition, closed incomplete.
    pub const BODY_PARTITION_CLOSED_INCOMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x03, 0x02,
        0x00,
    ]);

    /// Body partition, open complete.
    pub const BODY_PARTITION_OPEN_COMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x03, 0x03,
        0x00,
    ]);

    /// Body partition, closed complete.
    pub const BODY_PARTITION_CLOSED_COMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x03, 0x04,
        0x00,
    ]);

    /// Footer partition, closed incomplete.
    pub const FOOTER_PARTITION_CLOSED_INCOMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x04, 0x02,
        0x00,
    ]);

    /// Footer partition, closed complete.
    pub const FOOTER_PARTITION_CLOSED_COMPLETE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x04, 0x04,
        0x00,
    ]);

    /// Primer pack.
    pub const PRIMER_PACK: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x05, 0x01,
        0x00,
    ]);

    /// Fill item.
    pub const FILL_ITEM: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00,
        0x00,
    ]);

    /// Index table segment.
    pub const INDEX_TABLE_SEGMENT: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01,
        0x00,
    ]);

    /// Random index pack.
    pub const RANDOM_INDEX_PACK: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x11, 0x01,
        0x00,
    ]);

    /// Op1a operational pattern.
    pub const OP1A: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01,
        0x00,
    ]);

    /// InstanceUID property.
    pub const INSTANCE_UID: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x15, 0x02, 0x00, 0x00, 0x00,
        0x00,
    ]);

    // Structural metadata sets

    /// Preface (root of the metadata tree).
    pub const PREFACE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x2f,
        0x00,
    ]);

    /// Identification.
    pub const IDENTIFICATION: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x30,
        0x00,
    ]);

    /// Content storage.
    pub const CONTENT_STORAGE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x18,
        0x00,
    ]);

    /// Essence container data.
    pub const ESSENCE_CONTAINER_DATA: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x23,
        0x00,
    ]);

    /// Material package.
    pub const MATERIAL_PACKAGE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x36,
        0x00,
    ]);

    /// Source package.
    pub const SOURCE_PACKAGE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x37,
        0x00,
    ]);

    /// Timeline track.
    pub const TIMELINE_TRACK: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x3b,
        0x00,
    ]);

    /// Sequence.
    pub const SEQUENCE: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x0f,
        0x00,
    ]);

    /// Source clip.
    pub const SOURCE_CLIP: Ul = Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01, 0x01, 0x11,
        0x00,
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_predicates() {
        assert!(labels::PRIMER_PACK.is_primer_pack());
        assert!(!labels::PRIMER_PACK.is_partition_pack());

        assert!(labels::HEADER_PARTITION_CLOSED_COMPLETE.is_partition_pack());
        assert!(labels::FOOTER_PARTITION_CLOSED_COMPLETE.is_partition_pack());
        assert!(labels::FILL_ITEM.is_fill());
        assert!(labels::INDEX_TABLE_SEGMENT.is_index_segment());
        assert!(labels::RANDOM_INDEX_PACK.is_rip());
    }

    #[test]
    fn test_metadata_set_excludes_machinery() {
        assert!(labels::PREFACE.is_metadata_set());
        assert!(!labels::PRIMER_PACK.is_metadata_set());
        assert!(!labels::HEADER_PARTITION_OPEN_INCOMPLETE.is_metadata_set());
        assert!(!labels::INDEX_TABLE_SEGMENT.is_metadata_set());
        assert!(!labels::RANDOM_INDEX_PACK.is_metadata_set());
    }

    #[test]
    fn test_fill_is_not_essence() {
        assert!(!labels::FILL_ITEM.is_essence_element());

        let essence = Ul([
            0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x15, 0x01,
            0x05, 0x01,
        ]);
        assert!(essence.is_essence_element());
    }

    #[test]
    fn test_version_byte_masked() {
        // Same fill item with the old version byte
        let mut old_fill = labels::FILL_ITEM;
        old_fill.0[7] = 0x01;

        assert!(old_fill.is_fill());
        assert!(old_fill.matches(&labels::FILL_ITEM));
        assert_ne!(old_fill, labels::FILL_ITEM);
        assert_eq!(old_fill.masked_bytes(), labels::FILL_ITEM.masked_bytes());
    }

    #[test]
    fn test_exact_match_for_non_smpte() {
        let a = Ul([1; 16]);
        let mut b = a;
        b.0[7] = 2;
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_label_kind() {
        assert_eq!(
            labels::HEADER_PARTITION_OPEN_INCOMPLETE.kind(),
            LabelKind::PartitionPack
        );
        assert_eq!(labels::PRIMER_PACK.kind(), LabelKind::PrimerPack);
        assert_eq!(labels::FILL_ITEM.kind(), LabelKind::FillItem);
        assert_eq!(labels::INDEX_TABLE_SEGMENT.kind(), LabelKind::IndexTable);
        assert_eq!(labels::PREFACE.kind(), LabelKind::MetadataSet);
        assert_eq!(Ul::ZERO.kind(), LabelKind::Unknown);
    }

    #[test]
    fn test_display() {
        let text = labels::PRIMER_PACK.to_string();
        assert!(text.starts_with("urn:smpte:ul:060e2b34."));
    }
}
