//! Primer pack: the per-partition map between 2-byte local tags and
//! full 16-byte ULs.
//!
//! The mapping is bijective within one partition and rebuilt on every
//! metadata write. Tag allocation is deterministic: monotonically
//! increasing from 0x0001, skipping tags already assigned by a seed.

use crate::codec;
use crate::error::{MxfError, Result};
use crate::file::MxfFile;
use crate::ul::{labels, Ul, UlBytes};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::{BTreeMap, HashMap};

/// Wire size of one primer record: tag plus UL.
const RECORD_SIZE: u32 = 18;

/// Bidirectional tag-to-UL map for one partition.
#[derive(Debug, Clone, Default)]
pub struct Primer {
    by_tag: BTreeMap<u16, Ul>,
    by_ul: HashMap<UlBytes, u16>,
    next_tag: u16,
}

impl Primer {
    /// Create an empty primer.
    pub fn new() -> Self {
        Primer {
            by_tag: BTreeMap::new(),
            by_ul: HashMap::new(),
            next_tag: 0x0001,
        }
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// Check whether the primer has no mappings.
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Add a known mapping, as when parsing or seeding.
    ///
    /// Re-inserting an identical mapping is allowed; a tag bound to a
    /// different UL breaks the bijection and is rejected.
    pub fn insert(&mut self, tag: u16, ul: Ul) -> Result<()> {
        if let Some(existing) = self.by_tag.get(&tag) {
            if existing.matches(&ul) {
                return Ok(());
            }
            return Err(MxfError::InvalidSet(format!(
                "local tag 0x{:04x} bound to both {} and {}",
                tag, existing, ul
            )));
        }
        self.by_tag.insert(tag, ul);
        self.by_ul.insert(ul.masked_bytes(), tag);
        Ok(())
    }

    /// Look up the UL for a local tag.
    pub fn lookup_by_tag(&self, tag: u16) -> Option<&Ul> {
        self.by_tag.get(&tag)
    }

    /// Look up the local tag for a UL, without allocating one.
    pub fn lookup_by_ul(&self, ul: &Ul) -> Option<u16> {
        self.by_ul.get(&ul.masked_bytes()).copied()
    }

    /// Tag for a UL, assigning a fresh one if the UL is new.
    ///
    /// A non-zero `preferred` tag (a registry's static tag) is used if
    /// it is still free; otherwise the next free dynamic tag is taken.
    pub fn tag_for_ul(&mut self, ul: &Ul, preferred: u16) -> Result<u16> {
        if let Some(tag) = self.lookup_by_ul(ul) {
            return Ok(tag);
        }

        if preferred != 0 && !self.by_tag.contains_key(&preferred) {
            self.insert(preferred, *ul)?;
            return Ok(preferred);
        }

        while self.by_tag.contains_key(&self.next_tag) {
            self.next_tag = self.next_tag.checked_add(1).ok_or_else(|| {
                MxfError::InvalidSet("local tag space exhausted".into())
            })?;
        }
        let tag = self.next_tag;
        self.insert(tag, *ul)?;
        self.next_tag = tag.wrapping_add(1).max(1);
        Ok(tag)
    }

    /// Iterate mappings in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Ul)> {
        self.by_tag.iter().map(|(tag, ul)| (*tag, ul))
    }

    /// Serialise the mapping batch: a 4-byte count, a 4-byte record
    /// size, then `(tag, ul)` records in tag order.
    pub fn write_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.by_tag.len() * RECORD_SIZE as usize);
        out.write_u32::<BigEndian>(self.by_tag.len() as u32).ok();
        out.write_u32::<BigEndian>(RECORD_SIZE).ok();
        for (tag, ul) in &self.by_tag {
            out.write_u16::<BigEndian>(*tag).ok();
            out.extend_from_slice(ul.as_bytes());
        }
        out
    }

    /// Emit the primer as a KLV set at the file's current position.
    /// Returns the total bytes written.
    pub fn write(&self, file: &mut MxfFile) -> Result<u64> {
        let value = self.write_value();
        let length = codec::encode_ber_length(value.len() as u64);
        file.write(labels::PRIMER_PACK.as_bytes())?;
        file.write(&length)?;
        file.write(&value)?;
        Ok(16 + length.len() as u64 + value.len() as u64)
    }

    /// Parse the mapping batch of a primer pack value.
    pub fn parse_value(data: &[u8]) -> Result<Primer> {
        let mut cursor = data;
        let (count, size) = codec::read_batch_header(&mut cursor)?;
        if size != RECORD_SIZE {
            return Err(MxfError::InvalidSet(format!(
                "primer record size {} (expected {})",
                size, RECORD_SIZE
            )));
        }
        let needed = count as u64 * RECORD_SIZE as u64;
        if (cursor.len() as u64) < needed {
            return Err(MxfError::TruncatedValue {
                needed,
                available: cursor.len() as u64,
            });
        }

        let mut primer = Primer::new();
        for record in cursor.chunks_exact(RECORD_SIZE as usize).take(count as usize) {
            let tag = u16::from_be_bytes([record[0], record[1]]);
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&record[2..18]);
            primer.insert(tag, Ul(bytes))?;
        }
        Ok(primer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ul_with_last(last: u8) -> Ul {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&Ul::SMPTE_PREFIX);
        bytes[15] = last;
        Ul(bytes)
    }

    #[test]
    fn test_lookup_both_ways() {
        let mut primer = Primer::new();
        primer.insert(0x3c0a, ul_with_last(1)).unwrap();

        assert_eq!(primer.lookup_by_tag(0x3c0a), Some(&ul_with_last(1)));
        assert_eq!(primer.lookup_by_ul(&ul_with_last(1)), Some(0x3c0a));
        assert_eq!(primer.lookup_by_tag(0x9999), None);
    }

    #[test]
    fn test_conflicting_tag_rejected() {
        let mut primer = Primer::new();
        primer.insert(0x0001, ul_with_last(1)).unwrap();
        primer.insert(0x0001, ul_with_last(1)).unwrap();
        assert!(primer.insert(0x0001, ul_with_last(2)).is_err());
    }

    #[test]
    fn test_tag_allocation_is_monotonic() {
        let mut primer = Primer::new();
        assert_eq!(primer.tag_for_ul(&ul_with_last(1), 0).unwrap(), 0x0001);
        assert_eq!(primer.tag_for_ul(&ul_with_last(2), 0).unwrap(), 0x0002);
        // Already mapped: same tag back
        assert_eq!(primer.tag_for_ul(&ul_with_last(1), 0).unwrap(), 0x0001);
    }

    #[test]
    fn test_tag_allocation_skips_seeded() {
        let mut primer = Primer::new();
        primer.insert(0x0001, ul_with_last(10)).unwrap();
        primer.insert(0x0003, ul_with_last(11)).unwrap();

        assert_eq!(primer.tag_for_ul(&ul_with_last(1), 0).unwrap(), 0x0002);
        assert_eq!(primer.tag_for_ul(&ul_with_last(2), 0).unwrap(), 0x0004);
    }

    #[test]
    fn test_preferred_tag_used_when_free() {
        let mut primer = Primer::new();
        assert_eq!(primer.tag_for_ul(&ul_with_last(1), 0x3c0a).unwrap(), 0x3c0a);

        // Preferred tag taken: fall back to dynamic allocation
        assert_eq!(primer.tag_for_ul(&ul_with_last(2), 0x3c0a).unwrap(), 0x0001);
    }

    #[test]
    fn test_serialised_layout() {
        let mut primer = Primer::new();
        primer.insert(0x0002, ul_with_last(2)).unwrap();
        primer.insert(0x0001, ul_with_last(1)).unwrap();

        let value = primer.write_value();
        assert_eq!(&value[0..4], &[0, 0, 0, 2]);
        assert_eq!(&value[4..8], &[0, 0, 0, 18]);
        // Records in tag order regardless of insertion order
        assert_eq!(&value[8..10], &[0, 1]);
        assert_eq!(&value[10..26], ul_with_last(1).as_bytes());
        assert_eq!(&value[26..28], &[0, 2]);
        assert_eq!(&value[28..44], ul_with_last(2).as_bytes());
    }

    #[test]
    fn test_roundtrip() {
        let mut primer = Primer::new();
        for i in 1..=20u8 {
            primer.tag_for_ul(&ul_with_last(i), 0).unwrap();
        }

        let parsed = Primer::parse_value(&primer.write_value()).unwrap();
        assert_eq!(parsed.len(), primer.len());
        for (tag, ul) in primer.iter() {
            assert_eq!(parsed.lookup_by_tag(tag), Some(ul));
        }
    }

    #[test]
    fn test_parse_rejects_bad_record_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&[0, 0, 0, 17]);
        data.extend_from_slice(&[0u8; 17]);
        assert!(Primer::parse_value(&data).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_records() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 2]);
        data.extend_from_slice(&[0, 0, 0, 18]);
        data.extend_from_slice(&[0u8; 18]);
        assert!(matches!(
            Primer::parse_value(&data),
            Err(MxfError::TruncatedValue { .. })
        ));
    }
}
