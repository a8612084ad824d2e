//! File sessions: ownership of an open MXF file and its partitions.
//!
//! A session locates the run-in, discovers every partition (through
//! the random index pack when present, the footer/previous chain when
//! not, and a forward scan as the last resort) and keeps the
//! partitions alive for metadata and essence access.

use crate::error::{MxfError, Result};
use crate::file::{FileRef, MxfFile, Position};
use crate::partition::{Partition, PartitionKind, RandomIndexPack};
use std::path::Path;

/// An open MXF file and the partitions found in it.
pub struct MxfSession {
    file: FileRef,
    run_in: u64,
    partitions: Vec<Partition>,
    rip: Option<RandomIndexPack>,
}

impl MxfSession {
    /// Open a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file(MxfFile::open(path)?)
    }

    /// Take ownership of an already opened file and discover its
    /// partitions.
    pub fn from_file(mut file: MxfFile) -> Result<Self> {
        let run_in = file.locate_run_in()?;
        let file = file.shared();

        let rip = try_read_rip(&file);
        let mut session = MxfSession {
            file,
            run_in,
            partitions: Vec::new(),
            rip,
        };

        session.discover_partitions()?;
        Ok(session)
    }

    /// Start an empty write session over a fresh file.
    pub fn create(file: MxfFile) -> Self {
        MxfSession {
            file: file.shared(),
            run_in: 0,
            partitions: Vec::new(),
            rip: None,
        }
    }

    /// The shared file handle.
    pub fn file(&self) -> &FileRef {
        &self.file
    }

    /// Bytes preceding the first partition pack.
    pub fn run_in(&self) -> u64 {
        self.run_in
    }

    /// The random index pack found at the tail, if any.
    pub fn rip(&self) -> Option<&RandomIndexPack> {
        self.rip.as_ref()
    }

    /// All partitions in file order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Mutable access to the partitions.
    pub fn partitions_mut(&mut self) -> &mut [Partition] {
        &mut self.partitions
    }

    /// The header partition.
    pub fn header_partition(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.pack.kind == PartitionKind::Header)
    }

    /// The footer partition, if the file has one.
    pub fn footer_partition(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.pack.kind == PartitionKind::Footer)
    }

    /// Adopt a partition that was just written through this session's
    /// file.
    pub fn push_partition(&mut self, partition: Partition) {
        self.partitions.push(partition);
    }

    /// The raw run-in bytes.
    pub fn run_in_bytes(&self) -> Result<Vec<u8>> {
        let mut file = self.file.borrow_mut();
        file.seek(0)?;
        file.read(self.run_in as usize)
    }

    /// Copy the run-in unchanged to a destination file. Rewrites must
    /// pass the run-in through untouched.
    pub fn copy_run_in(&self, dest: &mut MxfFile) -> Result<u64> {
        let bytes = self.run_in_bytes()?;
        dest.write(&bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Finish a write session: link the partition chain (previous and
    /// footer offsets), rewrite every pack, and emit the random index
    /// pack at the tail.
    pub fn finalize(&mut self) -> Result<()> {
        self.partitions
            .sort_by_key(|p| p.pack.this_partition);

        let footer_offset = self
            .partitions
            .iter()
            .rev()
            .find(|p| p.pack.kind == PartitionKind::Footer)
            .map(|p| p.pack.this_partition)
            .unwrap_or(0);

        let mut previous = 0u64;
        for partition in &mut self.partitions {
            partition.pack.previous_partition = previous;
            partition.pack.footer_partition = footer_offset;
            partition.pack.close();
            previous = partition.pack.this_partition;
        }

        let file = self.file.clone();
        for partition in &self.partitions {
            partition.rewrite_pack(&file)?;
        }

        let mut rip = RandomIndexPack::new();
        for partition in &self.partitions {
            rip.add_entry(partition.pack.body_sid, partition.pack.this_partition);
        }
        {
            let mut f = file.borrow_mut();
            let size = f.size()?;
            f.seek(size as Position)?;
            rip.write(&mut f)?;
        }
        self.rip = Some(rip);
        Ok(())
    }

    /// Locate and parse every partition pack.
    fn discover_partitions(&mut self) -> Result<()> {
        if let Some(rip) = self.rip.clone() {
            if self.read_from_rip(&rip).is_ok() && !self.partitions.is_empty() {
                return Ok(());
            }
            log::warn!("random index pack unusable, falling back to partition chain");
            self.partitions.clear();
        }

        if self.read_from_chain()? && !self.partitions.is_empty() {
            return Ok(());
        }
        self.partitions.clear();

        self.scan_forward()
    }

    fn read_partition_at(&mut self, offset: u64) -> Result<Partition> {
        self.file.borrow_mut().seek(offset as Position)?;
        Partition::read_from(&self.file)
    }

    fn read_from_rip(&mut self, rip: &RandomIndexPack) -> Result<()> {
        for entry in &rip.entries {
            let partition = self.read_partition_at(entry.byte_offset)?;
            self.partitions.push(partition);
        }
        self.partitions.sort_by_key(|p| p.source_offset());
        Ok(())
    }

    /// Follow the footer offset of the first pack, then the previous
    /// offsets backwards. Returns false if the chain is absent.
    fn read_from_chain(&mut self) -> Result<bool> {
        let first = self.read_partition_at(self.run_in)?;
        let footer_offset = first.pack.footer_partition;
        let first_offset = first.pack.this_partition;
        self.partitions.push(first);

        if footer_offset == 0 || footer_offset <= first_offset {
            return Ok(false);
        }

        let mut offset = footer_offset;
        while offset > first_offset {
            let partition = match self.read_partition_at(offset) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("partition chain broken at offset {}: {}", offset, e);
                    return Ok(false);
                }
            };
            let previous = partition.pack.previous_partition;
            self.partitions.push(partition);
            if previous == 0 {
                break;
            }
            offset = previous;
        }

        self.partitions.sort_by_key(|p| p.source_offset());
        Ok(true)
    }

    /// Walk every KLV from the run-in, collecting partition packs.
    fn scan_forward(&mut self) -> Result<()> {
        use crate::klv::KlvCursor;

        let mut offset = self.run_in as Position;
        loop {
            {
                let mut f = self.file.borrow_mut();
                if offset as u64 >= f.size()? {
                    break;
                }
                f.seek(offset)?;
            }

            let mut klv = KlvCursor::default();
            klv.set_source(&self.file, offset)?;
            match klv.read_kl() {
                Ok(_) => {}
                Err(MxfError::TruncatedKl { .. }) => break,
                Err(_) => {
                    // Structural damage: resynchronise to the next pack
                    let resumed = {
                        let mut f = self.file.borrow_mut();
                        f.seek(offset)?;
                        f.resync()?
                    };
                    match resumed {
                        Some(position) => {
                            offset = position;
                            continue;
                        }
                        None => break,
                    }
                }
            }

            match klv.ul() {
                Some(key) if key.is_partition_pack() => {
                    let partition = self.read_partition_at(offset as u64)?;
                    self.partitions.push(partition);
                }
                _ => {}
            }
            offset = klv.end_offset();
        }

        if self.partitions.is_empty() {
            return Err(MxfError::InvalidPartition("no partitions found".into()));
        }
        Ok(())
    }
}

fn try_read_rip(file: &FileRef) -> Option<RandomIndexPack> {
    let mut f = file.borrow_mut();
    let size = f.size().ok()?;
    if size < 21 {
        return None;
    }

    f.seek((size - 4) as Position).ok()?;
    let tail = f.read(4).ok()?;
    let overall = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) as u64;
    if overall < 21 || overall > size {
        return None;
    }

    f.seek((size - overall) as Position).ok()?;
    let bytes = f.read(overall as usize).ok()?;
    let rip = RandomIndexPack::parse(&bytes).ok()?;
    log::debug!("found random index pack with {} entries", rip.entries.len());
    Some(rip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;

    fn build_two_partition_file() -> (MxfSession, crate::file::SharedBuffer) {
        let registry = StaticRegistry::baseline();
        let (file, buffer) = MxfFile::memory();
        let mut session = MxfSession::create(file);

        let mut header = Partition::header();
        header.write(session.file(), &registry).unwrap();
        session.push_partition(header);

        let mut footer = Partition::footer();
        footer.write(session.file(), &registry).unwrap();
        session.push_partition(footer);

        session.finalize().unwrap();
        (session, buffer)
    }

    #[test]
    fn test_write_then_reopen_via_rip() {
        let (_session, buffer) = build_two_partition_file();

        let (file, _copy) = MxfFile::from_bytes(buffer.contents());
        let session = MxfSession::from_file(file).unwrap();

        assert_eq!(session.partitions().len(), 2);
        assert!(session.rip().is_some());
        assert!(session.header_partition().is_some());
        assert!(session.footer_partition().is_some());
    }

    #[test]
    fn test_finalize_links_chain() {
        let (session, _buffer) = build_two_partition_file();

        let header = session.header_partition().unwrap();
        let footer = session.footer_partition().unwrap();

        assert_eq!(header.pack.previous_partition, 0);
        assert_eq!(header.pack.footer_partition, footer.pack.this_partition);
        assert_eq!(footer.pack.previous_partition, header.pack.this_partition);
        assert!(header.pack.is_closed());
    }

    #[test]
    fn test_reopen_without_rip_scans() {
        let (_session, buffer) = build_two_partition_file();

        // Drop the RIP from the tail; discovery falls back to the
        // footer chain or a scan
        let mut bytes = buffer.contents();
        let rip_size = {
            let tail = &bytes[bytes.len() - 4..];
            u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize
        };
        bytes.truncate(bytes.len() - rip_size);

        let (file, _copy) = MxfFile::from_bytes(bytes);
        let session = MxfSession::from_file(file).unwrap();

        assert_eq!(session.partitions().len(), 2);
        assert!(session.rip().is_none());
    }

    #[test]
    fn test_run_in_passthrough() {
        let (_session, buffer) = build_two_partition_file();

        let mut bytes = vec![0x42u8; 100];
        bytes.extend_from_slice(&buffer.contents());

        let (file, _copy) = MxfFile::from_bytes(bytes);
        let session = MxfSession::from_file(file).unwrap();
        assert_eq!(session.run_in(), 100);
        assert_eq!(session.run_in_bytes().unwrap(), vec![0x42u8; 100]);

        let (mut dest, dest_buffer) = MxfFile::memory();
        session.copy_run_in(&mut dest).unwrap();
        assert_eq!(dest_buffer.contents(), vec![0x42u8; 100]);
    }

    #[test]
    fn test_open_garbage_fails() {
        let (file, _buffer) = MxfFile::from_bytes(vec![0u8; 256]);
        assert!(MxfSession::from_file(file).is_err());
    }
}
