//! Root-directory handling: the 32-byte entry codec, lookup, lazy listing,
//! free-slot search, and tombstoning.

use bitflags::bitflags;

use crate::buffer::{read_u16, read_u32, write_u16, write_u32, Scratch};
use crate::error::{Error, Result};
use crate::fat::{self, Link};
use crate::name::ShortName;
use crate::volume::Volume;
use crate::{BlockDevice, SECTOR_SIZE};

pub(crate) const ENTRY_SIZE: usize = 32;
/// First name byte marking the end of the directory.
pub(crate) const ENTRY_END: u8 = 0x00;
/// First name byte marking a deleted, reusable slot.
pub(crate) const ENTRY_DELETED: u8 = 0xE5;
/// Attribute combination of a long-name fragment; never a real file.
const ATTR_LONG_NAME: u8 = 0x0F;

// Entry field offsets
const OFF_NAME: usize = 0;
const OFF_ATTRIBUTES: usize = 11;
const OFF_CREATE_TIME: usize = 14;
const OFF_CREATE_DATE: usize = 16;
const OFF_ACCESS_DATE: usize = 18;
const OFF_CLUSTER_HIGH: usize = 20;
const OFF_WRITE_TIME: usize = 22;
const OFF_WRITE_DATE: usize = 24;
const OFF_CLUSTER_LOW: usize = 26;
const OFF_SIZE: usize = 28;

bitflags! {
    /// Directory-entry attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// What a directory entry names, derived from its attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    VolumeLabel,
}

/// A decoded 32-byte directory entry.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: Attributes,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster: u32,
    pub size: u32,
}

impl DirEntry {
    pub fn kind(&self) -> EntryKind {
        if self.attributes.contains(Attributes::DIRECTORY) {
            EntryKind::Directory
        } else if self.attributes.contains(Attributes::VOLUME_ID) {
            EntryKind::VolumeLabel
        } else {
            EntryKind::File
        }
    }

    pub(crate) fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[OFF_NAME..OFF_NAME + 11]);
        DirEntry {
            name: ShortName::from_raw(name),
            attributes: Attributes::from_bits_truncate(raw[OFF_ATTRIBUTES]),
            create_time: read_u16(raw, OFF_CREATE_TIME),
            create_date: read_u16(raw, OFF_CREATE_DATE),
            access_date: read_u16(raw, OFF_ACCESS_DATE),
            write_time: read_u16(raw, OFF_WRITE_TIME),
            write_date: read_u16(raw, OFF_WRITE_DATE),
            first_cluster: (read_u16(raw, OFF_CLUSTER_HIGH) as u32) << 16
                | read_u16(raw, OFF_CLUSTER_LOW) as u32,
            size: read_u32(raw, OFF_SIZE),
        }
    }

    pub(crate) fn encode(&self, out: &mut [u8]) {
        out[..ENTRY_SIZE].fill(0);
        out[OFF_NAME..OFF_NAME + 11].copy_from_slice(self.name.as_bytes());
        out[OFF_ATTRIBUTES] = self.attributes.bits();
        write_u16(out, OFF_CREATE_TIME, self.create_time);
        write_u16(out, OFF_CREATE_DATE, self.create_date);
        write_u16(out, OFF_ACCESS_DATE, self.access_date);
        write_u16(out, OFF_CLUSTER_HIGH, (self.first_cluster >> 16) as u16);
        write_u16(out, OFF_WRITE_TIME, self.write_time);
        write_u16(out, OFF_WRITE_DATE, self.write_date);
        write_u16(out, OFF_CLUSTER_LOW, self.first_cluster as u16);
        write_u32(out, OFF_SIZE, self.size);
    }
}

/// A matched entry plus the sector/offset it was decoded from, so the
/// caller can rewrite it in place.
pub(crate) struct Slot {
    pub entry: DirEntry,
    pub sector: u32,
    pub offset: usize,
}

/// Search the root directory for an exact 11-byte name match.
pub(crate) fn find<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    name: &ShortName,
) -> Result<Option<Slot>> {
    let mut cluster = vol.root_cluster;
    let mut hops = 0u32;
    loop {
        let first = vol.first_sector_of(cluster);
        for s in 0..vol.sectors_per_cluster as u32 {
            buf.load(dev, first + s)?;
            for offset in (0..SECTOR_SIZE).step_by(ENTRY_SIZE) {
                let raw = &buf.bytes()[offset..offset + ENTRY_SIZE];
                if raw[0] == ENTRY_END {
                    return Ok(None);
                }
                if raw[0] == ENTRY_DELETED || raw[OFF_ATTRIBUTES] == ATTR_LONG_NAME {
                    continue;
                }
                if raw[..11] == *name.as_bytes() {
                    return Ok(Some(Slot {
                        entry: DirEntry::decode(raw),
                        sector: first + s,
                        offset,
                    }));
                }
            }
        }
        match fat::next_cluster(dev, vol, buf, cluster)? {
            Link::Next(c) => cluster = c,
            _ => return Ok(None),
        }
        hops += 1;
        if hops > vol.total_clusters {
            return Err(Error::CorruptChain);
        }
    }
}

/// Locate the first free or deleted slot for a new entry, extending the
/// root directory by one zeroed cluster when its chain is full.
/// Returns the slot's sector/offset and whether the chain grew.
pub(crate) fn find_free_slot<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
) -> Result<(u32, usize, bool)> {
    let mut cluster = vol.root_cluster;
    let mut hops = 0u32;
    loop {
        let first = vol.first_sector_of(cluster);
        for s in 0..vol.sectors_per_cluster as u32 {
            buf.load(dev, first + s)?;
            for offset in (0..SECTOR_SIZE).step_by(ENTRY_SIZE) {
                let b = buf.bytes()[offset];
                if b == ENTRY_END || b == ENTRY_DELETED {
                    return Ok((first + s, offset, false));
                }
            }
        }
        match fat::next_cluster(dev, vol, buf, cluster)? {
            Link::Next(c) => cluster = c,
            Link::End => {
                let fresh = fat::alloc_cluster(dev, vol, buf, cluster + 1)?;
                fat::set_next_cluster(dev, vol, buf, cluster, fresh)?;
                // Zero the new cluster so the entry scan terminates in it.
                let base = vol.first_sector_of(fresh);
                for s in 0..vol.sectors_per_cluster as u32 {
                    buf.start(dev, base + s)?;
                }
                buf.flush(dev)?;
                log::info!("fat32: root directory grew into cluster {fresh}");
                return Ok((base, 0, true));
            }
            _ => return Err(Error::CorruptChain),
        }
        hops += 1;
        if hops > vol.total_clusters {
            return Err(Error::CorruptChain);
        }
    }
}

/// Mark the named entry deleted and return its cluster chain to the FAT.
/// Returns the file's first cluster and the number of clusters freed, or
/// `None` when no entry matches.
pub(crate) fn tombstone<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    name: &ShortName,
) -> Result<Option<(u32, u32)>> {
    let Some(slot) = find(dev, vol, buf, name)? else {
        return Ok(None);
    };

    buf.load(dev, slot.sector)?;
    buf.bytes_mut()[slot.offset] = ENTRY_DELETED;
    buf.flush(dev)?;

    let mut freed = 0u32;
    let mut cluster = slot.entry.first_cluster;
    if cluster >= 2 {
        let mut hops = 0u32;
        loop {
            let next = fat::next_cluster(dev, vol, buf, cluster)?;
            fat::set_next_cluster(dev, vol, buf, cluster, 0)?;
            freed += 1;
            match next {
                Link::Next(c) => cluster = c,
                _ => break,
            }
            hops += 1;
            if hops > vol.total_clusters {
                return Err(Error::CorruptChain);
            }
        }
    }
    Ok(Some((slot.entry.first_cluster, freed)))
}

/// Lazy root-directory listing.
///
/// Yields every live entry together with its attribute-derived kind;
/// deleted slots and long-name fragments are skipped, volume labels are
/// reported as such so callers can filter.
pub struct DirList<'a, D: BlockDevice> {
    dev: &'a mut D,
    vol: &'a Volume,
    buf: &'a mut Scratch,
    cluster: u32,
    sector_in_cluster: u32,
    offset: usize,
    hops: u32,
    done: bool,
}

impl<'a, D: BlockDevice> DirList<'a, D> {
    pub(crate) fn new(dev: &'a mut D, vol: &'a Volume, buf: &'a mut Scratch) -> Self {
        DirList {
            dev,
            vol,
            buf,
            cluster: vol.root_cluster,
            sector_in_cluster: 0,
            offset: 0,
            hops: 0,
            done: false,
        }
    }

    fn step(&mut self) -> Result<Option<(DirEntry, EntryKind)>> {
        loop {
            if self.offset == SECTOR_SIZE {
                self.offset = 0;
                self.sector_in_cluster += 1;
            }
            if self.sector_in_cluster == self.vol.sectors_per_cluster as u32 {
                self.sector_in_cluster = 0;
                match fat::next_cluster(self.dev, self.vol, self.buf, self.cluster)? {
                    Link::Next(c) => self.cluster = c,
                    _ => return Ok(None),
                }
                self.hops += 1;
                if self.hops > self.vol.total_clusters {
                    return Err(Error::CorruptChain);
                }
            }
            let sector = self.vol.first_sector_of(self.cluster) + self.sector_in_cluster;
            self.buf.load(self.dev, sector)?;
            let raw = &self.buf.bytes()[self.offset..self.offset + ENTRY_SIZE];
            if raw[0] == ENTRY_END {
                return Ok(None);
            }
            let skip = raw[0] == ENTRY_DELETED || raw[OFF_ATTRIBUTES] == ATTR_LONG_NAME;
            let item = if skip { None } else { Some(DirEntry::decode(raw)) };
            self.offset += ENTRY_SIZE;
            if let Some(entry) = item {
                let kind = entry.kind();
                return Ok(Some((entry, kind)));
            }
        }
    }
}

impl<D: BlockDevice> Iterator for DirList<'_, D> {
    type Item = Result<(DirEntry, EntryKind)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{disk_with_file, disk_with_files, make_disk};

    fn mounted(disk: &mut crate::testutil::MemDisk) -> (Volume, Scratch) {
        let mut buf = Scratch::new();
        let vol = Volume::mount(disk, &mut buf).unwrap();
        (vol, buf)
    }

    #[test]
    fn entry_codec_round_trips() {
        let entry = DirEntry {
            name: ShortName::new("DATA1.CSV").unwrap(),
            attributes: Attributes::ARCHIVE,
            create_time: 0x1234,
            create_date: 0x5678,
            access_date: 0,
            write_time: 0x9ABC,
            write_date: 0xDEF0,
            first_cluster: 0x0004_0007,
            size: 5000,
        };
        let mut raw = [0xFFu8; ENTRY_SIZE];
        entry.encode(&mut raw);
        let back = DirEntry::decode(&raw);
        assert_eq!(back.name, entry.name);
        assert_eq!(back.attributes, entry.attributes);
        assert_eq!(back.first_cluster, entry.first_cluster);
        assert_eq!(back.size, entry.size);
        assert_eq!(back.write_time, entry.write_time);
        assert_eq!(back.write_date, entry.write_date);
    }

    #[test]
    fn finds_file_by_exact_name() {
        let mut disk = disk_with_file("HELLO.TXT", b"world");
        let (vol, mut buf) = mounted(&mut disk);
        let name = ShortName::new("HELLO.TXT").unwrap();
        let slot = find(&mut disk, &vol, &mut buf, &name).unwrap().unwrap();
        assert_eq!(slot.entry.size, 5);
        assert!(slot.entry.first_cluster >= 2);
        assert_eq!(slot.entry.kind(), EntryKind::File);
    }

    #[test]
    fn missing_name_is_none() {
        let mut disk = make_disk();
        let (vol, mut buf) = mounted(&mut disk);
        let name = ShortName::new("NOSUCH.TXT").unwrap();
        assert!(find(&mut disk, &vol, &mut buf, &name).unwrap().is_none());
    }

    #[test]
    fn list_skips_long_name_fragments() {
        // A lowercase name forces fatfs to emit LFN entries before the
        // 8.3 one; only the real entry must surface.
        let mut disk = disk_with_file("lower.txt", b"x");
        let (vol, mut buf) = mounted(&mut disk);
        let entries: Vec<_> = DirList::new(&mut disk, &vol, &mut buf)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let files: Vec<_> = entries
            .iter()
            .filter(|(_, k)| *k == EntryKind::File)
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0.size, 1);
    }

    #[test]
    fn list_reports_every_file() {
        let mut disk = disk_with_files(&[
            ("FILE1.TXT", b"1" as &[u8]),
            ("FILE2.TXT", b"22"),
            ("FILE3.TXT", b"333"),
        ]);
        let (vol, mut buf) = mounted(&mut disk);
        let entries: Vec<_> = DirList::new(&mut disk, &vol, &mut buf)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let mut sizes: Vec<u32> = entries
            .iter()
            .filter(|(_, k)| *k == EntryKind::File)
            .map(|(e, _)| e.size)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, [1, 2, 3]);
    }

    #[test]
    fn free_slot_on_fresh_volume_is_first_entry() {
        let mut disk = make_disk();
        let (vol, mut buf) = mounted(&mut disk);
        let (sector, offset, grew) = find_free_slot(&mut disk, &vol, &mut buf).unwrap();
        assert_eq!(sector, vol.first_sector_of(vol.root_cluster));
        assert_eq!(offset, 0);
        assert!(!grew);
    }

    #[test]
    fn tombstone_frees_the_chain() {
        let content = vec![0x42u8; 3 * 512];
        let mut disk = disk_with_file("BIG.BIN", &content);
        let (vol, mut buf) = mounted(&mut disk);
        let name = ShortName::new("BIG.BIN").unwrap();
        let (first, freed) = tombstone(&mut disk, &vol, &mut buf, &name)
            .unwrap()
            .unwrap();
        assert!(first >= 2);
        // 512-byte clusters on the standard test image
        assert_eq!(freed, 3);
        assert!(find(&mut disk, &vol, &mut buf, &name).unwrap().is_none());
        assert_eq!(
            fat::next_cluster(&mut disk, &vol, &mut buf, first).unwrap(),
            Link::Free
        );
    }

    #[test]
    fn tombstone_of_missing_name_is_none() {
        let mut disk = make_disk();
        let (vol, mut buf) = mounted(&mut disk);
        let name = ShortName::new("GHOST.TXT").unwrap();
        assert!(tombstone(&mut disk, &vol, &mut buf, &name).unwrap().is_none());
    }
}
