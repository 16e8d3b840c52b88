//! File operations over the mounted volume: create-or-append writes, lazy
//! reads, deletion, listing, and the free-space query.
//!
//! Ordering rules for a write, so a fault mid-operation can never produce
//! an entry whose size exceeds the bytes on disk: a new cluster is claimed
//! (marked end-of-chain) and linked before any data lands in it, and the
//! directory entry is rewritten only after every data sector is flushed.
//! What a failed write can leave behind is an orphaned claimed chain,
//! recoverable by a free-space rescan.

use crate::buffer::Scratch;
use crate::dir::{self, Attributes, DirEntry, DirList};
use crate::error::{Error, Result};
use crate::fat::{self, Link};
use crate::fsinfo;
use crate::name::ShortName;
use crate::volume::Volume;
use crate::{BlockDevice, TimeSource, SECTOR_SIZE};

// ─── Session ───────────────────────────────────────────────────────────────────

/// A mounted FAT32 volume: the block device, the clock, the geometry, and
/// the driver's single sector buffer.
///
/// One value, one operation at a time; every filesystem call runs to
/// completion before the next can borrow the buffer.
pub struct Fat32<D: BlockDevice, C: TimeSource> {
    dev: D,
    clock: C,
    vol: Volume,
    buf: Scratch,
}

impl<D: BlockDevice, C: TimeSource> Fat32<D, C> {
    /// Mount the volume: parse the boot sector (directly or behind an MBR)
    /// and sanity-check the FSInfo free count against the cluster count.
    pub fn mount(mut dev: D, clock: C) -> Result<Self> {
        let mut buf = Scratch::new();
        let mut vol = Volume::mount(&mut dev, &mut buf)?;

        vol.free_count_trusted = match fsinfo::free_count(&mut dev, &vol, &mut buf) {
            Ok(Some(count)) if count <= vol.total_clusters => true,
            Ok(_) | Err(_) => {
                log::warn!("fat32: FSInfo free count not usable, falling back to scans");
                false
            }
        };

        Ok(Fat32 {
            dev,
            clock,
            vol,
            buf,
        })
    }

    pub fn volume(&self) -> &Volume {
        &self.vol
    }

    /// Release the block device, e.g. to hand it back to the transport.
    pub fn into_device(self) -> D {
        self.dev
    }

    /// The FSInfo cached free-cluster count, `None` while it is untrusted.
    pub fn free_clusters(&mut self) -> Result<Option<u32>> {
        if !self.vol.free_count_trusted {
            return Ok(None);
        }
        fsinfo::free_count(&mut self.dev, &self.vol, &mut self.buf)
    }

    /// Lazy listing of the root directory.
    pub fn list(&mut self) -> DirList<'_, D> {
        DirList::new(&mut self.dev, &self.vol, &mut self.buf)
    }

    /// Whether a directory entry carries this name, without reading content.
    pub fn exists(&mut self, name: &str) -> Result<bool> {
        let short = ShortName::new(name)?;
        Ok(dir::find(&mut self.dev, &self.vol, &mut self.buf, &short)?.is_some())
    }

    /// Create `name` with `data` as content, or append `data` when the
    /// file already exists.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let result = self.write_inner(name, data);
        if result.is_err() {
            // Abort with whatever prefix was already flushed.
            self.buf.discard();
        }
        result
    }

    /// Open `name` for sequential reading.
    pub fn read(&mut self, name: &str) -> Result<FileReader<'_, D, C>> {
        let short = ShortName::new(name)?;
        let slot =
            dir::find(&mut self.dev, &self.vol, &mut self.buf, &short)?.ok_or(Error::NotFound)?;
        Ok(FileReader {
            cluster: slot.entry.first_cluster,
            sector_in_cluster: 0,
            offset: 0,
            remaining: slot.entry.size,
            hops: 0,
            fs: self,
        })
    }

    /// Remove `name`: tombstone its entry and return its clusters to the FAT.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let short = ShortName::new(name)?;
        let (first_cluster, freed) =
            dir::tombstone(&mut self.dev, &self.vol, &mut self.buf, &short)?
                .ok_or(Error::NotFound)?;
        self.credit_free(freed);
        // Steer the next allocation scan at the freshly freed chain.
        if first_cluster >= 2 {
            if let Ok(Some(hint)) =
                fsinfo::next_free_hint(&mut self.dev, &self.vol, &mut self.buf)
            {
                if first_cluster < hint {
                    let _ = fsinfo::set_next_free_hint(
                        &mut self.dev,
                        &self.vol,
                        &mut self.buf,
                        first_cluster,
                    );
                }
            }
        }
        log::info!("fat32: deleted {short}, {freed} clusters freed");
        Ok(())
    }

    // ─── Write path ────────────────────────────────────────────────────────────

    fn write_inner(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let short = ShortName::new(name)?;
        match dir::find(&mut self.dev, &self.vol, &mut self.buf, &short)? {
            Some(slot) => self.append(slot, data),
            None => self.create(short, data),
        }
    }

    fn create(&mut self, short: ShortName, data: &[u8]) -> Result<()> {
        let hint = match fsinfo::next_free_hint(&mut self.dev, &self.vol, &mut self.buf) {
            Ok(Some(h)) => h,
            _ => self.vol.root_cluster,
        };
        let first = fat::alloc_cluster(&mut self.dev, &self.vol, &mut self.buf, hint)?;
        let (last, grown, size) = self.fill(first, 0, 0, 0, data)?;

        let (date, time) = self.now_fat();
        let (sector, offset, dir_grew) =
            dir::find_free_slot(&mut self.dev, &self.vol, &mut self.buf)?;
        let entry = DirEntry {
            name: short,
            attributes: Attributes::ARCHIVE,
            create_time: time,
            create_date: date,
            access_date: 0,
            write_time: time,
            write_date: date,
            first_cluster: first,
            size,
        };
        self.buf.load(&mut self.dev, sector)?;
        entry.encode(&mut self.buf.bytes_mut()[offset..offset + dir::ENTRY_SIZE]);
        self.buf.flush(&mut self.dev)?;

        self.debit_free(1 + grown + dir_grew as u32);
        let _ = fsinfo::set_next_free_hint(&mut self.dev, &self.vol, &mut self.buf, last);
        Ok(())
    }

    fn append(&mut self, slot: dir::Slot, data: &[u8]) -> Result<()> {
        let cluster_bytes = self.vol.cluster_bytes();
        let mut entry = slot.entry;
        let mut grown = 0u32;

        // Foreign tools store empty files with no chain at all.
        if entry.first_cluster < 2 {
            entry.first_cluster =
                fat::alloc_cluster(&mut self.dev, &self.vol, &mut self.buf, self.vol.root_cluster)?;
            grown += 1;
        }

        // Walk to the final cluster of the chain.
        let mut cluster = entry.first_cluster;
        let mut full_clusters = 0u32;
        loop {
            match fat::next_cluster(&mut self.dev, &self.vol, &mut self.buf, cluster)? {
                Link::Next(c) => {
                    cluster = c;
                    full_clusters += 1;
                    if full_clusters > self.vol.total_clusters {
                        return Err(Error::CorruptChain);
                    }
                }
                Link::End => break,
                _ => return Err(Error::CorruptChain),
            }
        }

        // Resume where the stored size ends inside that cluster. A size on
        // an exact cluster boundary resumes at sector index
        // sectors_per_cluster, which the fill loop turns into a fresh
        // cluster before the first byte.
        let pos_in_cluster = entry
            .size
            .checked_sub(full_clusters * cluster_bytes)
            .filter(|&p| p <= cluster_bytes)
            .ok_or(Error::CorruptChain)?;
        let sector_in_cluster = pos_in_cluster / SECTOR_SIZE as u32;
        let offset = pos_in_cluster as usize % SECTOR_SIZE;

        let (last, fill_grown, size) =
            self.fill(cluster, sector_in_cluster, offset, entry.size, data)?;
        grown += fill_grown;

        let (date, time) = self.now_fat();
        entry.size = size;
        entry.write_time = time;
        entry.write_date = date;
        entry.access_date = 0;
        self.buf.load(&mut self.dev, slot.sector)?;
        entry.encode(&mut self.buf.bytes_mut()[slot.offset..slot.offset + dir::ENTRY_SIZE]);
        self.buf.flush(&mut self.dev)?;

        self.debit_free(grown);
        let _ = fsinfo::set_next_free_hint(&mut self.dev, &self.vol, &mut self.buf, last);
        Ok(())
    }

    /// Stream `data` onto the chain starting at the given position,
    /// allocating and linking clusters as sectors run out. Returns the last
    /// cluster written, the number of clusters allocated, and the new size.
    fn fill(
        &mut self,
        mut cluster: u32,
        mut sector_in_cluster: u32,
        mut offset: usize,
        start_size: u32,
        data: &[u8],
    ) -> Result<(u32, u32, u32)> {
        let spc = self.vol.sectors_per_cluster as u32;
        let mut allocated = 0u32;
        let mut size = start_size;
        let mut consumed = 0usize;

        // A partial final sector is pulled in before being extended.
        if offset > 0 {
            let sector = self.vol.first_sector_of(cluster) + sector_in_cluster;
            self.buf.load(&mut self.dev, sector)?;
        }

        while consumed < data.len() {
            if sector_in_cluster == spc {
                let next = fat::alloc_cluster(&mut self.dev, &self.vol, &mut self.buf, cluster + 1)?;
                fat::set_next_cluster(&mut self.dev, &self.vol, &mut self.buf, cluster, next)?;
                allocated += 1;
                cluster = next;
                sector_in_cluster = 0;
            }
            let sector = self.vol.first_sector_of(cluster) + sector_in_cluster;
            if offset == 0 {
                self.buf.start(&mut self.dev, sector)?;
            }

            let chunk = (SECTOR_SIZE - offset).min(data.len() - consumed);
            self.buf.bytes_mut()[offset..offset + chunk]
                .copy_from_slice(&data[consumed..consumed + chunk]);
            consumed += chunk;
            offset += chunk;
            size += chunk as u32;

            if offset == SECTOR_SIZE {
                self.buf.flush(&mut self.dev)?;
                offset = 0;
                sector_in_cluster += 1;
            }
        }

        if offset > 0 {
            // Zero-pad the tail of the final sector past the data end.
            self.buf.bytes_mut()[offset..].fill(0);
            self.buf.flush(&mut self.dev)?;
        }
        Ok((cluster, allocated, size))
    }

    // ─── Free-count bookkeeping ────────────────────────────────────────────────

    /// Best effort: FSInfo accounting must never fail an operation.
    fn debit_free(&mut self, clusters: u32) {
        self.adjust_free(|count| count.saturating_sub(clusters), clusters != 0);
    }

    fn credit_free(&mut self, clusters: u32) {
        self.adjust_free(|count| count.saturating_add(clusters), clusters != 0);
    }

    fn adjust_free(&mut self, f: impl Fn(u32) -> u32, needed: bool) {
        if !needed || !self.vol.free_count_trusted {
            return;
        }
        if let Ok(Some(count)) = fsinfo::free_count(&mut self.dev, &self.vol, &mut self.buf) {
            let _ = fsinfo::set_free_count(&mut self.dev, &self.vol, &mut self.buf, f(count));
        }
    }

    fn now_fat(&mut self) -> (u16, u16) {
        match self.clock.now() {
            Some(t) => (t.fat_date(), t.fat_time()),
            None => (0, 0),
        }
    }
}

// ─── Lazy file reader ──────────────────────────────────────────────────────────

/// Sequential reader over one file's cluster chain.
///
/// Finite and non-restartable: it stops exactly at the directory entry's
/// stored size, and the session cannot be used for anything else while the
/// reader borrows it.
pub struct FileReader<'a, D: BlockDevice, C: TimeSource> {
    fs: &'a mut Fat32<D, C>,
    cluster: u32,
    sector_in_cluster: u32,
    offset: usize,
    remaining: u32,
    hops: u32,
}

impl<D: BlockDevice, C: TimeSource> FileReader<'_, D, C> {
    /// Bytes not yet read.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Copy up to `out.len()` bytes into `out`; 0 means end of file.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let vol = self.fs.vol;
        let spc = vol.sectors_per_cluster as u32;
        let mut copied = 0usize;

        while copied < out.len() && self.remaining > 0 {
            if self.sector_in_cluster == spc {
                match fat::next_cluster(&mut self.fs.dev, &vol, &mut self.fs.buf, self.cluster)? {
                    Link::Next(c) => self.cluster = c,
                    _ => return Err(Error::CorruptChain),
                }
                self.sector_in_cluster = 0;
                self.hops += 1;
                if self.hops > vol.total_clusters {
                    return Err(Error::CorruptChain);
                }
            }
            if self.cluster < 2 {
                return Err(Error::CorruptChain);
            }
            let sector = vol.first_sector_of(self.cluster) + self.sector_in_cluster;
            self.fs.buf.load(&mut self.fs.dev, sector)?;

            let n = (SECTOR_SIZE - self.offset)
                .min(out.len() - copied)
                .min(self.remaining as usize);
            out[copied..copied + n]
                .copy_from_slice(&self.fs.buf.bytes()[self.offset..self.offset + n]);
            copied += n;
            self.offset += n;
            self.remaining -= n as u32;

            if self.offset == SECTOR_SIZE {
                self.offset = 0;
                self.sector_in_cluster += 1;
            }
        }
        Ok(copied)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
