//! The driver's only working memory: one sector-sized window over the
//! block device.
//!
//! Every read and write in the crate goes through a [`Scratch`], which
//! tracks which sector it holds and whether it carries unflushed changes.
//! A dirty sector is always written back before the window moves, so no
//! caller can clobber another's pending bytes.

use crate::error::{Error, Result};
use crate::{BlockDevice, SECTOR_SIZE};

/// Transient read failures are retried this many times before surfacing
/// as `Error::Io`.
const READ_ATTEMPTS: u32 = 10;

pub(crate) struct Scratch {
    data: [u8; SECTOR_SIZE],
    sector: Option<u32>,
    dirty: bool,
}

impl Scratch {
    pub(crate) const fn new() -> Self {
        Scratch {
            data: [0; SECTOR_SIZE],
            sector: None,
            dirty: false,
        }
    }

    /// Window the buffer onto `sector`, reading it from the device.
    /// No-op when the sector is already held.
    pub(crate) fn load<D: BlockDevice>(&mut self, dev: &mut D, sector: u32) -> Result<()> {
        if self.sector == Some(sector) {
            return Ok(());
        }
        self.flush(dev)?;
        read_retry(dev, sector, &mut self.data)?;
        self.sector = Some(sector);
        Ok(())
    }

    /// Window the buffer onto `sector` for composing a fresh sector:
    /// zero-filled, nothing read. The sector is considered pending a write.
    pub(crate) fn start<D: BlockDevice>(&mut self, dev: &mut D, sector: u32) -> Result<()> {
        self.flush(dev)?;
        self.data.fill(0);
        self.sector = Some(sector);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.data
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8; SECTOR_SIZE] {
        self.dirty = true;
        &mut self.data
    }

    /// Write the held sector back if it carries unflushed changes.
    pub(crate) fn flush<D: BlockDevice>(&mut self, dev: &mut D) -> Result<()> {
        if self.dirty {
            if let Some(sector) = self.sector {
                dev.write_sector(sector, &self.data)
                    .map_err(|_| Error::Io(sector))?;
            }
            self.dirty = false;
        }
        Ok(())
    }

    /// Forget the held sector without writing it back. Used on operation
    /// abort: whatever was already flushed stays, pending bytes are dropped.
    pub(crate) fn discard(&mut self) {
        self.sector = None;
        self.dirty = false;
    }
}

fn read_retry<D: BlockDevice>(
    dev: &mut D,
    sector: u32,
    buf: &mut [u8; SECTOR_SIZE],
) -> Result<()> {
    for _ in 0..READ_ATTEMPTS {
        if dev.read_sector(sector, buf).is_ok() {
            return Ok(());
        }
    }
    Err(Error::Io(sector))
}

// Little-endian field accessors shared by every on-disk codec in the crate.

pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn write_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}
