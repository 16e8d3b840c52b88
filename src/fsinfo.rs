//! FSInfo sector access: the cached free-cluster count and next-free hint.
//!
//! Both values are advisory. Every access validates the sector's three
//! signatures first; getters report `None` and setters write nothing when
//! validation fails, so a corrupted FSInfo sector degrades the driver to
//! linear scans instead of feeding it garbage.

use crate::buffer::{read_u32, write_u32, Scratch};
use crate::error::Result;
use crate::volume::Volume;
use crate::BlockDevice;

const LEAD_SIGNATURE: u32 = 0x4161_5252;
const STRUCT_SIGNATURE: u32 = 0x6141_7272;
const TRAIL_SIGNATURE: u32 = 0xAA55_0000;

const LEAD_OFFSET: usize = 0;
const STRUCT_OFFSET: usize = 484;
const FREE_COUNT_OFFSET: usize = 488;
const NEXT_FREE_OFFSET: usize = 492;
const TRAIL_OFFSET: usize = 508;

/// Load the FSInfo sector and check its signatures.
fn load_validated<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
) -> Result<bool> {
    buf.load(dev, vol.fsinfo_sector())?;
    let sec = buf.bytes();
    Ok(read_u32(sec, LEAD_OFFSET) == LEAD_SIGNATURE
        && read_u32(sec, STRUCT_OFFSET) == STRUCT_SIGNATURE
        && read_u32(sec, TRAIL_OFFSET) == TRAIL_SIGNATURE)
}

fn get<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    offset: usize,
) -> Result<Option<u32>> {
    if !load_validated(dev, vol, buf)? {
        return Ok(None);
    }
    Ok(Some(read_u32(buf.bytes(), offset)))
}

fn set<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    offset: usize,
    value: u32,
) -> Result<bool> {
    if !load_validated(dev, vol, buf)? {
        return Ok(false);
    }
    write_u32(buf.bytes_mut(), offset, value);
    buf.flush(dev)?;
    Ok(true)
}

pub(crate) fn free_count<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
) -> Result<Option<u32>> {
    get(dev, vol, buf, FREE_COUNT_OFFSET)
}

/// Returns whether the value was actually written.
pub(crate) fn set_free_count<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    count: u32,
) -> Result<bool> {
    set(dev, vol, buf, FREE_COUNT_OFFSET, count)
}

pub(crate) fn next_free_hint<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
) -> Result<Option<u32>> {
    get(dev, vol, buf, NEXT_FREE_OFFSET)
}

/// Returns whether the value was actually written.
pub(crate) fn set_next_free_hint<D: BlockDevice>(
    dev: &mut D,
    vol: &Volume,
    buf: &mut Scratch,
    cluster: u32,
) -> Result<bool> {
    set(dev, vol, buf, NEXT_FREE_OFFSET, cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{corrupt_fsinfo_trailer, make_disk};

    fn mounted() -> (crate::testutil::MemDisk, Volume, Scratch) {
        let mut disk = make_disk();
        let mut buf = Scratch::new();
        let vol = Volume::mount(&mut disk, &mut buf).unwrap();
        (disk, vol, buf)
    }

    #[test]
    fn reads_values_behind_valid_signatures() {
        let (mut disk, vol, mut buf) = mounted();
        let count = free_count(&mut disk, &vol, &mut buf).unwrap();
        assert!(count.is_some(), "fatfs writes a valid FSInfo sector");
    }

    #[test]
    fn round_trips_both_fields() {
        let (mut disk, vol, mut buf) = mounted();
        assert!(set_free_count(&mut disk, &vol, &mut buf, 1234).unwrap());
        assert!(set_next_free_hint(&mut disk, &vol, &mut buf, 77).unwrap());
        assert_eq!(free_count(&mut disk, &vol, &mut buf).unwrap(), Some(1234));
        assert_eq!(next_free_hint(&mut disk, &vol, &mut buf).unwrap(), Some(77));
    }

    #[test]
    fn corrupted_trailer_disables_reads_and_writes() {
        let (mut disk, vol, mut buf) = mounted();
        corrupt_fsinfo_trailer(&mut disk, &vol);
        assert_eq!(free_count(&mut disk, &vol, &mut buf).unwrap(), None);
        assert!(!set_free_count(&mut disk, &vol, &mut buf, 9).unwrap());
        assert_eq!(next_free_hint(&mut disk, &vol, &mut buf).unwrap(), None);
    }
}
