//! Shared test fixtures: an in-memory block device, `fatfs`-formatted
//! images for cross-checking against an independent FAT implementation,
//! and a hand-rolled formatter for geometries `fatfs` will not produce.

use std::io::{Cursor, Read, Write};

use crate::error::{Error, Result};
use crate::volume::Volume;
use crate::{BlockDevice, TimeSource, Timestamp, SECTOR_SIZE};

// ─── Mock block device ─────────────────────────────────────────────────────────

pub(crate) struct MemDisk(pub Vec<u8>);

impl MemDisk {
    pub(crate) fn blank(sectors: usize) -> Self {
        MemDisk(vec![0u8; sectors * SECTOR_SIZE])
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&mut self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let off = sector as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > self.0.len() {
            return Err(Error::Io(sector));
        }
        buf.copy_from_slice(&self.0[off..off + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        let off = sector as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > self.0.len() {
            return Err(Error::Io(sector));
        }
        self.0[off..off + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

// ─── Clocks ────────────────────────────────────────────────────────────────────

pub(crate) struct FixedClock;

impl TimeSource for FixedClock {
    fn now(&mut self) -> Option<Timestamp> {
        Some(Timestamp {
            year: 2024,
            month: 5,
            day: 17,
            weekday: 5,
            hour: 12,
            minute: 30,
            second: 42,
        })
    }
}

pub(crate) struct NoClock;

impl TimeSource for NoClock {
    fn now(&mut self) -> Option<Timestamp> {
        None
    }
}

// ─── fatfs-formatted images ────────────────────────────────────────────────────

/// 40 MB FAT32 image. With the `Fat32` type hint `fatfs` picks 512-byte
/// clusters; FAT32 requires ≥ 65 525 data clusters, hence the size.
pub(crate) fn make_disk() -> MemDisk {
    const SIZE: usize = 40 * 1024 * 1024;
    let mut cursor = Cursor::new(vec![0u8; SIZE]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32),
    )
    .expect("format_volume failed");
    // `format_volume` leaves the FSInfo free count as the 0xFFFFFFFF "unknown"
    // sentinel; mount, force the recalculation, and unmount so the image carries
    // a concrete free count the way a real formatter's finalized volume does.
    finalize_fsinfo(&mut cursor);
    MemDisk(cursor.into_inner())
}

/// Mount via `fatfs`, force the free-cluster recalculation, and unmount so the
/// FSInfo sector holds a concrete (trusted) free count.
fn finalize_fsinfo(cursor: &mut Cursor<Vec<u8>>) {
    let fs = fatfs::FileSystem::new(&mut *cursor, fatfs::FsOptions::new())
        .expect("FileSystem::new failed");
    fs.stats().expect("stats failed");
    fs.unmount().expect("unmount failed");
}

/// 280 MB FAT32 image with 4096-byte clusters (the smallest size at which
/// that cluster size still yields ≥ 65 525 clusters).
pub(crate) fn make_disk_4k_clusters() -> MemDisk {
    const SIZE: usize = 280 * 1024 * 1024;
    let mut cursor = Cursor::new(vec![0u8; SIZE]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new()
            .fat_type(fatfs::FatType::Fat32)
            .bytes_per_cluster(4096),
    )
    .expect("format_volume failed");
    MemDisk(cursor.into_inner())
}

/// Write a file to the image via `fatfs`.
pub(crate) fn write_via_fatfs(disk: &mut MemDisk, name: &str, content: &[u8]) {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new())
        .expect("FileSystem::new failed");
    let mut f = fs.root_dir().create_file(name).expect("create_file failed");
    f.truncate().unwrap();
    f.write_all(content).unwrap();
}

pub(crate) fn disk_with_file(name: &str, content: &[u8]) -> MemDisk {
    let mut disk = make_disk();
    write_via_fatfs(&mut disk, name, content);
    disk
}

pub(crate) fn disk_with_files(files: &[(&str, &[u8])]) -> MemDisk {
    let mut disk = make_disk();
    for (name, content) in files {
        write_via_fatfs(&mut disk, name, content);
    }
    disk
}

/// Read a file from the image via `fatfs` and return its contents.
pub(crate) fn read_via_fatfs(disk: &mut MemDisk, name: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let mut f = fs.root_dir().open_file(name).unwrap();
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    buf
}

/// Flip a byte of the FSInfo trail signature.
pub(crate) fn corrupt_fsinfo_trailer(disk: &mut MemDisk, vol: &Volume) {
    let off = vol.fsinfo_sector() as usize * SECTOR_SIZE + 508;
    disk.0[off] ^= 0xFF;
}

// ─── MBR-partitioned image ─────────────────────────────────────────────────────

pub(crate) const MBR_PART_START: u32 = 2048;

/// 40 MB FAT32 volume behind an MBR whose first partition starts at
/// sector 2048, the layout SD formatters produce.
pub(crate) fn make_mbr_disk() -> MemDisk {
    const VOL_SIZE: usize = 40 * 1024 * 1024;
    let part_off = MBR_PART_START as usize * SECTOR_SIZE;
    let mut img = vec![0u8; part_off + VOL_SIZE];
    {
        let mut cursor = Cursor::new(&mut img[part_off..]);
        fatfs::format_volume(
            &mut cursor,
            fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32),
        )
        .expect("format_volume failed");
    }
    // Formatters record the partition offset in the BPB hidden-sectors
    // field; the driver derives the data-area position from it.
    img[part_off + 28..part_off + 32].copy_from_slice(&MBR_PART_START.to_le_bytes());

    // Partition table entry 1: active, type 0x0C (FAT32 LBA).
    img[446] = 0x80;
    img[446 + 4] = 0x0C;
    img[446 + 8..446 + 12].copy_from_slice(&MBR_PART_START.to_le_bytes());
    img[446 + 12..446 + 16].copy_from_slice(&((VOL_SIZE / SECTOR_SIZE) as u32).to_le_bytes());
    img[510] = 0x55;
    img[511] = 0xAA;
    MemDisk(img)
}

/// Read a file from the partition of an MBR image via `fatfs`.
pub(crate) fn read_via_fatfs_mbr(disk: &mut MemDisk, name: &str) -> Vec<u8> {
    let part_off = MBR_PART_START as usize * SECTOR_SIZE;
    let mut cursor = Cursor::new(&mut disk.0[part_off..]);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let mut f = fs.root_dir().open_file(name).unwrap();
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    buf
}

// ─── Hand-rolled formatter ─────────────────────────────────────────────────────

/// Minimal FAT32 formatter for geometries `fatfs` refuses, e.g. a 64 MiB
/// card with 8 sectors per cluster. Lays down the boot sector, a valid
/// FSInfo sector, both FATs with the root cluster claimed, and a zeroed
/// root directory.
pub(crate) fn make_raw_volume(sectors_per_cluster: u8, total_sectors: u32) -> MemDisk {
    let reserved: u16 = 32;
    let fat_count: u8 = 2;

    // Fixed-point iteration for the FAT size, the way real formatters do it.
    let mut fat_size = 1u32;
    loop {
        let data = total_sectors - reserved as u32 - fat_count as u32 * fat_size;
        let clusters = data / sectors_per_cluster as u32;
        let needed = ((clusters + 2) * 4).div_ceil(SECTOR_SIZE as u32);
        if needed <= fat_size {
            break;
        }
        fat_size = needed;
    }
    let data_sectors = total_sectors - reserved as u32 - fat_count as u32 * fat_size;
    let clusters = data_sectors / sectors_per_cluster as u32;

    let mut img = vec![0u8; total_sectors as usize * SECTOR_SIZE];

    // Boot sector
    img[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    img[3..11].copy_from_slice(b"MSWIN4.1");
    img[11..13].copy_from_slice(&512u16.to_le_bytes());
    img[13] = sectors_per_cluster;
    img[14..16].copy_from_slice(&reserved.to_le_bytes());
    img[16] = fat_count;
    img[21] = 0xF8;
    img[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    img[36..40].copy_from_slice(&fat_size.to_le_bytes());
    img[44..48].copy_from_slice(&2u32.to_le_bytes());
    img[48..50].copy_from_slice(&1u16.to_le_bytes());
    img[50..52].copy_from_slice(&6u16.to_le_bytes());
    img[510] = 0x55;
    img[511] = 0xAA;

    // FSInfo sector
    let fs = SECTOR_SIZE;
    img[fs..fs + 4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
    img[fs + 484..fs + 488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
    img[fs + 488..fs + 492].copy_from_slice(&(clusters - 1).to_le_bytes());
    img[fs + 492..fs + 496].copy_from_slice(&3u32.to_le_bytes());
    img[fs + 508..fs + 512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());

    // FATs: media/reserved entries plus the root cluster's end-of-chain.
    for f in 0..fat_count as u32 {
        let base = (reserved as u32 + f * fat_size) as usize * SECTOR_SIZE;
        img[base..base + 4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
        img[base + 4..base + 8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        img[base + 8..base + 12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
    }

    MemDisk(img)
}
