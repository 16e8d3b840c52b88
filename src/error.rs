use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong between a filesystem call and the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A sector transfer failed even after the bounded retry loop.
    #[error("sector {0} transfer failed")]
    Io(u32),
    /// Sector 0 is neither a FAT32 boot sector nor an MBR pointing at one.
    #[error("no FAT32 boot sector found")]
    NoBootSector,
    /// An MBR or boot-sector trailer signature did not match 0xAA55.
    #[error("boot record signature mismatch")]
    InvalidSignature,
    /// The BPB parsed, but describes a volume this driver cannot drive
    /// (sector size other than 512, zero cluster size, zero FAT size, ...).
    #[error("unsupported volume geometry")]
    UnsupportedGeometry,
    /// The base of an 8.3 name is longer than 8 characters.
    #[error("file name does not fit 8.3 format")]
    NameTooLong,
    /// The free-cluster scan covered the whole FAT without finding a slot.
    #[error("no free clusters left")]
    NoFreeSpace,
    /// No directory entry carries the requested name.
    #[error("file not found")]
    NotFound,
    /// A cluster chain hit the traversal bound, ran into a free/reserved
    /// entry, or ended before the directory entry's stored size.
    #[error("corrupt cluster chain")]
    CorruptChain,
}
