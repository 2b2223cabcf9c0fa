//! Regular-file content operations: reading a file's bytes and the two
//! write modes SPEC_FULL.md §4.7 defines, overwrite (truncate then append)
//! and append.
//!
//! These are free functions over a [`ShortDirEntry`] rather than methods on
//! a handle type: the handle (in [`crate::entry`]) owns the directory
//! write-back these leave to the caller, since a write here only updates
//! the entry's in-memory fields (size, first cluster, timestamps).

use crate::cluster_io::{self, ClusterIo};
use crate::codec;
use crate::dir_entry::ShortDirEntry;
use crate::error::Result;
use crate::fat_table::FatTable;

/// Reads the entire file content, per `entry.file_size()`.
pub fn read_all(io: &ClusterIo, fat: &FatTable, entry: &ShortDirEntry) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; entry.file_size() as usize];
    read_at(io, fat, entry, 0, &mut buf)?;
    Ok(buf)
}

/// Reads up to `buf.len()` bytes starting `offset` bytes into the file,
/// stopping at `file_size` regardless of chain length. Returns the number
/// of bytes actually read.
pub fn read_at(io: &ClusterIo, fat: &FatTable, entry: &ShortDirEntry, offset: usize, buf: &mut [u8]) -> Result<usize> {
    let file_size = entry.file_size() as usize;
    if offset >= file_size {
        return Ok(0);
    }
    let n = buf.len().min(file_size - offset);
    cluster_io::read_chain(io, fat, entry.first_cluster(), offset, &mut buf[..n])
}

/// Overwrites the file's entire content with `bytes`: frees the existing
/// chain (if any), resets size to zero, then appends.
pub fn write(io: &ClusterIo, fat: &mut FatTable, entry: &mut ShortDirEntry, bytes: &[u8]) -> Result<()> {
    let first = entry.first_cluster();
    if first != 0 {
        fat.free_chain(first)?;
    }
    entry.set_first_cluster(0);
    entry.set_file_size(0);
    append(io, fat, entry, bytes)
}

/// Appends `bytes` to the end of the file, extending the cluster chain as
/// needed and updating size and write timestamp.
pub fn append(io: &ClusterIo, fat: &mut FatTable, entry: &mut ShortDirEntry, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let offset = entry.file_size() as usize;
    let mut first = entry.first_cluster();
    cluster_io::write_chain(io, fat, &mut first, offset, bytes)?;
    entry.set_first_cluster(first);
    entry.set_file_size((offset + bytes.len()) as u32);

    let (date, time, _) = codec::now_as_fat();
    let (y, mo, d) = codec::unpack_fat_date(date);
    let (h, mi, s) = codec::unpack_fat_time(time);
    entry.set_written(y, mo, d, h, mi, s);
    entry.set_accessed(y, mo, d);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::{BIOSParameterBlock, FatType};
    use crate::device::test_support::MemDevice;
    use crate::device::Device;
    use std::sync::Arc;

    fn make_fixture() -> (Arc<ClusterIo>, FatTable) {
        let bytes_per_sector = 512usize;
        let sectors_per_cluster = 1usize;
        let reserved = 1usize;
        let fat_size = 1usize;
        let num_fats = 1usize;
        let data_start = reserved + num_fats * fat_size;
        let total_bytes = (data_start + 32) * bytes_per_sector;

        let mut image = vec![0u8; total_bytes];
        image[510] = 0x55;
        image[511] = 0xAA;
        image[11..13].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        image[13] = sectors_per_cluster as u8;
        image[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
        image[16] = num_fats as u8;
        image[22..24].copy_from_slice(&(fat_size as u16).to_le_bytes());
        image[19..21].copy_from_slice(&((data_start + 32) as u16).to_le_bytes());

        let device: Arc<dyn Device> = Arc::new(MemDevice::new(image));
        let mut sector = vec![0u8; 512];
        device.read_at(0, &mut sector).unwrap();
        let boot = BIOSParameterBlock::parse(&sector).unwrap();
        assert_eq!(boot.fat_type(), FatType::Fat12);

        let io = Arc::new(ClusterIo::new(Arc::clone(&device), &boot));
        let fat = FatTable::new(
            Arc::clone(&device),
            boot.fat_type(),
            vec![boot.fat1_offset()],
            boot.data_cluster_cnt() as u32 + 2,
        );
        (io, fat)
    }

    #[test]
    fn write_then_read_all_round_trips() {
        let (io, mut fat) = make_fixture();
        let mut entry = ShortDirEntry::empty();
        write(&io, &mut fat, &mut entry, b"hello world").unwrap();
        assert_eq!(entry.file_size(), 11);
        let back = read_all(&io, &fat, &entry).unwrap();
        assert_eq!(back, b"hello world");
    }

    #[test]
    fn append_extends_existing_content() {
        let (io, mut fat) = make_fixture();
        let mut entry = ShortDirEntry::empty();
        write(&io, &mut fat, &mut entry, b"abc").unwrap();
        append(&io, &mut fat, &mut entry, b"def").unwrap();
        assert_eq!(read_all(&io, &fat, &entry).unwrap(), b"abcdef");
    }

    #[test]
    fn write_truncates_previous_content() {
        let (io, mut fat) = make_fixture();
        let mut entry = ShortDirEntry::empty();
        write(&io, &mut fat, &mut entry, b"a long first write").unwrap();
        write(&io, &mut fat, &mut entry, b"short").unwrap();
        assert_eq!(entry.file_size(), 5);
        assert_eq!(read_all(&io, &fat, &entry).unwrap(), b"short");
    }

    #[test]
    fn read_at_offset_past_eof_returns_empty() {
        let (io, mut fat) = make_fixture();
        let mut entry = ShortDirEntry::empty();
        write(&io, &mut fat, &mut entry, b"abc").unwrap();
        let mut buf = [0u8; 4];
        let n = read_at(&io, &fat, &entry, 10, &mut buf).unwrap();
        assert_eq!(n, 0);
    }
}
