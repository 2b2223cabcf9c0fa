//! The mounted volume: owns the `Device`, the parsed boot sector, and the
//! FAT, and hands out the root [`crate::entry::Entry`] that every other
//! operation descends from.
//!
//! `FileSystem` is a cheap-to-clone shared handle (an `Arc` around the real
//! state) rather than something callers borrow, matching SPEC_FULL.md §5's
//! reader/writer-lock discipline: the FAT is guarded individually so one
//! directory scan never blocks an unrelated allocation.

use std::sync::{Arc, RwLock};

use log::info;

use crate::boot_sector::{BIOSParameterBlock, FatType, FsInfo};
use crate::cache::CachedDevice;
use crate::cluster_io::ClusterIo;
use crate::config::MountOptions;
use crate::device::Device;
use crate::directory::Directory;
use crate::entry::{DirHandle, Entry};
use crate::error::{FatError, Result};
use crate::fat_table::FatTable;

/// Sector-granularity cache capacity; generous enough that a typical
/// directory-walk-then-read workload stays hot without holding an unbounded
/// amount of memory.
const CACHE_CAPACITY: usize = 256;

struct Inner {
    device: Arc<dyn Device>,
    boot: BIOSParameterBlock,
    fat: RwLock<FatTable>,
    io: Arc<ClusterIo>,
    options: MountOptions,
}

#[derive(Clone)]
pub struct FileSystem(Arc<Inner>);

impl FileSystem {
    /// Mounts `device`: reads and validates the boot sector, then builds the
    /// FAT table and cluster-I/O translator every other operation uses.
    pub fn mount(device: Arc<dyn Device>, options: MountOptions) -> Result<Self> {
        let mut sector = vec![0u8; BIOSParameterBlock::SIZE.max(512)];
        device.read_at(0, &mut sector)?;
        let boot = BIOSParameterBlock::parse(&sector)?;

        let cached: Arc<dyn Device> =
            Arc::new(CachedDevice::new(device, boot.bytes_per_sector(), CACHE_CAPACITY));
        let io = Arc::new(ClusterIo::new(Arc::clone(&cached), &boot));

        let fat_offsets = (0..boot.fat_cnt()).map(|i| boot.fat_offset(i)).collect();
        let fat = FatTable::new(
            Arc::clone(&cached),
            boot.fat_type(),
            fat_offsets,
            boot.data_cluster_cnt() as u32 + 2,
        );

        info!(
            "mounted {:?}: {} bytes/sector, {} sectors/cluster, {} data clusters",
            boot.fat_type(),
            boot.bytes_per_sector(),
            boot.sectors_per_cluster(),
            boot.data_cluster_cnt()
        );

        if boot.fat_type() == FatType::Fat32 && options.trust_fsinfo() {
            let mut fsinfo_sector = vec![0u8; boot.bytes_per_sector()];
            let at = (boot.fat_info_sector() * boot.bytes_per_sector()) as u64;
            if cached.read_at(at, &mut fsinfo_sector).is_ok() {
                if let Ok(info) = FsInfo::parse(&fsinfo_sector) {
                    if !info.check_signature() {
                        log::warn!("FSInfo signature invalid; ignoring free-cluster hint");
                    }
                }
            }
        }

        Ok(Self(Arc::new(Inner {
            device: cached,
            boot,
            fat: RwLock::new(fat),
            io,
            options,
        })))
    }

    pub fn fat_type(&self) -> FatType {
        self.0.boot.fat_type()
    }

    pub fn cluster_size(&self) -> usize {
        self.0.io.cluster_size()
    }

    pub fn read_only(&self) -> bool {
        self.0.options.read_only()
    }

    pub(crate) fn io(&self) -> &Arc<ClusterIo> {
        &self.0.io
    }

    pub(crate) fn device(&self) -> &Arc<dyn Device> {
        &self.0.device
    }

    pub(crate) fn fat(&self) -> &RwLock<FatTable> {
        &self.0.fat
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.0.options.read_only() {
            return Err(FatError::ReadOnlyAttribute("filesystem mounted read-only".to_string()));
        }
        Ok(())
    }

    /// The root directory, as an [`Entry::Directory`].
    pub fn root(&self) -> Entry {
        let dir = if self.fat_type() == FatType::Fat32 {
            Arc::new(Directory::from_cluster(Arc::clone(&self.0.io), self.0.boot.root_cluster()))
        } else {
            Arc::new(Directory::fixed_root(Arc::clone(&self.0.io)))
        };
        Entry::Directory(DirHandle::root(self.clone(), dir))
    }

    /// Resolves an absolute, `/`-separated path to its entry.
    pub fn get_entry(&self, path: &str) -> Result<Entry> {
        self.root().find_path(path)
    }

    pub fn get_file(&self, path: &str) -> Result<Entry> {
        let entry = self.get_entry(path)?;
        if entry.is_directory() {
            return Err(FatError::IsADirectory(path.to_string()));
        }
        Ok(entry)
    }

    pub fn create_file(&self, path: &str) -> Result<Entry> {
        let (parent, name) = split_parent(path)?;
        self.root().find_path(parent)?.create_file(name)
    }

    pub fn create_directory(&self, path: &str) -> Result<Entry> {
        let (parent, name) = split_parent(path)?;
        self.root().find_path(parent)?.create_directory(name)
    }

    /// Flushes every cached sector and the underlying device, per
    /// SPEC_FULL.md §4.1's "clean close always leaves a valid image"
    /// guarantee.
    pub fn close(&self) -> Result<()> {
        self.0.device.flush()
    }
}

fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_start_matches('/');
    match trimmed.rfind('/') {
        Some(i) => Ok((&path[..path.len() - (trimmed.len() - i)], &trimmed[i + 1..])),
        None => Ok(("/", trimmed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    fn formatted_fat12_image() -> Vec<u8> {
        let bytes_per_sector = 512usize;
        let sectors_per_cluster = 1usize;
        let reserved = 1usize;
        let fat_size = 1usize;
        let num_fats = 1usize;
        let data_start = reserved + num_fats * fat_size;
        let total_sectors = data_start + 32;

        let mut image = vec![0u8; total_sectors * bytes_per_sector];
        image[510] = 0x55;
        image[511] = 0xAA;
        image[11..13].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        image[13] = sectors_per_cluster as u8;
        image[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
        image[16] = num_fats as u8;
        image[22..24].copy_from_slice(&(fat_size as u16).to_le_bytes());
        image[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
        image
    }

    #[test]
    fn mount_detects_fat12_and_exposes_root() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(formatted_fat12_image()));
        let fs = FileSystem::mount(device, MountOptions::new()).unwrap();
        assert_eq!(fs.fat_type(), FatType::Fat12);
        assert!(fs.root().is_directory());
    }

    #[test]
    fn create_file_then_get_file_round_trips() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(formatted_fat12_image()));
        let fs = FileSystem::mount(device, MountOptions::new()).unwrap();
        fs.create_file("/hello.txt").unwrap();
        let entry = fs.get_file("/hello.txt").unwrap();
        assert!(!entry.is_directory());
    }

    #[test]
    fn read_only_mount_rejects_create() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(formatted_fat12_image()));
        let fs = FileSystem::mount(device, MountOptions::new().with_read_only(true)).unwrap();
        let err = fs.create_file("/hello.txt").unwrap_err();
        assert!(matches!(err, FatError::ReadOnlyAttribute(_)));
    }
}
