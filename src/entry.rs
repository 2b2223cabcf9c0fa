//! [`Entry`]: a handle to one named thing in the tree, file or directory,
//! the shape callers actually hold once the mount has been opened.
//!
//! SPEC_FULL.md §9 collapses what would otherwise be a `File`/`Directory`
//! inheritance hierarchy into one tagged enum; each variant carries a
//! back-reference to the [`Directory`] payload that owns its 32-byte
//! record so a size, cluster, or timestamp change can be written back in
//! place without the caller re-resolving the path.

use std::cell::RefCell;
use std::sync::Arc;

use crate::cluster_io::ClusterIo;
use crate::dir_entry::ShortDirEntry;
use crate::directory::{Directory, ResolvedEntry};
use crate::error::{FatError, Result};
use crate::file;
use crate::fs::FileSystem;
use crate::{ATTR_ARCHIVE, ATTR_DIRECTORY};

pub struct FileHandle {
    fs: FileSystem,
    parent: Arc<Directory>,
    record: RefCell<ResolvedEntry>,
}

pub struct DirHandle {
    fs: FileSystem,
    /// `None` only for the true root, which isn't an entry of any
    /// directory and so has no record of its own to write back.
    parent: Option<Arc<Directory>>,
    record: Option<RefCell<ResolvedEntry>>,
    dir: Arc<Directory>,
}

pub enum Entry {
    File(FileHandle),
    Directory(DirHandle),
}

impl DirHandle {
    pub(crate) fn root(fs: FileSystem, dir: Arc<Directory>) -> Self {
        Self {
            fs,
            parent: None,
            record: None,
            dir,
        }
    }
}

impl Entry {
    pub fn name(&self) -> String {
        match self {
            Entry::File(h) => h.record.borrow().display_name(),
            Entry::Directory(h) => match &h.record {
                Some(r) => r.borrow().display_name(),
                None => "/".to_string(),
            },
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    pub fn size(&self) -> u32 {
        match self {
            Entry::File(h) => h.record.borrow().short.file_size(),
            Entry::Directory(_) => 0,
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            Entry::File(h) => h.record.borrow().short.is_read_only(),
            Entry::Directory(h) => h.record.as_ref().map(|r| r.borrow().short.is_read_only()).unwrap_or(false),
        }
    }

    /// The raw `ATTR_*` byte (`ATTR_READ_ONLY`/`ATTR_HIDDEN`/`ATTR_SYSTEM`/
    /// `ATTR_DIRECTORY`/`ATTR_ARCHIVE`/`ATTR_VOLUME_ID`). The true root has
    /// no record of its own and reports `ATTR_DIRECTORY`.
    pub fn attr(&self) -> u8 {
        match self {
            Entry::File(h) => h.record.borrow().short.attr(),
            Entry::Directory(h) => h
                .record
                .as_ref()
                .map(|r| r.borrow().short.attr())
                .unwrap_or(crate::ATTR_DIRECTORY),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.attr() & crate::ATTR_HIDDEN != 0
    }

    pub fn is_system(&self) -> bool {
        self.attr() & crate::ATTR_SYSTEM != 0
    }

    /// Creation timestamp as `(year, month, day, hour, minute, second,
    /// tenths-of-a-second)`. The true root has no record of its own and has
    /// no creation timestamp to report.
    pub fn created(&self) -> Option<(u16, u8, u8, u8, u8, u8, u8)> {
        match self {
            Entry::File(h) => Some(h.record.borrow().short.created()),
            Entry::Directory(h) => h.record.as_ref().map(|r| r.borrow().short.created()),
        }
    }

    /// Last-written timestamp as `(year, month, day, hour, minute, second)`.
    pub fn modified(&self) -> Option<(u16, u8, u8, u8, u8, u8)> {
        match self {
            Entry::File(h) => Some(h.record.borrow().short.written()),
            Entry::Directory(h) => h.record.as_ref().map(|r| r.borrow().short.written()),
        }
    }

    /// Last-accessed date as `(year, month, day)`.
    pub fn accessed(&self) -> Option<(u16, u8, u8)> {
        match self {
            Entry::File(h) => Some(h.record.borrow().short.accessed()),
            Entry::Directory(h) => h.record.as_ref().map(|r| r.borrow().short.accessed()),
        }
    }

    fn dir_handle(&self) -> Result<&DirHandle> {
        match self {
            Entry::Directory(h) => Ok(h),
            Entry::File(h) => Err(FatError::NotADirectory(h.record.borrow().display_name())),
        }
    }

    /// Lists the live entries of a directory; fails on a file.
    pub fn list(&self) -> Result<Vec<Entry>> {
        let h = self.dir_handle()?;
        let fat = h.fs.fat().read().expect("fat lock poisoned");
        let resolved = h.dir.list(&fat)?;
        drop(fat);
        Ok(resolved
            .into_iter()
            .map(|r| wrap(&h.fs, Arc::clone(&h.dir), r))
            .collect())
    }

    /// Looks up a direct child by name; fails with `NotFound` if absent.
    pub fn get_entry(&self, name: &str) -> Result<Entry> {
        let h = self.dir_handle()?;
        let fat = h.fs.fat().read().expect("fat lock poisoned");
        let resolved = h.dir.find_by_name(&fat, name)?;
        drop(fat);
        match resolved {
            Some(r) => Ok(wrap(&h.fs, Arc::clone(&h.dir), r)),
            None => Err(FatError::NotFound(name.to_string())),
        }
    }

    /// Resolves a `/`-separated path relative to this entry (absolute
    /// paths from the root work the same way, since leading empty segments
    /// are skipped).
    pub fn find_path(&self, path: &str) -> Result<Entry> {
        let mut current = self.clone_handle();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.get_entry(segment)?;
        }
        Ok(current)
    }

    fn clone_handle(&self) -> Entry {
        match self {
            Entry::File(h) => Entry::File(FileHandle {
                fs: h.fs.clone(),
                parent: Arc::clone(&h.parent),
                record: RefCell::new(h.record.borrow().clone()),
            }),
            Entry::Directory(h) => Entry::Directory(DirHandle {
                fs: h.fs.clone(),
                parent: h.parent.clone(),
                record: h.record.as_ref().map(|r| RefCell::new(r.borrow().clone())),
                dir: Arc::clone(&h.dir),
            }),
        }
    }

    /// Creates an empty file named `name` in this directory.
    pub fn create_file(&self, name: &str) -> Result<Entry> {
        let h = self.dir_handle()?;
        h.fs.check_writable()?;
        let mut fat = h.fs.fat().write().expect("fat lock poisoned");
        let resolved = h.dir.create(&mut fat, name, ATTR_ARCHIVE, 0)?;
        drop(fat);
        h.fs.device().flush()?;
        Ok(Entry::File(FileHandle {
            fs: h.fs.clone(),
            parent: Arc::clone(&h.dir),
            record: RefCell::new(resolved),
        }))
    }

    /// Creates a subdirectory named `name`, allocating its first cluster
    /// and bootstrapping its `.`/`..` records.
    pub fn create_directory(&self, name: &str) -> Result<Entry> {
        let h = self.dir_handle()?;
        h.fs.check_writable()?;
        let mut fat = h.fs.fat().write().expect("fat lock poisoned");
        let own_cluster = fat.allocate()?;
        h.fs.io().zero_cluster(own_cluster)?;

        let resolved = match h.dir.create(&mut fat, name, ATTR_DIRECTORY, own_cluster) {
            Ok(r) => r,
            Err(e) => {
                fat.free_chain(own_cluster)?;
                return Err(e);
            }
        };

        let new_dir = Arc::new(Directory::from_cluster(Arc::clone(h.fs.io()), own_cluster));
        let parent_cluster = h.dir.first_cluster().unwrap_or(0);
        new_dir.write_dot_entries(&mut fat, own_cluster, parent_cluster)?;
        drop(fat);
        h.fs.device().flush()?;

        Ok(Entry::Directory(DirHandle {
            fs: h.fs.clone(),
            parent: Some(Arc::clone(&h.dir)),
            record: Some(RefCell::new(resolved)),
            dir: new_dir,
        }))
    }

    /// Removes this entry from its parent directory, freeing its cluster
    /// chain. Fails with `DirectoryNotEmpty` for a non-empty directory, and
    /// refuses to delete the true root.
    pub fn delete(&self) -> Result<()> {
        match self {
            Entry::File(h) => {
                h.fs.check_writable()?;
                let mut fat = h.fs.fat().write().expect("fat lock poisoned");
                let record = h.record.borrow();
                let first = record.short.first_cluster();
                if first != 0 {
                    fat.free_chain(first)?;
                }
                h.parent.remove(&mut fat, &record)?;
                drop(fat);
                h.fs.device().flush()
            }
            Entry::Directory(h) => {
                h.fs.check_writable()?;
                let Some(parent) = &h.parent else {
                    return Err(FatError::InvalidName("cannot delete the root directory".to_string()));
                };
                let mut fat = h.fs.fat().write().expect("fat lock poisoned");
                if !h.dir.is_effectively_empty(&fat)? {
                    return Err(FatError::DirectoryNotEmpty(self.name()));
                }
                let record = h.record.as_ref().expect("non-root directory always has a record").borrow();
                if let Some(cluster) = h.dir.first_cluster() {
                    fat.free_chain(cluster)?;
                }
                parent.remove(&mut fat, &record)?;
                drop(fat);
                h.fs.device().flush()
            }
        }
    }

    /// Reads the entire content of a file; fails on a directory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let Entry::File(h) = self else {
            return Err(FatError::IsADirectory(self.name()));
        };
        let fat = h.fs.fat().read().expect("fat lock poisoned");
        file::read_all(h.fs.io(), &fat, &h.record.borrow().short)
    }

    /// Overwrites the entire content of a file (truncate then append).
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.with_file_mut(bytes, file::write)
    }

    /// Appends `bytes` to the end of a file.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        self.with_file_mut(bytes, file::append)
    }

    fn with_file_mut(
        &self,
        bytes: &[u8],
        op: impl FnOnce(&ClusterIo, &mut crate::fat_table::FatTable, &mut ShortDirEntry, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let Entry::File(h) = self else {
            return Err(FatError::IsADirectory(self.name()));
        };
        h.fs.check_writable()?;
        let mut record = h.record.borrow_mut();
        if record.short.is_read_only() {
            return Err(FatError::ReadOnlyAttribute(record.display_name()));
        }
        let mut fat = h.fs.fat().write().expect("fat lock poisoned");
        op(h.fs.io(), &mut fat, &mut record.short, bytes)?;
        h.parent.rewrite(&mut fat, record.short_offset, record.short.as_bytes())?;
        drop(fat);
        h.fs.device().flush()
    }
}

fn wrap(fs: &FileSystem, parent: Arc<Directory>, resolved: ResolvedEntry) -> Entry {
    if resolved.short.is_dir() {
        let cluster = resolved.short.first_cluster();
        Entry::Directory(DirHandle {
            fs: fs.clone(),
            parent: Some(parent),
            record: Some(RefCell::new(resolved)),
            dir: Arc::new(Directory::from_cluster(Arc::clone(fs.io()), cluster)),
        })
    } else {
        Entry::File(FileHandle {
            fs: fs.clone(),
            parent,
            record: RefCell::new(resolved),
        })
    }
}
