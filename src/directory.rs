//! Directory payload: scanning, LFN assembly, and creation/removal of
//! entries. A directory's 32-byte records live either in a cluster chain
//! (any directory on any variant, plus the root on FAT32) or in the fixed
//! root region addressed directly by [`ClusterIo`] (the FAT12/16 root).
//!
//! This module only knows how to read/write/scan one directory's records;
//! path resolution across multiple directories lives in [`crate::entry`].

use std::cell::Cell;
use std::sync::Arc;

use crate::cluster_io::{self, ClusterIo};
use crate::codec;
use crate::dir_entry::{build_lfn_chain, LongDirEntry, ShortDirEntry, DIR_ENTRY_SIZE};
use crate::error::{FatError, Result};
use crate::fat_table::FatTable;
use crate::{ATTR_DIRECTORY, ATTR_LONG_NAME};

/// Where a directory's records physically live.
#[derive(Debug, Clone, Copy)]
enum Start {
    Chain(u32),
    FixedRoot,
}

/// One fully-resolved directory entry: its short (8.3) record, the byte
/// offsets of every slot (LFN group, if any, plus the 8.3 record itself) it
/// occupies in the owning directory's payload, and its long name if it was
/// stored with one.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub short: ShortDirEntry,
    pub short_offset: usize,
    pub lfn_offsets: Vec<usize>,
    pub long_name: Option<String>,
}

impl ResolvedEntry {
    pub fn display_name(&self) -> String {
        self.long_name.clone().unwrap_or_else(|| self.short.name())
    }
}

pub struct Directory {
    io: Arc<ClusterIo>,
    start: Cell<Start>,
}

impl Directory {
    pub fn from_cluster(io: Arc<ClusterIo>, cluster: u32) -> Self {
        Self {
            io,
            start: Cell::new(Start::Chain(cluster)),
        }
    }

    pub fn fixed_root(io: Arc<ClusterIo>) -> Self {
        Self {
            io,
            start: Cell::new(Start::FixedRoot),
        }
    }

    /// `None` for the FAT12/16 fixed root, which has no cluster number.
    pub fn first_cluster(&self) -> Option<u32> {
        match self.start.get() {
            Start::Chain(c) => Some(c),
            Start::FixedRoot => None,
        }
    }

    fn read_slot(&self, fat: &FatTable, offset: usize) -> Result<Option<[u8; DIR_ENTRY_SIZE]>> {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        match self.start.get() {
            Start::FixedRoot => {
                if offset + DIR_ENTRY_SIZE > self.io.root_dir_byte_size() {
                    return Ok(None);
                }
                self.io.read_fixed_root(offset, &mut buf)?;
                Ok(Some(buf))
            }
            Start::Chain(cluster) => {
                let n = cluster_io::read_chain(&self.io, fat, cluster, offset, &mut buf)?;
                Ok(if n == DIR_ENTRY_SIZE { Some(buf) } else { None })
            }
        }
    }

    fn write_slot(&self, fat: &mut FatTable, offset: usize, bytes: &[u8; DIR_ENTRY_SIZE]) -> Result<()> {
        match self.start.get() {
            Start::FixedRoot => self.io.write_fixed_root(offset, bytes),
            Start::Chain(mut cluster) => {
                cluster_io::write_chain(&self.io, fat, &mut cluster, offset, bytes)?;
                self.start.set(Start::Chain(cluster));
                Ok(())
            }
        }
    }

    /// Writes an updated 32-byte record back at `offset`, e.g. after a
    /// file's size, first cluster, or timestamps changed in place.
    pub fn rewrite(&self, fat: &mut FatTable, offset: usize, bytes: &[u8; DIR_ENTRY_SIZE]) -> Result<()> {
        self.write_slot(fat, offset, bytes)
    }

    /// Grows the payload by one more cluster's worth of zeroed capacity.
    /// Fails for the fixed root, which cannot grow.
    fn grow(&self, fat: &mut FatTable) -> Result<()> {
        match self.start.get() {
            Start::FixedRoot => Err(FatError::RootDirFull),
            Start::Chain(cluster) => {
                let new_cluster = fat.extend_chain(cluster)?;
                self.io.zero_cluster(new_cluster)?;
                Ok(())
            }
        }
    }

    /// Visits every live (non-deleted, non-volume-label) logical entry in
    /// directory order, assembling LFN groups as it goes. Stops at the
    /// end-of-directory marker.
    fn for_each_entry(&self, fat: &FatTable, mut visit: impl FnMut(ResolvedEntry)) -> Result<()> {
        let mut offset = 0usize;
        let mut pending: Vec<LongDirEntry> = Vec::new();
        let mut pending_offsets: Vec<usize> = Vec::new();

        loop {
            let Some(buf) = self.read_slot(fat, offset)? else {
                break;
            };
            if buf[0] == 0x00 {
                break;
            }
            if buf[11] == ATTR_LONG_NAME {
                let lde = LongDirEntry::from_bytes(&buf)?;
                if !lde.is_free() {
                    pending.push(lde);
                    pending_offsets.push(offset);
                } else {
                    pending.clear();
                    pending_offsets.clear();
                }
                offset += DIR_ENTRY_SIZE;
                continue;
            }

            let sde = ShortDirEntry::from_bytes(&buf)?;
            if sde.is_deleted() {
                pending.clear();
                pending_offsets.clear();
                offset += DIR_ENTRY_SIZE;
                continue;
            }

            let checksum = sde.checksum();
            let long_name = if !pending.is_empty() && pending.iter().all(|e| e.checksum() == checksum) {
                Some(crate::dir_entry::assemble_lfn_chain(&pending))
            } else {
                None
            };
            if !sde.is_volume_id() {
                visit(ResolvedEntry {
                    short: sde,
                    short_offset: offset,
                    lfn_offsets: pending_offsets.clone(),
                    long_name,
                });
            }
            pending.clear();
            pending_offsets.clear();
            offset += DIR_ENTRY_SIZE;
        }
        Ok(())
    }

    /// Lists every live entry, excluding the volume label, in on-disk order.
    pub fn list(&self, fat: &FatTable) -> Result<Vec<ResolvedEntry>> {
        let mut out = Vec::new();
        self.for_each_entry(fat, |e| out.push(e))?;
        Ok(out)
    }

    /// Looks an entry up by long name first (exact UTF-16 match), then by
    /// short name (ASCII case-insensitive), per SPEC_FULL.md §4.7.
    pub fn find_by_name(&self, fat: &FatTable, name: &str) -> Result<Option<ResolvedEntry>> {
        let mut found = None;
        self.for_each_entry(fat, |e| {
            if found.is_some() {
                return;
            }
            let matches_long = e.long_name.as_deref() == Some(name);
            let matches_short = e.short.name().eq_ignore_ascii_case(name);
            if matches_long || matches_short {
                found = Some(e);
            }
        })?;
        Ok(found)
    }

    fn short_name_taken(&self, fat: &FatTable, stem: &str, ext: &str) -> Result<bool> {
        let candidate = codec::pack_short_name(stem, ext)?;
        let mut taken = false;
        self.for_each_entry(fat, |e| {
            if e.short.short_name_bytes() == candidate {
                taken = true;
            }
        })?;
        Ok(taken)
    }

    /// Synthesizes a collision-free 8.3 alias for `long_name`, per the
    /// `~K`-suffix algorithm of SPEC_FULL.md §4.5.
    fn synthesize_short_name(&self, fat: &FatTable, long_name: &str) -> Result<(String, String)> {
        let (raw_stem, raw_ext) = codec::split_name_ext(long_name);
        let stem: String = raw_stem.chars().filter_map(clean_short_name_char).take(8).collect();
        let ext: String = raw_ext.chars().filter_map(clean_short_name_char).take(3).collect();
        let stem = if stem.is_empty() { "FILE".to_string() } else { stem };

        if !self.short_name_taken(fat, &stem, &ext)? {
            return Ok((stem, ext));
        }
        for k in 1u32..=999_999 {
            let suffix = format!("~{k}");
            let base_len = stem.len().min(8usize.saturating_sub(suffix.len()));
            let candidate = format!("{}{}", &stem[..base_len], suffix);
            if !self.short_name_taken(fat, &candidate, &ext)? {
                return Ok((candidate, ext));
            }
        }
        Err(FatError::ShortNameExhausted(long_name.to_string()))
    }

    /// Finds a contiguous run of `slots` free/deleted 32-byte records,
    /// extending the payload (or failing with `RootDirFull`) if none exists.
    fn find_free_run(&self, fat: &mut FatTable, slots: usize) -> Result<usize> {
        let mut offset = 0usize;
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        loop {
            let slot = self.read_slot(fat, offset)?;
            let buf = match slot {
                None => {
                    self.grow(fat)?;
                    continue;
                }
                Some(buf) => buf,
            };
            let free = buf[0] == 0x00 || buf[0] == 0xE5;
            if free {
                if run_len == 0 {
                    run_start = offset;
                }
                run_len += 1;
                if run_len == slots {
                    return Ok(run_start);
                }
            } else {
                run_len = 0;
            }
            offset += DIR_ENTRY_SIZE;
        }
    }

    /// Creates a new entry named `name` pointing at `cluster` (0 for an
    /// empty file), writing its LFN group (if needed) and 8.3 record.
    /// Fails with `AlreadyExists` if the name (long or short) already names
    /// a live entry.
    pub fn create(&self, fat: &mut FatTable, name: &str, attr: u8, cluster: u32) -> Result<ResolvedEntry> {
        if self.find_by_name(fat, name)?.is_some() {
            return Err(FatError::AlreadyExists(name.to_string()));
        }
        let needs_lfn = !codec::fits_short_form(name);
        let (stem, ext) = if needs_lfn {
            self.synthesize_short_name(fat, name)?
        } else {
            let (s, e) = codec::split_name_ext(name);
            (s.to_string(), e.to_string())
        };

        let mut short = ShortDirEntry::new(&stem, &ext, cluster, attr)?;
        let (date, time, tenths) = codec::now_as_fat();
        let (y, mo, d) = codec::unpack_fat_date(date);
        let (h, mi, s) = codec::unpack_fat_time(time);
        short.set_created(y, mo, d, h, mi, s, tenths);
        short.set_written(y, mo, d, h, mi, s);
        short.set_accessed(y, mo, d);

        let lfn_entries = if needs_lfn {
            build_lfn_chain(name, &short.short_name_bytes())
        } else {
            Vec::new()
        };

        let total_slots = lfn_entries.len() + 1;
        let run_start = self.find_free_run(fat, total_slots)?;

        let mut lfn_offsets = Vec::with_capacity(lfn_entries.len());
        let mut offset = run_start;
        for lfn in &lfn_entries {
            self.write_slot(fat, offset, lfn.as_bytes())?;
            lfn_offsets.push(offset);
            offset += DIR_ENTRY_SIZE;
        }
        let short_offset = offset;
        self.write_slot(fat, short_offset, short.as_bytes())?;

        Ok(ResolvedEntry {
            short,
            short_offset,
            lfn_offsets,
            long_name: needs_lfn.then(|| name.to_string()),
        })
    }

    /// Marks every slot of `entry` (its LFN group, if any, plus its 8.3
    /// record) deleted.
    pub fn remove(&self, fat: &mut FatTable, entry: &ResolvedEntry) -> Result<()> {
        let mut short = entry.short;
        short.delete();
        self.write_slot(fat, entry.short_offset, short.as_bytes())?;
        for &offset in &entry.lfn_offsets {
            let Some(buf) = self.read_slot(fat, offset)? else {
                continue;
            };
            let mut lde = LongDirEntry::from_bytes(&buf)?;
            lde.delete();
            self.write_slot(fat, offset, lde.as_bytes())?;
        }
        Ok(())
    }

    /// True if this directory's payload has no live entries other than `.`
    /// and `..` (the guard `Entry::delete` needs before freeing a non-root
    /// directory).
    pub fn is_effectively_empty(&self, fat: &FatTable) -> Result<bool> {
        let mut extra = false;
        self.for_each_entry(fat, |e| {
            let name = e.short.name();
            if name != "." && name != ".." {
                extra = true;
            }
        })?;
        Ok(!extra)
    }

    /// Writes the `.` and `..` bootstrap records for a freshly allocated
    /// directory cluster. `parent_cluster` is `0` when the parent is the
    /// FAT32 root, which has no cluster number of its own to point back to.
    pub fn write_dot_entries(&self, fat: &mut FatTable, own_cluster: u32, parent_cluster: u32) -> Result<()> {
        let mut dot = ShortDirEntry::new(".", "", own_cluster, ATTR_DIRECTORY)?;
        let mut dotdot = ShortDirEntry::new("..", "", parent_cluster, ATTR_DIRECTORY)?;
        let (date, time, tenths) = codec::now_as_fat();
        let (y, mo, d) = codec::unpack_fat_date(date);
        let (h, mi, s) = codec::unpack_fat_time(time);
        for e in [&mut dot, &mut dotdot] {
            e.set_created(y, mo, d, h, mi, s, tenths);
            e.set_written(y, mo, d, h, mi, s);
            e.set_accessed(y, mo, d);
        }
        self.write_slot(fat, 0, dot.as_bytes())?;
        self.write_slot(fat, DIR_ENTRY_SIZE, dotdot.as_bytes())?;
        Ok(())
    }
}

/// Characters the 8.3 short-name alphabet allows (SPEC_FULL.md §4.5);
/// everything else is dropped while synthesizing an alias.
fn clean_short_name_char(c: char) -> Option<char> {
    let upper = c.to_ascii_uppercase();
    let allowed = upper.is_ascii_alphanumeric() || "!#$%&'()-@^_`{}~".contains(upper);
    allowed.then_some(upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector::{BIOSParameterBlock, FatType};
    use crate::device::test_support::MemDevice;
    use crate::device::Device;
    use crate::ATTR_ARCHIVE;

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
    fn create_then_find_round_trips_a_short_name() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        dir.create(&mut fat, "HELLO.TXT", ATTR_ARCHIVE, 0).unwrap();
        let found = dir.find_by_name(&fat, "HELLO.TXT").unwrap().unwrap();
        assert_eq!(found.short.name(), "HELLO.TXT");
        assert!(found.long_name.is_none());
    }

    #[test]
    fn create_with_long_name_round_trips_and_sets_checksum() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        dir.create(&mut fat, "a very long file name.txt", ATTR_ARCHIVE, 0).unwrap();
        let found = dir.find_by_name(&fat, "a very long file name.txt").unwrap().unwrap();
        assert_eq!(found.long_name.as_deref(), Some("a very long file name.txt"));
        assert!(found.short.name().starts_with("AVERYL"));
    }

    #[test]
    fn short_alias_resolves_even_when_a_long_name_exists() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        dir.create(&mut fat, "a very long file name.txt", ATTR_ARCHIVE, 0).unwrap();
        let by_alias = dir.find_by_name(&fat, "AVERYL~1.TXT").unwrap().unwrap();
        assert_eq!(by_alias.long_name.as_deref(), Some("a very long file name.txt"));
    }

    #[test]
    fn colliding_long_names_get_distinct_numeric_tails() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        dir.create(&mut fat, "longname_one.txt", ATTR_ARCHIVE, 0).unwrap();
        dir.create(&mut fat, "longname_two.txt", ATTR_ARCHIVE, 0).unwrap();
        let a = dir.find_by_name(&fat, "longname_one.txt").unwrap().unwrap();
        let b = dir.find_by_name(&fat, "longname_two.txt").unwrap().unwrap();
        assert_ne!(a.short.name(), b.short.name());
        assert!(a.short.name().starts_with("LONGNA"));
        assert!(b.short.name().starts_with("LONGNA"));
    }

    #[test]
    fn create_duplicate_name_fails() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        dir.create(&mut fat, "DUP.TXT", ATTR_ARCHIVE, 0).unwrap();
        let err = dir.create(&mut fat, "DUP.TXT", ATTR_ARCHIVE, 0).unwrap_err();
        assert!(matches!(err, FatError::AlreadyExists(_)));
    }

    #[test]
    fn remove_marks_slots_deleted_and_list_skips_them() {
        let (io, mut fat) = make_fixture();
        let head = fat.allocate().unwrap();
        io.zero_cluster(head).unwrap();
        let dir = Directory::from_cluster(io, head);

        let entry = dir.create(&mut fat, "a very long file name.txt", ATTR_ARCHIVE, 0).unwrap();
        dir.remove(&mut fat, &entry).unwrap();
        assert!(dir.list(&fat).unwrap().is_empty());
    }
}
