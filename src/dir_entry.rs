//! The two 32-byte on-disk directory entry layouts: [`ShortDirEntry`] (the
//! 8.3 "alias" record, which alone carries size/cluster/timestamp data) and
//! [`LongDirEntry`] (a 13-UTF-16-character slice of a long name, chained
//! backwards from the short entry it decorates).
//!
//! Name matching, checksum linkage, and UTF-16 segment (de)serialization
//! are delegated to [`crate::codec`]; this module only knows the 32-byte
//! field layouts and the state bits (free/deleted/last) of `name[0]`/`ord`.

use std::convert::TryInto;

use crate::codec::{
    self, pack_fat_date, pack_fat_time, short_name_checksum, unpack_fat_date, unpack_fat_time,
};
use crate::error::{FatError, Result};
use crate::{
    ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_HIDDEN, ATTR_LONG_NAME, ATTR_READ_ONLY, ATTR_SYSTEM,
    ATTR_VOLUME_ID, DIR_ENTRY_LAST_AND_UNUSED, DIR_ENTRY_UNUSED, LAST_LONG_ENTRY, SPACE,
};

pub const DIR_ENTRY_SIZE: usize = 32;
pub const LONG_NAME_CHARS: usize = 13;

/// Month is out of the 1-12 calendar range: the bit-packed field never
/// validates on the way in (`pack_fat_date`), so a corrupt or
/// hand-crafted image can carry one. Logged rather than rejected since the
/// rest of the date/time is still usable.
fn warn_if_month_out_of_range(month: u8, field: &str) {
    if month == 0 || month > 12 {
        log::warn!("directory record {field} has out-of-range month {month}");
    }
}

/// 32-byte short (8.3) directory entry. Holds everything a long-name
/// entry doesn't: attributes, timestamps, first cluster, and file size.
#[derive(Debug, Clone, Copy)]
#[repr(packed)]
pub struct ShortDirEntry {
    name: [u8; 8],
    extension: [u8; 3],
    attr: u8,
    nt_res: u8,
    crt_time_tenth: u8,
    crt_time: u16,
    crt_date: u16,
    lst_acc_date: u16,
    fst_clus_hi: u16,
    wrt_time: u16,
    wrt_date: u16,
    fst_clus_lo: u16,
    file_size: u32,
}

impl Default for ShortDirEntry {
    fn default() -> Self {
        Self::empty()
    }
}

impl ShortDirEntry {
    pub fn empty() -> Self {
        Self {
            name: [0; 8],
            extension: [0; 3],
            attr: ATTR_ARCHIVE,
            nt_res: 0,
            crt_time_tenth: 0,
            crt_time: 0,
            crt_date: 0,
            lst_acc_date: 0,
            fst_clus_hi: 0,
            wrt_time: 0,
            wrt_date: 0,
            fst_clus_lo: 0,
            file_size: 0,
        }
    }

    /// Builds a new entry from an already-split stem/extension and the
    /// first cluster of its content. `attr` should be one of
    /// `ATTR_ARCHIVE`/`ATTR_DIRECTORY` (other bits the caller wants set,
    /// e.g. `ATTR_READ_ONLY`, may be or'd in).
    pub fn new(stem: &str, ext: &str, cluster: u32, attr: u8) -> Result<Self> {
        let packed = codec::pack_short_name(stem, ext)?;
        let mut entry = Self::empty();
        entry.name.copy_from_slice(&packed[..8]);
        entry.extension.copy_from_slice(&packed[8..]);
        entry.attr = attr;
        entry.set_first_cluster(cluster);
        Ok(entry)
    }

    pub fn root_dir(cluster: u32) -> Self {
        let mut item = Self::empty();
        item.set_first_cluster(cluster);
        item.attr = ATTR_DIRECTORY;
        item
    }

    pub fn short_name_bytes(&self) -> [u8; 11] {
        let mut bytes = [0u8; 11];
        bytes[..8].copy_from_slice(&self.name);
        bytes[8..].copy_from_slice(&self.extension);
        bytes
    }

    pub fn checksum(&self) -> u8 {
        short_name_checksum(&self.short_name_bytes())
    }

    pub fn name(&self) -> String {
        codec::unpack_short_name(&self.short_name_bytes())
    }

    pub fn first_cluster(&self) -> u32 {
        ((self.fst_clus_hi as u32) << 16) | self.fst_clus_lo as u32
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.fst_clus_hi = (cluster >> 16) as u16;
        self.fst_clus_lo = (cluster & 0xFFFF) as u16;
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == DIR_ENTRY_UNUSED || self.name[0] == DIR_ENTRY_LAST_AND_UNUSED
    }

    /// `0x00`: this entry and every entry after it in the directory are free.
    pub fn is_end_marker(&self) -> bool {
        self.name[0] == DIR_ENTRY_LAST_AND_UNUSED
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == DIR_ENTRY_UNUSED
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_long(&self) -> bool {
        self.attr == ATTR_LONG_NAME
    }

    pub fn is_volume_id(&self) -> bool {
        self.attr & ATTR_VOLUME_ID != 0
    }

    pub fn attr(&self) -> u8 {
        self.attr
    }

    pub fn set_attr(&mut self, attr: u8) {
        self.attr = attr;
    }

    pub fn is_read_only(&self) -> bool {
        self.attr & ATTR_READ_ONLY != 0
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn set_file_size(&mut self, file_size: u32) {
        self.file_size = file_size;
    }

    pub fn delete(&mut self) {
        self.file_size = 0;
        self.set_first_cluster(0);
        self.name[0] = DIR_ENTRY_UNUSED;
    }

    pub fn set_created(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, tenths: u8) {
        self.crt_date = pack_fat_date(year, month, day);
        self.crt_time = pack_fat_time(hour, minute, second);
        self.crt_time_tenth = tenths;
    }

    pub fn set_written(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) {
        self.wrt_date = pack_fat_date(year, month, day);
        self.wrt_time = pack_fat_time(hour, minute, second);
    }

    pub fn set_accessed(&mut self, year: u16, month: u8, day: u8) {
        self.lst_acc_date = pack_fat_date(year, month, day);
    }

    pub fn created(&self) -> (u16, u8, u8, u8, u8, u8, u8) {
        let (y, mo, d) = unpack_fat_date(self.crt_date);
        warn_if_month_out_of_range(mo, "crt_date");
        let (h, mi, s) = unpack_fat_time(self.crt_time);
        (y, mo, d, h, mi, s, self.crt_time_tenth)
    }

    pub fn written(&self) -> (u16, u8, u8, u8, u8, u8) {
        let (y, mo, d) = unpack_fat_date(self.wrt_date);
        warn_if_month_out_of_range(mo, "wrt_date");
        let (h, mi, s) = unpack_fat_time(self.wrt_time);
        (y, mo, d, h, mi, s)
    }

    pub fn accessed(&self) -> (u16, u8, u8) {
        let (y, mo, d) = unpack_fat_date(self.lst_acc_date);
        warn_if_month_out_of_range(mo, "lst_acc_date");
        (y, mo, d)
    }

    pub fn as_bytes(&self) -> &[u8; DIR_ENTRY_SIZE] {
        unsafe { &*(self as *const Self as *const [u8; DIR_ENTRY_SIZE]) }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(FatError::ShortRead {
                offset: 0,
                expected: DIR_ENTRY_SIZE,
                got: buf.len(),
            });
        }
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const Self) })
    }
}

/// One 32-byte slice of a long file name, 13 UTF-16 code units wide.
/// Entries for one name are stored in reverse order immediately before the
/// short entry they decorate; the first one written has `ord` or'd with
/// [`LAST_LONG_ENTRY`].
#[derive(Debug, Clone, Copy)]
#[repr(packed)]
pub struct LongDirEntry {
    ord: u8,
    name1: [u16; 5],
    attr: u8,
    ldir_type: u8,
    chk_sum: u8,
    name2: [u16; 6],
    fst_clus_lo: u16,
    name3: [u16; 2],
}

impl LongDirEntry {
    pub fn empty() -> Self {
        Self {
            ord: 0,
            name1: [0; 5],
            attr: ATTR_LONG_NAME,
            ldir_type: 0,
            chk_sum: 0,
            name2: [0; 6],
            fst_clus_lo: 0,
            name3: [0; 2],
        }
    }

    /// Builds one LFN slice. `order` should be `1..=n`, or'd with
    /// `LAST_LONG_ENTRY` for the first entry written (the logically last
    /// segment of the name). `units` is padded/truncated to 13 code units
    /// by the caller via [`codec::encode_lfn_segment`].
    pub fn new(order: u8, checksum: u8, segment: [u16; LONG_NAME_CHARS]) -> Self {
        let (name1, name2, name3) = codec::split_lfn_fields(segment);
        Self {
            ord: order,
            name1,
            attr: ATTR_LONG_NAME,
            ldir_type: 0,
            chk_sum: checksum,
            name2,
            fst_clus_lo: 0,
            name3,
        }
    }

    pub fn segment(&self) -> [u16; LONG_NAME_CHARS] {
        codec::join_lfn_fields(self.name1, self.name2, self.name3)
    }

    pub fn decoded_units(&self) -> Vec<u16> {
        codec::decode_lfn_segment(&self.segment())
    }

    pub fn attr(&self) -> u8 {
        self.attr
    }

    pub fn order_raw(&self) -> u8 {
        self.ord
    }

    /// The 1-based position of this slice within its name, with the
    /// `LAST_LONG_ENTRY` marker bit masked off.
    pub fn sequence_number(&self) -> u8 {
        self.ord & !LAST_LONG_ENTRY
    }

    pub fn is_last_in_sequence(&self) -> bool {
        self.ord & LAST_LONG_ENTRY != 0
    }

    pub fn checksum(&self) -> u8 {
        self.chk_sum
    }

    pub fn is_free(&self) -> bool {
        self.ord == DIR_ENTRY_UNUSED || self.ord == DIR_ENTRY_LAST_AND_UNUSED
    }

    pub fn is_end_marker(&self) -> bool {
        self.ord == DIR_ENTRY_LAST_AND_UNUSED
    }

    pub fn delete(&mut self) {
        self.ord = DIR_ENTRY_UNUSED;
    }

    pub fn as_bytes(&self) -> &[u8; DIR_ENTRY_SIZE] {
        unsafe { &*(self as *const Self as *const [u8; DIR_ENTRY_SIZE]) }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(FatError::ShortRead {
                offset: 0,
                expected: DIR_ENTRY_SIZE,
                got: buf.len(),
            });
        }
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const Self) })
    }
}

/// Splits a long name into the LFN slices needed to store it, in the
/// on-disk (reverse, last-segment-first) order, each already carrying the
/// checksum of `short_name`.
pub fn build_lfn_chain(name: &str, short_name: &[u8; 11]) -> Vec<LongDirEntry> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let checksum = short_name_checksum(short_name);
    let segment_count = units.len().div_ceil(LONG_NAME_CHARS).max(1);

    let mut entries = Vec::with_capacity(segment_count);
    for seg_index in (0..segment_count).rev() {
        let start = seg_index * LONG_NAME_CHARS;
        let end = (start + LONG_NAME_CHARS).min(units.len());
        let segment = codec::encode_lfn_segment(&units[start..end]);
        let mut order = (seg_index + 1) as u8;
        if seg_index == segment_count - 1 {
            order |= LAST_LONG_ENTRY;
        }
        entries.push(LongDirEntry::new(order, checksum, segment));
    }
    entries
}

/// Reassembles a long name from its slices, given in on-disk (reverse)
/// order as `build_lfn_chain` produces them.
pub fn assemble_lfn_chain(entries: &[LongDirEntry]) -> String {
    let mut units = Vec::with_capacity(entries.len() * LONG_NAME_CHARS);
    for entry in entries.iter().rev() {
        units.extend(entry.decoded_units());
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_entry_round_trips_through_bytes() {
        let entry = ShortDirEntry::new("HELLO", "TXT", 42, ATTR_ARCHIVE).unwrap();
        let bytes = *entry.as_bytes();
        let back = ShortDirEntry::from_bytes(&bytes).unwrap();
        assert_eq!(back.name(), "HELLO.TXT");
        assert_eq!(back.first_cluster(), 42);
    }

    #[test]
    fn lfn_chain_round_trips_long_name() {
        let name = "a very long file name indeed.txt";
        let short = codec::pack_short_name("AVERYL~1", "TXT").unwrap();
        let chain = build_lfn_chain(name, &short);
        assert!(chain.len() > 1);
        assert_eq!(assemble_lfn_chain(&chain), name);
        let checksum = short_name_checksum(&short);
        assert!(chain.iter().all(|e| e.checksum() == checksum));
        assert!(chain[0].is_last_in_sequence());
    }

    #[test]
    fn lfn_chain_single_segment_gets_last_marker_on_first_entry() {
        let chain = build_lfn_chain("short", &codec::pack_short_name("SHORT", "").unwrap());
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_last_in_sequence());
        assert_eq!(chain[0].sequence_number(), 1);
    }

    #[test]
    fn delete_marks_unused_without_touching_checksum() {
        let mut entry = ShortDirEntry::new("FOO", "BAR", 5, ATTR_ARCHIVE).unwrap();
        entry.delete();
        assert!(entry.is_deleted());
        assert_eq!(entry.first_cluster(), 0);
    }
}
