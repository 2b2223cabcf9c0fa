//! BIOS Parameter Block (BPB) and boot sector.
//!
//! The first sector of a FAT volume — the boot sector, reserved sector, or
//! "sector 0" — carries the BPB: geometry, reserved/FAT/root-directory
//! region sizes, and (for FAT32) the extended BPB32 fields. Every other
//! component derives its offsets from here.
//!
//! FAT type is never read from disk as a field; it's derived from the
//! count of data clusters the geometry implies (there is no other reliable
//! way — see the derivation in [`BIOSParameterBlock::fat_type`]).

use std::convert::TryInto;

use crate::codec::{read_u16_le, read_u32_le};
use crate::error::{FatError, Result};
use crate::{MAX_CLUSTER_FAT12, MAX_CLUSTER_FAT16};

/// Which of the three on-disk layouts a mounted volume uses. Determines
/// FAT entry width, EOC/bad-cluster sentinels, and whether the root
/// directory is a fixed region or an ordinary cluster chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Parsed contents of the boot sector's BPB and, for FAT32, its extended
/// BPB32 fields. FAT12/16 volumes never populate the BPB32 portion
/// meaningfully; callers must check [`BIOSParameterBlock::fat_type`]
/// before reading `root_cluster`/`fat_info_sector`.
#[derive(Debug, Clone, Copy)]
pub struct BIOSParameterBlock {
    pub(crate) bs_jmp_boot: [u8; 3],
    pub(crate) bs_oem_name: [u8; 8],
    pub(crate) byts_per_sec: u16,
    pub(crate) sec_per_clus: u8,
    pub(crate) rsvd_sec_cnt: u16,
    pub(crate) num_fats: u8,
    pub(crate) root_ent_cnt: u16,
    pub(crate) tot_sec16: u16,
    pub(crate) media: u8,
    pub(crate) fat_sz16: u16,
    pub(crate) sec_per_trk: u16,
    pub(crate) num_heads: u16,
    pub(crate) hidd_sec: u32,
    pub(crate) tot_sec32: u32,

    // FAT32-only extended BPB. Meaningless on FAT12/16 (that region holds a
    // different, smaller structure there); only consulted when `fat_type()`
    // is `Fat32`.
    pub(crate) fat_sz32: u32,
    pub(crate) ext_flags: u16,
    pub(crate) fs_ver: u16,
    pub(crate) root_clus: u32,
    pub(crate) fs_info: u16,
    pub(crate) bk_boot_sec: u16,
}

impl BIOSParameterBlock {
    pub const SIZE: usize = 90;

    /// Parses a boot sector out of its first [`Self::SIZE`] bytes of a
    /// 512-byte sector buffer, validating geometry and the `0x55AA`
    /// signature at offset 510.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < 512 {
            return Err(FatError::BadGeometry("boot sector shorter than 512 bytes"));
        }
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(FatError::BadSignature);
        }

        let bpb = BIOSParameterBlock {
            bs_jmp_boot: sector[0..3].try_into().unwrap(),
            bs_oem_name: sector[3..11].try_into().unwrap(),
            byts_per_sec: read_u16_le(&sector[11..13]),
            sec_per_clus: sector[13],
            rsvd_sec_cnt: read_u16_le(&sector[14..16]),
            num_fats: sector[16],
            root_ent_cnt: read_u16_le(&sector[17..19]),
            tot_sec16: read_u16_le(&sector[19..21]),
            media: sector[21],
            fat_sz16: read_u16_le(&sector[22..24]),
            sec_per_trk: read_u16_le(&sector[24..26]),
            num_heads: read_u16_le(&sector[26..28]),
            hidd_sec: read_u32_le(&sector[28..32]),
            tot_sec32: read_u32_le(&sector[32..36]),

            fat_sz32: read_u32_le(&sector[36..40]),
            ext_flags: read_u16_le(&sector[40..42]),
            fs_ver: read_u16_le(&sector[42..44]),
            root_clus: read_u32_le(&sector[44..48]),
            fs_info: read_u16_le(&sector[48..50]),
            bk_boot_sec: read_u16_le(&sector[50..52]),
        };

        bpb.validate_geometry()?;
        Ok(bpb)
    }

    fn validate_geometry(&self) -> Result<()> {
        if self.byts_per_sec == 0 || !self.byts_per_sec.is_power_of_two() {
            return Err(FatError::BadGeometry("bytes-per-sector is not a power of two"));
        }
        if self.sec_per_clus == 0 || !self.sec_per_clus.is_power_of_two() {
            return Err(FatError::BadGeometry("sectors-per-cluster is not a power of two"));
        }
        if self.num_fats == 0 {
            return Err(FatError::BadGeometry("FAT count is zero"));
        }
        if self.fat_size() == 0 {
            return Err(FatError::BadGeometry("FAT size is zero"));
        }
        if self.total_sector_cnt() == 0 {
            return Err(FatError::BadGeometry("total sector count is zero"));
        }
        let non_data_sectors = (self.rsvd_sec_cnt as usize)
            .checked_add(self.num_fats as usize * self.fat_size())
            .and_then(|s| s.checked_add(self.root_dir_sector_cnt()));
        let data_sectors = match non_data_sectors {
            Some(nd) => self.total_sector_cnt().checked_sub(nd),
            None => None,
        };
        let data_sectors = data_sectors
            .ok_or(FatError::BadGeometry("reserved+FAT+root region exceeds total sector count"))?;
        if data_sectors / self.sec_per_clus as usize == 0 {
            return Err(FatError::BadGeometry("data cluster count is zero"));
        }
        Ok(())
    }

    /// Sectors occupied by one FAT: `fat_sz16` if nonzero, else `fat_sz32`
    /// (SPEC_FULL.md §4.3). This is the generalization the FAT32-only
    /// original needed throughout its offset arithmetic.
    #[inline]
    pub fn fat_size(&self) -> usize {
        if self.fat_sz16 != 0 {
            self.fat_sz16 as usize
        } else {
            self.fat_sz32 as usize
        }
    }

    /// Byte offset of the first sector of `cluster` (cluster numbers start
    /// at 2; the first two FAT entries are reserved).
    pub fn offset(&self, cluster: u32) -> Result<usize> {
        if cluster < 2 {
            return Err(FatError::CorruptChain {
                first_cluster: cluster,
                reason: "cluster number below the first valid data cluster (2)",
            });
        }
        Ok(self.first_sector_of_cluster(cluster) * self.byts_per_sec as usize)
    }

    /// The first data sector beyond the root directory region.
    pub fn first_data_sector(&self) -> usize {
        self.rsvd_sec_cnt as usize
            + self.num_fats as usize * self.fat_size()
            + self.root_dir_sector_cnt()
    }

    pub fn first_sector_of_cluster(&self, cluster: u32) -> usize {
        self.first_data_sector() + (cluster as usize - 2) * self.sec_per_clus as usize
    }

    pub fn fat1_offset(&self) -> usize {
        self.rsvd_sec_cnt as usize * self.byts_per_sec as usize
    }

    pub fn fat_offset(&self, fat_index: usize) -> usize {
        self.fat1_offset() + fat_index * self.fat_size() * self.byts_per_sec as usize
    }

    /// Sectors occupied by the fixed-size root directory region. Zero on
    /// FAT32, where the root directory is an ordinary cluster chain.
    pub fn root_dir_sector_cnt(&self) -> usize {
        ((self.root_ent_cnt as usize * 32) + (self.byts_per_sec as usize - 1))
            / self.byts_per_sec as usize
    }

    /// Byte offset of the fixed FAT12/16 root directory region. Callers
    /// must check `fat_type() != Fat32` first.
    pub fn root_dir_offset(&self) -> usize {
        self.fat1_offset() + self.num_fats as usize * self.fat_size() * self.byts_per_sec as usize
    }

    pub fn root_dir_byte_size(&self) -> usize {
        self.root_dir_sector_cnt() * self.byts_per_sec as usize
    }

    /// Saturates to zero rather than underflowing; only reachable for a
    /// geometry that failed to validate in the first place, since `parse`
    /// rejects a BPB where the reserved+FAT+root region exceeds the total
    /// sector count.
    pub fn data_sector_cnt(&self) -> usize {
        let non_data_sectors = self.rsvd_sec_cnt as usize
            + self.num_fats as usize * self.fat_size()
            + self.root_dir_sector_cnt();
        self.total_sector_cnt().saturating_sub(non_data_sectors)
    }

    pub fn data_cluster_cnt(&self) -> usize {
        self.data_sector_cnt() / self.sec_per_clus as usize
    }

    pub fn total_data_volume(&self) -> usize {
        self.data_sector_cnt() * self.byts_per_sec as usize
    }

    pub fn cluster_size(&self) -> usize {
        self.sec_per_clus as usize * self.byts_per_sec as usize
    }

    /// The one and only reliable way to determine FAT type: by the count
    /// of data clusters the geometry implies (SPEC_FULL.md §3).
    pub fn fat_type(&self) -> FatType {
        let clusters = self.data_cluster_cnt();
        if clusters < MAX_CLUSTER_FAT12 {
            FatType::Fat12
        } else if clusters < MAX_CLUSTER_FAT16 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    pub fn bytes_per_sector(&self) -> usize {
        self.byts_per_sec as usize
    }

    pub fn sectors_per_cluster(&self) -> usize {
        self.sec_per_clus as usize
    }

    pub fn fat_cnt(&self) -> usize {
        self.num_fats as usize
    }

    pub fn reserved_sector_cnt(&self) -> usize {
        self.rsvd_sec_cnt as usize
    }

    pub fn total_sector_cnt(&self) -> usize {
        if self.tot_sec16 != 0 {
            self.tot_sec16 as usize
        } else {
            self.tot_sec32 as usize
        }
    }

    /// Root directory's first cluster. Only meaningful on FAT32.
    pub fn root_cluster(&self) -> u32 {
        self.root_clus
    }

    /// Sector of the FSInfo structure within the reserved region. Only
    /// meaningful on FAT32.
    pub fn fat_info_sector(&self) -> usize {
        self.fs_info as usize
    }

    pub fn backup_boot_sector(&self) -> usize {
        self.bk_boot_sec as usize
    }

    pub fn media(&self) -> u8 {
        self.media
    }
}

/// FAT32 FSInfo sector: a best-effort hint, never trusted beyond the
/// initial read (SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    pub(crate) lead_sig: u32,
    pub(crate) struc_sig: u32,
    pub(crate) free_count: u32,
    pub(crate) nxt_free: u32,
    pub(crate) trail_sig: u32,
}

const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;

impl FsInfo {
    /// Parses an FSInfo sector from its first/last few fields; the 480 and
    /// 12-byte reserved spans in between are skipped.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < 512 {
            return Err(FatError::BadGeometry("FSInfo sector shorter than 512 bytes"));
        }
        Ok(Self {
            lead_sig: read_u32_le(&sector[0..4]),
            struc_sig: read_u32_le(&sector[484..488]),
            free_count: read_u32_le(&sector[488..492]),
            nxt_free: read_u32_le(&sector[492..496]),
            trail_sig: read_u32_le(&sector[508..512]),
        })
    }

    pub fn check_signature(&self) -> bool {
        self.lead_sig == FSINFO_LEAD_SIGNATURE
            && self.struc_sig == FSINFO_STRUCT_SIGNATURE
            && self.trail_sig == FSINFO_TRAIL_SIGNATURE
    }

    pub fn free_cluster_cnt(&self) -> Option<u32> {
        (self.free_count != 0xFFFF_FFFF).then_some(self.free_count)
    }

    pub fn next_free_cluster(&self) -> Option<u32> {
        (self.nxt_free != 0xFFFF_FFFF).then_some(self.nxt_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fat32_sector() -> Vec<u8> {
        let mut s = vec![0u8; 512];
        s[11..13].copy_from_slice(&512u16.to_le_bytes()); // byts_per_sec
        s[13] = 8; // sec_per_clus
        s[14..16].copy_from_slice(&32u16.to_le_bytes()); // rsvd_sec_cnt
        s[16] = 2; // num_fats
        // root_ent_cnt, tot_sec16, fat_sz16 stay 0 (FAT32)
        s[32..36].copy_from_slice(&1_000_000u32.to_le_bytes()); // tot_sec32
        s[36..40].copy_from_slice(&8000u32.to_le_bytes()); // fat_sz32
        s[44..48].copy_from_slice(&2u32.to_le_bytes()); // root_clus
        s[48..50].copy_from_slice(&1u16.to_le_bytes()); // fs_info
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn rejects_missing_signature() {
        let mut sector = sample_fat32_sector();
        sector[511] = 0x00;
        assert!(matches!(
            BIOSParameterBlock::parse(&sector),
            Err(FatError::BadSignature)
        ));
    }

    #[test]
    fn classifies_fat32_geometry() {
        let bpb = BIOSParameterBlock::parse(&sample_fat32_sector()).unwrap();
        assert_eq!(bpb.fat_type(), FatType::Fat32);
        assert_eq!(bpb.fat_size(), 8000);
        assert_eq!(bpb.root_dir_sector_cnt(), 0);
    }

    #[test]
    fn fat16_uses_fat_sz16_not_fat_sz32() {
        let mut s = vec![0u8; 512];
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 4; // sec_per_clus
        s[14..16].copy_from_slice(&1u16.to_le_bytes()); // rsvd_sec_cnt
        s[16] = 2; // num_fats
        s[17..19].copy_from_slice(&512u16.to_le_bytes()); // root_ent_cnt
        s[19..21].copy_from_slice(&20000u16.to_le_bytes()); // tot_sec16
        s[22..24].copy_from_slice(&100u16.to_le_bytes()); // fat_sz16
        // fat_sz32 deliberately left as garbage to prove it's ignored
        s[36..40].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        s[510] = 0x55;
        s[511] = 0xAA;

        let bpb = BIOSParameterBlock::parse(&s).unwrap();
        assert_eq!(bpb.fat_size(), 100);
        assert_eq!(bpb.fat_type(), FatType::Fat16);
    }

    #[test]
    fn rejects_non_power_of_two_bytes_per_sector() {
        let mut s = sample_fat32_sector();
        s[11..13].copy_from_slice(&500u16.to_le_bytes());
        assert!(matches!(
            BIOSParameterBlock::parse(&s),
            Err(FatError::BadGeometry(_))
        ));
    }

    #[test]
    fn fsinfo_treats_all_ones_as_unknown() {
        let mut sector = vec![0u8; 512];
        sector[0..4].copy_from_slice(&FSINFO_LEAD_SIGNATURE.to_le_bytes());
        sector[484..488].copy_from_slice(&FSINFO_STRUCT_SIGNATURE.to_le_bytes());
        sector[488..492].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        sector[492..496].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        sector[508..512].copy_from_slice(&FSINFO_TRAIL_SIGNATURE.to_le_bytes());

        let info = FsInfo::parse(&sector).unwrap();
        assert!(info.check_signature());
        assert_eq!(info.free_cluster_cnt(), None);
        assert_eq!(info.next_free_cluster(), None);
    }
}
