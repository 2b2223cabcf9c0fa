//! LRU block cache sitting in front of a [`crate::device::Device`].
//!
//! Every sector the engine touches goes through here first. A cache entry
//! tracks whether it's been written since it was loaded and writes itself
//! back on eviction or drop, so callers never need to remember to flush a
//! sector by hand.

use std::sync::{Arc, Mutex, RwLock};

use log::error;
use lru::LruCache;

use crate::device::Device;
use crate::error::Result;

pub struct BlockCache {
    cache: Vec<u8>,
    block_id: usize,
    block_size: usize,
    device: Arc<dyn Device>,
    modified: bool,
}

impl BlockCache {
    pub fn load(block_id: usize, block_size: usize, device: Arc<dyn Device>) -> Result<Self> {
        let mut cache = vec![0u8; block_size];
        device.read_at((block_id * block_size) as u64, &mut cache)?;
        Ok(Self {
            cache,
            block_id,
            block_size,
            device,
            modified: false,
        })
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
    }

    fn write_bytes(&mut self, offset: usize, buf: &[u8]) {
        self.cache[offset..offset + buf.len()].copy_from_slice(buf);
        self.modified = true;
    }

    fn sync(&mut self) -> Result<()> {
        if self.modified {
            self.modified = false;
            self.device
                .write_at((self.block_id * self.block_size) as u64, &self.cache)?;
        }
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            error!("block {} failed to sync on drop: {e}", self.block_id);
        }
    }
}

/// Owns the LRU policy over a fixed-capacity set of [`BlockCache`] entries
/// for one mounted device.
pub struct BlockCacheManager {
    lru: LruCache<usize, Arc<RwLock<BlockCache>>>,
    device: Arc<dyn Device>,
    block_size: usize,
    capacity: usize,
}

impl BlockCacheManager {
    pub fn new(device: Arc<dyn Device>, block_size: usize, capacity: usize) -> Self {
        Self {
            lru: LruCache::unbounded(),
            device,
            block_size,
            capacity,
        }
    }

    /// Returns the cache entry for `block_id`, loading it from the device
    /// on a miss. Entries currently shared with another caller are never
    /// evicted; the manager is allowed to briefly exceed `capacity` rather
    /// than evict an in-use block.
    pub fn get(&mut self, block_id: usize) -> Result<Arc<RwLock<BlockCache>>> {
        if let Some(entry) = self.lru.get(&block_id) {
            return Ok(Arc::clone(entry));
        }

        if self.lru.len() >= self.capacity {
            if let Some((_, victim)) = self.lru.peek_lru() {
                if Arc::strong_count(victim) == 1 {
                    self.lru.pop_lru();
                }
            }
        }

        let entry = Arc::new(RwLock::new(BlockCache::load(
            block_id,
            self.block_size,
            Arc::clone(&self.device),
        )?));
        self.lru.put(block_id, Arc::clone(&entry));
        Ok(entry)
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for (_, entry) in self.lru.iter() {
            entry
                .write()
                .expect("block cache lock poisoned")
                .sync()?;
        }
        Ok(())
    }
}

/// A [`Device`] that transparently routes every read and write through an
/// LRU block cache. This is what every other module actually holds an
/// `Arc<dyn Device>` to once a volume is mounted; nothing upstream of here
/// needs to know caching happens at all.
pub struct CachedDevice {
    inner: Arc<dyn Device>,
    manager: Mutex<BlockCacheManager>,
    block_size: usize,
}

impl CachedDevice {
    pub fn new(inner: Arc<dyn Device>, block_size: usize, capacity: usize) -> Self {
        let manager = BlockCacheManager::new(Arc::clone(&inner), block_size, capacity);
        Self {
            inner,
            manager: Mutex::new(manager),
            block_size,
        }
    }
}

impl Device for CachedDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = offset as usize;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let block_id = pos / self.block_size;
            let in_block = pos % self.block_size;
            let n = remaining.len().min(self.block_size - in_block);
            let entry = self.manager.lock().expect("block cache lock poisoned").get(block_id)?;
            entry
                .read()
                .expect("block cache lock poisoned")
                .read_bytes(in_block, &mut remaining[..n]);
            remaining = &mut remaining[n..];
            pos += n;
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut pos = offset as usize;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let block_id = pos / self.block_size;
            let in_block = pos % self.block_size;
            let n = remaining.len().min(self.block_size - in_block);
            let entry = self.manager.lock().expect("block cache lock poisoned").get(block_id)?;
            entry
                .write()
                .expect("block cache lock poisoned")
                .write_bytes(in_block, &remaining[..n]);
            remaining = &remaining[n..];
            pos += n;
        }
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn flush(&self) -> Result<()> {
        self.manager.lock().expect("block cache lock poisoned").sync_all()?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    #[test]
    fn cache_hit_returns_same_entry() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(vec![0u8; 1024]));
        let mut mgr = BlockCacheManager::new(device, 512, 4);
        let a = mgr.get(1).unwrap();
        let b = mgr.get(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn does_not_evict_entries_still_in_use() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(vec![0u8; 4096]));
        let mut mgr = BlockCacheManager::new(device, 512, 1);
        let held = mgr.get(0).unwrap();
        // Capacity is 1 and block 0 is held; fetching block 1 must not evict it.
        let _other = mgr.get(1).unwrap();
        assert_eq!(Arc::strong_count(&held), 2);
    }

    #[test]
    fn cached_device_round_trips_across_a_block_boundary() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(vec![0u8; 2048]));
        let cached = CachedDevice::new(device, 512, 4);
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        cached.write_at(500, &payload).unwrap();
        let mut back = vec![0u8; payload.len()];
        cached.read_at(500, &mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn cached_device_flush_reaches_the_backing_device() {
        let backing: Arc<dyn Device> = Arc::new(MemDevice::new(vec![0u8; 512]));
        let cached = CachedDevice::new(Arc::clone(&backing), 512, 4);
        cached.write_at(10, &[1, 2, 3, 4]).unwrap();
        cached.flush().unwrap();
        let mut buf = [0u8; 4];
        backing.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
