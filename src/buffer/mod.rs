/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::common::{
    BlockIdT, FrameIdT, BLOCK_FREE, BLOCK_SIZE, BUFFER_CAPACITY, DISK_BLOCKS, MAP_BLOCKS,
};
use crate::disk::DiskManager;
use crate::error::{ErrorCode, Result};

use log::debug;

/// A single buffer frame contained in the buffer pool. The frame holds one
/// block's bytes together with the bookkeeping needed by the replacement
/// policy and write-back logic.
struct BufferFrame {
    /// True while no block occupies this frame.
    free: bool,

    /// True if the held block has been modified since being read from disk.
    dirty: bool,

    /// Number of the held block, -1 while the frame is free.
    block_num: BlockIdT,

    /// Age counter: incremented on every acquisition of another block, reset
    /// to zero when this frame's block is touched. A large timestamp means a
    /// less recently used frame.
    timestamp: u32,

    /// The held block's bytes.
    data: Box<[u8; BLOCK_SIZE]>,
}

impl BufferFrame {
    fn new() -> Self {
        Self {
            free: true,
            dirty: false,
            block_num: -1,
            timestamp: 0,
            data: Box::new([0; BLOCK_SIZE]),
        }
    }
}

/// The buffer pool mediates all block access. It keeps up to
/// `BUFFER_CAPACITY` blocks resident, evicts the least recently used frame
/// when space runs out, and writes dirty frames back before reuse and at
/// shutdown. The pool also mirrors the on-disk block allocation map, which
/// records each block's role (free, record, index leaf/internal, map).
pub struct BufferPool {
    frames: Vec<BufferFrame>,
    alloc_map: Vec<u8>,
    disk: DiskManager,
}

impl BufferPool {
    /// Construct a new buffer pool over the given disk, mirroring the block
    /// allocation map from blocks 0..MAP_BLOCKS into memory.
    pub fn new(mut disk: DiskManager) -> Result<Self> {
        let mut alloc_map = vec![0u8; DISK_BLOCKS];
        let mut data = [0u8; BLOCK_SIZE];
        for i in 0..MAP_BLOCKS {
            disk.read_block(i as BlockIdT, &mut data)?;
            alloc_map[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE].copy_from_slice(&data);
        }

        let mut frames = Vec::with_capacity(BUFFER_CAPACITY);
        for _ in 0..BUFFER_CAPACITY {
            frames.push(BufferFrame::new());
        }

        Ok(Self {
            frames,
            alloc_map,
            disk,
        })
    }

    /// Bring the specified block into the pool (if it is not already
    /// resident) and return the index of the frame holding it.
    pub fn acquire(&mut self, block_num: BlockIdT) -> Result<FrameIdT> {
        Self::check_bounds(block_num)?;

        if let Some(frame_id) = self.resident(block_num) {
            self.age_frames(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.take_frame(block_num)?;
        let frame = &mut self.frames[frame_id];
        self.disk.read_block(block_num, &mut frame.data)?;
        self.age_frames(frame_id);
        Ok(frame_id)
    }

    /// Return the frame index holding the specified block, or
    /// `BlockNotInBuffer` if the block is not resident.
    pub fn locate(&self, block_num: BlockIdT) -> Result<FrameIdT> {
        Self::check_bounds(block_num)?;
        self.resident(block_num).ok_or(ErrorCode::BlockNotInBuffer)
    }

    /// Flag the specified block's frame as modified.
    pub fn mark_dirty(&mut self, block_num: BlockIdT) -> Result<()> {
        let frame_id = self.locate(block_num)?;
        self.frames[frame_id].dirty = true;
        Ok(())
    }

    /// Return the specified block's type byte from the in-memory allocation
    /// map, without touching the pool.
    pub fn block_type(&self, block_num: BlockIdT) -> Result<u8> {
        Self::check_bounds(block_num)?;
        Ok(self.alloc_map[block_num as usize])
    }

    /// Acquire the specified block and return a read-only view of its bytes.
    pub fn block_data(&mut self, block_num: BlockIdT) -> Result<&[u8; BLOCK_SIZE]> {
        let frame_id = self.acquire(block_num)?;
        Ok(&*self.frames[frame_id].data)
    }

    /// Acquire the specified block, flag its frame as modified, and return a
    /// mutable view of its bytes. The write reaches disk when the frame is
    /// evicted or at shutdown.
    pub fn block_data_mut(&mut self, block_num: BlockIdT) -> Result<&mut [u8; BLOCK_SIZE]> {
        let frame_id = self.acquire(block_num)?;
        let frame = &mut self.frames[frame_id];
        frame.dirty = true;
        Ok(&mut *frame.data)
    }

    /// Claim the first free block on the disk: stamp its allocation-map entry
    /// with the requested type, zero its frame, and leave it resident and
    /// dirty. Returns `DiskFull` when no free block exists.
    pub fn alloc_block(&mut self, block_type: u8) -> Result<BlockIdT> {
        let block_num = match self.alloc_map.iter().position(|&b| b == BLOCK_FREE) {
            Some(n) => n as BlockIdT,
            None => return Err(ErrorCode::DiskFull),
        };
        self.alloc_map[block_num as usize] = block_type;

        // A fresh block's disk contents are irrelevant, so the frame is
        // zeroed rather than loaded.
        let frame_id = self.take_frame(block_num)?;
        let frame = &mut self.frames[frame_id];
        frame.data.fill(0);
        frame.dirty = true;
        self.age_frames(frame_id);

        debug!("allocated block {} (type {})", block_num, block_type);
        Ok(block_num)
    }

    /// Return the specified block to the free pool: mark its allocation-map
    /// entry free and drop its frame without writing it back.
    pub fn release_block(&mut self, block_num: BlockIdT) -> Result<()> {
        Self::check_bounds(block_num)?;
        self.alloc_map[block_num as usize] = BLOCK_FREE;
        if let Some(frame_id) = self.resident(block_num) {
            let frame = &mut self.frames[frame_id];
            frame.free = true;
            frame.dirty = false;
            frame.block_num = -1;
        }
        debug!("released block {}", block_num);
        Ok(())
    }

    /// Write the allocation map back to blocks 0..MAP_BLOCKS, then flush
    /// every dirty frame to disk.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut data = [0u8; BLOCK_SIZE];
        for i in 0..MAP_BLOCKS {
            data.copy_from_slice(&self.alloc_map[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
            self.disk.write_block(i as BlockIdT, &data)?;
        }

        for frame in self.frames.iter_mut() {
            if !frame.free && frame.dirty {
                self.disk.write_block(frame.block_num, &frame.data)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Find the frame currently holding the specified block.
    fn resident(&self, block_num: BlockIdT) -> Option<FrameIdT> {
        self.frames
            .iter()
            .position(|f| !f.free && f.block_num == block_num)
    }

    /// Claim a frame for the specified block: the first free frame if one
    /// exists, otherwise the non-free frame with the largest timestamp (the
    /// least recently touched), writing it back first if dirty.
    fn take_frame(&mut self, block_num: BlockIdT) -> Result<FrameIdT> {
        let frame_id = match self.frames.iter().position(|f| f.free) {
            Some(id) => id,
            None => {
                let mut victim = 0;
                for i in 1..self.frames.len() {
                    if self.frames[i].timestamp > self.frames[victim].timestamp {
                        victim = i;
                    }
                }
                if self.frames[victim].dirty {
                    let frame = &self.frames[victim];
                    self.disk.write_block(frame.block_num, &frame.data)?;
                    debug!(
                        "evicted dirty block {} from frame {}",
                        frame.block_num, victim
                    );
                }
                victim
            }
        };

        let frame = &mut self.frames[frame_id];
        frame.free = false;
        frame.dirty = false;
        frame.block_num = block_num;
        frame.timestamp = 0;
        Ok(frame_id)
    }

    /// Age every non-free frame except the one just touched, whose timestamp
    /// is reset to zero.
    fn age_frames(&mut self, touched: FrameIdT) {
        for (i, frame) in self.frames.iter_mut().enumerate() {
            if frame.free {
                continue;
            }
            if i == touched {
                frame.timestamp = 0;
            } else {
                frame.timestamp += 1;
            }
        }
    }

    fn check_bounds(block_num: BlockIdT) -> Result<()> {
        if block_num < 0 || block_num as usize >= DISK_BLOCKS {
            return Err(ErrorCode::OutOfBound);
        }
        Ok(())
    }
}

/// The number of blocks covered by the allocation map must not exceed the
/// bytes available in the map blocks.
const _: () = assert!(DISK_BLOCKS <= MAP_BLOCKS * BLOCK_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BLOCK_IND_LEAF, BLOCK_REC};
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let (disk, _) = DiskManager::open(dir.path().join("test.db")).unwrap();
        let mut pool = BufferPool::new(disk).unwrap();
        stamp_map_blocks(&mut pool);
        (dir, pool)
    }

    /// Reserve the allocation map's own blocks, as disk formatting does, so
    /// allocation never hands them out as data blocks.
    fn stamp_map_blocks(pool: &mut BufferPool) {
        for i in 0..MAP_BLOCKS {
            pool.alloc_map[i] = crate::common::BLOCK_MAP;
        }
    }

    #[test]
    fn test_acquire_is_cached() {
        let (_dir, mut pool) = setup();

        let frame_a = pool.acquire(100).unwrap();
        let frame_b = pool.acquire(100).unwrap();
        assert_eq!(frame_a, frame_b);

        let frame_c = pool.acquire(101).unwrap();
        assert_ne!(frame_a, frame_c);
    }

    #[test]
    fn test_locate() {
        let (_dir, mut pool) = setup();

        assert!(matches!(
            pool.locate(55),
            Err(ErrorCode::BlockNotInBuffer)
        ));
        let frame = pool.acquire(55).unwrap();
        assert_eq!(pool.locate(55).unwrap(), frame);
        assert!(matches!(pool.locate(-3), Err(ErrorCode::OutOfBound)));
    }

    #[test]
    fn test_least_recently_used_eviction() {
        let (_dir, mut pool) = setup();

        // Fill every frame, then touch block 1000 again so block 1001 becomes
        // the oldest.
        for i in 0..BUFFER_CAPACITY {
            pool.acquire(1000 + i as BlockIdT).unwrap();
        }
        pool.acquire(1000).unwrap();

        // The next acquisition must evict block 1001.
        pool.acquire(2000).unwrap();
        assert!(pool.locate(1001).is_err());
        assert!(pool.locate(1000).is_ok());
        assert!(pool.locate(2000).is_ok());
    }

    #[test]
    fn test_dirty_eviction_writes_back() {
        let (_dir, mut pool) = setup();

        // Modify one block, then force it out of the pool.
        pool.block_data_mut(500).unwrap()[17] = 99;
        for i in 0..BUFFER_CAPACITY {
            pool.acquire(1000 + i as BlockIdT).unwrap();
        }
        assert!(pool.locate(500).is_err());

        // Re-reading the block must observe the write.
        assert_eq!(pool.block_data(500).unwrap()[17], 99);
    }

    #[test]
    fn test_alloc_and_release_block() {
        let (_dir, mut pool) = setup();

        let block = pool.alloc_block(BLOCK_REC).unwrap();
        assert_eq!(block, MAP_BLOCKS as BlockIdT); // first entry past the map
        assert_eq!(pool.block_type(block).unwrap(), BLOCK_REC);

        let next = pool.alloc_block(BLOCK_IND_LEAF).unwrap();
        assert_eq!(next, block + 1);

        pool.release_block(block).unwrap();
        assert_eq!(pool.block_type(block).unwrap(), BLOCK_FREE);

        // The released block is the first free entry again.
        assert_eq!(pool.alloc_block(BLOCK_REC).unwrap(), block);
    }

    #[test]
    fn test_shutdown_flushes_map_and_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let (disk, _) = DiskManager::open(&path).unwrap();
        let mut pool = BufferPool::new(disk).unwrap();
        stamp_map_blocks(&mut pool);
        let block = pool.alloc_block(BLOCK_REC).unwrap();
        pool.block_data_mut(block).unwrap()[0] = 7;
        pool.shutdown().unwrap();
        drop(pool);

        let (disk, _) = DiskManager::open(&path).unwrap();
        let mut pool = BufferPool::new(disk).unwrap();
        assert_eq!(pool.block_type(block).unwrap(), BLOCK_REC);
        assert_eq!(pool.block_data(block).unwrap()[0], 7);
    }
}
