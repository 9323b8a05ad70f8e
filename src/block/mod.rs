/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::buffer::BufferPool;
use crate::common::io::{read_i32, write_i32};
use crate::common::BlockIdT;
use crate::error::Result;

pub mod index_block;
pub mod record_block;

pub use index_block::{InternalBlock, InternalEntry, LeafBlock, LeafEntry};
pub use record_block::RecBlock;

/// Constants for the common block header.
const BLOCK_TYPE_OFFSET: usize = 0;
const PBLOCK_OFFSET: usize = 4;
const LBLOCK_OFFSET: usize = 8;
const RBLOCK_OFFSET: usize = 12;
const NUM_ENTRIES_OFFSET: usize = 16;
const NUM_ATTRS_OFFSET: usize = 20;
const NUM_SLOTS_OFFSET: usize = 24;

/// The header found at byte 0 of every non-map block.
///
/// Header layout (number denotes size in bytes):
/// +----------------+------------+------------+------------+
/// | BLOCK TYPE (4) | PBLOCK (4) | LBLOCK (4) | RBLOCK (4) |
/// +----------------+------------+------------+------------+
/// +-----------------+---------------+---------------+--------------+
/// | NUM ENTRIES (4) | NUM ATTRS (4) | NUM SLOTS (4) | RESERVED (4) |
/// +-----------------+---------------+---------------+--------------+
///
/// For record blocks `pblock` is unused and `lblock`/`rblock` chain the
/// relation's blocks. For index blocks `pblock` is the parent index block,
/// and leaves additionally chain via `lblock`/`rblock`. Unused link fields
/// hold -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: i32,
    pub pblock: BlockIdT,
    pub lblock: BlockIdT,
    pub rblock: BlockIdT,
    pub num_entries: i32,
    pub num_attrs: i32,
    pub num_slots: i32,
}

impl BlockHeader {
    /// An initial header for a freshly allocated block of the given type.
    pub fn new(block_type: u8) -> Self {
        Self {
            block_type: block_type as i32,
            pblock: -1,
            lblock: -1,
            rblock: -1,
            num_entries: 0,
            num_attrs: 0,
            num_slots: 0,
        }
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        Ok(Self {
            block_type: read_i32(data, BLOCK_TYPE_OFFSET)?,
            pblock: read_i32(data, PBLOCK_OFFSET)?,
            lblock: read_i32(data, LBLOCK_OFFSET)?,
            rblock: read_i32(data, RBLOCK_OFFSET)?,
            num_entries: read_i32(data, NUM_ENTRIES_OFFSET)?,
            num_attrs: read_i32(data, NUM_ATTRS_OFFSET)?,
            num_slots: read_i32(data, NUM_SLOTS_OFFSET)?,
        })
    }

    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        write_i32(data, BLOCK_TYPE_OFFSET, self.block_type)?;
        write_i32(data, PBLOCK_OFFSET, self.pblock)?;
        write_i32(data, LBLOCK_OFFSET, self.lblock)?;
        write_i32(data, RBLOCK_OFFSET, self.rblock)?;
        write_i32(data, NUM_ENTRIES_OFFSET, self.num_entries)?;
        write_i32(data, NUM_ATTRS_OFFSET, self.num_attrs)?;
        write_i32(data, NUM_SLOTS_OFFSET, self.num_slots)?;
        Ok(())
    }
}

/// Shared interface of all typed block views. A view is a thin handle around
/// a block number; every accessor routes through the buffer pool, which loads
/// the block on demand and tracks dirtiness.
pub trait Block {
    fn block_num(&self) -> BlockIdT;

    /// Read the block's header.
    fn get_header(&self, pool: &mut BufferPool) -> Result<BlockHeader> {
        let data = pool.block_data(self.block_num())?;
        BlockHeader::read(data)
    }

    /// Overwrite the block's header and flag the block as modified.
    fn set_header(&self, pool: &mut BufferPool, header: &BlockHeader) -> Result<()> {
        let data = pool.block_data_mut(self.block_num())?;
        header.write(data)
    }

    /// Return the block to the free pool.
    fn release(&self, pool: &mut BufferPool) -> Result<()> {
        pool.release_block(self.block_num())
    }
}

/// An untyped view over any non-map block. Used where only the common header
/// matters, e.g. repointing a child's parent link during an index split.
pub struct BlockBuffer {
    block_num: BlockIdT,
}

impl BlockBuffer {
    /// A view over an existing block.
    pub fn new(block_num: BlockIdT) -> Self {
        Self { block_num }
    }

    /// Allocate the first free block on disk, stamp the allocation map with
    /// the requested type, and write an initialized header (no entries, all
    /// link fields -1). Returns `DiskFull` when no free block exists.
    pub fn alloc(pool: &mut BufferPool, block_type: u8) -> Result<Self> {
        let block_num = pool.alloc_block(block_type)?;
        let buf = Self { block_num };
        buf.set_header(pool, &BlockHeader::new(block_type))?;
        Ok(buf)
    }
}

impl Block for BlockBuffer {
    fn block_num(&self) -> BlockIdT {
        self.block_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BLOCK_FREE, BLOCK_IND_LEAF, BLOCK_REC};
    use crate::disk::DiskManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let (disk, _) = DiskManager::open(dir.path().join("test.db")).unwrap();
        let pool = BufferPool::new(disk).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_header_roundtrip() {
        let (_dir, mut pool) = setup();

        let buf = BlockBuffer::new(64);
        let header = BlockHeader {
            block_type: BLOCK_REC as i32,
            pblock: -1,
            lblock: 12,
            rblock: 99,
            num_entries: 3,
            num_attrs: 2,
            num_slots: 61,
        };
        buf.set_header(&mut pool, &header).unwrap();
        assert_eq!(buf.get_header(&mut pool).unwrap(), header);
    }

    #[test]
    fn test_alloc_initializes_header_and_map() {
        let (_dir, mut pool) = setup();

        let buf = BlockBuffer::alloc(&mut pool, BLOCK_IND_LEAF).unwrap();
        assert_eq!(pool.block_type(buf.block_num()).unwrap(), BLOCK_IND_LEAF);

        let header = buf.get_header(&mut pool).unwrap();
        assert_eq!(header.block_type, BLOCK_IND_LEAF as i32);
        assert_eq!(header.pblock, -1);
        assert_eq!(header.lblock, -1);
        assert_eq!(header.rblock, -1);
        assert_eq!(header.num_entries, 0);
    }

    #[test]
    fn test_release_frees_map_entry() {
        let (_dir, mut pool) = setup();

        let buf = BlockBuffer::alloc(&mut pool, BLOCK_REC).unwrap();
        let block_num = buf.block_num();
        buf.release(&mut pool).unwrap();
        assert_eq!(pool.block_type(block_num).unwrap(), BLOCK_FREE);
    }
}
