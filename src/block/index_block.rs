/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::block::{Block, BlockBuffer};
use crate::buffer::BufferPool;
use crate::common::io::{read_i32, write_i32};
use crate::common::{
    BlockIdT, SlotIdT, ATTR_SIZE, BLOCK_IND_INTERNAL, BLOCK_IND_LEAF, HEADER_SIZE,
    INTERNAL_ENTRY_STRIDE, LEAF_ENTRY_SIZE, MAX_KEYS_INTERNAL, MAX_KEYS_LEAF,
};
use crate::error::{ErrorCode, Result};
use crate::relation::{AttrType, AttrValue};

/// One entry of a leaf index block: a key and the record it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafEntry {
    pub attr_val: AttrValue,
    pub block: BlockIdT,
    pub slot: SlotIdT,
}

/// One entry of an internal index block: a separator key between two child
/// subtrees.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalEntry {
    pub lchild: BlockIdT,
    pub attr_val: AttrValue,
    pub rchild: BlockIdT,
}

/// A typed view over a leaf index block.
///
/// After the header, the block holds `MAX_KEYS_LEAF` entry slots of 32 bytes
/// each (`attrVal | recBlock | recSlot | unused`), of which the first
/// `numEntries` are valid, in ascending key order. Leaves form a doubly
/// linked list via the header's `lblock`/`rblock`.
pub struct LeafBlock {
    block_num: BlockIdT,
}

impl Block for LeafBlock {
    fn block_num(&self) -> BlockIdT {
        self.block_num
    }
}

impl LeafBlock {
    pub fn new(block_num: BlockIdT) -> Self {
        Self { block_num }
    }

    /// Allocate a fresh leaf index block.
    pub fn alloc(pool: &mut BufferPool) -> Result<Self> {
        let buf = BlockBuffer::alloc(pool, BLOCK_IND_LEAF)?;
        Ok(Self {
            block_num: buf.block_num(),
        })
    }

    /// Read the entry at the given position, decoding the key with the
    /// indexed attribute's type.
    pub fn get_entry(
        &self,
        pool: &mut BufferPool,
        index: i32,
        attr_type: AttrType,
    ) -> Result<LeafEntry> {
        let offset = Self::entry_offset(index)?;
        let data = pool.block_data(self.block_num)?;
        Ok(LeafEntry {
            attr_val: AttrValue::decode(&data[offset..offset + ATTR_SIZE], attr_type)?,
            block: read_i32(data, offset + ATTR_SIZE)?,
            slot: read_i32(data, offset + ATTR_SIZE + 4)?,
        })
    }

    /// Write the entry at the given position.
    pub fn set_entry(&self, pool: &mut BufferPool, index: i32, entry: &LeafEntry) -> Result<()> {
        let offset = Self::entry_offset(index)?;
        let data = pool.block_data_mut(self.block_num)?;
        entry.attr_val.encode(&mut data[offset..offset + ATTR_SIZE])?;
        write_i32(data, offset + ATTR_SIZE, entry.block)?;
        write_i32(data, offset + ATTR_SIZE + 4, entry.slot)?;
        Ok(())
    }

    fn entry_offset(index: i32) -> Result<usize> {
        if index < 0 || index as usize >= MAX_KEYS_LEAF {
            return Err(ErrorCode::OutOfBound);
        }
        Ok(HEADER_SIZE + index as usize * LEAF_ENTRY_SIZE)
    }
}

/// A typed view over an internal index block.
///
/// After the header, entries are packed with a stride of 20 bytes: entry i's
/// `lChild` sits at `HEADER_SIZE + 20i`, its key follows, and its `rChild`
/// occupies the same four bytes as entry i + 1's `lChild`. The layout itself
/// maintains the invariant `entry[i].rChild == entry[i+1].lChild`.
pub struct InternalBlock {
    block_num: BlockIdT,
}

impl Block for InternalBlock {
    fn block_num(&self) -> BlockIdT {
        self.block_num
    }
}

impl InternalBlock {
    pub fn new(block_num: BlockIdT) -> Self {
        Self { block_num }
    }

    /// Allocate a fresh internal index block.
    pub fn alloc(pool: &mut BufferPool) -> Result<Self> {
        let buf = BlockBuffer::alloc(pool, BLOCK_IND_INTERNAL)?;
        Ok(Self {
            block_num: buf.block_num(),
        })
    }

    /// Read the entry at the given position, decoding the key with the
    /// indexed attribute's type.
    pub fn get_entry(
        &self,
        pool: &mut BufferPool,
        index: i32,
        attr_type: AttrType,
    ) -> Result<InternalEntry> {
        let offset = Self::entry_offset(index)?;
        let data = pool.block_data(self.block_num)?;
        Ok(InternalEntry {
            lchild: read_i32(data, offset)?,
            attr_val: AttrValue::decode(&data[offset + 4..offset + 4 + ATTR_SIZE], attr_type)?,
            rchild: read_i32(data, offset + INTERNAL_ENTRY_STRIDE)?,
        })
    }

    /// Write the entry at the given position. Writing entry i's `rChild`
    /// also writes entry i + 1's `lChild`; callers populate entries left to
    /// right.
    pub fn set_entry(&self, pool: &mut BufferPool, index: i32, entry: &InternalEntry) -> Result<()> {
        let offset = Self::entry_offset(index)?;
        let data = pool.block_data_mut(self.block_num)?;
        write_i32(data, offset, entry.lchild)?;
        entry
            .attr_val
            .encode(&mut data[offset + 4..offset + 4 + ATTR_SIZE])?;
        write_i32(data, offset + INTERNAL_ENTRY_STRIDE, entry.rchild)?;
        Ok(())
    }

    fn entry_offset(index: i32) -> Result<usize> {
        if index < 0 || index as usize >= MAX_KEYS_INTERNAL {
            return Err(ErrorCode::OutOfBound);
        }
        Ok(HEADER_SIZE + index as usize * INTERNAL_ENTRY_STRIDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let (disk, _) = DiskManager::open(dir.path().join("test.db")).unwrap();
        let pool = BufferPool::new(disk).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_leaf_entry_roundtrip() {
        let (_dir, mut pool) = setup();
        let leaf = LeafBlock::alloc(&mut pool).unwrap();

        let entry = LeafEntry {
            attr_val: AttrValue::Number(10.5),
            block: 77,
            slot: 4,
        };
        leaf.set_entry(&mut pool, 62, &entry).unwrap();
        assert_eq!(
            leaf.get_entry(&mut pool, 62, AttrType::Number).unwrap(),
            entry
        );

        assert!(leaf.set_entry(&mut pool, MAX_KEYS_LEAF as i32, &entry).is_err());
    }

    #[test]
    fn test_internal_entry_roundtrip() {
        let (_dir, mut pool) = setup();
        let internal = InternalBlock::alloc(&mut pool).unwrap();

        let entry = InternalEntry {
            lchild: 8,
            attr_val: AttrValue::String("k".to_string()),
            rchild: 9,
        };
        internal.set_entry(&mut pool, 0, &entry).unwrap();
        assert_eq!(
            internal.get_entry(&mut pool, 0, AttrType::String).unwrap(),
            entry
        );
    }

    #[test]
    fn test_internal_entries_share_child_links() {
        let (_dir, mut pool) = setup();
        let internal = InternalBlock::alloc(&mut pool).unwrap();

        // Populate two adjacent entries left to right.
        for i in 0..2 {
            let entry = InternalEntry {
                lchild: 10 + i,
                attr_val: AttrValue::Number(i as f64),
                rchild: 11 + i,
            };
            internal.set_entry(&mut pool, i, &entry).unwrap();
        }

        // Entry 0's rChild and entry 1's lChild are the same bytes.
        let first = internal.get_entry(&mut pool, 0, AttrType::Number).unwrap();
        let second = internal.get_entry(&mut pool, 1, AttrType::Number).unwrap();
        assert_eq!(first.rchild, second.lchild);
        assert_eq!(second.lchild, 11);
    }

    #[test]
    fn test_last_internal_entry_fits() {
        let (_dir, mut pool) = setup();
        let internal = InternalBlock::alloc(&mut pool).unwrap();

        let entry = InternalEntry {
            lchild: 1,
            attr_val: AttrValue::Number(0.0),
            rchild: 2,
        };
        internal
            .set_entry(&mut pool, MAX_KEYS_INTERNAL as i32 - 1, &entry)
            .unwrap();
        assert_eq!(
            internal
                .get_entry(&mut pool, MAX_KEYS_INTERNAL as i32 - 1, AttrType::Number)
                .unwrap(),
            entry
        );
    }
}
