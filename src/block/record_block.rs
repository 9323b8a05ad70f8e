/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::block::{Block, BlockBuffer};
use crate::buffer::BufferPool;
use crate::common::{BlockIdT, SlotIdT, ATTR_SIZE, BLOCK_REC, HEADER_SIZE};
use crate::error::{ErrorCode, Result};
use crate::relation::{AttrType, AttrValue, Record};

/// A typed view over a relation record block.
///
/// Block layout:
/// +------------+--------------------------+------------------------------+
/// | HEADER (32)| SLOT MAP (numSlots bytes)| numSlots x numAttrs attr cells|
/// +------------+--------------------------+------------------------------+
///
/// The slot map holds one occupancy byte per slot; slot i's record starts at
/// `HEADER_SIZE + numSlots + i * numAttrs * ATTR_SIZE`. The slot count is
/// fixed per relation so that header, slot map, and slots fit in one block.
pub struct RecBlock {
    block_num: BlockIdT,
}

impl Block for RecBlock {
    fn block_num(&self) -> BlockIdT {
        self.block_num
    }
}

impl RecBlock {
    /// A view over an existing record block.
    pub fn new(block_num: BlockIdT) -> Self {
        Self { block_num }
    }

    /// Allocate a fresh record block.
    pub fn alloc(pool: &mut BufferPool) -> Result<Self> {
        let buf = BlockBuffer::alloc(pool, BLOCK_REC)?;
        Ok(Self {
            block_num: buf.block_num(),
        })
    }

    /// Read the block's slot occupancy map.
    pub fn get_slot_map(&self, pool: &mut BufferPool) -> Result<Vec<u8>> {
        let num_slots = self.get_header(pool)?.num_slots as usize;
        let data = pool.block_data(self.block_num)?;
        Ok(data[HEADER_SIZE..HEADER_SIZE + num_slots].to_vec())
    }

    /// Overwrite the block's slot occupancy map.
    pub fn set_slot_map(&self, pool: &mut BufferPool, slot_map: &[u8]) -> Result<()> {
        let num_slots = self.get_header(pool)?.num_slots as usize;
        if slot_map.len() != num_slots {
            return Err(ErrorCode::OutOfBound);
        }
        let data = pool.block_data_mut(self.block_num)?;
        data[HEADER_SIZE..HEADER_SIZE + num_slots].copy_from_slice(slot_map);
        Ok(())
    }

    /// Read the record at the given slot, decoding each attribute cell with
    /// the corresponding declared type.
    pub fn get_record(
        &self,
        pool: &mut BufferPool,
        slot: SlotIdT,
        attr_types: &[AttrType],
    ) -> Result<Record> {
        let header = self.get_header(pool)?;
        let offset = Self::slot_offset(slot, &header)?;
        if attr_types.len() != header.num_attrs as usize {
            return Err(ErrorCode::NAttrMismatch);
        }

        let data = pool.block_data(self.block_num)?;
        let mut record = Vec::with_capacity(attr_types.len());
        for (i, &attr_type) in attr_types.iter().enumerate() {
            let cell = &data[offset + i * ATTR_SIZE..offset + (i + 1) * ATTR_SIZE];
            record.push(AttrValue::decode(cell, attr_type)?);
        }
        Ok(record)
    }

    /// Write a record into the given slot.
    pub fn set_record(&self, pool: &mut BufferPool, slot: SlotIdT, record: &[AttrValue]) -> Result<()> {
        let header = self.get_header(pool)?;
        let offset = Self::slot_offset(slot, &header)?;
        if record.len() != header.num_attrs as usize {
            return Err(ErrorCode::NAttrMismatch);
        }

        let data = pool.block_data_mut(self.block_num)?;
        for (i, value) in record.iter().enumerate() {
            let cell = &mut data[offset + i * ATTR_SIZE..offset + (i + 1) * ATTR_SIZE];
            value.encode(cell)?;
        }
        Ok(())
    }

    fn slot_offset(slot: SlotIdT, header: &super::BlockHeader) -> Result<usize> {
        if slot < 0 || slot >= header.num_slots {
            return Err(ErrorCode::OutOfBound);
        }
        let record_size = header.num_attrs as usize * ATTR_SIZE;
        Ok(HEADER_SIZE + header.num_slots as usize + slot as usize * record_size)
    }
}

/// The number of record slots per block for a relation with the given number
/// of attributes: one occupancy byte plus one record per slot, packed after
/// the header.
pub fn slots_per_block(num_attrs: usize) -> i32 {
    ((crate::common::BLOCK_SIZE - HEADER_SIZE) / (1 + num_attrs * ATTR_SIZE)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::common::{SLOT_OCCUPIED, SLOT_UNOCCUPIED};
    use crate::disk::DiskManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let (disk, _) = DiskManager::open(dir.path().join("test.db")).unwrap();
        let pool = BufferPool::new(disk).unwrap();
        (dir, pool)
    }

    /// Allocate a record block laid out for a two-attribute relation.
    fn alloc_two_attr_block(pool: &mut BufferPool) -> RecBlock {
        let block = RecBlock::alloc(pool).unwrap();
        let mut header = block.get_header(pool).unwrap();
        header.num_attrs = 2;
        header.num_slots = slots_per_block(2);
        block.set_header(pool, &header).unwrap();
        block
    }

    #[test]
    fn test_slots_per_block() {
        // 2016 usable bytes, 1 map byte + 16 bytes per single-attr record.
        assert_eq!(slots_per_block(1), 118);
        // Catalog layout: 6 attributes, 97 bytes per slot.
        assert_eq!(slots_per_block(6), 20);
    }

    #[test]
    fn test_record_roundtrip() {
        let (_dir, mut pool) = setup();
        let block = alloc_two_attr_block(&mut pool);

        let record = vec![
            AttrValue::Number(4.5),
            AttrValue::String("tuple".to_string()),
        ];
        block.set_record(&mut pool, 3, &record).unwrap();

        let types = [AttrType::Number, AttrType::String];
        let read = block.get_record(&mut pool, 3, &types).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn test_record_out_of_range_slot() {
        let (_dir, mut pool) = setup();
        let block = alloc_two_attr_block(&mut pool);
        let num_slots = block.get_header(&mut pool).unwrap().num_slots;

        let record = vec![AttrValue::Number(0.0), AttrValue::Number(0.0)];
        assert!(block.set_record(&mut pool, num_slots, &record).is_err());
        assert!(block.set_record(&mut pool, -1, &record).is_err());
    }

    #[test]
    fn test_slot_map_roundtrip() {
        let (_dir, mut pool) = setup();
        let block = alloc_two_attr_block(&mut pool);
        let num_slots = block.get_header(&mut pool).unwrap().num_slots as usize;

        let mut slot_map = vec![SLOT_UNOCCUPIED; num_slots];
        slot_map[0] = SLOT_OCCUPIED;
        slot_map[num_slots - 1] = SLOT_OCCUPIED;
        block.set_slot_map(&mut pool, &slot_map).unwrap();
        assert_eq!(block.get_slot_map(&mut pool).unwrap(), slot_map);
    }

    #[test]
    fn test_last_slot_fits_in_block() {
        let (_dir, mut pool) = setup();
        let block = RecBlock::alloc(&mut pool).unwrap();
        let mut header = block.get_header(&mut pool).unwrap();
        header.num_attrs = 1;
        header.num_slots = slots_per_block(1);
        block.set_header(&mut pool, &header).unwrap();

        let record = vec![AttrValue::Number(1.25)];
        block
            .set_record(&mut pool, header.num_slots - 1, &record)
            .unwrap();
        let read = block
            .get_record(&mut pool, header.num_slots - 1, &[AttrType::Number])
            .unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn test_header_offsets_match_layout() {
        // The last slot of a maximal layout must end within the block.
        let header = BlockHeader {
            num_attrs: 1,
            num_slots: slots_per_block(1),
            ..BlockHeader::new(crate::common::BLOCK_REC)
        };
        let end = HEADER_SIZE
            + header.num_slots as usize
            + header.num_slots as usize * ATTR_SIZE;
        assert!(end <= crate::common::BLOCK_SIZE);
    }
}
