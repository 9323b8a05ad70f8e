/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::block::{Block, BlockHeader, RecBlock};
use crate::buffer::BufferPool;
use crate::cache::{OpenRelTable, ATTRCAT_ATTR_TYPES, ATTRCAT_NAME, ATTR_RELNAME, RELCAT_NAME};
use crate::common::{
    BlockIdT, Op, RecId, RelIdT, ATTRCAT_RELID, BLOCK_REC, RELCAT_RELID, SLOT_OCCUPIED,
    SLOT_UNOCCUPIED,
};
use crate::error::{ErrorCode, Result};
use crate::index;
use crate::relation::{compare_attrs, AttrValue, Record};

use log::warn;

/// Find the next record of the relation whose `attr_name` field satisfies
/// `op` against `attr_val`, resuming from the relation's search cursor. The
/// cursor is updated on a hit; `None` means the block chain is exhausted.
pub fn linear_search(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    attr_val: &AttrValue,
    op: Op,
) -> Result<Option<RecId>> {
    let prev = cache.search_index(rel_id)?;
    let (mut block, mut slot) = if prev.is_invalid() {
        // No hit from a previous search; start from the first record.
        (cache.rel_cat(rel_id)?.first_blk, 0)
    } else {
        // Resume from the record next to the previous hit.
        (prev.block, prev.slot + 1)
    };

    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    let attr_types = cache.attr_types(rel_id)?;

    while block != -1 {
        let rec_block = RecBlock::new(block);
        let header = rec_block.get_header(pool)?;

        if slot >= header.num_slots {
            // No more slots in this block; roll over to the right block.
            block = header.rblock;
            slot = 0;
            continue;
        }

        let slot_map = rec_block.get_slot_map(pool)?;
        if slot_map[slot as usize] == SLOT_UNOCCUPIED {
            slot += 1;
            continue;
        }

        let record = rec_block.get_record(pool, slot, &attr_types)?;
        let cmp = compare_attrs(&record[attr_cat.offset as usize], attr_val);
        if op.matches(cmp) {
            let hit = RecId::new(block, slot);
            cache.set_search_index(rel_id, hit)?;
            return Ok(Some(hit));
        }

        slot += 1;
    }

    Ok(None)
}

/// Find the next record satisfying the predicate and return it. Dispatches
/// to the attribute's B+ tree when one exists, otherwise to a linear scan.
/// Fails with `NotFound` when the search is exhausted.
pub fn search(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    attr_val: &AttrValue,
    op: Op,
) -> Result<Record> {
    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;

    let rec_id = if attr_cat.root_block == -1 {
        linear_search(pool, cache, rel_id, attr_name, attr_val, op)?
    } else {
        index::bplus_search(pool, cache, rel_id, attr_name, attr_val, op)?
    };

    let rec_id = match rec_id {
        Some(rec_id) => rec_id,
        None => return Err(ErrorCode::NotFound),
    };

    let attr_types = cache.attr_types(rel_id)?;
    RecBlock::new(rec_id.block).get_record(pool, rec_id.slot, &attr_types)
}

/// Return the next occupied record of the relation, resuming from the
/// relation's projection cursor (independent of the search cursor). Fails
/// with `NotFound` when the block chain is exhausted.
pub fn project(pool: &mut BufferPool, cache: &mut OpenRelTable, rel_id: RelIdT) -> Result<Record> {
    let prev = cache.project_index(rel_id)?;
    let (mut block, mut slot) = if prev.is_invalid() {
        (cache.rel_cat(rel_id)?.first_blk, 0)
    } else {
        (prev.block, prev.slot + 1)
    };

    while block != -1 {
        let rec_block = RecBlock::new(block);
        let header = rec_block.get_header(pool)?;

        if slot >= header.num_slots {
            block = header.rblock;
            slot = 0;
            continue;
        }

        let slot_map = rec_block.get_slot_map(pool)?;
        if slot_map[slot as usize] == SLOT_UNOCCUPIED {
            slot += 1;
            continue;
        }

        // Next occupied slot found.
        break;
    }

    if block == -1 {
        return Err(ErrorCode::NotFound);
    }

    cache.set_project_index(rel_id, RecId::new(block, slot))?;
    let attr_types = cache.attr_types(rel_id)?;
    RecBlock::new(block).get_record(pool, slot, &attr_types)
}

/// Insert a record into the relation: first-fit over the block chain, a new
/// record block appended when every slot is taken. Every indexed attribute's
/// B+ tree is updated afterwards; if the disk fills while doing so, the
/// affected tree is destroyed and the insert reports `IndexBlocksReleased`
/// (the record itself is durable).
pub fn insert(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    record: &[AttrValue],
) -> Result<()> {
    let mut rel_cat = cache.rel_cat(rel_id)?;
    if record.len() != rel_cat.num_attrs as usize {
        return Err(ErrorCode::NAttrMismatch);
    }

    let num_slots = rel_cat.num_slots_per_blk;
    let mut rec_id = RecId::INVALID;
    let mut prev_block_num: BlockIdT = -1;

    // Walk the relation's blocks until a free slot is found.
    let mut block_num = rel_cat.first_blk;
    while block_num != -1 {
        let buf = RecBlock::new(block_num);
        let header = buf.get_header(pool)?;
        let slot_map = buf.get_slot_map(pool)?;

        if let Some(slot) = slot_map.iter().position(|&s| s == SLOT_UNOCCUPIED) {
            rec_id = RecId::new(block_num, slot as i32);
            break;
        }

        prev_block_num = block_num;
        block_num = header.rblock;
    }

    if rec_id.is_invalid() {
        // The relation catalog is never grown.
        if rel_id == RELCAT_RELID {
            return Err(ErrorCode::MaxRelations);
        }

        // Append a fresh record block to the end of the chain.
        let new_block = RecBlock::alloc(pool)?;
        rec_id = RecId::new(new_block.block_num(), 0);

        let header = BlockHeader {
            block_type: BLOCK_REC as i32,
            pblock: -1,
            lblock: if rel_cat.first_blk == -1 {
                -1
            } else {
                prev_block_num
            },
            rblock: -1,
            num_entries: 0,
            num_attrs: rel_cat.num_attrs,
            num_slots,
        };
        new_block.set_header(pool, &header)?;
        new_block.set_slot_map(pool, &vec![SLOT_UNOCCUPIED; num_slots as usize])?;

        if prev_block_num != -1 {
            let prev = RecBlock::new(prev_block_num);
            let mut prev_header = prev.get_header(pool)?;
            prev_header.rblock = rec_id.block;
            prev.set_header(pool, &prev_header)?;
        } else {
            rel_cat.first_blk = rec_id.block;
        }
        rel_cat.last_blk = rec_id.block;
        cache.set_rel_cat(rel_id, rel_cat.clone())?;
    }

    // Write the record and mark its slot occupied.
    let target = RecBlock::new(rec_id.block);
    target.set_record(pool, rec_id.slot, record)?;

    let mut slot_map = target.get_slot_map(pool)?;
    slot_map[rec_id.slot as usize] = SLOT_OCCUPIED;
    target.set_slot_map(pool, &slot_map)?;

    let mut header = target.get_header(pool)?;
    header.num_entries += 1;
    target.set_header(pool, &header)?;

    rel_cat.num_recs += 1;
    cache.set_rel_cat(rel_id, rel_cat.clone())?;

    // Maintain the B+ tree of every indexed attribute.
    let mut index_blocks_released = false;
    for offset in 0..rel_cat.num_attrs {
        let attr_cat = cache.attr_cat_by_offset(rel_id, offset)?;
        if attr_cat.root_block == -1 {
            continue;
        }
        match index::bplus_insert(
            pool,
            cache,
            rel_id,
            &attr_cat.attr_name,
            &record[offset as usize],
            rec_id,
        ) {
            Ok(()) => {}
            Err(ErrorCode::DiskFull) => {
                // The tree has been destroyed; the record insert stands.
                warn!(
                    "index on {}.{} dropped: disk full during insert",
                    rel_cat.rel_name, attr_cat.attr_name
                );
                index_blocks_released = true;
            }
            Err(e) => return Err(e),
        }
    }

    if index_blocks_released {
        Err(ErrorCode::IndexBlocksReleased)
    } else {
        Ok(())
    }
}

/// Delete a relation: release its record blocks, remove its attribute
/// catalog rows (destroying any B+ trees and splicing out emptied attribute
/// catalog blocks), and free its relation catalog slot. Forbidden for the
/// catalogs.
pub fn delete_relation(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }

    let name_val = AttrValue::String(rel_name.to_string());

    // Locate the relation's row in the relation catalog.
    cache.reset_search_index(RELCAT_RELID)?;
    let rel_rec_id = match linear_search(pool, cache, RELCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)?
    {
        Some(rec_id) => rec_id,
        None => return Err(ErrorCode::RelNotExist),
    };

    let relcat_types = crate::cache::RELCAT_ATTR_TYPES;
    let relcat_block = RecBlock::new(rel_rec_id.block);
    let rel_record = relcat_block.get_record(pool, rel_rec_id.slot, &relcat_types)?;
    let mut record_block = rel_record[3].number()? as BlockIdT;

    // Release every record block in the relation's chain.
    while record_block != -1 {
        let buf = RecBlock::new(record_block);
        let header = buf.get_header(pool)?;
        record_block = header.rblock;
        buf.release(pool)?;
    }

    // Remove the relation's attribute catalog rows.
    cache.reset_search_index(ATTRCAT_RELID)?;
    let mut attrs_deleted = 0;
    loop {
        let attr_rec_id =
            match linear_search(pool, cache, ATTRCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)? {
                Some(rec_id) => rec_id,
                None => break,
            };
        attrs_deleted += 1;

        let attrcat_block = RecBlock::new(attr_rec_id.block);
        let mut header = attrcat_block.get_header(pool)?;
        let attr_record = attrcat_block.get_record(pool, attr_rec_id.slot, &ATTRCAT_ATTR_TYPES)?;
        let root_block = attr_record[4].number()? as BlockIdT;

        let mut slot_map = attrcat_block.get_slot_map(pool)?;
        slot_map[attr_rec_id.slot as usize] = SLOT_UNOCCUPIED;
        attrcat_block.set_slot_map(pool, &slot_map)?;

        header.num_entries -= 1;
        attrcat_block.set_header(pool, &header)?;

        if header.num_entries == 0 {
            // Splice the emptied block out of the attribute catalog's chain.
            // The head block always holds the catalogs' own rows, so a
            // spliced block has a left neighbour.
            let left = RecBlock::new(header.lblock);
            let mut lheader = left.get_header(pool)?;
            lheader.rblock = header.rblock;
            left.set_header(pool, &lheader)?;

            if header.rblock != -1 {
                let right = RecBlock::new(header.rblock);
                let mut rheader = right.get_header(pool)?;
                rheader.lblock = header.lblock;
                right.set_header(pool, &rheader)?;
            } else {
                // Released block was the catalog's last block.
                let mut attrcat_rel = cache.rel_cat(ATTRCAT_RELID)?;
                attrcat_rel.last_blk = header.lblock;
                cache.set_rel_cat(ATTRCAT_RELID, attrcat_rel)?;
            }

            attrcat_block.release(pool)?;

            // The released block can no longer anchor the scan cursor. Its
            // left neighbour's slots were all visited already, so resume
            // from that block's end.
            cache.set_search_index(
                ATTRCAT_RELID,
                RecId::new(header.lblock, lheader.num_slots - 1),
            )?;
        }

        if root_block != -1 {
            index::bplus_destroy(pool, root_block)?;
        }
    }

    // Free the relation's slot in the relation catalog.
    let mut header = relcat_block.get_header(pool)?;
    header.num_entries -= 1;
    relcat_block.set_header(pool, &header)?;

    let mut slot_map = relcat_block.get_slot_map(pool)?;
    slot_map[rel_rec_id.slot as usize] = SLOT_UNOCCUPIED;
    relcat_block.set_slot_map(pool, &slot_map)?;

    // Keep the cached catalog row counts in step.
    let mut relcat_rel = cache.rel_cat(RELCAT_RELID)?;
    relcat_rel.num_recs -= 1;
    cache.set_rel_cat(RELCAT_RELID, relcat_rel)?;

    let mut attrcat_rel = cache.rel_cat(ATTRCAT_RELID)?;
    attrcat_rel.num_recs -= attrs_deleted;
    cache.set_rel_cat(ATTRCAT_RELID, attrcat_rel)?;

    Ok(())
}

/// Rename a relation by rewriting the `RelName` field of its relation
/// catalog row and of every matching attribute catalog row.
pub fn rename_relation(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let new_val = AttrValue::String(new_name.to_string());
    cache.reset_search_index(RELCAT_RELID)?;
    if linear_search(pool, cache, RELCAT_RELID, ATTR_RELNAME, &new_val, Op::Eq)?.is_some() {
        return Err(ErrorCode::RelExist);
    }

    let old_val = AttrValue::String(old_name.to_string());
    cache.reset_search_index(RELCAT_RELID)?;
    let rel_rec_id = match linear_search(pool, cache, RELCAT_RELID, ATTR_RELNAME, &old_val, Op::Eq)?
    {
        Some(rec_id) => rec_id,
        None => return Err(ErrorCode::RelNotExist),
    };

    let relcat_types = crate::cache::RELCAT_ATTR_TYPES;
    let relcat_block = RecBlock::new(rel_rec_id.block);
    let mut rel_record = relcat_block.get_record(pool, rel_rec_id.slot, &relcat_types)?;
    rel_record[0] = new_val;
    relcat_block.set_record(pool, rel_rec_id.slot, &rel_record)?;

    // Rewrite the relation name in every attribute catalog row.
    cache.reset_search_index(ATTRCAT_RELID)?;
    loop {
        let attr_rec_id =
            match linear_search(pool, cache, ATTRCAT_RELID, ATTR_RELNAME, &old_val, Op::Eq)? {
                Some(rec_id) => rec_id,
                None => break,
            };
        let attrcat_block = RecBlock::new(attr_rec_id.block);
        let mut attr_record = attrcat_block.get_record(pool, attr_rec_id.slot, &ATTRCAT_ATTR_TYPES)?;
        attr_record[0] = AttrValue::String(new_name.to_string());
        attrcat_block.set_record(pool, attr_rec_id.slot, &attr_record)?;
    }

    Ok(())
}

/// Rename one attribute of a relation by rewriting the `AttributeName` field
/// of its attribute catalog row.
pub fn rename_attribute(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let name_val = AttrValue::String(rel_name.to_string());
    cache.reset_search_index(RELCAT_RELID)?;
    if linear_search(pool, cache, RELCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)?.is_none() {
        return Err(ErrorCode::RelNotExist);
    }

    // Walk every attribute catalog row of the relation: find the attribute
    // to rename, and reject the rename if any row already carries the new
    // name.
    cache.reset_search_index(ATTRCAT_RELID)?;
    let mut target: Option<RecId> = None;
    loop {
        let attr_rec_id =
            match linear_search(pool, cache, ATTRCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)? {
                Some(rec_id) => rec_id,
                None => break,
            };
        let attrcat_block = RecBlock::new(attr_rec_id.block);
        let attr_record = attrcat_block.get_record(pool, attr_rec_id.slot, &ATTRCAT_ATTR_TYPES)?;
        let attr_name = attr_record[1].text()?;
        if attr_name == new_name {
            return Err(ErrorCode::AttrExist);
        }
        if attr_name == old_name {
            target = Some(attr_rec_id);
        }
    }

    let attr_rec_id = match target {
        Some(rec_id) => rec_id,
        None => return Err(ErrorCode::AttrNotExist),
    };

    let attrcat_block = RecBlock::new(attr_rec_id.block);
    let mut attr_record = attrcat_block.get_record(pool, attr_rec_id.slot, &ATTRCAT_ATTR_TYPES)?;
    attr_record[1] = AttrValue::String(new_name.to_string());
    attrcat_block.set_record(pool, attr_rec_id.slot, &attr_record)?;

    Ok(())
}
