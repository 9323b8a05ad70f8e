/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::algebra;
use crate::block::record_block::slots_per_block;
use crate::block::BlockHeader;
use crate::buffer::BufferPool;
use crate::cache::{
    AttrCatEntry, OpenRelTable, RelCatEntry, ATTRCAT_ATTR_NAMES, ATTRCAT_ATTR_TYPES, ATTRCAT_NAME,
    ATTRCAT_NO_ATTRS, RELCAT_ATTR_NAMES, RELCAT_ATTR_TYPES, RELCAT_NAME, RELCAT_NO_ATTRS,
};
use crate::common::{
    Op, RelIdT, ATTRCAT_BLOCK, ATTR_SIZE, BLOCK_MAP, BLOCK_REC, BLOCK_SIZE, HEADER_SIZE,
    MAP_BLOCKS, RELCAT_BLOCK, SLOT_OCCUPIED,
};
use crate::disk::DiskManager;
use crate::error::Result;
use crate::relation::{AttrType, AttrValue, Record};
use crate::schema;

use log::info;
use std::path::Path;

/// The engine owns the whole storage stack: the disk manager, the buffer
/// pool (with the block allocation map), and the open relation table. It is
/// constructed once per database file and shut down once; every operation is
/// a plain synchronous call on `&mut self`.
pub struct Engine {
    pub(crate) pool: BufferPool,
    pub(crate) cache: OpenRelTable,
}

impl Engine {
    /// Open a database file, formatting it with empty self-describing
    /// catalogs if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (mut disk, created) = DiskManager::open(path)?;
        if created {
            format_disk(&mut disk)?;
            info!("formatted fresh database file");
        }

        let mut pool = BufferPool::new(disk)?;
        let cache = OpenRelTable::new(&mut pool)?;
        Ok(Self { pool, cache })
    }

    /// Shut the engine down: close user relations, flush dirty catalog
    /// rows, write the allocation map back, and flush every dirty frame.
    pub fn shutdown(mut self) -> Result<()> {
        self.cache.shutdown(&mut self.pool)?;
        self.pool.shutdown()?;
        info!("engine shut down");
        Ok(())
    }

    /// Create a relation with the given attribute names and types.
    pub fn create_table(&mut self, rel_name: &str, attrs: &[(String, AttrType)]) -> Result<()> {
        schema::create_rel(&mut self.pool, &mut self.cache, rel_name, attrs)
    }

    /// Drop a relation. The relation must be closed.
    pub fn drop_table(&mut self, rel_name: &str) -> Result<()> {
        schema::delete_rel(&mut self.pool, &mut self.cache, rel_name)
    }

    /// Open a relation for use by queries.
    pub fn open_table(&mut self, rel_name: &str) -> Result<RelIdT> {
        schema::open_rel(&mut self.pool, &mut self.cache, rel_name)
    }

    /// Close an open relation, writing its cached catalog rows back.
    pub fn close_table(&mut self, rel_name: &str) -> Result<()> {
        schema::close_rel(&mut self.pool, &mut self.cache, rel_name)
    }

    /// Rename a closed relation.
    pub fn rename_table(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        schema::rename_rel(&mut self.pool, &mut self.cache, old_name, new_name)
    }

    /// Rename an attribute of a closed relation.
    pub fn rename_column(&mut self, rel_name: &str, old_name: &str, new_name: &str) -> Result<()> {
        schema::rename_attr(&mut self.pool, &mut self.cache, rel_name, old_name, new_name)
    }

    /// Build a B+ tree index over one attribute of an open relation.
    pub fn create_index(&mut self, rel_name: &str, attr_name: &str) -> Result<()> {
        schema::create_index(&mut self.pool, &mut self.cache, rel_name, attr_name)
    }

    /// Drop the B+ tree index over one attribute of an open relation.
    pub fn drop_index(&mut self, rel_name: &str, attr_name: &str) -> Result<()> {
        schema::drop_index(&mut self.pool, &mut self.cache, rel_name, attr_name)
    }

    /// Insert a tuple of string values into an open relation.
    pub fn insert_into(&mut self, rel_name: &str, values: &[String]) -> Result<()> {
        algebra::insert(&mut self.pool, &mut self.cache, rel_name, values)
    }

    /// Materialize the records of `src_rel` satisfying the predicate into a
    /// new relation `target_rel`.
    pub fn select(
        &mut self,
        src_rel: &str,
        target_rel: &str,
        attr_name: &str,
        op: Op,
        value: &str,
    ) -> Result<()> {
        algebra::select(
            &mut self.pool,
            &mut self.cache,
            src_rel,
            target_rel,
            attr_name,
            op,
            value,
        )
    }

    /// Materialize a full copy of `src_rel` into `target_rel`.
    pub fn project_all(&mut self, src_rel: &str, target_rel: &str) -> Result<()> {
        algebra::project_all(&mut self.pool, &mut self.cache, src_rel, target_rel)
    }

    /// Materialize a projection of `src_rel` onto `attr_list` into
    /// `target_rel`.
    pub fn project(&mut self, src_rel: &str, target_rel: &str, attr_list: &[String]) -> Result<()> {
        algebra::project(&mut self.pool, &mut self.cache, src_rel, target_rel, attr_list)
    }

    /// Equi-join `src_rel1` and `src_rel2` on `attr1 = attr2` into
    /// `target_rel`.
    pub fn join(
        &mut self,
        src_rel1: &str,
        src_rel2: &str,
        target_rel: &str,
        attr1: &str,
        attr2: &str,
    ) -> Result<()> {
        algebra::join(
            &mut self.pool,
            &mut self.cache,
            src_rel1,
            src_rel2,
            target_rel,
            attr1,
            attr2,
        )
    }

    /// The (name, type) pairs of an open relation's attributes in offset
    /// order.
    pub fn table_schema(&mut self, rel_name: &str) -> Result<Vec<(String, AttrType)>> {
        let rel_id = match self.cache.rel_id(rel_name) {
            Some(rel_id) => rel_id,
            None => return Err(crate::error::ErrorCode::RelNotOpen),
        };
        let rel_cat = self.cache.rel_cat(rel_id)?;
        let mut attrs = Vec::with_capacity(rel_cat.num_attrs as usize);
        for offset in 0..rel_cat.num_attrs {
            let attr_cat = self.cache.attr_cat_by_offset(rel_id, offset)?;
            attrs.push((attr_cat.attr_name, attr_cat.attr_type));
        }
        Ok(attrs)
    }

    /// Collect every record of an open relation in block-chain order.
    pub fn rows(&mut self, rel_name: &str) -> Result<Vec<Record>> {
        let rel_id = match self.cache.rel_id(rel_name) {
            Some(rel_id) => rel_id,
            None => return Err(crate::error::ErrorCode::RelNotOpen),
        };

        self.cache.reset_project_index(rel_id)?;
        let mut rows = Vec::new();
        loop {
            match crate::access::project(&mut self.pool, &mut self.cache, rel_id) {
                Ok(record) => rows.push(record),
                Err(crate::error::ErrorCode::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(rows)
    }
}

/// Lay an empty database out on a fresh disk: the allocation map in blocks
/// 0..MAP_BLOCKS, the relation catalog in block 4, and the attribute catalog
/// head in block 5, with the catalogs describing themselves at their
/// well-known slots.
fn format_disk(disk: &mut DiskManager) -> Result<()> {
    let num_slots = slots_per_block(RELCAT_NO_ATTRS);

    // Allocation map: the map's own blocks, then the two catalog blocks.
    // Everything else is free (the fresh file is zero-filled).
    let mut map = [0u8; BLOCK_SIZE];
    for i in 0..MAP_BLOCKS {
        map[i] = BLOCK_MAP;
    }
    map[RELCAT_BLOCK as usize] = BLOCK_REC;
    map[ATTRCAT_BLOCK as usize] = BLOCK_REC;
    disk.write_block(0, &map)?;

    // Relation catalog: its own row in slot 0, the attribute catalog's in
    // slot 1.
    let mut data = [0u8; BLOCK_SIZE];
    let header = BlockHeader {
        block_type: BLOCK_REC as i32,
        pblock: -1,
        lblock: -1,
        rblock: -1,
        num_entries: 2,
        num_attrs: RELCAT_NO_ATTRS as i32,
        num_slots,
    };
    header.write(&mut data)?;
    data[HEADER_SIZE] = SLOT_OCCUPIED;
    data[HEADER_SIZE + 1] = SLOT_OCCUPIED;

    let relcat_row = RelCatEntry {
        rel_name: RELCAT_NAME.to_string(),
        num_attrs: RELCAT_NO_ATTRS as i32,
        num_recs: 2,
        first_blk: RELCAT_BLOCK,
        last_blk: RELCAT_BLOCK,
        num_slots_per_blk: num_slots,
    };
    let attrcat_row = RelCatEntry {
        rel_name: ATTRCAT_NAME.to_string(),
        num_attrs: ATTRCAT_NO_ATTRS as i32,
        num_recs: (RELCAT_NO_ATTRS + ATTRCAT_NO_ATTRS) as i32,
        first_blk: ATTRCAT_BLOCK,
        last_blk: ATTRCAT_BLOCK,
        num_slots_per_blk: num_slots,
    };
    write_bootstrap_record(&mut data, num_slots, 0, &relcat_row.to_record())?;
    write_bootstrap_record(&mut data, num_slots, 1, &attrcat_row.to_record())?;
    disk.write_block(RELCAT_BLOCK, &data)?;

    // Attribute catalog: twelve rows describing the catalogs' columns.
    let mut data = [0u8; BLOCK_SIZE];
    let header = BlockHeader {
        block_type: BLOCK_REC as i32,
        pblock: -1,
        lblock: -1,
        rblock: -1,
        num_entries: (RELCAT_NO_ATTRS + ATTRCAT_NO_ATTRS) as i32,
        num_attrs: ATTRCAT_NO_ATTRS as i32,
        num_slots,
    };
    header.write(&mut data)?;
    for slot in 0..RELCAT_NO_ATTRS + ATTRCAT_NO_ATTRS {
        data[HEADER_SIZE + slot] = SLOT_OCCUPIED;
    }

    for (offset, (&attr_name, &attr_type)) in RELCAT_ATTR_NAMES
        .iter()
        .zip(RELCAT_ATTR_TYPES.iter())
        .enumerate()
    {
        let row = AttrCatEntry {
            rel_name: RELCAT_NAME.to_string(),
            attr_name: attr_name.to_string(),
            attr_type,
            primary_flag: 0,
            root_block: -1,
            offset: offset as i32,
        };
        write_bootstrap_record(&mut data, num_slots, offset, &row.to_record())?;
    }
    for (offset, (&attr_name, &attr_type)) in ATTRCAT_ATTR_NAMES
        .iter()
        .zip(ATTRCAT_ATTR_TYPES.iter())
        .enumerate()
    {
        let row = AttrCatEntry {
            rel_name: ATTRCAT_NAME.to_string(),
            attr_name: attr_name.to_string(),
            attr_type,
            primary_flag: 0,
            root_block: -1,
            offset: offset as i32,
        };
        write_bootstrap_record(
            &mut data,
            num_slots,
            RELCAT_NO_ATTRS + offset,
            &row.to_record(),
        )?;
    }
    disk.write_block(ATTRCAT_BLOCK, &data)?;

    Ok(())
}

/// Serialize one catalog record directly into a raw block image.
fn write_bootstrap_record(
    data: &mut [u8],
    num_slots: i32,
    slot: usize,
    record: &[AttrValue],
) -> Result<()> {
    let record_size = record.len() * ATTR_SIZE;
    let offset = HEADER_SIZE + num_slots as usize + slot * record_size;
    for (i, value) in record.iter().enumerate() {
        value.encode(&mut data[offset + i * ATTR_SIZE..offset + (i + 1) * ATTR_SIZE])?;
    }
    Ok(())
}
