/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::access;
use crate::block::record_block::slots_per_block;
use crate::buffer::BufferPool;
use crate::cache::{AttrCatEntry, OpenRelTable, RelCatEntry, ATTRCAT_NAME, ATTR_RELNAME, RELCAT_NAME};
use crate::common::{Op, RelIdT, ATTRCAT_RELID, ATTR_SIZE, RELCAT_RELID};
use crate::error::{ErrorCode, Result};
use crate::index;
use crate::relation::{AttrType, AttrValue};

/// The schema facade turns DDL requests into catalog-record edits: creating
/// a relation inserts one relation catalog row and one attribute catalog row
/// per attribute; dropping reverses it. Structural changes are forbidden on
/// the catalogs and on relations that are currently open.

/// Open the named relation in the catalog cache.
pub fn open_rel(pool: &mut BufferPool, cache: &mut OpenRelTable, rel_name: &str) -> Result<RelIdT> {
    cache.open_rel(pool, rel_name)
}

/// Close the named relation. Forbidden for the catalogs.
pub fn close_rel(pool: &mut BufferPool, cache: &mut OpenRelTable, rel_name: &str) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    match cache.rel_id(rel_name) {
        Some(rel_id) => cache.close_rel(pool, rel_id),
        None => Err(ErrorCode::RelNotOpen),
    }
}

/// Create a relation with the given attribute names and types.
pub fn create_rel(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    attrs: &[(String, AttrType)],
) -> Result<()> {
    check_name(rel_name)?;
    for (attr_name, _) in attrs {
        check_name(attr_name)?;
    }

    // The layout must leave room for at least one record slot per block.
    if attrs.is_empty() || slots_per_block(attrs.len()) < 1 {
        return Err(ErrorCode::OutOfBound);
    }

    // Reject duplicate attribute names up front.
    for i in 0..attrs.len() {
        for j in i + 1..attrs.len() {
            if attrs[i].0 == attrs[j].0 {
                return Err(ErrorCode::DuplicateAttr);
            }
        }
    }

    // The name must not collide with an existing relation.
    let name_val = AttrValue::String(rel_name.to_string());
    cache.reset_search_index(RELCAT_RELID)?;
    if access::linear_search(pool, cache, RELCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)?.is_some()
    {
        return Err(ErrorCode::RelExist);
    }

    // Insert the relation catalog row. The relation starts empty with no
    // record blocks.
    let rel_entry = RelCatEntry {
        rel_name: rel_name.to_string(),
        num_attrs: attrs.len() as i32,
        num_recs: 0,
        first_blk: -1,
        last_blk: -1,
        num_slots_per_blk: slots_per_block(attrs.len()),
    };
    access::insert(pool, cache, RELCAT_RELID, &rel_entry.to_record())?;

    // Insert one attribute catalog row per attribute. If the disk fills
    // part-way, undo the half-created relation.
    for (offset, (attr_name, attr_type)) in attrs.iter().enumerate() {
        let attr_entry = AttrCatEntry {
            rel_name: rel_name.to_string(),
            attr_name: attr_name.clone(),
            attr_type: *attr_type,
            primary_flag: 0,
            root_block: -1,
            offset: offset as i32,
        };
        if let Err(e) = access::insert(pool, cache, ATTRCAT_RELID, &attr_entry.to_record()) {
            delete_rel(pool, cache, rel_name)?;
            return Err(e);
        }
    }

    Ok(())
}

/// Drop a relation: forbidden for the catalogs and while the relation is
/// open.
pub fn delete_rel(pool: &mut BufferPool, cache: &mut OpenRelTable, rel_name: &str) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    if cache.rel_id(rel_name).is_some() {
        return Err(ErrorCode::NotPermitted);
    }
    access::delete_relation(pool, cache, rel_name)
}

/// Rename a relation: forbidden for the catalogs and while the relation is
/// open.
pub fn rename_rel(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    check_name(new_name)?;
    if old_name == RELCAT_NAME || old_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    if new_name == RELCAT_NAME || new_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    if cache.rel_id(old_name).is_some() {
        return Err(ErrorCode::NotPermitted);
    }
    access::rename_relation(pool, cache, old_name, new_name)
}

/// Rename an attribute: forbidden for the catalogs and while the relation
/// is open.
pub fn rename_attr(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    check_name(new_name)?;
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    if cache.rel_id(rel_name).is_some() {
        return Err(ErrorCode::NotPermitted);
    }
    access::rename_attribute(pool, cache, rel_name, old_name, new_name)
}

/// Build a B+ tree index over one attribute of an open relation.
pub fn create_index(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    attr_name: &str,
) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    let rel_id = match cache.rel_id(rel_name) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };
    index::bplus_create(pool, cache, rel_id, attr_name)
}

/// Destroy the B+ tree index over one attribute of an open relation.
pub fn drop_index(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    attr_name: &str,
) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }
    let rel_id = match cache.rel_id(rel_name) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    let mut attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    if attr_cat.root_block == -1 {
        return Err(ErrorCode::NoIndex);
    }

    index::bplus_destroy(pool, attr_cat.root_block)?;
    attr_cat.root_block = -1;
    cache.set_attr_cat(rel_id, attr_name, attr_cat)
}

/// Relation and attribute names must fit a NUL-terminated attribute cell.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.as_bytes().len() > ATTR_SIZE - 1 {
        return Err(ErrorCode::OutOfBound);
    }
    Ok(())
}
