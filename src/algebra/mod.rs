/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::access;
use crate::buffer::BufferPool;
use crate::cache::{OpenRelTable, ATTRCAT_NAME, RELCAT_NAME};
use crate::common::{Op, RelIdT};
use crate::error::{ErrorCode, Result};
use crate::index;
use crate::relation::{AttrType, AttrValue, Record};
use crate::schema;

/// The relational-algebra facade. Every operation materializes its result
/// into a named target relation; a failure part-way through deletes the
/// half-built target before the error is reported.

/// Insert a tuple given as strings, converting each value to the declared
/// type of its column. Forbidden for the catalogs.
pub fn insert(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_name: &str,
    values: &[String],
) -> Result<()> {
    if rel_name == RELCAT_NAME || rel_name == ATTRCAT_NAME {
        return Err(ErrorCode::NotPermitted);
    }

    let rel_id = match cache.rel_id(rel_name) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    let rel_cat = cache.rel_cat(rel_id)?;
    if values.len() != rel_cat.num_attrs as usize {
        return Err(ErrorCode::NAttrMismatch);
    }

    let mut record: Record = Vec::with_capacity(values.len());
    for (offset, value) in values.iter().enumerate() {
        let attr_cat = cache.attr_cat_by_offset(rel_id, offset as i32)?;
        record.push(AttrValue::parse(value, attr_cat.attr_type)?);
    }

    access::insert(pool, cache, rel_id, &record)
}

/// Create `target_rel` with `src_rel`'s schema and copy over every record
/// whose `attr_name` field satisfies `op` against `str_val`.
pub fn select(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    src_rel: &str,
    target_rel: &str,
    attr_name: &str,
    op: Op,
    str_val: &str,
) -> Result<()> {
    let src_rel_id = match cache.rel_id(src_rel) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    let attr_cat = cache
        .attr_cat_by_name(src_rel_id, attr_name)
        .map_err(|_| ErrorCode::AttrNotExist)?;
    let attr_val = AttrValue::parse(str_val, attr_cat.attr_type)?;

    let attrs = schema_of(cache, src_rel_id)?;
    schema::create_rel(pool, cache, target_rel, &attrs)?;
    let target_rel_id = match schema::open_rel(pool, cache, target_rel) {
        Ok(rel_id) => rel_id,
        Err(e) => {
            schema::delete_rel(pool, cache, target_rel)?;
            return Err(e);
        }
    };

    // The search may run through the B+ tree or a linear scan; reset both
    // cursors so it starts from the first record.
    cache.reset_search_index(src_rel_id)?;
    cache.reset_attr_search_index(src_rel_id, attr_name)?;

    loop {
        match access::search(pool, cache, src_rel_id, attr_name, &attr_val, op) {
            Ok(record) => {
                if let Err(e) = access::insert(pool, cache, target_rel_id, &record) {
                    rollback_target(pool, cache, target_rel);
                    return Err(e);
                }
            }
            Err(ErrorCode::NotFound) => break,
            Err(e) => {
                rollback_target(pool, cache, target_rel);
                return Err(e);
            }
        }
    }

    schema::close_rel(pool, cache, target_rel)
}

/// Materialize a full copy of `src_rel` into `target_rel`.
pub fn project_all(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    src_rel: &str,
    target_rel: &str,
) -> Result<()> {
    let src_rel_id = match cache.rel_id(src_rel) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    let attrs = schema_of(cache, src_rel_id)?;
    schema::create_rel(pool, cache, target_rel, &attrs)?;
    let target_rel_id = match schema::open_rel(pool, cache, target_rel) {
        Ok(rel_id) => rel_id,
        Err(e) => {
            schema::delete_rel(pool, cache, target_rel)?;
            return Err(e);
        }
    };

    cache.reset_project_index(src_rel_id)?;
    loop {
        match access::project(pool, cache, src_rel_id) {
            Ok(record) => {
                if let Err(e) = access::insert(pool, cache, target_rel_id, &record) {
                    rollback_target(pool, cache, target_rel);
                    return Err(e);
                }
            }
            Err(ErrorCode::NotFound) => break,
            Err(e) => {
                rollback_target(pool, cache, target_rel);
                return Err(e);
            }
        }
    }

    schema::close_rel(pool, cache, target_rel)
}

/// Materialize a projection of `src_rel` onto the listed attributes into
/// `target_rel`.
pub fn project(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    src_rel: &str,
    target_rel: &str,
    attr_list: &[String],
) -> Result<()> {
    let src_rel_id = match cache.rel_id(src_rel) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    // Resolve each target attribute's offset and type in the source.
    let mut attr_offsets = Vec::with_capacity(attr_list.len());
    let mut attrs = Vec::with_capacity(attr_list.len());
    for attr_name in attr_list {
        let attr_cat = cache.attr_cat_by_name(src_rel_id, attr_name)?;
        attr_offsets.push(attr_cat.offset as usize);
        attrs.push((attr_name.clone(), attr_cat.attr_type));
    }

    schema::create_rel(pool, cache, target_rel, &attrs)?;
    let target_rel_id = match schema::open_rel(pool, cache, target_rel) {
        Ok(rel_id) => rel_id,
        Err(e) => {
            schema::delete_rel(pool, cache, target_rel)?;
            return Err(e);
        }
    };

    cache.reset_project_index(src_rel_id)?;
    loop {
        match access::project(pool, cache, src_rel_id) {
            Ok(record) => {
                let proj_record: Record = attr_offsets
                    .iter()
                    .map(|&offset| record[offset].clone())
                    .collect();
                if let Err(e) = access::insert(pool, cache, target_rel_id, &proj_record) {
                    rollback_target(pool, cache, target_rel);
                    return Err(e);
                }
            }
            Err(ErrorCode::NotFound) => break,
            Err(e) => {
                rollback_target(pool, cache, target_rel);
                return Err(e);
            }
        }
    }

    schema::close_rel(pool, cache, target_rel)
}

/// Nested-loop equi-join of `src_rel1` and `src_rel2` on `attr1 = attr2`,
/// materialized into `target_rel`. The outer relation is scanned with the
/// projection cursor; the inner side is probed through a B+ tree on
/// `attr2`, built first if missing. The target schema is all of src1
/// followed by src2 minus `attr2`.
pub fn join(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    src_rel1: &str,
    src_rel2: &str,
    target_rel: &str,
    attr1: &str,
    attr2: &str,
) -> Result<()> {
    let src_rel_id1 = match cache.rel_id(src_rel1) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };
    let src_rel_id2 = match cache.rel_id(src_rel2) {
        Some(rel_id) => rel_id,
        None => return Err(ErrorCode::RelNotOpen),
    };

    let attr_cat1 = cache.attr_cat_by_name(src_rel_id1, attr1)?;
    let attr_cat2 = cache.attr_cat_by_name(src_rel_id2, attr2)?;
    if attr_cat1.attr_type != attr_cat2.attr_type {
        return Err(ErrorCode::AttrTypeMismatch);
    }

    let rel_cat1 = cache.rel_cat(src_rel_id1)?;
    let rel_cat2 = cache.rel_cat(src_rel_id2)?;

    // Any attribute name shared by both sources other than the join pair
    // itself would be ambiguous in the output schema.
    for i in 0..rel_cat1.num_attrs {
        let a1 = cache.attr_cat_by_offset(src_rel_id1, i)?;
        for j in 0..rel_cat2.num_attrs {
            let a2 = cache.attr_cat_by_offset(src_rel_id2, j)?;
            if a1.attr_name == attr1 && a2.attr_name == attr2 {
                continue;
            }
            if a1.attr_name == a2.attr_name {
                return Err(ErrorCode::DuplicateAttr);
            }
        }
    }

    // Probe the inner relation through an index; build one if necessary.
    if attr_cat2.root_block == -1 {
        index::bplus_create(pool, cache, src_rel_id2, attr2)?;
    }

    // Target schema: all of src1, then src2 without the join attribute.
    let mut attrs = Vec::with_capacity((rel_cat1.num_attrs + rel_cat2.num_attrs - 1) as usize);
    for i in 0..rel_cat1.num_attrs {
        let a = cache.attr_cat_by_offset(src_rel_id1, i)?;
        attrs.push((a.attr_name, a.attr_type));
    }
    for j in 0..rel_cat2.num_attrs {
        let a = cache.attr_cat_by_offset(src_rel_id2, j)?;
        if a.attr_name != attr2 {
            attrs.push((a.attr_name, a.attr_type));
        }
    }

    schema::create_rel(pool, cache, target_rel, &attrs)?;
    let target_rel_id = match schema::open_rel(pool, cache, target_rel) {
        Ok(rel_id) => rel_id,
        Err(e) => {
            schema::delete_rel(pool, cache, target_rel)?;
            return Err(e);
        }
    };

    cache.reset_project_index(src_rel_id1)?;
    loop {
        let record1 = match access::project(pool, cache, src_rel_id1) {
            Ok(record) => record,
            Err(ErrorCode::NotFound) => break,
            Err(e) => {
                rollback_target(pool, cache, target_rel);
                return Err(e);
            }
        };

        // Probe the inner relation for every record matching the outer
        // record's join value.
        cache.reset_search_index(src_rel_id2)?;
        cache.reset_attr_search_index(src_rel_id2, attr2)?;
        let join_val = record1[attr_cat1.offset as usize].clone();

        loop {
            let record2 = match access::search(pool, cache, src_rel_id2, attr2, &join_val, Op::Eq)
            {
                Ok(record) => record,
                Err(ErrorCode::NotFound) => break,
                Err(e) => {
                    rollback_target(pool, cache, target_rel);
                    return Err(e);
                }
            };

            let mut joined: Record = record1.clone();
            for (j, value) in record2.into_iter().enumerate() {
                if j != attr_cat2.offset as usize {
                    joined.push(value);
                }
            }

            if let Err(e) = access::insert(pool, cache, target_rel_id, &joined) {
                rollback_target(pool, cache, target_rel);
                return Err(e);
            }
        }
    }

    schema::close_rel(pool, cache, target_rel)
}

/// The (name, type) pairs of a relation's attributes in offset order.
fn schema_of(cache: &OpenRelTable, rel_id: RelIdT) -> Result<Vec<(String, AttrType)>> {
    let rel_cat = cache.rel_cat(rel_id)?;
    let mut attrs = Vec::with_capacity(rel_cat.num_attrs as usize);
    for offset in 0..rel_cat.num_attrs {
        let attr_cat = cache.attr_cat_by_offset(rel_id, offset)?;
        attrs.push((attr_cat.attr_name, attr_cat.attr_type));
    }
    Ok(attrs)
}

/// Best-effort teardown of a half-built target relation after a failure.
fn rollback_target(pool: &mut BufferPool, cache: &mut OpenRelTable, target_rel: &str) {
    let _ = schema::close_rel(pool, cache, target_rel);
    let _ = schema::delete_rel(pool, cache, target_rel);
}
