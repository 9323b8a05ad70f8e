/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::block::{
    Block, BlockBuffer, InternalBlock, InternalEntry, LeafBlock, LeafEntry, RecBlock,
};
use crate::buffer::BufferPool;
use crate::cache::OpenRelTable;
use crate::common::{
    BlockIdT, IndexId, Op, RecId, RelIdT, ATTRCAT_RELID, BLOCK_IND_INTERNAL, BLOCK_IND_LEAF,
    DISK_BLOCKS, MAX_KEYS_INTERNAL, MAX_KEYS_LEAF, MIDDLE_INDEX_INTERNAL, MIDDLE_INDEX_LEAF,
    RELCAT_RELID,
};
use crate::error::{ErrorCode, Result};
use crate::relation::{compare_attrs, AttrType, AttrValue};

use std::cmp::Ordering;

/// A disk-resident B+ tree over one attribute of a relation. Leaves hold
/// `(key, record id)` pairs in ascending key order and form a doubly linked
/// list; internal blocks hold separator keys with child links and point back
/// at their parent through the block header. Duplicate keys are routed to
/// the left subtree during descent.

/// Find the next record whose indexed attribute satisfies `op` against
/// `attr_val`, resuming from the attribute's cursor. The cursor remembers
/// the last matched leaf entry so successive calls enumerate all matches;
/// `None` means the search is exhausted.
pub fn bplus_search(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    attr_val: &AttrValue,
    op: Op,
) -> Result<Option<RecId>> {
    let search_index = cache.attr_search_index(rel_id, attr_name)?;
    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    let attr_type = attr_cat.attr_type;

    let mut block: BlockIdT;
    let mut index: i32;

    if search_index.is_invalid() {
        // First call: descend from the root.
        block = attr_cat.root_block;
        index = 0;
        if block == -1 {
            return Ok(None);
        }
    } else {
        // Resume from the entry next to the previous hit, rolling over to
        // the next leaf when past the end.
        block = search_index.block;
        index = search_index.index + 1;

        let leaf_head = LeafBlock::new(block).get_header(pool)?;
        if index >= leaf_head.num_entries {
            block = leaf_head.rblock;
            index = 0;
            if block == -1 {
                return Ok(None);
            }
        }
    }

    // Descend through the internal blocks. (Only relevant when the search
    // starts from the root; a resumed search is already at a leaf.)
    while pool.block_type(block)? == BLOCK_IND_INTERNAL {
        let internal = InternalBlock::new(block);
        let head = internal.get_header(pool)?;

        block = match op {
            // NE scans the whole leaf chain; LT/LE hits, if any, lie in the
            // leftmost leaf. Always move left.
            Op::Ne | Op::Lt | Op::Le => internal.get_entry(pool, 0, attr_type)?.lchild,

            // EQ/GE/GT: move to the left child of the first entry whose key
            // satisfies the relaxed relation, else to the right child of the
            // last entry.
            Op::Eq | Op::Ge | Op::Gt => {
                let mut chosen = None;
                for i in 0..head.num_entries {
                    let entry = internal.get_entry(pool, i, attr_type)?;
                    let cmp = compare_attrs(&entry.attr_val, attr_val);
                    let qualifies = match op {
                        Op::Gt => cmp == Ordering::Greater,
                        _ => cmp != Ordering::Less,
                    };
                    if qualifies {
                        chosen = Some(entry.lchild);
                        break;
                    }
                }
                match chosen {
                    Some(lchild) => lchild,
                    None => {
                        internal
                            .get_entry(pool, head.num_entries - 1, attr_type)?
                            .rchild
                    }
                }
            }
        };
    }

    // `block` is now a leaf. Walk entries rightward until one satisfies the
    // operator.
    while block != -1 {
        let leaf = LeafBlock::new(block);
        let head = leaf.get_header(pool)?;

        while index < head.num_entries {
            let entry = leaf.get_entry(pool, index, attr_type)?;
            let cmp = compare_attrs(&entry.attr_val, attr_val);

            if op.matches(cmp) {
                cache.set_attr_search_index(rel_id, attr_name, IndexId { block, index })?;
                return Ok(Some(RecId::new(entry.block, entry.slot)));
            } else if matches!(op, Op::Eq | Op::Le | Op::Lt) && cmp == Ordering::Greater {
                // Keys are ascending; no later entry can satisfy these ops.
                return Ok(None);
            }

            index += 1;
        }

        // Only NE has to check the entire leaf chain; for every other op the
        // leaf reached by the descent holds the matches, if any exist.
        if op != Op::Ne {
            break;
        }
        block = head.rblock;
        index = 0;
    }

    Ok(None)
}

/// Build a B+ tree over the attribute, inserting every existing record of
/// the relation. A no-op if the attribute is already indexed; forbidden for
/// the catalogs. If the disk fills mid-build the partial tree is destroyed
/// and `DiskFull` is reported.
pub fn bplus_create(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
) -> Result<()> {
    if rel_id == RELCAT_RELID || rel_id == ATTRCAT_RELID {
        return Err(ErrorCode::NotPermitted);
    }

    let mut attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    if attr_cat.root_block != -1 {
        return Ok(());
    }

    // A fresh tree is a single empty leaf.
    let root = LeafBlock::alloc(pool)?;
    attr_cat.root_block = root.block_num();
    let attr_offset = attr_cat.offset;
    cache.set_attr_cat(rel_id, attr_name, attr_cat)?;

    let rel_cat = cache.rel_cat(rel_id)?;
    let attr_types = cache.attr_types(rel_id)?;

    // Insert every occupied slot of every record block.
    let mut block = rel_cat.first_blk;
    while block != -1 {
        let rec_block = RecBlock::new(block);
        let slot_map = rec_block.get_slot_map(pool)?;

        for slot in 0..rel_cat.num_slots_per_blk {
            if slot_map[slot as usize] != crate::common::SLOT_OCCUPIED {
                continue;
            }
            let record = rec_block.get_record(pool, slot, &attr_types)?;
            // bplus_insert destroys the tree itself if the disk fills.
            bplus_insert(
                pool,
                cache,
                rel_id,
                attr_name,
                &record[attr_offset as usize],
                RecId::new(block, slot),
            )?;
        }

        block = rec_block.get_header(pool)?.rblock;
    }

    Ok(())
}

/// Recursively release every block of the tree rooted at `root_block_num`.
/// For an internal block, the first entry's lChild and every entry's rChild
/// cover all children exactly once.
pub fn bplus_destroy(pool: &mut BufferPool, root_block_num: BlockIdT) -> Result<()> {
    if root_block_num < 0 || root_block_num as usize >= DISK_BLOCKS {
        return Err(ErrorCode::OutOfBound);
    }

    match pool.block_type(root_block_num)? {
        BLOCK_IND_LEAF => LeafBlock::new(root_block_num).release(pool),
        BLOCK_IND_INTERNAL => {
            let internal = InternalBlock::new(root_block_num);
            let header = internal.get_header(pool)?;
            for i in 0..header.num_entries {
                // Child links sit at fixed offsets; the key bytes are not
                // interpreted here.
                let entry = internal.get_entry(pool, i, AttrType::Number)?;
                if i == 0 {
                    bplus_destroy(pool, entry.lchild)?;
                }
                bplus_destroy(pool, entry.rchild)?;
            }
            internal.release(pool)
        }
        _ => Err(ErrorCode::InvalidBlock),
    }
}

/// Insert one `(key, record id)` pair into the attribute's tree. On
/// `DiskFull` anywhere in the split cascade, the entire tree is destroyed,
/// the attribute's root block is cleared to -1, and `DiskFull` is returned.
pub fn bplus_insert(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    attr_val: &AttrValue,
    rec_id: RecId,
) -> Result<()> {
    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    if attr_cat.root_block == -1 {
        return Err(ErrorCode::NoIndex);
    }

    let leaf_block_num =
        find_leaf_to_insert(pool, attr_cat.root_block, attr_val, attr_cat.attr_type)?;

    let entry = LeafEntry {
        attr_val: attr_val.clone(),
        block: rec_id.block,
        slot: rec_id.slot,
    };
    match insert_into_leaf(pool, cache, rel_id, attr_name, leaf_block_num, entry) {
        Ok(()) => Ok(()),
        Err(ErrorCode::DiskFull) => {
            // Unwind: drop the whole tree so no half-connected subtree
            // survives, and record that the attribute is unindexed.
            let mut attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
            bplus_destroy(pool, attr_cat.root_block)?;
            attr_cat.root_block = -1;
            cache.set_attr_cat(rel_id, attr_name, attr_cat)?;
            Err(ErrorCode::DiskFull)
        }
        Err(e) => Err(e),
    }
}

/// Descend from the root to the leaf that should receive `attr_val`,
/// routing duplicates left: at each internal block, take the lChild of the
/// first entry with key >= the value, else the rChild of the last entry.
fn find_leaf_to_insert(
    pool: &mut BufferPool,
    root_block: BlockIdT,
    attr_val: &AttrValue,
    attr_type: AttrType,
) -> Result<BlockIdT> {
    let mut block_num = root_block;

    while pool.block_type(block_num)? != BLOCK_IND_LEAF {
        let internal = InternalBlock::new(block_num);
        let header = internal.get_header(pool)?;

        let mut chosen = None;
        for i in 0..header.num_entries {
            let entry = internal.get_entry(pool, i, attr_type)?;
            if compare_attrs(&entry.attr_val, attr_val) != Ordering::Less {
                chosen = Some(entry.lchild);
                break;
            }
        }
        block_num = match chosen {
            Some(lchild) => lchild,
            None => {
                internal
                    .get_entry(pool, header.num_entries - 1, attr_type)?
                    .rchild
            }
        };
    }

    Ok(block_num)
}

/// Insert an entry into a leaf in sorted position, splitting the leaf when
/// it already holds `MAX_KEYS_LEAF` entries. Splits propagate to the parent
/// (or grow a new root).
fn insert_into_leaf(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    block_num: BlockIdT,
    new_entry: LeafEntry,
) -> Result<()> {
    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    let attr_type = attr_cat.attr_type;

    let leaf = LeafBlock::new(block_num);
    let mut header = leaf.get_header(pool)?;

    // All existing entries plus the new one, in ascending key order. Equal
    // keys keep the existing entries first.
    let mut entries = Vec::with_capacity(header.num_entries as usize + 1);
    for i in 0..header.num_entries {
        entries.push(leaf.get_entry(pool, i, attr_type)?);
    }
    let pos = entries
        .iter()
        .position(|e| compare_attrs(&e.attr_val, &new_entry.attr_val) == Ordering::Greater)
        .unwrap_or(entries.len());
    entries.insert(pos, new_entry);

    if (header.num_entries as usize) < MAX_KEYS_LEAF {
        header.num_entries += 1;
        leaf.set_header(pool, &header)?;
        for (i, entry) in entries.iter().enumerate() {
            leaf.set_entry(pool, i as i32, entry)?;
        }
        return Ok(());
    }

    // Overflow: split 32/32 and push the middle key up.
    let new_right_num = split_leaf(pool, block_num, &entries)?;

    if header.pblock != -1 {
        let up = InternalEntry {
            lchild: block_num,
            attr_val: entries[MIDDLE_INDEX_LEAF].attr_val.clone(),
            rchild: new_right_num,
        };
        insert_into_internal(pool, cache, rel_id, attr_name, header.pblock, up)
    } else {
        create_new_root(
            pool,
            cache,
            rel_id,
            attr_name,
            entries[MIDDLE_INDEX_LEAF].attr_val.clone(),
            block_num,
            new_right_num,
        )
    }
}

/// Distribute an overflowing leaf's entries 32/32 between the existing
/// block and a fresh right sibling, maintaining the leaf chain.
fn split_leaf(pool: &mut BufferPool, left_num: BlockIdT, entries: &[LeafEntry]) -> Result<BlockIdT> {
    let right = LeafBlock::alloc(pool)?;
    let right_num = right.block_num();
    let left = LeafBlock::new(left_num);

    let mut lheader = left.get_header(pool)?;
    let mut rheader = right.get_header(pool)?;

    let half = ((MAX_KEYS_LEAF + 1) / 2) as i32;
    rheader.num_entries = half;
    rheader.pblock = lheader.pblock;
    rheader.lblock = left_num;
    rheader.rblock = lheader.rblock;
    right.set_header(pool, &rheader)?;

    lheader.num_entries = half;
    lheader.rblock = right_num;
    left.set_header(pool, &lheader)?;

    for i in 0..half as usize {
        left.set_entry(pool, i as i32, &entries[i])?;
        right.set_entry(pool, i as i32, &entries[i + half as usize])?;
    }

    Ok(right_num)
}

/// Insert a separator entry into an internal block in sorted position,
/// splitting it when it already holds `MAX_KEYS_INTERNAL` entries. Splits
/// cascade upward.
fn insert_into_internal(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    block_num: BlockIdT,
    new_entry: InternalEntry,
) -> Result<()> {
    let attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    let attr_type = attr_cat.attr_type;

    let internal = InternalBlock::new(block_num);
    let mut header = internal.get_header(pool)?;

    let mut entries = Vec::with_capacity(header.num_entries as usize + 1);
    for i in 0..header.num_entries {
        entries.push(internal.get_entry(pool, i, attr_type)?);
    }
    let pos = entries
        .iter()
        .position(|e| compare_attrs(&e.attr_val, &new_entry.attr_val) != Ordering::Less)
        .unwrap_or(entries.len());
    entries.insert(pos, new_entry.clone());

    // Restore the shared-child invariant around the inserted entry.
    for i in 1..entries.len() {
        entries[i].lchild = entries[i - 1].rchild;
    }

    if (header.num_entries as usize) < MAX_KEYS_INTERNAL {
        header.num_entries += 1;
        internal.set_header(pool, &header)?;
        for (i, entry) in entries.iter().enumerate() {
            internal.set_entry(pool, i as i32, entry)?;
        }
        return Ok(());
    }

    // Overflow: split 50/50 with entry 50 promoted.
    let new_right_num = match split_internal(pool, block_num, &entries) {
        Ok(num) => num,
        Err(ErrorCode::DiskFull) => {
            // The subtree hanging off the entry that could not be connected
            // is unreachable; drop it before unwinding.
            bplus_destroy(pool, new_entry.rchild)?;
            return Err(ErrorCode::DiskFull);
        }
        Err(e) => return Err(e),
    };

    if header.pblock != -1 {
        let up = InternalEntry {
            lchild: block_num,
            attr_val: entries[MIDDLE_INDEX_INTERNAL].attr_val.clone(),
            rchild: new_right_num,
        };
        insert_into_internal(pool, cache, rel_id, attr_name, header.pblock, up)
    } else {
        create_new_root(
            pool,
            cache,
            rel_id,
            attr_name,
            entries[MIDDLE_INDEX_INTERNAL].attr_val.clone(),
            block_num,
            new_right_num,
        )
    }
}

/// Distribute an overflowing internal block's entries 50/50 between the
/// existing block and a fresh right sibling (entry 50 moves to the parent),
/// repointing the moved children at their new parent.
fn split_internal(
    pool: &mut BufferPool,
    left_num: BlockIdT,
    entries: &[InternalEntry],
) -> Result<BlockIdT> {
    let right = InternalBlock::alloc(pool)?;
    let right_num = right.block_num();
    let left = InternalBlock::new(left_num);

    let mut lheader = left.get_header(pool)?;
    let mut rheader = right.get_header(pool)?;

    let half = (MAX_KEYS_INTERNAL / 2) as i32;
    rheader.num_entries = half;
    rheader.pblock = lheader.pblock;
    right.set_header(pool, &rheader)?;

    lheader.num_entries = half;
    left.set_header(pool, &lheader)?;

    for i in 0..half as usize {
        left.set_entry(pool, i as i32, &entries[i])?;
        right.set_entry(pool, i as i32, &entries[i + MIDDLE_INDEX_INTERNAL + 1])?;
    }

    // Children moved into the right block must point back at it.
    for i in 0..half as usize {
        let moved = &entries[MIDDLE_INDEX_INTERNAL + 1 + i];
        if i == 0 {
            repoint_parent(pool, moved.lchild, right_num)?;
        }
        repoint_parent(pool, moved.rchild, right_num)?;
    }

    Ok(right_num)
}

/// Grow the tree by one level: a new root with a single separator entry
/// over the two given children.
fn create_new_root(
    pool: &mut BufferPool,
    cache: &mut OpenRelTable,
    rel_id: RelIdT,
    attr_name: &str,
    attr_val: AttrValue,
    lchild: BlockIdT,
    rchild: BlockIdT,
) -> Result<()> {
    let new_root = match InternalBlock::alloc(pool) {
        Ok(block) => block,
        Err(ErrorCode::DiskFull) => {
            // The freshly split right subtree never got connected; drop it
            // before unwinding.
            bplus_destroy(pool, rchild)?;
            return Err(ErrorCode::DiskFull);
        }
        Err(e) => return Err(e),
    };
    let new_root_num = new_root.block_num();

    let mut header = new_root.get_header(pool)?;
    header.num_entries = 1;
    new_root.set_header(pool, &header)?;
    new_root.set_entry(
        pool,
        0,
        &InternalEntry {
            lchild,
            attr_val,
            rchild,
        },
    )?;

    repoint_parent(pool, lchild, new_root_num)?;
    repoint_parent(pool, rchild, new_root_num)?;

    let mut attr_cat = cache.attr_cat_by_name(rel_id, attr_name)?;
    attr_cat.root_block = new_root_num;
    cache.set_attr_cat(rel_id, attr_name, attr_cat)?;

    Ok(())
}

/// Point a child block's pblock at its new parent.
fn repoint_parent(pool: &mut BufferPool, child: BlockIdT, parent: BlockIdT) -> Result<()> {
    let buf = BlockBuffer::new(child);
    let mut header = buf.get_header(pool)?;
    header.pblock = parent;
    buf.set_header(pool, &header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BLOCK_REC;
    use crate::engine::Engine;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path().join("test.db")).unwrap();
        (dir, engine)
    }

    /// Create and open a single-number-column relation and index it.
    fn setup_indexed_table(engine: &mut Engine) -> RelIdT {
        engine
            .create_table("T", &[("a".to_string(), AttrType::Number)])
            .unwrap();
        engine.open_table("T").unwrap();
        engine.create_index("T", "a").unwrap();
        engine.cache.rel_id("T").unwrap()
    }

    fn insert_number(engine: &mut Engine, n: i64) {
        engine.insert_into("T", &[n.to_string()]).unwrap();
    }

    fn root_of(engine: &Engine, rel_id: RelIdT) -> BlockIdT {
        engine.cache.attr_cat_by_name(rel_id, "a").unwrap().root_block
    }

    /// Walk down to the leftmost leaf, then collect every key along the
    /// leaf chain, counting the leaves.
    fn leaf_chain_keys(engine: &mut Engine, root: BlockIdT) -> (Vec<f64>, usize) {
        let pool = &mut engine.pool;
        let mut block = root;
        while pool.block_type(block).unwrap() == BLOCK_IND_INTERNAL {
            block = InternalBlock::new(block)
                .get_entry(pool, 0, AttrType::Number)
                .unwrap()
                .lchild;
        }

        let mut keys = Vec::new();
        let mut leaves = 0;
        while block != -1 {
            let leaf = LeafBlock::new(block);
            let header = leaf.get_header(pool).unwrap();
            for i in 0..header.num_entries {
                let entry = leaf.get_entry(pool, i, AttrType::Number).unwrap();
                keys.push(entry.attr_val.number().unwrap());
            }
            leaves += 1;
            block = header.rblock;
        }
        (keys, leaves)
    }

    /// Recursively check parent back-pointers, separator ordering, and the
    /// shared-child layout of the subtree rooted at `block`.
    fn check_subtree(engine: &mut Engine, block: BlockIdT, expected_parent: BlockIdT) {
        let header = BlockBuffer::new(block).get_header(&mut engine.pool).unwrap();
        assert_eq!(header.pblock, expected_parent, "block {}", block);

        if engine.pool.block_type(block).unwrap() != BLOCK_IND_INTERNAL {
            return;
        }

        let internal = InternalBlock::new(block);
        let mut prev: Option<InternalEntry> = None;
        for i in 0..header.num_entries {
            let entry = internal
                .get_entry(&mut engine.pool, i, AttrType::Number)
                .unwrap();
            if let Some(prev) = &prev {
                assert_eq!(prev.rchild, entry.lchild);
                assert!(
                    compare_attrs(&prev.attr_val, &entry.attr_val) != Ordering::Greater,
                    "separators out of order in block {}",
                    block
                );
            }
            check_subtree(engine, entry.lchild, block);
            prev = Some(entry);
        }
        check_subtree(engine, prev.unwrap().rchild, block);
    }

    #[test]
    fn test_insert_and_search_single_leaf() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        for n in 0..10 {
            insert_number(&mut engine, (n * 3) % 10);
        }

        let root = root_of(&engine, rel_id);
        assert_eq!(engine.pool.block_type(root).unwrap(), BLOCK_IND_LEAF);

        let (keys, leaves) = leaf_chain_keys(&mut engine, root);
        assert_eq!(leaves, 1);
        let expected: Vec<f64> = (0..10).map(|n| n as f64).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_64th_key_splits_leaf() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        for n in 0..64 {
            insert_number(&mut engine, n);
        }

        // The root must now be a one-entry internal block whose separator is
        // the left leaf's largest key.
        let root = root_of(&engine, rel_id);
        assert_eq!(engine.pool.block_type(root).unwrap(), BLOCK_IND_INTERNAL);

        let internal = InternalBlock::new(root);
        let root_header = internal.get_header(&mut engine.pool).unwrap();
        assert_eq!(root_header.num_entries, 1);

        let entry = internal
            .get_entry(&mut engine.pool, 0, AttrType::Number)
            .unwrap();
        assert_eq!(entry.attr_val, AttrValue::Number(31.0));

        // Both halves hold 32 entries, link to each other, and point back at
        // the root.
        let left = LeafBlock::new(entry.lchild);
        let right = LeafBlock::new(entry.rchild);
        let lheader = left.get_header(&mut engine.pool).unwrap();
        let rheader = right.get_header(&mut engine.pool).unwrap();
        assert_eq!(lheader.num_entries, 32);
        assert_eq!(rheader.num_entries, 32);
        assert_eq!(lheader.rblock, entry.rchild);
        assert_eq!(rheader.lblock, entry.lchild);
        assert_eq!(rheader.rblock, -1);
        assert_eq!(lheader.pblock, root);
        assert_eq!(rheader.pblock, root);

        let (keys, leaves) = leaf_chain_keys(&mut engine, root);
        assert_eq!(leaves, 2);
        let expected: Vec<f64> = (0..64).map(|n| n as f64).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_search_enumerates_matches_and_resumes() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        for n in 0..100 {
            insert_number(&mut engine, n);
        }

        // GE 90 yields exactly the ten largest keys, one per call.
        engine.cache.reset_attr_search_index(rel_id, "a").unwrap();
        let mut found = Vec::new();
        let val = AttrValue::Number(90.0);
        while let Some(rec_id) =
            bplus_search(&mut engine.pool, &mut engine.cache, rel_id, "a", &val, Op::Ge).unwrap()
        {
            found.push(rec_id);
        }
        assert_eq!(found.len(), 10);

        // EQ on a missing key finds nothing.
        engine.cache.reset_attr_search_index(rel_id, "a").unwrap();
        let val = AttrValue::Number(1000.0);
        assert!(
            bplus_search(&mut engine.pool, &mut engine.cache, rel_id, "a", &val, Op::Eq)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_ne_search_traverses_every_leaf() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        for n in 0..150 {
            insert_number(&mut engine, n);
        }

        let root = root_of(&engine, rel_id);
        let (_, leaves) = leaf_chain_keys(&mut engine, root);
        assert!(leaves > 1);

        // NE must walk the whole chain and skip only the excluded key.
        engine.cache.reset_attr_search_index(rel_id, "a").unwrap();
        let val = AttrValue::Number(5.0);
        let mut count = 0;
        while bplus_search(&mut engine.pool, &mut engine.cache, rel_id, "a", &val, Op::Ne)
            .unwrap()
            .is_some()
        {
            count += 1;
        }
        assert_eq!(count, 149);
    }

    #[test]
    fn test_duplicate_keys_are_all_found() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        // 90 duplicates of one key spread across a split, with filler on
        // both sides.
        for n in 0..30 {
            insert_number(&mut engine, n);
        }
        for _ in 0..90 {
            insert_number(&mut engine, 50);
        }
        for n in 60..90 {
            insert_number(&mut engine, n);
        }

        engine.cache.reset_attr_search_index(rel_id, "a").unwrap();
        let val = AttrValue::Number(50.0);
        let mut count = 0;
        while bplus_search(&mut engine.pool, &mut engine.cache, rel_id, "a", &val, Op::Eq)
            .unwrap()
            .is_some()
        {
            count += 1;
        }
        assert_eq!(count, 90);
    }

    #[test]
    fn test_three_level_tree_has_consistent_parents() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        // Enough ascending keys to split the root internal block itself.
        let n = 3300;
        for k in 0..n {
            insert_number(&mut engine, k);
        }

        let root = root_of(&engine, rel_id);
        assert_eq!(engine.pool.block_type(root).unwrap(), BLOCK_IND_INTERNAL);

        // The root's first child must itself be internal (three levels).
        let first_child = InternalBlock::new(root)
            .get_entry(&mut engine.pool, 0, AttrType::Number)
            .unwrap()
            .lchild;
        assert_eq!(
            engine.pool.block_type(first_child).unwrap(),
            BLOCK_IND_INTERNAL
        );

        check_subtree(&mut engine, root, -1);

        let (keys, _) = leaf_chain_keys(&mut engine, root);
        assert_eq!(keys.len(), n as usize);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(*key, i as f64);
        }
    }

    #[test]
    fn test_recreate_index_yields_same_leaf_entries() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        for n in 0..100 {
            insert_number(&mut engine, (n * 37) % 100);
        }

        let root = root_of(&engine, rel_id);
        let (mut before, _) = leaf_chain_keys(&mut engine, root);

        engine.drop_index("T", "a").unwrap();
        assert_eq!(root_of(&engine, rel_id), -1);

        engine.create_index("T", "a").unwrap();
        let root = root_of(&engine, rel_id);
        let (mut after, _) = leaf_chain_keys(&mut engine, root);

        before.sort_by(|a, b| a.total_cmp(b));
        after.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(before, after);
    }

    #[test]
    fn test_drop_index_releases_every_index_block() {
        let (_dir, mut engine) = setup();
        setup_indexed_table(&mut engine);

        for n in 0..500 {
            insert_number(&mut engine, n);
        }
        engine.drop_index("T", "a").unwrap();

        for block in 0..crate::common::DISK_BLOCKS as BlockIdT {
            let block_type = engine.pool.block_type(block).unwrap();
            assert_ne!(block_type, BLOCK_IND_LEAF);
            assert_ne!(block_type, BLOCK_IND_INTERNAL);
        }
    }

    #[test]
    fn test_disk_full_insert_releases_index_and_keeps_record() {
        let (_dir, mut engine) = setup();
        let rel_id = setup_indexed_table(&mut engine);

        // Fill the leaf to capacity, then exhaust the disk so the split
        // cannot allocate.
        for n in 0..63 {
            insert_number(&mut engine, n);
        }
        while engine.pool.alloc_block(BLOCK_REC).is_ok() {}

        let result = engine.insert_into("T", &["63".to_string()]);
        assert!(matches!(result, Err(ErrorCode::IndexBlocksReleased)));

        // The tree is gone but the record made it in.
        assert_eq!(root_of(&engine, rel_id), -1);
        assert_eq!(engine.rows("T").unwrap().len(), 64);
    }

    #[test]
    fn test_create_index_forbidden_for_catalogs() {
        let (_dir, mut engine) = setup();
        let result = bplus_create(
            &mut engine.pool,
            &mut engine.cache,
            crate::common::RELCAT_RELID,
            "RelName",
        );
        assert!(matches!(result, Err(ErrorCode::NotPermitted)));
    }

    #[test]
    fn test_destroy_rejects_non_index_block() {
        let (_dir, mut engine) = setup();
        let result = bplus_destroy(&mut engine.pool, crate::common::RELCAT_BLOCK);
        assert!(matches!(result, Err(ErrorCode::InvalidBlock)));
    }
}
