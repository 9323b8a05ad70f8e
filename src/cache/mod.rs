/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::access;
use crate::block::RecBlock;
use crate::buffer::BufferPool;
use crate::common::{
    BlockIdT, IndexId, Op, RecId, RelIdT, ATTRCAT_BLOCK, ATTRCAT_RELID, MAX_OPEN, RELCAT_BLOCK,
    RELCAT_RELID,
};
use crate::error::{ErrorCode, Result};
use crate::relation::{AttrType, AttrValue, Record};

use log::debug;

/// Names of the two system relations.
pub const RELCAT_NAME: &str = "RELATIONCAT";
pub const ATTRCAT_NAME: &str = "ATTRIBUTECAT";

/// Catalog arity and well-known bootstrap slots: RelCat's own row sits in
/// slot 0 of the relation catalog, AttrCat's in slot 1, and the first twelve
/// slots of the attribute catalog describe the catalogs' columns.
pub const RELCAT_NO_ATTRS: usize = 6;
pub const ATTRCAT_NO_ATTRS: usize = 6;
pub const RELCAT_SLOT_FOR_RELCAT: i32 = 0;
pub const RELCAT_SLOT_FOR_ATTRCAT: i32 = 1;

/// The attribute both catalogs are searched by.
pub const ATTR_RELNAME: &str = "RelName";

pub const RELCAT_ATTR_NAMES: [&str; RELCAT_NO_ATTRS] = [
    "RelName",
    "#Attributes",
    "#Records",
    "FirstBlock",
    "LastBlock",
    "#Slots",
];
pub const RELCAT_ATTR_TYPES: [AttrType; RELCAT_NO_ATTRS] = [
    AttrType::String,
    AttrType::Number,
    AttrType::Number,
    AttrType::Number,
    AttrType::Number,
    AttrType::Number,
];

pub const ATTRCAT_ATTR_NAMES: [&str; ATTRCAT_NO_ATTRS] = [
    "RelName",
    "AttributeName",
    "AttributeType",
    "PrimaryFlag",
    "RootBlock",
    "Offset",
];
pub const ATTRCAT_ATTR_TYPES: [AttrType; ATTRCAT_NO_ATTRS] = [
    AttrType::String,
    AttrType::String,
    AttrType::Number,
    AttrType::Number,
    AttrType::Number,
    AttrType::Number,
];

/// A parsed relation catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct RelCatEntry {
    pub rel_name: String,
    pub num_attrs: i32,
    pub num_recs: i32,
    pub first_blk: BlockIdT,
    pub last_blk: BlockIdT,
    pub num_slots_per_blk: i32,
}

impl RelCatEntry {
    pub fn from_record(record: &[AttrValue]) -> Result<Self> {
        if record.len() != RELCAT_NO_ATTRS {
            return Err(ErrorCode::NAttrMismatch);
        }
        Ok(Self {
            rel_name: record[0].text()?.to_string(),
            num_attrs: record[1].number()? as i32,
            num_recs: record[2].number()? as i32,
            first_blk: record[3].number()? as BlockIdT,
            last_blk: record[4].number()? as BlockIdT,
            num_slots_per_blk: record[5].number()? as i32,
        })
    }

    pub fn to_record(&self) -> Record {
        vec![
            AttrValue::String(self.rel_name.clone()),
            AttrValue::Number(self.num_attrs as f64),
            AttrValue::Number(self.num_recs as f64),
            AttrValue::Number(self.first_blk as f64),
            AttrValue::Number(self.last_blk as f64),
            AttrValue::Number(self.num_slots_per_blk as f64),
        ]
    }
}

/// A parsed attribute catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrCatEntry {
    pub rel_name: String,
    pub attr_name: String,
    pub attr_type: AttrType,
    pub primary_flag: i32,
    pub root_block: BlockIdT,
    pub offset: i32,
}

impl AttrCatEntry {
    pub fn from_record(record: &[AttrValue]) -> Result<Self> {
        if record.len() != ATTRCAT_NO_ATTRS {
            return Err(ErrorCode::NAttrMismatch);
        }
        Ok(Self {
            rel_name: record[0].text()?.to_string(),
            attr_name: record[1].text()?.to_string(),
            attr_type: AttrType::from_code(record[2].number()? as i32)?,
            primary_flag: record[3].number()? as i32,
            root_block: record[4].number()? as BlockIdT,
            offset: record[5].number()? as i32,
        })
    }

    pub fn to_record(&self) -> Record {
        vec![
            AttrValue::String(self.rel_name.clone()),
            AttrValue::String(self.attr_name.clone()),
            AttrValue::Number(self.attr_type.code() as f64),
            AttrValue::Number(self.primary_flag as f64),
            AttrValue::Number(self.root_block as f64),
            AttrValue::Number(self.offset as f64),
        ]
    }
}

/// A resident relation catalog row plus the cursors that belong to the
/// relation.
struct RelCacheEntry {
    entry: RelCatEntry,

    /// Where the row was loaded from, for write-back.
    rec_id: RecId,

    /// True if the cached row diverges from the row on disk.
    dirty: bool,

    /// Cursor of the relation-level linear search.
    search_index: RecId,

    /// Cursor of the relation-level projection scan, independent of
    /// `search_index`.
    project_index: RecId,
}

/// A resident attribute catalog row plus the attribute's B+ tree cursor.
struct AttrCacheEntry {
    entry: AttrCatEntry,
    rec_id: RecId,
    dirty: bool,

    /// Cursor of the attribute's B+ tree search.
    search_index: IndexId,
}

/// One open relation: its relation catalog row and its attribute catalog
/// rows in attribute-offset order.
struct OpenRelation {
    rel: RelCacheEntry,
    attrs: Vec<AttrCacheEntry>,
}

/// The open relation table keeps metadata for open relations resident,
/// mirroring their catalog records. Slot 0 is reserved for the relation
/// catalog and slot 1 for the attribute catalog; both are populated at
/// startup from well-known records and stay open for the engine's lifetime.
pub struct OpenRelTable {
    slots: Vec<Option<OpenRelation>>,
}

impl OpenRelTable {
    /// Construct the table and load the catalog relations from their
    /// well-known bootstrap slots.
    pub fn new(pool: &mut BufferPool) -> Result<Self> {
        let mut slots: Vec<Option<OpenRelation>> = Vec::with_capacity(MAX_OPEN);
        for _ in 0..MAX_OPEN {
            slots.push(None);
        }

        let relcat_block = RecBlock::new(RELCAT_BLOCK);
        let attrcat_block = RecBlock::new(ATTRCAT_BLOCK);

        // The relation catalog's own row and the rows describing its columns.
        let record = relcat_block.get_record(pool, RELCAT_SLOT_FOR_RELCAT, &RELCAT_ATTR_TYPES)?;
        let mut attrs = Vec::with_capacity(RELCAT_NO_ATTRS);
        for i in 0..RELCAT_NO_ATTRS as i32 {
            let record = attrcat_block.get_record(pool, i, &ATTRCAT_ATTR_TYPES)?;
            attrs.push(AttrCacheEntry {
                entry: AttrCatEntry::from_record(&record)?,
                rec_id: RecId::new(ATTRCAT_BLOCK, i),
                dirty: false,
                search_index: IndexId::INVALID,
            });
        }
        slots[RELCAT_RELID] = Some(OpenRelation {
            rel: RelCacheEntry {
                entry: RelCatEntry::from_record(&record)?,
                rec_id: RecId::new(RELCAT_BLOCK, RELCAT_SLOT_FOR_RELCAT),
                dirty: false,
                search_index: RecId::INVALID,
                project_index: RecId::INVALID,
            },
            attrs,
        });

        // The attribute catalog's own row and its column rows.
        let record = relcat_block.get_record(pool, RELCAT_SLOT_FOR_ATTRCAT, &RELCAT_ATTR_TYPES)?;
        let mut attrs = Vec::with_capacity(ATTRCAT_NO_ATTRS);
        for i in 0..ATTRCAT_NO_ATTRS as i32 {
            let slot = RELCAT_NO_ATTRS as i32 + i;
            let record = attrcat_block.get_record(pool, slot, &ATTRCAT_ATTR_TYPES)?;
            attrs.push(AttrCacheEntry {
                entry: AttrCatEntry::from_record(&record)?,
                rec_id: RecId::new(ATTRCAT_BLOCK, slot),
                dirty: false,
                search_index: IndexId::INVALID,
            });
        }
        slots[ATTRCAT_RELID] = Some(OpenRelation {
            rel: RelCacheEntry {
                entry: RelCatEntry::from_record(&record)?,
                rec_id: RecId::new(RELCAT_BLOCK, RELCAT_SLOT_FOR_ATTRCAT),
                dirty: false,
                search_index: RecId::INVALID,
                project_index: RecId::INVALID,
            },
            attrs,
        });

        Ok(Self { slots })
    }

    /// Return the id under which the named relation is open, if any.
    pub fn rel_id(&self, rel_name: &str) -> Option<RelIdT> {
        self.slots.iter().position(|slot| match slot {
            Some(open) => open.rel.entry.rel_name == rel_name,
            None => false,
        })
    }

    /// Open the named relation: return its existing id if it is already
    /// open, otherwise claim a free slot and load its catalog rows.
    pub fn open_rel(&mut self, pool: &mut BufferPool, rel_name: &str) -> Result<RelIdT> {
        if let Some(rel_id) = self.rel_id(rel_name) {
            return Ok(rel_id);
        }

        let rel_id = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(id) => id,
            None => return Err(ErrorCode::CacheFull),
        };

        // Locate the relation's row in the relation catalog.
        let name_val = AttrValue::String(rel_name.to_string());
        self.reset_search_index(RELCAT_RELID)?;
        let rel_rec_id =
            match access::linear_search(pool, self, RELCAT_RELID, ATTR_RELNAME, &name_val, Op::Eq)? {
                Some(rec_id) => rec_id,
                None => return Err(ErrorCode::RelNotExist),
            };
        let record =
            RecBlock::new(rel_rec_id.block).get_record(pool, rel_rec_id.slot, &RELCAT_ATTR_TYPES)?;
        let rel_entry = RelCatEntry::from_record(&record)?;

        // Collect the relation's attribute rows in scan order.
        let mut attrs = Vec::with_capacity(rel_entry.num_attrs as usize);
        self.reset_search_index(ATTRCAT_RELID)?;
        loop {
            let attr_rec_id = match access::linear_search(
                pool,
                self,
                ATTRCAT_RELID,
                ATTR_RELNAME,
                &name_val,
                Op::Eq,
            )? {
                Some(rec_id) => rec_id,
                None => break,
            };
            let record = RecBlock::new(attr_rec_id.block).get_record(
                pool,
                attr_rec_id.slot,
                &ATTRCAT_ATTR_TYPES,
            )?;
            attrs.push(AttrCacheEntry {
                entry: AttrCatEntry::from_record(&record)?,
                rec_id: attr_rec_id,
                dirty: false,
                search_index: IndexId::INVALID,
            });
        }

        debug!("opened relation {} as rel-id {}", rel_name, rel_id);
        self.slots[rel_id] = Some(OpenRelation {
            rel: RelCacheEntry {
                entry: rel_entry,
                rec_id: rel_rec_id,
                dirty: false,
                search_index: RecId::INVALID,
                project_index: RecId::INVALID,
            },
            attrs,
        });
        Ok(rel_id)
    }

    /// Close an open relation, writing any mutated catalog rows back at
    /// their stored record ids. Closing the catalogs is forbidden.
    pub fn close_rel(&mut self, pool: &mut BufferPool, rel_id: RelIdT) -> Result<()> {
        if rel_id == RELCAT_RELID || rel_id == ATTRCAT_RELID {
            return Err(ErrorCode::NotPermitted);
        }
        if rel_id >= MAX_OPEN {
            return Err(ErrorCode::OutOfBound);
        }
        if self.slots[rel_id].is_none() {
            return Err(ErrorCode::RelNotOpen);
        }

        self.flush_entry(pool, rel_id)?;
        debug!("closed rel-id {}", rel_id);
        self.slots[rel_id] = None;
        Ok(())
    }

    /// Close every user relation, then flush the catalog slots.
    pub fn shutdown(&mut self, pool: &mut BufferPool) -> Result<()> {
        for rel_id in 2..MAX_OPEN {
            if self.slots[rel_id].is_some() {
                self.close_rel(pool, rel_id)?;
            }
        }
        self.flush_entry(pool, RELCAT_RELID)?;
        self.flush_entry(pool, ATTRCAT_RELID)?;
        Ok(())
    }

    /// Write the dirty rows of one open relation back to the catalogs.
    fn flush_entry(&mut self, pool: &mut BufferPool, rel_id: RelIdT) -> Result<()> {
        let open = match self.slots[rel_id].as_mut() {
            Some(open) => open,
            None => return Err(ErrorCode::RelNotOpen),
        };

        if open.rel.dirty {
            let rec_id = open.rel.rec_id;
            RecBlock::new(rec_id.block).set_record(pool, rec_id.slot, &open.rel.entry.to_record())?;
            open.rel.dirty = false;
        }
        for attr in open.attrs.iter_mut() {
            if attr.dirty {
                let rec_id = attr.rec_id;
                RecBlock::new(rec_id.block).set_record(pool, rec_id.slot, &attr.entry.to_record())?;
                attr.dirty = false;
            }
        }
        Ok(())
    }

    /// Read the cached relation catalog row.
    pub fn rel_cat(&self, rel_id: RelIdT) -> Result<RelCatEntry> {
        Ok(self.open_slot(rel_id)?.rel.entry.clone())
    }

    /// Replace the cached relation catalog row and flag it dirty.
    pub fn set_rel_cat(&mut self, rel_id: RelIdT, entry: RelCatEntry) -> Result<()> {
        let open = self.open_slot_mut(rel_id)?;
        open.rel.entry = entry;
        open.rel.dirty = true;
        Ok(())
    }

    /// Read the cached attribute catalog row at the given attribute offset.
    pub fn attr_cat_by_offset(&self, rel_id: RelIdT, offset: i32) -> Result<AttrCatEntry> {
        let open = self.open_slot(rel_id)?;
        for attr in open.attrs.iter() {
            if attr.entry.offset == offset {
                return Ok(attr.entry.clone());
            }
        }
        Err(ErrorCode::AttrNotExist)
    }

    /// Read the cached attribute catalog row with the given attribute name.
    pub fn attr_cat_by_name(&self, rel_id: RelIdT, attr_name: &str) -> Result<AttrCatEntry> {
        let open = self.open_slot(rel_id)?;
        for attr in open.attrs.iter() {
            if attr.entry.attr_name == attr_name {
                return Ok(attr.entry.clone());
            }
        }
        Err(ErrorCode::AttrNotExist)
    }

    /// Replace the cached attribute catalog row with the given attribute
    /// name and flag it dirty.
    pub fn set_attr_cat(&mut self, rel_id: RelIdT, attr_name: &str, entry: AttrCatEntry) -> Result<()> {
        let open = self.open_slot_mut(rel_id)?;
        for attr in open.attrs.iter_mut() {
            if attr.entry.attr_name == attr_name {
                attr.entry = entry;
                attr.dirty = true;
                return Ok(());
            }
        }
        Err(ErrorCode::AttrNotExist)
    }

    /// The relation's attribute types in attribute-offset order.
    pub fn attr_types(&self, rel_id: RelIdT) -> Result<Vec<AttrType>> {
        let open = self.open_slot(rel_id)?;
        let mut types = vec![AttrType::Number; open.attrs.len()];
        for attr in open.attrs.iter() {
            let offset = attr.entry.offset as usize;
            if offset >= types.len() {
                return Err(ErrorCode::InvalidBlock);
            }
            types[offset] = attr.entry.attr_type;
        }
        Ok(types)
    }

    pub fn search_index(&self, rel_id: RelIdT) -> Result<RecId> {
        Ok(self.open_slot(rel_id)?.rel.search_index)
    }

    pub fn set_search_index(&mut self, rel_id: RelIdT, rec_id: RecId) -> Result<()> {
        self.open_slot_mut(rel_id)?.rel.search_index = rec_id;
        Ok(())
    }

    pub fn reset_search_index(&mut self, rel_id: RelIdT) -> Result<()> {
        self.set_search_index(rel_id, RecId::INVALID)
    }

    pub fn project_index(&self, rel_id: RelIdT) -> Result<RecId> {
        Ok(self.open_slot(rel_id)?.rel.project_index)
    }

    pub fn set_project_index(&mut self, rel_id: RelIdT, rec_id: RecId) -> Result<()> {
        self.open_slot_mut(rel_id)?.rel.project_index = rec_id;
        Ok(())
    }

    pub fn reset_project_index(&mut self, rel_id: RelIdT) -> Result<()> {
        self.set_project_index(rel_id, RecId::INVALID)
    }

    pub fn attr_search_index(&self, rel_id: RelIdT, attr_name: &str) -> Result<IndexId> {
        let open = self.open_slot(rel_id)?;
        for attr in open.attrs.iter() {
            if attr.entry.attr_name == attr_name {
                return Ok(attr.search_index);
            }
        }
        Err(ErrorCode::AttrNotExist)
    }

    pub fn set_attr_search_index(
        &mut self,
        rel_id: RelIdT,
        attr_name: &str,
        index_id: IndexId,
    ) -> Result<()> {
        let open = self.open_slot_mut(rel_id)?;
        for attr in open.attrs.iter_mut() {
            if attr.entry.attr_name == attr_name {
                attr.search_index = index_id;
                return Ok(());
            }
        }
        Err(ErrorCode::AttrNotExist)
    }

    pub fn reset_attr_search_index(&mut self, rel_id: RelIdT, attr_name: &str) -> Result<()> {
        self.set_attr_search_index(rel_id, attr_name, IndexId::INVALID)
    }

    fn open_slot(&self, rel_id: RelIdT) -> Result<&OpenRelation> {
        if rel_id >= MAX_OPEN {
            return Err(ErrorCode::OutOfBound);
        }
        self.slots[rel_id].as_ref().ok_or(ErrorCode::RelNotOpen)
    }

    fn open_slot_mut(&mut self, rel_id: RelIdT) -> Result<&mut OpenRelation> {
        if rel_id >= MAX_OPEN {
            return Err(ErrorCode::OutOfBound);
        }
        self.slots[rel_id].as_mut().ok_or(ErrorCode::RelNotOpen)
    }
}
