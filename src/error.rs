/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use thiserror::Error;

/// The stable set of outcome codes returned by every fallible engine
/// operation. Success is expressed as `Ok`, everything else as one of the
/// variants below.
#[derive(Debug, Error)]
pub enum ErrorCode {
    /// A block number or slot index was outside its valid range.
    #[error("index out of bounds")]
    OutOfBound,

    /// No free block is left on the disk.
    #[error("disk is full")]
    DiskFull,

    /// No free slot is left in the open relation table.
    #[error("open relation table is full")]
    CacheFull,

    /// The requested block is not resident in the buffer pool.
    #[error("block is not present in the buffer")]
    BlockNotInBuffer,

    /// A search was exhausted without a match.
    #[error("no record satisfies the condition")]
    NotFound,

    /// The relation has no entry in the open relation table.
    #[error("relation is not open")]
    RelNotOpen,

    /// No relation with the given name exists in the relation catalog.
    #[error("relation does not exist")]
    RelNotExist,

    /// A relation with the given name already exists.
    #[error("relation already exists")]
    RelExist,

    /// The relation has no attribute with the given name.
    #[error("attribute does not exist")]
    AttrNotExist,

    /// The relation already has an attribute with the given name.
    #[error("attribute already exists")]
    AttrExist,

    /// A value could not be converted to the attribute's declared type.
    #[error("attribute type mismatch")]
    AttrTypeMismatch,

    /// The number of supplied values does not match the relation's arity.
    #[error("mismatch in number of attributes")]
    NAttrMismatch,

    /// Two attributes share a name where they must not.
    #[error("duplicate attribute name")]
    DuplicateAttr,

    /// The operation is forbidden on its target (e.g. mutating the catalogs).
    #[error("operation not permitted")]
    NotPermitted,

    /// The attribute has no B+ tree index.
    #[error("no index exists for the attribute")]
    NoIndex,

    /// The record was inserted, but the disk filled up while maintaining an
    /// index; that attribute's B+ tree has been destroyed and its root block
    /// cleared.
    #[error("record inserted, but index blocks were released")]
    IndexBlocksReleased,

    /// The relation catalog is full; no further relations can be created.
    #[error("maximum number of relations reached")]
    MaxRelations,

    /// A block's contents do not match its expected role.
    #[error("invalid block")]
    InvalidBlock,

    /// An error propagated from the underlying block device.
    #[error("disk i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ErrorCode>;
