/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::common::io::{read_f64, read_str, write_f64, write_str};
use crate::common::ATTR_SIZE;
use crate::error::{ErrorCode, Result};

use std::cmp::Ordering;

/// Internal data types for attribute values. Every value occupies a
/// fixed-width cell of `ATTR_SIZE` bytes on disk: numbers are stored as a
/// 64-bit float in the first eight bytes, strings as NUL-padded bytes with at
/// most `ATTR_SIZE - 1` significant characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Number,
    String,
}

impl AttrType {
    /// The type code stored in the attribute catalog.
    pub fn code(&self) -> i32 {
        match self {
            AttrType::Number => 0,
            AttrType::String => 1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(AttrType::Number),
            1 => Ok(AttrType::String),
            _ => Err(ErrorCode::InvalidBlock),
        }
    }
}

/// A single attribute value of a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Number(f64),
    String(String),
}

/// A tuple is a sequence of attribute values in attribute-offset order.
pub type Record = Vec<AttrValue>;

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Number(_) => AttrType::Number,
            AttrValue::String(_) => AttrType::String,
        }
    }

    /// Return the contained number, or fail if this is a string value.
    pub fn number(&self) -> Result<f64> {
        match self {
            AttrValue::Number(n) => Ok(*n),
            AttrValue::String(_) => Err(ErrorCode::AttrTypeMismatch),
        }
    }

    /// Return the contained string, or fail if this is a number value.
    pub fn text(&self) -> Result<&str> {
        match self {
            AttrValue::String(s) => Ok(s),
            AttrValue::Number(_) => Err(ErrorCode::AttrTypeMismatch),
        }
    }

    /// Serialize this value into a fixed-width attribute cell.
    pub fn encode(&self, cell: &mut [u8]) -> Result<()> {
        match self {
            AttrValue::Number(n) => {
                write_f64(cell, 0, *n)?;
                for b in cell[8..ATTR_SIZE].iter_mut() {
                    *b = 0;
                }
            }
            AttrValue::String(s) => {
                if s.as_bytes().len() > ATTR_SIZE - 1 {
                    return Err(ErrorCode::OutOfBound);
                }
                write_str(cell, 0, ATTR_SIZE, s)?;
            }
        }
        Ok(())
    }

    /// Deserialize a fixed-width attribute cell according to the attribute's
    /// declared type.
    pub fn decode(cell: &[u8], attr_type: AttrType) -> Result<Self> {
        match attr_type {
            AttrType::Number => Ok(AttrValue::Number(read_f64(cell, 0)?)),
            AttrType::String => Ok(AttrValue::String(read_str(cell, 0, ATTR_SIZE)?)),
        }
    }

    /// Convert a user-supplied string into a value of the attribute's
    /// declared type. Numbers accept anything the decimal float parser does;
    /// anything else is a type mismatch.
    pub fn parse(input: &str, attr_type: AttrType) -> Result<Self> {
        match attr_type {
            AttrType::Number => match input.trim().parse::<f64>() {
                Ok(n) => Ok(AttrValue::Number(n)),
                Err(_) => Err(ErrorCode::AttrTypeMismatch),
            },
            AttrType::String => {
                if input.as_bytes().len() > ATTR_SIZE - 1 {
                    return Err(ErrorCode::OutOfBound);
                }
                Ok(AttrValue::String(input.to_string()))
            }
        }
    }
}

/// Compare two attribute values of the same type: the sign of `a - b` for
/// numbers, byte-wise comparison of the padded strings otherwise.
pub fn compare_attrs(a: &AttrValue, b: &AttrValue) -> Ordering {
    match (a, b) {
        (AttrValue::Number(x), AttrValue::Number(y)) => x.total_cmp(y),
        (AttrValue::String(x), AttrValue::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        // Values of different types never compare equal; order them by type
        // code to keep the comparison total.
        _ => a.attr_type().code().cmp(&b.attr_type().code()),
    }
}
