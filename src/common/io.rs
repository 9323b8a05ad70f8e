/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::error::ErrorCode;

/// Utility functions for reading and writing byte arrays.

/// Read a signed 32-bit integer at the specified offset in the byte array.
#[inline]
pub fn read_i32(array: &[u8], offset: usize) -> Result<i32, ErrorCode> {
    if offset + 4 > array.len() {
        return Err(ErrorCode::OutOfBound);
    }
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&array[offset..offset + 4]);
    Ok(i32::from_le_bytes(bytes))
}

/// Write a signed 32-bit integer at the specified offset in the byte array.
/// Any existing value is overwritten.
#[inline]
pub fn write_i32(array: &mut [u8], offset: usize, value: i32) -> Result<(), ErrorCode> {
    if offset + 4 > array.len() {
        return Err(ErrorCode::OutOfBound);
    }
    array[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read a 64-bit float at the specified offset in the byte array.
#[inline]
pub fn read_f64(array: &[u8], offset: usize) -> Result<f64, ErrorCode> {
    if offset + 8 > array.len() {
        return Err(ErrorCode::OutOfBound);
    }
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&array[offset..offset + 8]);
    Ok(f64::from_le_bytes(bytes))
}

/// Write a 64-bit float at the specified offset in the byte array. Any
/// existing value is overwritten.
#[inline]
pub fn write_f64(array: &mut [u8], offset: usize, value: f64) -> Result<(), ErrorCode> {
    if offset + 8 > array.len() {
        return Err(ErrorCode::OutOfBound);
    }
    array[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read a NUL-padded string of at most `length` bytes at the specified offset
/// in the byte array. It is assumed that the string is encoded as valid UTF-8.
#[inline]
pub fn read_str(array: &[u8], offset: usize, length: usize) -> Result<String, ErrorCode> {
    if offset + length > array.len() {
        return Err(ErrorCode::OutOfBound);
    }

    // Scan from the right and find where the NUL padding ends.
    let mut trim_idx = offset;
    for i in (offset..offset + length).rev() {
        if array[i] != 0 {
            trim_idx = i + 1;
            break;
        }
    }

    match String::from_utf8(Vec::from(&array[offset..trim_idx])) {
        Ok(s) => Ok(s),
        Err(_) => Err(ErrorCode::InvalidBlock),
    }
}

/// Write a string as at most `length` NUL-padded bytes at the specified offset
/// in the byte array. Any existing value is overwritten. Strings longer than
/// `length` bytes are rejected.
#[inline]
pub fn write_str(
    array: &mut [u8],
    offset: usize,
    length: usize,
    string: &str,
) -> Result<(), ErrorCode> {
    if offset + length > array.len() {
        return Err(ErrorCode::OutOfBound);
    }
    let bytes = string.as_bytes();
    if bytes.len() > length {
        return Err(ErrorCode::OutOfBound);
    }
    array[offset..offset + bytes.len()].copy_from_slice(bytes);
    for i in offset + bytes.len()..offset + length {
        array[i] = 0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BLOCK_SIZE;

    #[test]
    fn test_read_write_i32() {
        let mut array = [0; BLOCK_SIZE];

        // Serialize value into byte array with function.
        let expected: i32 = -31415926;
        let offset = 21;
        write_i32(&mut array, offset, expected).unwrap();

        // Assert that serialized bytes are correct.
        let bytes = expected.to_le_bytes();
        for i in 0..bytes.len() {
            assert_eq!(array[offset + i], bytes[i]);
        }

        // Assert that read value is correct.
        let actual = read_i32(&array, offset).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_i32_overflow() {
        let mut array = [1; BLOCK_SIZE];

        // Assert that access is successful with no overflow.
        assert!(read_i32(&array, BLOCK_SIZE - 4).is_ok());
        assert!(write_i32(&mut array, BLOCK_SIZE - 4, 7).is_ok());

        // Assert that access fails with an overflow.
        assert!(read_i32(&array, BLOCK_SIZE - 3).is_err());
        assert!(write_i32(&mut array, BLOCK_SIZE - 3, 7).is_err());
    }

    #[test]
    fn test_read_write_f64() {
        let mut array = [0; BLOCK_SIZE];

        let expected = 3.1415926;
        let offset = 1262;
        write_f64(&mut array, offset, expected).unwrap();

        let actual = read_f64(&array, offset).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_read_write_str() {
        let mut array = [0; BLOCK_SIZE];

        let expected = "Hello, World!".to_string();
        let offset = 712;
        write_str(&mut array, offset, 16, &expected).unwrap();

        let actual = read_str(&array, offset, 16).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_write_str_clears_padding() {
        let mut array = [0xff; BLOCK_SIZE];

        let offset = 96;
        write_str(&mut array, offset, 16, "ab").unwrap();

        // The two content bytes are followed by NUL padding up to the cell
        // width.
        assert_eq!(&array[offset..offset + 2], b"ab");
        for i in offset + 2..offset + 16 {
            assert_eq!(array[i], 0);
        }
    }

    #[test]
    fn test_write_str_too_long() {
        let mut array = [0; BLOCK_SIZE];
        let offset = 712;
        let long = "exactly16bytes!!";
        let ok = "a15bytestring..";

        assert!(write_str(&mut array, offset, 16, ok).is_ok());
        assert!(write_str(&mut array, offset, 15, long).is_err());
    }
}
