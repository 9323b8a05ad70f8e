/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::common::{BlockIdT, BLOCK_SIZE, DISK_BLOCKS};
use crate::error::{ErrorCode, Result};

use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::Path;

/// The disk manager is responsible for reading and writing fixed-size blocks
/// of the single database file. The file's address space is a fixed array of
/// `DISK_BLOCKS` blocks of `BLOCK_SIZE` bytes each, addressed by non-negative
/// block numbers.
pub struct DiskManager {
    file: File,
}

impl DiskManager {
    /// Open the database file, creating and zero-filling it if it does not
    /// exist yet. Returns the manager and whether the file was newly created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let exists = path.as_ref().exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if !exists {
            // Zero-fill the entire address space so that every block can be
            // read before its first write.
            let zeros = [0u8; BLOCK_SIZE];
            file.seek(SeekFrom::Start(0))?;
            for _ in 0..DISK_BLOCKS {
                file.write_all(&zeros)?;
            }
            file.flush()?;
        }

        Ok((Self { file }, !exists))
    }

    /// Read a single block's data into the specified byte array.
    pub fn read_block(&mut self, block_num: BlockIdT, data: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let offset = Self::block_offset(block_num)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(data)?;
        Ok(())
    }

    /// Write the specified byte array out to disk.
    pub fn write_block(&mut self, block_num: BlockIdT, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        let offset = Self::block_offset(block_num)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Translate a block number into a byte offset in the database file.
    fn block_offset(block_num: BlockIdT) -> Result<u64> {
        if block_num < 0 || block_num as usize >= DISK_BLOCKS {
            return Err(ErrorCode::OutOfBound);
        }
        Ok(block_num as u64 * BLOCK_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiskManager) {
        let dir = TempDir::new().unwrap();
        let (manager, created) = DiskManager::open(dir.path().join("test.db")).unwrap();
        assert!(created);
        (dir, manager)
    }

    #[test]
    fn test_disk_write_then_read() {
        let (_dir, mut manager) = setup();

        // Write expected data to a block, then read it back.
        let expected = [123; BLOCK_SIZE];
        manager.write_block(39, &expected).unwrap();

        let mut actual = [0; BLOCK_SIZE];
        manager.read_block(39, &mut actual).unwrap();
        assert_eq!(actual[..], expected[..]);
    }

    #[test]
    fn test_fresh_disk_reads_zeros() {
        let (_dir, mut manager) = setup();

        let mut data = [1; BLOCK_SIZE];
        manager.read_block(DISK_BLOCKS as BlockIdT - 1, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let (mut manager, created) = DiskManager::open(&path).unwrap();
        assert!(created);
        manager.write_block(7, &[42; BLOCK_SIZE]).unwrap();
        drop(manager);

        let (mut manager, created) = DiskManager::open(&path).unwrap();
        assert!(!created);
        let mut data = [0; BLOCK_SIZE];
        manager.read_block(7, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 42));
    }

    #[test]
    fn test_out_of_bound_access() {
        let (_dir, mut manager) = setup();

        let mut data = [0; BLOCK_SIZE];
        assert!(manager.read_block(-1, &mut data).is_err());
        assert!(manager.read_block(DISK_BLOCKS as BlockIdT, &mut data).is_err());
        assert!(manager.write_block(DISK_BLOCKS as BlockIdT, &data).is_err());
    }
}
