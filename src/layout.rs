/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! On-disk layout of the filesystem.
//!
//! The image is divided into five regions:
//!
//! | Blocks      | Content        |
//! |-------------|----------------|
//! | `0`         | super block    |
//! | `1..5`      | root directory |
//! | `5..23`     | inode table    |
//! | `23..1023`  | data region    |
//! | `1023`      | free bitmap    |
//!
//! Each metadata record is persisted as its raw byte image, rounded up to the
//! enclosing block region with unused bytes left zero.

use crate::device::BlockDevice;
use crate::util::{reinterpret, reinterpret_mut};
use std::io;
use std::io::{Error, ErrorKind};
use std::mem::size_of;
use uuid::Uuid;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 1024;
/// The total number of blocks on the backing store.
pub const BLOCK_COUNT: usize = 1024;
/// The maximum size of a file in bytes.
pub const MAX_FILE_SIZE: usize = 32768;
/// The number of direct block pointers in an inode.
pub const DIRECT_POINTERS: usize = MAX_FILE_SIZE / BLOCK_SIZE;
/// The maximum number of files. The inode table, the root directory and the
/// file handle table all have this many slots.
pub const MAX_FILES: usize = 128;
/// The maximum length of a file name in bytes, including the NUL terminator.
pub const MAX_NAME_LEN: usize = 20;

/// The block holding the super block.
pub const SUPER_BLOCK_LOCATION: usize = 0;
/// The first block of the root directory region.
pub const DIRECTORY_LOCATION: usize = 1;
/// The number of blocks of the root directory region.
pub const DIRECTORY_LENGTH: usize = 4;
/// The first block of the inode table region.
pub const INODE_TABLE_LOCATION: usize = 5;
/// The number of blocks of the inode table region.
pub const INODE_TABLE_LENGTH: usize = 18;
/// The block holding the free bitmap.
pub const FREE_BITMAP_LOCATION: usize = BLOCK_COUNT - 1;
/// The first block of the data region.
pub const FIRST_DATA_BLOCK: usize = 23;

/// The filesystem's signature.
pub const SFS_MAGIC: [u8; 8] = *b"SFS\0disk";

/// The super block, persisted on block 0.
///
/// Written once at format; the recorded geometry is authoritative for
/// subsequent mounts.
#[repr(C)]
#[derive(Clone, Copy, Default)]
#[derive(Debug)]
pub struct SuperBlock {
    /// The filesystem's signature.
    pub magic: [u8; 8],
    /// The size of a block in bytes.
    pub block_size: u32,
    /// The total number of blocks on the backing store.
    pub fs_size: u32,
    /// The number of blocks of the inode table region.
    pub inode_table_length: u32,
    /// The first block of the root directory region.
    pub root_directory_block: u32,
    /// The filesystem's id.
    pub fs_id: [u8; 16],
}

impl SuperBlock {
    /// Creates a super block describing the compiled geometry, with a random
    /// filesystem id.
    pub fn new() -> Self {
        Self {
            magic: SFS_MAGIC,
            block_size: BLOCK_SIZE as _,
            fs_size: BLOCK_COUNT as _,
            inode_table_length: INODE_TABLE_LENGTH as _,
            root_directory_block: DIRECTORY_LOCATION as _,
            fs_id: Uuid::new_v4().into_bytes(),
        }
    }

    /// Tells whether the record carries the filesystem's signature.
    pub fn is_valid(&self) -> bool {
        self.magic == SFS_MAGIC
    }

    /// Checks the signature and the recorded geometry against the compiled
    /// one.
    pub fn validate(&self) -> io::Result<()> {
        if !self.is_valid() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "not a simple filesystem image",
            ));
        }
        let geometry_matches = self.block_size == BLOCK_SIZE as u32
            && self.fs_size == BLOCK_COUNT as u32
            && self.inode_table_length == INODE_TABLE_LENGTH as u32
            && self.root_directory_block == DIRECTORY_LOCATION as u32;
        if !geometry_matches {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "filesystem geometry mismatch",
            ));
        }
        Ok(())
    }
}

/// Writes `record` to the region of `len` blocks starting at block `start`,
/// padding the image with zeros up to the region size.
pub(crate) fn write_region<T>(
    dev: &mut BlockDevice,
    start: usize,
    len: usize,
    record: &T,
) -> io::Result<()> {
    let bytes = reinterpret(record);
    let mut image = vec![0; len * BLOCK_SIZE];
    image[..bytes.len()].copy_from_slice(bytes);
    dev.write_blocks(start, &image)
}

/// Reads a record back from the region of `len` blocks starting at block
/// `start`.
pub(crate) fn read_region<T: Default>(
    dev: &mut BlockDevice,
    start: usize,
    len: usize,
) -> io::Result<Box<T>> {
    let mut image = vec![0; len * BLOCK_SIZE];
    dev.read_blocks(start, &mut image)?;
    let mut record = Box::<T>::default();
    let bytes = reinterpret_mut(record.as_mut());
    let size = bytes.len();
    bytes.copy_from_slice(&image[..size]);
    Ok(record)
}

const _: () = assert!(size_of::<SuperBlock>() <= BLOCK_SIZE);
const _: () = assert!(FIRST_DATA_BLOCK >= INODE_TABLE_LOCATION + INODE_TABLE_LENGTH);
const _: () = assert!(MAX_FILE_SIZE == DIRECT_POINTERS * BLOCK_SIZE);
