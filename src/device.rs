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

//! Adapter over the backing block store.
//!
//! The store is addressed in whole blocks only. It may be a plain file or a
//! block device; both are driven through regular file I/O.

use libc::ioctl;
use std::ffi::c_long;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the capacity in bytes of the given backing store.
pub fn storage_capacity(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size = 0u64;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(size)
    } else if file_type.is_file() {
        Ok(metadata.len())
    } else {
        Ok(0)
    }
}

/// A fixed-geometry block store.
#[derive(Debug)]
pub struct BlockDevice {
    /// The backing store.
    dev: File,
    /// The size of a block in bytes.
    block_size: usize,
    /// The number of blocks on the store.
    block_count: usize,
}

impl BlockDevice {
    /// Creates a zero-filled store of `block_count` blocks of `block_size`
    /// bytes at `path`, destroying any previous content.
    pub fn init_fresh(path: &Path, block_size: usize, block_count: usize) -> io::Result<Self> {
        let mut dev = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let zeros = vec![0; block_size];
        dev.seek(SeekFrom::Start(0))?;
        for _ in 0..block_count {
            dev.write_all(&zeros)?;
        }
        Ok(Self {
            dev,
            block_size,
            block_count,
        })
    }

    /// Opens the existing store at `path`, checking it can hold the declared
    /// geometry.
    pub fn init_existing(path: &Path, block_size: usize, block_count: usize) -> io::Result<Self> {
        let dev = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = storage_capacity(&dev)?;
        if capacity < (block_size * block_count) as u64 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "backing store is too small for the declared geometry",
            ));
        }
        Ok(Self {
            dev,
            block_size,
            block_count,
        })
    }

    /// Checks that the blocks `start..start + count` are on the store.
    fn check_range(&self, start: usize, count: usize) -> io::Result<()> {
        if start + count > self.block_count {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block range out of bounds",
            ));
        }
        Ok(())
    }

    /// Reads whole blocks starting at block `start` into `buf`, whose length
    /// must be a multiple of the block size.
    pub fn read_blocks(&mut self, start: usize, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len() % self.block_size, 0);
        self.check_range(start, buf.len() / self.block_size)?;
        self.dev
            .seek(SeekFrom::Start((start * self.block_size) as u64))?;
        self.dev.read_exact(buf)
    }

    /// Writes whole blocks starting at block `start` from `buf`, whose length
    /// must be a multiple of the block size.
    pub fn write_blocks(&mut self, start: usize, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len() % self.block_size, 0);
        self.check_range(start, buf.len() / self.block_size)?;
        self.dev
            .seek(SeekFrom::Start((start * self.block_size) as u64))?;
        self.dev.write_all(buf)
    }
}
