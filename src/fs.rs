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

//! The filesystem instance.
//!
//! [`SimpleFileSystem`] owns the block device and the cached metadata
//! regions, translates logical file offsets into block transfers, and exposes
//! the public file API. Metadata mutations happen on the caches; they reach
//! the backing store on [`SimpleFileSystem::flush`], which runs on every
//! [`SimpleFileSystem::close`].

use crate::bitmap::FreeBitmap;
use crate::device::BlockDevice;
use crate::directory::DirectoryTable;
use crate::handle::DescriptorTable;
use crate::inode::InodeTable;
use crate::layout;
use crate::layout::{
    BLOCK_COUNT, BLOCK_SIZE, DIRECT_POINTERS, DIRECTORY_LENGTH, DIRECTORY_LOCATION,
    FREE_BITMAP_LOCATION, INODE_TABLE_LENGTH, INODE_TABLE_LOCATION, MAX_FILE_SIZE, MAX_NAME_LEN,
    SUPER_BLOCK_LOCATION, SuperBlock,
};
use crate::util::reinterpret_mut;
use std::fs::File;
use std::io;
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

/// Tells whether `dev` carries a simple filesystem image, by probing the
/// super block's signature.
pub fn is_present(dev: &mut File) -> io::Result<bool> {
    let mut super_block = SuperBlock::default();
    dev.seek(SeekFrom::Start((SUPER_BLOCK_LOCATION * BLOCK_SIZE) as u64))?;
    match dev.read_exact(reinterpret_mut(&mut super_block)) {
        Ok(()) => Ok(super_block.is_valid()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Checks that `name` fits a directory entry.
fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(Error::new(ErrorKind::InvalidInput, "invalid file name"));
    }
    if name.len() >= MAX_NAME_LEN {
        return Err(Error::new(ErrorKind::InvalidInput, "file name too long"));
    }
    Ok(())
}

/// Claims the next free data block.
fn allocate_block(bitmap: &mut FreeBitmap) -> io::Result<usize> {
    let block = bitmap
        .next_free()
        .ok_or_else(|| Error::new(ErrorKind::StorageFull, "no free data block"))?;
    bitmap.mark_used(block, 1);
    Ok(block)
}

/// A mounted simple filesystem.
///
/// An instance owns its caches; they are released when it is dropped and a
/// later [`SimpleFileSystem::mount`] builds fresh ones from the image. The
/// instance must be driven from a single thread, one operation at a time.
#[derive(Debug)]
pub struct SimpleFileSystem {
    /// The backing block store.
    dev: BlockDevice,
    /// Cached super block.
    super_block: SuperBlock,
    /// Cached free-block bitmap.
    bitmap: FreeBitmap,
    /// Cached root directory.
    directory: Box<DirectoryTable>,
    /// Cached inode table.
    inodes: Box<InodeTable>,
    /// The open-file table. In-memory only.
    handles: DescriptorTable,
}

impl SimpleFileSystem {
    /// Creates a fresh filesystem on `path`, destroying any previous content,
    /// and returns it mounted.
    pub fn format(path: &Path) -> io::Result<Self> {
        let mut dev = BlockDevice::init_fresh(path, BLOCK_SIZE, BLOCK_COUNT)?;

        let mut bitmap = FreeBitmap::new();

        let super_block = SuperBlock::new();
        layout::write_region(&mut dev, SUPER_BLOCK_LOCATION, 1, &super_block)?;
        bitmap.mark_used(SUPER_BLOCK_LOCATION, 1);

        let handles = DescriptorTable::default();

        let inodes = Box::new(InodeTable::default());
        layout::write_region(
            &mut dev,
            INODE_TABLE_LOCATION,
            INODE_TABLE_LENGTH,
            inodes.as_ref(),
        )?;
        bitmap.mark_used(INODE_TABLE_LOCATION, INODE_TABLE_LENGTH);

        let directory = Box::new(DirectoryTable::default());
        layout::write_region(
            &mut dev,
            DIRECTORY_LOCATION,
            DIRECTORY_LENGTH,
            directory.as_ref(),
        )?;
        bitmap.mark_used(DIRECTORY_LOCATION, DIRECTORY_LENGTH);

        layout::write_region(&mut dev, FREE_BITMAP_LOCATION, 1, &bitmap)?;

        Ok(Self {
            dev,
            super_block,
            bitmap,
            directory,
            inodes,
            handles,
        })
    }

    /// Attaches to the existing filesystem image at `path`, rebuilding the
    /// metadata caches from it. The content is left untouched.
    pub fn mount(path: &Path) -> io::Result<Self> {
        let mut dev = BlockDevice::init_existing(path, BLOCK_SIZE, BLOCK_COUNT)?;

        let super_block = *layout::read_region::<SuperBlock>(&mut dev, SUPER_BLOCK_LOCATION, 1)?;
        super_block.validate()?;

        let mut directory =
            layout::read_region::<DirectoryTable>(&mut dev, DIRECTORY_LOCATION, DIRECTORY_LENGTH)?;
        let inodes =
            layout::read_region::<InodeTable>(&mut dev, INODE_TABLE_LOCATION, INODE_TABLE_LENGTH)?;
        let bitmap = *layout::read_region::<FreeBitmap>(&mut dev, FREE_BITMAP_LOCATION, 1)?;

        // the persisted enumeration cursor carries no meaning here
        directory.rewind();

        let mut handles = DescriptorTable::default();
        handles.rebuild(&directory);

        Ok(Self {
            dev,
            super_block,
            bitmap,
            directory,
            inodes,
            handles,
        })
    }

    /// Writes the cached metadata back to the image: free bitmap, super
    /// block, root directory, then inode table, each region in full.
    pub fn flush(&mut self) -> io::Result<()> {
        layout::write_region(&mut self.dev, FREE_BITMAP_LOCATION, 1, &self.bitmap)?;
        layout::write_region(&mut self.dev, SUPER_BLOCK_LOCATION, 1, &self.super_block)?;
        layout::write_region(
            &mut self.dev,
            DIRECTORY_LOCATION,
            DIRECTORY_LENGTH,
            self.directory.as_ref(),
        )?;
        layout::write_region(
            &mut self.dev,
            INODE_TABLE_LOCATION,
            INODE_TABLE_LENGTH,
            self.inodes.as_ref(),
        )
    }

    /// Opens the file `name`, creating it if it does not exist, and returns
    /// its handle id.
    ///
    /// Opening a closed file resets its cursor to the beginning; a file that
    /// is already open keeps its cursor.
    pub fn open(&mut self, name: &str) -> io::Result<usize> {
        check_name(name)?;
        if let Some(fd) = self.handles.find(name) {
            if let Some(handle) = self.handles.get_mut(fd) {
                let ino = handle.inode;
                if !handle.open {
                    handle.open = true;
                    self.inodes[ino].cursor = 0;
                }
            }
            return Ok(fd);
        }
        let Some(ino) = self.inodes.allocate() else {
            return Err(Error::new(ErrorKind::StorageFull, "no free inode slot"));
        };
        if self.directory.create(name, ino).is_none() {
            self.inodes.release(ino);
            return Err(Error::new(ErrorKind::StorageFull, "root directory is full"));
        }
        let Some(fd) = self.handles.allocate(name, ino) else {
            self.directory.release(name);
            self.inodes.release(ino);
            return Err(Error::new(ErrorKind::StorageFull, "no free file handle"));
        };
        Ok(fd)
    }

    /// Returns the inode index of the open handle `fd`.
    fn open_inode(&self, fd: usize) -> io::Result<usize> {
        let handle = self
            .handles
            .get(fd)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "no such file handle"))?;
        if !handle.open {
            return Err(Error::other("file is not open"));
        }
        Ok(handle.inode)
    }

    /// Writes `buf` at the file's cursor, allocating data blocks on first
    /// touch, and advances the cursor.
    ///
    /// Returns the number of bytes written, which is smaller than
    /// `buf.len()` when the maximum file size caps the write; a write at the
    /// cap returns `Ok(0)`. Running out of data blocks mid-write is an error
    /// and the bytes already transferred are not rolled back.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> io::Result<usize> {
        let ino = self.open_inode(fd)?;
        let inode = &mut self.inodes[ino];
        let mut pos = inode.cursor as usize;
        // keep the final cursor below the maximum file size
        let len = buf.len().min(MAX_FILE_SIZE.saturating_sub(pos + 1));
        if len == 0 {
            return Ok(0);
        }
        let mut k = pos / BLOCK_SIZE;
        let mut off = pos % BLOCK_SIZE;
        let mut staging = [0u8; BLOCK_SIZE];
        let mut block = match inode.block(k) {
            Some(b) => {
                self.dev.read_blocks(b, &mut staging)?;
                b
            }
            None => {
                let b = allocate_block(&mut self.bitmap)?;
                inode.set_block(k, b);
                b
            }
        };
        for &byte in &buf[..len] {
            if off == BLOCK_SIZE {
                self.dev.write_blocks(block, &staging)?;
                k += 1;
                off = 0;
                block = match inode.block(k) {
                    Some(b) => {
                        self.dev.read_blocks(b, &mut staging)?;
                        b
                    }
                    None => {
                        let b = allocate_block(&mut self.bitmap)?;
                        inode.set_block(k, b);
                        staging = [0; BLOCK_SIZE];
                        b
                    }
                };
            }
            staging[off] = byte;
            off += 1;
            pos += 1;
        }
        if off == BLOCK_SIZE {
            // the cursor landed exactly on a block boundary: establish the
            // next block on disk
            self.dev.write_blocks(block, &staging)?;
            k += 1;
            if k < DIRECT_POINTERS && inode.block(k).is_none() {
                let b = allocate_block(&mut self.bitmap)?;
                inode.set_block(k, b);
                staging = [0; BLOCK_SIZE];
                self.dev.write_blocks(b, &staging)?;
            }
        } else {
            if pos > inode.size as usize {
                // terminate extended content; readers must not rely on this
                // byte, only on the recorded size
                staging[off] = 0;
            }
            self.dev.write_blocks(block, &staging)?;
        }
        inode.cursor = pos as i32;
        if pos > inode.size as usize {
            inode.size = pos as i32;
        }
        Ok(len)
    }

    /// Reads up to `buf.len()` bytes at the file's cursor into `buf` and
    /// advances the cursor.
    ///
    /// Returns the number of bytes read. A read that stops early, at
    /// end-of-file or on an unallocated block, stores a single zero byte at
    /// the stopping position in `buf`; there is no on-disk guarantee beyond
    /// the file's size.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> io::Result<usize> {
        let ino = self.open_inode(fd)?;
        let inode = &mut self.inodes[ino];
        let size = inode.size as usize;
        let mut pos = inode.cursor as usize;
        let mut k = pos / BLOCK_SIZE;
        let mut off = pos % BLOCK_SIZE;
        let mut staging = [0u8; BLOCK_SIZE];
        if let Some(b) = inode.block(k) {
            self.dev.read_blocks(b, &mut staging)?;
        }
        let mut read = 0;
        for i in 0..buf.len() {
            if off == BLOCK_SIZE {
                k += 1;
                off = 0;
                let next = if k < DIRECT_POINTERS {
                    inode.block(k)
                } else {
                    None
                };
                match next {
                    Some(b) => self.dev.read_blocks(b, &mut staging)?,
                    None => {
                        buf[i] = 0;
                        break;
                    }
                }
            }
            if pos > MAX_FILE_SIZE || pos >= size {
                buf[i] = 0;
                break;
            }
            buf[i] = staging[off];
            off += 1;
            pos += 1;
            read += 1;
        }
        inode.cursor = pos as i32;
        Ok(read)
    }

    /// Moves the file's cursor to `offset`. Valid offsets are `0..size`.
    pub fn seek(&mut self, fd: usize, offset: usize) -> io::Result<()> {
        let handle = self
            .handles
            .get(fd)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "no such file handle"))?;
        let inode = &mut self.inodes[handle.inode];
        if offset >= inode.size.max(0) as usize {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "seek offset out of range",
            ));
        }
        inode.cursor = offset as i32;
        Ok(())
    }

    /// Flushes the metadata caches, then marks the handle closed. The handle
    /// keeps its slot so the file can be reopened under the same id.
    pub fn close(&mut self, fd: usize) -> io::Result<()> {
        self.flush()?;
        let handle = self
            .handles
            .get_mut(fd)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "no such file handle"))?;
        if !handle.open {
            return Err(Error::other("file is not open"));
        }
        handle.open = false;
        Ok(())
    }

    /// Removes the file `name`: drops its handle, releases its directory
    /// entry and gives its inode and data blocks back.
    pub fn remove(&mut self, name: &str) -> io::Result<()> {
        self.handles.forget(name);
        let Some(ino) = self.directory.release(name) else {
            return Err(Error::new(ErrorKind::NotFound, "no such file"));
        };
        if self.inodes[ino].is_free() {
            return Err(Error::new(ErrorKind::NotFound, "inode is not in use"));
        }
        for block in self.inodes[ino].blocks() {
            self.bitmap.mark_free(block, 1);
        }
        self.inodes.release(ino);
        Ok(())
    }

    /// Returns the name of the next file in directory order, or `None` once
    /// the enumeration is exhausted. [`SimpleFileSystem::rewind`] restarts
    /// it.
    pub fn next_file_name(&mut self) -> Option<String> {
        self.directory
            .next_name()
            .map(|name| String::from_utf8_lossy(name).into_owned())
    }

    /// Restarts directory enumeration from the beginning.
    pub fn rewind(&mut self) {
        self.directory.rewind();
    }

    /// Returns the size in bytes of the file carrying `name`, or 0 when no
    /// handle carries that name.
    pub fn file_size(&self, name: &str) -> usize {
        self.handles
            .iter()
            .find(|h| h.name == name)
            .map(|h| self.inodes[h.inode].size.max(0) as usize)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::FIRST_DATA_BLOCK;
    use tempfile::NamedTempFile;

    fn fresh() -> (NamedTempFile, SimpleFileSystem) {
        let img = NamedTempFile::new().unwrap();
        let fs = SimpleFileSystem::format(img.path()).unwrap();
        (img, fs)
    }

    #[test]
    fn write_seek_read_round_trip() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("a").unwrap();
        assert_eq!(fs.write(fd, b"hello").unwrap(), 5);
        fs.seek(fd, 0).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn format_reserves_metadata_blocks() {
        let (_img, fs) = fresh();
        for block in 0..FIRST_DATA_BLOCK {
            assert!(!fs.bitmap.is_free(block), "block {block} must be reserved");
        }
        for block in FIRST_DATA_BLOCK..FREE_BITMAP_LOCATION {
            assert!(fs.bitmap.is_free(block), "block {block} must be free");
        }
        assert!(!fs.bitmap.is_free(FREE_BITMAP_LOCATION));
        for inode in fs.inodes.iter() {
            assert!(inode.is_free());
            assert_eq!(inode.blocks().count(), 0);
        }
    }

    #[test]
    fn content_survives_a_remount() {
        let img = NamedTempFile::new().unwrap();
        let payload = vec![0xAA; 2000];
        {
            let mut fs = SimpleFileSystem::format(img.path()).unwrap();
            let fd = fs.open("b").unwrap();
            assert_eq!(fs.write(fd, &payload).unwrap(), 2000);
            assert_eq!(fs.file_size("b"), 2000);
            fs.close(fd).unwrap();
        }
        let mut fs = SimpleFileSystem::mount(img.path()).unwrap();
        assert_eq!(fs.file_size("b"), 2000);
        let fd = fs.open("b").unwrap();
        let mut buf = vec![0u8; 2000];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 2000);
        assert_eq!(buf, payload);
    }

    #[test]
    fn chunked_random_content_survives_a_remount() {
        let img = NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..20_000).map(|_| rand::random::<u8>()).collect();
        {
            let mut fs = SimpleFileSystem::format(img.path()).unwrap();
            let fd = fs.open("blob").unwrap();
            let mut written = 0;
            while written < payload.len() {
                let chunk = (rand::random::<u8>() as usize + 1).min(payload.len() - written);
                let n = fs.write(fd, &payload[written..written + chunk]).unwrap();
                assert_eq!(n, chunk);
                written += n;
            }
            fs.close(fd).unwrap();
        }
        let mut fs = SimpleFileSystem::mount(img.path()).unwrap();
        let fd = fs.open("blob").unwrap();
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn remount_keeps_allocated_blocks_used() {
        let img = NamedTempFile::new().unwrap();
        {
            let mut fs = SimpleFileSystem::format(img.path()).unwrap();
            let fd = fs.open("used").unwrap();
            fs.write(fd, &[0x55; 100]).unwrap();
            fs.close(fd).unwrap();
        }
        let fs = SimpleFileSystem::mount(img.path()).unwrap();
        assert!(!fs.bitmap.is_free(FIRST_DATA_BLOCK));
        assert!(fs.bitmap.is_free(FIRST_DATA_BLOCK + 1));
    }

    #[test]
    fn write_is_capped_at_max_file_size() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("c").unwrap();
        let payload = vec![0x5A; MAX_FILE_SIZE - 1];
        assert_eq!(fs.write(fd, &payload).unwrap(), MAX_FILE_SIZE - 1);
        assert_eq!(fs.file_size("c"), MAX_FILE_SIZE - 1);
        // the cursor sits at the cap: nothing more fits
        assert_eq!(fs.write(fd, &[0; 10]).unwrap(), 0);
        assert_eq!(fs.file_size("c"), MAX_FILE_SIZE - 1);
    }

    #[test]
    fn oversized_write_is_truncated_to_the_cap() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("c").unwrap();
        assert_eq!(fs.write(fd, &vec![1; 32_760]).unwrap(), 32_760);
        // only MAX_FILE_SIZE - 1 - 32760 = 7 bytes still fit
        assert_eq!(fs.write(fd, &[2; 20]).unwrap(), 7);
        assert_eq!(fs.file_size("c"), MAX_FILE_SIZE - 1);
        fs.seek(fd, 32_760).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 7);
        assert_eq!(buf, [2; 7]);
    }

    #[test]
    fn remove_frees_everything() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("d").unwrap();
        fs.write(fd, &[9; 500]).unwrap();
        fs.close(fd).unwrap();
        assert!(!fs.bitmap.is_free(FIRST_DATA_BLOCK));

        fs.remove("d").unwrap();
        assert!(fs.bitmap.is_free(FIRST_DATA_BLOCK));
        assert_eq!(fs.file_size("d"), 0);

        // a fresh file under a new name starts empty
        let fd = fs.open("e").unwrap();
        assert_eq!(fs.file_size("e"), 0);
        let mut buf = [0xFF; 10];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn removed_name_can_be_recreated_empty() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("f").unwrap();
        fs.write(fd, b"content").unwrap();
        fs.remove("f").unwrap();

        let fd = fs.open("f").unwrap();
        assert_eq!(fs.file_size("f"), 0);
        let mut buf = [0xFF; 4];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    }

    #[test]
    fn remove_of_unknown_file_fails() {
        let (_img, mut fs) = fresh();
        let err = fs.remove("ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn tables_are_exhausted_at_capacity() {
        let (_img, mut fs) = fresh();
        for i in 0..crate::layout::MAX_FILES {
            fs.open(&format!("f{i}")).unwrap();
        }
        let err = fs.open("f128").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFull);

        fs.remove("f17").unwrap();
        fs.open("f128").unwrap();
    }

    #[test]
    fn seek_bounds_are_enforced() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("x").unwrap();
        fs.write(fd, &[7; 10]).unwrap();

        let err = fs.seek(fd, 20).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        // the cursor did not move: the next write appends
        fs.write(fd, &[8; 2]).unwrap();
        assert_eq!(fs.file_size("x"), 12);

        assert_eq!(fs.seek(fd, 12).unwrap_err().kind(), ErrorKind::InvalidInput);
        fs.seek(fd, 11).unwrap();
        fs.seek(fd, 0).unwrap();
    }

    #[test]
    fn seek_on_empty_file_fails() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("empty").unwrap();
        assert!(fs.seek(fd, 0).is_err());
    }

    #[test]
    fn reopening_returns_the_same_inode_and_resets_the_cursor() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("r").unwrap();
        let ino = fs.handles.get(fd).unwrap().inode;
        fs.write(fd, b"abcdef").unwrap();
        fs.close(fd).unwrap();

        let fd2 = fs.open("r").unwrap();
        assert_eq!(fd2, fd);
        assert_eq!(fs.handles.get(fd2).unwrap().inode, ino);
        assert_eq!(fs.file_size("r"), 6);
        // the reopened cursor points at the beginning
        let mut buf = [0u8; 6];
        assert_eq!(fs.read(fd2, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn closed_handles_reject_io() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("y").unwrap();
        fs.write(fd, b"data").unwrap();
        fs.close(fd).unwrap();

        assert!(fs.write(fd, b"more").is_err());
        let mut buf = [0u8; 4];
        assert!(fs.read(fd, &mut buf).is_err());
        // closing twice fails as well
        assert!(fs.close(fd).is_err());
        // seeking a closed handle is allowed
        fs.seek(fd, 2).unwrap();
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let (_img, mut fs) = fresh();
        let mut buf = [0u8; 1];
        assert_eq!(
            fs.read(77, &mut buf).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            fs.write(77, &buf).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            fs.seek(1000, 0).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(fs.close(77).is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_img, mut fs) = fresh();
        assert!(fs.open("").is_err());
        assert!(fs.open("a\0b").is_err());
        let long = "n".repeat(MAX_NAME_LEN);
        assert_eq!(
            fs.open(&long).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        let fits = "n".repeat(MAX_NAME_LEN - 1);
        fs.open(&fits).unwrap();
    }

    #[test]
    fn write_crossing_a_block_boundary_keeps_continuity() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("span").unwrap();
        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(fs.write(fd, &payload).unwrap(), 1500);

        fs.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; 1500];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 1500);
        assert_eq!(buf, payload);

        // bytes on both sides of the boundary
        fs.seek(fd, BLOCK_SIZE - 2).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 4);
        assert_eq!(buf.to_vec(), payload[BLOCK_SIZE - 2..BLOCK_SIZE + 2].to_vec());
    }

    #[test]
    fn boundary_exact_write_establishes_the_next_block() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("edge").unwrap();
        assert_eq!(fs.write(fd, &[3; BLOCK_SIZE]).unwrap(), BLOCK_SIZE);
        assert_eq!(fs.file_size("edge"), BLOCK_SIZE);
        {
            let ino = fs.handles.get(fd).unwrap().inode;
            let inode = &fs.inodes[ino];
            assert!(inode.block(0).is_some());
            assert!(inode.block(1).is_some());
        }
        fs.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), BLOCK_SIZE);
        assert!(buf.iter().all(|&b| b == 3));
    }

    #[test]
    fn read_past_end_of_file_stores_a_zero_byte() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("short").unwrap();
        fs.write(fd, b"hello").unwrap();
        fs.seek(fd, 0).unwrap();

        let mut buf = [0xFF; 10];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(buf[5], 0);
        // bytes past the stopping position are untouched
        assert!(buf[6..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn write_fails_when_no_data_block_is_free() {
        let (_img, mut fs) = fresh();
        let fd = fs.open("full").unwrap();
        fs.bitmap
            .mark_used(FIRST_DATA_BLOCK, FREE_BITMAP_LOCATION - FIRST_DATA_BLOCK);
        let err = fs.write(fd, b"no room").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFull);
    }

    #[test]
    fn enumeration_lists_every_file_once() {
        let (_img, mut fs) = fresh();
        for name in ["one", "two", "three"] {
            fs.open(name).unwrap();
        }
        fs.remove("two").unwrap();

        let mut names = Vec::new();
        while let Some(name) = fs.next_file_name() {
            names.push(name);
        }
        assert_eq!(names, vec!["one".to_owned(), "three".to_owned()]);
        assert_eq!(fs.next_file_name(), None);

        fs.rewind();
        assert_eq!(fs.next_file_name().as_deref(), Some("one"));
    }

    #[test]
    fn enumeration_restarts_after_a_mount() {
        let img = NamedTempFile::new().unwrap();
        {
            let mut fs = SimpleFileSystem::format(img.path()).unwrap();
            for name in ["a", "b"] {
                let fd = fs.open(name).unwrap();
                fs.close(fd).unwrap();
            }
            // leave the cursor mid-scan
            fs.next_file_name().unwrap();
        }
        let mut fs = SimpleFileSystem::mount(img.path()).unwrap();
        assert_eq!(fs.next_file_name().as_deref(), Some("a"));
        assert_eq!(fs.next_file_name().as_deref(), Some("b"));
        assert_eq!(fs.next_file_name(), None);
    }

    #[test]
    fn file_size_of_unknown_name_is_zero() {
        let (_img, mut fs) = fresh();
        assert_eq!(fs.file_size("nothing"), 0);
        let fd = fs.open("known").unwrap();
        fs.write(fd, &[1; 42]).unwrap();
        assert_eq!(fs.file_size("known"), 42);
        fs.close(fd).unwrap();
        // a closed handle still answers
        assert_eq!(fs.file_size("known"), 42);
    }

    #[test]
    fn handle_ids_are_packed_after_a_mount() {
        let img = NamedTempFile::new().unwrap();
        {
            let mut fs = SimpleFileSystem::format(img.path()).unwrap();
            for name in ["a", "b", "c"] {
                let fd = fs.open(name).unwrap();
                fs.close(fd).unwrap();
            }
            fs.remove("b").unwrap();
            fs.flush().unwrap();
        }
        let mut fs = SimpleFileSystem::mount(img.path()).unwrap();
        assert_eq!(fs.open("a").unwrap(), 0);
        assert_eq!(fs.open("c").unwrap(), 1);
    }

    #[test]
    fn mount_rejects_a_foreign_image() {
        let img = NamedTempFile::new().unwrap();
        BlockDevice::init_fresh(img.path(), BLOCK_SIZE, BLOCK_COUNT).unwrap();
        let err = SimpleFileSystem::mount(img.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn mount_rejects_a_truncated_store() {
        let img = NamedTempFile::new().unwrap();
        img.as_file().set_len((BLOCK_SIZE * 10) as u64).unwrap();
        let err = SimpleFileSystem::mount(img.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn presence_probe() {
        let img = NamedTempFile::new().unwrap();
        assert!(!is_present(&mut img.reopen().unwrap()).unwrap());
        SimpleFileSystem::format(img.path()).unwrap();
        assert!(is_present(&mut img.reopen().unwrap()).unwrap());
    }
}
