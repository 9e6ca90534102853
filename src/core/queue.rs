//! Single-producer/single-consumer byte queue in a memory-mapped file.
//!
//! ```text
//! ┌───────────────────────────┬──────────────────────────────────┐
//! │ QueueControl (512 bytes)  │ ring data (capacity bytes)       │
//! │ cursors + event-flag word │ position = cursor % capacity     │
//! └───────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! The owning side creates the file and hands a [`QueueDesc`] to its peer,
//! which maps the same file with [`MessageQueue::attach`]. Cursors are
//! monotonic `u64` byte counts; `write_ptr - read_ptr` is the number of
//! unread bytes and never exceeds the capacity.

use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::Ordering;

use crate::core::control::{QueueControl, DATA_OFFSET, FLAG_WORD_OFFSET};
use crate::core::event_flag::EventFlag;
use crate::core::mmap::MmapFile;
use crate::core::{Error, Result};

/// Everything a peer needs to attach to an existing queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDesc {
    pub path: PathBuf,
    pub capacity: usize,
    pub flag_word_offset: usize,
}

pub struct MessageQueue {
    _mmap: MmapFile,
    control: *const QueueControl,
    data: *mut u8,
    capacity: usize,
    desc: QueueDesc,
    owner: bool,
}

// SAFETY: the mapping lives as long as the queue. Cursor updates go through
// atomics, and the SPSC contract gives each byte range a single writer at a
// time: the producer only touches free space, the consumer only unread
// bytes.
unsafe impl Send for MessageQueue {}
unsafe impl Sync for MessageQueue {}

impl MessageQueue {
    /// Creates a fresh queue file at `path`. The returned queue owns the
    /// file and removes it on drop.
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Unsupported("queue capacity must be non-zero"));
        }
        let path = path.as_ref().to_path_buf();
        let mut mmap = MmapFile::create(&path, DATA_OFFSET + capacity)?;
        mmap.as_mut_slice().fill(0);
        let base = mmap.as_mut_slice().as_mut_ptr();
        let control = QueueControl::init(base, capacity as u64) as *const QueueControl;
        let desc = QueueDesc {
            path,
            capacity,
            flag_word_offset: FLAG_WORD_OFFSET,
        };
        Ok(Self {
            _mmap: mmap,
            control,
            data: unsafe { base.add(DATA_OFFSET) },
            capacity,
            desc,
            owner: true,
        })
    }

    /// Maps the queue named by `desc`. With `reset_pointers`, both cursors
    /// go back to zero, which is only sound before any byte was written.
    pub fn attach(desc: &QueueDesc, reset_pointers: bool) -> Result<Self> {
        if desc.flag_word_offset != FLAG_WORD_OFFSET {
            return Err(Error::DescriptorMismatch("event flag word offset"));
        }
        let mut mmap = MmapFile::open(&desc.path)?;
        if mmap.len() < DATA_OFFSET + desc.capacity {
            return Err(Error::CorruptMetadata("queue file smaller than descriptor"));
        }
        let base = mmap.as_mut_slice().as_mut_ptr();
        let control = base as *const QueueControl;
        let block = unsafe { &*control };
        block.check_ready()?;
        if block.capacity() != desc.capacity as u64 {
            return Err(Error::DescriptorMismatch("capacity"));
        }
        if reset_pointers {
            block.reset_pointers();
        }
        Ok(Self {
            _mmap: mmap,
            control,
            data: unsafe { base.add(DATA_OFFSET) },
            capacity: desc.capacity,
            desc: desc.clone(),
            owner: false,
        })
    }

    pub fn desc(&self) -> &QueueDesc {
        &self.desc
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn event_flag(&self) -> EventFlag<'_> {
        EventFlag::new(&self.control().event_flag)
    }

    pub fn available_to_read(&self) -> usize {
        let control = self.control();
        let write = control.write_ptr.load(Ordering::Acquire);
        let read = control.read_ptr.load(Ordering::Acquire);
        (write.wrapping_sub(read) as usize).min(self.capacity)
    }

    pub fn available_to_write(&self) -> usize {
        self.capacity - self.available_to_read()
    }

    /// Appends all of `src`, or nothing. Returns false if `src` does not fit
    /// in the current free space.
    pub fn write(&self, src: &[u8]) -> bool {
        let control = self.control();
        let write = control.write_ptr.load(Ordering::Relaxed);
        let read = control.read_ptr.load(Ordering::Acquire);
        let used = write.wrapping_sub(read) as usize;
        if used > self.capacity {
            return false;
        }
        if src.len() > self.capacity - used {
            return false;
        }
        if src.is_empty() {
            return true;
        }
        let offset = (write % self.capacity as u64) as usize;
        let first = src.len().min(self.capacity - offset);
        // SAFETY: [offset, offset + first) and [0, src.len() - first) lie in
        // the data region and hold no unread bytes.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data.add(offset), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data, src.len() - first);
        }
        control
            .write_ptr
            .store(write + src.len() as u64, Ordering::Release);
        true
    }

    /// Fills all of `dst`, or nothing. Returns false if fewer than
    /// `dst.len()` bytes are available.
    pub fn read(&self, dst: &mut [u8]) -> bool {
        let control = self.control();
        let read = control.read_ptr.load(Ordering::Relaxed);
        let write = control.write_ptr.load(Ordering::Acquire);
        let available = write.wrapping_sub(read) as usize;
        if available > self.capacity {
            return false;
        }
        if dst.len() > available {
            return false;
        }
        if dst.is_empty() {
            return true;
        }
        let offset = (read % self.capacity as u64) as usize;
        let first = dst.len().min(self.capacity - offset);
        // SAFETY: the ranges hold committed bytes the writer will not touch
        // until read_ptr moves past them.
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(offset), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.data, dst.as_mut_ptr().add(first), dst.len() - first);
        }
        control
            .read_ptr
            .store(read + dst.len() as u64, Ordering::Release);
        true
    }

    fn control(&self) -> &QueueControl {
        unsafe { &*self.control }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if self.owner {
            let _ = std::fs::remove_file(&self.desc.path);
        }
    }
}
