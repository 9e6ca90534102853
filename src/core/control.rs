use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::core::{Error, Result};

pub const QUEUE_MAGIC: u32 = 0x5446_4D51; // 'TFMQ'
pub const QUEUE_VERSION: u32 = 1;

const INIT_STATE_READY: u32 = 2;

/// Header at offset 0 of every queue file. The ring data follows at
/// [`DATA_OFFSET`].
#[repr(C, align(128))]
pub struct QueueControl {
    // Constant after creation.
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub init_state: AtomicU32,
    pub _pad0: [u8; 4],
    pub capacity: AtomicU64,
    pub _pad1: [u8; 104],

    // Writer-owned.
    pub write_ptr: AtomicU64,
    pub _pad2: [u8; 120],

    // Reader-owned.
    pub read_ptr: AtomicU64,
    pub _pad3: [u8; 120],

    // Event-flag word, touched by both sides.
    pub event_flag: AtomicU32,
    pub _pad4: [u8; 124],
}

pub const DATA_OFFSET: usize = size_of::<QueueControl>();
pub const FLAG_WORD_OFFSET: usize = offset_of!(QueueControl, event_flag);

impl QueueControl {
    /// Initializes a zeroed header. `ptr` must point at the start of a
    /// writable mapping of at least `DATA_OFFSET` bytes.
    pub(crate) fn init<'a>(ptr: *mut u8, capacity: u64) -> &'a QueueControl {
        let block = unsafe { &*(ptr as *const QueueControl) };
        block.init_state.store(1, Ordering::Relaxed);
        block.version.store(QUEUE_VERSION, Ordering::Relaxed);
        block.capacity.store(capacity, Ordering::Relaxed);
        block.write_ptr.store(0, Ordering::Relaxed);
        block.read_ptr.store(0, Ordering::Relaxed);
        block.event_flag.store(0, Ordering::Relaxed);
        block.magic.store(QUEUE_MAGIC, Ordering::Relaxed);
        block.init_state.store(INIT_STATE_READY, Ordering::Release);
        block
    }

    pub(crate) fn check_ready(&self) -> Result<()> {
        if self.init_state.load(Ordering::Acquire) != INIT_STATE_READY {
            return Err(Error::CorruptMetadata("queue header not initialized"));
        }
        if self.magic.load(Ordering::Acquire) != QUEUE_MAGIC {
            return Err(Error::CorruptMetadata("queue magic mismatch"));
        }
        let version = self.version.load(Ordering::Acquire);
        if version != QUEUE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    pub(crate) fn reset_pointers(&self) {
        self.read_ptr.store(0, Ordering::SeqCst);
        self.write_ptr.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::align_of;

    #[test]
    fn control_block_layout() {
        assert_eq!(size_of::<QueueControl>(), 512);
        assert_eq!(align_of::<QueueControl>(), 128);
        assert_eq!(offset_of!(QueueControl, write_ptr), 128);
        assert_eq!(offset_of!(QueueControl, read_ptr), 256);
        assert_eq!(FLAG_WORD_OFFSET, 384);
    }

    #[test]
    fn uninitialized_header_is_rejected() {
        let mut storage = Box::new(std::mem::MaybeUninit::<QueueControl>::zeroed());
        let ptr = storage.as_mut_ptr() as *mut u8;
        let block = unsafe { &*(ptr as *const QueueControl) };
        assert!(matches!(block.check_ready(), Err(Error::CorruptMetadata(_))));

        let block = QueueControl::init(ptr, 4096);
        block.check_ready().expect("ready after init");
        assert_eq!(block.capacity(), 4096);
    }
}
