//! Fixed-capacity pool of receive buffers.
//!
//! The transport's receive callbacks must never block, so inbound file
//! blocks and update job documents are staged in one of `N` buffers
//! allocated once at start-up. The buffer travels with the event to the
//! update engine, which hands it back through the life-cycle callback
//! once the event has been processed.
//!
//! ```text
//!   receive callback            update engine              app callback
//!  ──────────────────         ────────────────           ────────────────
//!   acquire() ──▶ fill() ──▶ ReceivedFileBlock ──▶ ... ──▶ Processed ──▶ release()
//! ```
//!
//! The slot table is guarded by one critical-section mutex held only for
//! the scan or the flag flip. A slot is "used" while its storage is
//! checked out inside an [`EventBuffer`]; copying into the buffer happens
//! outside the lock.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, error};

/// A checked-out pool slot. Not `Clone`: exactly one owner at a time.
pub struct EventBuffer {
    slot: usize,
    data: Box<[u8]>,
    len: usize,
}

impl EventBuffer {
    /// Index of the slot this buffer belongs to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The staged payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `payload` into the buffer and tag it with its length.
    ///
    /// Callers check the payload against the slot size first; a payload
    /// that does not fit is a contract violation.
    pub fn fill(&mut self, payload: &[u8]) {
        assert!(
            payload.len() <= self.data.len(),
            "payload of {} bytes exceeds slot size {}",
            payload.len(),
            self.data.len()
        );
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len();
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer")
            .field("slot", &self.slot)
            .field("len", &self.len)
            .finish()
    }
}

/// Pool of equally sized receive buffers.
pub struct BufferPool {
    /// `Some(storage)` = free, `None` = checked out.
    slots: Mutex<CriticalSectionRawMutex, RefCell<Vec<Option<Box<[u8]>>>>>,
    slot_size: usize,
}

impl BufferPool {
    pub fn new(count: usize, slot_size: usize) -> Self {
        let slots = (0..count)
            .map(|_| Some(vec![0u8; slot_size].into_boxed_slice()))
            .collect();
        Self {
            slots: Mutex::new(RefCell::new(slots)),
            slot_size,
        }
    }

    /// Check out the first free slot, or `None` when all are in use.
    ///
    /// Never waits for a slot to come free.
    pub fn acquire(&self) -> Option<EventBuffer> {
        self.slots.lock(|cell| {
            let Ok(mut slots) = cell.try_borrow_mut() else {
                error!("Pool: slot table busy, no buffer handed out");
                return None;
            };
            let (slot, data) = slots
                .iter_mut()
                .enumerate()
                .find_map(|(i, s)| s.take().map(|data| (i, data)))?;
            debug!("Pool: acquired slot {}", slot);
            Some(EventBuffer { slot, data, len: 0 })
        })
    }

    /// Return a buffer to its slot.
    ///
    /// Releasing into a slot that is not in use is a logic fault.
    pub fn release(&self, buffer: EventBuffer) {
        let EventBuffer { slot, data, .. } = buffer;
        assert_eq!(data.len(), self.slot_size, "buffer does not belong to this pool");
        self.slots.lock(|cell| {
            let mut slots = cell.borrow_mut();
            let entry = slots
                .get_mut(slot)
                .unwrap_or_else(|| panic!("slot {slot} out of range"));
            assert!(entry.is_none(), "slot {slot} released while not in use");
            *entry = Some(data);
        });
        debug!("Pool: released slot {}", slot);
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.slots
            .lock(|cell| cell.borrow().iter().filter(|s| s.is_some()).count())
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock(|cell| cell.borrow().len())
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}
