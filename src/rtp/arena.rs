//! Fixed arena of datagram slots with per-slot owner counts
//!
//! Every received datagram lives in one slot of the arena. A [`PacketBuf`]
//! is an owning handle to a slot: cloning it adds an owner, dropping (or
//! [`PacketBuf::release`]) removes one, and the slot goes back to the free
//! list when the last owner is gone. The receive loop only writes into a slot
//! it owns exclusively, so a datagram parked in the reorder queue is never
//! overwritten.
//!
//! The arena belongs to the receive thread and is deliberately `!Send`.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

struct Slot {
    data: RefCell<Box<[u8]>>,
    len: Cell<usize>,
    refs: Cell<usize>,
}

struct ArenaInner {
    slots: Box<[Slot]>,
    free: RefCell<Vec<usize>>,
}

/// Pre-allocated set of equally sized datagram buffers
pub struct PacketArena {
    inner: Rc<ArenaInner>,
    slot_size: usize,
}

impl PacketArena {
    /// Create an arena of `slot_count` buffers of `slot_size` bytes each
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| Slot {
                data: RefCell::new(vec![0u8; slot_size].into_boxed_slice()),
                len: Cell::new(0),
                refs: Cell::new(0),
            })
            .collect();

        // Reversed so that slot 0 is handed out first
        let free = (0..slot_count).rev().collect();

        Self {
            inner: Rc::new(ArenaInner {
                slots,
                free: RefCell::new(free),
            }),
            slot_size,
        }
    }

    /// Take a free slot, owned once by the returned handle
    pub fn acquire(&self) -> Option<PacketBuf> {
        let index = self.inner.free.borrow_mut().pop()?;
        let slot = &self.inner.slots[index];
        slot.refs.set(1);
        slot.len.set(0);

        Some(PacketBuf {
            arena: Rc::clone(&self.inner),
            index,
        })
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of slots not owned by anyone
    pub fn free_slots(&self) -> usize {
        self.inner.free.borrow().len()
    }

    /// Number of slots with at least one owner
    pub fn in_use(&self) -> usize {
        self.capacity() - self.free_slots()
    }

    /// Size of every slot in bytes
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}

/// Owning handle to one arena slot
pub struct PacketBuf {
    arena: Rc<ArenaInner>,
    index: usize,
}

impl PacketBuf {
    fn slot(&self) -> &Slot {
        &self.arena.slots[self.index]
    }

    /// Index of the underlying slot
    pub fn slot_index(&self) -> usize {
        self.index
    }

    /// Current number of owners of this slot
    pub fn ref_count(&self) -> usize {
        self.slot().refs.get()
    }

    /// True if another handle also owns this slot
    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Add an owner, returning the new handle
    pub fn add_ref(&self) -> PacketBuf {
        self.clone()
    }

    /// Give up this owner, returning how many owners remain
    pub fn release(self) -> usize {
        let remaining = self.ref_count() - 1;
        drop(self);
        remaining
    }

    /// Writable view of the whole slot, only while exclusively owned
    pub fn get_mut(&mut self) -> Option<RefMut<'_, [u8]>> {
        if self.is_shared() {
            return None;
        }
        Some(RefMut::map(self.slot().data.borrow_mut(), |data| &mut data[..]))
    }

    /// Record how many bytes of the slot hold the datagram
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(!self.is_shared(), "resizing a shared packet buffer");
        let slot = self.slot();
        slot.len.set(len.min(slot.data.borrow().len()));
    }

    /// Length of the stored datagram
    pub fn len(&self) -> usize {
        self.slot().len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored datagram
    pub fn bytes(&self) -> Ref<'_, [u8]> {
        let len = self.len();
        Ref::map(self.slot().data.borrow(), |data| &data[..len])
    }
}

impl Clone for PacketBuf {
    fn clone(&self) -> Self {
        let slot = self.slot();
        slot.refs.set(slot.refs.get() + 1);
        Self {
            arena: Rc::clone(&self.arena),
            index: self.index,
        }
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let slot = &self.arena.slots[self.index];
        let refs = slot.refs.get() - 1;
        slot.refs.set(refs);
        if refs == 0 {
            self.arena.free.borrow_mut().push(self.index);
        }
    }
}

impl std::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuf")
            .field("slot", &self.index)
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}
