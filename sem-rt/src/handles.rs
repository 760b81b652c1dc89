use std::sync::{Arc, Mutex};

use sem_asm::{HandleFlags, ZiError};

use crate::guest_mem::{GuestMemory, GuestPtr};

/// A non-negative handle index. Slots 0/1/2 are reserved for stdio.
pub type Handle = i32;

/// First slot the allocation cursor may hand out.
pub const FIRST_DYNAMIC_HANDLE: Handle = 3;

/// Stream-like operations a handle slot can implement.
///
/// Defaults return `Nosys`; a slot only implements what its flags claim.
/// All guest buffers are mapped through the arena by the implementation.
pub trait StreamOps {
    /// Reads up to `cap` bytes into guest memory at `dst`.
    fn read(
        &mut self,
        mem: &mut GuestMemory,
        dst: GuestPtr,
        cap: u32,
    ) -> Result<u32, ZiError> {
        let _ = (mem, dst, cap);
        Err(ZiError::Nosys)
    }

    /// Writes `len` bytes from guest memory at `src`.
    fn write(
        &mut self,
        mem: &mut GuestMemory,
        src: GuestPtr,
        len: u32,
    ) -> Result<u32, ZiError> {
        let _ = (mem, src, len);
        Err(ZiError::Nosys)
    }

    /// Ends the stream, flushing or closing the backing resource.
    fn end(&mut self, mem: &mut GuestMemory) -> Result<(), ZiError> {
        let _ = mem;
        Ok(())
    }
}

/// One installed handle slot.
pub struct HandleEntry {
    /// The slot's operations.
    pub ops: Box<dyn StreamOps>,
    /// Capability flags consistent with the implemented ops.
    pub flags: HandleFlags,
}

impl HandleEntry {
    /// Convenience constructor.
    pub fn new(ops: Box<dyn StreamOps>, flags: HandleFlags) -> Self {
        Self { ops, flags }
    }
}

impl std::fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleEntry")
            .field("flags", &self.flags)
            .finish()
    }
}

/// Fixed-capacity slot table with a rolling allocation cursor.
///
/// The cursor starts at slot 3 and wraps back to 3; stdio slots are
/// installable but never allocatable or releasable.
pub struct HandleTable {
    slots: Vec<Option<HandleEntry>>,
    next: Handle,
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("slots", &self.slots)
            .field("next", &self.next)
            .finish()
    }
}

impl HandleTable {
    /// Creates a table with `cap` slots (`cap >= 4`).
    pub fn new(cap: u32) -> Result<Self, ZiError> {
        if cap < 4 {
            return Err(ZiError::Invalid);
        }
        let mut slots = Vec::new();
        slots.resize_with(cap as usize, || None);
        Ok(Self {
            slots,
            next: FIRST_DYNAMIC_HANDLE,
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn index(&self, h: Handle) -> Option<usize> {
        if h < 0 {
            return None;
        }
        let i = h as usize;
        (i < self.slots.len()).then_some(i)
    }

    /// Installs an entry at a fixed slot, replacing any previous occupant.
    pub fn install(&mut self, h: Handle, entry: HandleEntry) -> Result<(), ZiError> {
        let i = self.index(h).ok_or(ZiError::Invalid)?;
        self.slots[i] = Some(entry);
        Ok(())
    }

    /// Allocates the first empty slot scanning from the rolling cursor.
    /// A full table yields `Oom`.
    pub fn alloc(&mut self, entry: HandleEntry) -> Result<Handle, ZiError> {
        for _ in 0..self.slots.len() {
            let h = self.next;
            self.next += 1;
            if self.next >= self.capacity() as Handle {
                self.next = FIRST_DYNAMIC_HANDLE;
            }
            let Some(i) = self.index(h) else { continue };
            if self.slots[i].is_none() {
                self.slots[i] = Some(entry);
                return Ok(h);
            }
        }
        Err(ZiError::Oom)
    }

    /// Borrows an occupied slot.
    pub fn get_mut(&mut self, h: Handle) -> Option<&mut HandleEntry> {
        let i = self.index(h)?;
        self.slots[i].as_mut()
    }

    /// Flags of an occupied slot; empty or out-of-range slots report none.
    pub fn flags(&self, h: Handle) -> HandleFlags {
        self.index(h)
            .and_then(|i| self.slots[i].as_ref())
            .map(|e| e.flags)
            .unwrap_or_else(HandleFlags::empty)
    }

    /// Releases a dynamic slot. Stdio slots are not releasable; releasing
    /// an empty slot fails.
    pub fn release(&mut self, h: Handle) -> Result<HandleEntry, ZiError> {
        let i = self.index(h).ok_or(ZiError::Invalid)?;
        if self.slots[i].is_none() {
            return Err(ZiError::Invalid);
        }
        if (0..FIRST_DYNAMIC_HANDLE).contains(&h) {
            return Err(ZiError::Denied);
        }
        Ok(self.slots[i].take().expect("slot checked occupied"))
    }

    /// Iterates occupied slot indices, lowest first.
    pub fn occupied(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as Handle)
    }
}

/// Read-only stream over an owned byte buffer.
///
/// Backs the `proc/argv` and `proc/env` capability handles; `end` drops
/// the buffer.
pub struct BlobStream {
    buf: Vec<u8>,
    off: usize,
}

impl BlobStream {
    /// Wraps a buffer into a readable stream positioned at the start.
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, off: 0 }
    }
}

impl StreamOps for BlobStream {
    fn read(
        &mut self,
        mem: &mut GuestMemory,
        dst: GuestPtr,
        cap: u32,
    ) -> Result<u32, ZiError> {
        if cap == 0 || self.off >= self.buf.len() {
            return Ok(0);
        }
        let remain = self.buf.len() - self.off;
        let n = remain.min(cap as usize);
        let out = mem.map_rw(dst, n as u32)?;
        out.copy_from_slice(&self.buf[self.off..self.off + n]);
        self.off += n;
        Ok(n as u32)
    }

    fn end(&mut self, _mem: &mut GuestMemory) -> Result<(), ZiError> {
        self.buf = Vec::new();
        self.off = 0;
        Ok(())
    }
}

/// Write-only stream that appends into a shared buffer.
///
/// Lets embedders and tests observe guest output without touching real
/// stdio.
pub struct CaptureStream {
    sink: Arc<Mutex<Vec<u8>>>,
}

impl CaptureStream {
    /// Creates a capture stream and returns it with its shared sink.
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        (Self { sink: sink.clone() }, sink)
    }
}

impl StreamOps for CaptureStream {
    fn write(
        &mut self,
        mem: &mut GuestMemory,
        src: GuestPtr,
        len: u32,
    ) -> Result<u32, ZiError> {
        if len == 0 {
            return Ok(0);
        }
        let bytes = mem.map_ro(src, len)?;
        self.sink
            .lock()
            .map_err(|_| ZiError::Internal)?
            .extend_from_slice(bytes);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(flags: HandleFlags) -> HandleEntry {
        struct Nop;
        impl StreamOps for Nop {}
        HandleEntry::new(Box::new(Nop), flags)
    }

    #[test]
    fn requires_room_for_stdio() {
        assert_eq!(HandleTable::new(3).unwrap_err(), ZiError::Invalid);
        assert!(HandleTable::new(4).is_ok());
    }

    #[test]
    fn cursor_starts_at_three_and_wraps() {
        let mut t = HandleTable::new(5).unwrap();
        assert_eq!(t.alloc(entry(HandleFlags::READABLE)).unwrap(), 3);
        assert_eq!(t.alloc(entry(HandleFlags::READABLE)).unwrap(), 4);
        assert_eq!(
            t.alloc(entry(HandleFlags::READABLE)).unwrap_err(),
            ZiError::Oom
        );
        t.release(3).unwrap();
        assert_eq!(t.alloc(entry(HandleFlags::READABLE)).unwrap(), 3);
    }

    #[test]
    fn stdio_slots_are_installable_but_not_releasable() {
        let mut t = HandleTable::new(8).unwrap();
        t.install(1, entry(HandleFlags::WRITABLE)).unwrap();
        assert_eq!(t.release(1).unwrap_err(), ZiError::Denied);
        assert_eq!(t.release(0).unwrap_err(), ZiError::Invalid); // empty
        assert_eq!(t.release(-1).unwrap_err(), ZiError::Invalid);
        assert_eq!(t.release(99).unwrap_err(), ZiError::Invalid);
    }

    #[test]
    fn flags_of_empty_slot_are_empty() {
        let mut t = HandleTable::new(8).unwrap();
        assert!(t.flags(3).is_empty());
        let h = t
            .alloc(entry(HandleFlags::READABLE | HandleFlags::ENDABLE))
            .unwrap();
        assert_eq!(t.flags(h), HandleFlags::READABLE | HandleFlags::ENDABLE);
        t.release(h).unwrap();
        assert!(t.flags(h).is_empty());
        assert!(t.get_mut(h).is_none());
    }

    #[test]
    fn blob_stream_reads_in_chunks_until_drained() {
        let mut mem = GuestMemory::new(256, 0x1000).unwrap();
        let dst = mem.alloc(16, 16);
        let mut s = BlobStream::new(b"hello world".to_vec());
        assert_eq!(s.read(&mut mem, dst, 5).unwrap(), 5);
        assert_eq!(mem.map_ro(dst, 5).unwrap(), b"hello");
        assert_eq!(s.read(&mut mem, dst, 16).unwrap(), 6);
        assert_eq!(mem.map_ro(dst, 6).unwrap(), b" world");
        assert_eq!(s.read(&mut mem, dst, 16).unwrap(), 0);
    }
}
