use bitflags::bitflags;

bitflags! {
    /// Capability flags of an installed handle slot.
    ///
    /// A slot's flags must be consistent with the ops it implements; the
    /// runtime refuses reads from non-readable slots and writes to
    /// non-writable ones before ever reaching the ops.
    pub struct HandleFlags: u32 {
        /// `read` is allowed.
        const READABLE = 1 << 0;
        /// `write` is allowed.
        const WRITABLE = 1 << 1;
        /// `end` is allowed.
        const ENDABLE = 1 << 2;
        /// Seeking is allowed (reserved; no seek op in the core surface).
        const SEEKABLE = 1 << 3;
    }
}

bitflags! {
    /// Flags of a configured capability record.
    pub struct CapFlags: u32 {
        /// The capability can be opened into a handle via `cap_open`.
        const CAN_OPEN = 1 << 0;
        /// Opening has no observable side effects.
        const PURE = 1 << 1;
        /// Operations on the opened handle may block.
        const MAY_BLOCK = 1 << 2;
    }
}

bitflags! {
    /// `file/fs` open flags carried in the packed open-params record.
    pub struct FileOpenFlags: u32 {
        /// Open for reading.
        const READ = 1 << 0;
        /// Open for writing.
        const WRITE = 1 << 1;
        /// Create the file if missing.
        const CREATE = 1 << 2;
        /// Truncate on open (requires WRITE).
        const TRUNC = 1 << 3;
        /// Append on write (requires WRITE).
        const APPEND = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_are_stable() {
        assert_eq!(HandleFlags::READABLE.bits(), 1);
        assert_eq!(HandleFlags::WRITABLE.bits(), 2);
        assert_eq!(HandleFlags::ENDABLE.bits(), 4);
        assert_eq!(HandleFlags::SEEKABLE.bits(), 8);
        assert_eq!(CapFlags::CAN_OPEN.bits(), 1);
        assert_eq!(FileOpenFlags::APPEND.bits(), 16);
    }
}
