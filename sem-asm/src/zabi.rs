use core::fmt;

/// Default zABI surface version reported by `abi_version`.
pub const ABI_VERSION: u32 = 0x0002_0005;

/// Numeric zABI error taxonomy.
///
/// Codes are stable and wire-visible: syscalls return them as negative
/// `i32` values, and the capability host maps them to `sem.zi_ctl.*`
/// trace ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(i32)]
pub enum ZiError {
    /// Malformed argument, request or operand shape.
    Invalid = -1,
    /// Guest pointer or index outside the valid range.
    Bounds = -2,
    /// Named entity does not exist.
    Noent = -3,
    /// Operation refused by policy or capability flags.
    Denied = -4,
    /// Handle or descriptor is closed.
    Closed = -5,
    /// Operation would block; retry later.
    Again = -6,
    /// Operation not implemented for this target.
    Nosys = -7,
    /// Allocation failed or table is full.
    Oom = -8,
    /// Underlying I/O failure.
    Io = -9,
    /// Invariant violation inside the runtime itself.
    Internal = -10,
}

impl ZiError {
    /// The stable negative wire code.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Short lowercase name used in trace ids (`sem.zi_ctl.<name>`).
    pub const fn name(self) -> &'static str {
        match self {
            ZiError::Invalid => "invalid",
            ZiError::Bounds => "bounds",
            ZiError::Noent => "noent",
            ZiError::Denied => "denied",
            ZiError::Closed => "closed",
            ZiError::Again => "again",
            ZiError::Nosys => "nosys",
            ZiError::Oom => "oom",
            ZiError::Io => "io",
            ZiError::Internal => "internal",
        }
    }

    /// Decodes a wire code back into the taxonomy.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(ZiError::Invalid),
            -2 => Some(ZiError::Bounds),
            -3 => Some(ZiError::Noent),
            -4 => Some(ZiError::Denied),
            -5 => Some(ZiError::Closed),
            -6 => Some(ZiError::Again),
            -7 => Some(ZiError::Nosys),
            -8 => Some(ZiError::Oom),
            -9 => Some(ZiError::Io),
            -10 => Some(ZiError::Internal),
            _ => None,
        }
    }

    /// Maps an OS errno to the taxonomy. Unknown errnos map to `Io`.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EAGAIN => ZiError::Again,
            #[allow(unreachable_patterns)] // EWOULDBLOCK == EAGAIN on Linux
            libc::EWOULDBLOCK => ZiError::Again,
            libc::EBADF => ZiError::Closed,
            libc::EACCES | libc::EPERM | libc::ELOOP => ZiError::Denied,
            libc::ENOENT | libc::ENOTDIR => ZiError::Noent,
            libc::EISDIR => ZiError::Invalid,
            libc::ENOMEM => ZiError::Oom,
            _ => ZiError::Io,
        }
    }

    /// Maps an `std::io::Error` through its raw OS errno when present.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => ZiError::Io,
        }
    }
}

impl fmt::Display for ZiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl std::error::Error for ZiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn codes_round_trip() {
        for e in ZiError::iter() {
            assert_eq!(ZiError::from_code(e.code()), Some(e));
            assert!(e.code() <= -1 && e.code() >= -10);
        }
        assert_eq!(ZiError::from_code(0), None);
        assert_eq!(ZiError::from_code(-11), None);
    }

    #[test]
    fn errno_mapping_matches_taxonomy() {
        assert_eq!(ZiError::from_errno(libc::EAGAIN), ZiError::Again);
        assert_eq!(ZiError::from_errno(libc::EBADF), ZiError::Closed);
        assert_eq!(ZiError::from_errno(libc::EACCES), ZiError::Denied);
        assert_eq!(ZiError::from_errno(libc::EPERM), ZiError::Denied);
        assert_eq!(ZiError::from_errno(libc::ELOOP), ZiError::Denied);
        assert_eq!(ZiError::from_errno(libc::ENOENT), ZiError::Noent);
        assert_eq!(ZiError::from_errno(libc::ENOTDIR), ZiError::Noent);
        assert_eq!(ZiError::from_errno(libc::EISDIR), ZiError::Invalid);
        assert_eq!(ZiError::from_errno(libc::ENOMEM), ZiError::Oom);
        assert_eq!(ZiError::from_errno(libc::EPIPE), ZiError::Io);
    }
}
