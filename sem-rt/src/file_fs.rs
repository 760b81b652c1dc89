use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use sem_asm::{FileOpenFlags, HandleFlags, ZiError};
use tracing::debug;

use crate::guest_mem::{GuestMemory, GuestPtr};
use crate::handles::{Handle, HandleEntry, HandleTable, StreamOps};
use crate::zcl1;

/// Packed open-params record size: `u64 path_ptr, u32 path_len,
/// u32 open_flags, u32 create_mode`.
const OPEN_PARAMS_MIN: u32 = 20;

/// Longest single path segment accepted.
const MAX_SEGMENT: usize = 255;

/// Sandboxed `file/fs` capability provider.
///
/// All guest paths resolve component-by-component under `fs_root` with
/// `O_NOFOLLOW` at every step, so neither symlinks nor `..` can escape the
/// sandbox. Without a configured root the capability is denied outright.
pub struct FileFs {
    root: Option<PathBuf>,
}

impl FileFs {
    /// Creates the provider. An empty root disables it.
    pub fn new(root: Option<PathBuf>) -> Self {
        let root = root.filter(|p| !p.as_os_str().is_empty());
        Self { root }
    }

    /// Whether a sandbox root is configured.
    pub fn enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Opens a file from the packed guest params record and registers a
    /// stream handle for it.
    pub fn open_from_params(
        &self,
        handles: &mut HandleTable,
        mem: &GuestMemory,
        params_ptr: GuestPtr,
        params_len: u32,
    ) -> Result<Handle, ZiError> {
        let root = self.root.as_ref().ok_or(ZiError::Denied)?;
        if params_len < OPEN_PARAMS_MIN {
            return Err(ZiError::Invalid);
        }
        let params = mem.map_ro(params_ptr, params_len)?;
        let path_ptr = zcl1::read_u64_le(params, 0);
        let path_len = zcl1::read_u32_le(params, 8);
        let oflags = zcl1::read_u32_le(params, 12);
        let create_mode = zcl1::read_u32_le(params, 16);

        if path_len == 0 {
            return Err(ZiError::Invalid);
        }
        let path = mem.map_ro(path_ptr, path_len)?;
        if path.contains(&0) {
            return Err(ZiError::Invalid);
        }

        let oflags = FileOpenFlags::from_bits(oflags).ok_or(ZiError::Invalid)?;
        let want_r = oflags.contains(FileOpenFlags::READ);
        let want_w = oflags.contains(FileOpenFlags::WRITE);
        if !want_r && !want_w {
            return Err(ZiError::Invalid);
        }
        if oflags.intersects(FileOpenFlags::TRUNC | FileOpenFlags::APPEND) && !want_w {
            return Err(ZiError::Invalid);
        }

        let mut os_flags = if want_r && want_w {
            libc::O_RDWR
        } else if want_w {
            libc::O_WRONLY
        } else {
            libc::O_RDONLY
        };
        if oflags.contains(FileOpenFlags::CREATE) {
            os_flags |= libc::O_CREAT;
        }
        if oflags.contains(FileOpenFlags::TRUNC) {
            os_flags |= libc::O_TRUNC;
        }
        if oflags.contains(FileOpenFlags::APPEND) {
            os_flags |= libc::O_APPEND;
        }
        let mode = if create_mode != 0 { create_mode } else { 0o644 };

        let fd = open_under_root(root, path, os_flags, mode)?;
        debug!(target: "sem_rt::file_fs", path_len, flags = oflags.bits(), "opened sandboxed file");

        let mut hflags = HandleFlags::ENDABLE;
        if want_r {
            hflags |= HandleFlags::READABLE;
        }
        if want_w {
            hflags |= HandleFlags::WRITABLE;
        }
        handles.alloc(HandleEntry::new(
            Box::new(FdStream { file: File::from(fd) }),
            hflags,
        ))
    }
}

/// Walks `path` under `root`, opening each directory segment with
/// `O_NOFOLLOW` and the final segment with the translated flags.
fn open_under_root(
    root: &PathBuf,
    path: &[u8],
    flags: libc::c_int,
    mode: u32,
) -> Result<OwnedFd, ZiError> {
    // Absolute guest paths only.
    if path.first() != Some(&b'/') {
        return Err(ZiError::Invalid);
    }

    let root_c = CString::new(root.as_os_str().as_encoded_bytes()).map_err(|_| ZiError::Invalid)?;
    let root_fd = unsafe {
        libc::open(
            root_c.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if root_fd < 0 {
        return Err(ZiError::from_errno(last_errno()));
    }
    let root_fd = unsafe { OwnedFd::from_raw_fd(root_fd) };

    let mut dir = None::<OwnedFd>;
    let mut segments = path[1..].split(|b: &u8| *b == b'/').filter(|s: &&[u8]| !s.is_empty());

    while let Some(seg) = segments.next() {
        if seg.len() > MAX_SEGMENT {
            return Err(ZiError::Invalid);
        }
        if seg == b"." {
            continue;
        }
        if seg == b".." {
            return Err(ZiError::Denied);
        }
        let seg_c = CString::new(seg).map_err(|_| ZiError::Invalid)?;
        let at: RawFd = dir
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .unwrap_or_else(|| root_fd.as_raw_fd());

        // Peek past `.` segments to decide whether this one is final.
        let is_last = {
            let mut rest = segments.clone();
            !rest.any(|s| s != b".")
        };

        if !is_last {
            let next = unsafe {
                libc::openat(
                    at,
                    seg_c.as_ptr(),
                    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                )
            };
            if next < 0 {
                return Err(ZiError::from_errno(last_errno()));
            }
            dir = Some(unsafe { OwnedFd::from_raw_fd(next) });
            continue;
        }

        let open_flags = flags | libc::O_NOFOLLOW | libc::O_CLOEXEC;
        let fd = if open_flags & libc::O_CREAT != 0 {
            unsafe { libc::openat(at, seg_c.as_ptr(), open_flags, mode as libc::c_uint) }
        } else {
            unsafe { libc::openat(at, seg_c.as_ptr(), open_flags) }
        };
        if fd < 0 {
            return Err(ZiError::from_errno(last_errno()));
        }
        return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
    }

    // Path had no final segment ("/", trailing slashes, or only dots).
    Err(ZiError::Invalid)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Stream over an opened sandboxed file descriptor.
struct FdStream {
    file: File,
}

impl StreamOps for FdStream {
    fn read(&mut self, mem: &mut GuestMemory, dst: GuestPtr, cap: u32) -> Result<u32, ZiError> {
        if cap == 0 {
            return Ok(0);
        }
        let buf = mem.map_rw(dst, cap)?;
        let n = self.file.read(buf).map_err(|e| ZiError::from_io(&e))?;
        Ok(n as u32)
    }

    fn write(&mut self, mem: &mut GuestMemory, src: GuestPtr, len: u32) -> Result<u32, ZiError> {
        if len == 0 {
            return Ok(0);
        }
        let buf = mem.map_ro(src, len)?;
        let n = self.file.write(buf).map_err(|e| ZiError::from_io(&e))?;
        Ok(n as u32)
    }

    fn end(&mut self, _mem: &mut GuestMemory) -> Result<(), ZiError> {
        self.file.flush().map_err(|e| ZiError::from_io(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sem_asm::HandleFlags;

    fn params(mem: &mut GuestMemory, path: &[u8], flags: FileOpenFlags, mode: u32) -> GuestPtr {
        let path_ptr = mem.alloc(path.len() as u32, 16);
        mem.map_rw(path_ptr, path.len() as u32)
            .unwrap()
            .copy_from_slice(path);
        let mut rec = Vec::new();
        zcl1::put_u64_le(&mut rec, path_ptr);
        zcl1::put_u32_le(&mut rec, path.len() as u32);
        zcl1::put_u32_le(&mut rec, flags.bits());
        zcl1::put_u32_le(&mut rec, mode);
        let rec_ptr = mem.alloc(rec.len() as u32, 16);
        mem.map_rw(rec_ptr, rec.len() as u32)
            .unwrap()
            .copy_from_slice(&rec);
        rec_ptr
    }

    fn fixture() -> (tempfile::TempDir, FileFs, HandleTable, GuestMemory) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/data.txt"), b"payload").unwrap();
        let fs = FileFs::new(Some(dir.path().to_path_buf()));
        let handles = HandleTable::new(16).unwrap();
        let mem = GuestMemory::new(1 << 16, 0x10000).unwrap();
        (dir, fs, handles, mem)
    }

    #[test]
    fn opens_and_reads_a_sandboxed_file() {
        let (_dir, fs, mut handles, mut mem) = fixture();
        let p = params(&mut mem, b"/sub/data.txt", FileOpenFlags::READ, 0);
        let h = fs.open_from_params(&mut handles, &mem, p, 20).unwrap();
        assert!(h >= 3);
        assert_eq!(
            handles.flags(h),
            HandleFlags::READABLE | HandleFlags::ENDABLE
        );
        let dst = mem.alloc(16, 16);
        let entry = handles.get_mut(h).unwrap();
        let n = entry.ops.read(&mut mem, dst, 16).unwrap();
        assert_eq!(mem.map_ro(dst, n).unwrap(), b"payload");
    }

    #[test]
    fn dotdot_segments_are_denied() {
        let (_dir, fs, mut handles, mut mem) = fixture();
        let p = params(&mut mem, b"/sub/../sub/data.txt", FileOpenFlags::READ, 0);
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Denied
        );
    }

    #[test]
    fn symlink_segments_are_denied() {
        let (dir, fs, mut handles, mut mem) = fixture();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("link")).unwrap();
        let p = params(&mut mem, b"/link/data.txt", FileOpenFlags::READ, 0);
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Denied
        );
    }

    #[test]
    fn relative_paths_are_invalid() {
        let (_dir, fs, mut handles, mut mem) = fixture();
        let p = params(&mut mem, b"sub/data.txt", FileOpenFlags::READ, 0);
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Invalid
        );
    }

    #[test]
    fn missing_files_map_to_noent() {
        let (_dir, fs, mut handles, mut mem) = fixture();
        let p = params(&mut mem, b"/sub/absent.txt", FileOpenFlags::READ, 0);
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Noent
        );
    }

    #[test]
    fn create_and_write_round_trip() {
        let (dir, fs, mut handles, mut mem) = fixture();
        let p = params(
            &mut mem,
            b"/sub/out.txt",
            FileOpenFlags::WRITE | FileOpenFlags::CREATE,
            0o600,
        );
        let h = fs.open_from_params(&mut handles, &mem, p, 20).unwrap();
        let src = mem.alloc(4, 16);
        mem.map_rw(src, 4).unwrap().copy_from_slice(b"abcd");
        let entry = handles.get_mut(h).unwrap();
        assert_eq!(entry.ops.write(&mut mem, src, 4).unwrap(), 4);
        entry.ops.end(&mut mem).unwrap();
        handles.release(h).unwrap();
        assert_eq!(std::fs::read(dir.path().join("sub/out.txt")).unwrap(), b"abcd");
    }

    #[test]
    fn trunc_without_write_is_invalid() {
        let (_dir, fs, mut handles, mut mem) = fixture();
        let p = params(
            &mut mem,
            b"/sub/data.txt",
            FileOpenFlags::READ | FileOpenFlags::TRUNC,
            0,
        );
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Invalid
        );
    }

    #[test]
    fn disabled_without_root() {
        let fs = FileFs::new(None);
        let mut handles = HandleTable::new(8).unwrap();
        let mut mem = GuestMemory::new(4096, 0x10000).unwrap();
        let p = params(&mut mem, b"/x", FileOpenFlags::READ, 0);
        assert_eq!(
            fs.open_from_params(&mut handles, &mem, p, 20).unwrap_err(),
            ZiError::Denied
        );
    }
}
