use std::io::{Read, Write};
use std::path::PathBuf;

use sem_asm::{CapFlags, HandleFlags, ZiError, ABI_VERSION};
use tracing::{debug, trace};

use crate::file_fs::FileFs;
use crate::guest_mem::{GuestMemory, GuestPtr};
use crate::handles::{BlobStream, Handle, HandleEntry, HandleTable, StreamOps};
use crate::host::{Capability, CapabilityHost, HostConfig};
use crate::zcl1;

/// Fixed size of the packed `cap_open` request record.
const CAP_OPEN_REQ_LEN: u32 = 40;

/// Handle slot capacity of a hosted runtime.
const HANDLE_CAP: u32 = 4096;

/// Hosted runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Reported zABI version.
    pub abi_version: u32,
    /// Guest arena capacity in bytes.
    pub mem_cap: u32,
    /// Guest arena base address.
    pub mem_base: u64,
    /// Capabilities exposed to guests.
    pub caps: Vec<Capability>,
    /// Whether `proc/argv` may be opened and the argv ctl ops answered.
    pub argv_enabled: bool,
    /// The argv snapshot.
    pub argv: Vec<String>,
    /// Whether `proc/env` may be opened and the env ctl ops answered.
    pub env_enabled: bool,
    /// The env snapshot.
    pub env: Vec<(String, String)>,
    /// Sandbox root for the `file/fs` capability; `None` disables it.
    pub fs_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            abi_version: ABI_VERSION,
            mem_cap: 16 * 1024 * 1024,
            mem_base: 0x10000,
            caps: Vec::new(),
            argv_enabled: false,
            argv: Vec::new(),
            env_enabled: false,
            env: Vec::new(),
            fs_root: None,
        }
    }
}

/// The host surface the SIR interpreter executes against.
///
/// Splits guest memory access from the syscall dispatch so an interpreter
/// can hold one `&mut dyn SirHost` for both.
pub trait SirHost {
    /// The guest arena.
    fn mem(&self) -> &GuestMemory;
    /// The guest arena, mutably.
    fn mem_mut(&mut self) -> &mut GuestMemory;
    /// `zi_write`: write guest bytes to a handle.
    fn zi_write(&mut self, h: Handle, src: GuestPtr, len: u32) -> Result<u32, ZiError>;
    /// `zi_end`: end a handle, releasing dynamic slots.
    fn zi_end(&mut self, h: Handle) -> Result<(), ZiError>;
    /// `zi_alloc`: bump-allocate with the default alignment; 0 on failure.
    fn zi_alloc(&mut self, size: u32) -> GuestPtr;
    /// `zi_free`: shape-validated no-op free.
    fn zi_free(&mut self, ptr: GuestPtr) -> Result<(), ZiError>;
    /// `zi_telemetry`: best-effort diagnostic line.
    fn zi_telemetry(
        &mut self,
        topic_ptr: GuestPtr,
        topic_len: u32,
        msg_ptr: GuestPtr,
        msg_len: u32,
    ) -> Result<(), ZiError>;
}

/// Stream over a host stdio endpoint.
enum StdioStream {
    In,
    Out,
    Err,
}

impl StreamOps for StdioStream {
    fn read(&mut self, mem: &mut GuestMemory, dst: GuestPtr, cap: u32) -> Result<u32, ZiError> {
        if cap == 0 {
            return Ok(0);
        }
        let buf = mem.map_rw(dst, cap)?;
        match self {
            StdioStream::In => std::io::stdin()
                .read(buf)
                .map(|n| n as u32)
                .map_err(|e| ZiError::from_io(&e)),
            _ => Err(ZiError::Nosys),
        }
    }

    fn write(&mut self, mem: &mut GuestMemory, src: GuestPtr, len: u32) -> Result<u32, ZiError> {
        if len == 0 {
            return Ok(0);
        }
        let buf = mem.map_ro(src, len)?;
        let write_all = |w: &mut dyn Write| -> Result<u32, ZiError> {
            w.write_all(buf).map_err(|e| ZiError::from_io(&e))?;
            let _ = w.flush();
            Ok(len)
        };
        match self {
            StdioStream::Out => write_all(&mut std::io::stdout()),
            StdioStream::Err => write_all(&mut std::io::stderr()),
            StdioStream::In => Err(ZiError::Nosys),
        }
    }

    fn end(&mut self, _mem: &mut GuestMemory) -> Result<(), ZiError> {
        match self {
            StdioStream::Out => {
                let _ = std::io::stdout().flush();
            }
            StdioStream::Err => {
                let _ = std::io::stderr().flush();
            }
            StdioStream::In => {}
        }
        Ok(())
    }
}

/// Hosted implementation of the zABI call surface.
///
/// Owns the guest arena, the handle table (stdio preinstalled at 0/1/2),
/// the capability host and the `file/fs` sandbox. Guest pointers in every
/// syscall are validated and mapped through the arena before use.
pub struct HostedRuntime {
    mem: GuestMemory,
    handles: HandleTable,
    host: CapabilityHost,
    fs: FileFs,
    abi_version: u32,
}

impl HostedRuntime {
    /// Initializes arena, handle table, capability host and stdio.
    pub fn new(cfg: RuntimeConfig) -> Result<Self, ZiError> {
        let mem = GuestMemory::new(cfg.mem_cap, cfg.mem_base)?;
        let mut handles = HandleTable::new(HANDLE_CAP)?;
        handles.install(
            0,
            HandleEntry::new(
                Box::new(StdioStream::In),
                HandleFlags::READABLE | HandleFlags::ENDABLE,
            ),
        )?;
        handles.install(
            1,
            HandleEntry::new(
                Box::new(StdioStream::Out),
                HandleFlags::WRITABLE | HandleFlags::ENDABLE,
            ),
        )?;
        handles.install(
            2,
            HandleEntry::new(
                Box::new(StdioStream::Err),
                HandleFlags::WRITABLE | HandleFlags::ENDABLE,
            ),
        )?;
        let host = CapabilityHost::new(HostConfig {
            caps: cfg.caps,
            argv_enabled: cfg.argv_enabled,
            argv: cfg.argv,
            env_enabled: cfg.env_enabled,
            env: cfg.env,
        });
        Ok(Self {
            mem,
            handles,
            host,
            fs: FileFs::new(cfg.fs_root),
            abi_version: cfg.abi_version,
        })
    }

    /// `abi_version`.
    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    /// The guest arena.
    pub fn mem(&self) -> &GuestMemory {
        &self.mem
    }

    /// The guest arena, mutably.
    pub fn mem_mut(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    /// The handle table; embedders may install extra streams.
    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.handles
    }

    /// `ctl`: maps the request and response buffers and routes to the
    /// capability host. Returns bytes written into the response buffer.
    pub fn ctl(
        &mut self,
        req_ptr: GuestPtr,
        req_len: u32,
        resp_ptr: GuestPtr,
        resp_cap: u32,
    ) -> Result<u32, ZiError> {
        if (req_len as usize) < zcl1::HDR_SIZE {
            return Err(ZiError::Invalid);
        }
        let req = self.mem.map_ro(req_ptr, req_len)?.to_vec();
        // Validate the response window up front so a bad pointer fails
        // with bounds rather than after the host ran.
        self.mem.map_rw(resp_ptr, resp_cap)?;
        let mut resp = vec![0u8; resp_cap as usize];
        let n = self.host.ctl(&req, &mut resp)?;
        let out = self.mem.map_rw(resp_ptr, n)?;
        out.copy_from_slice(&resp[..n as usize]);
        trace!(target: "sem_rt::runtime", op = "ctl", bytes = n, "control op served");
        Ok(n)
    }

    /// `read`: dispatches through the slot's ops after a flags check.
    pub fn read(&mut self, h: Handle, dst_ptr: GuestPtr, cap: u32) -> Result<u32, ZiError> {
        let entry = self.handles.get_mut(h).ok_or(ZiError::Nosys)?;
        if !entry.flags.contains(HandleFlags::READABLE) {
            return Err(ZiError::Nosys);
        }
        entry.ops.read(&mut self.mem, dst_ptr, cap)
    }

    /// `write`: dispatches through the slot's ops after a flags check.
    pub fn write(&mut self, h: Handle, src_ptr: GuestPtr, len: u32) -> Result<u32, ZiError> {
        let entry = self.handles.get_mut(h).ok_or(ZiError::Nosys)?;
        if !entry.flags.contains(HandleFlags::WRITABLE) {
            return Err(ZiError::Nosys);
        }
        entry.ops.write(&mut self.mem, src_ptr, len)
    }

    /// `end`: runs the slot's end op, then releases dynamic slots.
    pub fn end(&mut self, h: Handle) -> Result<(), ZiError> {
        let entry = self.handles.get_mut(h).ok_or(ZiError::Nosys)?;
        let r = entry.ops.end(&mut self.mem);
        if h >= crate::handles::FIRST_DYNAMIC_HANDLE {
            let _ = self.handles.release(h);
        }
        r
    }

    /// `alloc` with the default alignment of 16. Returns 0 on failure.
    pub fn alloc(&mut self, size: u32) -> GuestPtr {
        self.mem.alloc(size, GuestMemory::DEFAULT_ALIGN)
    }

    /// `free`: shape-validated no-op.
    pub fn free(&mut self, ptr: GuestPtr) -> Result<(), ZiError> {
        self.mem.free(ptr)
    }

    /// `telemetry`: maps both buffers and emits one best-effort line.
    /// The format is not stable; guests must not depend on it.
    pub fn telemetry(
        &mut self,
        topic_ptr: GuestPtr,
        topic_len: u32,
        msg_ptr: GuestPtr,
        msg_len: u32,
    ) -> Result<(), ZiError> {
        let topic = self.mem.map_ro(topic_ptr, topic_len)?;
        let topic = String::from_utf8_lossy(topic).into_owned();
        let msg = self.mem.map_ro(msg_ptr, msg_len)?;
        let msg = String::from_utf8_lossy(msg).into_owned();
        debug!(target: "sem_rt::telemetry", topic = %topic, message = %msg);
        eprintln!("telemetry[{topic}]: {msg}");
        Ok(())
    }

    /// `hflags`: flags of a slot; empty slots report none.
    pub fn hflags(&self, h: Handle) -> u32 {
        self.handles.flags(h).bits()
    }

    /// `cap_count`.
    pub fn cap_count(&self) -> i32 {
        self.host.caps().len() as i32
    }

    /// `cap_get_size`: serialized size of one capability entry.
    pub fn cap_get_size(&self, index: i32) -> Result<u32, ZiError> {
        if index < 0 {
            return Err(ZiError::Noent);
        }
        let cap = self
            .host
            .caps()
            .get(index as usize)
            .ok_or(ZiError::Noent)?;
        Ok(cap.wire_size() as u32)
    }

    /// `cap_get`: writes one serialized capability entry into guest memory.
    pub fn cap_get(&mut self, index: i32, out_ptr: GuestPtr, out_cap: u32) -> Result<u32, ZiError> {
        let need = self.cap_get_size(index)?;
        if need > out_cap {
            return Err(ZiError::Bounds);
        }
        let mut body = Vec::with_capacity(need as usize);
        self.host.caps()[index as usize].encode(&mut body);
        debug_assert_eq!(body.len() as u32, need);
        let out = self.mem.map_rw(out_ptr, need)?;
        out.copy_from_slice(&body);
        Ok(need)
    }

    /// `cap_open`: reads the fixed 40-byte packed request and opens a
    /// capability into a new handle.
    pub fn cap_open(&mut self, req_ptr: GuestPtr) -> Result<Handle, ZiError> {
        let req = self.mem.map_ro(req_ptr, CAP_OPEN_REQ_LEN)?;
        let kind_ptr = zcl1::read_u64_le(req, 0);
        let kind_len = zcl1::read_u32_le(req, 8);
        let name_ptr = zcl1::read_u64_le(req, 12);
        let name_len = zcl1::read_u32_le(req, 20);
        let mode = zcl1::read_u32_le(req, 24);
        let params_ptr = zcl1::read_u64_le(req, 28);
        let params_len = zcl1::read_u32_le(req, 36);

        if mode != 0 || kind_len == 0 || name_len == 0 {
            return Err(ZiError::Invalid);
        }
        let kind = self.mem.map_ro(kind_ptr, kind_len)?.to_vec();
        let name = self.mem.map_ro(name_ptr, name_len)?.to_vec();

        let cap = self.host.find(&kind, &name).ok_or(ZiError::Noent)?;
        if !cap.flags.contains(CapFlags::CAN_OPEN) {
            return Err(ZiError::Denied);
        }

        if kind == b"file" && name == b"fs" {
            return self
                .fs
                .open_from_params(&mut self.handles, &self.mem, params_ptr, params_len);
        }

        if kind == b"proc" && name == b"argv" {
            if !self.host.config().argv_enabled {
                return Err(ZiError::Denied);
            }
            if params_len != 0 {
                return Err(ZiError::Invalid);
            }
            let blob = argv_blob(&self.host.config().argv);
            return self.handles.alloc(HandleEntry::new(
                Box::new(BlobStream::new(blob)),
                HandleFlags::READABLE | HandleFlags::ENDABLE,
            ));
        }

        if kind == b"proc" && name == b"env" {
            if !self.host.config().env_enabled {
                return Err(ZiError::Denied);
            }
            if params_len != 0 {
                return Err(ZiError::Invalid);
            }
            let blob = env_blob(&self.host.config().env);
            return self.handles.alloc(HandleEntry::new(
                Box::new(BlobStream::new(blob)),
                HandleFlags::READABLE | HandleFlags::ENDABLE,
            ));
        }

        Err(ZiError::Denied)
    }
}

impl Drop for HostedRuntime {
    fn drop(&mut self) {
        // Best-effort close of outstanding handles; stdio is flushed, not
        // released.
        let open: Vec<Handle> = self.handles.occupied().collect();
        for h in open {
            if let Some(entry) = self.handles.get_mut(h) {
                let _ = entry.ops.end(&mut self.mem);
            }
            if h >= crate::handles::FIRST_DYNAMIC_HANDLE {
                let _ = self.handles.release(h);
            }
        }
    }
}

impl SirHost for HostedRuntime {
    fn mem(&self) -> &GuestMemory {
        self.mem()
    }

    fn mem_mut(&mut self) -> &mut GuestMemory {
        self.mem_mut()
    }

    fn zi_write(&mut self, h: Handle, src: GuestPtr, len: u32) -> Result<u32, ZiError> {
        self.write(h, src, len)
    }

    fn zi_end(&mut self, h: Handle) -> Result<(), ZiError> {
        self.end(h)
    }

    fn zi_alloc(&mut self, size: u32) -> GuestPtr {
        self.alloc(size)
    }

    fn zi_free(&mut self, ptr: GuestPtr) -> Result<(), ZiError> {
        self.free(ptr)
    }

    fn zi_telemetry(
        &mut self,
        topic_ptr: GuestPtr,
        topic_len: u32,
        msg_ptr: GuestPtr,
        msg_len: u32,
    ) -> Result<(), ZiError> {
        self.telemetry(topic_ptr, topic_len, msg_ptr, msg_len)
    }
}

/// Serializes the argv blob: `u32 version=1, u32 argc, [u32 len, bytes]×argc`.
pub fn argv_blob(argv: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    zcl1::put_u32_le(&mut out, 1);
    zcl1::put_u32_le(&mut out, argv.len() as u32);
    for arg in argv {
        zcl1::put_prefixed(&mut out, arg.as_bytes());
    }
    out
}

/// Serializes the env blob: `u32 version=1, u32 envc,
/// [u32 entry_len, key '=' val]×envc`. No trailing NUL.
pub fn env_blob(env: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    zcl1::put_u32_le(&mut out, 1);
    zcl1::put_u32_le(&mut out, env.len() as u32);
    for (key, val) in env {
        let entry_len = key.len() + 1 + val.len();
        zcl1::put_u32_le(&mut out, entry_len as u32);
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(val.as_bytes());
    }
    out
}
