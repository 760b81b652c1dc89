//! Hosted zABI runtime.
//!
//! The "hosted version of zABI": guest pointers are base-relative offsets
//! validated and mapped through a bump-allocated arena, syscalls dispatch
//! through a capability-flagged handle table, and control operations ride
//! the ZCL1 framing into a stateless capability host. The `file/fs`
//! capability resolves guest paths component-by-component under a sandbox
//! root with `O_NOFOLLOW` at every step.

#![warn(missing_docs)]
#![deny(unused_must_use)]

pub mod file_fs;
pub mod guest_mem;
pub mod handles;
pub mod host;
pub mod runtime;
pub mod zcl1;

pub use file_fs::FileFs;
pub use guest_mem::{GuestMemory, GuestPtr};
pub use handles::{
    BlobStream, CaptureStream, Handle, HandleEntry, HandleTable, StreamOps,
    FIRST_DYNAMIC_HANDLE,
};
pub use host::{build_caps_list_req, Capability, CapabilityHost, HostConfig};
pub use runtime::{argv_blob, env_blob, HostedRuntime, RuntimeConfig, SirHost};
