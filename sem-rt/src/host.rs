use sem_asm::{CapFlags, ZiError};

use crate::zcl1;

/// `zi_ctl` op: list the configured capabilities.
pub const CTL_OP_CAPS_LIST: u16 = 1;
/// `zi_ctl` op: number of argv entries (reserved host-protocol range).
pub const CTL_OP_ARGV_COUNT: u16 = 1000;
/// `zi_ctl` op: fetch one argv entry by u32 index.
pub const CTL_OP_ARGV_GET: u16 = 1001;
/// `zi_ctl` op: number of env entries.
pub const CTL_OP_ENV_COUNT: u16 = 1002;
/// `zi_ctl` op: fetch one env entry by u32 index.
pub const CTL_OP_ENV_GET: u16 = 1003;

/// Largest single blob a control response may carry.
const MAX_BLOB: usize = 64 * 1024;

/// One configured capability record.
#[derive(Debug, Clone)]
pub struct Capability {
    /// Capability kind, e.g. `file` or `proc`.
    pub kind: String,
    /// Capability name, e.g. `fs` or `argv`.
    pub name: String,
    /// Capability flags.
    pub flags: CapFlags,
    /// Optional metadata bytes exposed to guests.
    pub meta: Vec<u8>,
}

impl Capability {
    /// Creates a capability without metadata.
    pub fn new(kind: impl Into<String>, name: impl Into<String>, flags: CapFlags) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            flags,
            meta: Vec::new(),
        }
    }

    /// Serialized entry size inside CAPS_LIST / `cap_get` payloads.
    pub fn wire_size(&self) -> usize {
        4 + self.kind.len() + 4 + self.name.len() + 4 + 4 + self.meta.len()
    }

    /// Appends the wire entry: `kind_len, kind, name_len, name, flags,
    /// meta_len, meta`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        zcl1::put_prefixed(out, self.kind.as_bytes());
        zcl1::put_prefixed(out, self.name.as_bytes());
        zcl1::put_u32_le(out, self.flags.bits());
        zcl1::put_prefixed(out, &self.meta);
    }
}

/// Capability host configuration: the immutable capability list plus
/// optional argv/env snapshots.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Capabilities exposed via CAPS_LIST and `cap_open`.
    pub caps: Vec<Capability>,
    /// Whether the argv host-protocol ops are enabled.
    pub argv_enabled: bool,
    /// The argv snapshot.
    pub argv: Vec<String>,
    /// Whether the env host-protocol ops are enabled.
    pub env_enabled: bool,
    /// The env snapshot as key/value pairs.
    pub env: Vec<(String, String)>,
}

/// Stateless handler for ZCL1 control operations.
///
/// The capability set is fixed at init and never mutates afterwards.
pub struct CapabilityHost {
    cfg: HostConfig,
}

impl CapabilityHost {
    /// Creates the host over a configuration snapshot.
    pub fn new(cfg: HostConfig) -> Self {
        Self { cfg }
    }

    /// The configured capability list.
    pub fn caps(&self) -> &[Capability] {
        &self.cfg.caps
    }

    /// The configuration snapshot.
    pub fn config(&self) -> &HostConfig {
        &self.cfg
    }

    /// Finds a capability by exact bytewise (kind, name) match.
    pub fn find(&self, kind: &[u8], name: &[u8]) -> Option<&Capability> {
        self.cfg
            .caps
            .iter()
            .find(|c| c.kind.as_bytes() == kind && c.name.as_bytes() == name)
    }

    /// Handles one control request, writing the response frame into `resp`.
    /// Returns the number of bytes written.
    ///
    /// Malformed frames and non-zero request status fail with `Invalid`
    /// before any response is produced; recognized ops answer with a
    /// `status=1` frame or a `status=0` frame carrying a structured error
    /// payload with a stable `sem.zi_ctl.*` trace id.
    pub fn ctl(&self, req: &[u8], resp: &mut [u8]) -> Result<u32, ZiError> {
        let (hdr, payload) = zcl1::parse(req).ok_or(ZiError::Invalid)?;
        if hdr.status != 0 {
            return Err(ZiError::Invalid);
        }

        match hdr.op {
            CTL_OP_CAPS_LIST => {
                if hdr.payload_len != 0 {
                    return self.error(
                        resp,
                        &hdr,
                        ZiError::Invalid,
                        "CAPS_LIST payload must be empty",
                    );
                }
                let mut body = Vec::new();
                zcl1::put_u32_le(&mut body, 1);
                zcl1::put_u32_le(&mut body, self.cfg.caps.len() as u32);
                for cap in &self.cfg.caps {
                    cap.encode(&mut body);
                }
                self.ok(resp, &hdr, &body)
            }
            CTL_OP_ARGV_COUNT => {
                if !self.cfg.argv_enabled {
                    return self.denied(resp, &hdr, "argv not enabled");
                }
                if hdr.payload_len != 0 {
                    return self.error(
                        resp,
                        &hdr,
                        ZiError::Invalid,
                        "ARGV_COUNT payload must be empty",
                    );
                }
                let body = (self.cfg.argv.len() as u32).to_le_bytes();
                self.ok(resp, &hdr, &body)
            }
            CTL_OP_ARGV_GET => {
                if !self.cfg.argv_enabled {
                    return self.denied(resp, &hdr, "argv not enabled");
                }
                if hdr.payload_len != 4 {
                    return self.error(
                        resp,
                        &hdr,
                        ZiError::Invalid,
                        "ARGV_GET payload must be u32 index",
                    );
                }
                let index = zcl1::read_u32_le(payload, 0) as usize;
                let Some(arg) = self.cfg.argv.get(index) else {
                    return self.error(resp, &hdr, ZiError::Bounds, "ARGV index out of range");
                };
                if 4 + arg.len() > MAX_BLOB {
                    return self.error(resp, &hdr, ZiError::Invalid, "ARGV item too large");
                }
                let mut body = Vec::with_capacity(4 + arg.len());
                zcl1::put_prefixed(&mut body, arg.as_bytes());
                self.ok(resp, &hdr, &body)
            }
            CTL_OP_ENV_COUNT => {
                if !self.cfg.env_enabled {
                    return self.denied(resp, &hdr, "env not enabled");
                }
                if hdr.payload_len != 0 {
                    return self.error(
                        resp,
                        &hdr,
                        ZiError::Invalid,
                        "ENV_COUNT payload must be empty",
                    );
                }
                let body = (self.cfg.env.len() as u32).to_le_bytes();
                self.ok(resp, &hdr, &body)
            }
            CTL_OP_ENV_GET => {
                if !self.cfg.env_enabled {
                    return self.denied(resp, &hdr, "env not enabled");
                }
                if hdr.payload_len != 4 {
                    return self.error(
                        resp,
                        &hdr,
                        ZiError::Invalid,
                        "ENV_GET payload must be u32 index",
                    );
                }
                let index = zcl1::read_u32_le(payload, 0) as usize;
                let Some((key, val)) = self.cfg.env.get(index) else {
                    return self.error(resp, &hdr, ZiError::Bounds, "ENV index out of range");
                };
                if 8 + key.len() + val.len() > MAX_BLOB {
                    return self.error(resp, &hdr, ZiError::Invalid, "ENV item too large");
                }
                let mut body = Vec::new();
                zcl1::put_prefixed(&mut body, key.as_bytes());
                zcl1::put_prefixed(&mut body, val.as_bytes());
                self.ok(resp, &hdr, &body)
            }
            _ => self.error(resp, &hdr, ZiError::Nosys, "unsupported zi_ctl op"),
        }
    }

    fn ok(&self, resp: &mut [u8], hdr: &zcl1::Header, body: &[u8]) -> Result<u32, ZiError> {
        zcl1::write(resp, hdr.op, hdr.rid, 1, body)
            .map(|n| n as u32)
            .ok_or(ZiError::Bounds)
    }

    fn denied(&self, resp: &mut [u8], hdr: &zcl1::Header, what: &str) -> Result<u32, ZiError> {
        self.error(resp, hdr, ZiError::Denied, what)
    }

    fn error(
        &self,
        resp: &mut [u8],
        hdr: &zcl1::Header,
        kind: ZiError,
        msg: &str,
    ) -> Result<u32, ZiError> {
        let trace = format!("sem.zi_ctl.{}", kind.name());
        let payload = zcl1::error_payload(&trace, msg, "");
        zcl1::write(resp, hdr.op, hdr.rid, 0, &payload)
            .map(|n| n as u32)
            .ok_or(ZiError::Bounds)
    }
}

/// Builds a CAPS_LIST request frame; used by embedders and tests.
pub fn build_caps_list_req(rid: u32, out: &mut [u8]) -> Option<usize> {
    zcl1::write(out, CTL_OP_CAPS_LIST, rid, 0, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zcl1::{parse, read_u32_le};

    fn ctl(host: &CapabilityHost, req: &[u8]) -> (zcl1::Header, Vec<u8>) {
        let mut resp = vec![0u8; 4096];
        let n = host.ctl(req, &mut resp).unwrap() as usize;
        let (hdr, payload) = parse(&resp[..n]).unwrap();
        (hdr, payload.to_vec())
    }

    #[test]
    fn caps_list_with_no_caps_is_the_empty_snapshot() {
        let host = CapabilityHost::new(HostConfig::default());
        let mut req = [0u8; 64];
        let n = build_caps_list_req(42, &mut req).unwrap();
        let (hdr, payload) = ctl(&host, &req[..n]);
        assert_eq!(hdr.op, CTL_OP_CAPS_LIST);
        assert_eq!(hdr.rid, 42);
        assert_eq!(hdr.status, 1);
        assert_eq!(hdr.payload_len, 8);
        assert_eq!(payload, [1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn caps_list_encodes_each_entry() {
        let mut cap = Capability::new("file", "fs", CapFlags::CAN_OPEN | CapFlags::MAY_BLOCK);
        cap.meta = b"m".to_vec();
        let host = CapabilityHost::new(HostConfig {
            caps: vec![cap],
            ..Default::default()
        });
        let mut req = [0u8; 64];
        let n = build_caps_list_req(1, &mut req).unwrap();
        let (_, p) = ctl(&host, &req[..n]);
        assert_eq!(read_u32_le(&p, 0), 1); // version
        assert_eq!(read_u32_le(&p, 4), 1); // count
        assert_eq!(read_u32_le(&p, 8), 4);
        assert_eq!(&p[12..16], b"file");
        assert_eq!(read_u32_le(&p, 16), 2);
        assert_eq!(&p[20..22], b"fs");
        assert_eq!(read_u32_le(&p, 22), 5); // flags
        assert_eq!(read_u32_le(&p, 26), 1); // meta_len
        assert_eq!(&p[30..31], b"m");
    }

    #[test]
    fn request_with_nonzero_status_is_invalid() {
        let host = CapabilityHost::new(HostConfig::default());
        let mut req = [0u8; 64];
        let n = zcl1::write(&mut req, CTL_OP_CAPS_LIST, 1, 1, &[]).unwrap();
        let mut resp = [0u8; 64];
        assert_eq!(
            host.ctl(&req[..n], &mut resp).unwrap_err(),
            ZiError::Invalid
        );
    }

    #[test]
    fn unknown_op_is_nosys_with_trace_id() {
        let host = CapabilityHost::new(HostConfig::default());
        let mut req = [0u8; 64];
        let n = zcl1::write(&mut req, 999, 7, 0, &[]).unwrap();
        let (hdr, p) = ctl(&host, &req[..n]);
        assert_eq!(hdr.status, 0);
        let trace_len = read_u32_le(&p, 0) as usize;
        assert_eq!(&p[4..4 + trace_len], b"sem.zi_ctl.nosys");
    }

    #[test]
    fn argv_ops_are_gated_and_bounds_checked() {
        let host = CapabilityHost::new(HostConfig {
            argv_enabled: true,
            argv: vec!["prog".into(), "x".into()],
            ..Default::default()
        });
        let mut req = [0u8; 64];
        let n = zcl1::write(&mut req, CTL_OP_ARGV_COUNT, 1, 0, &[]).unwrap();
        let (hdr, p) = ctl(&host, &req[..n]);
        assert_eq!(hdr.status, 1);
        assert_eq!(read_u32_le(&p, 0), 2);

        let n = zcl1::write(&mut req, CTL_OP_ARGV_GET, 2, 0, &0u32.to_le_bytes()).unwrap();
        let (hdr, p) = ctl(&host, &req[..n]);
        assert_eq!(hdr.status, 1);
        assert_eq!(read_u32_le(&p, 0), 4);
        assert_eq!(&p[4..8], b"prog");

        let n = zcl1::write(&mut req, CTL_OP_ARGV_GET, 3, 0, &9u32.to_le_bytes()).unwrap();
        let (hdr, p) = ctl(&host, &req[..n]);
        assert_eq!(hdr.status, 0);
        let trace_len = read_u32_le(&p, 0) as usize;
        assert_eq!(&p[4..4 + trace_len], b"sem.zi_ctl.bounds");

        let disabled = CapabilityHost::new(HostConfig::default());
        let n = zcl1::write(&mut req, CTL_OP_ARGV_COUNT, 4, 0, &[]).unwrap();
        let (hdr, p) = ctl(&disabled, &req[..n]);
        assert_eq!(hdr.status, 0);
        let trace_len = read_u32_le(&p, 0) as usize;
        assert_eq!(&p[4..4 + trace_len], b"sem.zi_ctl.denied");
    }

    #[test]
    fn env_get_packs_key_and_value() {
        let host = CapabilityHost::new(HostConfig {
            env_enabled: true,
            env: vec![("HOME".into(), "/tmp".into())],
            ..Default::default()
        });
        let mut req = [0u8; 64];
        let n = zcl1::write(&mut req, CTL_OP_ENV_GET, 1, 0, &0u32.to_le_bytes()).unwrap();
        let (hdr, p) = ctl(&host, &req[..n]);
        assert_eq!(hdr.status, 1);
        assert_eq!(read_u32_le(&p, 0), 4);
        assert_eq!(&p[4..8], b"HOME");
        assert_eq!(read_u32_le(&p, 8), 4);
        assert_eq!(&p[12..16], b"/tmp");
    }
}
