use sem_asm::{CapFlags, HandleFlags, ZiError};
use sem_rt::{
    build_caps_list_req, zcl1, Capability, CaptureStream, GuestPtr, HandleEntry, HostedRuntime,
    RuntimeConfig,
};

fn runtime_with(caps: Vec<Capability>) -> HostedRuntime {
    HostedRuntime::new(RuntimeConfig {
        mem_cap: 1 << 20,
        caps,
        ..Default::default()
    })
    .unwrap()
}

fn write_guest(rt: &mut HostedRuntime, bytes: &[u8]) -> GuestPtr {
    let p = rt.alloc(bytes.len() as u32);
    assert_ne!(p, 0);
    rt.mem_mut()
        .map_rw(p, bytes.len() as u32)
        .unwrap()
        .copy_from_slice(bytes);
    p
}

fn cap_open_req(rt: &mut HostedRuntime, kind: &[u8], name: &[u8], params: &[u8]) -> GuestPtr {
    let kind_ptr = write_guest(rt, kind);
    let name_ptr = write_guest(rt, name);
    let params_ptr = if params.is_empty() {
        0
    } else {
        write_guest(rt, params)
    };
    let mut rec = Vec::new();
    zcl1::put_u64_le(&mut rec, kind_ptr);
    zcl1::put_u32_le(&mut rec, kind.len() as u32);
    zcl1::put_u64_le(&mut rec, name_ptr);
    zcl1::put_u32_le(&mut rec, name.len() as u32);
    zcl1::put_u32_le(&mut rec, 0); // mode
    zcl1::put_u64_le(&mut rec, params_ptr);
    zcl1::put_u32_le(&mut rec, params.len() as u32);
    write_guest(rt, &rec)
}

#[test]
fn ctl_round_trips_an_empty_caps_list() {
    let mut rt = runtime_with(Vec::new());
    let mut req = [0u8; 64];
    let n = build_caps_list_req(42, &mut req).unwrap();
    let req_ptr = write_guest(&mut rt, &req[..n]);
    let resp_ptr = rt.alloc(256);
    let written = rt.ctl(req_ptr, n as u32, resp_ptr, 256).unwrap();
    let resp = rt.mem().map_ro(resp_ptr, written).unwrap();
    let (hdr, payload) = zcl1::parse(resp).unwrap();
    assert_eq!(hdr.op, 1);
    assert_eq!(hdr.rid, 42);
    assert_eq!(hdr.status, 1);
    assert_eq!(hdr.payload_len, 8);
    assert_eq!(payload, [1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn ctl_rejects_short_requests_and_bad_pointers() {
    let mut rt = runtime_with(Vec::new());
    let resp_ptr = rt.alloc(64);
    assert_eq!(rt.ctl(resp_ptr, 4, resp_ptr, 64).unwrap_err(), ZiError::Invalid);
    let mut req = [0u8; 64];
    let n = build_caps_list_req(1, &mut req).unwrap();
    let req_ptr = write_guest(&mut rt, &req[..n]);
    // Unmapped response window.
    assert_eq!(
        rt.ctl(req_ptr, n as u32, 0xdead_beef, 64).unwrap_err(),
        ZiError::Bounds
    );
}

#[test]
fn read_write_respect_handle_flags() {
    let mut rt = runtime_with(Vec::new());
    let (capture, sink) = CaptureStream::new();
    let h = rt
        .handles_mut()
        .alloc(HandleEntry::new(
            Box::new(capture),
            HandleFlags::WRITABLE | HandleFlags::ENDABLE,
        ))
        .unwrap();
    let src = write_guest(&mut rt, b"out!");
    assert_eq!(rt.write(h, src, 4).unwrap(), 4);
    assert_eq!(sink.lock().unwrap().as_slice(), b"out!");
    // Not readable.
    assert_eq!(rt.read(h, src, 4).unwrap_err(), ZiError::Nosys);
    // Unknown handle.
    assert_eq!(rt.write(77, src, 4).unwrap_err(), ZiError::Nosys);
    // End releases the slot.
    rt.end(h).unwrap();
    assert_eq!(rt.hflags(h), 0);
}

#[test]
fn alloc_and_free_follow_arena_rules() {
    let mut rt = runtime_with(Vec::new());
    let p = rt.alloc(32);
    assert_ne!(p, 0);
    assert_eq!(p % 16, 0);
    assert_eq!(rt.alloc(0), 0);
    rt.free(p).unwrap();
    rt.free(p).unwrap();
    assert_eq!(rt.free(0).unwrap_err(), ZiError::Invalid);
}

#[test]
fn cap_open_matches_exact_kind_and_name() {
    let caps = vec![Capability::new("proc", "argv", CapFlags::CAN_OPEN | CapFlags::PURE)];
    let mut rt = HostedRuntime::new(RuntimeConfig {
        mem_cap: 1 << 20,
        caps,
        argv_enabled: true,
        argv: vec!["sem".into(), "demo".into()],
        ..Default::default()
    })
    .unwrap();

    let req = cap_open_req(&mut rt, b"proc", b"missing", &[]);
    assert_eq!(rt.cap_open(req).unwrap_err(), ZiError::Noent);

    let req = cap_open_req(&mut rt, b"proc", b"argv", &[]);
    let h = rt.cap_open(req).unwrap();
    assert!(h >= 3);
    assert_eq!(
        rt.hflags(h),
        (HandleFlags::READABLE | HandleFlags::ENDABLE).bits()
    );

    // Drain the blob and check its shape.
    let dst = rt.alloc(256);
    let n = rt.read(h, dst, 256).unwrap();
    let blob = rt.mem().map_ro(dst, n).unwrap();
    assert_eq!(zcl1::read_u32_le(blob, 0), 1); // version
    assert_eq!(zcl1::read_u32_le(blob, 4), 2); // argc
    assert_eq!(zcl1::read_u32_le(blob, 8), 3);
    assert_eq!(&blob[12..15], b"sem");
    assert_eq!(zcl1::read_u32_le(blob, 15), 4);
    assert_eq!(&blob[19..23], b"demo");
    rt.end(h).unwrap();
}

#[test]
fn cap_open_env_blob_uses_single_equals_byte() {
    let caps = vec![Capability::new("proc", "env", CapFlags::CAN_OPEN)];
    let mut rt = HostedRuntime::new(RuntimeConfig {
        mem_cap: 1 << 20,
        caps,
        env_enabled: true,
        env: vec![("K".into(), "v1".into())],
        ..Default::default()
    })
    .unwrap();
    let req = cap_open_req(&mut rt, b"proc", b"env", &[]);
    let h = rt.cap_open(req).unwrap();
    let dst = rt.alloc(256);
    let n = rt.read(h, dst, 256).unwrap();
    let blob = rt.mem().map_ro(dst, n).unwrap();
    assert_eq!(zcl1::read_u32_le(blob, 0), 1);
    assert_eq!(zcl1::read_u32_le(blob, 4), 1);
    assert_eq!(zcl1::read_u32_le(blob, 8), 4); // K=v1
    assert_eq!(&blob[12..16], b"K=v1");
}

#[test]
fn cap_open_rejects_mode_params_and_unopenable_caps() {
    let caps = vec![
        Capability::new("proc", "argv", CapFlags::empty()),
        Capability::new("proc", "env", CapFlags::CAN_OPEN),
    ];
    let mut rt = HostedRuntime::new(RuntimeConfig {
        mem_cap: 1 << 20,
        caps,
        argv_enabled: true,
        ..Default::default()
    })
    .unwrap();

    // Capability present but not openable.
    let req = cap_open_req(&mut rt, b"proc", b"argv", &[]);
    assert_eq!(rt.cap_open(req).unwrap_err(), ZiError::Denied);

    // env openable but not enabled.
    let req = cap_open_req(&mut rt, b"proc", b"env", &[]);
    assert_eq!(rt.cap_open(req).unwrap_err(), ZiError::Denied);

    // Nonzero mode.
    let kind_ptr = write_guest(&mut rt, b"proc");
    let name_ptr = write_guest(&mut rt, b"env");
    let mut rec = Vec::new();
    zcl1::put_u64_le(&mut rec, kind_ptr);
    zcl1::put_u32_le(&mut rec, 4);
    zcl1::put_u64_le(&mut rec, name_ptr);
    zcl1::put_u32_le(&mut rec, 3);
    zcl1::put_u32_le(&mut rec, 7); // mode != 0
    zcl1::put_u64_le(&mut rec, 0);
    zcl1::put_u32_le(&mut rec, 0);
    let req = write_guest(&mut rt, &rec);
    assert_eq!(rt.cap_open(req).unwrap_err(), ZiError::Invalid);
}

#[test]
fn cap_get_serializes_entries_with_meta() {
    let mut cap = Capability::new("file", "fs", CapFlags::CAN_OPEN);
    cap.meta = b"root".to_vec();
    let mut rt = runtime_with(vec![cap]);
    assert_eq!(rt.cap_count(), 1);
    let need = rt.cap_get_size(0).unwrap();
    assert_eq!(need as usize, 4 + 4 + 4 + 2 + 4 + 4 + 4);
    let out_ptr = rt.alloc(need);
    let n = rt.cap_get(0, out_ptr, need).unwrap();
    assert_eq!(n, need);
    let entry = rt.mem().map_ro(out_ptr, n).unwrap();
    assert_eq!(zcl1::read_u32_le(entry, 0), 4);
    assert_eq!(&entry[4..8], b"file");
    assert_eq!(zcl1::read_u32_le(entry, 8), 2);
    assert_eq!(&entry[12..14], b"fs");
    assert_eq!(zcl1::read_u32_le(entry, 14), CapFlags::CAN_OPEN.bits());
    assert_eq!(zcl1::read_u32_le(entry, 18), 4);
    assert_eq!(&entry[22..26], b"root");

    assert_eq!(rt.cap_get_size(1).unwrap_err(), ZiError::Noent);
    assert_eq!(rt.cap_get(0, out_ptr, 1).unwrap_err(), ZiError::Bounds);
}
