//! End-to-end scenarios and property-style checks spanning the wire
//! codec and the trace decoder together. Per-module unit tests already
//! cover S1/S2 (in `wire.rs`) and buffer/rewind independence (in
//! `decoder.rs`); this file covers the remaining scenarios and a
//! hand-picked spread of hardware configurations in place of a
//! generated-input fuzzer.

use nexus_rv::decoder::MsgDecoder;
use nexus_rv::error::Error;
use nexus_rv::hwconfig::{HwConfig, MSG_MAX_BYTES};
use nexus_rv::message::{Message, Tcode};
use nexus_rv::trace::{Event, TraceDecoder};
use nexus_rv::wire::{decode_msg, encode_msg};

fn encode_all(cfg: &HwConfig, msgs: &[Message]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; MSG_MAX_BYTES];
    for m in msgs {
        let n = encode_msg(cfg, m, &mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn trace_decoder(cfg: HwConfig, bytes: Vec<u8>) -> TraceDecoder<std::io::Cursor<Vec<u8>>> {
    let msg_dec = MsgDecoder::new(cfg, std::io::Cursor::new(bytes), MSG_MAX_BYTES, None).unwrap();
    TraceDecoder::new(msg_dec, cfg)
}

fn sync_msg(addr: u64) -> Message {
    let mut m = Message::new(Tcode::ProgTraceSync);
    m.sync_type = 1;
    m.xaddr = addr;
    m
}

/// S3: `try_retire` splits across a folded `ResourceFull(rcode=0,
/// icnt=10)` and a `DirectBranch(icnt=3)`; a non-HTM direct branch has
/// no TNT bit to drain.
#[test]
fn s3_resource_full_icnt_splits_across_budget() {
    let cfg = HwConfig::default();
    let mut res = Message::new(Tcode::ResourceFull);
    res.res_code = 0;
    res.icnt = 10;
    let mut direct = Message::new(Tcode::DirectBranch);
    direct.icnt = 3;
    // A trailing Idle so `next_tnt`'s lookahead has a message to land
    // on instead of hitting end-of-stream.
    let bytes = encode_all(&cfg, &[sync_msg(0), res, direct, Message::new(Tcode::Idle)]);
    let mut dec = trace_decoder(cfg, bytes);
    dec.try_retire(100).unwrap();
    dec.next_sync().unwrap();

    let (n, ev) = dec.try_retire(7).unwrap();
    assert_eq!(n, 7);
    assert_eq!(ev, Event::None);

    let (n, ev) = dec.try_retire(7).unwrap();
    assert_eq!(n, 6);
    assert_eq!(ev, Event::Direct);

    assert!(matches!(
        dec.next_tnt(),
        Err(Error::TraceMismatch(_))
    ));
}

/// S4: a sync-family indirect branch is downgraded to a bare `Sync`
/// boundary before the decoder has ever been synced, so `next_indirect`
/// is never reachable for it; the address comes back doubled and
/// sign-extended, same transform `next_indirect` applies.
#[test]
fn s4_indirect_branch_sync_downgrades_to_sync_event() {
    let cfg = HwConfig::default();
    let mut ind = Message::new(Tcode::IndirectBranchSync);
    ind.sync_type = 1;
    ind.xaddr = 0x4000;
    let mut own = Message::new(Tcode::Ownership);
    own.ownership_prv = 1;
    own.ownership_v = 0;
    own.context = 0x42;
    let bytes = encode_all(&cfg, &[ind, own]);
    let mut dec = trace_decoder(cfg, bytes);

    let (n, ev) = dec.try_retire(100).unwrap();
    assert_eq!(n, 0);
    assert_eq!(ev, Event::Sync);
    let sync = dec.next_sync().unwrap();
    assert_eq!(sync.addr, 0x8000);
    assert_eq!(sync.sync, 1);

    assert!(matches!(
        dec.next_indirect(),
        Err(Error::TraceMismatch(_))
    ));
}

/// S5: a `RepeatBranch` folds into a preceding indirect branch so the
/// same message retires three times, each time reconstructing the same
/// target (the XOR delta is only applied once; see `next_indirect`'s
/// `msg.xaddr = 0` reset).
#[test]
fn s5_repeat_branch_fold_repeats_same_indirect_target() {
    let cfg = HwConfig::default();
    let mut ind = Message::new(Tcode::IndirectBranch);
    ind.icnt = 4;
    ind.xaddr = 0x100;
    let mut rep = Message::new(Tcode::RepeatBranch);
    rep.hrepeat = 2;
    let bytes = encode_all(&cfg, &[sync_msg(0), ind, rep]);
    let mut dec = trace_decoder(cfg, bytes);
    dec.try_retire(100).unwrap();
    dec.next_sync().unwrap();

    let mut total_icnt = 0u32;
    for _ in 0..3 {
        let (n, ev) = dec.try_retire(100).unwrap();
        assert_eq!(ev, Event::Indirect);
        total_icnt += n;
        let indirect = dec.next_indirect().unwrap();
        assert_eq!(indirect.target, 0x100 << 1);
    }
    assert_eq!(total_icnt, 12);
    assert!(matches!(dec.try_retire(1), Err(Error::TraceEof)));
}

/// S6: a stream truncated mid-field yields every complete preceding
/// message, then `StreamTruncate`; appending the missing tail and
/// resuming produces the final message unchanged.
#[test]
fn s6_truncated_stream_then_resumed() {
    let cfg = HwConfig::default();
    let mut direct = Message::new(Tcode::DirectBranch);
    direct.icnt = 9;
    let full = encode_all(&cfg, &[Message::new(Tcode::Idle), direct.clone()]);
    let tail = full[full.len() - 1];
    let truncated = full[..full.len() - 1].to_vec();

    let mut dec = MsgDecoder::new(cfg, std::io::Cursor::new(truncated.clone()), MSG_MAX_BYTES, None)
        .unwrap();
    let first = dec.next().unwrap().unwrap();
    assert!(first.idle());
    assert!(matches!(dec.next(), Err(Error::StreamTruncate)));

    let mut resumed = truncated;
    resumed.push(tail);
    let mut dec = MsgDecoder::new(cfg, std::io::Cursor::new(resumed), MSG_MAX_BYTES, None).unwrap();
    dec.next().unwrap().unwrap();
    let last = dec.next().unwrap().unwrap();
    assert_eq!(last.icnt, 9);
    assert!(dec.next().unwrap().is_none());
}

/// Property 1 (partial) + property 8: round-trip and VAO symmetry for
/// a spread of hardware configurations and message shapes, standing in
/// for an exhaustive/generated sweep.
#[test]
fn roundtrip_and_vao_symmetry_across_configs() {
    let configs = [
        HwConfig::default(),
        HwConfig {
            src_bits: 4,
            ts_bits: 16,
            ..HwConfig::default()
        },
        HwConfig {
            vao: true,
            addr_bits: 48,
            ..HwConfig::default()
        },
        HwConfig {
            htm: true,
            vao: true,
            addr_bits: 64,
            ..HwConfig::default()
        },
    ];

    for cfg in configs {
        let mut direct = Message::new(Tcode::DirectBranch);
        direct.icnt = 321;
        direct.src = if cfg.src_bits > 0 { 3 } else { 0 };
        if cfg.ts_bits > 0 {
            direct.has_timestamp = true;
            direct.timestamp = 55;
        }
        let mut buf = [0u8; MSG_MAX_BYTES];
        let n1 = encode_msg(&cfg, &direct, &mut buf).unwrap();
        let (decoded, consumed1) = decode_msg(&cfg, &buf[..n1]).unwrap();
        assert_eq!(consumed1, n1);
        assert_eq!(decoded.icnt, 321);
        let n2 = encode_msg(&cfg, &decoded, &mut buf).unwrap();
        assert_eq!(n1, n2, "stable byte count across re-encode");

        if cfg.vao {
            for offset in [-128i64, -1, 0, 1, 127, 1000] {
                let mut ind = Message::new(Tcode::IndirectBranch);
                ind.icnt = 1;
                ind.xaddr = offset as u64;
                let n = encode_msg(&cfg, &ind, &mut buf).unwrap();
                let (decoded, _) = decode_msg(&cfg, &buf[..n]).unwrap();
                assert_eq!(decoded.xaddr as i64, offset);
            }
        }
    }
}

/// Property 5 + 6: I-CNT conservation and a non-decreasing timestamp
/// across a mixed stream of resource-full credit, a direct branch and
/// an indirect branch, each carrying a timestamp delta.
#[test]
fn icnt_conservation_and_monotone_timestamp() {
    let cfg = HwConfig {
        ts_bits: 32,
        ..HwConfig::default()
    };
    let mut res = Message::new(Tcode::ResourceFull);
    res.res_code = 0;
    res.icnt = 4;
    let mut direct = Message::new(Tcode::DirectBranch);
    direct.icnt = 6;
    direct.has_timestamp = true;
    direct.timestamp = 10;
    let mut ind = Message::new(Tcode::IndirectBranch);
    ind.icnt = 2;
    ind.xaddr = 0x8;
    ind.has_timestamp = true;
    ind.timestamp = 5;

    let total_icnt: u64 = (res.icnt + direct.icnt + ind.icnt) as u64;
    let bytes = encode_all(&cfg, &[sync_msg(0), res, direct, ind]);
    let mut dec = trace_decoder(cfg, bytes);
    dec.try_retire(100).unwrap();
    dec.next_sync().unwrap();

    let mut retired = 0u64;
    let mut last_time = dec.time();
    loop {
        let (n, event) = match dec.try_retire(u32::MAX) {
            Ok(r) => r,
            Err(Error::TraceEof) => break,
            Err(e) => panic!("unexpected error: {e}"),
        };
        retired += n as u64;
        let now = dec.time();
        assert!(now >= last_time, "timestamp must not decrease");
        last_time = now;
        match event {
            Event::Indirect => {
                dec.next_indirect().unwrap();
            }
            Event::Direct | Event::None => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(retired, total_icnt);
}
