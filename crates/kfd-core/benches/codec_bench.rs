//! Criterion benchmarks for the frame codec and the KMM codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package kfd-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kfd_core::protocol::framing::{encode_frame, FrameDecoder, FrameScheme};
use kfd_core::protocol::kmm::{
    InventoryResponse, KeyInfo, KeyItem, KmmBody, KmmMessage, ModifyKeyCommand,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_modify_key() -> KmmMessage {
    KmmMessage::new(KmmBody::ModifyKeyCommand(ModifyKeyCommand {
        keyset_id: 1,
        algorithm_id: 0x84,
        keys: (0..13)
            .map(|i| KeyItem {
                sln: i,
                key_id: i,
                is_kek: false,
                erase: false,
                key: vec![0x61; 32],
            })
            .collect(),
    }))
}

fn make_key_inventory() -> KmmMessage {
    KmmMessage::new(KmmBody::InventoryResponse(InventoryResponse::ListActiveKeys {
        marker: 0,
        keys: (0..78)
            .map(|i| KeyInfo {
                keyset_id: 1,
                sln: i,
                algorithm_id: 0x84,
                key_id: i,
            })
            .collect(),
    }))
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_framing(c: &mut Criterion) {
    // Payload of reserved bytes only: every byte needs escaping.
    let worst_case = vec![0x63u8; 512];
    let mut group = c.benchmark_group("framing");

    for scheme in [FrameScheme::SingleDelimiter, FrameScheme::DualDelimiter] {
        let name = format!("{scheme:?}");
        group.bench_with_input(BenchmarkId::new("encode", &name), &worst_case, |b, payload| {
            b.iter(|| encode_frame(scheme, black_box(payload)))
        });

        let encoded = encode_frame(scheme, &worst_case);
        group.bench_with_input(BenchmarkId::new("decode", &name), &encoded, |b, bytes| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(scheme);
                decoder.feed(black_box(bytes))
            })
        });
    }
    group.finish();
}

fn bench_kmm(c: &mut Criterion) {
    let fixtures = [
        ("ModifyKeyCommand_13", make_modify_key()),
        ("ListActiveKeys_78", make_key_inventory()),
    ];
    let mut group = c.benchmark_group("kmm");

    for (name, msg) in &fixtures {
        group.bench_with_input(BenchmarkId::new("encode", name), msg, |b, msg| {
            b.iter(|| black_box(msg).to_bytes().expect("encode must succeed"))
        });

        let bytes = msg.to_bytes().expect("encode must succeed");
        group.bench_with_input(BenchmarkId::new("decode", name), &bytes, |b, bytes| {
            b.iter(|| KmmMessage::parse(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_framing, bench_kmm);
criterion_main!(benches);
