//! Benchmarks for the JIT-time rewrite path.
//!
//! Measures the three stages a method goes through while the runtime waits:
//! - Decoding the original body
//! - Inserting sequence and branch probes
//! - Encoding the rewritten body, including branch widening

extern crate cilcover;

use cilcover::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

/// A fat body of `blocks` repetitions of `ldarg.0; brtrue.s +1; nop`, closed by `ret`.
///
/// Returns the body with one sequence point per block and two branch points per branch.
fn synthetic_method(blocks: u32) -> (Vec<u8>, InstrumentationPoints) {
    let code_size = blocks * 4 + 1;
    let mut body = vec![0x03, 0x30, 0x08, 0x00];
    body.extend(code_size.to_le_bytes());
    body.extend([0x00; 4]);

    let mut sequence_points = Vec::new();
    let mut branch_points = Vec::new();
    for block in 0..blocks {
        let offset = block * 4;
        body.extend([0x02, 0x2D, 0x01, 0x00]);
        sequence_points.push(SequencePoint {
            offset,
            id: block * 3 + 1,
        });
        for path in 0..2 {
            branch_points.push(BranchPoint {
                offset: offset + 1,
                path,
                id: block * 3 + 2 + path,
            });
        }
    }
    body.push(0x2A);

    (body, InstrumentationPoints::new(sequence_points, branch_points))
}

fn bench_instrument(c: &mut Criterion) {
    let dispatch = ProbeDispatch::Trampoline {
        safe_token: Token::new(0x0A00_0001),
    };

    for blocks in [8, 256] {
        let (body, points) = synthetic_method(blocks);

        let mut group = c.benchmark_group(format!("instrument_{blocks}_blocks"));
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_function("decode", |b| {
            b.iter(|| {
                let method = MethodDecoder::decode(black_box(&body)).unwrap();
                black_box(method)
            });
        });

        group.bench_function("decode_instrument_encode", |b| {
            let encoder = MethodEncoder::new();
            b.iter(|| {
                let mut method = MethodDecoder::decode(black_box(&body)).unwrap();
                instrument(&mut method, black_box(&points), &dispatch).unwrap();
                let rewritten = encoder.encode(&mut method).unwrap();
                black_box(rewritten)
            });
        });

        group.finish();
    }
}

criterion_group!(benches, bench_instrument);
criterion_main!(benches);
