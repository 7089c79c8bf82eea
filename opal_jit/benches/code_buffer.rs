//! Code-buffer emission and patching benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use opal_jit::code::CodeBuffer;

fn bench_emit(c: &mut Criterion) {
    c.bench_function("emit_4k_bytes", |b| {
        b.iter(|| {
            let mut buffer = CodeBuffer::new();
            for i in 0..4096u32 {
                buffer.emit_byte(black_box(i as u8));
            }
            buffer.finish()
        })
    });

    c.bench_function("emit_u64_512", |b| {
        b.iter(|| {
            let mut buffer = CodeBuffer::new();
            for i in 0..512u64 {
                buffer.emit_u64(black_box(i));
            }
            buffer.finish()
        })
    });
}

fn bench_patch(c: &mut Criterion) {
    c.bench_function("fix_rel32_256", |b| {
        b.iter(|| {
            let mut buffer = CodeBuffer::new();
            let mut sites = Vec::with_capacity(256);
            for _ in 0..256 {
                buffer.emit_byte(0xE9);
                sites.push(buffer.current_position());
                buffer.emit_u32(0);
            }
            let end = buffer.current_position();
            for &site in &sites {
                let relative = (end - site - 4) as u32;
                buffer
                    .fix_with(site, 4, |bytes| {
                        bytes.copy_from_slice(&relative.to_le_bytes())
                    })
                    .unwrap();
            }
            buffer.finish()
        })
    });
}

criterion_group!(benches, bench_emit, bench_patch);
criterion_main!(benches);
