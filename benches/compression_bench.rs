use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::{Cursor, Read};
use wheelzip::codec::{Codec, CompressionPolicy, DeflateCodec};
use wheelzip::io_stream::{Container, EntryOptions};
use wheelzip::verify::{Check, DigestAlgorithm};

fn sample(len: usize) -> Vec<u8> {
    b"def handler(event, context):\n    return event\n"
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

fn bench_compression(c: &mut Criterion) {
    let data = sample(1024 * 1024);
    c.bench_function("deflate_compress_1mb", |b| b.iter(|| DeflateCodec.compress(black_box(&data), 6)));
}

fn packed(data: &[u8], count: usize) -> Container<Cursor<Vec<u8>>> {
    let mut container = Container::create(Cursor::new(Vec::new())).unwrap();
    for i in 0..count {
        container.write_entry(&format!("pkg/mod_{i}.py"), data, &EntryOptions::default()).unwrap();
    }
    container.finish().unwrap();
    container
}

fn bench_write(c: &mut Criterion) {
    let data = sample(64 * 1024);

    c.bench_function("write_16x64k_auto", |b| b.iter(|| packed(black_box(&data), 16)));

    let stored = EntryOptions { compression: CompressionPolicy::Store, ..EntryOptions::default() };
    c.bench_function("write_then_pop_record", |b| {
        b.iter(|| {
            let mut container = Container::create(Cursor::new(Vec::new())).unwrap();
            container.write_entry("pkg/mod.py", black_box(&data), &stored).unwrap();
            container.write_entry("RECORD", b"draft", &stored).unwrap();
            container.remove_last_entry().unwrap();
            container.write_entry("RECORD", b"final", &stored).unwrap();
            container.finish().unwrap();
        })
    });
}

fn bench_verified_read(c: &mut Criterion) {
    let data = sample(1024 * 1024);
    let algorithm = DigestAlgorithm::sha256();
    let digest = algorithm.digest(&data);
    let buf = packed(&data, 1).into_inner().into_inner();

    c.bench_function("read_1mb_sha256_verified", |b| {
        b.iter(|| {
            let mut container = Container::open(Cursor::new(buf.as_slice())).unwrap();
            let mut reader = container
                .entry_reader("pkg/mod_0.py", Check::Compare(digest.clone()), &algorithm)
                .unwrap();
            let mut out = Vec::with_capacity(data.len());
            reader.read_to_end(&mut out).unwrap();
            out
        })
    });
}

criterion_group!(benches, bench_compression, bench_write, bench_verified_read);
criterion_main!(benches);
