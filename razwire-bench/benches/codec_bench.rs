//! Value codec encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use razwire_protocol::message::Greeting;
use razwire_protocol::{ByteOrder, Mode, Packet};
use std::collections::BTreeMap;

const CAPACITY: usize = 60 * 1024;

fn encoded<T: razwire_protocol::Serializable>(value: &mut T, order: ByteOrder) -> Packet {
    let mut packet = Packet::with_order(1, CAPACITY, order);
    packet.encode(value).unwrap();
    packet
}

fn bench_string_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_encode");

    for size in [16, 1024, 16 * 1024] {
        let mut text = "x".repeat(size);
        let mut packet = Packet::new(1, CAPACITY);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                packet.reset();
                packet.encode(&mut text).unwrap();
                black_box(packet.len())
            });
        });
    }

    group.finish();
}

fn bench_string_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_decode");

    for size in [16, 1024, 16 * 1024] {
        let mut packet = encoded(&mut "x".repeat(size), ByteOrder::Native);
        packet.set_mode(Mode::Decode);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                packet.buffer_mut().rewind();
                let mut text = String::new();
                packet.decode(&mut text).unwrap();
                black_box(text)
            });
        });
    }

    group.finish();
}

fn bench_sequence_by_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("i64_sequence_encode");
    let mut values: Vec<i64> = (0..1024).collect();

    for (name, order) in [("native", ByteOrder::Native), ("network", ByteOrder::Network)] {
        let mut packet = Packet::with_order(1, CAPACITY, order);
        group.throughput(Throughput::Elements(values.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                packet.reset();
                packet.encode(&mut values).unwrap();
                black_box(packet.len())
            });
        });
    }

    group.finish();
}

fn bench_composite_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite_roundtrip");

    let mut roster: BTreeMap<String, Greeting> = (0..64)
        .map(|i| {
            (
                format!("member-{}", i),
                Greeting {
                    name: format!("name-{}", i),
                    age: i,
                },
            )
        })
        .collect();
    let mut blob = Bytes::from(vec![0xabu8; 512]);
    let mut packet = Packet::new(1, CAPACITY);

    group.throughput(Throughput::Elements(1));
    group.bench_function("map_and_bytes", |b| {
        b.iter(|| {
            packet.reset();
            packet.set_mode(Mode::Encode);
            packet.encode(&mut roster).unwrap();
            packet.encode(&mut blob).unwrap();

            packet.buffer_mut().rewind();
            packet.set_mode(Mode::Decode);
            let mut decoded_roster = BTreeMap::<String, Greeting>::new();
            let mut decoded_blob = Bytes::new();
            packet.decode(&mut decoded_roster).unwrap();
            packet.decode(&mut decoded_blob).unwrap();
            black_box((decoded_roster, decoded_blob))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_string_encode,
    bench_string_decode,
    bench_sequence_by_order,
    bench_composite_roundtrip,
);

criterion_main!(benches);
