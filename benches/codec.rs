use std::hint::black_box;

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trtp::packet::{self, Packet};
use trtp::window::{in_window, in_window_direct};
use trtp::{ReassemblyBuffer, MAX_PAYLOAD_LEN};

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for len in [0usize, 64, MAX_PAYLOAD_LEN] {
        let payload = vec![0xA5u8; len];
        let packet = Packet::data(7, 0x1234_5678, &payload);
        let raw = packet.to_bytes().unwrap();
        group.throughput(Throughput::Bytes(raw.len() as u64));

        group.bench_with_input(BenchmarkId::new("decode", len), &raw, |b, raw| {
            b.iter(|| packet::decode(black_box(raw)).unwrap());
        });

        let mut scratch = Packet::empty();
        group.bench_with_input(BenchmarkId::new("decode_into", len), &raw, |b, raw| {
            b.iter(|| packet::decode_into(black_box(raw), &mut scratch).unwrap());
        });

        let mut out = BytesMut::with_capacity(raw.len());
        group.bench_with_input(BenchmarkId::new("encode", len), &packet, |b, packet| {
            b.iter(|| {
                out.clear();
                packet::encode(black_box(packet), &mut out, true).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");

    group.bench_function("in_window_table", |b| {
        b.iter(|| {
            let mut hits = 0u32;
            for seqnum in 0..=255u8 {
                hits += in_window(black_box(250), seqnum) as u32;
            }
            hits
        });
    });

    group.bench_function("in_window_direct", |b| {
        b.iter(|| {
            let mut hits = 0u32;
            for seqnum in 0..=255u8 {
                hits += in_window_direct(black_box(250), seqnum) as u32;
            }
            hits
        });
    });

    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Elements(32));

    let packets: Vec<Packet> = (0..32u8)
        .rev()
        .map(|seqnum| Packet::data(seqnum, 0, &[seqnum; 128]))
        .collect();

    group.bench_function("reverse_window_insert_drain", |b| {
        let mut buffer = ReassemblyBuffer::new();
        let mut pending = packets.clone();
        b.iter(|| {
            let base = buffer.window_low();
            for (packet, offset) in pending.iter_mut().zip((0..32u8).rev()) {
                packet.ptype = trtp::PacketType::Data;
                packet.length = 128;
                packet.payload.resize(128, offset);
                packet.seqnum = base.wrapping_add(offset);
                buffer.insert(packet);
            }
            buffer.drain_in_order(|bytes| {
                black_box(bytes);
                Ok(())
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_window, bench_reassembly);
criterion_main!(benches);
