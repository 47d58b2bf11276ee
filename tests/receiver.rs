//! 수신기 종단 간 시나리오

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use rand::seq::SliceRandom;

use trtp::packet::{self, Packet, PacketType};
use trtp::{ClientKey, Config, Error, FileSink, MemorySink, Receiver, MAX_WINDOW};

fn config(workers: usize) -> Config {
    Config {
        workers,
        ..Config::default()
    }
}

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn data(seqnum: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    Packet::data(seqnum, timestamp, payload).to_bytes().unwrap()
}

fn truncated(seqnum: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut packet = Packet::data(seqnum, timestamp, payload);
    packet.truncated = true;
    packet.to_bytes().unwrap()
}

fn end_of_stream(seqnum: u8, timestamp: u32) -> Vec<u8> {
    Packet::end_of_stream(seqnum, timestamp).to_bytes().unwrap()
}

/// 종료 후 남은 응답을 모두 디코딩
fn responses(receiver: &Receiver) -> Vec<(SocketAddr, Packet)> {
    std::iter::from_fn(|| receiver.next_outgoing(true))
        .map(|out| (out.peer, packet::decode(&out.bytes).unwrap()))
        .collect()
}

#[test]
fn test_in_order_delivery_concatenates_payloads() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5000);

    receiver.submit(&data(0, 100, b"Hello, "), client).unwrap();
    receiver.submit(&data(1, 101, b"world!\n"), client).unwrap();
    receiver.shutdown();

    let key = ClientKey::from(client);
    assert_eq!(sink.data(&key).unwrap(), b"Hello, world!\n");

    let acks = responses(&receiver);
    assert!(acks.iter().all(|(to, p)| *to == client && p.ptype == PacketType::Ack));
    assert_eq!(acks.iter().filter(|(_, p)| p.seqnum == 2).count(), 1);

    let (_, last) = acks.last().unwrap();
    assert_eq!(last.seqnum, 2);
    assert_eq!(last.window, MAX_WINDOW);
    assert_eq!(last.timestamp, 101);
}

#[test]
fn test_reverse_order_single_ack() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5001);

    receiver.submit(&data(1, 0, b"world!\n"), client).unwrap();
    receiver.submit(&data(0, 7, b"Hello, "), client).unwrap();
    receiver.shutdown();

    assert_eq!(sink.data(&ClientKey::from(client)).unwrap(), b"Hello, world!\n");

    let acks = responses(&receiver);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].1.ptype, PacketType::Ack);
    assert_eq!(acks[0].1.seqnum, 2);
    // 순서를 채운 패킷의 timestamp를 돌려준다
    assert_eq!(acks[0].1.timestamp, 7);
}

#[test]
fn test_truncated_packet_gets_nack() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5002);

    receiver
        .submit(&truncated(0, 0xDEAD_BEEF, b"cut off"), client)
        .unwrap();
    receiver.shutdown();

    let replies = responses(&receiver);
    assert_eq!(replies.len(), 1);

    let (to, nack) = &replies[0];
    assert_eq!(*to, client);
    assert_eq!(nack.ptype, PacketType::Nack);
    assert_eq!(nack.seqnum, 31);
    assert_eq!(nack.window, MAX_WINDOW);
    assert_eq!(nack.timestamp, 0xDEAD_BEEF);

    assert!(sink.data(&ClientKey::from(client)).is_none());
    assert_eq!(receiver.stats().snapshot().nacks_sent, 1);
}

#[test]
fn test_end_of_stream_removes_client() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5003);
    let key = ClientKey::from(client);

    receiver.submit(&data(0, 0, b"payload"), client).unwrap();
    receiver.submit(&end_of_stream(1, 0), client).unwrap();
    receiver.shutdown();

    assert!(!receiver.registry().contains(&key));
    assert!(sink.is_finished(&key));
    assert_eq!(sink.data(&key).unwrap(), b"payload");

    let acks = responses(&receiver);
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[1].1.seqnum, 2);

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.clients_opened, 1);
    assert_eq!(snapshot.clients_closed, 1);
}

#[test]
fn test_end_of_stream_only() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5004);

    receiver.submit(&end_of_stream(0, 42), client).unwrap();
    receiver.shutdown();

    let acks = responses(&receiver);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].1.seqnum, 1);
    assert_eq!(acks[0].1.timestamp, 42);
    assert!(receiver.registry().is_empty());
    assert!(sink.is_finished(&ClientKey::from(client)));
}

#[test]
fn test_duplicate_and_out_of_window_get_no_ack() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5005);

    receiver.submit(&data(0, 0, b"a"), client).unwrap();
    receiver.submit(&data(0, 0, b"a"), client).unwrap(); // 이미 전달됨 → 윈도우 밖
    receiver.submit(&data(5, 0, b"f"), client).unwrap();
    receiver.submit(&data(5, 0, b"f"), client).unwrap(); // 보관 중 → 중복
    receiver.submit(&data(40, 0, b"x"), client).unwrap(); // 너무 앞섬
    receiver.shutdown();

    let acks = responses(&receiver);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].1.seqnum, 1);

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.duplicates, 1);
    assert_eq!(snapshot.out_of_window, 2);
    assert_eq!(sink.data(&ClientKey::from(client)).unwrap(), b"a");
}

#[test]
fn test_held_packets_shrink_advertised_window() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink).unwrap();
    let client = peer(5006);

    receiver.submit(&data(2, 0, b"c"), client).unwrap();
    receiver.submit(&data(3, 0, b"d"), client).unwrap();
    receiver.submit(&data(0, 0, b"a"), client).unwrap();
    receiver.shutdown();

    let acks = responses(&receiver);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].1.seqnum, 1);
    assert_eq!(acks[0].1.window, MAX_WINDOW - 2);
}

#[test]
fn test_corrupt_packets_are_dropped_silently() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(2), sink.clone()).unwrap();
    let client = peer(5007);

    let mut header_flip = data(0, 0, b"abc");
    header_flip[2] ^= 0x01;
    let mut payload_flip = data(0, 0, b"abc");
    payload_flip[12] ^= 0x80;

    receiver.submit(&header_flip, client).unwrap();
    receiver.submit(&payload_flip, client).unwrap();
    receiver.submit(&[0x40, 0x00], client).unwrap();
    receiver.shutdown();

    assert!(responses(&receiver).is_empty());
    assert!(receiver.registry().is_empty());
    assert!(sink.data(&ClientKey::from(client)).is_none());

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.decode_errors, 3);
    assert_eq!(snapshot.header_crc_errors, 1);
    assert_eq!(snapshot.payload_crc_errors, 1);
}

#[test]
fn test_write_failure_keeps_client_without_ack() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5008);
    let key = ClientKey::from(client);

    sink.set_failing(true);
    receiver.submit(&data(0, 0, b"lost"), client).unwrap();
    receiver.shutdown();

    assert!(responses(&receiver).is_empty());
    assert!(receiver.registry().contains(&key));
    assert_eq!(receiver.stats().snapshot().write_errors, 1);
    assert!(sink.data(&key).is_none());
}

#[test]
fn test_write_failure_recovers_on_retransmission() {
    let sink = Arc::new(MemorySink::new());
    let receiver = Receiver::start(config(1), sink.clone()).unwrap();
    let client = peer(5009);
    let key = ClientKey::from(client);

    sink.set_failing(true);
    receiver.submit(&data(0, 1, b"lost"), client).unwrap();
    while receiver.stats().snapshot().write_errors == 0 {
        thread::yield_now();
    }

    // 출력이 복구된 뒤 같은 seqnum 재전송으로 전달이 다시 진행된다
    sink.set_failing(false);
    receiver.submit(&data(0, 2, b"lost"), client).unwrap();
    receiver.submit(&data(1, 3, b" and found"), client).unwrap();
    receiver.shutdown();

    assert_eq!(sink.data(&key).unwrap(), b"lost and found");

    let acks = responses(&receiver);
    let echoed: Vec<(u8, u32)> = acks.iter().map(|(_, p)| (p.seqnum, p.timestamp)).collect();
    assert_eq!(echoed, vec![(1, 2), (2, 3)]);

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.write_errors, 1);
    assert_eq!(snapshot.duplicates, 0);
    assert_eq!(snapshot.packets_delivered, 2);
}

#[test]
fn test_max_clients_refuses_new_connections() {
    let sink = Arc::new(MemorySink::new());
    let config = Config {
        max_clients: 2,
        ..config(1)
    };
    let receiver = Receiver::start(config, sink).unwrap();

    for port in 6000..6003 {
        receiver.submit(&data(1, 0, b"held"), peer(port)).unwrap();
    }
    receiver.shutdown();

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.clients_opened, 2);
    assert_eq!(snapshot.clients_refused, 1);
    assert_eq!(receiver.registry().len(), 2);
}

#[test]
fn test_queue_full_rejects_submit() {
    let sink = Arc::new(MemorySink::new());
    let config = Config {
        inbound_capacity: 1,
        ..config(1)
    };
    let receiver = Receiver::start(config, sink).unwrap();

    // 워커가 꺼내기 전에 가득 찰 수도, 이미 비었을 수도 있다
    let mut rejected = 0;
    for _ in 0..1000 {
        match receiver.submit(&data(100, 0, b"x"), peer(6100)) {
            Ok(()) => {}
            Err(Error::QueueFull { capacity }) => {
                assert_eq!(capacity, 1);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    receiver.shutdown();

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.datagrams + rejected, 1000);
}

#[test]
fn test_many_concurrent_clients() {
    const CLIENTS: u16 = 40;
    const PACKETS: u8 = 60;

    let sink = Arc::new(MemorySink::new());
    let config = Config {
        inbound_capacity: usize::MAX,
        outbound_capacity: usize::MAX,
        ..config(4)
    };
    let receiver = Arc::new(Receiver::start(config, sink.clone()).unwrap());

    let expected: Vec<u8> = (0..PACKETS).collect();
    let senders: Vec<_> = (0..CLIENTS)
        .map(|c| {
            let receiver = receiver.clone();
            thread::spawn(move || {
                let client = peer(7000 + c);
                let key = ClientKey::from(client);
                let mut rng = rand::thread_rng();
                let window_low = || {
                    receiver
                        .registry()
                        .get(&key)
                        .map(|handle| handle.lock().buffer.window_low())
                        .unwrap_or(0)
                };

                // 한 번에 한 윈도우 안쪽만 섞어서 보내고 전부 전달될 때까지 기다린다
                for chunk in (0..PACKETS).collect::<Vec<_>>().chunks(16) {
                    let end = chunk[chunk.len() - 1] + 1;
                    let mut chunk = chunk.to_vec();
                    chunk.shuffle(&mut rng);
                    for seqnum in chunk {
                        receiver.submit(&data(seqnum, 0, &[seqnum]), client).unwrap();
                    }
                    while window_low() != end {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }
    receiver.shutdown();

    for c in 0..CLIENTS {
        let key = ClientKey::from(peer(7000 + c));
        assert_eq!(sink.data(&key).unwrap(), expected, "client {}", c);
    }

    let snapshot = receiver.stats().snapshot();
    assert_eq!(snapshot.clients_opened, CLIENTS as u64);
    assert_eq!(snapshot.packets_delivered, CLIENTS as u64 * PACKETS as u64);
}

#[test]
fn test_file_sink_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("received_%d.dat");
    let sink = Arc::new(FileSink::new(pattern.to_string_lossy()));
    let receiver = Receiver::start(config(1), sink).unwrap();

    let first = peer(8000);
    let second = peer(8001);
    let large: Vec<u8> = (0..512).map(|i| (i % 251) as u8).collect();

    receiver.submit(&data(0, 0, b"Hello, "), first).unwrap();
    receiver.submit(&data(1, 0, b"world!\n"), first).unwrap();
    receiver.submit(&end_of_stream(2, 0), first).unwrap();
    receiver.submit(&data(0, 0, &large), second).unwrap();
    receiver.submit(&end_of_stream(1, 0), second).unwrap();
    receiver.shutdown();

    let file0 = std::fs::read(dir.path().join("received_0.dat")).unwrap();
    let file1 = std::fs::read(dir.path().join("received_1.dat")).unwrap();
    assert_eq!(file0, b"Hello, world!\n");
    assert_eq!(file1, large);
}
