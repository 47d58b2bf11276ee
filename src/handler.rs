//! 패킷 처리 워커와 수신기
//!
//! - 고정 개수의 워커 스레드가 공유 수신 큐에서 데이터그램을 꺼내 처리
//! - 클라이언트별 상태 변경은 클라이언트 뮤텍스로 직렬화
//! - 응답(ACK/NACK)은 인코딩된 바이트로 송신 큐에 넣는다
//! - 다 쓴 작업 항목은 반환 큐로 돌려보내 다음 `submit`에서 재사용
//! - 송신이 끝난 응답 항목은 예비 큐로 돌아가 다음 응답 인코딩에 재사용
//!
//! 데이터그램 하나의 처리 흐름:
//!
//! ```text
//! 디코딩 ─┬─ 실패 → 기록 후 버림
//!         └─ DATA ─┬─ truncated → NACK
//!                  └─ 삽입 ─┬─ 윈도우 밖 / 중복 → 버림
//!                           ├─ window_low 재전송 (쓰기 실패 후) → 전달 재시도
//!                           └─ 전달 ─┬─ 진행 없음
//!                                    ├─ n개 전달 → ACK
//!                                    └─ 종료 표시 → ACK, 클라이언트 제거
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::buffer::Insert;
use crate::client::{Client, ClientKey};
use crate::packet::{self, Packet, PacketType};
use crate::registry::ClientRegistry;
use crate::sink::OutputSink;
use crate::stats::HandlerStats;
use crate::stream::{Node, Stream};
use crate::{Config, Error, Result, CRC_LEN, LONG_HEADER_LEN};

/// 소켓에서 받은 원본 데이터그램
#[derive(Debug)]
pub struct Datagram {
    pub buf: BytesMut,
    pub peer: SocketAddr,
}

impl Datagram {
    pub fn new(bytes: &[u8], peer: SocketAddr, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(capacity.max(bytes.len()));
        buf.extend_from_slice(bytes);
        Self { buf, peer }
    }

    /// 버퍼 용량을 유지한 채 내용 교체
    fn refill(&mut self, bytes: &[u8], peer: SocketAddr) {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.peer = peer;
    }
}

/// 수신 큐 작업 항목
#[derive(Debug)]
pub enum Job {
    Datagram(Datagram),

    /// 이 항목을 꺼낸 워커는 종료
    Stop,
}

/// 송신할 응답
///
/// 버퍼는 송신 후 예비 큐로 돌아가 다음 응답에 다시 쓰인다.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub peer: SocketAddr,
    pub bytes: BytesMut,
}

/// NACK의 seqnum 필드 값
///
/// 8비트 산술: `min(max_window, 31 - window_low)`.
pub(crate) fn nack_seqnum(max_window: u8, window_low: u8) -> u8 {
    max_window.min(31u8.wrapping_sub(window_low))
}

/// 워커와 수신기가 공유하는 상태
struct Shared {
    registry: ClientRegistry,
    sink: Arc<dyn OutputSink>,
    inbound: Stream<Job>,
    returns: Stream<Job>,

    /// `None`은 종료 표시 (수신기 종료 후 마지막 항목)
    outbound: Stream<Option<Outgoing>>,

    /// 송신이 끝난 응답 항목
    spares: Stream<Option<Outgoing>>,
    stats: HandlerStats,
    next_index: AtomicU64,

    /// `submit`은 읽기 락을 쥔 채 넣고, `shutdown`은 쓰기 락으로 내린다
    running: RwLock<bool>,
}

impl Shared {
    fn new(config: &Config, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            registry: ClientRegistry::new(config.registry_capacity, config.max_clients),
            sink,
            inbound: Stream::new(config.inbound_capacity),
            returns: Stream::new(config.return_capacity),
            outbound: Stream::new(config.outbound_capacity),
            spares: Stream::new(config.return_capacity),
            stats: HandlerStats::new(),
            next_index: AtomicU64::new(0),
            running: RwLock::new(true),
        }
    }

    /// 응답을 인코딩해서 송신 큐에 넣는다
    ///
    /// 예비 큐에 항목이 있으면 그 노드와 버퍼를 재사용한다.
    fn respond(&self, packet: &Packet, peer: SocketAddr) -> bool {
        let mut node = self.spares.pop(false).unwrap_or_else(|| Node::new(None));
        let outgoing = node.get_or_insert_with(|| Outgoing {
            peer,
            bytes: BytesMut::with_capacity(LONG_HEADER_LEN + CRC_LEN),
        });
        outgoing.peer = peer;
        outgoing.bytes.clear();

        if let Err(e) = packet::encode(packet, &mut outgoing.bytes, false) {
            warn!(%peer, kind = e.kind(), "응답 인코딩 실패: {}", e);
            HandlerStats::incr(&self.stats.responses_dropped);
            let _ = self.spares.try_push(node);
            return false;
        }

        if let Err(node) = self.outbound.try_push(node) {
            debug!(%peer, "송신 큐 포화, 응답 버림");
            HandlerStats::incr(&self.stats.responses_dropped);
            let _ = self.spares.try_push(node);
            return false;
        }
        true
    }

    /// 응답 하나를 꺼내 `send`에 넘긴 뒤 항목을 예비 큐로 돌려보낸다
    fn take_outgoing<F, R>(&self, blocking: bool, send: F) -> Option<R>
    where
        F: FnOnce(&Outgoing) -> R,
    {
        let node = self.outbound.pop(blocking)?;
        if node.is_none() {
            // 다른 소비자도 깨어나도록 종료 표시를 되돌려 놓는다
            self.outbound.push(node);
            return None;
        }

        let result = (**node).as_ref().map(send);
        if self.spares.try_push(node).is_err() {
            trace!("예비 큐 포화, 응답 항목 해제");
        }
        result
    }

    /// 처리가 끝난 작업 항목 반환 (반환 큐가 가득 차면 해제)
    fn recycle(&self, mut node: Box<Node<Job>>) {
        if let Job::Datagram(datagram) = &mut **node {
            datagram.buf.clear();
        }
        if self.returns.try_push(node).is_err() {
            trace!("반환 큐 포화, 작업 항목 해제");
        }
    }
}

/// 워커 스레드 상태
struct Worker {
    id: usize,
    shared: Arc<Shared>,
    config: Config,

    /// 디코딩 대상 저장소, 삽입 시 슬롯 저장소와 교환된다
    scratch: Packet,
}

impl Worker {
    fn run(mut self) {
        debug!(worker = self.id, "워커 시작");

        loop {
            let Some(node) = self.shared.inbound.pop(true) else {
                continue;
            };
            let datagram = match &**node {
                Job::Stop => break,
                Job::Datagram(datagram) => datagram,
            };

            self.handle(&datagram.buf, datagram.peer);
            self.shared.recycle(node);
        }

        debug!(worker = self.id, "워커 종료");
    }

    fn handle(&mut self, raw: &[u8], peer: SocketAddr) {
        let Worker {
            id,
            shared,
            config,
            scratch,
        } = self;
        let stats = &shared.stats;
        HandlerStats::incr(&stats.datagrams);

        if let Err(e) = packet::decode_into(raw, scratch) {
            stats.record_decode_error(&e);
            debug!(worker = *id, %peer, kind = e.kind(), "패킷 버림: {}", e);
            return;
        }

        if scratch.ptype != PacketType::Data {
            HandlerStats::incr(&stats.ignored);
            trace!(%peer, ptype = ?scratch.ptype, "수신기가 처리하지 않는 타입");
            return;
        }

        let key = ClientKey::from(peer);
        let handle = match shared.registry.get_or_insert_with(&key, || {
            let index = shared.next_index.fetch_add(1, Ordering::Relaxed);
            HandlerStats::incr(&stats.clients_opened);
            info!(%peer, index, "클라이언트 연결");
            Client::new(key, index)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                HandlerStats::incr(&stats.clients_refused);
                warn!(%peer, "클라이언트 거부: {}", e);
                return;
            }
        };

        let mut guard = handle.lock();
        let client = &mut *guard;

        if client.finished {
            // 종료 표시를 전달한 뒤 레지스트리에서 빠지기 전까지 잠깐 열리는 구간.
            // 연결은 이미 끝났으므로 truncated라도 NACK 없이 ignored로만 센다.
            HandlerStats::incr(&stats.ignored);
            trace!(%peer, seqnum = scratch.seqnum, "종료된 연결의 패킷");
            return;
        }

        let window_low = client.buffer.window_low();
        let free_window = client.buffer.free_window(config.max_window);

        if scratch.truncated {
            HandlerStats::incr(&stats.truncated);
            let nack = Packet::nack(
                nack_seqnum(config.max_window, window_low),
                free_window,
                scratch.timestamp,
            );
            debug!(%peer, seqnum = scratch.seqnum, window_low, "truncated 패킷, NACK 전송");
            if shared.respond(&nack, peer) {
                HandlerStats::incr(&stats.nacks_sent);
            }
            return;
        }

        let seqnum = scratch.seqnum;
        let timestamp = scratch.timestamp;

        match client.buffer.insert(scratch) {
            Insert::Inserted => {}
            Insert::OutOfWindow => {
                HandlerStats::incr(&stats.out_of_window);
                debug!(%peer, seqnum, window_low, "윈도우 밖 패킷");
                return;
            }
            Insert::Duplicate if seqnum == window_low => {
                // 앞선 전달이 쓰기 실패로 멈춰 window_low 슬롯이 남아 있다
                debug!(%peer, seqnum, "쓰기 실패 후 재전송, 전달 재시도");
            }
            Insert::Duplicate => {
                HandlerStats::incr(&stats.duplicates);
                debug!(%peer, seqnum, "중복 패킷");
                return;
            }
        }

        let client_id = client.id;
        let sink = &shared.sink;
        let drained = client
            .buffer
            .drain_in_order(|bytes| sink.write(&client_id, bytes));

        client.bytes_written += drained.bytes as u64;
        client.packets_delivered += drained.count as u64;
        HandlerStats::add(&stats.packets_delivered, drained.count as u64);
        HandlerStats::add(&stats.bytes_written, drained.bytes as u64);

        if let Some(e) = &drained.error {
            HandlerStats::incr(&stats.write_errors);
            warn!(%peer, index = client_id.index, "출력 쓰기 실패: {}", e);
        }

        if drained.count > 0 {
            let ack = Packet::ack(
                client.buffer.window_low(),
                client.buffer.free_window(config.max_window),
                timestamp,
            );
            trace!(%peer, next = ack.seqnum, window = ack.window, "ACK");
            if shared.respond(&ack, peer) {
                HandlerStats::incr(&stats.acks_sent);
            }
        }

        if !drained.end_of_stream {
            return;
        }

        client.finished = true;
        info!(
            %peer,
            index = client_id.index,
            bytes = client.bytes_written,
            packets = client.packets_delivered,
            "전송 완료: {:.2}s, {:.2} MB/s",
            client.elapsed().as_secs_f64(),
            client.throughput() / 1_000_000.0
        );

        // 레지스트리 쓰기 락을 잡기 전에 빌린 클라이언트를 놓는다
        drop(guard);
        drop(handle);

        if shared.registry.remove(&key).is_some() {
            HandlerStats::incr(&stats.clients_closed);
        }
        if let Err(e) = shared.sink.finish(&client_id) {
            HandlerStats::incr(&stats.write_errors);
            warn!(%peer, index = client_id.index, "출력 마무리 실패: {}", e);
        }
    }
}

/// TRTP 수신기
///
/// 소켓 계층은 받은 데이터그램을 `submit`으로 넣고, `next_outgoing`으로
/// 꺼낸 응답을 송신한다.
pub struct Receiver {
    shared: Arc<Shared>,
    config: Config,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Receiver {
    /// 워커 스레드를 띄우고 수신 시작
    pub fn start(config: Config, sink: Arc<dyn OutputSink>) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(&config, sink));

        let count = config.worker_count();
        let receiver = Self {
            shared,
            config,
            workers: Mutex::new(Vec::with_capacity(count)),
        };

        for id in 0..count {
            let worker = Worker {
                id,
                shared: receiver.shared.clone(),
                config: receiver.config.clone(),
                scratch: Packet::empty(),
            };
            // 실패하면 drop이 이미 띄운 워커를 정리한다
            let handle = thread::Builder::new()
                .name(format!("trtp-worker-{}", id))
                .spawn(move || worker.run())?;
            receiver.workers.lock().push(handle);
        }

        info!(
            workers = count,
            max_window = receiver.config.max_window,
            max_clients = receiver.config.max_clients,
            "수신기 시작"
        );
        Ok(receiver)
    }

    /// 데이터그램을 수신 큐에 넣는다
    ///
    /// 반환 큐의 항목이 있으면 그 버퍼를 재사용한다.
    /// `Ok`를 돌려받은 데이터그램은 `shutdown`이 끝나기 전에 반드시 처리된다.
    pub fn submit(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        let shared = &self.shared;
        // 넣는 동안 종료 항목이 먼저 들어가지 않도록 읽기 락을 유지
        let running = shared.running.read();
        if !*running {
            return Err(Error::ShuttingDown);
        }
        if shared.inbound.len() >= shared.inbound.capacity() {
            return Err(Error::QueueFull {
                capacity: shared.inbound.capacity(),
            });
        }

        let node = match shared.returns.pop(false) {
            Some(mut node) => {
                match &mut **node {
                    Job::Datagram(datagram) => datagram.refill(bytes, peer),
                    job => {
                        *job = Job::Datagram(Datagram::new(
                            bytes,
                            peer,
                            self.config.recv_buffer_size,
                        ))
                    }
                }
                node
            }
            None => Node::new(Job::Datagram(Datagram::new(
                bytes,
                peer,
                self.config.recv_buffer_size,
            ))),
        };

        shared.inbound.push(node);
        Ok(())
    }

    /// 송신할 응답 꺼내기
    ///
    /// 종료 후 남은 응답을 모두 꺼내면 `None`. `blocking`이 아니면 비었을 때도 `None`.
    /// 응답 버퍼를 복사하므로 송신 루프는 `send_outgoing`을 쓴다.
    pub fn next_outgoing(&self, blocking: bool) -> Option<Outgoing> {
        self.shared.take_outgoing(blocking, Outgoing::clone)
    }

    /// 응답 하나를 꺼내 `send`로 보내고 버퍼는 다음 응답에 재사용
    ///
    /// 반환값은 `send`의 결과. `None`의 의미는 `next_outgoing`과 같다.
    pub fn send_outgoing<F, R>(&self, blocking: bool, send: F) -> Option<R>
    where
        F: FnOnce(&Outgoing) -> R,
    {
        self.shared.take_outgoing(blocking, send)
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.shared.stats
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.read()
    }

    /// 처리 대기 중인 데이터그램 수 (근사값)
    pub fn pending(&self) -> usize {
        self.shared.inbound.len()
    }

    /// 워커마다 종료 항목을 넣고 모두 끝날 때까지 대기
    ///
    /// 이미 큐에 들어간 데이터그램은 모두 처리된 뒤에 워커가 멈춘다.
    pub fn shutdown(&self) {
        {
            // 진행 중인 submit이 넣기를 마칠 때까지 기다린다
            let mut running = self.shared.running.write();
            if !*running {
                return;
            }
            *running = false;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for _ in 0..workers.len() {
            self.shared.inbound.push_value(Job::Stop);
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("워커 스레드 패닉");
            }
        }

        self.shared.outbound.push_value(None);
        info!("수신기 종료: {}", self.shared.stats.summary());
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
