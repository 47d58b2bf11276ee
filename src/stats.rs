//! 처리 통계
//!
//! 워커들이 락 없이 갱신하는 원자 카운터 모음. 읽기는 [`HandlerStats::snapshot`]으로
//! 한 시점의 값을 복사해서 본다 (카운터 사이의 일관성은 보장하지 않음).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::CodecError;

/// 핸들러 통계 카운터
#[derive(Debug)]
pub struct HandlerStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처리한 데이터그램 수
    pub datagrams: AtomicU64,

    /// 디코딩 실패 (전체)
    pub decode_errors: AtomicU64,

    /// 헤더 CRC 불일치
    pub header_crc_errors: AtomicU64,

    /// 페이로드 CRC 불일치
    pub payload_crc_errors: AtomicU64,

    /// truncated DATA 수신
    pub truncated: AtomicU64,

    /// 윈도우 밖 DATA
    pub out_of_window: AtomicU64,

    /// 중복 DATA
    pub duplicates: AtomicU64,

    /// 수신기가 처리하지 않는 타입 (ACK/NACK)
    pub ignored: AtomicU64,

    pub acks_sent: AtomicU64,
    pub nacks_sent: AtomicU64,

    /// 순서대로 전달한 패킷 수
    pub packets_delivered: AtomicU64,

    /// 출력에 쓴 바이트
    pub bytes_written: AtomicU64,

    /// 출력 쓰기 실패
    pub write_errors: AtomicU64,

    pub clients_opened: AtomicU64,
    pub clients_closed: AtomicU64,

    /// 최대 클라이언트 수 초과로 거부
    pub clients_refused: AtomicU64,

    /// 인코딩 실패 또는 송신 큐 포화로 버린 응답
    pub responses_dropped: AtomicU64,
}

/// 한 시점의 통계 복사본
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams: u64,
    pub decode_errors: u64,
    pub header_crc_errors: u64,
    pub payload_crc_errors: u64,
    pub truncated: u64,
    pub out_of_window: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub acks_sent: u64,
    pub nacks_sent: u64,
    pub packets_delivered: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
    pub clients_opened: u64,
    pub clients_closed: u64,
    pub clients_refused: u64,
    pub responses_dropped: u64,
}

impl Default for HandlerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            datagrams: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            header_crc_errors: AtomicU64::new(0),
            payload_crc_errors: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            out_of_window: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            nacks_sent: AtomicU64::new(0),
            packets_delivered: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            clients_opened: AtomicU64::new(0),
            clients_closed: AtomicU64::new(0),
            clients_refused: AtomicU64::new(0),
            responses_dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// 디코딩 실패 기록 (CRC 계열은 따로 센다)
    pub fn record_decode_error(&self, err: &CodecError) {
        Self::incr(&self.decode_errors);
        match err {
            CodecError::CrcMismatch { .. } => Self::incr(&self.header_crc_errors),
            CodecError::PayloadCrcMismatch { .. } => Self::incr(&self.payload_crc_errors),
            _ => {}
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 출력 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_written.load(Ordering::Relaxed) as f64 / elapsed
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            datagrams: load(&self.datagrams),
            decode_errors: load(&self.decode_errors),
            header_crc_errors: load(&self.header_crc_errors),
            payload_crc_errors: load(&self.payload_crc_errors),
            truncated: load(&self.truncated),
            out_of_window: load(&self.out_of_window),
            duplicates: load(&self.duplicates),
            ignored: load(&self.ignored),
            acks_sent: load(&self.acks_sent),
            nacks_sent: load(&self.nacks_sent),
            packets_delivered: load(&self.packets_delivered),
            bytes_written: load(&self.bytes_written),
            write_errors: load(&self.write_errors),
            clients_opened: load(&self.clients_opened),
            clients_closed: load(&self.clients_closed),
            clients_refused: load(&self.clients_refused),
            responses_dropped: load(&self.responses_dropped),
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Elapsed: {:.2}s | Datagrams: {} | Delivered: {} pkts / {} bytes | Throughput: {:.2} MB/s | ACKs: {} | NACKs: {} | Errors: {} (crc {}/{}) | Dup: {} | OOW: {} | Clients: {}/{} (refused {})",
            self.elapsed().as_secs_f64(),
            s.datagrams,
            s.packets_delivered,
            s.bytes_written,
            self.throughput() / 1_000_000.0,
            s.acks_sent,
            s.nacks_sent,
            s.decode_errors,
            s.header_crc_errors,
            s.payload_crc_errors,
            s.duplicates,
            s.out_of_window,
            s.clients_closed,
            s.clients_opened,
            s.clients_refused,
        )
    }
}
