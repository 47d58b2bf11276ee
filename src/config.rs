//! 수신기 설정

use crate::{Error, Result, MAX_PACKET_SIZE, MAX_WINDOW};

/// TRTP 수신기 설정
///
/// 워커는 생성 시점에 복사본을 받으므로 실행 중 변경은 반영되지 않는다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 광고할 최대 윈도우 (1 ~ 31)
    pub max_window: u8,

    /// 워커 스레드 수 (0이면 CPU 코어 수 사용)
    pub workers: usize,

    /// 동시에 등록 가능한 최대 클라이언트 수
    pub max_clients: usize,

    /// 레지스트리 초기 용량 (2의 거듭제곱으로 올림)
    pub registry_capacity: usize,

    /// 수신 큐 상한 (`submit`이 지킴)
    pub inbound_capacity: usize,

    /// 반환 큐 상한 (초과분은 해제)
    pub return_capacity: usize,

    /// 송신 큐 상한 (초과분 응답은 버림)
    pub outbound_capacity: usize,

    /// 데이터그램 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_window: MAX_WINDOW,
            workers: 0,                          // CPU 코어 수 사용
            max_clients: 100,
            registry_capacity: 16,
            inbound_capacity: 4096,
            return_capacity: 1024,
            outbound_capacity: 4096,
            recv_buffer_size: MAX_PACKET_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            max_window: 16,
            workers: 2,                          // 저사양은 2 워커
            max_clients: 16,
            registry_capacity: 16,
            inbound_capacity: 512,
            return_capacity: 128,
            outbound_capacity: 512,
            recv_buffer_size: MAX_PACKET_SIZE,
        }
    }

    /// 고성능 기기용 설정
    pub fn high_performance() -> Self {
        Self {
            max_window: MAX_WINDOW,
            workers: 0,                          // 모든 코어 사용
            max_clients: 1024,
            registry_capacity: 2048,
            inbound_capacity: 65536,
            return_capacity: 16384,
            outbound_capacity: 65536,
            recv_buffer_size: MAX_PACKET_SIZE,
        }
    }

    /// 실제로 띄울 워커 수
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_window == 0 || self.max_window > MAX_WINDOW {
            return Err(Error::InvalidConfig(format!(
                "max_window는 1 ~ {} 범위여야 함: {}",
                MAX_WINDOW, self.max_window
            )));
        }
        if self.max_clients == 0 {
            return Err(Error::InvalidConfig("max_clients는 0보다 커야 함".into()));
        }
        if self.inbound_capacity == 0 || self.outbound_capacity == 0 {
            return Err(Error::InvalidConfig("큐 상한은 0보다 커야 함".into()));
        }
        if self.recv_buffer_size < MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size는 최소 {} bytes: {}",
                MAX_PACKET_SIZE, self.recv_buffer_size
            )));
        }
        Ok(())
    }
}
