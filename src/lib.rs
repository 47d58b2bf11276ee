//! # TRTP (Truncatable Reliable Transfer Protocol) 수신기
//!
//! UDP 위의 선택적 재전송(ARQ) 파일 전송 프로토콜 수신 엔진
//!
//! ## 핵심 특징
//! - **비트 단위 와이어 포맷**: 헤더 비트필드 + 가변 길이 필드 + 이중 CRC32
//! - **32슬롯 슬라이딩 윈도우**: 순서가 뒤바뀐 패킷을 버퍼링 후 순서대로 전달
//! - **누적 ACK**: 다음에 기대하는 seqnum만 알림, truncated 패킷은 NACK
//! - **락프리 작업 큐**: 수신 → 처리 → 송신 파이프라인을 할당 없이 연결
//! - **클라이언트 레지스트리**: 주소+포트 기반 오픈 어드레싱 해시 테이블
//! - **워커 풀**: 클라이언트 수와 무관한 고정 스레드 수

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod packet;
pub mod registry;
pub mod sink;
pub mod stats;
pub mod stream;
pub mod window;

pub use buffer::{Drained, Insert, ReassemblyBuffer};
pub use client::{Client, ClientId, ClientKey};
pub use config::Config;
pub use error::{CodecError, Error, Result};
pub use handler::{Datagram, Job, Outgoing, Receiver};
pub use packet::{Packet, PacketType};
pub use registry::{ClientHandle, ClientRegistry, Table};
pub use sink::{FileSink, MemorySink, OutputSink};
pub use stats::{HandlerStats, StatsSnapshot};
pub use stream::{Node, Stream};
pub use window::{in_window, slot_hash};

/// 최대 페이로드 길이 (바이트)
pub const MAX_PAYLOAD_LEN: usize = 512;

/// 광고 가능한 최대 윈도우 (5비트 필드)
pub const MAX_WINDOW: u8 = 31;

/// 수신 윈도우 폭 (seqnum 개수)
pub const WINDOW_SIZE: usize = 32;

/// 짧은 길이 필드 헤더 크기 (type/window + length + seqnum + timestamp)
pub const SHORT_HEADER_LEN: usize = 7;

/// 긴 길이 필드 헤더 크기
pub const LONG_HEADER_LEN: usize = 8;

/// CRC32 필드 크기
pub const CRC_LEN: usize = 4;

/// 와이어 상 최대 패킷 크기
pub const MAX_PACKET_SIZE: usize = LONG_HEADER_LEN + CRC_LEN + MAX_PAYLOAD_LEN + CRC_LEN;
