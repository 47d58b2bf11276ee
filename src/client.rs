//! 클라이언트 (연결별 상태)

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::buffer::ReassemblyBuffer;

const KEY_CAPACITY: usize = 18;

/// 레지스트리 키: 주소 바이트 + 포트 (big-endian)
///
/// 포트만으로는 NAT 뒤의 서로 다른 피어를 구분할 수 없으므로 항상 주소 전체를 쓴다.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    bytes: [u8; KEY_CAPACITY],
    len: u8,
}

impl ClientKey {
    pub fn from_addr(addr: SocketAddr) -> Self {
        let mut bytes = [0u8; KEY_CAPACITY];
        let ip_len = match addr.ip() {
            IpAddr::V4(ip) => {
                bytes[..4].copy_from_slice(&ip.octets());
                4
            }
            IpAddr::V6(ip) => {
                bytes[..16].copy_from_slice(&ip.octets());
                16
            }
        };
        bytes[ip_len..ip_len + 2].copy_from_slice(&addr.port().to_be_bytes());

        Self {
            bytes,
            len: (ip_len + 2) as u8,
        }
    }

    /// 해시/비교 대상 바이트
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// 키에서 주소 복원 (IPv6 flow/scope 정보는 키에 없음)
    pub fn to_socket_addr(&self) -> SocketAddr {
        let len = self.len as usize;
        let port = u16::from_be_bytes([self.bytes[len - 2], self.bytes[len - 1]]);
        let ip = if len == 6 {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&self.bytes[..4]);
            IpAddr::V4(Ipv4Addr::from(octets))
        } else {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&self.bytes[..16]);
            IpAddr::V6(Ipv6Addr::from(octets))
        };
        SocketAddr::new(ip, port)
    }
}

impl From<SocketAddr> for ClientKey {
    fn from(addr: SocketAddr) -> Self {
        Self::from_addr(addr)
    }
}

impl fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientKey({})", self.to_socket_addr())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

/// 출력 싱크에 넘기는 연결 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub key: ClientKey,

    /// 수신기 시작 이후 몇 번째 연결인지 (0부터)
    pub index: u64,
}

/// 연결별 상태
///
/// 레지스트리가 유일한 소유자이며, 워커는 클라이언트 뮤텍스를 잡은 동안만 빌려 쓴다.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,

    /// 재조립 버퍼
    pub buffer: ReassemblyBuffer,

    /// 출력에 쓴 바이트
    pub bytes_written: u64,

    /// 순서대로 전달한 패킷 수
    pub packets_delivered: u64,

    /// 연결 시작 시간
    pub started_at: Instant,

    /// 종료 표시가 전달되어 레지스트리에서 제거될 예정
    pub finished: bool,
}

impl Client {
    pub fn new(key: ClientKey, index: u64) -> Self {
        Self {
            id: ClientId { key, index },
            buffer: ReassemblyBuffer::new(),
            bytes_written: 0,
            packets_delivered: 0,
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn key(&self) -> &ClientKey {
        &self.id.key
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_written as f64 / elapsed
    }
}
