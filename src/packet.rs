//! 패킷 정의와 와이어 코덱
//!
//! ```text
//! byte 0:   type(2) | truncated(1) | window(5)
//! byte 1:   L(1) | length(7)            L=1이면 다음 바이트까지 15비트 big-endian
//! byte 2:   length 하위 8비트           (L=1일 때만)
//! 다음 1:   seqnum
//! 다음 4:   timestamp
//! 다음 4:   crc1 = CRC32(헤더, truncated 비트는 0으로 마스킹)
//! [DATA && !truncated && length > 0 일 때만]
//! 다음 N:   payload
//! 다음 4:   crc2 = CRC32(payload)
//! ```

use bytes::{Buf, BufMut};
use crc32fast::Hasher;

use crate::error::CodecError;
use crate::{CRC_LEN, LONG_HEADER_LEN, MAX_PAYLOAD_LEN, SHORT_HEADER_LEN};

const TYPE_SHIFT: u8 = 6;
const TRUNCATED_BIT: u8 = 0x20;
const WINDOW_MASK: u8 = 0x1F;
const LONG_LENGTH_BIT: u8 = 0x80;

/// 짧은 길이 필드로 표현 가능한 최대 길이
pub const SHORT_LENGTH_MAX: usize = 0x7F;

/// 패킷 타입 (2비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketType {
    /// 예약값, 와이어에서는 유효하지 않음 (빈 슬롯 저장소의 기본값)
    #[default]
    Ignore = 0,

    /// 데이터 (length 0이면 전송 종료 표시)
    Data = 1,

    /// 누적 확인 응답
    Ack = 2,

    /// truncated 패킷 재전송 요청
    Nack = 3,
}

impl PacketType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => PacketType::Data,
            2 => PacketType::Ack,
            3 => PacketType::Nack,
            _ => PacketType::Ignore,
        }
    }
}

/// 언패킹된 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ptype: PacketType,

    /// 중간 노드가 페이로드를 잘라냈는지 여부
    pub truncated: bool,

    /// 송신측이 광고하는 빈 슬롯 수 (0~31)
    pub window: u8,

    /// 15비트 길이 필드 사용 여부
    pub long_length: bool,

    /// 페이로드 길이 (0~512)
    pub length: u16,

    pub seqnum: u8,

    pub timestamp: u32,

    /// 헤더 CRC32
    pub crc1: u32,

    /// 페이로드 (`carries_payload()`일 때만 채워짐)
    pub payload: Vec<u8>,

    /// 페이로드 CRC32
    pub crc2: u32,
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl Packet {
    /// 최대 페이로드 용량을 미리 확보한 빈 패킷 (슬롯/스크래치 저장소용)
    pub fn empty() -> Self {
        Self {
            ptype: PacketType::Ignore,
            truncated: false,
            window: 0,
            long_length: false,
            length: 0,
            seqnum: 0,
            timestamp: 0,
            crc1: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD_LEN),
            crc2: 0,
        }
    }

    /// DATA 패킷 생성, 길이에 맞춰 길이 필드 형식을 고른다
    pub fn data(seqnum: u8, timestamp: u32, payload: &[u8]) -> Self {
        Self {
            ptype: PacketType::Data,
            truncated: false,
            window: 0,
            long_length: payload.len() > SHORT_LENGTH_MAX,
            length: payload.len() as u16,
            seqnum,
            timestamp,
            crc1: 0,
            payload: payload.to_vec(),
            crc2: crc32fast::hash(payload),
        }
    }

    /// 전송 종료 표시 (length 0 DATA)
    pub fn end_of_stream(seqnum: u8, timestamp: u32) -> Self {
        Self::data(seqnum, timestamp, &[])
    }

    /// 누적 ACK
    pub fn ack(seqnum: u8, window: u8, timestamp: u32) -> Self {
        Self::control(PacketType::Ack, seqnum, window, timestamp)
    }

    /// NACK
    pub fn nack(seqnum: u8, window: u8, timestamp: u32) -> Self {
        Self::control(PacketType::Nack, seqnum, window, timestamp)
    }

    fn control(ptype: PacketType, seqnum: u8, window: u8, timestamp: u32) -> Self {
        Self {
            ptype,
            truncated: false,
            window,
            long_length: false,
            length: 0,
            seqnum,
            timestamp,
            crc1: 0,
            payload: Vec::new(),
            crc2: 0,
        }
    }

    /// 페이로드와 crc2가 와이어에 실리는지 여부
    pub fn carries_payload(&self) -> bool {
        self.ptype == PacketType::Data && !self.truncated && self.length > 0
    }

    /// 순서대로 전달되면 연결을 닫는 종료 표시인지 여부
    pub fn is_end_of_stream(&self) -> bool {
        self.ptype == PacketType::Data && !self.truncated && self.length == 0
    }

    pub fn header_len(&self) -> usize {
        if self.long_length {
            LONG_HEADER_LEN
        } else {
            SHORT_HEADER_LEN
        }
    }

    /// 인코딩 결과 바이트 수
    pub fn encoded_len(&self) -> usize {
        let mut len = self.header_len() + CRC_LEN;
        if self.carries_payload() {
            len += self.length as usize + CRC_LEN;
        }
        len
    }

    /// 페이로드 용량은 유지한 채 초기화
    pub fn clear(&mut self) {
        self.ptype = PacketType::Ignore;
        self.truncated = false;
        self.window = 0;
        self.long_length = false;
        self.length = 0;
        self.seqnum = 0;
        self.timestamp = 0;
        self.crc1 = 0;
        self.payload.clear();
        self.crc2 = 0;
    }

    /// 바이트로 직렬화 (crc2 재계산)
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        encode(self, &mut buf, true)?;
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CodecError> {
        decode(raw)
    }
}

/// truncated 비트를 0으로 두고 헤더 CRC 계산
fn header_crc(header: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[header[0] & !TRUNCATED_BIT]);
    hasher.update(&header[1..]);
    hasher.finalize()
}

fn need(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::TooShort {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

/// 새 패킷으로 디코딩
pub fn decode(raw: &[u8]) -> Result<Packet, CodecError> {
    let mut packet = Packet::empty();
    decode_into(raw, &mut packet)?;
    Ok(packet)
}

/// 호출자 저장소에 디코딩 (페이로드 할당 재사용)
///
/// 실패 시 `packet`의 내용은 정의되지 않는다.
pub fn decode_into(raw: &[u8], packet: &mut Packet) -> Result<(), CodecError> {
    let mut buf = raw;

    need(buf, 2)?;
    let b0 = buf.get_u8();
    let b1 = buf.get_u8();

    let long_length = b1 & LONG_LENGTH_BIT != 0;
    let length = if long_length {
        need(buf, 1)?;
        (((b1 & !LONG_LENGTH_BIT) as u16) << 8) | buf.get_u8() as u16
    } else {
        b1 as u16
    };
    let header_len = if long_length {
        LONG_HEADER_LEN
    } else {
        SHORT_HEADER_LEN
    };

    need(buf, 1 + 4 + CRC_LEN)?;
    let seqnum = buf.get_u8();
    let timestamp = buf.get_u32();
    let crc1 = buf.get_u32();

    // 헤더 필드 의미 검사보다 먼저 CRC 확인
    let computed = header_crc(&raw[..header_len]);
    if computed != crc1 {
        return Err(CodecError::CrcMismatch {
            expected: crc1,
            got: computed,
        });
    }

    let ptype = PacketType::from_bits(b0 >> TYPE_SHIFT);
    if ptype == PacketType::Ignore {
        return Err(CodecError::TypeInvalid(b0 >> TYPE_SHIFT));
    }

    let truncated = b0 & TRUNCATED_BIT != 0;
    if truncated && ptype != PacketType::Data {
        return Err(CodecError::TruncatedNonData);
    }

    if length as usize > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong {
            length: length as usize,
            max: MAX_PAYLOAD_LEN,
        });
    }

    packet.ptype = ptype;
    packet.truncated = truncated;
    packet.window = b0 & WINDOW_MASK;
    packet.long_length = long_length;
    packet.length = length;
    packet.seqnum = seqnum;
    packet.timestamp = timestamp;
    packet.crc1 = crc1;
    packet.payload.clear();
    packet.crc2 = 0;

    if truncated {
        // 잘린 패킷은 헤더 뒤 내용을 신뢰하지 않음
        return Ok(());
    }

    if packet.carries_payload() {
        let len = length as usize;
        need(buf, len + CRC_LEN)?;
        packet.payload.extend_from_slice(&buf[..len]);
        buf.advance(len);

        let crc2 = buf.get_u32();
        let computed = crc32fast::hash(&packet.payload);
        if computed != crc2 {
            return Err(CodecError::PayloadCrcMismatch {
                expected: crc2,
                got: computed,
            });
        }
        packet.crc2 = crc2;
    }

    if buf.has_remaining() {
        return Err(CodecError::TooLong {
            trailing: buf.remaining(),
        });
    }

    Ok(())
}

/// 패킷 인코딩
///
/// `window`는 5비트로 마스킹된다. `recompute_payload_crc`가 false면
/// 패킷에 저장된 `crc2`를 그대로 쓴다.
pub fn encode<B: BufMut>(
    packet: &Packet,
    out: &mut B,
    recompute_payload_crc: bool,
) -> Result<(), CodecError> {
    if packet.ptype == PacketType::Ignore {
        return Err(CodecError::TypeInvalid(PacketType::Ignore as u8));
    }
    if packet.truncated && packet.ptype != PacketType::Data {
        return Err(CodecError::TruncatedNonData);
    }

    let length = packet.length as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong {
            length,
            max: MAX_PAYLOAD_LEN,
        });
    }
    if !packet.long_length && length > SHORT_LENGTH_MAX {
        return Err(CodecError::LengthFieldOverflow { length });
    }
    if packet.carries_payload() && packet.payload.len() != length {
        return Err(CodecError::PayloadLengthMismatch {
            declared: length,
            actual: packet.payload.len(),
        });
    }

    let mut header = [0u8; LONG_HEADER_LEN];
    let mut at = 0;

    let mut b0 = ((packet.ptype as u8) << TYPE_SHIFT) | (packet.window & WINDOW_MASK);
    if packet.truncated {
        b0 |= TRUNCATED_BIT;
    }
    header[at] = b0;
    at += 1;

    if packet.long_length {
        header[at..at + 2].copy_from_slice(&(packet.length | 0x8000).to_be_bytes());
        at += 2;
    } else {
        header[at] = packet.length as u8;
        at += 1;
    }

    header[at] = packet.seqnum;
    at += 1;
    header[at..at + 4].copy_from_slice(&packet.timestamp.to_be_bytes());
    at += 4;

    let header = &header[..at];
    out.put_slice(header);
    out.put_u32(header_crc(header));

    if packet.carries_payload() {
        out.put_slice(&packet.payload);
        let crc2 = if recompute_payload_crc {
            crc32fast::hash(&packet.payload)
        } else {
            packet.crc2
        };
        out.put_u32(crc2);
    }

    Ok(())
}
