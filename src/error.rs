//! 에러 타입 정의

use thiserror::Error;

/// 패킷 인코딩/디코딩 에러
///
/// 모든 변형은 복구 가능: 핸들러는 패킷을 버리고 다음 작업으로 넘어간다.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("버퍼가 너무 짧음: {needed} bytes 필요, {available} bytes 남음")]
    TooShort { needed: usize, available: usize },

    #[error("패킷 뒤에 남은 바이트: {trailing} bytes")]
    TooLong { trailing: usize },

    #[error("페이로드 길이 초과: {length} > {max}")]
    PayloadTooLong { length: usize, max: usize },

    #[error("유효하지 않은 패킷 타입: {0}")]
    TypeInvalid(u8),

    #[error("DATA가 아닌 패킷에 truncated 비트 설정")]
    TruncatedNonData,

    #[error("헤더 CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("페이로드 CRC 불일치: expected {expected:08X}, got {got:08X}")]
    PayloadCrcMismatch { expected: u32, got: u32 },

    #[error("짧은 길이 필드로 표현 불가: {length} > 127")]
    LengthFieldOverflow { length: usize },

    #[error("페이로드 길이 불일치: header {declared}, payload {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
}

impl CodecError {
    /// 로그/통계용 짧은 분류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::TooShort { .. } => "too_short",
            CodecError::TooLong { .. } => "too_long",
            CodecError::PayloadTooLong { .. } => "payload_too_long",
            CodecError::TypeInvalid(_) => "type_invalid",
            CodecError::TruncatedNonData => "truncated_non_data",
            CodecError::CrcMismatch { .. } => "crc_mismatch",
            CodecError::PayloadCrcMismatch { .. } => "payload_crc_mismatch",
            CodecError::LengthFieldOverflow { .. } => "length_field_overflow",
            CodecError::PayloadLengthMismatch { .. } => "payload_length_mismatch",
        }
    }
}

/// TRTP 수신기 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("코덱 에러: {0}")]
    Codec(#[from] CodecError),

    #[error("최대 클라이언트 수 초과: {max}")]
    RegistryFull { max: usize },

    #[error("수신 큐가 가득 참: {capacity}")]
    QueueFull { capacity: usize },

    #[error("수신기 종료 중")]
    ShuttingDown,

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
