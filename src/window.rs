//! 수신 윈도우 소속 판정
//!
//! `in_window(L, S)`는 S가 `{L, L+1, ..., L+31} (mod 256)` 중 하나인지 판정한다.
//! 256×256 테이블을 처음 사용할 때 한 번 계산해 두고 이후에는 조회만 한다.
//!
//! 같은 L에 대해 윈도우 안의 32개 seqnum은 하위 5비트가 모두 다르다
//! (연속한 32개 정수는 mod 32 완전 잉여계). 그래서 재조립 버퍼는
//! `slot_hash`로 32칸 배열을 직접 인덱싱할 수 있다.

use std::sync::OnceLock;

use crate::WINDOW_SIZE;

const SLOT_MASK: u8 = (WINDOW_SIZE - 1) as u8;

static TABLE: OnceLock<Box<[bool]>> = OnceLock::new();

fn build_table() -> Box<[bool]> {
    let mut table = vec![false; 256 * 256];
    for low in 0..=255u8 {
        for offset in 0..WINDOW_SIZE as u8 {
            let seqnum = low.wrapping_add(offset);
            table[(low as usize) << 8 | seqnum as usize] = true;
        }
    }
    table.into_boxed_slice()
}

/// seqnum이 window_low에서 시작하는 32칸 윈도우 안에 있는지
#[inline]
pub fn in_window(window_low: u8, seqnum: u8) -> bool {
    let table = TABLE.get_or_init(build_table);
    table[(window_low as usize) << 8 | seqnum as usize]
}

/// 재조립 버퍼 슬롯 인덱스
#[inline]
pub fn slot_hash(seqnum: u8) -> usize {
    (seqnum & SLOT_MASK) as usize
}

/// 테이블 없이 계산하는 동일한 판정 (벤치마크/검증용)
#[inline]
pub fn in_window_direct(window_low: u8, seqnum: u8) -> bool {
    (seqnum.wrapping_sub(window_low) as usize) < WINDOW_SIZE
}
