//! 재조립 버퍼
//!
//! 클라이언트마다 하나. 순서가 뒤바뀐 DATA 패킷을 32개 슬롯에 보관했다가
//! `window_low`부터 연속된 구간을 순서대로 내보낸다.
//!
//! 버퍼 자체에는 락이 없다. 모든 접근은 소유 클라이언트의 뮤텍스를 잡은
//! 상태에서만 일어나므로 `&mut self`로 충분하다.
//!
//! 슬롯 저장소(`Packet`)는 생성 시 미리 할당되고 이후 교체(swap)만 된다.
//! 정상 동작 중에는 해제도 재할당도 없다.

use std::io;

use tracing::trace;

use crate::packet::Packet;
use crate::window::{in_window, slot_hash};
use crate::WINDOW_SIZE;

/// 슬롯
#[derive(Debug)]
struct Slot {
    in_use: bool,
    packet: Packet,
}

/// `insert` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// 슬롯에 들어감
    Inserted,

    /// 윈도우 밖 (너무 오래됐거나 너무 앞섬)
    OutOfWindow,

    /// 이미 보관 중인 seqnum
    Duplicate,
}

/// `drain_in_order` 결과
#[derive(Debug, Default)]
pub struct Drained {
    /// 전달된 패킷 수
    pub count: usize,

    /// 전달된 페이로드 바이트 수
    pub bytes: usize,

    /// 종료 표시가 전달됨
    pub end_of_stream: bool,

    /// 출력 쓰기 실패 (실패한 패킷은 슬롯에 남는다)
    pub error: Option<io::Error>,
}

/// 32슬롯 슬라이딩 윈도우 재조립 버퍼
#[derive(Debug)]
pub struct ReassemblyBuffer {
    window_low: u8,
    occupied: usize,
    slots: Box<[Slot]>,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassemblyBuffer {
    /// 모든 슬롯에 빈 저장소를 채워서 생성
    pub fn new() -> Self {
        let slots = (0..WINDOW_SIZE)
            .map(|_| Slot {
                in_use: false,
                packet: Packet::empty(),
            })
            .collect();

        Self {
            window_low: 0,
            occupied: 0,
            slots,
        }
    }

    /// 순서상 다음에 기대하는 seqnum
    pub fn window_low(&self) -> u8 {
        self.window_low
    }

    /// 사용 중인 슬롯 수
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// 광고할 빈 윈도우
    pub fn free_window(&self, max_window: u8) -> u8 {
        max_window.saturating_sub(self.occupied.min(u8::MAX as usize) as u8)
    }

    pub fn is_occupied(&self, seqnum: u8) -> bool {
        let slot = &self.slots[slot_hash(seqnum)];
        slot.in_use && slot.packet.seqnum == seqnum
    }

    pub fn peek(&self, seqnum: u8) -> Option<&Packet> {
        let slot = &self.slots[slot_hash(seqnum)];
        if slot.in_use && slot.packet.seqnum == seqnum {
            Some(&slot.packet)
        } else {
            None
        }
    }

    /// seqnum의 슬롯을 사용 중으로 표시하고 저장소를 빌려준다
    ///
    /// 호출자는 먼저 `in_window`와 `is_occupied`를 확인해야 한다.
    /// 빌려준 저장소의 seqnum은 이미 채워져 있으므로 `is_occupied`/`peek`에 바로 보인다.
    pub fn reserve(&mut self, seqnum: u8) -> &mut Packet {
        debug_assert!(
            in_window(self.window_low, seqnum),
            "seqnum {} outside window starting at {}",
            seqnum,
            self.window_low
        );

        let slot = &mut self.slots[slot_hash(seqnum)];
        debug_assert!(!slot.in_use, "slot collision for seqnum {}", seqnum);

        if !slot.in_use {
            slot.in_use = true;
            self.occupied += 1;
        }
        slot.packet.seqnum = seqnum;
        &mut slot.packet
    }

    /// 디코딩된 패킷을 슬롯에 넣는다
    ///
    /// 성공하면 `packet`에는 슬롯이 갖고 있던 이전 저장소가 돌아온다.
    /// 거부된 경우 버퍼 상태는 바뀌지 않는다.
    pub fn insert(&mut self, packet: &mut Packet) -> Insert {
        let seqnum = packet.seqnum;

        if !in_window(self.window_low, seqnum) {
            return Insert::OutOfWindow;
        }
        if self.is_occupied(seqnum) {
            return Insert::Duplicate;
        }

        let slot = self.reserve(seqnum);
        std::mem::swap(slot, packet);
        trace!(seqnum, "슬롯 저장");
        Insert::Inserted
    }

    /// `window_low`부터 연속된 패킷을 순서대로 내보낸다
    ///
    /// 빈 슬롯, 32회 반복, 종료 표시 전달 직후, 쓰기 실패 중 먼저 오는
    /// 지점에서 멈춘다.
    pub fn drain_in_order<F>(&mut self, mut write: F) -> Drained
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        let mut drained = Drained::default();

        for _ in 0..WINDOW_SIZE {
            let seqnum = self.window_low;
            let slot = &mut self.slots[slot_hash(seqnum)];
            if !slot.in_use {
                break;
            }
            debug_assert_eq!(slot.packet.seqnum, seqnum, "stale slot in live window");

            if !slot.packet.payload.is_empty() {
                if let Err(e) = write(&slot.packet.payload) {
                    drained.error = Some(e);
                    break;
                }
            }

            let end_of_stream = slot.packet.is_end_of_stream();
            drained.bytes += slot.packet.payload.len();
            drained.count += 1;

            slot.in_use = false;
            self.occupied -= 1;
            self.window_low = self.window_low.wrapping_add(1);

            if end_of_stream {
                drained.end_of_stream = true;
                break;
            }
        }

        drained
    }
}
