//! 작업 큐 (스트림)
//!
//! 수신 → 처리, 처리 → 버퍼 반환, 처리 → 송신 세 파이프라인이 같은 구현을 쓴다.
//!
//! - **pending**: 생산자들이 CAS로 앞에 붙이는 락프리 스택
//! - **ready**: 소비자 쪽 뮤텍스 아래의 단일 연결 리스트
//!
//! ready가 비면 pending 전체를 한 번에 떼어내(swap) 제자리에서 뒤집어
//! push 순서를 복원한다. 떼어내기 전에 push된 항목은 그 뒤에 push된 항목보다
//! 먼저 나온다 (배치 단위 FIFO).
//!
//! 항목은 `Box<Node<T>>`로 주고받는다. 소비한 노드를 다시 push하면 할당이 없다.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// 큐 노드 (작업 항목을 소유)
pub struct Node<T> {
    next: *mut Node<T>,
    value: T,
}

// next는 큐 안에 있을 때만 의미가 있고, 꺼낸 노드는 항상 null이다
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Sync> Sync for Node<T> {}

impl<T> Node<T> {
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            next: ptr::null_mut(),
            value,
        })
    }

    pub fn into_inner(self: Box<Self>) -> T {
        self.value
    }
}

impl<T> Deref for Node<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Node<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.value).finish()
    }
}

/// 소비자 쪽 리스트 (head부터 꺼냄)
struct Ready<T> {
    head: *mut Node<T>,
}

impl<T> Ready<T> {
    fn pop_front(&mut self) -> Option<Box<Node<T>>> {
        if self.head.is_null() {
            return None;
        }
        let mut node = unsafe { Box::from_raw(self.head) };
        self.head = node.next;
        node.next = ptr::null_mut();
        Some(node)
    }
}

/// 다중 생산자/다중 소비자 블로킹 큐
pub struct Stream<T> {
    pending: AtomicPtr<Node<T>>,
    ready: Mutex<Ready<T>>,
    available: Condvar,
    waiters: AtomicUsize,
    len: AtomicUsize,
    capacity: usize,
}

unsafe impl<T: Send> Send for Stream<T> {}
unsafe impl<T: Send> Sync for Stream<T> {}

impl<T> Stream<T> {
    /// `capacity`는 `try_push`만 지키는 느슨한 상한
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: AtomicPtr::new(ptr::null_mut()),
            ready: Mutex::new(Ready {
                head: ptr::null_mut(),
            }),
            available: Condvar::new(),
            waiters: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// 대략적인 항목 수 (동시 push/pop 중에는 근사값)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 락프리 push
    pub fn push(&self, node: Box<Node<T>>) {
        self.len.fetch_add(1, Ordering::Relaxed);

        let raw = Box::into_raw(node);
        let mut head = self.pending.load(Ordering::Relaxed);
        loop {
            unsafe { (*raw).next = head };
            match self
                .pending
                .compare_exchange_weak(head, raw, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        if self.waiters.load(Ordering::SeqCst) > 0 {
            // 대기자가 wait에 들어갈 때까지 뮤텍스를 잡고 있으므로 알림이 유실되지 않음
            let _ready = self.ready.lock();
            self.available.notify_one();
        }
    }

    /// 값을 새 노드로 감싸서 push
    pub fn push_value(&self, value: T) {
        self.push(Node::new(value));
    }

    /// 상한에 도달했으면 노드를 돌려준다
    pub fn try_push(&self, node: Box<Node<T>>) -> std::result::Result<(), Box<Node<T>>> {
        if self.len() >= self.capacity {
            return Err(node);
        }
        self.push(node);
        Ok(())
    }

    /// 항목 꺼내기
    ///
    /// `blocking`이면 항목이 생길 때까지 대기, 아니면 비었을 때 바로 `None`.
    pub fn pop(&self, blocking: bool) -> Option<Box<Node<T>>> {
        let mut ready = self.ready.lock();
        loop {
            if let Some(node) = ready.pop_front() {
                self.len.fetch_sub(1, Ordering::Relaxed);
                return Some(node);
            }
            if self.refill(&mut ready) {
                continue;
            }
            if !blocking {
                return None;
            }

            self.waiters.fetch_add(1, Ordering::SeqCst);
            if !self.refill(&mut ready) {
                self.available.wait(&mut ready);
            }
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// pending 스택을 떼어내 뒤집어서 ready에 붙인다 (ready는 비어 있어야 함)
    fn refill(&self, ready: &mut Ready<T>) -> bool {
        debug_assert!(ready.head.is_null());

        let mut head = self.pending.swap(ptr::null_mut(), Ordering::SeqCst);
        if head.is_null() {
            return false;
        }

        let mut reversed: *mut Node<T> = ptr::null_mut();
        while !head.is_null() {
            unsafe {
                let next = (*head).next;
                (*head).next = reversed;
                reversed = head;
                head = next;
            }
        }
        ready.head = reversed;
        true
    }
}

impl<T> Drop for Stream<T> {
    fn drop(&mut self) {
        let ready = self.ready.get_mut();
        while ready.pop_front().is_some() {}

        let mut head = *self.pending.get_mut();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
