//! 클라이언트 레지스트리
//!
//! [`Table`]: 선형 탐사 오픈 어드레싱 해시 테이블 (키 = [`ClientKey`])
//!
//! - 삭제는 툼스톤으로 표시한다. 조회는 툼스톤을 건너뛰고 빈 버킷에서만 멈춘다.
//! - 새 키는 탐사 경로의 첫 툼스톤에 들어간다 (키가 없음을 확인한 뒤).
//! - `len + tombstones > capacity / 2`이면 재해시. 살아있는 항목만으로 절반을
//!   넘으면 용량을 두 배로 늘린다.
//!
//! [`ClientRegistry`]: 워커들이 공유하는 동시성 래퍼. 전역 RwLock으로 테이블을
//! 보호하고, 조회 결과는 클라이언트 뮤텍스를 가리키는 읽기 가드로 돌려준다.
//! 워커는 한 번의 처리 동안만 이 가드를 들고 있는다.

use std::hash::Hasher;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHasher;
use tracing::debug;

use crate::client::{Client, ClientKey};
use crate::{Error, Result};

/// 최소 테이블 용량
const MIN_CAPACITY: usize = 8;

#[derive(Debug)]
enum Bucket<V> {
    Empty,
    Tombstone,
    Occupied { key: ClientKey, value: V },
}

fn hash_key(key: &ClientKey) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key.as_bytes());
    hasher.finish()
}

/// 오픈 어드레싱 해시 테이블
#[derive(Debug)]
pub struct Table<V> {
    buckets: Vec<Bucket<V>>,
    len: usize,
    tombstones: usize,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}

impl<V> Table<V> {
    /// 용량은 2의 거듭제곱으로 올림
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            buckets: Self::empty_buckets(capacity),
            len: 0,
            tombstones: 0,
        }
    }

    fn empty_buckets(capacity: usize) -> Vec<Bucket<V>> {
        (0..capacity).map(|_| Bucket::Empty).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn home(&self, key: &ClientKey) -> usize {
        hash_key(key) as usize & (self.buckets.len() - 1)
    }

    fn find(&self, key: &ClientKey) -> Option<usize> {
        let mask = self.buckets.len() - 1;
        let mut index = self.home(key);

        for _ in 0..self.buckets.len() {
            match &self.buckets[index] {
                Bucket::Empty => return None,
                Bucket::Occupied { key: k, .. } if k == key => return Some(index),
                _ => {}
            }
            index = (index + 1) & mask;
        }
        None
    }

    pub fn contains(&self, key: &ClientKey) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &ClientKey) -> Option<&V> {
        let index = self.find(key)?;
        match &self.buckets[index] {
            Bucket::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &ClientKey) -> Option<&mut V> {
        let index = self.find(key)?;
        match &mut self.buckets[index] {
            Bucket::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// 삽입, 이미 있던 키면 이전 값을 돌려준다
    pub fn put(&mut self, key: ClientKey, value: V) -> Option<V> {
        if let Some(index) = self.find(&key) {
            if let Bucket::Occupied { value: old, .. } = &mut self.buckets[index] {
                return Some(std::mem::replace(old, value));
            }
        }

        self.insert_absent(key, value);
        self.len += 1;

        if self.len + self.tombstones > self.capacity() / 2 {
            let capacity = if self.len > self.capacity() / 2 {
                self.capacity() * 2
            } else {
                self.capacity()
            };
            self.resize(capacity);
        }
        None
    }

    /// 키가 없다는 것이 확인된 상태에서 첫 빈 버킷/툼스톤에 넣는다
    fn insert_absent(&mut self, key: ClientKey, value: V) {
        let mask = self.buckets.len() - 1;
        let mut index = self.home(&key);

        loop {
            match self.buckets[index] {
                Bucket::Empty => break,
                Bucket::Tombstone => {
                    self.tombstones -= 1;
                    break;
                }
                Bucket::Occupied { .. } => index = (index + 1) & mask,
            }
        }
        self.buckets[index] = Bucket::Occupied { key, value };
    }

    pub fn remove(&mut self, key: &ClientKey) -> Option<V> {
        let index = self.find(key)?;
        match std::mem::replace(&mut self.buckets[index], Bucket::Tombstone) {
            Bucket::Occupied { value, .. } => {
                self.len -= 1;
                self.tombstones += 1;
                Some(value)
            }
            other => {
                debug_assert!(false, "find returned a non-occupied bucket");
                self.buckets[index] = other;
                None
            }
        }
    }

    /// 기존 테이블을 한 번 훑어 살아있는 항목만 새 테이블에 다시 넣는다
    fn resize(&mut self, capacity: usize) {
        debug!(
            from = self.capacity(),
            to = capacity,
            len = self.len,
            tombstones = self.tombstones,
            "레지스트리 재해시"
        );

        let old = std::mem::replace(&mut self.buckets, Self::empty_buckets(capacity));
        self.tombstones = 0;

        for bucket in old {
            if let Bucket::Occupied { key, value } = bucket {
                self.insert_absent(key, value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientKey, &V)> {
        self.buckets.iter().filter_map(|bucket| match bucket {
            Bucket::Occupied { key, value } => Some((key, value)),
            _ => None,
        })
    }
}

/// 워커 사이에서 공유되는 클라이언트 레지스트리
#[derive(Debug)]
pub struct ClientRegistry {
    table: RwLock<Table<Mutex<Client>>>,
    max_clients: usize,
}

/// 한 번의 처리 동안 빌려 쓰는 클라이언트
pub type ClientHandle<'a> = MappedRwLockReadGuard<'a, Mutex<Client>>;

impl ClientRegistry {
    pub fn new(capacity: usize, max_clients: usize) -> Self {
        Self {
            table: RwLock::new(Table::with_capacity(capacity)),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ClientKey) -> bool {
        self.table.read().contains(key)
    }

    pub fn get(&self, key: &ClientKey) -> Option<ClientHandle<'_>> {
        RwLockReadGuard::try_map(self.table.read(), |table| table.get(key)).ok()
    }

    /// 조회, 없으면 `make`로 만들어 등록
    ///
    /// `make`는 실제로 새 클라이언트를 등록할 때만 호출된다.
    /// 최대 클라이언트 수에 도달했으면 `Error::RegistryFull`.
    pub fn get_or_insert_with<F>(&self, key: &ClientKey, make: F) -> Result<ClientHandle<'_>>
    where
        F: FnOnce() -> Client,
    {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let mut table = self.table.write();
        if !table.contains(key) {
            if table.len() >= self.max_clients {
                return Err(Error::RegistryFull {
                    max: self.max_clients,
                });
            }
            table.put(*key, Mutex::new(make()));
        }

        // 다운그레이드 사이에 쓰기가 끼어들 수 없으므로 키는 반드시 있다
        RwLockReadGuard::try_map(RwLockWriteGuard::downgrade(table), |table| table.get(key))
            .map_err(|_| Error::RegistryFull {
                max: self.max_clients,
            })
    }

    /// 새 클라이언트 등록, 같은 키가 있었으면 이전 클라이언트를 돌려준다
    pub fn put(&self, key: ClientKey, client: Client) -> Option<Client> {
        self.table
            .write()
            .put(key, Mutex::new(client))
            .map(Mutex::into_inner)
    }

    /// 제거 후 소유권을 돌려준다
    ///
    /// 같은 스레드가 이 레지스트리의 `ClientHandle`을 들고 있으면 교착된다.
    pub fn remove(&self, key: &ClientKey) -> Option<Client> {
        self.table.write().remove(key).map(Mutex::into_inner)
    }

    /// 등록된 클라이언트 키 목록
    pub fn keys(&self) -> Vec<ClientKey> {
        self.table.read().iter().map(|(key, _)| *key).collect()
    }
}
