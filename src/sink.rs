//! 출력 싱크
//!
//! 순서대로 재조립된 페이로드를 클라이언트별로 받는다. `write`는 페이로드마다
//! 한 번, 연결 순서대로 호출된다. 같은 클라이언트에 대한 호출은 클라이언트
//! 뮤텍스 아래에서 일어나므로 동시에 들어오지 않는다.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::client::{ClientId, ClientKey};

/// 출력 대상
pub trait OutputSink: Send + Sync {
    /// 순서대로 전달된 페이로드 추가
    fn write(&self, client: &ClientId, bytes: &[u8]) -> io::Result<()>;

    /// 종료 표시가 전달된 뒤 한 번 호출
    fn finish(&self, _client: &ClientId) -> io::Result<()> {
        Ok(())
    }
}

/// 연결별 파일 출력
///
/// 경로 패턴의 `%d`는 연결 번호로 바뀐다 (`received_%d.dat` → `received_0.dat`).
/// `%d`가 없으면 모든 연결이 같은 파일에 이어 쓴다.
#[derive(Debug)]
pub struct FileSink {
    pattern: String,
    writers: DashMap<ClientId, BufWriter<File>>,
}

impl FileSink {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            writers: DashMap::new(),
        }
    }

    pub fn path_for(&self, client: &ClientId) -> PathBuf {
        PathBuf::from(self.pattern.replace("%d", &client.index.to_string()))
    }

    /// 현재 열려 있는 파일 수
    pub fn open_files(&self) -> usize {
        self.writers.len()
    }

    fn open(&self, client: &ClientId) -> io::Result<BufWriter<File>> {
        let path = self.path_for(client);
        debug!(client = %client.key, path = %path.display(), "출력 파일 생성");
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }
}

impl OutputSink for FileSink {
    fn write(&self, client: &ClientId, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self
            .writers
            .entry(*client)
            .or_try_insert_with(|| self.open(client))?;
        writer.write_all(bytes)
    }

    fn finish(&self, client: &ClientId) -> io::Result<()> {
        // 페이로드 없이 끝난 연결도 빈 파일을 남긴다
        let mut writer = match self.writers.remove(client) {
            Some((_, writer)) => writer,
            None => self.open(client)?,
        };
        writer.flush()
    }
}

/// 메모리 출력 (테스트/임베딩용)
#[derive(Debug, Default)]
pub struct MemorySink {
    data: DashMap<ClientKey, Vec<u8>>,
    finished: DashSet<ClientKey>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 받은 바이트 복사본
    pub fn data(&self, key: &ClientKey) -> Option<Vec<u8>> {
        self.data.get(key).map(|bytes| bytes.clone())
    }

    pub fn is_finished(&self, key: &ClientKey) -> bool {
        self.finished.contains(key)
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// 켜져 있는 동안 모든 `write`가 실패한다
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl OutputSink for MemorySink {
    fn write(&self, client: &ClientId, bytes: &[u8]) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "sink write refused"));
        }
        self.data
            .entry(client.key)
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    fn finish(&self, client: &ClientId) -> io::Result<()> {
        self.finished.insert(client.key);
        Ok(())
    }
}
