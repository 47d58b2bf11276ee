//! TRTP 수신기 - Truncatable Reliable Transfer Protocol
//!
//! UDP로 들어오는 DATA 패킷을 클라이언트별로 재조립해서 파일로 저장
//! - 32슬롯 슬라이딩 윈도우 + 누적 ACK
//! - truncated 패킷은 즉시 NACK
//!
//! 사용법:
//!   cargo run --release --bin trtp-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신 (received_0.dat, received_1.dat, ...)
//!   cargo run --release --bin trtp-receiver -- --bind [::]:9000
//!
//!   # 출력 경로 지정 + 4 워커
//!   cargo run --release --bin trtp-receiver -- -o /tmp/in_%d.bin -w 4

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trtp::{Config, Error, FileSink, Receiver};

/// 수신기 실행 인자
struct ReceiverArgs {
    bind_addr: SocketAddr,
    output_pattern: String,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            output_pattern: "received_%d.dat".to_string(),
            config: Config::default(),
        }
    }
}

const HELP: &str = r#"TRTP Receiver - Truncatable Reliable Transfer Protocol 수신기

UDP 위의 선택적 재전송 파일 수신기
- 32슬롯 슬라이딩 윈도우, 누적 ACK, truncated 패킷 NACK
- 연결마다 별도 출력 파일

사용법:
  cargo run --release --bin trtp-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:9000)
  -o, --output <PATTERN>    출력 경로, %d는 연결 번호 (기본: received_%d.dat)
  -w, --workers <N>         워커 스레드 수 (기본: CPU 코어 수)
  --window <N>              광고할 최대 윈도우 1~31 (기본: 31)
  --max-clients <N>         최대 동시 연결 수 (기본: 100)
  --low-spec                저사양 기기용 설정
  --high-performance        고성능 기기용 설정
  -h, --help                이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (기본: info)

예시:
  # 디버그 로그와 함께 수신
  RUST_LOG=trtp=debug cargo run --release --bin trtp-receiver -- -b [::]:9000
"#;

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값이 필요함", flag))
}

fn parse_args() -> Result<ReceiverArgs, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ReceiverArgs::default();
    let mut workers = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => {
                parsed.bind_addr = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 주소 필요: {}", e))?;
                i += 1;
            }
            "--output" | "-o" => {
                parsed.output_pattern = value(&args, i, flag)?.to_string();
                i += 1;
            }
            "--workers" | "-w" => {
                workers = Some(
                    value(&args, i, flag)?
                        .parse()
                        .map_err(|e| format!("유효한 숫자 필요: {}", e))?,
                );
                i += 1;
            }
            "--window" => {
                parsed.config.max_window = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--max-clients" => {
                parsed.config.max_clients = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--low-spec" => parsed.config = Config::low_spec(),
            "--high-performance" => parsed.config = Config::high_performance(),
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => warn!("알 수 없는 인자 무시: {}", other),
        }
        i += 1;
    }

    if let Some(workers) = workers {
        parsed.config.workers = workers;
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError + Send + Sync>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    info!("TRTP Receiver starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Output pattern: {}", args.output_pattern);
    info!("Max window: {}", args.config.max_window);
    info!("Workers: {}", args.config.worker_count());

    let recv_buffer_size = args.config.recv_buffer_size;
    let sink = Arc::new(FileSink::new(args.output_pattern));
    let receiver = Arc::new(Receiver::start(args.config, sink)?);

    let socket = Arc::new(UdpSocket::bind(args.bind_addr).await?);
    info!("Receiver listening on {}", socket.local_addr()?);

    // ─────────────────────────────────────────────────────────────────
    // 송신 스레드: 워커가 만든 응답을 블로킹으로 꺼내 전송
    // ─────────────────────────────────────────────────────────────────
    let runtime = tokio::runtime::Handle::current();
    let sender = {
        let receiver = receiver.clone();
        let socket = socket.clone();
        std::thread::Builder::new()
            .name("trtp-sender".to_string())
            .spawn(move || {
                while let Some(sent) = receiver.send_outgoing(true, |out| {
                    runtime
                        .block_on(socket.send_to(&out.bytes, out.peer))
                        .map_err(|e| (out.peer, e))
                }) {
                    if let Err((peer, e)) = sent {
                        warn!("응답 전송 실패 ({}): {}", peer, e);
                    }
                }
                debug!("송신 스레드 종료");
            })?
    };

    // ─────────────────────────────────────────────────────────────────
    // 수신 루프
    // ─────────────────────────────────────────────────────────────────
    let mut buf = vec![0u8; recv_buffer_size];
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown requested");
                break;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        continue;
                    }
                };
                match receiver.submit(&buf[..len], peer) {
                    Ok(()) => {}
                    Err(Error::QueueFull { capacity }) => {
                        debug!("수신 큐 포화 ({}), 데이터그램 버림: {}", capacity, peer);
                    }
                    Err(e) => {
                        warn!("데이터그램 제출 실패: {}", e);
                        break;
                    }
                }
            }
        }
    }

    receiver.shutdown();
    if tokio::task::spawn_blocking(move || sender.join()).await?.is_err() {
        warn!("송신 스레드 패닉");
    }

    info!("Final stats: {}", receiver.stats().summary());
    Ok(())
}
