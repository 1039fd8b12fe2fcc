#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use coil_kiosk::config::FieldBusConfig;
use coil_kiosk::error::{CommandError, LaunchError};
use coil_kiosk::playback::{ClipRequest, PlayerControl, PlayerObservedState, VideoCatalog};
use coil_kiosk::util::io::modbus::{
    encode_exception, encode_read_coils_response, ExceptionCode, MbapHeader, MBAP_LEN, READ_COILS,
};

// ---- fake field device ----

/// What the fake device does with the next request on a session.
#[derive(Debug, Clone)]
pub enum Reply {
    Coils(Vec<bool>),
    Exception(ExceptionCode),
    /// A late answer carrying the previous transaction id, then the real one.
    StaleThen(Vec<bool>),
    /// Swallow the request.
    Silent,
    /// Drop the connection.
    Close,
}

pub fn bits(pattern: &[u8]) -> Vec<bool> {
    pattern.iter().map(|&b| b == 1).collect()
}

/// Serves one scripted session per accepted connection, in order. Sessions
/// beyond the script are closed immediately.
pub async fn spawn_device(sessions: Vec<Vec<Reply>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut sessions = sessions.into_iter();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            match sessions.next() {
                Some(replies) => {
                    tokio::spawn(serve_session(stream, replies));
                }
                None => drop(stream),
            }
        }
    });

    addr
}

async fn serve_session(mut stream: TcpStream, replies: Vec<Reply>) {
    for reply in replies {
        let mut header = [0u8; MBAP_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let header = MbapHeader::parse(&header);
        let mut pdu = vec![0u8; header.pdu_len().unwrap()];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let tid = header.transaction_id;
        let unit = header.unit_id;
        let frame = match reply {
            Reply::Coils(coils) => encode_read_coils_response(tid, unit, &coils),
            Reply::Exception(code) => encode_exception(tid, unit, READ_COILS, code),
            Reply::StaleThen(coils) => {
                let mut frame = encode_read_coils_response(tid.wrapping_sub(1), unit, &coils);
                frame.extend(encode_read_coils_response(tid, unit, &coils));
                frame
            }
            Reply::Silent => continue,
            Reply::Close => return,
        };
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }

    // Hold the session open until the client goes away
    let mut sink = [0u8; 64];
    while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
}

pub fn field_bus(addr: SocketAddr) -> FieldBusConfig {
    FieldBusConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        unit_id: 1,
        poll_interval_ms: 10,
        connect_timeout_ms: 500,
        read_timeout_ms: 300,
        reconnect_threshold: 1,
        reconnect_delay_ms: 0,
    }
}

// ---- fake player ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Ensure,
    Load { path: PathBuf, looping: bool },
    Probe,
    Terminate,
}

impl Call {
    pub fn load(path: &str, looping: bool) -> Self {
        Call::Load {
            path: PathBuf::from(path),
            looping,
        }
    }
}

struct FakeInner {
    calls: Vec<Call>,
    probes: VecDeque<PlayerObservedState>,
    fallback: PlayerObservedState,
    alive: bool,
    launch_fails: bool,
}

/// Records every call; probe answers come from a queue, then a fallback.
#[derive(Clone)]
pub struct FakePlayer {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakePlayer {
    pub fn new(fallback: PlayerObservedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeInner {
                calls: Vec::new(),
                probes: VecDeque::new(),
                fallback,
                alive: true,
                launch_fails: false,
            })),
        }
    }

    pub fn queue(&self, states: &[PlayerObservedState]) {
        self.inner.lock().unwrap().probes.extend(states.iter().copied());
    }

    pub fn set_fallback(&self, state: PlayerObservedState) {
        self.inner.lock().unwrap().fallback = state;
    }

    pub fn set_alive(&self, alive: bool) {
        self.inner.lock().unwrap().alive = alive;
    }

    pub fn set_launch_fails(&self, fails: bool) {
        self.inner.lock().unwrap().launch_fails = fails;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.inner.lock().unwrap().calls)
    }

    pub fn count(&self, wanted: fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| wanted(c)).count()
    }

    pub fn loads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Load { .. }))
            .collect()
    }
}

#[async_trait]
impl PlayerControl for FakePlayer {
    async fn ensure_running(&mut self) -> Result<(), LaunchError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Ensure);
        if inner.launch_fails {
            return Err(LaunchError::BinaryMissing("fake-player".to_string()));
        }
        inner.alive = true;
        Ok(())
    }

    async fn load_and_play(&mut self, clip: &ClipRequest) -> Result<(), CommandError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Load {
            path: clip.path.clone(),
            looping: clip.looping,
        });
        Ok(())
    }

    async fn probe_state(&mut self) -> PlayerObservedState {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Probe);
        let fallback = inner.fallback;
        inner.probes.pop_front().unwrap_or(fallback)
    }

    async fn terminate(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Terminate);
        inner.alive = false;
    }

    fn is_alive(&mut self) -> bool {
        self.inner.lock().unwrap().alive
    }
}

/// Catalog from the two-coil reference scenario.
pub fn scenario_catalog() -> VideoCatalog {
    VideoCatalog::new("idle")
        .with_clip("A", "a.mp4", false)
        .with_clip("B", "b.mp4", false)
        .with_clip("idle", "guide.mp4", false)
}
