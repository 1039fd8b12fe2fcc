// src/util/io/player_channel.rs
//! Player process and its line-oriented remote-control channel

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};

use crate::config::PlayerConfig;
use crate::error::{CommandError, LaunchError};
use crate::playback::{ClipRequest, PlayerControl, PlayerObservedState};
use crate::util::io::ConnectionState;
use crate::{log_debug, log_error, log_info, log_warn};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// One verb on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Stop,
    Clear,
    Repeat(bool),
    Loop(bool),
    Enqueue(PathBuf),
    Seek(u32),
    Play,
    Fullscreen,
    Status,
    Shutdown,
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |flag: bool| if flag { "on" } else { "off" };
        match self {
            PlayerCommand::Stop => write!(f, "stop"),
            PlayerCommand::Clear => write!(f, "clear"),
            PlayerCommand::Repeat(flag) => write!(f, "repeat {}", on_off(*flag)),
            PlayerCommand::Loop(flag) => write!(f, "loop {}", on_off(*flag)),
            PlayerCommand::Enqueue(path) => write!(f, "enqueue {}", path.display()),
            PlayerCommand::Seek(position) => write!(f, "seek {}", position),
            PlayerCommand::Play => write!(f, "play"),
            PlayerCommand::Fullscreen => write!(f, "fullscreen on"),
            PlayerCommand::Status => write!(f, "status"),
            PlayerCommand::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Ordered sequence that replaces whatever is playing with `clip`.
pub fn command_script(clip: &ClipRequest) -> Vec<PlayerCommand> {
    vec![
        PlayerCommand::Stop,
        PlayerCommand::Clear,
        PlayerCommand::Repeat(clip.looping),
        PlayerCommand::Loop(clip.looping),
        PlayerCommand::Enqueue(clip.path.clone()),
        PlayerCommand::Seek(0),
        PlayerCommand::Play,
        PlayerCommand::Fullscreen,
    ]
}

fn render_script(commands: &[PlayerCommand]) -> String {
    commands.iter().map(|c| format!("{}\n", c)).collect()
}

/// Maps a status reply line such as `( state playing )` to an observed state.
pub fn parse_status(reply: &str) -> PlayerObservedState {
    let lower = reply.to_ascii_lowercase();
    let Some(index) = lower.find("state ") else {
        return PlayerObservedState::Unknown;
    };

    let word = lower[index + "state ".len()..]
        .split(|c: char| c.is_whitespace() || c == ')')
        .find(|w| !w.is_empty())
        .unwrap_or("");

    match word {
        "playing" | "opening" | "buffering" => PlayerObservedState::Playing,
        "paused" => PlayerObservedState::Paused,
        "stopped" | "ended" | "end" => PlayerObservedState::Stopped,
        _ => PlayerObservedState::Unknown,
    }
}

struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Throws away banners, prompts and late replies so the next read
    /// belongs to the next request.
    fn drain(&mut self) -> std::io::Result<()> {
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);

        let mut scratch = [0u8; 512];
        loop {
            match self.reader.get_ref().try_read(&mut scratch) {
                Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn query_status(&mut self) -> std::io::Result<Option<String>> {
        self.drain()?;
        self.writer
            .write_all(format!("{}\n", PlayerCommand::Status).as_bytes())
            .await?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if line.contains("state ") {
                return Ok(Some(line.trim().to_string()));
            }
        }
    }
}

/// Owns exactly one player process and one control connection to it.
pub struct PlayerChannel {
    config: PlayerConfig,
    child: Option<Child>,
    control: Option<ControlConnection>,
    state: ConnectionState,
}

impl PlayerChannel {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            child: None,
            control: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    fn spawn(&mut self) -> Result<(), LaunchError> {
        let args = self.config.render_args();
        log_info!("Launching player: {} {}", self.config.binary, args.join(" "));

        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LaunchError::BinaryMissing(self.config.binary.clone()),
                _ => LaunchError::Spawn(e),
            })?;

        log_info!("Player started (pid {:?})", child.id());
        self.child = Some(child);
        self.control = None;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn connect_control(&mut self) -> Result<(), LaunchError> {
        let addr = self.config.control_addr();
        let launch_timeout = self.config.launch_timeout();
        let deadline = Instant::now() + launch_timeout;

        loop {
            if let Ok(Ok(stream)) = timeout(CONNECT_RETRY_INTERVAL, TcpStream::connect(&addr)).await {
                let _ = stream.set_nodelay(true);
                self.control = Some(ControlConnection::new(stream));
                self.state = ConnectionState::Connected;
                log_info!("Control channel connected on {}", addr);
                return Ok(());
            }

            if !self.is_alive() {
                return Err(LaunchError::Spawn(std::io::Error::other(
                    "player exited before its control channel opened",
                )));
            }
            if Instant::now() >= deadline {
                return Err(LaunchError::ChannelTimeout(launch_timeout));
            }
            sleep(CONNECT_RETRY_INTERVAL).await;
        }
    }

    fn drop_control(&mut self, reason: &str) {
        if self.control.take().is_some() {
            log_warn!("Dropping control channel: {}", reason);
        }
        self.state = ConnectionState::Disconnected;
    }

    fn record_failure(&mut self, reason: &str) {
        let streak = self.state.failure_streak().saturating_add(1);
        if streak >= self.config.failure_threshold {
            self.drop_control(&format!("{} ({} failures in a row)", reason, streak));
        } else {
            self.state = ConnectionState::Degraded(streak);
        }
    }

    /// Writes the whole script in one call so nothing can land in between.
    async fn send(&mut self, commands: &[PlayerCommand]) -> Result<(), CommandError> {
        let command_timeout = self.config.command_timeout();
        let control = self.control.as_mut().ok_or(CommandError::NotConnected)?;
        let script = render_script(commands);

        let result = timeout(command_timeout, async {
            control.writer.write_all(script.as_bytes()).await?;
            control.writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(e)) => {
                self.drop_control(&e.to_string());
                Err(CommandError::Io(e))
            }
            Err(_) => {
                // A partial script may be on the wire
                self.drop_control("write timed out");
                Err(CommandError::Timeout(command_timeout))
            }
        }
    }

    #[cfg(unix)]
    fn signal_terminate(child: &Child) {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we have not reaped yet
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(_child: &Child) {}
}

#[async_trait]
impl PlayerControl for PlayerChannel {
    async fn ensure_running(&mut self) -> Result<(), LaunchError> {
        if !self.is_alive() {
            self.spawn()?;
        }
        if self.control.is_none() {
            self.connect_control().await?;
        }
        Ok(())
    }

    async fn load_and_play(&mut self, clip: &ClipRequest) -> Result<(), CommandError> {
        log_info!(
            "Loading {} ({}){}",
            clip.action,
            clip.path.display(),
            if clip.looping { " looping" } else { "" }
        );
        self.send(&command_script(clip)).await
    }

    async fn probe_state(&mut self) -> PlayerObservedState {
        let command_timeout = self.config.command_timeout();
        let Some(control) = self.control.as_mut() else {
            return PlayerObservedState::Unknown;
        };

        match timeout(command_timeout, control.query_status()).await {
            Ok(Ok(Some(line))) => {
                self.state = ConnectionState::Connected;
                let observed = parse_status(&line);
                log_debug!("Player status '{}' -> {:?}", line, observed);
                observed
            }
            Ok(Ok(None)) => {
                self.drop_control("closed by player");
                PlayerObservedState::Unknown
            }
            Ok(Err(e)) => {
                self.drop_control(&e.to_string());
                PlayerObservedState::Unknown
            }
            Err(_) => {
                self.record_failure("status timed out");
                PlayerObservedState::Unknown
            }
        }
    }

    async fn terminate(&mut self) {
        if self.control.is_some() {
            let _ = self.send(&[PlayerCommand::Shutdown]).await;
        }
        self.control = None;
        self.state = ConnectionState::Disconnected;

        let Some(mut child) = self.child.take() else {
            return;
        };
        let stop_timeout = self.config.stop_timeout();

        if let Ok(Ok(status)) = timeout(stop_timeout, child.wait()).await {
            log_info!("Player exited on shutdown command ({})", status);
            return;
        }

        Self::signal_terminate(&child);
        if let Ok(Ok(status)) = timeout(stop_timeout, child.wait()).await {
            log_info!("Player exited on SIGTERM ({})", status);
            return;
        }

        log_warn!("Player did not stop within {:?}, killing", stop_timeout);
        if let Err(e) = child.kill().await {
            log_error!("Failed to kill player: {}", e);
        }
    }

    fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log_warn!("Player process exited ({})", status);
                self.child = None;
                self.drop_control("player process exited");
                false
            }
            Err(e) => {
                log_error!("Failed to query player process: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_states() {
        assert_eq!(parse_status("( state playing )"), PlayerObservedState::Playing);
        assert_eq!(parse_status("> ( state paused )"), PlayerObservedState::Paused);
        assert_eq!(parse_status("( state stopped )"), PlayerObservedState::Stopped);
        assert_eq!(parse_status("( state ended )"), PlayerObservedState::Stopped);
        assert_eq!(parse_status("( state opening )"), PlayerObservedState::Playing);
    }

    #[test]
    fn test_parse_status_garbage_is_unknown() {
        assert_eq!(parse_status(""), PlayerObservedState::Unknown);
        assert_eq!(parse_status("( audio volume: 256 )"), PlayerObservedState::Unknown);
        assert_eq!(parse_status("( state )"), PlayerObservedState::Unknown);
        assert_eq!(parse_status("( state sideways )"), PlayerObservedState::Unknown);
    }

    #[test]
    fn test_script_order_and_flags() {
        let clip = ClipRequest {
            action: "idle".to_string(),
            path: PathBuf::from("/media/guide.mp4"),
            looping: true,
        };
        let script = render_script(&command_script(&clip));
        assert_eq!(
            script,
            "stop\nclear\nrepeat on\nloop on\nenqueue /media/guide.mp4\nseek 0\nplay\nfullscreen on\n"
        );
    }

    #[test]
    fn test_one_shot_script_disables_repeat() {
        let clip = ClipRequest {
            action: "A".to_string(),
            path: PathBuf::from("a.mp4"),
            looping: false,
        };
        let commands = command_script(&clip);
        assert!(commands.contains(&PlayerCommand::Repeat(false)));
        assert!(commands.contains(&PlayerCommand::Loop(false)));
    }
}
