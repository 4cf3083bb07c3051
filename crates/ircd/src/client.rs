//! Per-connection state and the three tasks that serve it: a reader that
//! parses lines into commands, a writer that drains the outbound reply
//! queue, and an idle watchdog that pings and eventually kills silent
//! connections. All state mutation driven by commands happens on the
//! server's dispatch task; the tasks here communicate with it exclusively
//! through channels.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::Instant;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commands::parse_command;
use crate::constants::{IDLE_TIMEOUT, MAX_LINE_LEN, QUIT_TIMEOUT};
use crate::modes::{ModeSet, UserMode};
use crate::names::{Name, Text};
use crate::server::{BoxConn, Server, ServerEvent};

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// IRCv3 capabilities this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MultiPrefix,
    Sasl,
}

impl Capability {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "multi-prefix" => Some(Capability::MultiPrefix),
            "sasl" => Some(Capability::Sasl),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::MultiPrefix => "multi-prefix",
            Capability::Sasl => "sasl",
        }
    }
}

pub const SUPPORTED_CAPS: &str = "multi-prefix sasl";

/// CAP LS/REQ before registration suspends the welcome burst until CAP END.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapState {
    None,
    Negotiating,
    Negotiated,
}

/// SASL PLAIN session; the buffer accumulates 400-byte continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslSession {
    Inactive,
    InProgress(String),
}

#[derive(Debug)]
pub struct ClientState {
    pub nick: Option<Name>,
    pub username: String,
    pub realname: String,
    pub hostname: String,
    pub hostmask: String,
    pub modes: ModeSet<UserMode>,
    pub caps: HashSet<Capability>,
    pub cap_state: CapState,
    pub away: Option<String>,
    /// Connection password accepted (or none required).
    pub authorized: bool,
    pub registered: bool,
    pub sasl: SaslSession,
    /// SASL account once logged in.
    pub account: Option<String>,
    /// Channels this client is a member of, by folded name.
    pub channels: HashSet<Name>,
}

/// Derive the pseudo-host shown to non-operators: a truncated digest of
/// the real host with a fixed suffix.
pub fn derive_hostmask(hostname: &str) -> String {
    let digest = Sha256::digest(hostname.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}.masked", &hex[..12])
}

impl ClientState {
    fn new(hostname: String, secure: bool, authorized: bool) -> Self {
        let hostmask = derive_hostmask(&hostname);
        let mut modes = ModeSet::new();
        modes.set(UserMode::HostMask);
        if secure {
            modes.set(UserMode::SecureConn);
        }
        ClientState {
            nick: None,
            username: String::new(),
            realname: String::new(),
            hostname,
            hostmask,
            modes,
            caps: HashSet::new(),
            cap_state: CapState::None,
            away: None,
            authorized,
            registered: false,
            sasl: SaslSession::Inactive,
            account: None,
            channels: HashSet::new(),
        }
    }

    /// Host shown in message prefixes and to non-operator viewers.
    pub fn shown_host(&self) -> &str {
        if self.modes.has(UserMode::HostMask) { &self.hostmask } else { &self.hostname }
    }

    /// Host shown to `viewer_is_oper` viewers: operators see through +x.
    pub fn host_for(&self, viewer_is_oper: bool) -> &str {
        if viewer_is_oper { &self.hostname } else { self.shown_host() }
    }
}

/// Snapshot of the fields message prefixes are built from.
#[derive(Debug, Clone)]
pub struct Profile {
    pub nick: String,
    pub username: String,
    pub host: String,
    /// `nick!user@host`
    pub prefix: String,
}

pub struct Client {
    pub id: ClientId,
    pub state: RwLock<ClientState>,
    outbound: mpsc::Sender<String>,
    pub shutdown: CancellationToken,
    departed: AtomicBool,
    atime: StdMutex<Instant>,
    ping_pending: AtomicBool,
    /// Unix timestamp of the connection, reported by WHOIS.
    pub signon: i64,
}

pub type ClientRef = Arc<Client>;

impl Client {
    pub fn new(
        hostname: String,
        secure: bool,
        authorized: bool,
        outbound: mpsc::Sender<String>,
    ) -> ClientRef {
        Arc::new(Client {
            id: next_client_id(),
            state: RwLock::new(ClientState::new(hostname, secure, authorized)),
            outbound,
            shutdown: CancellationToken::new(),
            departed: AtomicBool::new(false),
            atime: StdMutex::new(Instant::now()),
            ping_pending: AtomicBool::new(false),
            signon: chrono::Utc::now().timestamp(),
        })
    }

    /// Queue one line (without CRLF) for the writer. A full queue means the
    /// peer stopped reading; the client is killed rather than blocking
    /// dispatch.
    pub fn send(&self, line: String) {
        if self.shutdown.is_cancelled() {
            return;
        }
        match self.outbound.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("[{}] reply queue overflow, killing client", self.id);
                self.shutdown.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn send_all<I: IntoIterator<Item = String>>(&self, lines: I) {
        for line in lines {
            self.send(line);
        }
    }

    pub fn touch(&self) {
        *self.atime.lock().expect("atime lock") = Instant::now();
        self.ping_pending.store(false, Ordering::Release);
    }

    pub fn idle_seconds(&self) -> u64 {
        self.atime.lock().expect("atime lock").elapsed().as_secs()
    }

    /// First quit wins; later quit paths see `false` and do nothing.
    pub fn mark_departed(&self) -> bool {
        !self.departed.swap(true, Ordering::AcqRel)
    }

    pub async fn is_registered(&self) -> bool {
        self.state.read().await.registered
    }

    pub async fn nick_or_star(&self) -> String {
        match &self.state.read().await.nick {
            Some(nick) => nick.display().to_owned(),
            None => "*".to_owned(),
        }
    }

    pub async fn profile(&self) -> Profile {
        let state = self.state.read().await;
        let nick = state
            .nick
            .as_ref()
            .map(|n| n.display().to_owned())
            .unwrap_or_else(|| "*".to_owned());
        let username = if state.username.is_empty() { "unknown".to_owned() } else { state.username.clone() };
        let host = state.shown_host().to_owned();
        let prefix = format!("{nick}!{username}@{host}");
        Profile { nick, username, host, prefix }
    }

    pub async fn has_cap(&self, cap: Capability) -> bool {
        self.state.read().await.caps.contains(&cap)
    }

    pub async fn is_operator(&self) -> bool {
        self.state.read().await.modes.has(UserMode::Operator)
    }
}

/// Reader: pull CRLF lines off the socket, parse, hand commands to the
/// dispatch queue. Ends on EOF, I/O error or shutdown, and always reports
/// the connection to the server for teardown.
pub async fn reader_task(
    read_half: ReadHalf<BoxConn>,
    client: ClientRef,
    events: mpsc::Sender<ServerEvent>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let reason;

    loop {
        line.clear();
        let read = tokio::select! {
            _ = client.shutdown.cancelled() => {
                reason = Text::plain("connection closed");
                break;
            }
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) => {
                reason = Text::plain("EOF");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!("[{}] read error: {err}", client.id);
                reason = Text::plain("read error");
                break;
            }
        }

        // lines longer than the wire limit are clipped, not fatal
        if line.len() > MAX_LINE_LEN {
            let mut end = MAX_LINE_LEN;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).trim_start();
        client.touch();
        if trimmed.is_empty() {
            continue;
        }

        info!("[{}] >> {trimmed}", client.id);
        let Some((code, parsed)) = parse_command(trimmed) else {
            continue;
        };
        if events
            .send(ServerEvent::Command { client: client.clone(), code, parsed })
            .await
            .is_err()
        {
            reason = Text::plain("server shutting down");
            break;
        }
    }

    let _ = events.send(ServerEvent::Quit { client, reason }).await;
}

/// Writer: drain the outbound queue to the socket, appending CRLF. On
/// shutdown the already-queued tail (the ERROR line included) is flushed
/// before the task ends.
pub async fn writer_task(
    mut write_half: WriteHalf<BoxConn>,
    client: ClientRef,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<ServerEvent>,
) {
    loop {
        let line = tokio::select! {
            _ = client.shutdown.cancelled() => break,
            line = outbound.recv() => match line {
                Some(line) => line,
                None => return,
            },
        };
        if write_line(&mut write_half, &line).await.is_err() {
            let _ = events
                .send(ServerEvent::Quit {
                    client: client.clone(),
                    reason: Text::plain("write error"),
                })
                .await;
            return;
        }
    }

    // drain whatever dispatch queued before the cancellation
    while let Ok(line) = outbound.try_recv() {
        if write_line(&mut write_half, &line).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_line(write_half: &mut WriteHalf<BoxConn>, line: &str) -> std::io::Result<()> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\r\n").await?;
    write_half.flush().await
}

/// Idle watchdog: after 180 s of silence send `PING :<server>`; if nothing
/// arrives for another 90 s, report a ping timeout.
pub async fn watchdog_task(client: ClientRef, server: Arc<Server>, events: mpsc::Sender<ServerEvent>) {
    loop {
        let idle = client.atime.lock().expect("atime lock").elapsed();
        let remaining = IDLE_TIMEOUT.saturating_sub(idle);
        if !remaining.is_zero() {
            tokio::select! {
                _ = client.shutdown.cancelled() => return,
                _ = tokio::time::sleep(remaining) => {}
            }
            continue;
        }

        client.ping_pending.store(true, Ordering::Release);
        client.send(crate::replies::ping(&server.server_name().await));

        tokio::select! {
            _ = client.shutdown.cancelled() => return,
            _ = tokio::time::sleep(QUIT_TIMEOUT) => {}
        }
        if client.ping_pending.load(Ordering::Acquire) {
            let _ = events
                .send(ServerEvent::Quit { client, reason: Text::plain("ping timeout") })
                .await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostmask_is_deterministic_and_distinct() {
        let a = derive_hostmask("host-a.example.com");
        let b = derive_hostmask("host-b.example.com");
        assert_eq!(a, derive_hostmask("host-a.example.com"));
        assert_ne!(a, b);
        assert!(a.ends_with(".masked"));
    }

    #[tokio::test]
    async fn shown_host_follows_hostmask_mode() {
        let state = ClientState::new("real.example.com".to_owned(), false, true);
        assert_eq!(state.shown_host(), state.hostmask);
        assert_eq!(state.host_for(true), "real.example.com");

        let mut unmasked = ClientState::new("real.example.com".to_owned(), false, true);
        unmasked.modes.unset(UserMode::HostMask);
        assert_eq!(unmasked.shown_host(), "real.example.com");
    }

    #[tokio::test]
    async fn secure_connections_get_the_mode() {
        let state = ClientState::new("h".to_owned(), true, true);
        assert!(state.modes.has(UserMode::SecureConn));
    }

    #[tokio::test]
    async fn reply_queue_overflow_kills_the_client() {
        let (tx, _rx) = mpsc::channel(2);
        let client = Client::new("h".to_owned(), false, true, tx);
        client.send("one".to_owned());
        client.send("two".to_owned());
        assert!(!client.shutdown.is_cancelled());
        client.send("three".to_owned());
        assert!(client.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn departed_flag_is_first_wins() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new("h".to_owned(), false, true, tx);
        assert!(client.mark_departed());
        assert!(!client.mark_departed());
    }
}
