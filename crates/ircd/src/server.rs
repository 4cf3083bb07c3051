//! The top-level multiplexer: owns every client and channel, accepts raw
//! connections, and runs the central event loop that serializes command
//! dispatch, teardown and signals.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::auth::PasswordStore;
use crate::client::{self, Client, ClientId, ClientRef};
use crate::commands::{Command, CommandError};
use crate::config::{Config, TlsListenConfig};
use crate::constants::{DISPATCH_QUEUE_LEN, REPLY_QUEUE_LEN};
use crate::errors::ConfigError;
use crate::handlers;
use crate::lookup::{ChannelNameMap, ClientLookupSet, WhoWas, WhoWasList};
use crate::metrics;
use crate::names::Text;
use crate::replies::{self, Numeric, numeric};

/// Any byte stream with a remote end: plain TCP, TLS, or an in-memory
/// duplex pipe in tests.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxConn = Box<dyn Conn>;

/// Events funneled into the dispatch loop.
pub enum ServerEvent {
    Command {
        client: ClientRef,
        code: String,
        parsed: Result<Command, CommandError>,
    },
    Quit {
        client: ClientRef,
        reason: Text,
    },
}

/// Rehash-mutable identity of the server.
pub struct ServerInfo {
    pub name: String,
    pub network: String,
    pub description: String,
    pub motd: Option<PathBuf>,
}

pub fn full_version() -> String {
    format!("ircd-{}", env!("CARGO_PKG_VERSION"))
}

const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub struct Server {
    pub info: RwLock<ServerInfo>,
    config_path: PathBuf,
    listen: Vec<String>,
    tls_listen: Vec<TlsListenConfig>,
    pub password: RwLock<Option<String>>,
    pub operators: RwLock<PasswordStore>,
    pub accounts: RwLock<PasswordStore>,
    pub whowas: RwLock<WhoWasList>,
    pub clients: ClientLookupSet,
    pub channels: ChannelNameMap,
    /// Every live connection, registered or not.
    pub sessions: DashMap<ClientId, ClientRef>,
    pub created: DateTime<Utc>,
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: StdMutex<Option<mpsc::Receiver<ServerEvent>>>,
    pub shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: Config, config_path: PathBuf) -> Arc<Server> {
        let (events_tx, events_rx) = mpsc::channel(DISPATCH_QUEUE_LEN);
        Arc::new(Server {
            info: RwLock::new(ServerInfo {
                name: config.server.name,
                network: config.network.name,
                description: config.server.description,
                motd: config.server.motd,
            }),
            config_path,
            listen: config.server.listen,
            tls_listen: config.server.tls_listen,
            password: RwLock::new(config.server.password),
            operators: RwLock::new(PasswordStore::new(&config.operators)),
            accounts: RwLock::new(PasswordStore::new(&config.accounts)),
            whowas: RwLock::new(WhoWasList::new(config.limits.whowas_size)),
            clients: ClientLookupSet::new(),
            channels: ChannelNameMap::new(),
            sessions: DashMap::new(),
            created: Utc::now(),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn server_name(&self) -> String {
        self.info.read().await.name.clone()
    }

    pub fn created_date(&self) -> String {
        self.created.format(DATE_FORMAT).to_string()
    }

    /// Spawn the central dispatch task. Commands and quit notifications
    /// from every connection task drain here, one at a time.
    pub fn start(self: &Arc<Self>) {
        let Some(mut events_rx) = self.events_rx.lock().expect("events receiver lock").take()
        else {
            return; // dispatch loop already running
        };
        let server = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = server.shutdown.cancelled() => return,
                    event = events_rx.recv() => event,
                };
                match event {
                    Some(ServerEvent::Command { client, code, parsed }) => {
                        server.dispatch(client, code, parsed).await;
                    }
                    Some(ServerEvent::Quit { client, reason }) => {
                        server.quit_client(&client, &reason).await;
                    }
                    None => return,
                }
            }
        });
    }

    /// Bind every configured listener, start dispatch, and wait for a
    /// shutdown signal.
    pub async fn run(self: &Arc<Self>) -> Result<(), ConfigError> {
        metrics::init();

        let (intake_tx, mut intake_rx) = mpsc::channel::<(BoxConn, String, bool)>(64);
        for addr in self.listen.clone() {
            let listener = TcpListener::bind(&addr).await?;
            info!("{} listening on {addr}", self.server_name().await);
            self.spawn_acceptor(listener, None, intake_tx.clone());
        }
        for tls in self.tls_listen.clone() {
            let acceptor = tls_acceptor(&tls)?;
            let listener = TcpListener::bind(&tls.addr).await?;
            info!("{} listening on {} (TLS)", self.server_name().await, tls.addr);
            self.spawn_acceptor(listener, Some(acceptor), intake_tx.clone());
        }
        drop(intake_tx);

        self.start();
        let server = self.clone();
        tokio::spawn(async move {
            while let Some((conn, host, secure)) = intake_rx.recv().await {
                server.attach(conn, host, secure).await;
            }
        });

        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }

        // graceful shutdown: announce, give clients a moment, tear down
        self.global_notice("shutting down...").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let sessions: Vec<ClientRef> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        for client in sessions {
            self.quit_client(&client, &Text::plain("server shutting down")).await;
        }
        self.shutdown.cancel();
        Ok(())
    }

    fn spawn_acceptor(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        intake: mpsc::Sender<(BoxConn, String, bool)>,
    ) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    accepted = listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!("accept error: {err}");
                        continue;
                    }
                };
                debug!("accept: {peer}");
                let host = peer.ip().to_string();
                match &tls {
                    None => {
                        let _ = intake.send((Box::new(stream) as BoxConn, host, false)).await;
                    }
                    Some(acceptor) => {
                        let acceptor = acceptor.clone();
                        let intake = intake.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    let _ = intake
                                        .send((Box::new(tls_stream) as BoxConn, host, true))
                                        .await;
                                }
                                Err(err) => debug!("tls handshake with {host} failed: {err}"),
                            }
                        });
                    }
                }
            }
        });
    }

    /// Hand a fresh byte stream to a new client actor: reader, writer and
    /// idle watchdog. Public so tests can attach in-memory streams.
    pub async fn attach(self: &Arc<Self>, conn: BoxConn, host: String, secure: bool) -> ClientRef {
        let authorized = self.password.read().await.is_none();
        let (outbound_tx, outbound_rx) = mpsc::channel(REPLY_QUEUE_LEN);
        let client = Client::new(host, secure, authorized, outbound_tx);
        self.sessions.insert(client.id, client.clone());
        metrics::CONNECTIONS.set(self.sessions.len() as i64);

        let (read_half, write_half) = tokio::io::split(conn);
        tokio::spawn(client::reader_task(read_half, client.clone(), self.events_tx.clone()));
        tokio::spawn(client::writer_task(
            write_half,
            client.clone(),
            outbound_rx,
            self.events_tx.clone(),
        ));
        tokio::spawn(client::watchdog_task(client.clone(), self.clone(), self.events_tx.clone()));
        client
    }

    pub async fn send_numeric(&self, client: &ClientRef, reply: Numeric<'_>) {
        let sname = self.server_name().await;
        let nick = client.nick_or_star().await;
        client.send(numeric(&sname, &nick, &reply));
    }

    /// Route one parsed command to its handler. Command handlers split on
    /// the registration state; before REGISTERED only the handshake
    /// commands are accepted and everything else is dropped.
    async fn dispatch(
        self: &Arc<Self>,
        client: ClientRef,
        code: String,
        parsed: Result<Command, CommandError>,
    ) {
        metrics::COMMANDS.inc();
        let _timer = metrics::COMMAND_DURATION.with_label_values(&[&code]).start_timer();

        let cmd = match parsed {
            Ok(cmd) => cmd,
            Err(CommandError::NotEnoughArgs { .. }) if code == "NICK" => {
                self.send_numeric(&client, Numeric::NoNicknameGiven).await;
                return;
            }
            Err(_) => {
                self.send_numeric(&client, Numeric::NeedMoreParams { command: &code }).await;
                return;
            }
        };

        if !client.is_registered().await {
            match cmd {
                Command::Pass { password } => handlers::registration::pass(self, &client, &password).await,
                Command::Cap { sub, raw_sub, caps } => {
                    handlers::registration::cap(self, &client, sub, &raw_sub, &caps).await
                }
                Command::Nick { nickname } => {
                    handlers::registration::nick(self, &client, nickname).await
                }
                Command::User { username, mode, realname } => {
                    handlers::registration::user(self, &client, username, mode, realname).await
                }
                Command::Authenticate { arg } => {
                    handlers::registration::authenticate(self, &client, &arg).await
                }
                Command::Quit { message } => {
                    let reason = message.unwrap_or_else(|| Text::plain(""));
                    self.quit_client(&client, &reason).await;
                }
                other => {
                    debug!("[{}] dropped pre-registration command {other:?}", client.id);
                }
            }
            return;
        }

        match cmd {
            Command::Pass { .. } | Command::User { .. } => {
                self.send_numeric(&client, Numeric::AlreadyRegistered).await;
            }
            Command::Cap { sub, raw_sub, caps } => {
                handlers::registration::cap(self, &client, sub, &raw_sub, &caps).await
            }
            Command::Authenticate { arg } => {
                handlers::registration::authenticate(self, &client, &arg).await
            }
            Command::Nick { nickname } => {
                handlers::registration::nick(self, &client, nickname).await
            }
            Command::Quit { message } => {
                let reason = message.unwrap_or_else(|| Text::plain(""));
                self.quit_client(&client, &reason).await;
            }
            Command::Join { zero, channels } => {
                handlers::channels::join(self, &client, zero, channels).await
            }
            Command::Part { channels, message } => {
                handlers::channels::part(self, &client, channels, message).await
            }
            Command::Topic { channel, topic } => {
                handlers::channels::topic(self, &client, channel, topic).await
            }
            Command::ChannelModeCmd { channel, changes } => {
                handlers::channels::channel_mode(self, &client, channel, changes).await
            }
            Command::UserModeCmd { nickname, changes } => {
                handlers::misc::user_mode(self, &client, nickname, changes).await
            }
            Command::Names { channels, .. } => {
                handlers::channels::names(self, &client, channels).await
            }
            Command::List { channels, target } => {
                handlers::channels::list(self, &client, channels, target).await
            }
            Command::Invite { nickname, channel } => {
                handlers::channels::invite(self, &client, nickname, channel).await
            }
            Command::Kick { kicks, comment } => {
                handlers::channels::kick(self, &client, kicks, comment).await
            }
            Command::PrivMsg { target, message } => {
                handlers::messages::privmsg(self, &client, target, message, false).await
            }
            Command::Notice { target, message } => {
                handlers::messages::privmsg(self, &client, target, message, true).await
            }
            Command::Away { text } => handlers::messages::away(self, &client, text).await,
            Command::IsOn { nicks } => handlers::messages::ison(self, &client, nicks).await,
            Command::Who { mask, operator_only } => {
                handlers::messages::who(self, &client, mask, operator_only).await
            }
            Command::Whois { masks, .. } => handlers::messages::whois(self, &client, masks).await,
            Command::WhoWas { nicknames, count, .. } => {
                handlers::messages::whowas(self, &client, nicknames, count).await
            }
            Command::Ping { origin } => handlers::misc::ping(self, &client, origin).await,
            Command::Pong { .. } => {} // activity already noted by the reader
            Command::Motd { .. } => self.motd_to(&client).await,
            Command::LUsers => self.lusers_to(&client).await,
            Command::Version { target } => handlers::misc::version(self, &client, target).await,
            Command::Time { target } => handlers::misc::time(self, &client, target).await,
            Command::Oper { name, password } => {
                handlers::misc::oper(self, &client, name, &password).await
            }
            Command::Rehash => handlers::misc::rehash(self, &client).await,
            Command::Wallops { message } => handlers::misc::wallops(self, &client, message).await,
            Command::Kill { nickname, comment } => {
                handlers::misc::kill(self, &client, nickname, comment).await
            }
            Command::Unknown { command, .. } => {
                self.send_numeric(&client, Numeric::UnknownCommand { command: &command }).await;
            }
        }
    }

    /// The one teardown path: QUIT, EOF, write error, ping timeout, KILL
    /// and server shutdown all end here. Broadcasts QUIT to channel-mates
    /// exactly once, removes the client from every index and channel,
    /// appends who-was history and closes the connection.
    pub async fn quit_client(self: &Arc<Self>, client: &ClientRef, reason: &Text) {
        if !client.mark_departed() {
            return;
        }
        let profile = client.profile().await;
        info!("[{}] {} quit: {reason}", client.id, profile.nick);

        let (nick, channels, whowas_entry) = {
            let mut state = client.state.write().await;
            let nick = state.nick.clone();
            let channels: Vec<_> = state.channels.drain().collect();
            let entry = nick.as_ref().map(|nick| WhoWas {
                nickname: nick.clone(),
                username: state.username.clone(),
                hostname: state.hostname.clone(),
                hostmask: state.hostmask.clone(),
                realname: state.realname.clone(),
            });
            (nick, channels, entry)
        };

        let quit_line = replies::quit(&profile.prefix, reason);
        for name in channels {
            if let Some(channel) = self.channels.get(name.folded()) {
                if channel.remove_on_quit(client, &quit_line).await {
                    self.channels.remove(&name);
                }
            }
        }
        metrics::CHANNELS.set(self.channels.count() as i64);

        if let Some(nick) = nick {
            self.clients.remove(&nick, client.id);
        }
        if let Some(entry) = whowas_entry {
            self.whowas.write().await.append(entry);
        }

        client.send(replies::error_line(&format!("closing link: {reason}")));
        client.shutdown.cancel();
        self.sessions.remove(&client.id);
        metrics::CONNECTIONS.set(self.sessions.len() as i64);
        metrics::REGISTERED.set(self.clients.count() as i64);
    }

    /// NOTICE from the server to every registered client.
    pub async fn global_notice(&self, message: &str) {
        let sname = self.server_name().await;
        let text = Text::plain(message);
        for client in self.clients.all() {
            metrics::MESSAGES.inc();
            let nick = client.nick_or_star().await;
            client.send(replies::notice(&sname, &nick, &text));
        }
    }

    /// NOTICE to every client with the wallops user mode.
    pub async fn wallops(&self, message: &str) {
        let sname = self.server_name().await;
        let text = Text::plain(message);
        for client in self.clients.all() {
            let receives = client.state.read().await.modes.has(crate::modes::UserMode::WallOps);
            if receives {
                metrics::MESSAGES.inc();
                let nick = client.nick_or_star().await;
                client.send(replies::notice(&sname, &nick, &text));
            }
        }
    }

    pub async fn motd_to(&self, client: &ClientRef) {
        let motd_path = self.info.read().await.motd.clone();
        let Some(path) = motd_path else {
            self.send_numeric(client, Numeric::NoMotd).await;
            return;
        };
        let Ok(contents) = tokio::fs::read_to_string(&path).await else {
            self.send_numeric(client, Numeric::NoMotd).await;
            return;
        };

        let sname = self.server_name().await;
        self.send_numeric(client, Numeric::MotdStart { server: &sname }).await;
        for line in contents.lines() {
            self.send_numeric(client, Numeric::Motd { line: line.trim_end() }).await;
        }
        self.send_numeric(client, Numeric::EndOfMotd).await;
    }

    pub async fn lusers_to(&self, client: &ClientRef) {
        let users = self.clients.count();
        self.send_numeric(client, Numeric::LUserClient { users, invisible: 0, servers: 1 }).await;

        let mut operators = 0;
        for other in self.clients.all() {
            if other.is_operator().await {
                operators += 1;
            }
        }
        if operators > 0 {
            self.send_numeric(client, Numeric::LUserOp { count: operators }).await;
        }

        let unknown = self.sessions.len().saturating_sub(users);
        if unknown > 0 {
            self.send_numeric(client, Numeric::LUserUnknown { count: unknown }).await;
        }

        let channels = self.channels.count();
        if channels > 0 {
            self.send_numeric(client, Numeric::LUserChannels { count: channels }).await;
        }
        self.send_numeric(client, Numeric::LUserMe { clients: users, servers: 1 }).await;
    }

    /// Re-read the configuration: identity, MOTD path, credentials.
    pub async fn rehash(&self) -> Result<(), ConfigError> {
        let config = Config::load(&self.config_path)?;
        {
            let mut info = self.info.write().await;
            info.name = config.server.name;
            info.network = config.network.name;
            info.description = config.server.description;
            info.motd = config.server.motd;
        }
        *self.password.write().await = config.server.password;
        *self.operators.write().await = PasswordStore::new(&config.operators);
        *self.accounts.write().await = PasswordStore::new(&config.accounts);
        Ok(())
    }

    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }

    pub fn format_time(now: DateTime<Utc>) -> String {
        now.format(DATE_FORMAT).to_string()
    }
}

fn tls_acceptor(config: &TlsListenConfig) -> Result<TlsAcceptor, ConfigError> {
    use std::fs::File;
    use std::io::BufReader;

    let tls_err = |reason: String| ConfigError::Tls { addr: config.addr.clone(), reason };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(&config.cert)?))
        .collect::<Result<_, _>>()
        .map_err(|err| tls_err(format!("bad certificate: {err}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&config.key)?))
        .map_err(|err| tls_err(format!("bad key: {err}")))?
        .ok_or_else(|| tls_err("no private key found".to_owned()))?;

    let tls_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| tls_err(err.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
