//! IRC client task.
//!
//! This is the main entry point for SDK consumers. It manages the TCP
//! connection, IRC registration and keepalive, and emits [`Event`]s.
//! Supports both plaintext and TLS connections.
//!
//! Two request kinds wait for the server instead of returning as soon as the
//! line is written: [`ClientHandle::join`] resolves when the server echoes our
//! own JOIN (or rejects it with a join-error numeric), and
//! [`ClientHandle::whois`] resolves on `RPL_ENDOFWHOIS` with the collected
//! reply lines.
//!
//! ## Reconnection
//!
//! The SDK does not reconnect once a session is lost. [`connect_with_retries`]
//! only retries the initial handshake; consumers listen for
//! [`Event::Disconnected`] and decide what to do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::{Message, Prefix};

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "hearth".to_string(),
            user: "hearth".to_string(),
            realname: "hearth bot".to_string(),
            tls: false,
            tls_insecure: false,
        }
    }
}

/// Failures reported back to a waiting [`ClientHandle`] call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot join {channel}: {reason}")]
    JoinRejected { channel: String, reason: String },
    #[error("no such nick: {0}")]
    NoSuchNick(String),
    #[error("connection closed")]
    Closed,
}

/// Collected WHOIS reply for one nick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhoisInfo {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    /// Services account from `RPL_WHOISACCOUNT`.
    pub account: Option<String>,
    pub channels: Vec<String>,
}

type JoinReply = oneshot::Sender<Result<(), ClientError>>;
type WhoisReply = oneshot::Sender<Result<WhoisInfo, ClientError>>;

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join {
        channel: String,
        key: Option<String>,
        done: JoinReply,
    },
    Part {
        channel: String,
        reason: Option<String>,
    },
    Privmsg {
        target: String,
        text: String,
    },
    Whois {
        nick: String,
        reply: WhoisReply,
    },
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Join a channel and wait until the server confirms it.
    pub async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Join {
                channel: channel.to_string(),
                key: key.map(str::to_string),
                done,
            })
            .await?;
        rx.await.map_err(|_| ClientError::Closed)??;
        Ok(())
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Part {
                channel: channel.to_string(),
                reason: reason.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Send WHOIS and wait for the aggregated reply.
    pub async fn whois(&self, nick: &str) -> Result<WhoisInfo> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Whois {
                nick: nick.to_string(),
                reply,
            })
            .await?;
        Ok(rx.await.map_err(|_| ClientError::Closed)??)
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    // Auto-detect TLS from port if not explicitly set
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let tls_config = if config.tls_insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = config
        .server_addr
        .split(':')
        .next()
        .unwrap_or("localhost");
    let dns_name = rustls::pki_types::ServerName::try_from(server_name.to_string())?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

/// Establish a connection, retrying up to `attempts` times with
/// exponential backoff (2s doubling, capped at 30s).
pub async fn establish_with_retries(
    config: &ConnectConfig,
    attempts: u32,
) -> Result<EstablishedConnection> {
    let attempts = attempts.max(1);
    let mut delay = Duration::from_secs(2);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match establish_connection(config).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt >= attempts => {
                return Err(e.context(format!("giving up after {attempts} attempts")));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                let jitter = rand_jitter(delay.as_millis() as u64 / 4);
                delay = Duration::from_millis(
                    (delay.as_millis() as u64 * 2 + jitter).min(30_000),
                );
            }
        }
    }
}

/// Connect with a retry budget and start the client task.
pub async fn connect_with_retries(
    config: ConnectConfig,
    attempts: u32,
) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    let conn = establish_with_retries(&config, attempts).await?;
    Ok(connect_with_stream(conn, config))
}

/// Run the IRC protocol over an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The protocol runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

fn install_crypto_provider() {
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

/// In-flight WHOIS for one nick.
struct PendingWhois {
    info: WhoisInfo,
    found: bool,
    waiters: Vec<WhoisReply>,
}

/// Per-session protocol state owned by the client task.
struct Session {
    nick: String,
    registered: bool,
    nick_tries: u32,
    queued: Vec<Command>,
    joins: HashMap<String, Vec<JoinReply>>,
    whois: HashMap<String, PendingWhois>,
}

impl Session {
    fn new(config: &ConnectConfig) -> Self {
        Session {
            nick: config.nick.clone(),
            registered: false,
            nick_tries: 0,
            queued: Vec::new(),
            joins: HashMap::new(),
            whois: HashMap::new(),
        }
    }

    fn is_me(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nick)
    }

    fn whois_entry(&mut self, nick: &str) -> Option<&mut PendingWhois> {
        self.whois.get_mut(&nick.to_ascii_lowercase())
    }
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(b"CAP LS 302\r\n").await?;
    writer
        .write_all(format!("NICK {}\r\n", config.nick).as_bytes())
        .await?;
    writer
        .write_all(format!("USER {} 0 * :{}\r\n", config.user, config.realname).as_bytes())
        .await?;

    let mut session = Session::new(config);
    let mut line_buf = Vec::new();
    let mut last_activity = tokio::time::Instant::now();
    let mut last_ping = last_activity;
    let ping_interval = Duration::from_secs(60);
    let ping_timeout = Duration::from_secs(120);

    loop {
        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }

                last_activity = tokio::time::Instant::now();
                // servers relay whatever bytes clients send
                let parsed = {
                    let line = String::from_utf8_lossy(&line_buf);
                    tracing::trace!(line = %line.trim_end(), "<-");
                    Message::parse(&line)
                };
                line_buf.clear();

                if let Some(msg) = parsed {
                    handle_line(&msg, config, &mut session, &mut writer, &event_tx).await?;
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if session.registered || matches!(cmd, Command::Quit(_)) {
                    let quitting = matches!(cmd, Command::Quit(_));
                    execute_command(&mut writer, cmd, &mut session).await?;
                    if quitting && !session.registered {
                        break;
                    }
                } else {
                    // Queue until registered; JOINs sent earlier are dropped by servers.
                    session.queued.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(last_activity.max(last_ping) + ping_interval) => {
                if last_activity.elapsed() > ping_timeout {
                    let _ = event_tx.send(Event::Disconnected { reason: "Ping timeout".to_string() }).await;
                    break;
                }
                writer.write_all(b"PING :keepalive\r\n").await?;
                last_ping = tokio::time::Instant::now();
            }
        }
    }

    Ok(())
}

async fn handle_line<W: AsyncWrite + Unpin>(
    msg: &Message,
    config: &ConnectConfig,
    session: &mut Session,
    writer: &mut W,
    event_tx: &mpsc::Sender<Event>,
) -> Result<()> {
    let param = |i: usize| msg.params.get(i).cloned().unwrap_or_default();

    match msg.command.as_str() {
        "PING" => {
            let token = msg.params.first().map(|s| s.as_str()).unwrap_or("");
            writer.write_all(format!("PONG :{token}\r\n").as_bytes()).await?;
        }
        "CAP" => handle_cap_response(msg, writer).await?,
        // RPL_WELCOME
        "001" => {
            session.nick = param(0);
            session.registered = true;
            let server = msg.prefix.clone().unwrap_or_default();
            let _ = event_tx
                .send(Event::Registered {
                    nick: session.nick.clone(),
                    server,
                })
                .await;
            // Flush any commands that were queued before registration
            for cmd in std::mem::take(&mut session.queued) {
                execute_command(writer, cmd, session).await?;
            }
        }
        // ERR_NICKNAMEINUSE
        "433" if !session.registered => {
            session.nick_tries = session.nick_tries.saturating_add(1);
            if session.nick_tries > 5 {
                anyhow::bail!("Nick in use");
            }
            let alt = format!("{}{}", config.nick, session.nick_tries);
            writer.write_all(format!("NICK {alt}\r\n").as_bytes()).await?;
            session.nick = alt;
        }
        "JOIN" => {
            let channel = param(0);
            let nick = msg.source_nick().unwrap_or("").to_string();
            if session.is_me(&nick) {
                for done in session
                    .joins
                    .remove(&channel.to_ascii_lowercase())
                    .unwrap_or_default()
                {
                    let _ = done.send(Ok(()));
                }
            }
            let _ = event_tx.send(Event::Joined { channel, nick }).await;
        }
        // Join rejections: no such channel, too many channels, full,
        // invite only, banned, bad key.
        "403" | "405" | "471" | "473" | "474" | "475" => {
            let channel = param(1);
            let reason = param(2);
            for done in session
                .joins
                .remove(&channel.to_ascii_lowercase())
                .unwrap_or_default()
            {
                let _ = done.send(Err(ClientError::JoinRejected {
                    channel: channel.clone(),
                    reason: reason.clone(),
                }));
            }
            let _ = event_tx
                .send(Event::ServerNotice {
                    text: format!("{channel}: {reason}"),
                })
                .await;
        }
        "PART" => {
            let channel = param(0);
            let nick = msg.source_nick().unwrap_or("").to_string();
            let _ = event_tx.send(Event::Parted { channel, nick }).await;
        }
        "KICK" if msg.params.len() >= 2 => {
            let by = msg.source_nick().unwrap_or("server").to_string();
            let _ = event_tx
                .send(Event::Kicked {
                    channel: param(0),
                    nick: param(1),
                    by,
                    reason: param(2),
                })
                .await;
        }
        "NICK" => {
            let old_nick = msg.source_nick().unwrap_or("").to_string();
            let new_nick = param(0);
            if !old_nick.is_empty() && !new_nick.is_empty() {
                if session.is_me(&old_nick) {
                    session.nick = new_nick.clone();
                }
                let _ = event_tx.send(Event::NickChanged { old_nick, new_nick }).await;
            }
        }
        "QUIT" => {
            let nick = msg.source_nick().unwrap_or("").to_string();
            let _ = event_tx
                .send(Event::UserQuit {
                    nick,
                    reason: param(0),
                })
                .await;
        }
        "PRIVMSG" if msg.params.len() >= 2 => {
            let from = Prefix::parse(msg.prefix.as_deref().unwrap_or(""));
            let _ = event_tx
                .send(Event::Message {
                    from,
                    target: param(0),
                    text: param(1),
                    tags: msg.tags.clone(),
                })
                .await;
        }
        "NOTICE" => {
            let _ = event_tx
                .send(Event::ServerNotice {
                    text: msg.params.last().cloned().unwrap_or_default(),
                })
                .await;
        }
        // RPL_WHOISUSER: <me> <nick> <user> <host> * :<realname>
        "311" if msg.params.len() >= 6 => {
            if let Some(p) = session.whois_entry(&msg.params[1]) {
                p.found = true;
                p.info.nick = msg.params[1].clone();
                p.info.user = Some(msg.params[2].clone());
                p.info.host = Some(msg.params[3].clone());
                p.info.realname = Some(msg.params[5].clone());
            }
        }
        // RPL_WHOISSERVER: <me> <nick> <server> :<server info>
        "312" if msg.params.len() >= 3 => {
            if let Some(p) = session.whois_entry(&msg.params[1]) {
                p.info.server = Some(msg.params[2].clone());
            }
        }
        // RPL_WHOISCHANNELS: <me> <nick> :<channels>
        "319" if msg.params.len() >= 3 => {
            if let Some(p) = session.whois_entry(&msg.params[1]) {
                p.info
                    .channels
                    .extend(msg.params[2].split_whitespace().map(str::to_string));
            }
        }
        // RPL_WHOISACCOUNT: <me> <nick> <account> :is logged in as
        "330" if msg.params.len() >= 3 => {
            if let Some(p) = session.whois_entry(&msg.params[1]) {
                p.info.account = Some(msg.params[2].clone());
            }
        }
        // ERR_NOSUCHNICK; RPL_ENDOFWHOIS follows and resolves the waiters.
        "401" if msg.params.len() >= 2 => {
            if let Some(p) = session.whois_entry(&msg.params[1]) {
                p.found = false;
            }
        }
        // RPL_ENDOFWHOIS
        "318" if msg.params.len() >= 2 => {
            if let Some(p) = session.whois.remove(&msg.params[1].to_ascii_lowercase()) {
                for reply in p.waiters {
                    let result = if p.found {
                        Ok(p.info.clone())
                    } else {
                        Err(ClientError::NoSuchNick(msg.params[1].clone()))
                    };
                    let _ = reply.send(result);
                }
            }
        }
        other => {
            if let Ok(num) = other.parse::<u16>()
                && ((400..600).contains(&num) || (900..1000).contains(&num))
            {
                let text = msg.params.get(1..).unwrap_or_default().join(" ");
                let _ = event_tx.send(Event::ServerNotice { text }).await;
            }
        }
    }
    Ok(())
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cmd: Command,
    session: &mut Session,
) -> Result<()> {
    match cmd {
        Command::Join { channel, key, done } => {
            session
                .joins
                .entry(channel.to_ascii_lowercase())
                .or_default()
                .push(done);
            let line = match key {
                Some(k) => format!("JOIN {} {}", sanitize(&channel), sanitize(&k)),
                None => format!("JOIN {}", sanitize(&channel)),
            };
            write_line(writer, &line).await?;
        }
        Command::Part { channel, reason } => {
            let line = match reason {
                Some(r) => format!("PART {} :{}", sanitize(&channel), sanitize(&r)),
                None => format!("PART {}", sanitize(&channel)),
            };
            write_line(writer, &line).await?;
        }
        Command::Privmsg { target, text } => {
            write_line(writer, &format!("PRIVMSG {} :{}", sanitize(&target), sanitize(&text)))
                .await?;
        }
        Command::Whois { nick, reply } => {
            let key = nick.to_ascii_lowercase();
            let already_pending = session.whois.contains_key(&key);
            session
                .whois
                .entry(key)
                .or_insert_with(|| PendingWhois {
                    info: WhoisInfo {
                        nick: nick.clone(),
                        ..Default::default()
                    },
                    found: false,
                    waiters: Vec::new(),
                })
                .waiters
                .push(reply);
            if !already_pending {
                write_line(writer, &format!("WHOIS {}", sanitize(&nick))).await?;
            }
        }
        Command::Quit(msg) => {
            let line = match msg {
                Some(m) => format!("QUIT :{}", sanitize(&m)),
                None => "QUIT".to_string(),
            };
            write_line(writer, &line).await?;
        }
    }
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    tracing::trace!(line, "->");
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}

/// Strip CR/LF so user-supplied text cannot inject extra protocol lines.
fn sanitize(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

async fn handle_cap_response<W: AsyncWrite + Unpin>(msg: &Message, writer: &mut W) -> Result<()> {
    let subcmd = msg.params.get(1).map(|s| s.to_ascii_uppercase());
    match subcmd.as_deref() {
        Some("LS") => {
            let offered = msg.params.last().map(|s| s.as_str()).unwrap_or("");
            let req_caps: Vec<&str> = ["message-tags", "account-tag", "account-notify"]
                .into_iter()
                .filter(|cap| offered.split_whitespace().any(|o| o.split('=').next() == Some(*cap)))
                .collect();
            if req_caps.is_empty() {
                writer.write_all(b"CAP END\r\n").await?;
            } else {
                let req = format!("CAP REQ :{}\r\n", req_caps.join(" "));
                writer.write_all(req.as_bytes()).await?;
            }
        }
        Some("ACK") | Some("NAK") => {
            writer.write_all(b"CAP END\r\n").await?;
        }
        _ => {}
    }
    Ok(())
}

/// Random value in `0..max`, or 0 when `max` is 0.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}
