//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   [Transport::ImplicitTls] TLS handshake before anything else
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   [Transport::StartTls] client sends STARTTLS, then TLS handshake
//!       |
//!   Client sends LOGIN (checked against the mailbox credentials)
//!       |
//!   LIST / STATUS / SELECT / FETCH / UID FETCH / UID STORE / EXPUNGE
//!   (UID EXPUNGE only once UIDPLUS is advertised)
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! Every client command starts with a **tag** (async-imap uses
//! `A0001`, `A0002`, ...). The server echoes it in the completion:
//!
//! ```text
//!   Client:  A0003 STATUS "INBOX" (MESSAGES UNSEEN)
//!   Server:  * STATUS "INBOX" (MESSAGES 3 UNSEEN 1)
//!   Server:  A0003 OK STATUS completed
//! ```
//!
//! Message bodies travel as counted literals, `{bytecount}\r\n`
//! followed by exactly that many raw bytes.

use super::handlers::{
    handle_capability, handle_expunge, handle_fetch, handle_list, handle_login, handle_logout,
    handle_noop, handle_select, handle_status, handle_uid_fetch, handle_uid_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// How the server secures a connection before LOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    StartTls,
    ImplicitTls,
    Plain,
    /// Accept TCP, then never say anything.
    Silent,
}

/// A command the server reads and then never answers, to exercise
/// per-operation timeouts on an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    Select,
    Fetch,
}

impl Stall {
    fn matches(self, body: &CommandBody<'_>) -> bool {
        match self {
            Self::Select => matches!(body, CommandBody::Select { .. }),
            Self::Fetch => matches!(body, CommandBody::Fetch { uid: false, .. }),
        }
    }
}

/// Switches tests flip after `start`, read per command.
#[derive(Debug, Default, Clone, Copy)]
struct Behavior {
    uidplus: bool,
    stall: Option<Stall>,
    flag_noise: bool,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicUsize,
    logouts: AtomicUsize,
}

/// A fake IMAP server on localhost with an OS-assigned port.
///
/// A self-signed certificate for `127.0.0.1` is generated at startup
/// with `rcgen`, so clients must skip certificate verification.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    counters: Arc<Counters>,
    behavior: Arc<Mutex<Behavior>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a STARTTLS server with the given mailbox state.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, Transport::StartTls).await
    }

    /// Start a server using `transport`.
    ///
    /// The server runs until the `FakeImapServer` is dropped.
    pub async fn start_with(mailbox: Mailbox, transport: Transport) -> Self {
        // Multiple tests may race to install the provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let counters = Arc::new(Counters::default());
        let behavior = Arc::new(Mutex::new(Behavior::default()));

        let handle = {
            let mailbox = mailbox.clone();
            let counters = counters.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    counters.connections.fetch_add(1, Ordering::SeqCst);
                    let acceptor = acceptor.clone();
                    let shared = Shared {
                        mailbox: mailbox.clone(),
                        counters: counters.clone(),
                        behavior: behavior.clone(),
                    };
                    tokio::spawn(async move {
                        handle_connection(stream, transport, acceptor, &shared).await;
                    });
                }
            })
        };

        Self {
            port,
            mailbox,
            counters,
            behavior,
            _handle: handle,
        }
    }

    /// Advertise UIDPLUS and accept `UID EXPUNGE`.
    pub fn advertise_uidplus(&self) {
        self.behavior.lock().unwrap().uidplus = true;
    }

    /// Precede every UID STORE reply with an unsolicited
    /// `* 1 FETCH (FLAGS (\Seen))`, as a server does when another
    /// client changed flags meanwhile.
    pub fn push_flag_updates(&self) {
        self.behavior.lock().unwrap().flag_noise = true;
    }

    /// Leave every later `stall` command unanswered.
    pub fn stall_on(&self, stall: Stall) {
        self.behavior.lock().unwrap().stall = Some(stall);
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Current mailbox state, including changes made by clients.
    pub fn snapshot(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// LOGOUT commands answered so far.
    pub fn logouts(&self) -> usize {
        self.counters.logouts.load(Ordering::SeqCst)
    }
}

/// Server state one connection task works against.
struct Shared {
    mailbox: Arc<Mutex<Mailbox>>,
    counters: Arc<Counters>,
    behavior: Arc<Mutex<Behavior>>,
}

async fn handle_connection(
    stream: TcpStream,
    transport: Transport,
    acceptor: TlsAcceptor,
    shared: &Shared,
) {
    match transport {
        Transport::Plain => {
            let mut reader = BufReader::new(stream);
            if greet(&mut reader).await {
                handle_imap_session(reader.into_inner(), shared).await;
            }
        }
        Transport::ImplicitTls => {
            let Ok(tls_stream) = acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls_stream);
            if greet(&mut reader).await {
                handle_imap_session(reader.into_inner(), shared).await;
            }
        }
        Transport::StartTls => {
            let mut reader = BufReader::new(stream);
            if !greet(&mut reader).await || !starttls(&mut reader).await {
                return;
            }
            let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
                return;
            };
            handle_imap_session(tls_stream, shared).await;
        }
        Transport::Silent => hold_open(&mut BufReader::new(stream)).await,
    }
}

/// Swallow input until the client gives up and closes the socket.
async fn hold_open<S: AsyncRead + Unpin>(reader: &mut BufReader<S>) {
    let mut sink = String::new();
    while matches!(reader.read_line(&mut sink).await, Ok(n) if n > 0) {
        sink.clear();
    }
}

/// RFC 3501 Section 7.1.1: server greeting.
async fn greet<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>) -> bool {
    write_line(reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_ok()
}

/// Wait for STARTTLS on the plaintext stream and agree to it.
async fn starttls<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>) -> bool {
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return false;
    }

    let Some((tag, command)) = line.trim().split_once(' ') else {
        return false;
    };
    if !command.eq_ignore_ascii_case("STARTTLS") {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(reader, &resp).await;
        return false;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    write_line(reader, &resp).await.is_ok()
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the IMAP command loop over an established stream.
///
/// Commands are parsed with `imap-codec`'s `CommandCodec` and
/// dispatched on the `CommandBody` variant. Read handlers get a
/// snapshot of the mailbox; STORE and EXPUNGE lock it briefly to
/// mutate.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(stream: S, shared: &Shared) {
    let Shared {
        mailbox,
        counters,
        behavior: switches,
    } = shared;
    let mut reader = BufReader::new(stream);
    let mut authenticated = false;
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snap = mailbox.lock().unwrap().clone();

        let needs_auth = !matches!(
            command.body,
            CommandBody::Capability
                | CommandBody::Noop
                | CommandBody::Login { .. }
                | CommandBody::Logout
        );
        if needs_auth && !authenticated {
            let resp = format!("{tag} BAD Not authenticated\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        let behavior = *switches.lock().unwrap();
        if behavior.stall.is_some_and(|stall| stall.matches(&command.body)) {
            hold_open(&mut reader).await;
            break;
        }

        match command.body {
            CommandBody::Capability => {
                handle_capability(tag, behavior.uidplus, &mut reader).await;
            }
            CommandBody::Noop => {
                handle_noop(tag, &mut reader).await;
            }
            CommandBody::Login { .. } => {
                authenticated = handle_login(tag, trimmed, &snap, &mut reader).await;
            }
            CommandBody::List { .. } => {
                handle_list(tag, &snap, &mut reader).await;
            }
            CommandBody::Status { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                handle_status(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    tag,
                    &sequence_set,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: true,
                ref kind,
                ref flags,
                ..
            } => {
                if behavior.flag_noise
                    && write_line(&mut reader, "* 1 FETCH (FLAGS (\\Seen))\r\n")
                        .await
                        .is_err()
                {
                    break;
                }
                handle_uid_store(
                    tag,
                    sequence_set,
                    kind,
                    flags,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected_folder.as_deref(), None, &mut reader).await;
            }
            CommandBody::ExpungeUid { ref sequence_set } if behavior.uidplus => {
                handle_expunge(
                    tag,
                    mailbox,
                    selected_folder.as_deref(),
                    Some(sequence_set),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                counters.logouts.fetch_add(1, Ordering::SeqCst);
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
