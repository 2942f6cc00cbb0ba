use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use faceauth_config::DEFAULT_MAX_REQUEST_BYTES;
use faceauth_core::errors::{AppError, AppResult};
use faceauth_core::faces::matcher::MatchOutcome;
use faceauth_core::service::FaceAuthService;
use serde::de::IgnoredAny;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::{parse_request, Request, Response};
use crate::session::{ClientSession, SessionState};

const REQUEST_QUEUE: usize = 8;
const READ_CHUNK: usize = 8 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub max_request_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Accepts TCP clients and runs one session task per connection.
pub struct ConnectionServer {
    listener: TcpListener,
    service: Arc<FaceAuthService>,
    settings: ServerSettings,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionServer {
    pub async fn bind(
        addr: SocketAddr,
        service: Arc<FaceAuthService>,
        settings: ServerSettings,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })?;
        Ok(Self {
            listener,
            service,
            settings,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token stops the accept loop and every open connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> AppResult<()> {
        let addr = self.local_addr()?;
        info!(%addr, "listening for clients");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("accept loop shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let service = Arc::clone(&self.service);
                        let cancel = self.shutdown.child_token();
                        let settings = self.settings;
                        self.tracker.spawn(async move {
                            handle_connection(stream, peer, service, settings, cancel).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
            }
        }

        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open = self.tracker.len(),
                "connections did not drain within {}s",
                DRAIN_TIMEOUT.as_secs()
            );
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Line(String),
    TooLarge,
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<FaceAuthService>,
    settings: ServerSettings,
    cancel: CancellationToken,
) {
    let mut session = ClientSession::new(peer);
    let span = info_span!("connection", session = %session.id(), %peer);

    async move {
        info!("client connected");
        let (read_half, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel(REQUEST_QUEUE);
        let reader = tokio::spawn(
            read_requests(read_half, tx, settings.max_request_bytes, cancel.clone())
                .in_current_span(),
        );

        session.transition(SessionState::AwaitingCommand);
        loop {
            let inbound = tokio::select! {
                biased;
                inbound = rx.recv() => inbound,
                _ = cancel.cancelled() => None,
            };
            let Some(inbound) = inbound else {
                break;
            };

            let line = match inbound {
                Inbound::Line(line) => line,
                Inbound::TooLarge => {
                    warn!(
                        limit = settings.max_request_bytes,
                        "request exceeds size limit; closing connection"
                    );
                    let _ = write_response(&mut writer, &Response::request_too_large()).await;
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            session.transition(SessionState::Processing);
            let response = handle_request(&line, &service, &cancel).await;
            if let Err(err) = write_response(&mut writer, &response).await {
                debug!(error = %err, "failed to write response; closing connection");
                break;
            }
            session.transition(SessionState::AwaitingCommand);
        }

        session.transition(SessionState::Closed);
        cancel.cancel();
        reader.abort();
        info!(requests = session.requests(), "client disconnected");
    }
    .instrument(span)
    .await
}

/// Runs one request line against the service. Errors become error responses;
/// only the caller decides whether a connection closes.
pub async fn handle_request(
    line: &str,
    service: &FaceAuthService,
    cancel: &CancellationToken,
) -> Response {
    let request = match parse_request(line.trim()) {
        Ok(request) => request,
        Err(err) => {
            debug!(reason = %err, "rejected request");
            return Response::error(err.to_string());
        }
    };
    debug!(command = request.command(), "dispatching request");

    match request {
        Request::Ping => Response::pong(),
        Request::Register { name } => match service.register(&name, cancel).await {
            Ok(outcome) => Response::registered(&outcome.name),
            Err(err) => {
                warn!(name = %name, kind = ?err.kind(), reason = %err, "registration failed");
                Response::error(err.human_message())
            }
        },
        Request::Authenticate => match service.authenticate(cancel).await {
            Ok(MatchOutcome::Matched(score)) => Response::authenticated(&score),
            Ok(MatchOutcome::NoMatch { .. }) => Response::authentication_failed(None),
            Err(err) => {
                warn!(kind = ?err.kind(), reason = %err, "authentication capture failed");
                Response::authentication_failed(Some(&err))
            }
        },
    }
}

/// Feeds requests to the session and cancels `cancel` once the peer stops
/// sending, so in-flight capture for this peer stops. The socket stays
/// watched while the queue is full.
async fn read_requests<R>(
    mut read_half: R,
    tx: mpsc::Sender<Inbound>,
    max_request_bytes: usize,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut pending = RequestBuffer::new(max_request_bytes);
    let mut chunk = vec![0u8; READ_CHUNK];
    let backlog_limit = max_request_bytes.saturating_mul(REQUEST_QUEUE);

    loop {
        let Some(inbound) = pending.next_request() else {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = read_half.read(&mut chunk) => read,
            };
            match read {
                Ok(0) => {
                    debug!("peer closed connection");
                    break;
                }
                Ok(n) => pending.extend(&chunk[..n]),
                Err(err) => {
                    debug!(error = %err, "read failed");
                    break;
                }
            }
            continue;
        };

        let permit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = tx.reserve() => match permit {
                    Ok(permit) => break permit,
                    Err(_) => return,
                },
                read = read_half.read(&mut chunk) => match read {
                    Ok(n) if n > 0 => {
                        pending.extend(&chunk[..n]);
                        if pending.len() > backlog_limit {
                            warn!(limit = backlog_limit, "request backlog exceeded; closing connection");
                            cancel.cancel();
                            return;
                        }
                    }
                    Ok(_) => {
                        debug!("peer closed connection with requests queued");
                        cancel.cancel();
                        return;
                    }
                    Err(err) => {
                        debug!(error = %err, "read failed");
                        cancel.cancel();
                        return;
                    }
                },
            }
        };

        let stop = inbound == Inbound::TooLarge;
        permit.send(inbound);
        if stop {
            return;
        }
    }
    cancel.cancel();
}

/// Bytes received from one peer that do not form a request yet.
#[derive(Debug)]
struct RequestBuffer {
    buf: Vec<u8>,
    max_request_bytes: usize,
}

impl RequestBuffer {
    fn new(max_request_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_request_bytes,
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    /// A request ends at a newline, or at the close of one complete JSON
    /// object for clients that send bare objects without a terminator.
    fn next_request(&mut self) -> Option<Inbound> {
        if let Some(pos) = self.buf.iter().position(|byte| *byte == b'\n') {
            if pos > self.max_request_bytes {
                return Some(Inbound::TooLarge);
            }
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(Inbound::Line(String::from_utf8_lossy(&line).into_owned()));
        }

        if self.buf.len() > self.max_request_bytes {
            return Some(Inbound::TooLarge);
        }
        let end = complete_object_len(&self.buf)?;
        let object: Vec<u8> = self.buf.drain(..end).collect();
        Some(Inbound::Line(String::from_utf8_lossy(&object).into_owned()))
    }
}

/// Length of the leading JSON object in `buf`, if it is already complete.
fn complete_object_len(buf: &[u8]) -> Option<usize> {
    let start = buf.iter().position(|byte| !byte.is_ascii_whitespace())?;
    if buf[start] != b'{' {
        return None;
    }
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => Some(values.byte_offset()),
        _ => None,
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> AppResult<()> {
    let line = response.to_line()?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
