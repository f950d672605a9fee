//! Duplex frame sessions over WebSocket connections

use crate::{NetworkError, NetworkResult};
use blockswap_core::PeerCid;
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a closing session waits for the remote's close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Opened outbound; closing terminates the transport directly
    Initiator,
    /// Accepted inbound; closing signals the accept handler
    Acceptor,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Initiator => write!(f, "initiator"),
            SessionRole::Acceptor => write!(f, "acceptor"),
        }
    }
}

enum CloseHandle {
    Initiator(Mutex<Option<JoinHandle<()>>>),
    Acceptor(CancellationToken),
}

enum SessionCommand {
    Send {
        frame: Bytes,
        reply: oneshot::Sender<NetworkResult<()>>,
    },
    Ping {
        reply: oneshot::Sender<NetworkResult<Option<Duration>>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// One live connection to a remote peer.
///
/// Frames arrive in the order the remote sent them. Once the transport
/// closes, `recv` returns `None` forever; a session is never reopened.
pub struct PeerSession {
    remote: PeerCid,
    commands: mpsc::UnboundedSender<SessionCommand>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<NetworkResult<Bytes>>>,
    close: CloseHandle,
}

impl PeerSession {
    /// Wrap an outbound socket; the driver runs on its own task
    pub fn initiator<S>(remote: PeerCid, socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, frames, driver) =
            SessionDriver::new(remote, SessionRole::Initiator, socket, CancellationToken::new());
        let task = tokio::spawn(driver.run());

        Self {
            remote,
            commands,
            frames: tokio::sync::Mutex::new(frames),
            close: CloseHandle::Initiator(Mutex::new(Some(task))),
        }
    }

    /// Wrap an inbound socket.
    ///
    /// The returned driver must be run by the accept handler; it returns
    /// once `close_signal` fires or the transport ends.
    pub fn acceptor<S>(
        remote: PeerCid,
        socket: WebSocketStream<S>,
        close_signal: CancellationToken,
    ) -> (Self, SessionDriver<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (commands, frames, driver) =
            SessionDriver::new(remote, SessionRole::Acceptor, socket, close_signal.clone());

        let session = Self {
            remote,
            commands,
            frames: tokio::sync::Mutex::new(frames),
            close: CloseHandle::Acceptor(close_signal),
        };
        (session, driver)
    }

    pub fn remote(&self) -> &PeerCid {
        &self.remote
    }

    pub fn role(&self) -> SessionRole {
        match self.close {
            CloseHandle::Initiator(_) => SessionRole::Initiator,
            CloseHandle::Acceptor(_) => SessionRole::Acceptor,
        }
    }

    /// Whether the transport behind this session has gone away
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Write one binary frame
    pub async fn send(&self, frame: impl Into<Bytes>) -> NetworkResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send {
                frame: frame.into(),
                reply,
            })
            .map_err(|_| NetworkError::SendFailure("session is closed".to_string()))?;

        response
            .await
            .map_err(|_| NetworkError::SendFailure("session closed while sending".to_string()))?
    }

    /// Next received frame, or `None` once the transport has closed
    pub async fn recv(&self) -> Option<NetworkResult<Bytes>> {
        self.frames.lock().await.recv().await
    }

    /// Received frames as a stream ending with the transport
    pub fn frames(&self) -> impl Stream<Item = NetworkResult<Bytes>> + '_ {
        futures::stream::unfold(self, |session| async move {
            session.recv().await.map(|frame| (frame, session))
        })
    }

    /// Measure the round trip of a WebSocket ping.
    ///
    /// Returns `None` when the session closes before the pong arrives.
    pub async fn ping(&self) -> NetworkResult<Option<Duration>> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(SessionCommand::Ping { reply }).is_err() {
            return Ok(None);
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Close the session; closing twice is a no-op
    pub async fn close(&self) -> NetworkResult<()> {
        match &self.close {
            CloseHandle::Initiator(task) => {
                let (reply, done) = oneshot::channel();
                if self.commands.send(SessionCommand::Close { reply }).is_ok() {
                    // The driver may exit before acknowledging
                    let _ = done.await;
                }

                let task = task.lock().take();
                if let Some(task) = task {
                    task.await
                        .map_err(|e| NetworkError::Internal(format!("session driver failed: {}", e)))?;
                }
            }
            CloseHandle::Acceptor(close_signal) => close_signal.cancel(),
        }

        Ok(())
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote", &self.remote)
            .field("role", &self.role())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Task body that owns one WebSocket
pub struct SessionDriver<S> {
    remote: PeerCid,
    role: SessionRole,
    socket: WebSocketStream<S>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    frames: mpsc::UnboundedSender<NetworkResult<Bytes>>,
    close_signal: CancellationToken,
    pings: HashMap<u64, (Instant, oneshot::Sender<NetworkResult<Option<Duration>>>)>,
    next_ping: u64,
}

type DriverParts<S> = (
    mpsc::UnboundedSender<SessionCommand>,
    mpsc::UnboundedReceiver<NetworkResult<Bytes>>,
    SessionDriver<S>,
);

impl<S> SessionDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(
        remote: PeerCid,
        role: SessionRole,
        socket: WebSocketStream<S>,
        close_signal: CancellationToken,
    ) -> DriverParts<S> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let driver = Self {
            remote,
            role,
            socket,
            commands: command_rx,
            frames: frame_tx,
            close_signal,
            pings: HashMap::new(),
            next_ping: 0,
        };
        (command_tx, frame_rx, driver)
    }

    /// Drive the socket until it closes, the close signal fires, or every
    /// session handle is dropped
    pub async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                _ = self.close_signal.cancelled() => {
                    debug!(peer = %self.remote, "Close signal received");
                    self.shutdown().await;
                    ControlFlow::Break(())
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        ControlFlow::Break(())
                    }
                },
                message = self.socket.next() => match message {
                    Some(Ok(message)) => {
                        self.handle_message(message);
                        ControlFlow::Continue(())
                    }
                    Some(Err(e)) => {
                        self.handle_error(e);
                        ControlFlow::Break(())
                    }
                    None => ControlFlow::Break(()),
                },
            };

            if flow.is_break() {
                break;
            }
        }

        debug!(peer = %self.remote, role = %self.role, "Session ended");
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(peer = %self.remote, error = %e, "Close handshake failed");
            return;
        }

        // Frames already in flight are still delivered
        let drain = async {
            while let Some(Ok(message)) = self.socket.next().await {
                self.handle_message(message);
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            debug!(peer = %self.remote, "Remote did not answer the close frame");
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Send { frame, reply } => {
                let size = frame.len();
                match self.socket.send(Message::Binary(frame)).await {
                    Ok(()) => {
                        debug!(peer = %self.remote, size, "Sent frame");
                        let _ = reply.send(Ok(()));
                        ControlFlow::Continue(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(NetworkError::SendFailure(e.to_string())));
                        ControlFlow::Break(())
                    }
                }
            }
            SessionCommand::Ping { reply } => {
                let id = self.next_ping;
                self.next_ping += 1;

                let payload = Bytes::copy_from_slice(&id.to_be_bytes());
                let started = Instant::now();
                match self.socket.send(Message::Ping(payload)).await {
                    Ok(()) => {
                        self.pings.insert(id, (started, reply));
                        ControlFlow::Continue(())
                    }
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                        let _ = reply.send(Ok(None));
                        ControlFlow::Break(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(NetworkError::Session(e.to_string())));
                        ControlFlow::Break(())
                    }
                }
            }
            SessionCommand::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                ControlFlow::Break(())
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Binary(frame) => {
                debug!(peer = %self.remote, size = frame.len(), "Received frame");
                let _ = self.frames.send(Ok(frame));
            }
            Message::Text(text) => {
                let _ = self.frames.send(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())));
            }
            Message::Pong(payload) => {
                let Ok(raw) = <[u8; 8]>::try_from(payload.as_ref()) else {
                    debug!(peer = %self.remote, "Ignoring unsolicited pong");
                    return;
                };
                if let Some((started, reply)) = self.pings.remove(&u64::from_be_bytes(raw)) {
                    let _ = reply.send(Ok(Some(started.elapsed())));
                }
            }
            Message::Close(frame) => {
                debug!(peer = %self.remote, ?frame, "Remote closed session");
            }
            // Pings are answered by the WebSocket layer itself
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }

    fn handle_error(&mut self, error: WsError) {
        match error {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                debug!(peer = %self.remote, "Transport closed");
            }
            WsError::Io(e) => {
                debug!(peer = %self.remote, error = %e, "Transport failed");
            }
            other => {
                warn!(peer = %self.remote, error = %other, "Session protocol error");
                let _ = self.frames.send(Err(NetworkError::Session(other.to_string())));
            }
        }
    }
}
