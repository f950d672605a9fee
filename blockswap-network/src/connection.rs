//! Inbound acceptance and outbound dialing of peer sessions

use crate::{Directory, NetworkError, NetworkResult, PeerSession};
use blockswap_core::PeerCid;
use futures::stream::{BoxStream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handshake header carrying the dialing peer's identity
pub const PEER_CID_HEADER: &str = "peer_cid";

/// Time a new connection gets to complete the WebSocket upgrade
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A session opened by a remote peer
#[derive(Debug)]
pub struct InboundArrival {
    pub peer: PeerCid,
    pub session: PeerSession,
}

/// Owns the WebSocket listener and dials remote peers
pub struct ConnectionManager {
    local: PeerCid,
    directory: Directory,
    local_addr: SocketAddr,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<InboundArrival>>>,
    shutdown: CancellationToken,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Bind the listener and start accepting sessions
    pub async fn listen(
        address: SocketAddr,
        local: PeerCid,
        directory: Directory,
    ) -> NetworkResult<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "WebSocket listener bound");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, inbound_tx, shutdown.clone()));

        Ok(Self {
            local,
            directory,
            local_addr,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            shutdown,
            accept_task: parking_lot::Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_peer(&self) -> &PeerCid {
        &self.local
    }

    /// Open a session to `peer` at the URI it published.
    ///
    /// Fails with `PeerNotFound` when no usable record exists and with
    /// `ConnectFailure` for everything else, including a directory lookup
    /// that timed out.
    pub async fn connect(&self, peer: &PeerCid) -> NetworkResult<PeerSession> {
        let connect_failure = |reason: String| NetworkError::ConnectFailure {
            peer: *peer,
            reason,
        };
        let uri = match self.directory.resolve(peer).await {
            Ok(uri) => uri,
            Err(NetworkError::Timeout) => {
                return Err(connect_failure("peer record lookup timed out".to_string()))
            }
            Err(e) => return Err(e),
        };

        let mut request = uri
            .as_str()
            .into_client_request()
            .map_err(|e| connect_failure(e.to_string()))?;
        let header = HeaderValue::from_str(&self.local.to_string())
            .map_err(|e| connect_failure(e.to_string()))?;
        request.headers_mut().insert(PEER_CID_HEADER, header);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connect_failure(e.to_string()))?;

        info!(%peer, %uri, "Opened outbound session");
        Ok(PeerSession::initiator(*peer, socket))
    }

    /// Sessions opened by remote peers, in arrival order.
    ///
    /// Every returned stream reads the same queue, so each arrival is
    /// yielded once overall. The stream ends after [`stop`](Self::stop).
    pub fn inbound_sessions(&self) -> BoxStream<'static, InboundArrival> {
        let inbound = Arc::clone(&self.inbound);
        futures::stream::unfold(inbound, |inbound| async move {
            let arrival = inbound.lock().await.recv().await?;
            Some((arrival, inbound))
        })
        .boxed()
    }

    /// Stop accepting, close acceptor sessions and release the port
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::UnboundedSender<InboundArrival>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    debug!(%address, "Inbound connection");
                    tokio::spawn(handle_inbound(
                        stream,
                        address,
                        inbound.clone(),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
        }
    }

    info!("WebSocket listener stopped");
}

/// Runs for as long as the accepted session lives
async fn handle_inbound(
    stream: TcpStream,
    address: SocketAddr,
    inbound: mpsc::UnboundedSender<InboundArrival>,
    close_signal: CancellationToken,
) {
    let mut remote = None;
    let check_header = |request: &Request, response: Response| match peer_from_request(request) {
        Ok(peer) => {
            remote = Some(peer);
            Ok(response)
        }
        Err(reason) => {
            warn!(%address, %reason, "Rejecting inbound connection");
            Err(bad_request(reason))
        }
    };

    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_hdr_async(stream, check_header),
    );
    let socket = tokio::select! {
        _ = close_signal.cancelled() => {
            debug!(%address, "Listener stopped during handshake");
            return;
        }
        handshake = handshake => match handshake {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                debug!(%address, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                debug!(%address, "WebSocket handshake timed out");
                return;
            }
        },
    };
    let Some(peer) = remote else {
        return;
    };
    if close_signal.is_cancelled() {
        return;
    }

    let (session, driver) = PeerSession::acceptor(peer, socket, close_signal);
    info!(%peer, %address, "Accepted inbound session");
    if inbound.send(InboundArrival { peer, session }).is_err() {
        debug!(%peer, "Inbound queue closed, dropping session");
        return;
    }
    // The queue ends once the listener and every pending handshake are gone
    drop(inbound);

    driver.run().await;
    debug!(%peer, "Close internal connection");
}

fn peer_from_request(request: &Request) -> Result<PeerCid, String> {
    let value = request
        .headers()
        .get(PEER_CID_HEADER)
        .ok_or_else(|| format!("missing {} header", PEER_CID_HEADER))?;
    let value = value
        .to_str()
        .map_err(|_| format!("{} header is not ASCII", PEER_CID_HEADER))?;

    value
        .parse()
        .map_err(|e| format!("invalid {} header: {}", PEER_CID_HEADER, e))
}

fn bad_request(reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(header: Option<&str>) -> Request {
        let mut request = "ws://127.0.0.1:10100".into_client_request().unwrap();
        if let Some(value) = header {
            request
                .headers_mut()
                .insert(PEER_CID_HEADER, HeaderValue::from_str(value).unwrap());
        }
        request
    }

    #[test]
    fn test_peer_from_request() {
        let alice = PeerCid::for_peer_name("alice").unwrap();
        let request = request_with(Some(&alice.to_string()));
        assert_eq!(peer_from_request(&request).unwrap(), alice);
    }

    #[test]
    fn test_peer_header_required() {
        assert!(peer_from_request(&request_with(None)).is_err());
        assert!(peer_from_request(&request_with(Some("not-a-cid"))).is_err());
    }

    #[test]
    fn test_bad_request_status() {
        let response = bad_request("missing".to_string());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_deref(), Some("missing"));
    }
}
