//! A local WebSocket server for stream tests.
//!
//! [`TestServer`] accepts any number of clients, records what they send and
//! the headers they dialed with, and lets a test push frames to every client
//! or drop every client on demand, with or without a closing handshake.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Instruction pushed to every connected client.
#[derive(Debug, Clone)]
enum Command {
    Publish(Message),
    Disconnect,
    /// Drop the TCP stream without a close frame.
    Abort,
}

#[derive(Default)]
struct Recorded {
    connections: AtomicUsize,
    pings: AtomicUsize,
    received: Mutex<Vec<String>>,
    handshake_headers: Mutex<Vec<HashMap<String, String>>>,
}

pub struct TestServer {
    address: SocketAddr,
    commands: broadcast::Sender<Command>,
    recorded: Arc<Recorded>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TestServer {
    /// Bind to an ephemeral local port and start accepting clients.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("test server address");
        let (commands, _) = broadcast::channel(64);
        let recorded = Arc::new(Recorded::default());
        let tasks = Arc::new(Mutex::new(Vec::new()));

        let accept = tokio::spawn(accept_loop(
            listener,
            commands.clone(),
            Arc::clone(&recorded),
            Arc::clone(&tasks),
        ));
        tasks.lock().push(accept);

        Self {
            address,
            commands,
            recorded,
            tasks,
        }
    }

    /// `ws://` URL of the server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.address)
    }

    /// Completed handshakes so far, including clients that have since left.
    pub fn connections(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    /// Pings received from clients.
    pub fn pings(&self) -> usize {
        self.recorded.pings.load(Ordering::SeqCst)
    }

    /// Text and binary payloads received from clients, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.recorded.received.lock().clone()
    }

    /// Request headers of every completed handshake, names lowercased.
    pub fn handshake_headers(&self) -> Vec<HashMap<String, String>> {
        self.recorded.handshake_headers.lock().clone()
    }

    /// Send a text frame to every connected client.
    pub fn publish(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Publish(Message::Text(text.into())));
    }

    /// Send a binary frame to every connected client.
    pub fn publish_binary(&self, data: Vec<u8>) {
        let _ = self.commands.send(Command::Publish(Message::Binary(data)));
    }

    /// Close every connected client's socket from the server side.
    pub fn disconnect_all(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Drop every client's TCP stream without a closing handshake.
    pub fn abort_all(&self) {
        let _ = self.commands.send(Command::Abort);
    }

    /// Wait until at least `count` handshakes have completed.
    pub async fn wait_for_connections(&self, count: usize) -> bool {
        super::eventually(|| self.connections() >= count).await
    }

    /// Wait until at least `count` payloads have been received.
    pub async fn wait_for_received(&self, count: usize) -> bool {
        super::eventually(|| self.recorded.received.lock().len() >= count).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: broadcast::Sender<Command>,
    recorded: Arc<Recorded>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while let Ok((socket, _)) = listener.accept().await {
        // Subscribed before the handshake so nothing published after a client
        // finishes dialing can be missed.
        let rx = commands.subscribe();
        let handle = tokio::spawn(serve(socket, rx, Arc::clone(&recorded)));
        tasks.lock().push(handle);
    }
}

async fn serve(socket: TcpStream, mut commands: broadcast::Receiver<Command>, recorded: Arc<Recorded>) {
    let headers_seen = Arc::clone(&recorded);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers_seen.handshake_headers.lock().push(headers);
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(socket, callback).await else {
        return;
    };
    recorded.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Publish(message)) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
                Ok(Command::Abort) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => recorded.received.lock().push(text),
                Some(Ok(Message::Binary(data))) => recorded
                    .received
                    .lock()
                    .push(String::from_utf8_lossy(&data).into_owned()),
                Some(Ok(Message::Ping(data))) => {
                    recorded.pings.fetch_add(1, Ordering::SeqCst);
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// A local listener that accepts TCP connections but never answers the
/// WebSocket upgrade. Abort the handle to release the held sockets.
pub async fn stalled_listener() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stalled listener");
    let address = listener.local_addr().expect("stalled listener address");

    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    (address, handle)
}

/// A local address with nothing listening on it.
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind placeholder listener");
    listener.local_addr().expect("placeholder address")
}
