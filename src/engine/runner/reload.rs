//! Live reload is a fire-and-forget side channel.
//!
//! Actions and the watch loop publish [`Signal`]s through a [`Reloader`].
//! During a serve session the receiving end belongs to a websocket thread
//! which broadcasts every signal, as JSON, to all connected browser tabs.
//! Nothing is acknowledged: clients which went away are dropped and a signal
//! sent while nobody is connected is lost.

use std::sync::mpsc::{Receiver, Sender, channel};

use serde::Serialize;

/// A message for connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Reload the whole page.
    Reload,
    /// Re-fetch the stylesheets whose URL ends with one of `paths`, or all of
    /// them if `paths` is empty.
    Css { paths: Vec<String> },
}

impl Signal {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"type":"reload"}"#))
    }
}

/// Publishing handle of the live reload channel. Cheap to clone.
///
/// A disabled reloader, used outside of serve sessions, silently drops every
/// signal.
#[derive(Debug, Clone, Default)]
pub struct Reloader {
    tx: Option<Sender<Signal>>,
}

impl Reloader {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Creates a connected reloader together with the receiving end.
    pub fn channel() -> (Self, Receiver<Signal>) {
        let (tx, rx) = channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn reload(&self) {
        self.send(Signal::Reload);
    }

    pub fn inject_css<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_enabled() {
            let paths = paths.into_iter().map(Into::into).collect();
            self.send(Signal::Css { paths });
        }
    }

    pub fn send(&self, signal: Signal) {
        if let Some(tx) = &self.tx
            && tx.send(signal).is_err()
        {
            tracing::debug!("live reload channel is closed, signal dropped");
        }
    }
}

#[cfg(feature = "live")]
pub use socket::{LiveReload, start};

#[cfg(feature = "live")]
mod socket {
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    use tungstenite::WebSocket;

    use super::{Reloader, Signal};

    /// Keep at most this many browser tabs connected.
    const MAX_CLIENTS: usize = 10;

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// A running live reload websocket server.
    pub struct LiveReload {
        pub port: u16,
        reloader: Reloader,
        _incoming: JoinHandle<()>,
        _broadcast: JoinHandle<()>,
    }

    impl LiveReload {
        pub fn reloader(&self) -> Reloader {
            self.reloader.clone()
        }
    }

    /// Opens the websocket port and spawns the accepting and broadcasting
    /// threads.
    pub fn start() -> std::io::Result<LiveReload> {
        let (tcp, port) = reserve_port()?;
        let clients = Clients::default();
        let (reloader, rx) = Reloader::channel();

        let _incoming = new_thread_ws_incoming(tcp, clients.clone());
        let _broadcast = new_thread_ws_broadcast(rx, clients);

        tracing::info!(port, "live reload listening");

        Ok(LiveReload {
            port,
            reloader,
            _incoming,
            _broadcast,
        })
    }

    fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
        let listener = match TcpListener::bind("127.0.0.1:1337") {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let addr = listener.local_addr()?;
        let port = addr.port();
        Ok((listener, port))
    }

    fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            for stream in server.incoming() {
                let socket = match stream.map(tungstenite::accept) {
                    Ok(Ok(socket)) => socket,
                    Ok(Err(e)) => {
                        tracing::warn!("live reload handshake failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("live reload connection failed: {e}");
                        continue;
                    }
                };

                if let Ok(mut clients) = clients.lock() {
                    clients.push(socket);
                }
            }
        })
    }

    fn new_thread_ws_broadcast(rx: Receiver<Signal>, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            while let Ok(signal) = rx.recv() {
                let Ok(mut clients) = clients.lock() else {
                    break;
                };

                let payload = signal.to_json();
                let mut broken = vec![];

                for (i, socket) in clients.iter_mut().enumerate() {
                    match socket.send(tungstenite::Message::text(payload.clone())) {
                        Ok(_) => {}
                        Err(tungstenite::error::Error::Io(e)) => {
                            tracing::debug!("dropping live reload client: {e}");
                            broken.push(i);
                        }
                        Err(
                            tungstenite::error::Error::ConnectionClosed
                            | tungstenite::error::Error::AlreadyClosed,
                        ) => broken.push(i),
                        Err(e) => {
                            tracing::error!("live reload error: {e:?}");
                        }
                    }
                }

                for i in broken.into_iter().rev() {
                    clients.remove(i);
                }

                let len = clients.len();
                if len > MAX_CLIENTS {
                    for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                        socket.close(None).ok();
                    }
                }

                tracing::debug!(clients = clients.len(), "sent {payload}");
            }
        })
    }
}
