//! Live reload over WebSocket.
//!
//! Pages built for development carry a small client (see
//! [`Environment::get_refresh_script`](crate::Environment::get_refresh_script))
//! that connects here and reloads the page when it receives `"reload"`.

use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::{Message, WebSocket};

use crate::error::WatchError;

/// Sessions kept open at most; older ones are closed first.
const MAX_SESSIONS: usize = 10;

/// How long a new connection may take to complete its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

type Sessions = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

pub struct LiveReloadBroker {
    port: u16,
    sessions: Sessions,
    _accept: JoinHandle<()>,
}

impl LiveReloadBroker {
    /// Listens on `preferred`, or on any free port if that one is taken.
    pub fn bind(preferred: u16) -> Result<Self, WatchError> {
        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, preferred)) {
            Ok(listener) => listener,
            Err(_) => TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(WatchError::Bind)?,
        };
        let port = listener.local_addr().map_err(WatchError::Bind)?.port();

        let sessions: Sessions = Arc::default();
        let accept = spawn_accept(listener, sessions.clone());
        tracing::debug!("live reload listening on port {port}");

        Ok(Self {
            port,
            sessions,
            _accept: accept,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Tells every open session to reload. Sessions that can no longer be
    /// written to are dropped. Returns how many sessions were reached.
    pub fn notify_all(&self) -> usize {
        let mut sessions = lock(&self.sessions);
        let mut reached = 0;

        sessions.retain_mut(|socket| match socket.send(Message::text("reload")) {
            Ok(()) => {
                reached += 1;
                true
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => false,
            Err(tungstenite::Error::Io(err)) => {
                tracing::debug!("dropping reload session: {err}");
                false
            }
            Err(err) => {
                tracing::error!("live reload: {err}");
                true
            }
        });

        tracing::debug!("reload sent to {reached} session(s)");
        reached
    }
}

fn lock(sessions: &Sessions) -> MutexGuard<'_, Vec<WebSocket<TcpStream>>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_accept(listener: TcpListener, sessions: Sessions) -> JoinHandle<()> {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!("live reload connection failed: {err}");
                    continue;
                }
            };

            // a silent client must not hold up the clients behind it
            if let Err(err) = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)) {
                tracing::warn!("live reload connection failed: {err}");
                continue;
            }

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(err) => {
                    tracing::warn!("live reload handshake failed: {err}");
                    continue;
                }
            };
            socket.get_ref().set_read_timeout(None).ok();

            let mut sessions = lock(&sessions);
            sessions.push(socket);

            let len = sessions.len();
            if len > MAX_SESSIONS {
                for mut socket in sessions.drain(0..len - MAX_SESSIONS) {
                    socket.close(None).ok();
                }
            }
        }
    })
}
