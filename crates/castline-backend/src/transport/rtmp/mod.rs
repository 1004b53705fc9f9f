//! RTMP ingest transport.
//!
//! Opens a socket to the ingest server, runs the handshake and the
//! NetConnection `connect` exchange, and then watches the connection until
//! the server hangs up. `NetConnection.Connect.Success` is only reported
//! once the server answered `connect` with `_result`. It does not publish
//! media; capture and publishing belong to the [`super::CapturePipeline`].

pub mod amf0;
pub mod chunk;
pub mod client;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use castline_session::StatusCode;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use url::Url;

use super::{StatusListener, Transport, TransportError, TransportStats};
use client::ClientSession;

const RTMP_DEFAULT_PORT: u16 = 1935;

/// Where to connect and which application to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    app: String,
    tc_url: String,
}

fn parse_target(uri: &str) -> Result<Target, TransportError> {
    let url = Url::parse(uri)?;
    match url.scheme() {
        "rtmp" => {}
        // rtmps needs TLS, which is not spoken here
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    }
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::MissingHost(uri.to_string()))?;
    let app = url.path().trim_matches('/');
    if app.is_empty() {
        return Err(TransportError::MissingApp(uri.to_string()));
    }

    Ok(Target {
        host: host.to_string(),
        port: url.port().unwrap_or(RTMP_DEFAULT_PORT),
        app: app.to_string(),
        tc_url: uri.to_string(),
    })
}

#[derive(Default)]
struct Connection {
    listener: Option<StatusListener>,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Counters {
    total_bytes: AtomicU64,
}

#[derive(Default)]
pub struct RtmpTransport {
    connection: Mutex<Connection>,
    counters: Arc<Counters>,
    last_sample: Mutex<Option<(Instant, u64)>>,
}

impl RtmpTransport {
    fn lock_connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_counters(&self) {
        self.counters.total_bytes.store(0, Ordering::Relaxed);
        *self.last_sample.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Transport for RtmpTransport {
    fn connect(&self, uri: &str) {
        let mut connection = self.lock_connection();
        if let Some(task) = connection.task.take() {
            task.abort();
        }
        self.reset_counters();

        let Some(listener) = connection.listener.clone() else {
            log::warn!("Connecting to {uri} without a status listener, ignoring");
            return;
        };

        let target = match parse_target(uri) {
            Ok(target) => target,
            Err(err) => {
                log::error!("Cannot connect: {err}");
                listener.on_status(StatusCode::CONNECT_FAILED);
                return;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("Cannot connect outside of a tokio runtime: {err}");
                listener.on_status(StatusCode::CONNECT_FAILED);
                return;
            }
        };

        let counters = self.counters.clone();
        connection.task = Some(runtime.spawn(run_connection(target, listener, counters)));
    }

    fn close(&self) {
        if let Some(task) = self.lock_connection().task.take() {
            log::debug!("Closing ingest connection");
            task.abort();
        }
        self.reset_counters();
    }

    fn set_status_listener(&self, listener: Option<StatusListener>) {
        self.lock_connection().listener = listener;
    }

    fn stats(&self) -> TransportStats {
        let total_bytes = self.counters.total_bytes.load(Ordering::Relaxed);
        let now = Instant::now();
        let mut last_sample = self.last_sample.lock().unwrap_or_else(PoisonError::into_inner);

        let bytes_per_second = match *last_sample {
            Some((at, previous)) => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    (total_bytes.saturating_sub(previous) as f64 / elapsed) as u64
                } else {
                    0
                }
            }
            None => 0,
        };
        *last_sample = Some((now, total_bytes));

        TransportStats {
            bytes_per_second,
            total_bytes,
            fps: None,
        }
    }
}

async fn run_connection(target: Target, listener: StatusListener, counters: Arc<Counters>) {
    let Target {
        host,
        port,
        app,
        tc_url,
    } = target;
    log::info!("Connecting to {host}:{port}");

    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(err) => {
            log::warn!("Connection to {host}:{port} failed: {err}");
            listener.on_status(StatusCode::CONNECT_FAILED);
            return;
        }
    };

    let mut session = ClientSession::new(stream, counters);
    if let Err(err) = session.open(&app, &tc_url).await {
        log::warn!("RTMP connect to {tc_url} failed: {err}");
        listener.on_status(StatusCode::CONNECT_FAILED);
        return;
    }
    listener.on_status(StatusCode::CONNECT_SUCCESS);

    match session.wait_closed().await {
        Ok(()) => {
            log::info!("Ingest server {host}:{port} closed the connection");
            listener.on_status(StatusCode::CONNECT_CLOSED);
        }
        Err(err) => {
            log::warn!("Connection to {host}:{port} broke: {err}");
            listener.on_io_error();
        }
    }
}
