//! Client side of an RTMP NetConnection: handshake, then `connect`.
//!
//! A connection only counts as established once the server answered the
//! `connect` command with `_result`. Servers that reject the app or the
//! key either reply `_error` or hang up, and both surface as errors here.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Counters;
use super::amf0::{self, Amf0Error, Amf0Value};
use super::chunk::{
    COMMAND_CHUNK_STREAM, ChunkError, ChunkReader, INIT_CHUNK_SIZE, Message, msg_type,
};

pub const RTMP_VERSION: u8 = 3;
pub const HANDSHAKE_SIZE: usize = 1536;

const CONNECT_TRANSACTION: f64 = 1.0;
const FLASH_VERSION: &str = "FMLE/3.0 (compatible; castline)";

#[derive(Debug, thiserror::Error)]
pub enum RtmpError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("server speaks RTMP version {0}")]
    UnsupportedVersion(u8),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("malformed command: {0}")]
    Amf0(#[from] Amf0Error),
    #[error("server hung up")]
    Disconnected,
    #[error("server rejected connect: {0}")]
    Rejected(String),
}

pub struct ClientSession<S> {
    stream: S,
    reader: ChunkReader,
    counters: Arc<Counters>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientSession<S> {
    pub fn new(stream: S, counters: Arc<Counters>) -> Self {
        Self {
            stream,
            reader: ChunkReader::default(),
            counters,
        }
    }

    /// Handshake followed by `connect` to `app`. Returns once the server
    /// accepted the connection.
    pub async fn open(&mut self, app: &str, tc_url: &str) -> Result<(), RtmpError> {
        self.handshake().await?;
        self.connect(app, tc_url).await
    }

    /// Plain (undigested) handshake: C0+C1, S0+S1, C2, S2.
    async fn handshake(&mut self) -> Result<(), RtmpError> {
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        c0c1[0] = RTMP_VERSION;
        self.send(&c0c1).await?;

        let mut s0s1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        self.read_exact(&mut s0s1).await?;
        if s0s1[0] != RTMP_VERSION {
            return Err(RtmpError::UnsupportedVersion(s0s1[0]));
        }

        // C2 echoes S1
        self.send(&s0s1[1..]).await?;
        let mut s2 = vec![0u8; HANDSHAKE_SIZE];
        self.read_exact(&mut s2).await?;
        Ok(())
    }

    async fn connect(&mut self, app: &str, tc_url: &str) -> Result<(), RtmpError> {
        let properties = vec![
            ("app".to_string(), Amf0Value::String(app.to_string())),
            ("type".to_string(), Amf0Value::String("nonprivate".to_string())),
            ("flashVer".to_string(), Amf0Value::String(FLASH_VERSION.to_string())),
            ("tcUrl".to_string(), Amf0Value::String(tc_url.to_string())),
        ];
        self.send_command(&[
            Amf0Value::String("connect".to_string()),
            Amf0Value::Number(CONNECT_TRANSACTION),
            Amf0Value::Object(properties),
        ])
        .await?;

        loop {
            let message = self.read_message().await?;
            if message.type_id != msg_type::COMMAND_AMF0 {
                log::trace!("Skipping RTMP message type {} during connect", message.type_id);
                continue;
            }
            let values = amf0::decode_all(&message.payload)?;
            let name = values.first().and_then(Amf0Value::as_str);
            let transaction = values.get(1).and_then(Amf0Value::as_number);
            let code = values
                .get(3)
                .and_then(|info| info.property("code"))
                .and_then(Amf0Value::as_str);

            if transaction != Some(CONNECT_TRANSACTION) {
                log::trace!("Skipping {name:?} while waiting for connect result");
                continue;
            }
            match name {
                Some("_result") => {
                    log::debug!("connect accepted: {}", code.unwrap_or("no code"));
                    return Ok(());
                }
                Some("_error") => {
                    let reason = values
                        .get(3)
                        .and_then(|info| info.property("description"))
                        .and_then(Amf0Value::as_str)
                        .or(code)
                        .unwrap_or("no reason given");
                    return Err(RtmpError::Rejected(reason.to_string()));
                }
                _ => log::trace!("Skipping {name:?} while waiting for connect result"),
            }
        }
    }

    /// Reads until the server closes the connection. Incoming messages are
    /// drained and dropped.
    pub async fn wait_closed(&mut self) -> Result<(), RtmpError> {
        loop {
            match self.read_message().await {
                Ok(message) => log::trace!("Ignoring RTMP message type {}", message.type_id),
                Err(RtmpError::Disconnected) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_command(&mut self, values: &[Amf0Value]) -> Result<(), RtmpError> {
        let mut payload = BytesMut::new();
        for value in values {
            amf0::encode(value, &mut payload);
        }
        let message = Message::command(payload.freeze());
        let mut out = BytesMut::new();
        super::chunk::encode_message(COMMAND_CHUNK_STREAM, &message, INIT_CHUNK_SIZE, &mut out);
        self.send(&out).await
    }

    async fn read_message(&mut self) -> Result<Message, RtmpError> {
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(message) = self.reader.next_message()? {
                return Ok(message);
            }
            match self.stream.read(&mut buffer).await? {
                0 => return Err(RtmpError::Disconnected),
                read => self.reader.extend(&buffer[..read]),
            }
        }
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), RtmpError> {
        match self.stream.read_exact(buffer).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(RtmpError::Disconnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), RtmpError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        self.counters
            .total_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Encodes a command reply the way an ingest server sends it. Used by the
/// local test servers.
#[cfg(test)]
pub(crate) fn command_reply(name: &str, code: &str, description: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    for value in [
        Amf0Value::String(name.to_string()),
        Amf0Value::Number(CONNECT_TRANSACTION),
        Amf0Value::Null,
        Amf0Value::Object(vec![
            ("level".to_string(), Amf0Value::String("status".to_string())),
            ("code".to_string(), Amf0Value::String(code.to_string())),
            (
                "description".to_string(),
                Amf0Value::String(description.to_string()),
            ),
        ]),
    ] {
        amf0::encode(&value, &mut payload);
    }
    let mut out = BytesMut::new();
    super::chunk::encode_message(
        COMMAND_CHUNK_STREAM,
        &Message::command(payload.freeze()),
        INIT_CHUNK_SIZE,
        &mut out,
    );
    out
}

/// Server half of the handshake plus reading the client's `connect`.
/// Returns the decoded `connect` command.
#[cfg(test)]
pub(crate) async fn accept_connect<S: AsyncRead + AsyncWrite + Unpin>(
    socket: &mut S,
) -> Vec<Amf0Value> {
    let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
    socket.read_exact(&mut c0c1).await.unwrap();
    let mut s0s1s2 = vec![0u8; 1 + 2 * HANDSHAKE_SIZE];
    s0s1s2[0] = RTMP_VERSION;
    socket.write_all(&s0s1s2).await.unwrap();
    let mut c2 = vec![0u8; HANDSHAKE_SIZE];
    socket.read_exact(&mut c2).await.unwrap();

    let mut reader = ChunkReader::default();
    let mut buffer = [0u8; 1024];
    loop {
        if let Some(message) = reader.next_message().unwrap() {
            return amf0::decode_all(&message.payload).unwrap();
        }
        let read = socket.read(&mut buffer).await.unwrap();
        assert!(read > 0, "client hung up before connect");
        reader.extend(&buffer[..read]);
    }
}

/// Window acknowledgement size, as servers send ahead of the connect reply.
#[cfg(test)]
pub(crate) fn window_ack_size() -> BytesMut {
    let mut out = BytesMut::new();
    let message = Message {
        type_id: msg_type::WINDOW_ACK_SIZE,
        stream_id: 0,
        timestamp: 0,
        payload: bytes::Bytes::copy_from_slice(&2_500_000u32.to_be_bytes()),
    };
    super::chunk::encode_message(2, &message, INIT_CHUNK_SIZE, &mut out);
    out
}
