//! RTMP chunk stream: splits outgoing messages into chunks and reassembles
//! incoming ones.
//!
//! ```text
//! +--------------+----------------+--------------------+------------+
//! | Basic Header | Message Header | Extended Timestamp | Chunk Data |
//! +--------------+----------------+--------------------+------------+
//! ```

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Chunk size both sides start with until a Set Chunk Size arrives.
pub const INIT_CHUNK_SIZE: usize = 128;
/// Chunk stream carrying NetConnection commands.
pub const COMMAND_CHUNK_STREAM: u8 = 3;

/// Control messages and command replies are tiny; anything bigger is
/// either media we never asked for or garbage.
const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
const EXTENDED_TIMESTAMP: u32 = 0xff_ffff;

pub mod msg_type {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL: u8 = 4;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const COMMAND_AMF0: u8 = 20;
}

/// A complete message, reassembled from one or more chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

impl Message {
    pub fn command(payload: Bytes) -> Self {
        Self {
            type_id: msg_type::COMMAND_AMF0,
            stream_id: 0,
            timestamp: 0,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("message of {0} bytes is larger than allowed")]
    MessageTooLarge(usize),
    #[error("chunk stream {0} continues a message header it never sent")]
    UnknownChunkStream(u32),
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),
}

/// Writes `message` on chunk stream `csid` (2..=63): a type 0 chunk
/// followed by type 3 continuation chunks.
pub fn encode_message(csid: u8, message: &Message, chunk_size: usize, out: &mut BytesMut) {
    let csid = csid & 0x3f;
    let extended = message.timestamp >= EXTENDED_TIMESTAMP;

    out.put_u8(csid);
    out.put_uint(u64::from(message.timestamp.min(EXTENDED_TIMESTAMP)), 3);
    out.put_uint(message.payload.len() as u64, 3);
    out.put_u8(message.type_id);
    out.put_u32_le(message.stream_id);
    if extended {
        out.put_u32(message.timestamp);
    }

    for (index, piece) in message.payload.chunks(chunk_size.max(1)).enumerate() {
        if index > 0 {
            out.put_u8(0xc0 | csid);
            if extended {
                out.put_u32(message.timestamp);
            }
        }
        out.put_slice(piece);
    }
}

/// Per chunk stream header state. Later chunks inherit whatever their
/// header format leaves out.
#[derive(Debug, Clone, Default)]
struct ChunkStream {
    timestamp: u32,
    timestamp_delta: u32,
    extended: bool,
    length: usize,
    type_id: u8,
    stream_id: u32,
    payload: BytesMut,
}

enum ChunkRead {
    NeedMore,
    Partial,
    Complete(Message),
}

/// Reassembles messages from bytes read off the socket.
#[derive(Debug)]
pub struct ChunkReader {
    buffer: BytesMut,
    chunk_size: usize,
    streams: HashMap<u32, ChunkStream>,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            chunk_size: INIT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }
}

impl ChunkReader {
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Next complete message, or `None` when more bytes are needed. Set
    /// Chunk Size messages are applied before being returned.
    pub fn next_message(&mut self) -> Result<Option<Message>, ChunkError> {
        loop {
            match self.read_chunk()? {
                ChunkRead::NeedMore => return Ok(None),
                ChunkRead::Partial => continue,
                ChunkRead::Complete(message) => {
                    if message.type_id == msg_type::SET_CHUNK_SIZE && message.payload.len() >= 4
                    {
                        let size = (&message.payload[..4]).get_u32() & 0x7fff_ffff;
                        if size == 0 {
                            return Err(ChunkError::InvalidChunkSize(size));
                        }
                        self.chunk_size = size as usize;
                    }
                    return Ok(Some(message));
                }
            }
        }
    }

    /// Consumes one chunk if the buffer holds all of it.
    fn read_chunk(&mut self) -> Result<ChunkRead, ChunkError> {
        let data = &self.buffer[..];
        let Some(&first) = data.first() else {
            return Ok(ChunkRead::NeedMore);
        };

        let format = first >> 6;
        let (csid, mut pos) = match first & 0x3f {
            0 if data.len() >= 2 => (64 + u32::from(data[1]), 2),
            1 if data.len() >= 3 => (64 + u32::from(data[1]) + u32::from(data[2]) * 256, 3),
            0 | 1 => return Ok(ChunkRead::NeedMore),
            id => (u32::from(id), 1),
        };

        let header_len = match format {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if data.len() < pos + header_len {
            return Ok(ChunkRead::NeedMore);
        }

        let mut stream = match (format, self.streams.get(&csid)) {
            (0, previous) => previous.cloned().unwrap_or_default(),
            (_, Some(previous)) => previous.clone(),
            (_, None) => return Err(ChunkError::UnknownChunkStream(csid)),
        };
        let starting = stream.payload.is_empty();

        let header = &data[pos..pos + header_len];
        let raw_timestamp = (header_len >= 3).then(|| read_u24(&header[0..3]));
        if header_len >= 7 {
            stream.length = read_u24(&header[3..6]) as usize;
            stream.type_id = header[6];
        }
        if header_len == 11 {
            stream.stream_id = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
        }
        pos += header_len;

        if let Some(raw) = raw_timestamp {
            stream.extended = raw == EXTENDED_TIMESTAMP;
        }
        let timestamp_field = if stream.extended {
            if data.len() < pos + 4 {
                return Ok(ChunkRead::NeedMore);
            }
            let value = (&data[pos..pos + 4]).get_u32();
            pos += 4;
            Some(value)
        } else {
            raw_timestamp
        };

        if stream.length > MAX_MESSAGE_SIZE {
            return Err(ChunkError::MessageTooLarge(stream.length));
        }
        let remaining = stream.length - stream.payload.len();
        let take = remaining.min(self.chunk_size);
        if data.len() < pos + take {
            return Ok(ChunkRead::NeedMore);
        }

        if starting {
            match (format, timestamp_field) {
                (0, Some(absolute)) => {
                    stream.timestamp = absolute;
                    stream.timestamp_delta = 0;
                }
                (1 | 2, Some(delta)) => {
                    stream.timestamp_delta = delta;
                    stream.timestamp = stream.timestamp.wrapping_add(delta);
                }
                _ => stream.timestamp = stream.timestamp.wrapping_add(stream.timestamp_delta),
            }
        }
        stream.payload.extend_from_slice(&data[pos..pos + take]);
        pos += take;
        self.buffer.advance(pos);

        let read = if stream.payload.len() == stream.length {
            ChunkRead::Complete(Message {
                type_id: stream.type_id,
                stream_id: stream.stream_id,
                timestamp: stream.timestamp,
                payload: stream.payload.split().freeze(),
            })
        } else {
            ChunkRead::Partial
        };
        self.streams.insert(csid, stream);
        Ok(read)
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(type_id: u8, payload: &[u8]) -> Message {
        Message {
            type_id,
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn long_messages_are_split_into_type_3_chunks() {
        let payload = vec![0xab; 300];
        let mut out = BytesMut::new();
        encode_message(COMMAND_CHUNK_STREAM, &message(20, &payload), 128, &mut out);

        // 12 byte header, then 128 + 1 + 128 + 1 + 44
        assert_eq!(out.len(), 12 + 300 + 2);
        assert_eq!(out[0], 0x03);
        assert_eq!(&out[4..7], &[0x00, 0x01, 0x2c]);
        assert_eq!(out[12 + 128], 0xc3);
        assert_eq!(out[12 + 128 + 1 + 128], 0xc3);
    }

    #[test]
    fn reassembles_messages_fed_byte_by_byte() {
        let first = message(20, &[7; 200]);
        let second = message(20, b"short");
        let mut out = BytesMut::new();
        encode_message(3, &first, INIT_CHUNK_SIZE, &mut out);
        encode_message(3, &second, INIT_CHUNK_SIZE, &mut out);

        let mut reader = ChunkReader::default();
        let mut received = Vec::new();
        for byte in out.iter() {
            reader.extend(&[*byte]);
            while let Some(message) = reader.next_message().unwrap() {
                received.push(message);
            }
        }
        assert_eq!(received, vec![first, second]);
    }

    #[test]
    fn set_chunk_size_applies_to_following_chunks() {
        let mut out = BytesMut::new();
        let resize = message(msg_type::SET_CHUNK_SIZE, &4096u32.to_be_bytes());
        encode_message(2, &resize, 128, &mut out);
        let big = message(20, &[1; 1000]);
        encode_message(3, &big, 4096, &mut out);

        let mut reader = ChunkReader::default();
        reader.extend(&out);
        let control = reader.next_message().unwrap().unwrap();
        assert_eq!(control.type_id, msg_type::SET_CHUNK_SIZE);
        assert_eq!(reader.chunk_size(), 4096);
        assert_eq!(reader.next_message().unwrap(), Some(big));
        assert_eq!(reader.next_message().unwrap(), None);
    }

    #[test]
    fn compressed_headers_inherit_from_the_previous_chunk() {
        let mut data = BytesMut::new();
        // type 0 on csid 4: ts 10, len 2, type 20, stream 1
        data.put_slice(&[0x04, 0, 0, 10, 0, 0, 2, 20, 1, 0, 0, 0, b'a', b'b']);
        // type 2 on csid 4: ts delta 5, same length and type
        data.put_slice(&[0x84, 0, 0, 5, b'c', b'd']);
        // type 3 on csid 4: everything inherited
        data.put_slice(&[0xc4, b'e', b'f']);

        let mut reader = ChunkReader::default();
        reader.extend(&data);
        let timestamps: Vec<(u32, Bytes)> = std::iter::from_fn(|| reader.next_message().unwrap())
            .map(|message| {
                assert_eq!(message.stream_id, 1);
                (message.timestamp, message.payload)
            })
            .collect();
        assert_eq!(
            timestamps,
            vec![
                (10, Bytes::from_static(b"ab")),
                (15, Bytes::from_static(b"cd")),
                (20, Bytes::from_static(b"ef")),
            ]
        );
    }

    #[test]
    fn continuation_without_a_header_is_an_error() {
        let mut reader = ChunkReader::default();
        reader.extend(&[0xc5, 0x00]);
        assert_eq!(reader.next_message(), Err(ChunkError::UnknownChunkStream(5)));
    }
}
