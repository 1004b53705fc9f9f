//! AMF0, the value encoding used by RTMP command messages.
//!
//! Only the markers that show up in NetConnection commands and their
//! replies are handled: numbers, booleans, strings, objects, ECMA arrays,
//! null and undefined.

use bytes::{Buf, BufMut, BytesMut};

mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const LONG_STRING: u8 = 0x0c;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Objects and ECMA arrays, properties in wire order.
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Looks up `key` on an object value.
    pub fn property(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Self::Object(properties) => properties
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Amf0Error {
    #[error("amf0 data ended in the middle of a value")]
    UnexpectedEnd,
    #[error("unsupported amf0 marker {0:#04x}")]
    UnsupportedMarker(u8),
    #[error("amf0 string is not valid utf-8")]
    InvalidString,
}

pub fn encode(value: &Amf0Value, out: &mut BytesMut) {
    match value {
        Amf0Value::Number(number) => {
            out.put_u8(marker::NUMBER);
            out.put_f64(*number);
        }
        Amf0Value::Boolean(flag) => {
            out.put_u8(marker::BOOLEAN);
            out.put_u8(u8::from(*flag));
        }
        Amf0Value::String(text) if text.len() > usize::from(u16::MAX) => {
            out.put_u8(marker::LONG_STRING);
            out.put_u32(text.len() as u32);
            out.put_slice(text.as_bytes());
        }
        Amf0Value::String(text) => {
            out.put_u8(marker::STRING);
            put_short_string(text, out);
        }
        Amf0Value::Object(properties) => {
            out.put_u8(marker::OBJECT);
            for (key, value) in properties {
                put_short_string(key, out);
                encode(value, out);
            }
            out.put_u16(0);
            out.put_u8(marker::OBJECT_END);
        }
        Amf0Value::Null => out.put_u8(marker::NULL),
        Amf0Value::Undefined => out.put_u8(marker::UNDEFINED),
    }
}

fn put_short_string(text: &str, out: &mut BytesMut) {
    // keys and short strings carry a u16 length
    let bytes = &text.as_bytes()[..text.len().min(usize::from(u16::MAX))];
    out.put_u16(bytes.len() as u16);
    out.put_slice(bytes);
}

/// Decodes every value in `data`.
pub fn decode_all(mut data: &[u8]) -> Result<Vec<Amf0Value>, Amf0Error> {
    let mut values = Vec::new();
    while data.has_remaining() {
        values.push(decode(&mut data)?);
    }
    Ok(values)
}

fn decode(data: &mut &[u8]) -> Result<Amf0Value, Amf0Error> {
    match read_u8(data)? {
        marker::NUMBER => {
            ensure(data, 8)?;
            Ok(Amf0Value::Number(data.get_f64()))
        }
        marker::BOOLEAN => Ok(Amf0Value::Boolean(read_u8(data)? != 0)),
        marker::STRING => {
            let len = usize::from(read_u16(data)?);
            Ok(Amf0Value::String(read_utf8(data, len)?))
        }
        marker::LONG_STRING => {
            ensure(data, 4)?;
            let len = data.get_u32() as usize;
            Ok(Amf0Value::String(read_utf8(data, len)?))
        }
        marker::OBJECT => Ok(Amf0Value::Object(decode_properties(data)?)),
        marker::ECMA_ARRAY => {
            // the element count is only a hint, the end marker is authoritative
            ensure(data, 4)?;
            data.advance(4);
            Ok(Amf0Value::Object(decode_properties(data)?))
        }
        marker::NULL => Ok(Amf0Value::Null),
        marker::UNDEFINED => Ok(Amf0Value::Undefined),
        other => Err(Amf0Error::UnsupportedMarker(other)),
    }
}

fn decode_properties(data: &mut &[u8]) -> Result<Vec<(String, Amf0Value)>, Amf0Error> {
    let mut properties = Vec::new();
    loop {
        let len = usize::from(read_u16(data)?);
        if len == 0 {
            return match read_u8(data)? {
                marker::OBJECT_END => Ok(properties),
                other => Err(Amf0Error::UnsupportedMarker(other)),
            };
        }
        let key = read_utf8(data, len)?;
        let value = decode(data)?;
        properties.push((key, value));
    }
}

fn ensure(data: &[u8], len: usize) -> Result<(), Amf0Error> {
    if data.len() < len {
        return Err(Amf0Error::UnexpectedEnd);
    }
    Ok(())
}

fn read_u8(data: &mut &[u8]) -> Result<u8, Amf0Error> {
    ensure(data, 1)?;
    Ok(data.get_u8())
}

fn read_u16(data: &mut &[u8]) -> Result<u16, Amf0Error> {
    ensure(data, 2)?;
    Ok(data.get_u16())
}

fn read_utf8(data: &mut &[u8], len: usize) -> Result<String, Amf0Error> {
    ensure(data, len)?;
    let text = std::str::from_utf8(&data[..len])
        .map_err(|_| Amf0Error::InvalidString)?
        .to_owned();
    data.advance(len);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_command_layout() {
        let mut out = BytesMut::new();
        encode(&Amf0Value::String("connect".to_string()), &mut out);
        encode(&Amf0Value::Number(1.0), &mut out);
        encode(
            &Amf0Value::Object(vec![("app".to_string(), Amf0Value::String("live".to_string()))]),
            &mut out,
        );

        let mut expected = vec![0x02, 0x00, 0x07];
        expected.extend_from_slice(b"connect");
        expected.push(0x00);
        expected.extend_from_slice(&1.0f64.to_be_bytes());
        expected.extend_from_slice(&[0x03, 0x00, 0x03]);
        expected.extend_from_slice(b"app");
        expected.extend_from_slice(&[0x02, 0x00, 0x04]);
        expected.extend_from_slice(b"live");
        expected.extend_from_slice(&[0x00, 0x00, 0x09]);
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn decodes_a_connect_reply() {
        let reply = vec![
            Amf0Value::String("_result".to_string()),
            Amf0Value::Number(1.0),
            Amf0Value::Null,
            Amf0Value::Object(vec![
                (
                    "code".to_string(),
                    Amf0Value::String("NetConnection.Connect.Success".to_string()),
                ),
                ("objectEncoding".to_string(), Amf0Value::Number(0.0)),
                ("secure".to_string(), Amf0Value::Boolean(false)),
            ]),
        ];
        let mut out = BytesMut::new();
        for value in &reply {
            encode(value, &mut out);
        }

        let decoded = decode_all(&out).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(
            decoded[3].property("code").and_then(Amf0Value::as_str),
            Some("NetConnection.Connect.Success")
        );
    }

    #[test]
    fn ecma_arrays_read_as_objects() {
        let mut data = vec![0x08, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, b'n', 0x05];
        data.extend_from_slice(&[0x00, 0x00, 0x09]);
        assert_eq!(
            decode_all(&data).unwrap(),
            vec![Amf0Value::Object(vec![("n".to_string(), Amf0Value::Null)])]
        );
    }

    #[test]
    fn truncated_and_unknown_data_is_rejected() {
        assert_eq!(decode_all(&[0x00, 0x3f]), Err(Amf0Error::UnexpectedEnd));
        assert_eq!(decode_all(&[0x02, 0x00, 0x05, b'a']), Err(Amf0Error::UnexpectedEnd));
        assert_eq!(decode_all(&[0x11]), Err(Amf0Error::UnsupportedMarker(0x11)));
    }
}
