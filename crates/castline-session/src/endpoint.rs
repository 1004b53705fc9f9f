//! Derives the ingest target and stream name from configured connections.

use castline_bridge::config::{ConnectionConfig, active_connection};
use url::Url;

/// Errors produced while turning a configured URL into an [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("no enabled connection is configured")]
    NoActiveConnection,
    #[error("invalid ingest url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported ingest scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("ingest url has no host")]
    MissingHost,
    #[error("ingest url has no stream name")]
    MissingStreamName,
}

/// Wire protocol spoken with the ingest server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rtmp,
    Srt,
}

/// A fully resolved ingest target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Name of the connection this endpoint was resolved from.
    pub connection_name: String,
    /// URI handed to the transport's `connect`.
    pub uri: String,
    /// Name the capture pipeline publishes under once connected.
    pub stream_name: String,
    pub kind: TransportKind,
}

/// Splits a configured ingest URL into transport target and stream name.
///
/// RTMP URLs are split at the last path segment: everything before it is the
/// connect URI, the segment itself (with any query) is the stream name. SRT
/// URLs are connected to as-is and publish under their `streamid` parameter.
pub fn split_ingest_url(raw: &str) -> Result<(String, String, TransportKind), EndpointError> {
    let url = Url::parse(raw.trim())?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(EndpointError::MissingHost);
    }

    match url.scheme() {
        "rtmp" | "rtmps" => {
            let trimmed = raw.trim().trim_end_matches('/');
            let (uri, stream_name) = trimmed
                .rsplit_once('/')
                .ok_or(EndpointError::MissingStreamName)?;
            // the split must not eat into `scheme://host`
            if uri.len() <= url.scheme().len() + 2 || stream_name.is_empty() {
                return Err(EndpointError::MissingStreamName);
            }
            Ok((uri.to_string(), stream_name.to_string(), TransportKind::Rtmp))
        }
        "srt" | "srtla" => {
            let stream_name = url
                .query_pairs()
                .find(|(key, _)| key == "streamid")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            Ok((url.to_string(), stream_name, TransportKind::Srt))
        }
        other => Err(EndpointError::UnsupportedScheme(other.to_string())),
    }
}

/// Resolves the endpoint of the active (first enabled) connection.
pub fn resolve(connections: &[ConnectionConfig]) -> Result<Endpoint, EndpointError> {
    let connection = active_connection(connections).ok_or(EndpointError::NoActiveConnection)?;
    let (uri, stream_name, kind) = split_ingest_url(&connection.url)?;
    Ok(Endpoint {
        connection_name: connection.name.clone(),
        uri,
        stream_name,
        kind,
    })
}

/// Like [`resolve`], but collapses every failure into "no active
/// configuration" after logging it.
pub fn resolve_endpoint(connections: &[ConnectionConfig]) -> Option<Endpoint> {
    match resolve(connections) {
        Ok(endpoint) => Some(endpoint),
        Err(EndpointError::NoActiveConnection) => {
            log::warn!("No enabled connection, streaming is unavailable");
            None
        }
        Err(err) => {
            log::warn!("Active connection is unusable: {err}");
            None
        }
    }
}
