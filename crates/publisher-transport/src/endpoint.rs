//! Publish destination parsing.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::TransportError;
use crate::{TransportResult, DEFAULT_RTMP_PORT};

/// Where to publish: `rtmp://host[:port]/app[/...]/stream_key`.
///
/// The last path segment (plus any query string) is the stream key, the
/// segments before it form the application name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpEndpoint {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream_key: String,
}

impl RtmpEndpoint {
    /// Parse a destination URL.
    pub fn parse(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if parsed.scheme() != "rtmp" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{}', expected rtmp",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_RTMP_PORT);

        let path = parsed.path().trim_matches('/');
        let (app, key) = path
            .rsplit_once('/')
            .ok_or_else(|| TransportError::InvalidUrl("expected /app/stream_key".to_string()))?;
        if app.is_empty() || key.is_empty() {
            return Err(TransportError::InvalidUrl(
                "application name and stream key must not be empty".to_string(),
            ));
        }

        let stream_key = match parsed.query() {
            Some(query) => format!("{}?{}", key, query),
            None => key.to_string(),
        };

        Ok(Self {
            host,
            port,
            app: app.to_string(),
            stream_key,
        })
    }

    /// `host:port` for the TCP connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for RtmpEndpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Displays without the stream key, which is a credential.
impl fmt::Display for RtmpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}
