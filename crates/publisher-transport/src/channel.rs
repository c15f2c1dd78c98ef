//! Transport channel abstraction.

use crate::connection::ConnectOptions;
use crate::rtmp::RtmpChannel;
use crate::TransportResult;

/// A persistent, connected publishing channel.
pub trait TransportChannel: Send {
    /// Write container bytes belonging to `stream_index`.
    /// Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8], stream_index: usize) -> TransportResult<usize>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&mut self);
}

/// Opens transport channels.
pub trait Connector {
    /// Connect, handshake and enter publish mode.
    fn connect(&self, url: &str) -> TransportResult<Box<dyn TransportChannel>>;
}

/// Connects [`RtmpChannel`]s.
#[derive(Debug, Clone, Default)]
pub struct RtmpConnector {
    options: ConnectOptions,
}

impl RtmpConnector {
    /// Create a connector using `options` for every connection.
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

impl Connector for RtmpConnector {
    fn connect(&self, url: &str) -> TransportResult<Box<dyn TransportChannel>> {
        let channel = RtmpChannel::connect(url, &self.options)?;
        Ok(Box::new(channel))
    }
}
