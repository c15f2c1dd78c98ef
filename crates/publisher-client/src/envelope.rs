//! Queue envelopes for media packets.

use publisher_media::{MediaPacket, MediaType};

use crate::error::ClientError;
use crate::queue::{Item, ItemHooks, TransferQueue};
use crate::ClientResult;

/// Lightweight per-packet metadata kept beside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStamp {
    pub media_type: MediaType,
    pub pts: i64,
    pub dts: i64,
    pub key_frame: bool,
    pub size: usize,
}

impl PacketStamp {
    pub fn of(packet: &MediaPacket) -> Self {
        Self {
            media_type: packet.media_type(),
            pts: packet.pts(),
            dts: packet.dts(),
            key_frame: packet.is_key_frame(),
            size: packet.size(),
        }
    }
}

/// Copies payload bytes into a metadata-only packet shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaItemHooks;

impl ItemHooks for MediaItemHooks {
    type Context = MediaPacket;
    type Payload = MediaPacket;
    type Opaque = PacketStamp;

    fn allocate(
        &self,
        bytes: &[u8],
        mut shell: MediaPacket,
    ) -> ClientResult<(MediaPacket, PacketStamp)> {
        shell.copy_in(bytes).map_err(|e| {
            ClientError::Allocation(format!(
                "{} byte {} payload: {}",
                bytes.len(),
                shell.media_type(),
                e
            ))
        })?;
        let stamp = PacketStamp::of(&shell);
        Ok((shell, stamp))
    }

    fn release(&self, payload: MediaPacket) {
        drop(payload);
    }
}

/// Queue of media packets.
pub type PacketQueue = TransferQueue<MediaItemHooks>;

/// Queued media packet.
pub type PacketItem = Item<MediaItemHooks>;
