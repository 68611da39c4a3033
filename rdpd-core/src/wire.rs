//! Development wire format.
//!
//! PDUs are bincode-encoded and framed with a big-endian u32 length
//! prefix (`LengthDelimitedCodec`). This is a loopback and testing
//! transport, not the RDP encoding.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::codec::{CodecVariant, EncodedUpdate};
use crate::error::RdpError;
use crate::flags::{ExtendedPointerFlags, KeyboardFlags, PointerFlags, SyncFlags};
use crate::protocol::{ClientCapabilities, NegotiatedSettings, PeerEvent};

/// Largest frame either side accepts.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPdu {
    ClientInfo(ClientCapabilities),
    ConfirmActive,
    SuppressOutput { allow: bool },
    Synchronize { flags: u32 },
    Scancode { flags: u16, code: u16 },
    Unicode { flags: u16, code: u16 },
    Mouse { flags: u16, x: u16, y: u16 },
    ExtendedMouse { flags: u16, x: u16, y: u16 },
    Shutdown,
}

impl From<ClientPdu> for PeerEvent {
    fn from(pdu: ClientPdu) -> Self {
        match pdu {
            ClientPdu::ClientInfo(caps) => PeerEvent::Negotiated(caps),
            ClientPdu::ConfirmActive => PeerEvent::Activated,
            ClientPdu::SuppressOutput { allow } => PeerEvent::SuppressOutput { allow },
            ClientPdu::Synchronize { flags } => PeerEvent::Synchronize {
                flags: SyncFlags::from_bits_truncate(flags),
            },
            ClientPdu::Scancode { flags, code } => PeerEvent::Keyboard {
                flags: KeyboardFlags::from_bits_retain(flags),
                code,
            },
            ClientPdu::Unicode { flags, code } => PeerEvent::UnicodeKeyboard {
                flags: KeyboardFlags::from_bits_retain(flags),
                code,
            },
            ClientPdu::Mouse { flags, x, y } => PeerEvent::Mouse {
                flags: PointerFlags::from_bits_retain(flags),
                x,
                y,
            },
            ClientPdu::ExtendedMouse { flags, x, y } => PeerEvent::ExtendedMouse {
                flags: ExtendedPointerFlags::from_bits_retain(flags),
                x,
                y,
            },
            ClientPdu::Shutdown => PeerEvent::Disconnected,
        }
    }
}

/// Server → client, as decoded by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPdu {
    Settings(NegotiatedSettings),
    DesktopResize { width: u32, height: u32 },
    Update {
        frame_id: u32,
        codec: CodecVariant,
        full_frame: bool,
        payload: Vec<u8>,
    },
}

/// Sending side of [`ServerPdu`]: borrows the update payload from the
/// codec's output stream. Both encode to the same bytes, so variant
/// order and fields must stay in step.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename = "ServerPdu")]
pub enum ServerPduRef<'a> {
    Settings(NegotiatedSettings),
    DesktopResize { width: u32, height: u32 },
    Update {
        frame_id: u32,
        codec: CodecVariant,
        full_frame: bool,
        payload: &'a [u8],
    },
}

impl<'a> From<&EncodedUpdate<'a>> for ServerPduRef<'a> {
    fn from(update: &EncodedUpdate<'a>) -> Self {
        ServerPduRef::Update {
            frame_id: update.frame_id,
            codec: update.codec,
            full_frame: update.full_frame,
            payload: update.payload,
        }
    }
}

/// Synchronous framing over caller-owned buffers.
#[derive(Debug)]
pub struct WireCodec {
    framing: LengthDelimitedCodec,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl WireCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }

    /// Append one framed PDU to `dst`.
    pub fn encode<T: Serialize>(&mut self, pdu: &T, dst: &mut BytesMut) -> Result<(), RdpError> {
        let body = bincode::serialize(pdu)?;
        self.framing
            .encode(Bytes::from(body), dst)
            .map_err(|e| RdpError::Encoding(e.to_string()))
    }

    /// Take one complete PDU off the front of `src`.
    pub fn decode<T: DeserializeOwned>(&mut self, src: &mut BytesMut) -> Result<Option<T>, RdpError> {
        let Some(frame) = self
            .framing
            .decode(src)
            .map_err(|e| RdpError::Protocol(format!("bad frame: {e}")))?
        else {
            return Ok(None);
        };
        bincode::deserialize(&frame)
            .map(Some)
            .map_err(|e| RdpError::Protocol(format!("undecodable pdu: {e}")))
    }
}
