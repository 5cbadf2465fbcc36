//! The wire format: a fixed 6-byte header followed by up to [`MAX_PAYLOAD`]
//! bytes of payload.
//!
//! ```text
//!  0                   1
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//! +---+-+-+-+-+-------------------+
//! |PRO|M|S|F|A|        LEN        |
//! +---+-+-+-+-+-------------------+
//! |            SEQ_NUM            |
//! +-------------------------------+
//! |            ACK_NUM            |
//! +-------------------------------+
//! |            payload...         |
//! ```
//!
//! All fields are big-endian. PRO is the two-bit recovery protocol selector,
//! M the transfer direction, S/F/A the SYN, FIN and ACK bits, and LEN the
//! payload length. The codec performs no I/O and holds no state.

use thiserror::Error as ThisError;

/// The number of bytes in a packet header.
pub const HEADER_OCTETS: usize = 6;

/// The largest payload the 10-bit LEN field can describe.
pub const MAX_PAYLOAD: usize = 0x3FF;

const PROTOCOL_MASK: u16 = 0xC000;
const MODE_MASK: u16 = 0x2000;
const SYN_MASK: u16 = 0x1000;
const FIN_MASK: u16 = 0x0800;
const ACK_MASK: u16 = 0x0400;
const LEN_MASK: u16 = 0x03FF;

const PROTOCOL_SHIFT: u16 = 14;

/// The ARQ recovery protocol a connection runs. Negotiated at handshake and
/// carried in every packet of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    StopAndWait,
    GoBackN,
}

impl ProtocolKind {
    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0b00 => Some(Self::StopAndWait),
            0b01 => Some(Self::GoBackN),
            // The remaining two values are reserved
            _ => None,
        }
    }

    fn to_bits(self) -> u16 {
        match self {
            Self::StopAndWait => 0b00,
            Self::GoBackN => 0b01,
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::StopAndWait => write!(f, "SW"),
            Self::GoBackN => write!(f, "GBN"),
        }
    }
}

/// The direction a file moves relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    Download,
    Upload,
}

/// The first half-word of the header: flag bits plus the LEN field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    pub fn new(protocol: ProtocolKind, mode: TransferMode, syn: bool, fin: bool, ack: bool) -> Self {
        Self(
            protocol.to_bits() << PROTOCOL_SHIFT
                | match mode {
                    TransferMode::Download => 0,
                    TransferMode::Upload => MODE_MASK,
                }
                | if syn { SYN_MASK } else { 0 }
                | if fin { FIN_MASK } else { 0 }
                | if ack { ACK_MASK } else { 0 },
        )
    }

    /// The negotiated recovery protocol, or `None` for the reserved values.
    pub fn protocol(self) -> Option<ProtocolKind> {
        ProtocolKind::from_bits((self.0 & PROTOCOL_MASK) >> PROTOCOL_SHIFT)
    }

    pub fn mode(self) -> TransferMode {
        if self.0 & MODE_MASK == 0 {
            TransferMode::Download
        } else {
            TransferMode::Upload
        }
    }

    /// Connection request, or its accept when combined with ACK
    pub fn syn(self) -> bool {
        self.0 & SYN_MASK != 0
    }

    /// Teardown request, or its accept when combined with ACK
    pub fn fin(self) -> bool {
        self.0 & FIN_MASK != 0
    }

    pub fn ack(self) -> bool {
        self.0 & ACK_MASK != 0
    }
}

/// A single framed datagram. The header's LEN field is derived from
/// `payload` at encoding time and is not stored separately.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: Flags,
    pub seq_num: u16,
    pub ack_num: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn syn(protocol: ProtocolKind, mode: TransferMode) -> Self {
        Self {
            flags: Flags::new(protocol, mode, true, false, false),
            ..Default::default()
        }
    }

    pub fn syn_ack(protocol: ProtocolKind) -> Self {
        Self {
            flags: Flags::new(protocol, TransferMode::Download, true, false, true),
            ..Default::default()
        }
    }

    pub fn fin(protocol: ProtocolKind) -> Self {
        Self {
            flags: Flags::new(protocol, TransferMode::Download, false, true, false),
            ..Default::default()
        }
    }

    pub fn fin_ack(protocol: ProtocolKind) -> Self {
        Self {
            flags: Flags::new(protocol, TransferMode::Download, false, true, true),
            ..Default::default()
        }
    }

    /// An acknowledgement of the data packet numbered `ack_num`.
    pub fn ack(protocol: ProtocolKind, mode: TransferMode, ack_num: u16) -> Self {
        Self {
            flags: Flags::new(protocol, mode, false, false, true),
            ack_num,
            ..Default::default()
        }
    }

    pub fn data(protocol: ProtocolKind, mode: TransferMode, seq_num: u16, payload: Vec<u8>) -> Self {
        Self {
            flags: Flags::new(protocol, mode, false, false, false),
            seq_num,
            ack_num: 0,
            payload,
        }
    }

    /// Serializes the packet. Fails if the payload exceeds what the LEN
    /// field can describe.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::OversizedPayload {
                len: self.payload.len(),
            });
        }
        let mut out = Vec::with_capacity(HEADER_OCTETS + self.payload.len());
        out.extend_from_slice(&(self.flags.0 | self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.seq_num.to_be_bytes());
        out.extend_from_slice(&self.ack_num.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parses a packet from a received datagram. The declared LEN must match
    /// the number of bytes that follow the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_OCTETS {
            return Err(PacketError::HeaderTooShort { len: bytes.len() });
        }
        let flags_and_len = u16::from_be_bytes([bytes[0], bytes[1]]);
        let seq_num = u16::from_be_bytes([bytes[2], bytes[3]]);
        let ack_num = u16::from_be_bytes([bytes[4], bytes[5]]);
        let payload = &bytes[HEADER_OCTETS..];

        let declared = (flags_and_len & LEN_MASK) as usize;
        if declared != payload.len() {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(Self {
            flags: Flags(flags_and_len & !LEN_MASK),
            seq_num,
            ack_num,
            payload: payload.to_vec(),
        })
    }

    pub fn is_syn(&self) -> bool {
        self.flags.syn()
    }

    pub fn is_fin(&self) -> bool {
        self.flags.fin()
    }

    pub fn is_ack(&self) -> bool {
        self.flags.ack()
    }

    pub fn protocol(&self) -> Option<ProtocolKind> {
        self.flags.protocol()
    }

    pub fn mode(&self) -> TransferMode {
        self.flags.mode()
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("Too few bytes ({len}) to constitute a packet header")]
    HeaderTooShort { len: usize },
    #[error("The declared payload length {declared} differs from the {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("The payload length {len} exceeds the maximum of {MAX_PAYLOAD}")]
    OversizedPayload { len: usize },
}
