//! Types shared by the ranked-game server and its clients: status codes,
//! packet framing, the session token codec, the scoring engine and the
//! computer player.

pub mod game;
pub mod packet;
pub mod solver;
pub mod token;

pub use game::{compare, generate_code, Color, Feedback, Gamemode};
pub use packet::{receive_packet, send_packet, PacketError};
pub use token::{Token, TokenError};

pub const DEFAULT_CODE_LENGTH: usize = 4;
pub const DEFAULT_COLOR_COUNT: u16 = 6;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

pub const SERVER_HOST: &str = "127.0.0.1";
pub const SERVER_PORT: u16 = 45735;

/// Literal a client sends to open the handshake.
pub const HANDSHAKE_GREETING: &[u8] = b"OK";

/// Color value used in place of every secret color when a code is shown to a client.
pub const REDACTED_COLOR: Color = 0xFFFF;

/// Protocol status codes, sent as 2-byte big-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// A ranked game is in progress.
    InGame,
    /// Known user without a running game.
    Idle,
    /// Waiting for the client greeting.
    Handshake,
    /// No user registered for this address.
    Unknown,
    /// Proposed username is taken or invalid.
    Taken,
    /// Another connection from this address is already playing.
    Conflict,
    /// Diagnostic reply that may precede a real answer; clients discard it.
    Diagnostic,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::InGame => 200,
            Status::Idle => 204,
            Status::Handshake => 300,
            Status::Unknown => 401,
            Status::Taken => 403,
            Status::Conflict => 409,
            Status::Diagnostic => 418,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Status::InGame),
            204 => Some(Status::Idle),
            300 => Some(Status::Handshake),
            401 => Some(Status::Unknown),
            403 => Some(Status::Taken),
            409 => Some(Status::Conflict),
            418 => Some(Status::Diagnostic),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.code().to_be_bytes()
    }

    /// Parses a status payload. Anything that is not exactly two bytes
    /// carrying a known code yields `None`.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let bytes: [u8; 2] = payload.try_into().ok()?;
        Self::from_code(u16::from_be_bytes(bytes))
    }
}

/// Clamps a wide counter into a 16-bit wire field.
pub fn saturate_u16(value: impl TryInto<u16>) -> u16 {
    value.try_into().unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_roundtrip() {
        let all = [
            Status::InGame,
            Status::Idle,
            Status::Handshake,
            Status::Unknown,
            Status::Taken,
            Status::Conflict,
            Status::Diagnostic,
        ];

        for status in all {
            assert_eq!(Status::from_code(status.code()), Some(status));
            assert_eq!(Status::from_payload(&status.to_bytes()), Some(status));
        }
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(Status::InGame.to_bytes(), [0x00, 0xC8]);
        assert_eq!(Status::Conflict.to_bytes(), [0x01, 0x99]);
    }

    #[test]
    fn test_status_rejects_other_payloads() {
        assert_eq!(Status::from_payload(&[]), None);
        assert_eq!(Status::from_payload(&[0x00, 0xC8, 0x00]), None);
        assert_eq!(Status::from_payload(&0u16.to_be_bytes()), None);
        assert_eq!(Status::from_code(500), None);
    }

    #[test]
    fn test_saturate_u16() {
        assert_eq!(saturate_u16(12u32), 12);
        assert_eq!(saturate_u16(70_000u32), u16::MAX);
        assert_eq!(saturate_u16(usize::MAX), u16::MAX);
    }
}
