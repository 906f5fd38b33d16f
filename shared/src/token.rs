//! Session tokens: a whole game state packed into a short printable string.
//!
//! Fields are packed least-significant first into one little-endian bit
//! buffer, every field a whole number of bytes:
//!
//! | field          | bits | notes                                 |
//! |----------------|------|---------------------------------------|
//! | gamemode       | 8    | saturated                             |
//! | score          | 16   | saturated                             |
//! | games          | 16   | saturated                             |
//! | color_count    | 16   | saturated                             |
//! | max_attempts   | 16   | saturated                             |
//! | code_length    | 16   | code truncated to 0xFFFF colors       |
//! | code colors    | 16 each                                      |
//! | attempt_count  | 16   | attempts truncated to 0xFFFF          |
//! | attempt colors | 16 each, every attempt realigned to code_length |
//!
//! The buffer is read as one unsigned integer, written as its minimal
//! big-endian byte string, zlib-compressed at the best level and encoded
//! as URL-safe base64. Because leading zero bytes of the integer are not
//! written, fields past the end of the decoded buffer read as zero.

use crate::game::{realign, Color};
use crate::saturate_u16;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Write};
use thiserror::Error;

/// Upper bound on decompressed bytes and on the bytes a token may describe.
pub const MAX_TOKEN_BYTES: usize = 1 << 20;

const INFLATE_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token could not be decompressed: {0}")]
    Decompress(#[from] flate2::DecompressError),
    #[error("token could not be compressed: {0}")]
    Compress(#[from] io::Error),
    #[error("token data is truncated")]
    Truncated,
    #[error("token describes more than {MAX_TOKEN_BYTES} bytes of game state")]
    TooLarge,
}

/// Everything needed to resume or configure a game.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Token {
    pub gamemode: u32,
    pub score: u32,
    pub games: u32,
    pub color_count: u32,
    pub max_attempts: u32,
    pub code: Vec<Color>,
    pub attempts: Vec<Vec<Color>>,
}

impl Token {
    /// Same token with every code color replaced by `sentinel`, so the
    /// attempt history can be shared without revealing the secret.
    pub fn redacted(&self, sentinel: Color) -> Token {
        Token {
            code: vec![sentinel; self.code.len()],
            ..self.clone()
        }
    }

    /// Packs, compresses and base64-encodes the token. Fields wider than
    /// their slot are saturated, and the code and attempt list are cut to
    /// 0xFFFF entries.
    pub fn encode(&self) -> Result<String, TokenError> {
        let code = &self.code[..self.code.len().min(usize::from(u16::MAX))];
        let attempts = &self.attempts[..self.attempts.len().min(usize::from(u16::MAX))];

        let mut bits = BitWriter::default();
        bits.push_u8(self.gamemode.min(u32::from(u8::MAX)) as u8);
        bits.push_u16(saturate_u16(self.score));
        bits.push_u16(saturate_u16(self.games));
        bits.push_u16(saturate_u16(self.color_count));
        bits.push_u16(saturate_u16(self.max_attempts));
        bits.push_u16(code.len() as u16);
        for &color in code {
            bits.push_u16(color);
        }
        bits.push_u16(attempts.len() as u16);
        for attempt in attempts {
            for color in realign(attempt, code.len()) {
                bits.push_u16(color);
            }
        }

        Ok(URL_SAFE.encode(deflate(&bits.into_be_bytes())?))
    }

    /// Inverse of [`Token::encode`]. Also accepts the standard base64
    /// alphabet and surrounding whitespace.
    pub fn decode(token: &str) -> Result<Token, TokenError> {
        let normalized: String = token
            .trim()
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        let compressed = URL_SAFE.decode(normalized.as_bytes())?;
        let bytes = inflate(&compressed)?;
        let mut bits = BitReader::from_be_bytes(&bytes);

        let gamemode = u32::from(bits.read_u8());
        let score = u32::from(bits.read_u16());
        let games = u32::from(bits.read_u16());
        let color_count = u32::from(bits.read_u16());
        let max_attempts = u32::from(bits.read_u16());

        let code_length = usize::from(bits.read_u16());
        let code: Vec<Color> = (0..code_length).map(|_| bits.read_u16()).collect();

        let attempt_count = usize::from(bits.read_u16());
        if attempt_count.saturating_mul(code_length).saturating_mul(2) > MAX_TOKEN_BYTES {
            return Err(TokenError::TooLarge);
        }
        let attempts = (0..attempt_count)
            .map(|_| (0..code_length).map(|_| bits.read_u16()).collect())
            .collect();

        Ok(Token {
            gamemode,
            score,
            games,
            color_count,
            max_attempts,
            code,
            attempts,
        })
    }
}

/// Append-only little-endian bit buffer. Every field is byte aligned.
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
}

impl BitWriter {
    fn push_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn push_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Minimal big-endian representation of the buffer as an integer.
    fn into_be_bytes(mut self) -> Vec<u8> {
        while self.bytes.last() == Some(&0) {
            self.bytes.pop();
        }
        self.bytes.reverse();
        self.bytes
    }
}

struct BitReader {
    bytes: Vec<u8>,
    offset: usize,
}

impl BitReader {
    fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut bytes = bytes.to_vec();
        bytes.reverse();
        Self { bytes, offset: 0 }
    }

    fn read_u8(&mut self) -> u8 {
        let value = self.bytes.get(self.offset).copied().unwrap_or(0);
        self.offset += 1;
        value
    }

    fn read_u16(&mut self) -> u16 {
        let low = self.read_u8();
        let high = self.read_u8();
        u16::from_le_bytes([low, high])
    }
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Strict zlib inflate: the stream must reach its end marker.
fn inflate(data: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::new();

    loop {
        out.reserve(INFLATE_CHUNK);
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let input = &data[in_before as usize..];

        match inflater.decompress_vec(input, &mut out, FlushDecompress::None)? {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {}
        }

        if out.len() > MAX_TOKEN_BYTES {
            return Err(TokenError::TooLarge);
        }
        if inflater.total_in() == in_before && inflater.total_out() == out_before {
            return Err(TokenError::Truncated);
        }
    }
}
