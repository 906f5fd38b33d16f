//! Blocking client for the ranked protocol.
//!
//! The client mirrors the server's connection states: greet, register if
//! needed, start or resume a game, guess until the streak ends, and browse
//! the scoreboard while idle. Every call sends one request and reads all
//! the replies it triggers, so the stream never holds unread packets
//! between calls.

use log::{debug, info};
use shared::game::encode_guess;
use shared::packet::{receive_packet, send_packet, PacketError};
use shared::{Color, Feedback, Status, Token, TokenError, HANDSHAKE_GREETING};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;

/// Anything that ends a client exchange early
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("server closed the connection")]
    Closed,
    #[error("another connection from this address is already playing")]
    Conflict,
    #[error("unexpected reply from server: {0:?}")]
    UnexpectedReply(Vec<u8>),
    #[error("no ranked game in progress")]
    NoGame,
}

/// Server answer to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    /// No user for this address yet; [`RankedClient::register`] next.
    NeedsUsername,
    /// Known user with no game in progress.
    Idle { username: String },
    /// A pending game was restored. `history` pairs every stored attempt
    /// with the feedback it earns against the current code.
    Resumed {
        username: String,
        token: Token,
        history: Vec<(Vec<Color>, Feedback)>,
    },
}

/// Result of one guess
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Wrong code, attempts left.
    Miss(Feedback),
    /// Code cracked; a new code is already in play.
    Won(Feedback),
    /// Attempts exhausted. `token` carries the full final state, secret
    /// included. The client is idle again.
    Lost { feedback: Feedback, token: Token },
}

impl GuessOutcome {
    /// Peg feedback of the guess, whatever the outcome
    pub fn feedback(&self) -> Feedback {
        match self {
            GuessOutcome::Miss(feedback) | GuessOutcome::Won(feedback) => *feedback,
            GuessOutcome::Lost { feedback, .. } => *feedback,
        }
    }
}

/// One scoreboard line as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub username: String,
    pub normalized_score: u16,
    pub games: u16,
    pub total_attempts: u16,
    pub color_count: u16,
    pub timestamp_ms: u64,
}

/// Settings and progress of the running game, tracked locally.
#[derive(Debug, Clone, Copy)]
struct GameProgress {
    code_length: usize,
    max_attempts: usize,
    attempts: usize,
}

/// Connection to a ranked server
///
/// Wraps a blocking `TcpStream` with a read timeout and tracks the running
/// game locally, which is enough to tell a win or a loss apart from a plain
/// miss:
/// - a full-length perfect match is a win and starts a new code
/// - the last allowed miss is followed by the final token and an idle status
/// - anything else is a miss
pub struct RankedClient {
    stream: TcpStream,
    game: Option<GameProgress>,
}

impl RankedClient {
    /// Opens the connection; `timeout` bounds the connect and every read
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(PacketError::from)?;
        stream.set_read_timeout(Some(timeout)).map_err(PacketError::from)?;
        stream.set_nodelay(true).map_err(PacketError::from)?;
        info!("Connected to {}", addr);
        Ok(Self { stream, game: None })
    }

    /// True while a ranked game is running on this connection
    pub fn in_game(&self) -> bool {
        self.game.is_some()
    }

    /// Pegs per code of the running game.
    pub fn code_length(&self) -> Option<usize> {
        self.game.map(|game| game.code_length)
    }

    /// Greets the server and reports who it thinks we are
    ///
    /// When a pending game is resumed, the server replays its stored
    /// attempts; their feedback is collected here and returned as the
    /// greeting's history. A `409` means another connection from this
    /// address is playing, and the server closes this one.
    pub fn handshake(&mut self) -> Result<Greeting, ClientError> {
        self.send(HANDSHAKE_GREETING)?;
        match self.receive_status()? {
            Status::Unknown => Ok(Greeting::NeedsUsername),
            Status::Idle => Ok(Greeting::Idle {
                username: self.receive_text()?,
            }),
            Status::InGame => {
                let username = self.receive_text()?;
                let token = Token::decode(&self.receive_text()?)?;
                self.begin(&token);

                let mut history = Vec::with_capacity(token.attempts.len());
                for attempt in &token.attempts {
                    let feedback = self.receive_outcome()?.feedback();
                    history.push((attempt.clone(), feedback));
                }

                info!("Resumed a game as {} with {} attempts", username, history.len());
                Ok(Greeting::Resumed {
                    username,
                    token,
                    history,
                })
            }
            Status::Conflict => Err(ClientError::Conflict),
            other => Err(ClientError::UnexpectedReply(other.to_bytes().to_vec())),
        }
    }

    /// Proposes a username. `Ok(false)` means it was taken or invalid.
    pub fn register(&mut self, username: &str) -> Result<bool, ClientError> {
        self.send(username.as_bytes())?;
        match self.receive_status()? {
            Status::Idle => Ok(true),
            Status::Taken => Ok(false),
            Status::Conflict => Err(ClientError::Conflict),
            other => Err(ClientError::UnexpectedReply(other.to_bytes().to_vec())),
        }
    }

    /// Starts a ranked game with the settings in `settings` (its code only
    /// sets the code length). Returns the server's copy with the secret
    /// redacted. Attempts carried by `settings` are replayed by the server
    /// and must be collected with [`RankedClient::receive_outcome`].
    pub fn start_game(&mut self, settings: &Token) -> Result<Token, ClientError> {
        self.send(settings.encode()?.as_bytes())?;
        match self.receive_status()? {
            Status::InGame => {}
            Status::Conflict => return Err(ClientError::Conflict),
            other => return Err(ClientError::UnexpectedReply(other.to_bytes().to_vec())),
        }

        let token = Token::decode(&self.receive_text()?)?;
        self.begin(&token);
        debug!(
            "Game started: {} pegs, {} colors, {} attempts",
            token.code.len(),
            token.color_count,
            token.max_attempts
        );
        Ok(token)
    }

    /// Submits one guess and waits for its outcome
    ///
    /// Fails with [`ClientError::NoGame`] before sending anything if no game
    /// is running. The extra `418` some guesses draw is skipped.
    pub fn guess(&mut self, guess: &[Color]) -> Result<GuessOutcome, ClientError> {
        if self.game.is_none() {
            return Err(ClientError::NoGame);
        }
        self.send(&encode_guess(guess))?;
        self.receive_outcome()
    }

    /// Reads the server's verdict on one guess, sent or replayed.
    pub fn receive_outcome(&mut self) -> Result<GuessOutcome, ClientError> {
        let mut game = self.game.ok_or(ClientError::NoGame)?;

        let mut reply = self.receive()?;
        if Status::from_payload(&reply) == Some(Status::Diagnostic) {
            reply = self.receive()?;
        }
        let feedback = match reply.len() {
            4 => Feedback::from_bytes(&reply),
            _ => None,
        }
        .ok_or(ClientError::UnexpectedReply(reply))?;

        if feedback.is_solved(game.code_length) {
            game.attempts = 0;
            self.game = Some(game);
            return Ok(GuessOutcome::Won(feedback));
        }

        game.attempts += 1;
        if game.attempts < game.max_attempts {
            self.game = Some(game);
            return Ok(GuessOutcome::Miss(feedback));
        }

        let token = Token::decode(&self.receive_text()?)?;
        match self.receive_status()? {
            Status::Idle => {}
            other => return Err(ClientError::UnexpectedReply(other.to_bytes().to_vec())),
        }
        self.game = None;
        Ok(GuessOutcome::Lost { feedback, token })
    }

    /// Fetches `page_size` entries starting at rank `offset`.
    pub fn scoreboard(
        &mut self,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<ScoreRecord>, ClientError> {
        self.send(format!("SB:{page_size} {offset}").as_bytes())?;
        let page = self.receive()?;
        parse_scoreboard_page(&page).ok_or(ClientError::UnexpectedReply(page))
    }

    fn begin(&mut self, token: &Token) {
        self.game = Some(GameProgress {
            code_length: token.code.len(),
            max_attempts: usize::try_from(token.max_attempts).unwrap_or(usize::MAX),
            attempts: 0,
        });
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        send_packet(&mut self.stream, payload)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, ClientError> {
        match receive_packet(&mut self.stream) {
            Ok(payload) => Ok(payload),
            Err(PacketError::Framing { skipped, .. }) if skipped.is_empty() => {
                Err(ClientError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive_status(&mut self) -> Result<Status, ClientError> {
        let reply = self.receive()?;
        Status::from_payload(&reply).ok_or(ClientError::UnexpectedReply(reply))
    }

    fn receive_text(&mut self) -> Result<String, ClientError> {
        let reply = self.receive()?;
        String::from_utf8(reply).map_err(|e| ClientError::UnexpectedReply(e.into_bytes()))
    }
}

/// Splits a scoreboard page into records. `None` if the page is cut short.
pub fn parse_scoreboard_page(page: &[u8]) -> Option<Vec<ScoreRecord>> {
    let mut records = Vec::new();
    let mut rest = page;

    while !rest.is_empty() {
        let name_len = usize::from(read_u16(rest, 0)?);
        let fixed = rest.get(2 + name_len..2 + name_len + 20)?;
        let username = String::from_utf8_lossy(&rest[2..2 + name_len]).into_owned();

        records.push(ScoreRecord {
            username,
            normalized_score: read_u16(fixed, 0)?,
            games: read_u16(fixed, 2)?,
            total_attempts: read_u16(fixed, 4)?,
            color_count: read_u16(fixed, 10)?,
            timestamp_ms: u64::from_be_bytes(fixed[12..20].try_into().ok()?),
        });
        rest = &rest[2 + name_len + 20..];
    }
    Some(records)
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let pair = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([pair[0], pair[1]]))
}
