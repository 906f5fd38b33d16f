//! Per-connection protocol state machine.
//!
//! A [`Session`] interprets one packet at a time against the shared
//! [`ServerState`] and returns the replies to send. It never touches the
//! socket itself, so the caller can release the state lock before writing.
//!
//! ```text
//! Handshake --"OK"--> Unknown --name--> Idle --token--> InGame
//!     |                  ^  |            ^ |               |
//!     |                  |  +--> Taken --+ +--"SB:n o"     |
//!     +--> Idle / InGame (resume)        +-----loss--------+
//! ```
//!
//! Outside `InGame`, any packet from an address whose user is already
//! playing on another connection is answered with `409` and the
//! connection is closed.

use crate::scoreboard::{ScoreboardEntry, ScoreboardQuery};
use crate::state::ServerState;
use crate::users::{Game, RegistrationError};
use log::{debug, info};
use rand::Rng;
use shared::game::{decode_guess, encode_guess, points_for_win, realign};
use shared::{
    compare, generate_code, saturate_u16, Color, Status, Token, TokenError, HANDSHAKE_GREETING,
    REDACTED_COLOR,
};
use std::collections::VecDeque;
use std::net::IpAddr;
use thiserror::Error;

/// Guess answered with an extra `418` before its feedback in classic
/// four-peg, six-color games.
const DIAGNOSTIC_GUESS: [Color; 4] = [0, 1, 0, 0];

/// Fatal error of one connection. The worker drops that connection only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("game settings need at least one color, one peg and one attempt")]
    InvalidSettings,
    #[error("no game stored for {0}")]
    MissingGame(IpAddr),
    #[error("no user registered for {0}")]
    MissingUser(IpAddr),
}

/// Outcome of one processed packet.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Payloads to send, in order.
    pub replies: Vec<Vec<u8>>,
    /// The connection lost a login conflict: close it after the replies
    /// without clearing the user's playing flag, which belongs to the
    /// other connection.
    pub close: bool,
}

impl Step {
    fn reply(payloads: Vec<Vec<u8>>) -> Self {
        Self {
            replies: payloads,
            close: false,
        }
    }
}

/// Protocol state of one connection
///
/// Tracks where the client is in the exchange and the stored guesses still
/// to be replayed after a resume or a game start with history. All user
/// and game data lives in the shared state; the session only knows the
/// address it speaks for.
#[derive(Debug)]
pub struct Session {
    addr: IpAddr,
    status: Status,
    /// Stored guesses to feed back through the state machine before any
    /// new input is read.
    replays: VecDeque<Vec<u8>>,
}

impl Session {
    /// Fresh session waiting for the handshake
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            status: Status::Handshake,
            replays: VecDeque::new(),
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Stored guesses not yet replayed
    pub fn pending_replays(&self) -> usize {
        self.replays.len()
    }

    /// Takes the next stored guess to feed back through [`Session::step`]
    ///
    /// Workers drain these one per tick before reading new input.
    pub fn next_replay(&mut self) -> Option<Vec<u8>> {
        self.replays.pop_front()
    }

    /// Processes one incoming (or replayed) packet
    ///
    /// Empty packets are ignored. Outside a game, a packet from an address
    /// that is already playing elsewhere gets `409` and a close request.
    /// Errors mean the connection must be dropped; the state is left
    /// consistent either way.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        packet: &[u8],
        state: &mut ServerState,
        rng: &mut R,
        now_ms: u64,
    ) -> Result<Step, SessionError> {
        if packet.is_empty() {
            return Ok(Step::default());
        }

        if self.status == Status::InGame {
            return self.guess(packet, state, rng, now_ms);
        }

        if state.users.is_connected(&self.addr) {
            info!("{} is already playing elsewhere, closing", self.addr);
            return Ok(Step {
                replies: vec![self.enter(Status::Conflict)],
                close: true,
            });
        }

        match self.status {
            Status::Handshake => self.handshake(packet, state),
            Status::Unknown | Status::Taken => Ok(self.register(packet, state)),
            Status::Idle => self.idle(packet, state, rng),
            _ => Ok(Step::default()),
        }
    }

    /// Releases the user's playing flag when the connection goes away.
    ///
    /// Only a session in `InGame` holds that flag: it is set on the way in
    /// (starting or resuming a game) and cleared by the session itself on a
    /// loss. A session in any other state leaves the flag alone, because it
    /// may belong to another connection from the same address.
    pub fn disconnect(&self, state: &mut ServerState) {
        if self.status != Status::InGame {
            return;
        }
        if state.users.disconnect(&self.addr) {
            debug!("{} no longer playing", self.addr);
        }
    }

    fn enter(&mut self, status: Status) -> Vec<u8> {
        self.status = status;
        status.to_bytes().to_vec()
    }

    fn handshake(&mut self, packet: &[u8], state: &mut ServerState) -> Result<Step, SessionError> {
        if packet != HANDSHAKE_GREETING {
            return Ok(Step::default());
        }

        let Some(user) = state.users.get_mut(&self.addr) else {
            return Ok(Step::reply(vec![self.enter(Status::Unknown)]));
        };
        let username = user.username.as_bytes().to_vec();

        let Some(game) = user.game.as_mut() else {
            return Ok(Step::reply(vec![self.enter(Status::Idle), username]));
        };

        let attempts = queue_replays(&mut self.replays, game.attempts.clone(), game);
        let token = Token {
            attempts,
            ..game.to_token()
        }
        .redacted(REDACTED_COLOR)
        .encode()?;

        // The queued replays rebuild the attempt list.
        game.attempts.clear();
        user.connected = true;
        info!(
            "{} resumed a game with {} stored attempts",
            self.addr,
            self.replays.len()
        );
        Ok(Step::reply(vec![
            self.enter(Status::InGame),
            username,
            token.into_bytes(),
        ]))
    }

    fn register(&mut self, packet: &[u8], state: &mut ServerState) -> Step {
        let result = match std::str::from_utf8(packet) {
            Ok(username) => state.users.register(self.addr, username),
            Err(_) => Err(RegistrationError::InvalidUsername),
        };

        match result {
            Ok(()) => Step::reply(vec![self.enter(Status::Idle)]),
            Err(e) => {
                debug!("{} registration refused: {}", self.addr, e);
                Step::reply(vec![self.enter(Status::Taken)])
            }
        }
    }

    fn idle<R: Rng + ?Sized>(
        &mut self,
        packet: &[u8],
        state: &mut ServerState,
        rng: &mut R,
    ) -> Result<Step, SessionError> {
        if let Some(query) = ScoreboardQuery::parse(packet) {
            return Ok(Step::reply(vec![state.scoreboard.encode_page(query)]));
        }

        let settings = Token::decode(&String::from_utf8_lossy(packet))?;
        let color_count = saturate_u16(settings.color_count);
        if color_count == 0 || settings.code.is_empty() || settings.max_attempts == 0 {
            return Err(SessionError::InvalidSettings);
        }

        let user = state
            .users
            .get_mut(&self.addr)
            .ok_or(SessionError::MissingUser(self.addr))?;

        let game = Game {
            gamemode: settings.gamemode,
            score: 0,
            games: 0,
            color_count,
            max_attempts: settings.max_attempts,
            code: generate_code(rng, settings.code.len(), color_count),
            attempts: Vec::new(),
        };
        let attempts = queue_replays(&mut self.replays, settings.attempts, &game);
        let token = Token {
            attempts,
            ..game.to_token()
        }
        .redacted(REDACTED_COLOR)
        .encode()?;

        info!(
            "{} started a game: {} pegs, {} colors, {} attempts",
            self.addr,
            game.code_length(),
            game.color_count,
            game.max_attempts
        );
        user.connected = true;
        user.game = Some(game);

        Ok(Step::reply(vec![self.enter(Status::InGame), token.into_bytes()]))
    }

    fn guess<R: Rng + ?Sized>(
        &mut self,
        packet: &[u8],
        state: &mut ServerState,
        rng: &mut R,
        now_ms: u64,
    ) -> Result<Step, SessionError> {
        let user = state
            .users
            .get_mut(&self.addr)
            .ok_or(SessionError::MissingUser(self.addr))?;
        let game = user
            .game
            .as_mut()
            .ok_or(SessionError::MissingGame(self.addr))?;

        let guess = decode_guess(packet, game.code_length());
        let mut replies = Vec::new();
        if game.color_count == 6 && guess == DIAGNOSTIC_GUESS {
            replies.push(Status::Diagnostic.to_bytes().to_vec());
        }

        let feedback = compare(&guess, &game.code);
        replies.push(feedback.to_bytes().to_vec());

        if feedback.is_solved(game.code_length()) {
            let points = points_for_win(game.max_attempts, game.attempts.len());
            game.score = game.score.saturating_add(points);
            game.games = game.games.saturating_add(1);
            game.code = generate_code(rng, game.code_length(), game.color_count);
            game.attempts.clear();
            info!(
                "{} won for {} points (streak {}, score {})",
                self.addr, points, game.games, game.score
            );
            return Ok(Step::reply(replies));
        }

        game.attempts.push(guess);
        if game.attempts.len() < usize::try_from(game.max_attempts).unwrap_or(usize::MAX) {
            return Ok(Step::reply(replies));
        }

        replies.push(game.to_token().encode()?.into_bytes());
        let entry = ScoreboardEntry::from_game(self.addr, &user.username, game, now_ms);
        info!(
            "{} lost after a streak of {} (score {}, ranked {})",
            self.addr, entry.games, entry.score, entry.normalized_score
        );
        user.game = None;
        user.connected = false;
        state.scoreboard.insert(entry);

        replies.push(self.enter(Status::Idle));
        Ok(Step::reply(replies))
    }
}

/// Queues stored attempts as guess packets for `game`, at most
/// `max_attempts` of them and none after one that matches the code.
/// Returns the attempts actually considered.
fn queue_replays(
    replays: &mut VecDeque<Vec<u8>>,
    mut attempts: Vec<Vec<Color>>,
    game: &Game,
) -> Vec<Vec<Color>> {
    attempts.truncate(usize::try_from(game.max_attempts).unwrap_or(usize::MAX));
    for attempt in &mut attempts {
        *attempt = realign(attempt, game.code_length());
    }

    for attempt in &attempts {
        replays.push_back(encode_guess(attempt));
        if *attempt == game.code {
            break;
        }
    }
    attempts
}
