//! Registered players and their pending ranked games.
//!
//! A player is identified by the IP address they connect from, with no
//! credential. Two people behind the same address share one identity.
//! The registry only tracks:
//! - the permanent username chosen on first contact
//! - whether a connection from that address is currently playing
//! - the ranked game left pending by an interrupted session

use log::info;
use serde::{Deserialize, Serialize};
use shared::{Color, Token};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 32;

/// Every character a username may contain.
pub const USERNAME_CHARACTERS: &str = concat!(
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
    "_-°()[]{}*$€£%!?¡¿&@#/+=÷:;.…,<>§\"' ",
    "àâæáäãåāçćčéèêëęėēîïìíįīñńôœöòóõōûùüúūÿ",
    "ÀÂÆÁÄÃÅĀÇĆČÉÈÊËĘĖĒÎÏÌÍĮĪÑŃÔŒÖÒÓÕŌÛÙÜÚŪŸ",
);

/// Checks length (in characters) and alphabet of a proposed username.
pub fn is_valid_username(username: &str) -> bool {
    let length = username.chars().count();
    (USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length)
        && username.chars().all(|c| USERNAME_CHARACTERS.contains(c))
}

/// A ranked game bound to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub gamemode: u32,
    /// Points accumulated over the current win streak.
    pub score: u32,
    /// Length of the current win streak.
    pub games: u32,
    pub color_count: u16,
    pub max_attempts: u32,
    pub code: Vec<Color>,
    /// Failed guesses against the current code.
    pub attempts: Vec<Vec<Color>>,
}

impl Game {
    /// Number of pegs in the secret code
    pub fn code_length(&self) -> usize {
        self.code.len()
    }

    /// Full state, secret code included
    ///
    /// Only sent to the client once the streak is over. While the game is
    /// running the caller redacts the code first.
    pub fn to_token(&self) -> Token {
        Token {
            gamemode: self.gamemode,
            score: self.score,
            games: self.games,
            color_count: u32::from(self.color_count),
            max_attempts: self.max_attempts,
            code: self.code.clone(),
            attempts: self.attempts.clone(),
        }
    }

    /// Consecutive-streak cost: every game could have used
    /// `max_attempts + 1` attempts and each point saved one.
    pub fn total_attempts(&self) -> u64 {
        (u64::from(self.max_attempts) + 1)
            .saturating_mul(u64::from(self.games))
            .saturating_sub(u64::from(self.score))
    }
}

/// A registered player
///
/// Each user carries:
/// - the username bound to their address on first contact
/// - a playing flag, owned by the one connection running their game
/// - the ranked game in progress, kept across disconnects so it can be resumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// Set while a connection from this address is in a game.
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<Game>,
}

impl User {
    /// Creates an idle user with no game
    pub fn new(username: String) -> Self {
        Self {
            username,
            connected: false,
            game: None,
        }
    }
}

/// Why a username was refused. Every variant is answered with `403`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("username is not between {USERNAME_MIN_LENGTH} and {USERNAME_MAX_LENGTH} allowed characters")]
    InvalidUsername,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("address already has a registered user")]
    AddressRegistered,
}

/// All known users keyed by source address
///
/// Serialized as one JSON object mapping the address string to the user,
/// which is the on-disk layout of the user list. The registry itself does
/// no locking; it lives inside the shared server state.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRegistry {
    users: HashMap<IpAddr, User>,
}

impl UserRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the user registered for `addr`
    pub fn get(&self, addr: &IpAddr) -> Option<&User> {
        self.users.get(addr)
    }

    /// Mutable lookup of the user registered for `addr`
    ///
    /// Used by sessions to start, advance and end the user's game. The
    /// username must not be changed through it; usernames are permanent
    /// and unique across the registry.
    pub fn get_mut(&mut self, addr: &IpAddr) -> Option<&mut User> {
        self.users.get_mut(addr)
    }

    /// True if some connection from `addr` is currently playing.
    pub fn is_connected(&self, addr: &IpAddr) -> bool {
        self.users.get(addr).is_some_and(|user| user.connected)
    }

    /// True if any address already uses `username` (exact match)
    pub fn username_taken(&self, username: &str) -> bool {
        self.users.values().any(|user| user.username == username)
    }

    /// Binds a permanent username to `addr`
    ///
    /// The name must pass [`is_valid_username`], must not be in use by any
    /// other address, and `addr` must not already have a user. Checks run
    /// in that order and the first failure is returned.
    pub fn register(&mut self, addr: IpAddr, username: &str) -> Result<(), RegistrationError> {
        if !is_valid_username(username) {
            return Err(RegistrationError::InvalidUsername);
        }
        if self.username_taken(username) {
            return Err(RegistrationError::UsernameTaken);
        }
        if self.users.contains_key(&addr) {
            return Err(RegistrationError::AddressRegistered);
        }

        info!("Registered user {:?} for {}", username, addr);
        self.users.insert(addr, User::new(username.to_string()));
        Ok(())
    }

    /// Clears the playing flag of `addr`
    ///
    /// Returns true if it was set. Callers must only do this on behalf of
    /// the connection that holds the flag.
    pub fn disconnect(&mut self, addr: &IpAddr) -> bool {
        match self.users.get_mut(addr) {
            Some(user) if user.connected => {
                user.connected = false;
                true
            }
            _ => false,
        }
    }

    /// Clears every playing flag, e.g. after loading state from disk.
    pub fn reset_connections(&mut self) {
        for user in self.users.values_mut() {
            user.connected = false;
        }
    }

    /// Number of registered users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn sample_game() -> Game {
        Game {
            gamemode: 1,
            score: 20,
            games: 2,
            color_count: 6,
            max_attempts: 12,
            code: vec![1, 2, 3, 4],
            attempts: vec![vec![0, 0, 1, 1]],
        }
    }

    #[test]
    fn test_username_validation() {
        assert!(is_valid_username("abc"));
        assert!(is_valid_username("Zoë-Ñandú (2)"));
        assert!(is_valid_username(&"x".repeat(32)));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username(&"x".repeat(33)));
        assert!(!is_valid_username("tab\there"));
        assert!(!is_valid_username("emoji🙂"));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // Three characters, six bytes.
        assert!(is_valid_username("éèê"));
        assert!(is_valid_username(&"é".repeat(32)));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = UserRegistry::new();
        assert!(registry.is_empty());

        registry.register(addr(1), "alice").unwrap();
        let user = registry.get(&addr(1)).unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.connected);
        assert!(user.game.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejections() {
        let mut registry = UserRegistry::new();
        registry.register(addr(1), "alice").unwrap();

        assert_eq!(
            registry.register(addr(2), "alice"),
            Err(RegistrationError::UsernameTaken)
        );
        assert_eq!(
            registry.register(addr(2), "no"),
            Err(RegistrationError::InvalidUsername)
        );
        assert_eq!(
            registry.register(addr(1), "bob"),
            Err(RegistrationError::AddressRegistered)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connection_flags() {
        let mut registry = UserRegistry::new();
        registry.register(addr(1), "alice").unwrap();
        registry.register(addr(2), "bob").unwrap();

        registry.get_mut(&addr(1)).unwrap().connected = true;
        assert!(registry.is_connected(&addr(1)));
        assert!(!registry.is_connected(&addr(2)));
        assert!(!registry.is_connected(&addr(3)));

        assert!(registry.disconnect(&addr(1)));
        assert!(!registry.disconnect(&addr(1)));

        registry.get_mut(&addr(2)).unwrap().connected = true;
        registry.reset_connections();
        assert!(!registry.is_connected(&addr(2)));
    }

    #[test]
    fn test_total_attempts() {
        // Two wins worth 20 points out of 13 possible attempts each.
        assert_eq!(sample_game().total_attempts(), 6);

        let fresh = Game {
            score: 0,
            games: 0,
            ..sample_game()
        };
        assert_eq!(fresh.total_attempts(), 0);
    }

    #[test]
    fn test_game_token_carries_secret() {
        let token = sample_game().to_token();
        assert_eq!(token.code, vec![1, 2, 3, 4]);
        assert_eq!(token.color_count, 6);
        assert_eq!(token.attempts.len(), 1);
    }

    #[test]
    fn test_json_layout() {
        let mut registry = UserRegistry::new();
        registry.register(addr(7), "carol").unwrap();
        registry.get_mut(&addr(7)).unwrap().game = Some(sample_game());

        let json = serde_json::to_value(&registry).unwrap();
        let entry = &json["10.0.0.7"];
        assert_eq!(entry["username"], "carol");
        assert_eq!(entry["connected"], false);
        assert_eq!(entry["game"]["max_attempts"], 12);
        assert_eq!(entry["game"]["code"], serde_json::json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_json_without_optional_fields() {
        let registry: UserRegistry =
            serde_json::from_str(r#"{"192.168.1.5": {"username": "dave"}}"#).unwrap();
        let user = registry.get(&IpAddr::from([192, 168, 1, 5])).unwrap();
        assert_eq!(user.username, "dave");
        assert!(!user.connected);
        assert!(user.game.is_none());
    }
}
