//! # Ranked Mastermind Client
//!
//! Client side of the ranked online mode: a blocking protocol client and
//! an automated player that drives it.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::RankedClient`] speaks the ranked protocol over one TCP
//! connection:
//! - handshake, with resume of a pending game
//! - username registration
//! - starting games from a settings token
//! - guesses, tolerating the server's diagnostic `418` reply
//! - scoreboard pages
//!
//! ### Game Module (`game`)
//! [`game::Bot`] plays ranked games with the candidate-elimination solver
//! from `shared::solver`, and can end a streak deliberately so it gets
//! ranked.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::{Bot, GameSettings};
//! use client::network::{Greeting, RankedClient};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr = "127.0.0.1:45735".parse()?;
//!     let mut client = RankedClient::connect(addr, Duration::from_secs(5))?;
//!     if client.handshake()? == Greeting::NeedsUsername {
//!         client.register("codebreaker")?;
//!     }
//!
//!     let settings = GameSettings { code_length: 4, color_count: 6, max_attempts: 12 };
//!     client.start_game(&settings.to_token())?;
//!     let mut bot = Bot::new(settings, rand::thread_rng())?;
//!     println!("{:?}", bot.play_code(&mut client)?);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
