//! # Ranked Mastermind Server
//!
//! Authoritative server for the ranked online mode. Clients connect over
//! TCP, identify by source address, play consecutive games against secret
//! codes held only here, and land on a shared scoreboard when a streak ends.
//!
//! ## Architecture
//!
//! ### Accepting Loop
//! A single tokio task accepts connections and pushes them into a bounded
//! queue (`network`). A full queue drops the newcomer.
//!
//! ### Worker Pool
//! A fixed number of OS threads each adopt up to a fixed number of queued
//! connections and sweep them cooperatively (`worker`). Reads never block
//! on an idle client; a frame that has started arriving is read with a
//! bounded timeout.
//!
//! ### Session State Machine
//! Every connection carries a [`session::Session`] that interprets packets
//! (handshake, registration, scoreboard queries, game start, guesses).
//! Steps run under one lock over the shared [`state::ServerState`] and
//! return replies that are written after the lock is released.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings and their defaults
//! - `users`: registry of users keyed by address, with pending games
//! - `scoreboard`: ranking key, ordered insertion, pages and flat-file layout
//! - `state`: shared state and its persistence
//! - `session`: per-connection protocol
//! - `decoy`: answer served to stray HTTP requests
//! - `worker` / `network`: the thread pool and the accepting loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::state::ServerState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!     let state = ServerState::load(&config.users_path(), &config.scoreboard_path())?;
//!
//!     let server = Server::bind(config.clone(), state.into_shared()).await?;
//!     let shared = server.state();
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     server::state::lock(&shared).save(&config.users_path(), &config.scoreboard_path())?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoy;
pub mod network;
pub mod scoreboard;
pub mod session;
pub mod state;
pub mod users;
pub mod utils;
pub mod worker;
