//! State shared by every worker: the user registry and the scoreboard,
//! plus loading and saving both at startup and shutdown.

use crate::scoreboard::Scoreboard;
use crate::users::UserRegistry;
use log::{info, warn};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid user registry in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub users: UserRegistry,
    pub scoreboard: Scoreboard,
}

pub type SharedState = Arc<Mutex<ServerState>>;

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Reads both files. A missing file means empty state. Every
    /// `connected` flag is cleared since no connection survives a restart.
    pub fn load(users_path: &Path, scoreboard_path: &Path) -> Result<Self, PersistError> {
        let mut users = match read_optional(users_path)? {
            Some(contents) => {
                serde_json::from_str::<UserRegistry>(&contents).map_err(|source| {
                    PersistError::Json {
                        path: users_path.display().to_string(),
                        source,
                    }
                })?
            }
            None => UserRegistry::new(),
        };
        users.reset_connections();

        let scoreboard = match read_optional(scoreboard_path)? {
            Some(contents) => Scoreboard::from_csv(&contents),
            None => Scoreboard::new(),
        };

        info!(
            "Loaded {} users and {} scoreboard entries",
            users.len(),
            scoreboard.len()
        );
        Ok(Self { users, scoreboard })
    }

    /// Rewrites both files atomically.
    pub fn save(&self, users_path: &Path, scoreboard_path: &Path) -> Result<(), PersistError> {
        let users = serde_json::to_string_pretty(&self.users).map_err(|source| {
            PersistError::Json {
                path: users_path.display().to_string(),
                source,
            }
        })?;
        write_atomic(users_path, users.as_bytes())?;
        write_atomic(scoreboard_path, self.scoreboard.to_csv().as_bytes())?;

        info!(
            "Saved {} users and {} scoreboard entries",
            self.users.len(),
            self.scoreboard.len()
        );
        Ok(())
    }
}

/// Locks the shared state, taking over a lock poisoned by a panicking
/// worker. The state only holds plain values.
pub fn lock(state: &SharedState) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering shared state after a worker panic");
        poisoned.into_inner()
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, PersistError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Writes a sibling temporary file and renames it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let write = || -> io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };
    write().map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        io_error(path, source)
    })
}

fn io_error(path: &Path, source: io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::ScoreboardEntry;
    use crate::users::Game;
    use std::net::IpAddr;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        (dir.path().join("users.json"), dir.path().join("scores.csv"))
    }

    #[test]
    fn test_missing_files_give_empty_state() {
        let dir = TempDir::new().unwrap();
        let (users, scores) = paths(&dir);
        let state = ServerState::load(&users, &scores).unwrap();
        assert!(state.users.is_empty());
        assert!(state.scoreboard.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let (users_path, scores_path) = paths(&dir);
        let addr = IpAddr::from([10, 1, 1, 1]);

        let mut state = ServerState::new();
        state.users.register(addr, "persisted").unwrap();
        let user = state.users.get_mut(&addr).unwrap();
        user.connected = true;
        user.game = Some(Game {
            gamemode: 1,
            score: 4,
            games: 1,
            color_count: 6,
            max_attempts: 12,
            code: vec![5, 4, 3, 2],
            attempts: vec![vec![0, 0, 1, 1]],
        });
        state.scoreboard.insert(ScoreboardEntry {
            address: addr,
            username: "persisted".to_string(),
            score: 4,
            games: 1,
            total_attempts: 9,
            normalized_score: 5,
            color_count: 6,
            code_length: 4,
            max_attempts: 12,
            timestamp_ms: 1_650_000_000_000,
        });
        state.save(&users_path, &scores_path).unwrap();

        let loaded = ServerState::load(&users_path, &scores_path).unwrap();
        let user = loaded.users.get(&addr).unwrap();
        assert_eq!(user.username, "persisted");
        assert!(!user.connected);
        assert_eq!(user.game.as_ref().unwrap().code, vec![5, 4, 3, 2]);
        assert_eq!(loaded.scoreboard.entries(), state.scoreboard.entries());
    }

    #[test]
    fn test_save_leaves_no_temporary_files() {
        let dir = TempDir::new().unwrap();
        let (users_path, scores_path) = paths(&dir);
        ServerState::new().save(&users_path, &scores_path).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["scores.csv", "users.json"]);
    }

    #[test]
    fn test_corrupt_registry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (users_path, scores_path) = paths(&dir);
        fs::write(&users_path, "{ not json").unwrap();
        assert!(matches!(
            ServerState::load(&users_path, &scores_path),
            Err(PersistError::Json { .. })
        ));
    }

    #[test]
    fn test_lock_survives_poisoning() {
        let shared = ServerState::new().into_shared();
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("worker died");
        })
        .join();

        assert!(shared.is_poisoned());
        assert!(lock(&shared).users.is_empty());
    }
}
