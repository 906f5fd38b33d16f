//! Automated ranked player driven by the candidate-elimination solver.

use crate::network::{ClientError, GuessOutcome, RankedClient};
use log::{debug, info};
use rand::Rng;
use shared::solver::{Solver, SolverError};
use shared::{Color, Feedback, Token, REDACTED_COLOR};
use thiserror::Error;

/// Why a bot stopped playing
#[derive(Debug, Error)]
pub enum PlayError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("solver ran out of candidates")]
    Exhausted,
}

/// Result of one code played to its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeResult {
    /// Cracked after `attempts` guesses (including the winning one).
    Cracked { attempts: usize },
    /// The streak ended; `token` holds the final state.
    Lost { token: Token },
}

/// Settings of the ranked games a bot asks for.
#[derive(Debug, Clone, Copy)]
pub struct GameSettings {
    pub code_length: usize,
    pub color_count: u16,
    pub max_attempts: u32,
}

impl GameSettings {
    /// Settings token for starting a game
    ///
    /// The code is all zeros and only tells the server its length; the
    /// server picks the real secret.
    pub fn to_token(self) -> Token {
        Token {
            gamemode: shared::Gamemode::Ranked.id(),
            color_count: u32::from(self.color_count),
            max_attempts: self.max_attempts,
            code: vec![0; self.code_length],
            ..Token::default()
        }
    }
}

/// Automated ranked player
///
/// Keeps one solver per code. After every win or loss the solver is reset,
/// since the server has moved on to a fresh secret.
pub struct Bot<R: Rng> {
    settings: GameSettings,
    solver: Solver,
    rng: R,
}

impl<R: Rng> Bot<R> {
    /// Creates a bot for `settings`; fails if the code space is too large
    /// to enumerate
    pub fn new(settings: GameSettings, rng: R) -> Result<Self, PlayError> {
        Ok(Self {
            settings,
            solver: Solver::new(settings.code_length, settings.color_count)?,
            rng,
        })
    }

    /// Feeds guesses already made against the current code to the solver.
    pub fn learn(&mut self, history: &[(Vec<Color>, Feedback)]) {
        for (guess, feedback) in history {
            self.solver.record(guess, *feedback);
        }
    }

    /// Guesses until the current code is cracked or the streak is lost.
    pub fn play_code(&mut self, client: &mut RankedClient) -> Result<CodeResult, PlayError> {
        let mut attempts = 0;
        loop {
            let guess = self.solver.next_guess(&mut self.rng).ok_or(PlayError::Exhausted)?;
            attempts += 1;

            match client.guess(&guess)? {
                GuessOutcome::Miss(feedback) => {
                    debug!("{:?} -> {:?}", guess, feedback);
                    self.solver.record(&guess, feedback);
                }
                GuessOutcome::Won(_) => {
                    info!("Cracked {:?} in {} attempts", guess, attempts);
                    self.reset()?;
                    return Ok(CodeResult::Cracked { attempts });
                }
                GuessOutcome::Lost { token, .. } => {
                    info!("Lost; the code was {:?}", token.code);
                    self.reset()?;
                    return Ok(CodeResult::Lost { token });
                }
            }
        }
    }

    /// Ends the streak on purpose so it lands on the scoreboard. No color
    /// index reaches `REDACTED_COLOR`, so those guesses never match.
    pub fn forfeit(&mut self, client: &mut RankedClient) -> Result<Token, PlayError> {
        let length = client.code_length().ok_or(ClientError::NoGame)?;
        let impossible = vec![REDACTED_COLOR; length];
        loop {
            if let GuessOutcome::Lost { token, .. } = client.guess(&impossible)? {
                self.reset()?;
                return Ok(token);
            }
        }
    }

    fn reset(&mut self) -> Result<(), PlayError> {
        self.solver = Solver::new(self.settings.code_length, self.settings.color_count)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_token() {
        let token = GameSettings {
            code_length: 5,
            color_count: 8,
            max_attempts: 10,
        }
        .to_token();
        assert_eq!(token.gamemode, 1);
        assert_eq!(token.code.len(), 5);
        assert_eq!((token.color_count, token.max_attempts), (8, 10));
        assert!(token.attempts.is_empty());
    }

    #[test]
    fn test_bot_refuses_huge_spaces() {
        let settings = GameSettings {
            code_length: 12,
            color_count: 16,
            max_attempts: 12,
        };
        assert!(matches!(
            Bot::new(settings, rand::thread_rng()),
            Err(PlayError::Solver(_))
        ));
    }
}
