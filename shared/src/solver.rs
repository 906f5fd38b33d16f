//! Computer player: exhaustive candidate elimination.

use crate::game::{compare, Color, Feedback};
use rand::Rng;
use thiserror::Error;

/// Largest code space the solver will enumerate.
pub const MAX_CODE_SPACE: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("{color_count}^{code_length} codes exceed the enumeration limit of {MAX_CODE_SPACE}")]
    SpaceTooLarge { code_length: usize, color_count: u16 },
}

/// Every code of `code_length` colors in lexicographic order.
///
/// Walks an odometer over the positions instead of recursing: the last
/// position is the fastest digit and a carry ripples left.
pub fn all_codes(code_length: usize, color_count: u16) -> Result<Vec<Vec<Color>>, SolverError> {
    let space = u32::try_from(code_length)
        .ok()
        .and_then(|exp| usize::from(color_count).checked_pow(exp))
        .filter(|&space| space <= MAX_CODE_SPACE)
        .ok_or(SolverError::SpaceTooLarge {
            code_length,
            color_count,
        })?;

    let mut codes = Vec::with_capacity(space);
    if space == 0 {
        return Ok(codes);
    }

    let mut digits: Vec<Color> = vec![0; code_length];
    loop {
        codes.push(digits.clone());

        let mut position = code_length;
        loop {
            if position == 0 {
                return Ok(codes);
            }
            position -= 1;
            digits[position] += 1;
            if digits[position] < color_count {
                break;
            }
            digits[position] = 0;
        }
    }
}

/// Keeps every code still consistent with the feedback seen so far.
pub struct Solver {
    code_length: usize,
    candidates: Vec<Vec<Color>>,
    guesses: usize,
}

impl Solver {
    pub fn new(code_length: usize, color_count: u16) -> Result<Self, SolverError> {
        Ok(Self {
            code_length,
            candidates: all_codes(code_length, color_count)?,
            guesses: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }

    /// Opens with half 0s and half 1s, then picks uniformly among the
    /// remaining candidates. The chosen guess leaves the candidate set.
    pub fn next_guess<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Vec<Color>> {
        let guess = if self.guesses == 0 {
            let opening: Vec<Color> = (0..self.code_length)
                .map(|i| if i < (self.code_length + 1) / 2 { 0 } else { 1 })
                .collect();
            match self.candidates.iter().position(|c| *c == opening) {
                Some(index) => self.candidates.swap_remove(index),
                None => self.take_random(rng)?,
            }
        } else {
            self.take_random(rng)?
        };

        self.guesses += 1;
        Some(guess)
    }

    /// Drops every candidate that would not have produced `feedback`.
    pub fn record(&mut self, guess: &[Color], feedback: Feedback) {
        self.candidates
            .retain(|candidate| compare(guess, candidate) == feedback);
    }

    fn take_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Vec<Color>> {
        if self.candidates.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.candidates.len());
        Some(self.candidates.swap_remove(index))
    }
}
