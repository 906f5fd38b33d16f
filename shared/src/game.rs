//! Code generation, peg scoring and the points rule.

use rand::Rng;

/// Index of a color, in `[0, color_count)` for a valid code.
pub type Color = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gamemode {
    Local = 0,
    Ranked = 1,
    ComputerVsComputer = 2,
}

impl Gamemode {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Gamemode::Local),
            1 => Some(Gamemode::Ranked),
            2 => Some(Gamemode::ComputerVsComputer),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Pegs awarded for one guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Feedback {
    /// Right color in the right position.
    pub perfect: u16,
    /// Right color in the wrong position.
    pub partial: u16,
}

impl Feedback {
    pub fn new(perfect: u16, partial: u16) -> Self {
        Self { perfect, partial }
    }

    pub fn is_solved(&self, code_length: usize) -> bool {
        usize::from(self.perfect) == code_length
    }

    /// Wire form: perfect then partial, 2 bytes big-endian each.
    pub fn to_bytes(self) -> [u8; 4] {
        let [a, b] = self.perfect.to_be_bytes();
        let [c, d] = self.partial.to_be_bytes();
        [a, b, c, d]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        Some(Self {
            perfect: u16::from_be_bytes([bytes[0], bytes[1]]),
            partial: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// Draws every position independently and uniformly from `[0, color_count)`.
/// A zero color count is treated as one color.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, length: usize, color_count: u16) -> Vec<Color> {
    let colors = color_count.max(1);
    (0..length).map(|_| rng.gen_range(0..colors)).collect()
}

/// Standard Mastermind feedback for `guess` against `code`.
///
/// Exact matches are counted first over the common prefix; every leftover
/// guess color then consumes at most one leftover occurrence in the code.
pub fn compare(guess: &[Color], code: &[Color]) -> Feedback {
    let mut guess_left = Vec::with_capacity(guess.len());
    let mut code_left = Vec::with_capacity(code.len());
    let mut perfect = 0u16;

    for (i, &color) in guess.iter().enumerate() {
        match code.get(i) {
            Some(&target) if target == color => perfect += 1,
            Some(&target) => {
                guess_left.push(color);
                code_left.push(target);
            }
            None => guess_left.push(color),
        }
    }
    if code.len() > guess.len() {
        code_left.extend_from_slice(&code[guess.len()..]);
    }

    let mut partial = 0u16;
    for color in guess_left {
        if let Some(pos) = code_left.iter().position(|&c| c == color) {
            code_left.swap_remove(pos);
            partial += 1;
        }
    }

    Feedback { perfect, partial }
}

/// Points for cracking the code on the 0-based attempt `attempt_index`.
pub fn points_for_win(max_attempts: u32, attempt_index: usize) -> u32 {
    let index = u32::try_from(attempt_index).unwrap_or(u32::MAX);
    max_attempts.saturating_sub(index)
}

/// Forces an attempt to `length` colors: longer ones are cut, shorter ones
/// are padded with color 0.
pub fn realign(attempt: &[Color], length: usize) -> Vec<Color> {
    let mut aligned: Vec<Color> = attempt.iter().copied().take(length).collect();
    aligned.resize(length, 0);
    aligned
}

/// Wire form of a guess: every color as 2 bytes big-endian.
pub fn encode_guess(guess: &[Color]) -> Vec<u8> {
    guess.iter().flat_map(|c| c.to_be_bytes()).collect()
}

/// Reads `length` colors from a guess payload. Missing colors read as 0 and
/// a dangling odd byte is taken as the low byte of its color.
pub fn decode_guess(payload: &[u8], length: usize) -> Vec<Color> {
    (0..length)
        .map(|i| {
            let start = (2 * i).min(payload.len());
            let end = (2 * i + 2).min(payload.len());
            payload[start..end]
                .iter()
                .fold(0u16, |acc, &byte| (acc << 8) | Color::from(byte))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_compare_reference_cases() {
        assert_eq!(compare(&[0, 1, 2, 3], &[0, 1, 2, 3]), Feedback::new(4, 0));
        assert_eq!(compare(&[3, 2, 1, 0], &[0, 1, 2, 3]), Feedback::new(0, 4));
        assert_eq!(compare(&[0, 0, 1, 1], &[1, 1, 0, 0]), Feedback::new(0, 4));
        assert_eq!(compare(&[0, 0, 0, 0], &[0, 1, 2, 3]), Feedback::new(1, 0));
    }

    #[test]
    fn test_compare_does_not_double_count() {
        assert_eq!(compare(&[1, 1, 2, 2], &[1, 2, 3, 4]), Feedback::new(1, 1));
        assert_eq!(compare(&[5, 5, 5, 1], &[1, 5, 0, 0]), Feedback::new(1, 1));
    }

    #[test]
    fn test_compare_empty() {
        assert_eq!(compare(&[], &[]), Feedback::new(0, 0));
        assert!(compare(&[], &[]).is_solved(0));
    }

    #[test]
    fn test_compare_properties_on_random_codes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let length = rng.gen_range(1..7);
            let colors = rng.gen_range(1..9);
            let code = generate_code(&mut rng, length, colors);
            let guess = generate_code(&mut rng, length, colors);

            let feedback = compare(&guess, &code);
            assert!(usize::from(feedback.perfect + feedback.partial) <= length);
            assert_eq!(feedback.is_solved(length), guess == code);
            // Color-only matches are symmetric.
            assert_eq!(compare(&code, &guess), feedback);
        }
    }

    #[test]
    fn test_generate_code_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let code = generate_code(&mut rng, 500, 6);
        assert_eq!(code.len(), 500);
        assert!(code.iter().all(|&c| c < 6));

        let single = generate_code(&mut rng, 8, 0);
        assert_eq!(single, vec![0; 8]);
    }

    #[test]
    fn test_points_for_win() {
        assert_eq!(points_for_win(12, 0), 12);
        assert_eq!(points_for_win(12, 11), 1);
        assert_eq!(points_for_win(12, 40), 0);
    }

    #[test]
    fn test_realign() {
        assert_eq!(realign(&[1, 2, 3, 4, 5], 4), vec![1, 2, 3, 4]);
        assert_eq!(realign(&[1, 2], 4), vec![1, 2, 0, 0]);
        assert_eq!(realign(&[], 0), Vec::<Color>::new());
    }

    #[test]
    fn test_guess_wire_format() {
        let bytes = encode_guess(&[0, 1, 0x0102, 0xFFFF]);
        assert_eq!(bytes, vec![0, 0, 0, 1, 1, 2, 0xFF, 0xFF]);
        assert_eq!(decode_guess(&bytes, 4), vec![0, 1, 0x0102, 0xFFFF]);
    }

    #[test]
    fn test_decode_short_guess() {
        assert_eq!(decode_guess(&[0, 3, 7], 4), vec![3, 7, 0, 0]);
        assert_eq!(decode_guess(&[], 2), vec![0, 0]);
    }

    #[test]
    fn test_feedback_bytes() {
        let feedback = Feedback::new(2, 1);
        assert_eq!(feedback.to_bytes(), [0, 2, 0, 1]);
        assert_eq!(Feedback::from_bytes(&feedback.to_bytes()), Some(feedback));
        assert_eq!(Feedback::from_bytes(&[0, 1]), None);
    }

    #[test]
    fn test_gamemode_ids() {
        assert_eq!(Gamemode::from_id(1), Some(Gamemode::Ranked));
        assert_eq!(Gamemode::Ranked.id(), 1);
        assert_eq!(Gamemode::from_id(3), None);
    }
}
