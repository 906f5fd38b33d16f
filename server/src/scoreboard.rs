//! Ranked scoreboard: finished win streaks ordered by a difficulty-weighted
//! score.
//!
//! Order is descending normalized score, then descending number of games,
//! then ascending total attempts. An inserted entry lands after every entry
//! it does not strictly outrank, so equal entries keep arrival order.

use crate::users::Game;
use log::warn;
use regex::bytes::Regex;
use shared::packet::MAX_PAYLOAD_SIZE;
use shared::saturate_u16;
use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::OnceLock;

pub const CSV_HEADER: &str = "id,username,score,games,total attempts,normalized score,color count,code length,maximum attempts,timestamp";

/// Stands in for a comma inside a field of the flat file.
pub const COMMA_SUBSTITUTE: char = '„';

/// Difficulty-weighted ranking key of a finished streak.
///
/// `floor(score * colors^length / 1000 / (1.2^max_attempts / 10))`: more
/// colors and longer codes are worth more, a generous attempt budget less.
pub fn normalized_score(score: u32, color_count: u32, code_length: usize, max_attempts: u32) -> u64 {
    let length = i32::try_from(code_length).unwrap_or(i32::MAX);
    let attempts = i32::try_from(max_attempts).unwrap_or(i32::MAX);

    let mut value = f64::from(score);
    value *= f64::from(color_count).powi(length) / 1000.0;
    value /= 1.2f64.powi(attempts) / 10.0;
    // Saturating cast: NaN maps to 0 and overflow to u64::MAX.
    value.floor() as u64
}

/// One finished win streak
///
/// Entries are created when a ranked game is lost and never change
/// afterwards. The same record is written as a CSV row on disk and as a
/// binary record in scoreboard pages.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreboardEntry {
    pub address: IpAddr,
    pub username: String,
    pub score: u32,
    pub games: u32,
    pub total_attempts: u64,
    pub normalized_score: u64,
    pub color_count: u32,
    pub code_length: u32,
    pub max_attempts: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ScoreboardEntry {
    /// Summarises the streak carried by `game` when it ends.
    pub fn from_game(address: IpAddr, username: &str, game: &Game, timestamp_ms: u64) -> Self {
        Self {
            address,
            username: username.to_string(),
            score: game.score,
            games: game.games,
            total_attempts: game.total_attempts(),
            normalized_score: normalized_score(
                game.score,
                u32::from(game.color_count),
                game.code_length(),
                game.max_attempts,
            ),
            color_count: u32::from(game.color_count),
            code_length: u32::try_from(game.code_length()).unwrap_or(u32::MAX),
            max_attempts: game.max_attempts,
            timestamp_ms,
        }
    }

    /// Ranking order between two entries
    ///
    /// `Less` means `self` ranks above `other`. Compares, in order:
    /// - normalized score, higher first
    /// - games in the streak, more first
    /// - total attempts, fewer first
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .normalized_score
            .cmp(&self.normalized_score)
            .then(other.games.cmp(&self.games))
            .then(self.total_attempts.cmp(&other.total_attempts))
    }

    fn to_row(&self) -> String {
        let seconds = format!("{}.{:03}", self.timestamp_ms / 1000, self.timestamp_ms % 1000);
        [
            self.address.to_string(),
            self.username.clone(),
            self.score.to_string(),
            self.games.to_string(),
            self.total_attempts.to_string(),
            self.normalized_score.to_string(),
            self.color_count.to_string(),
            self.code_length.to_string(),
            self.max_attempts.to_string(),
            seconds,
        ]
        .iter()
        .map(|field| field.replace(',', &COMMA_SUBSTITUTE.to_string()))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn from_row(line: &str) -> Option<Self> {
        let fields: Vec<String> = line
            .split(',')
            .map(|field| field.replace(COMMA_SUBSTITUTE, ","))
            .collect();
        if fields.len() != 10 {
            return None;
        }

        let seconds: f64 = fields[9].trim().parse().ok()?;
        Some(Self {
            address: fields[0].parse().ok()?,
            username: fields[1].clone(),
            score: fields[2].parse().ok()?,
            games: fields[3].parse().ok()?,
            total_attempts: fields[4].parse().ok()?,
            normalized_score: fields[5].parse().ok()?,
            color_count: fields[6].parse().ok()?,
            code_length: fields[7].parse().ok()?,
            max_attempts: fields[8].parse().ok()?,
            timestamp_ms: (seconds * 1000.0).round() as u64,
        })
    }

    /// Binary record used in scoreboard pages.
    fn encode_into(&self, out: &mut Vec<u8>) {
        let username = self.username.as_bytes();
        let username = &username[..username.len().min(usize::from(u16::MAX))];

        out.extend_from_slice(&(username.len() as u16).to_be_bytes());
        out.extend_from_slice(username);
        for field in [
            saturate_u16(self.normalized_score),
            saturate_u16(self.games),
            saturate_u16(self.total_attempts),
            saturate_u16(self.total_attempts),
            saturate_u16(self.normalized_score),
            saturate_u16(self.color_count),
        ] {
            out.extend_from_slice(&field.to_be_bytes());
        }
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
    }

    fn encoded_len(&self) -> usize {
        2 + self.username.len().min(usize::from(u16::MAX)) + PAGE_RECORD_FIXED_LEN
    }
}

/// Bytes of a page record after the username.
const PAGE_RECORD_FIXED_LEN: usize = 6 * 2 + 8;

/// A parsed `SB:<page_size> <offset>` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreboardQuery {
    pub page_size: usize,
    pub offset: usize,
}

impl ScoreboardQuery {
    /// Parses an exact `SB:<page_size> <offset>` payload
    ///
    /// Both numbers are plain decimal digits. A number too large for
    /// `usize` saturates instead of failing, which simply yields an empty
    /// or clipped page. Anything else, including a missing field or extra
    /// bytes, is not a scoreboard query.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^SB:([0-9]+) ([0-9]+)$").expect("scoreboard query pattern is valid")
        });

        let captures = pattern.captures(payload)?;
        let number = |index: usize| {
            std::str::from_utf8(&captures[index])
                .ok()
                .map(|digits| digits.parse().unwrap_or(usize::MAX))
        };
        Some(Self {
            page_size: number(1)?,
            offset: number(2)?,
        })
    }

    /// Request payload for this query, as sent by clients
    pub fn to_payload(self) -> Vec<u8> {
        format!("SB:{} {}", self.page_size, self.offset).into_bytes()
    }
}

/// Every ranked streak, best first
///
/// The board only grows. It is shared by all workers inside the server
/// state and persisted as a flat CSV file.
#[derive(Debug, Default)]
pub struct Scoreboard {
    entries: Vec<ScoreboardEntry>,
}

impl Scoreboard {
    /// Creates an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts at the first entry the new one strictly outranks and
    /// returns its 0-based rank.
    pub fn insert(&mut self, entry: ScoreboardEntry) -> usize {
        let index = self
            .entries
            .iter()
            .position(|other| entry.rank_cmp(other) == Ordering::Less)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
        index
    }

    /// All entries in rank order
    pub fn entries(&self) -> &[ScoreboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One page of the board in rank order
    ///
    /// Returns entries `[offset, offset + page_size)` clipped to the board,
    /// so an offset past the end gives an empty page rather than an error.
    pub fn page(&self, query: ScoreboardQuery) -> &[ScoreboardEntry] {
        let start = query.offset.min(self.entries.len());
        let end = start.saturating_add(query.page_size).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Binary reply to a scoreboard query
    ///
    /// Records of the page are concatenated, each laid out as:
    /// - username length (u16) and UTF-8 username
    /// - normalized score, games, total attempts, total attempts,
    ///   normalized score and color count, each a saturated u16
    /// - timestamp in milliseconds (u64)
    ///
    /// All integers are big-endian. Encoding stops before the first record
    /// that would push the reply past one packet payload.
    pub fn encode_page(&self, query: ScoreboardQuery) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in self.page(query) {
            if out.len() + entry.encoded_len() > MAX_PAYLOAD_SIZE {
                break;
            }
            entry.encode_into(&mut out);
        }
        out
    }

    /// Flat-file form: header row, then one row per entry in rank order
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(CSV_HEADER);
        csv.push('\n');
        for entry in &self.entries {
            csv.push_str(&entry.to_row());
            csv.push('\n');
        }
        csv
    }

    /// Reads the flat file. Rows are trusted to already be in rank order.
    pub fn from_csv(contents: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() || line == CSV_HEADER {
                continue;
            }
            match ScoreboardEntry::from_row(line) {
                Some(entry) => entries.push(entry),
                None => warn!("Skipping malformed scoreboard line {}", number + 1),
            }
        }
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn entry(username: &str, normalized: u64, games: u32, total_attempts: u64) -> ScoreboardEntry {
        ScoreboardEntry {
            address: IpAddr::from([127, 0, 0, 1]),
            username: username.to_string(),
            score: 10,
            games,
            total_attempts,
            normalized_score: normalized,
            color_count: 6,
            code_length: 4,
            max_attempts: 12,
            timestamp_ms: 1_700_000_000_123,
        }
    }

    fn names(board: &Scoreboard) -> Vec<&str> {
        board.entries().iter().map(|e| e.username.as_str()).collect()
    }

    #[test]
    fn test_normalized_score_reference_values() {
        assert_eq!(normalized_score(11, 6, 4, 12), 15);
        assert_eq!(normalized_score(25, 6, 4, 12), 36);
        assert_eq!(normalized_score(12, 1, 4, 12), 0);
        assert_eq!(normalized_score(5, 8, 5, 10), 264);
        assert_eq!(normalized_score(0, 6, 4, 12), 0);
    }

    #[test]
    fn test_normalized_score_formula() {
        let expected = 11.0 * 6f64.powi(4) / 1000.0 / (1.2f64.powi(12) / 10.0);
        assert_approx_eq!(expected, 15.989, 0.001);
        assert_eq!(normalized_score(11, 6, 4, 12), expected.floor() as u64);
    }

    #[test]
    fn test_insert_orders_by_normalized_score() {
        let mut board = Scoreboard::new();
        board.insert(entry("low", 5, 1, 1));
        board.insert(entry("high", 50, 1, 1));
        board.insert(entry("mid", 20, 1, 1));
        assert_eq!(names(&board), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_tie_break_on_games_then_attempts() {
        let mut board = Scoreboard::new();
        board.insert(entry("few-games", 10, 1, 3));
        board.insert(entry("many-games", 10, 4, 9));
        board.insert(entry("many-games-efficient", 10, 4, 2));
        assert_eq!(
            names(&board),
            vec!["many-games-efficient", "many-games", "few-games"]
        );
    }

    #[test]
    fn test_insert_is_stable_for_equal_entries() {
        let mut board = Scoreboard::new();
        assert_eq!(board.insert(entry("first", 10, 2, 5)), 0);
        assert_eq!(board.insert(entry("second", 10, 2, 5)), 1);
        assert_eq!(board.insert(entry("third", 10, 2, 5)), 2);
        assert_eq!(names(&board), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_from_game() {
        let game = Game {
            gamemode: 1,
            score: 11,
            games: 1,
            color_count: 6,
            max_attempts: 12,
            code: vec![0, 1, 2, 3],
            attempts: Vec::new(),
        };
        let entry = ScoreboardEntry::from_game(IpAddr::from([1, 2, 3, 4]), "eve", &game, 42);
        assert_eq!(entry.total_attempts, 2);
        assert_eq!(entry.normalized_score, 15);
        assert_eq!(entry.code_length, 4);
        assert_eq!(entry.timestamp_ms, 42);
    }

    #[test]
    fn test_query_parsing() {
        assert_eq!(
            ScoreboardQuery::parse(b"SB:100 0"),
            Some(ScoreboardQuery {
                page_size: 100,
                offset: 0
            })
        );
        assert_eq!(
            ScoreboardQuery::parse(b"SB:99999999999999999999999 3").map(|q| q.page_size),
            Some(usize::MAX)
        );
        assert_eq!(ScoreboardQuery::parse(b"SB:10"), None);
        assert_eq!(ScoreboardQuery::parse(b"SB:+1 2"), None);
        assert_eq!(ScoreboardQuery::parse(b"SB:1 2\n"), None);
        assert_eq!(ScoreboardQuery::parse(b"eJxjYGBg"), None);

        let query = ScoreboardQuery {
            page_size: 5,
            offset: 10,
        };
        assert_eq!(ScoreboardQuery::parse(&query.to_payload()), Some(query));
    }

    #[test]
    fn test_page_bounds() {
        let mut board = Scoreboard::new();
        for i in 0..5 {
            board.insert(entry(&format!("p{i}"), 10 - i, 1, 1));
        }

        let page = |page_size, offset| board.page(ScoreboardQuery { page_size, offset }).len();
        assert_eq!(page(2, 0), 2);
        assert_eq!(page(10, 3), 2);
        assert_eq!(page(10, 5), 0);
        assert_eq!(page(10, 50), 0);
        assert_eq!(page(usize::MAX, 1), 4);
    }

    #[test]
    fn test_page_record_layout() {
        let mut board = Scoreboard::new();
        board.insert(entry("bob", 300, 7, 70_000));

        let bytes = board.encode_page(ScoreboardQuery {
            page_size: 1,
            offset: 0,
        });
        let mut expected = vec![0, 3];
        expected.extend_from_slice(b"bob");
        expected.extend_from_slice(&300u16.to_be_bytes());
        expected.extend_from_slice(&7u16.to_be_bytes());
        expected.extend_from_slice(&u16::MAX.to_be_bytes());
        expected.extend_from_slice(&u16::MAX.to_be_bytes());
        expected.extend_from_slice(&300u16.to_be_bytes());
        expected.extend_from_slice(&6u16.to_be_bytes());
        expected.extend_from_slice(&1_700_000_000_123u64.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_page_fits_in_one_packet() {
        let mut board = Scoreboard::new();
        let long_name = "w".repeat(32);
        for _ in 0..5000 {
            board.insert(entry(&long_name, 1, 1, 1));
        }

        let bytes = board.encode_page(ScoreboardQuery {
            page_size: 5000,
            offset: 0,
        });
        let record = 2 + 32 + PAGE_RECORD_FIXED_LEN;
        assert!(bytes.len() <= MAX_PAYLOAD_SIZE);
        assert_eq!(bytes.len() % record, 0);
        assert_eq!(bytes.len() / record, MAX_PAYLOAD_SIZE / record);
    }

    #[test]
    fn test_csv_roundtrip_with_commas() {
        let mut board = Scoreboard::new();
        board.insert(entry("comma, the user", 12, 2, 4));
        board.insert(entry("plain", 3, 1, 8));

        let csv = board.to_csv();
        assert!(csv.starts_with(CSV_HEADER));
        assert!(csv.contains("comma„ the user"));
        assert!(csv.contains(",1700000000.123\n"));

        let restored = Scoreboard::from_csv(&csv);
        assert_eq!(restored.entries(), board.entries());
    }

    #[test]
    fn test_csv_skips_malformed_rows() {
        let csv = format!(
            "{CSV_HEADER}\nnot,a,row\n127.0.0.1,ann,3,1,10,4,6,4,12,1700000000.5\n"
        );
        let board = Scoreboard::from_csv(&csv);
        assert_eq!(board.len(), 1);
        assert_eq!(board.entries()[0].username, "ann");
        assert_eq!(board.entries()[0].timestamp_ms, 1_700_000_000_500);
    }
}
