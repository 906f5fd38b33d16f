use clap::Parser;
use client::game::{Bot, CodeResult, GameSettings};
use client::network::{Greeting, RankedClient};
use log::{info, warn};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:45735")]
    server: SocketAddr,

    /// Username to register if this address is unknown
    #[arg(short = 'u', long, default_value = "codebreaker")]
    username: String,

    /// Codes to crack before ending the streak
    #[arg(short = 'g', long, default_value = "5")]
    games: usize,

    /// Pegs per code
    #[arg(short = 'l', long, default_value_t = shared::DEFAULT_CODE_LENGTH)]
    code_length: usize,

    /// Colors per peg
    #[arg(short = 'c', long, default_value_t = shared::DEFAULT_COLOR_COUNT)]
    colors: u16,

    /// Attempts per code
    #[arg(short = 'a', long, default_value_t = shared::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Leave the last game pending instead of ending the streak
    #[arg(long)]
    keep_pending: bool,

    /// Scoreboard entries to show at the end
    #[arg(long, default_value = "10")]
    top: usize,

    /// Network timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let settings = GameSettings {
        code_length: args.code_length,
        color_count: args.colors,
        max_attempts: args.max_attempts,
    };
    let mut client = RankedClient::connect(args.server, Duration::from_millis(args.timeout_ms))?;
    let mut bot = Bot::new(settings, rand::thread_rng())?;

    match client.handshake()? {
        Greeting::NeedsUsername => {
            if !client.register(&args.username)? {
                return Err(format!("username {:?} was refused", args.username).into());
            }
            info!("Registered as {}", args.username);
        }
        Greeting::Idle { username } => info!("Welcome back, {}", username),
        Greeting::Resumed {
            username,
            token,
            history,
        } => {
            info!("Welcome back, {}; resuming a game at score {}", username, token.score);
            let same_settings = token.code.len() == settings.code_length
                && token.color_count == u32::from(settings.color_count);
            if same_settings {
                bot.learn(&history);
            } else {
                warn!("Pending game uses other settings, ending it first");
                bot.forfeit(&mut client)?;
            }
        }
    }

    let mut cracked = 0;
    while cracked < args.games {
        if !client.in_game() {
            client.start_game(&settings.to_token())?;
        }
        match bot.play_code(&mut client)? {
            CodeResult::Cracked { attempts } => {
                cracked += 1;
                info!("Code {}/{} cracked in {} attempts", cracked, args.games, attempts);
            }
            CodeResult::Lost { token } => {
                info!("Streak over after {} codes, score {}", token.games, token.score);
            }
        }
    }

    if args.keep_pending {
        info!("Leaving the game pending; reconnect to resume it");
        return Ok(());
    }

    if client.in_game() {
        let token = bot.forfeit(&mut client)?;
        info!("Streak ended: {} codes, score {}", token.games, token.score);
    }

    for (rank, record) in client.scoreboard(args.top, 0)?.iter().enumerate() {
        info!(
            "#{:<3} {:<32} {:>6} pts {:>4} games {:>6} attempts",
            rank + 1,
            record.username,
            record.normalized_score,
            record.games,
            record.total_attempts
        );
    }

    Ok(())
}
