use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use jigsaw_cli::authority::{Authority, AuthorityConfig};
use jigsaw_cli::client::{self, ClientConfig, ClientHandle};
use jigsaw_core::{
    CoreAction, HostRequest, ImageChoice, ImageRef, Intent, NibMode, PuzzleId, SessionEvent,
    SyncConfig, Viewport,
};
use log::{info, warn};
use rand::Rng;
use tokio::net::TcpListener;
use url::Url;

const DEFAULT_SERVER: &str = "ws://127.0.0.1:54472";

#[derive(Parser)]
#[command(name = "jigsaw", version, about = "Shared jigsaw puzzle authority and headless client")]
struct Cli {
    /// JSON file with session tunables.
    #[arg(long, global = true, env = "JIGSAW_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum NibModeArg {
    RunningSeed,
    EdgeSeeds,
}

impl From<NibModeArg> for NibMode {
    fn from(arg: NibModeArg) -> Self {
        match arg {
            NibModeArg::RunningSeed => NibMode::RunningSeed,
            NibModeArg::EdgeSeeds => NibMode::EdgeSeeds,
        }
    }
}

#[derive(clap::Args)]
struct PlayArgs {
    #[arg(long, env = "JIGSAW_SERVER_URL", default_value = DEFAULT_SERVER)]
    server: String,
    /// Pixel size assumed for the puzzle image, `WxH`.
    #[arg(long, default_value = "1024x768", value_parser = parse_size)]
    image_size: (u32, u32),
    #[arg(long, default_value = "1280x800", value_parser = parse_size)]
    viewport: (u32, u32),
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
    /// Must match the authority's mode.
    #[arg(long, value_enum)]
    nib_mode: Option<NibModeArg>,
    /// Drag a random piece this often; 0 keeps the client idle.
    #[arg(long, default_value_t = 0)]
    wander_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the in-memory authority.
    Serve {
        #[arg(long, env = "JIGSAW_BIND", default_value = "127.0.0.1:54472")]
        bind: SocketAddr,
        /// Lines of `url [link]` for random featured images.
        #[arg(long)]
        featured: Option<PathBuf>,
        /// Picture of the day, as `url[;link]`.
        #[arg(long)]
        potd: Option<String>,
        #[arg(long)]
        state_file: Option<PathBuf>,
        #[arg(long, value_enum)]
        nib_mode: Option<NibModeArg>,
    },
    /// Create a puzzle and play it.
    Host {
        #[command(flatten)]
        play: PlayArgs,
        /// `url[;link]`, or `random-featured` / `potd` to ask the server.
        #[arg(long)]
        image: String,
        #[arg(long, default_value_t = 100)]
        pieces: u32,
        /// Decimal or `0x` hex.
        #[arg(long)]
        seed: Option<String>,
    },
    /// Join an existing puzzle.
    Join {
        #[command(flatten)]
        play: PlayArgs,
        puzzle_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let sync = load_sync_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            bind,
            featured,
            potd,
            state_file,
            nib_mode,
        } => {
            let featured = match featured {
                Some(path) => AuthorityConfig::parse_featured(&std::fs::read_to_string(path)?),
                None => Vec::new(),
            };
            let picture_of_the_day = potd.as_deref().map(ImageRef::parse).transpose()?;
            let config = AuthorityConfig {
                nib_mode: nib_mode.map_or(sync.nib_mode, NibMode::from),
                featured,
                picture_of_the_day,
                state_file,
            };
            let authority = Arc::new(Authority::restore(config)?);
            let sweeper = authority.spawn_sweeper();
            let listener = TcpListener::bind(bind).await?;
            tokio::select! {
                result = Arc::clone(&authority).serve(listener) => result?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
            sweeper.abort();
            authority.persist().await?;
        }
        Commands::Host {
            play,
            image,
            pieces,
            seed,
        } => {
            let image = match image.as_str() {
                "random-featured" => ImageChoice::RandomFeatured,
                "potd" => ImageChoice::PictureOfTheDay,
                raw => ImageChoice::Url(ImageRef::parse(raw)?),
            };
            let seed = match seed.as_deref() {
                Some(raw) => parse_seed_arg(raw)?,
                None => rand::rng().random(),
            };
            println!("seed: {seed:#x}");
            let intent = Intent::Host(HostRequest {
                image,
                piece_count: pieces,
                seed,
            });
            play_session(&play, intent, sync).await?;
        }
        Commands::Join { play, puzzle_id } => {
            let intent = Intent::Join(PuzzleId::parse(&puzzle_id)?);
            play_session(&play, intent, sync).await?;
        }
    }

    Ok(())
}

fn load_sync_config(path: Option<&Path>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(SyncConfig::default()),
    }
}

async fn play_session(
    play: &PlayArgs,
    intent: Intent,
    mut sync: SyncConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(mode) = play.nib_mode {
        sync.nib_mode = mode.into();
    }
    let viewport = Viewport::new(play.viewport.0 as f32, play.viewport.1 as f32);
    let mut handle = client::connect(ClientConfig {
        server: Url::parse(&play.server)?,
        intent,
        image_size: play.image_size,
        viewport,
        sync,
    })
    .await?;

    let deadline = tokio::time::sleep(Duration::from_secs(play.duration_secs));
    tokio::pin!(deadline);
    let mut wander = tokio::time::interval(Duration::from_millis(play.wander_ms.max(1)));
    let wandering = play.wander_ms > 0;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("time is up");
                break;
            }
            event = handle.next_event() => match event {
                Some(SessionEvent::PuzzleAssigned(id)) => println!("puzzle_id: {id}"),
                Some(SessionEvent::Solved) => {
                    println!("solved");
                    break;
                }
                Some(SessionEvent::Disconnected) | None => {
                    warn!("disconnected");
                    break;
                }
                Some(event) => info!("{event:?}"),
            },
            _ = wander.tick(), if wandering => wander_once(&handle, viewport).await?,
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Drags one random piece a short random distance.
async fn wander_once(
    handle: &ClientHandle,
    viewport: Viewport,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = handle.summary().await?;
    let Some(state) = summary.state else {
        return Ok(());
    };
    if state.positions.is_empty() {
        return Ok(());
    }
    let (piece, start, delta) = {
        let mut rng = rand::rng();
        let piece = rng.random_range(0..state.positions.len());
        let delta: (f32, f32) = (rng.random_range(-120.0..120.0), rng.random_range(-120.0..120.0));
        (piece, viewport.to_screen(state.positions[piece]), delta)
    };
    handle
        .send(CoreAction::BeginDrag {
            piece_id: piece,
            x: start.0,
            y: start.1,
        })
        .await?;
    handle
        .send(CoreAction::DragMove {
            x: start.0 + delta.0,
            y: start.1 + delta.1,
        })
        .await?;
    handle.send(CoreAction::DragEnd).await?;
    Ok(())
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{raw}'"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|&value| value > 0)
            .ok_or_else(|| format!("bad size '{raw}'"))
    };
    Ok((parse(w)?, parse(h)?))
}

fn parse_seed_arg(raw: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let trimmed = raw.trim();
    let value = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)?
    } else {
        trimmed.parse::<u32>()?
    };
    Ok(value)
}
