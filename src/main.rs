use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;

use stem_peer::client::{PeerClient, PushRequest, Timeouts};
use stem_peer::config::Config;
use stem_peer::document::MixState;
use stem_peer::logger;
use stem_peer::snapshot::SnapshotFormat;
use stem_peer::{create_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "stem-peer")]
#[command(about = "Share DAW stems and mix state between peers")]
#[command(version)]
struct Cli {
    /// Directory holding sessions/ and stems/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept state and stems from other peers
    Server {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send a track's mix state, then its stem, to a peer
    #[command(alias = "send_stem_and_state", allow_negative_numbers = true)]
    Push {
        local_wav: PathBuf,
        song_folder: String,
        common_track: String,
        user_id: String,
        track_name: String,
        vol: f64,
        pan: f64,
        mute: f64,
        solo: f64,
        peer_url: String,
        /// Seconds allowed for the state request
        #[arg(long)]
        state_timeout: Option<u64>,
        /// Seconds allowed for the stem upload
        #[arg(long)]
        stem_timeout: Option<u64>,
    },

    /// Fetch a peer's merged session and write it for the DAW
    #[command(alias = "pull_session")]
    Pull {
        song_folder: String,
        peer_url: String,
        out_path: PathBuf,
        #[arg(long, value_enum, default_value_t = SnapshotFormat::Lua)]
        format: SnapshotFormat,
        /// Seconds allowed for the request
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Command::Server { host, port } => {
            logger::init(config.log_level).context("Failed to initialise logging")?;
            if let Some(host) = host {
                config.api_host = host;
            }
            if let Some(port) = port {
                config.api_port = port;
            }
            serve(config).await
        }
        Command::Push {
            local_wav,
            song_folder,
            common_track,
            user_id,
            track_name,
            vol,
            pan,
            mute,
            solo,
            peer_url,
            state_timeout,
            stem_timeout,
        } => {
            let progress = logger::init_with_progress(config.log_level)
                .context("Failed to initialise logging")?;
            let timeouts = Timeouts {
                state: state_timeout.map(Duration::from_secs).unwrap_or(config.state_timeout),
                stem: stem_timeout.map(Duration::from_secs).unwrap_or(config.stem_timeout),
            };
            let request = PushRequest {
                stem_path: local_wav,
                song_folder,
                common_track,
                user_id,
                track_name,
                mix: MixState {
                    volume: vol,
                    pan,
                    mute,
                    solo,
                },
            };

            let client = PeerClient::new(&peer_url, timeouts)?;
            let spinner = spinner(&progress, format!("Pushing to {}", client.base_url()));
            let result = client.push(&request).await;
            spinner.finish_and_clear();

            let ack = result.with_context(|| format!("Push to {} failed", peer_url))?;
            info!("Peer stored {} ({:.3}s)", ack.saved_as, ack.duration_seconds);
            Ok(())
        }
        Command::Pull {
            song_folder,
            peer_url,
            out_path,
            format,
            timeout,
        } => {
            let progress = logger::init_with_progress(config.log_level)
                .context("Failed to initialise logging")?;
            let timeouts = Timeouts {
                state: timeout.map(Duration::from_secs).unwrap_or(config.state_timeout),
                stem: config.stem_timeout,
            };

            let client = PeerClient::new(&peer_url, timeouts)?;
            let message = format!("Pulling {} from {}", song_folder, client.base_url());
            let spinner = spinner(&progress, message);
            let result = client.pull(&song_folder, &out_path, format).await;
            spinner.finish_and_clear();

            result.with_context(|| format!("Pull of {} from {} failed", song_folder, peer_url))?;
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let state = AppState::open(&config)
        .await
        .with_context(|| format!("Failed to open data directory {}", config.data_dir.display()))?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(
        "stem-peer v{} listening on http://{} (data in {})",
        env!("CARGO_PKG_VERSION"),
        config.bind_address(),
        config.data_dir.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

fn spinner(progress: &MultiProgress, message: String) -> ProgressBar {
    let spinner = progress.add(ProgressBar::new_spinner());
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
