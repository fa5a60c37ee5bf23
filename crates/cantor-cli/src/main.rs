use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cantor_engine::backend::{
    JsonScoreRenderer, MemoryBackend, OscBackend, ScoreRenderer, ScriptScoreRenderer,
    SynthBackend, WavSampleLoader,
};
use cantor_engine::message::decode;
use cantor_engine::{Collaborators, Dispatcher, ServerConfig, ServerHandle, SystemClock};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod settings;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = settings::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&loaded.config.log_filter)),
        )
        .try_init()
        .ok();
    settings::report(&loaded);
    let config = loaded.config;

    match cli.command {
        Commands::Serve(args) => serve(args, config),
        Commands::Compile(args) => compile(args, config),
        Commands::Config(args) => show_config(args, config),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Tagged-bundle OSC dispatcher for a synthesis server")]
struct Cli {
    /// Settings file (JSON). Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for control messages until interrupted.
    Serve(ServeArgs),
    /// Compile a recorded `nrt_record` packet into a score file.
    Compile(CompileArgs),
    /// Print the effective settings, optionally saving them.
    Config(ConfigArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to receive control messages on.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Synthesis server address.
    #[arg(long)]
    synth: Option<SocketAddr>,
    /// Language host address for definition sources.
    #[arg(long)]
    language: Option<SocketAddr>,
    /// Directory receiving compiled scores.
    #[arg(long)]
    score_dir: Option<PathBuf>,
    /// Log backend calls and write JSON scores instead of talking to the hosts.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct CompileArgs {
    /// File holding one encoded packet.
    #[arg(long)]
    input: PathBuf,
    /// Directory receiving the score. Overrides the settings file.
    #[arg(long)]
    score_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Write the effective settings to this file.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn serve(args: ServeArgs, mut config: ServerConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(synth) = args.synth {
        config.synth = synth;
    }
    if let Some(language) = args.language {
        config.language = language;
    }
    if let Some(dir) = args.score_dir {
        config.score_dir = dir;
    }

    let (synth, renderer): (Arc<dyn SynthBackend>, Arc<dyn ScoreRenderer>) = if args.dry_run {
        (
            Arc::new(MemoryBackend::new()),
            Arc::new(JsonScoreRenderer::new(&config.score_dir)),
        )
    } else {
        (
            Arc::new(
                OscBackend::connect(config.synth, config.language)
                    .context("failed to open synthesis backend socket")?,
            ),
            Arc::new(
                ScriptScoreRenderer::connect(&config.score_dir, config.language)
                    .context("failed to open render confirmation socket")?
                    .with_timeout(config.render_timeout()),
            ),
        )
    };
    let dispatcher = Dispatcher::new(
        config.engine.clone(),
        Arc::new(SystemClock::new()),
        Collaborators {
            synth,
            loader: Arc::new(WavSampleLoader::new()),
            renderer,
        },
    );

    let mut server = ServerHandle::start(&config, Arc::new(dispatcher))?;
    println!(
        "Listening on {} (synth {}) - press Ctrl+C to stop.",
        server.local_addr(),
        config.synth
    );

    let running = server.running_flag();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })?;
    while server.is_running() {
        std::thread::sleep(Duration::from_millis(50));
    }
    server.stop();
    tracing::info!("server stopped");
    Ok(())
}

fn compile(args: CompileArgs, config: ServerConfig) -> Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let packet = decode(&bytes)
        .with_context(|| format!("{} does not hold an encoded packet", args.input.display()))?;
    let score_dir = args.score_dir.unwrap_or(config.score_dir);

    let dispatcher = Dispatcher::new(
        config.engine,
        Arc::new(SystemClock::new()),
        Collaborators {
            synth: Arc::new(MemoryBackend::new()),
            loader: Arc::new(WavSampleLoader::new()),
            renderer: Arc::new(JsonScoreRenderer::new(&score_dir)),
        },
    );
    let report = dispatcher.handle_packet(packet);
    for failure in &report.failures {
        eprintln!("{}: {}", failure.address, failure.error);
    }
    if report.replies.is_empty() {
        bail!("{} did not contain a recording session", args.input.display());
    }
    for reply in &report.replies {
        println!("{reply}");
    }
    Ok(())
}

fn show_config(args: ConfigArgs, config: ServerConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    if let Some(path) = args.save {
        settings::save(&path, &config)?;
        println!("Settings written to {}", path.display());
    }
    Ok(())
}
