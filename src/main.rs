mod account;
mod api;
mod cli;
mod config;
mod navbar;
mod pointer;
mod preferences;
mod realtime;
mod search;
mod session;
mod transcript;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use preferences::{FilePreferences, MemoryPreferences, Preferences};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "cashtrack",
    about = "Terminal client for the CashTrack friends and requests service"
)]
pub struct Args {
    #[arg(short, long, help = "Run a single command (e.g. \"/search alice\") and exit")]
    pub command: Option<String>,

    #[arg(long, env = "CASHTRACK_BACKEND_URL", help = "Backend API base URL")]
    pub backend_url: Option<String>,

    #[arg(long, env = "CASHTRACK_SOCKET_URL", help = "Realtime server URL")]
    pub socket_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Keep preferences in memory only")]
    pub ephemeral: bool,

    #[arg(long, help = "Do not open the realtime connection at startup")]
    pub offline: bool,

    #[arg(long, help = "Enable tracing of requests and pointer events")]
    pub trace: bool,

    #[arg(long, help = "Verbose output (socket state changes)")]
    pub verbose: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?
    } else {
        config::Config::load()?
    };
    if args.backend_url.is_some() {
        cfg.backend_url = args.backend_url.clone();
    }
    if args.socket_url.is_some() {
        cfg.socket_url = args.socket_url.clone();
    }
    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow!("Invalid configuration ({} errors)", errors.len()));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let transcript_path = cfg.log_dir().join(format!("{}.jsonl", session_id));
    let mut transcript = transcript::Transcript::new(&transcript_path, &session_id)?;

    let prefs: Arc<dyn Preferences> = if args.ephemeral {
        Arc::new(MemoryPreferences::new())
    } else {
        Arc::new(FilePreferences::new(&cfg.preferences_path()))
    };

    let session = session::SessionContext::new();
    if let Err(e) = account::restore(&session, prefs.as_ref()) {
        eprintln!("Warning: could not restore saved session: {}", e);
        let _ = transcript.diagnostic("preferences", &e.to_string());
    }
    let _ = transcript.session_start(
        cfg.backend_url(),
        cfg.socket_url(),
        session.snapshot().identity(),
    );

    let backend = api::Client::new(cfg.backend_url(), cfg.http_timeout(), session.clone());
    let settings = cfg.realtime.channel_settings();
    let connector = realtime::WsConnector::new(
        realtime::endpoint(cfg.socket_url())?,
        cfg.realtime.read_timeout(),
        settings.connect_timeout,
    );
    let channel = realtime::RealtimeChannel::new(Arc::new(connector), prefs.clone(), settings);

    let one_shot = args.command.is_some();
    let auto_connect = cfg.realtime.auto_connect() && !args.offline && !one_shot;

    let ctx = cli::Context::new(
        args,
        cfg,
        session_id,
        transcript,
        session,
        prefs,
        Rc::new(backend),
        channel,
    );
    if auto_connect {
        ctx.channel.borrow_mut().connect();
    }

    if let Some(command) = ctx.args.command.clone() {
        cli::run_once(&ctx, &command)
    } else {
        cli::run_repl(ctx)
    }
}
