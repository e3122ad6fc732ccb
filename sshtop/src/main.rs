//! Entry point for the sshtop TUI. Parses args, starts the engine and runs the App.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use sshtop::app::App;
use sshtop::config::{self, Config};
use sshtop::demo::{demo_config, demo_transport};
use sshtop::headless;
use sshtop::secrets::provider_for;
use sshtop::ssh::OpenSshTransport;
use sshtop_engine::transport::Transport;
use sshtop_engine::SupervisorHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "[--config PATH|-c PATH] [--demo] [--json [--ticks N]] [--log-file PATH]";

#[derive(Debug, Default)]
struct ParsedArgs {
    config: Option<PathBuf>,
    demo: bool,
    json: bool,
    ticks: Option<u64>,
    log_file: Option<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "sshtop".into());
    let mut parsed = ParsedArgs::default();

    let value = |flag: &str, v: Option<String>| {
        v.filter(|v| !v.is_empty())
            .ok_or_else(|| format!("{flag} needs a value. Usage: {prog} {USAGE}"))
    };

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(format!("Usage: {prog} {USAGE}"));
            }
            "--config" | "-c" => parsed.config = Some(value("--config", it.next())?.into()),
            "--log-file" => parsed.log_file = Some(value("--log-file", it.next())?.into()),
            "--ticks" => parsed.ticks = Some(parse_ticks(&value("--ticks", it.next())?)?),
            "--demo" => parsed.demo = true,
            "--json" => parsed.json = true,
            _ if arg.starts_with("--config=") => {
                parsed.config = Some(value("--config", inline_value(&arg))?.into());
            }
            _ if arg.starts_with("--log-file=") => {
                parsed.log_file = Some(value("--log-file", inline_value(&arg))?.into());
            }
            _ if arg.starts_with("--ticks=") => {
                parsed.ticks = Some(parse_ticks(&value("--ticks", inline_value(&arg))?)?);
            }
            _ => {
                return Err(format!(
                    "Unexpected argument '{arg}'. Usage: {prog} {USAGE}"
                ));
            }
        }
    }
    Ok(parsed)
}

fn inline_value(arg: &str) -> Option<String> {
    arg.split_once('=').map(|(_, v)| v.to_string())
}

fn parse_ticks(v: &str) -> Result<u64, String> {
    v.parse::<u64>()
        .map_err(|_| format!("--ticks expects a whole number, got '{v}'"))
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let log_file = parsed
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("sshtop.log"));
    init_logging(&log_file)?;

    // Demo mode never reads or writes a config file
    let (cfg, cfg_path) = if parsed.demo {
        (demo_config(), None)
    } else {
        let path = parsed.config.clone().unwrap_or_else(config::default_path);
        (Config::load_or_default(&path)?, Some(path))
    };
    let settings = cfg.settings()?;

    let mut targets = Vec::with_capacity(cfg.servers.len());
    for entry in &cfg.servers {
        let secret = provider_for(entry)
            .with_context(|| format!("no password for server '{}'", entry.name))?;
        targets.push(entry.to_target(&settings, secret)?);
    }

    let transport: Arc<dyn Transport> = if parsed.demo {
        Arc::new(demo_transport())
    } else {
        Arc::new(OpenSshTransport::new(env::temp_dir()))
    };
    info!(servers = targets.len(), demo = parsed.demo, "starting");
    let engine = SupervisorHandle::start(settings, transport, targets)?;

    let res = tokio::select! {
        res = run_frontend(&parsed, &engine, cfg, cfg_path) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    engine.shutdown().await;
    info!("stopped");
    res
}

async fn run_frontend(
    parsed: &ParsedArgs,
    engine: &SupervisorHandle,
    cfg: Config,
    cfg_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    if parsed.json {
        let every = engine.settings().ui_refresh_interval;
        return headless::run(engine, every, parsed.ticks, io::stdout().lock()).await;
    }
    let mut app = App::new(cfg, cfg_path, parsed.demo)?;
    app.run(engine).await
}
