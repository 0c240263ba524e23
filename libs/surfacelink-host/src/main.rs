// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Headless surfacelink host.
//!
//! Launches a UI process, presents its surfaces into an unattached view,
//! optionally walks through a list of resizes and logs everything the child
//! sends back.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use surfacelink::{
    LinkError, Provider, ProviderConfig, ProviderListener, ProviderState, SurfaceId, TreeNode,
};

#[derive(Parser)]
#[command(name = "surfacelink-host")]
#[command(about = "Run a surfacelink UI process without a window")]
struct Cli {
    /// UI executable (overrides `child.executable` from the config file)
    #[arg(long)]
    ui: Option<PathBuf>,

    /// Config file, or a directory containing surfacelink.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial width in points
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Initial height in points
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Backing scale factor
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Resize to WxH, applied in order one second apart (repeatable)
    #[arg(long = "resize", value_parser = parse_size)]
    resizes: Vec<(i32, i32)>,

    /// Set parameter ID=VALUE after start (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(i32, f64)>,

    /// Seconds to run before stopping; runs until the child exits if omitted
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Extra arguments passed to the UI process after `--`
    #[arg(last = true)]
    ui_args: Vec<String>,
}

fn parse_size(s: &str) -> std::result::Result<(i32, i32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let w = w.trim().parse().map_err(|e| format!("bad width '{}': {}", w, e))?;
    let h = h.trim().parse().map_err(|e| format!("bad height '{}': {}", h, e))?;
    Ok((w, h))
}

fn parse_param(s: &str) -> std::result::Result<(i32, f64), String> {
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got '{}'", s))?;
    let id = id.trim().parse().map_err(|e| format!("bad id '{}': {}", id, e))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value '{}': {}", value, e))?;
    Ok((id, value))
}

/// Logs provider callbacks.
struct LoggingListener;

impl ProviderListener for LoggingListener {
    fn on_tree_message(&mut self, tree: &TreeNode) {
        info!(
            "[Host] Tree '{}' ({} properties, {} children)",
            tree.node_type(),
            tree.num_properties(),
            tree.children().len()
        );
    }

    fn on_first_frame_ready(&mut self) {
        info!("[Host] First frame ready");
    }

    fn on_surface_presented(&mut self, surface: SurfaceId, width: u32, height: u32) {
        info!("[Host] Presenting {} at {}x{}", surface, width, height);
    }

    fn on_app_event(&mut self, payload: &[u8]) {
        info!(
            "[Host] App event ({} bytes): {}",
            payload.len(),
            String::from_utf8_lossy(payload)
        );
    }

    fn on_disconnected(&mut self, reason: &LinkError) {
        tracing::warn!("[Host] UI process disconnected: {}", reason);
    }
}

fn load_config(cli: &Cli) -> Result<ProviderConfig> {
    let mut config = match &cli.config {
        Some(path) => ProviderConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ProviderConfig::load_or_default(&std::env::current_dir()?),
    };
    if let Some(ui) = &cli.ui {
        config = config.with_executable(ui);
    }
    if !cli.ui_args.is_empty() {
        let mut args = config.child.args.clone();
        args.extend(cli.ui_args.iter().cloned());
        config = config.with_args(args);
    }
    config.validate().context("invalid configuration")?;
    if config.child.executable.is_none() {
        bail!("no UI executable: pass --ui or set child.executable in surfacelink.toml");
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let mut provider = Provider::new(config, Box::new(LoggingListener));

    provider
        .start(cli.width, cli.height, cli.scale, None)
        .context("starting UI process")?;
    info!(
        "[Host] UI process running (pid {}, rendezvous {})",
        provider.child_pid().unwrap_or_default(),
        provider.rendezvous_name().unwrap_or("-")
    );

    for (id, value) in &cli.params {
        provider.set_parameter(*id, *value)?;
    }

    let started = Instant::now();
    let deadline = cli.duration_secs.map(|s| started + Duration::from_secs(s));
    let mut resizes = cli.resizes.iter();
    let mut next_resize = started + Duration::from_secs(1);

    while provider.state() == ProviderState::Running {
        provider.dispatch_timeout(Duration::from_millis(16));

        let now = Instant::now();
        if now >= next_resize {
            if let Some(&(width, height)) = resizes.next() {
                info!("[Host] Resizing to {}x{}", width, height);
                provider.resize(width, height)?;
            }
            next_resize = now + Duration::from_secs(1);
        }
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
    }

    let parameters = provider.parameters().snapshot();
    if !parameters.is_empty() {
        info!("[Host] Final parameters: {:?}", parameters);
    }
    info!(
        "[Host] Stopping after {:.1}s ({} surface commits)",
        started.elapsed().as_secs_f64(),
        provider.surfaces().commit_count()
    );
    provider.stop();
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("[Host] {:#}", e);
        std::process::exit(1);
    }
}
