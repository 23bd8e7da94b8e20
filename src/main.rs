//! Inkbridge - local file companion for a browser-hosted editor
//!
//! Mirrors one local file per editor window: external changes are pushed to
//! the page, saves from the page are written back to disk.

mod app;
mod channel;
mod core;
mod host;

use std::path::PathBuf;

use crate::app::{Bridge, PendingAction};
use crate::core::config::AppConfig;
use crate::core::observer::ConfiguredObservers;
use crate::host::StdioHost;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Stdout carries the host protocol, logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    tracing::info!("Starting Inkbridge v{}...", app::VERSION);

    let config = AppConfig::load();
    let observers = ConfiguredObservers::new(config.watch.clone());
    let (host, host_events) = StdioHost::start();

    let mut bridge = Bridge::new(config, host, Box::new(observers))
        .with_config_path(AppConfig::config_path());

    // A file passed on the command line opens once the first window is ready
    let launch_file = std::env::args_os().nth(1).map(PathBuf::from);
    bridge.open_window(launch_file.map(PendingAction::OpenFile));

    bridge.run(host_events).await
}
