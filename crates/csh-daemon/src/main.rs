// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use csh_config::{ConfigSource, ConfigurationManager};
use csh_daemon::{build_app, stdio, AppState};
use csh_dispatch::server::ChannelHub;
use csh_dispatch::{Dispatcher, TransportKind};
use csh_plugin::PluginCatalog;
use csh_runtime::Core;
use csh_trace::ObjectTracer;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cheshire-daemon", version, about = "Cheshire capability server")]
struct Args {
    /// Configuration root directory (contains cheshire.yaml).
    #[arg(long, default_value = ".")]
    config_root: PathBuf,

    /// HTTP bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Also serve line-delimited JSON requests on stdio.
    #[arg(long)]
    stdio: bool,

    /// Enable debug logging and a startup config dump.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("csh=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("csh=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let source = ConfigSource::dir(&args.config_root);
    let config = ConfigurationManager::from_source(&source)
        .with_context(|| format!("load configuration from {}", args.config_root.display()))?;
    if args.debug {
        let tracer = ObjectTracer::default();
        print!("{}", tracer.trace("configuration", &config.spec_ref()));
    }

    let hub = Arc::new(ChannelHub::new());
    let catalog = PluginCatalog::with_builtins(Arc::clone(&hub));
    let core = Arc::new(Core::bootstrap(config, catalog).context("bootstrap core")?);
    core.start().await.context("start core")?;

    let state = Arc::new(AppState {
        http: Arc::new(Dispatcher::new(
            core.session(),
            TransportKind::HttpJson,
            core.metrics(),
        )),
        rpc: Arc::new(Dispatcher::new(
            core.session(),
            TransportKind::JsonRpc,
            core.metrics(),
        )),
        health: core.health(),
        metrics: core.metrics(),
    });
    let app = build_app(state);

    if args.stdio {
        let dispatcher = Arc::new(Dispatcher::new(
            core.session(),
            TransportKind::Stdio,
            core.metrics(),
        ));
        tokio::spawn(async move {
            let _ = stdio::run_loop(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await;
        });
    }

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(
        target: "csh.daemon",
        bind = %args.bind,
        config = %args.config_root.display(),
        "cheshire-daemon listening"
    );

    let serve = axum::serve(listener, app).into_future();
    tokio::select! {
        result = serve => {
            result.context("serve")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "csh.daemon", "interrupt received; shutting down");
        }
    }

    core.stop().await;
    Ok(())
}
