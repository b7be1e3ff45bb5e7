use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use targeting_engine::{
    server::{self, Routes},
    DataLoader, HttpLoader, HttpLoaderConfig, JsonFileLoader, RefreshConfig, ServiceConfig,
};

/// Campaign targeting and delivery service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind_address: std::net::IpAddr,

    /// JSON file with campaigns and targeting rules
    #[arg(long, env = "DATA_FILE", default_value = "data/campaigns.json")]
    data_file: PathBuf,

    /// Base URL of a remote store serving `/campaigns` and `/targeting-rules`. Takes precedence
    /// over `--data-file`.
    #[arg(long, env = "DATA_URL")]
    data_url: Option<String>,

    /// Request timeout for the remote store, in seconds
    #[arg(long, env = "DATA_TIMEOUT_SECS", default_value = "10")]
    data_timeout_secs: u64,

    /// Maximum age of targeting data before it is refreshed, in seconds
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value = "30")]
    refresh_interval_secs: u64,

    /// Random jitter subtracted from the background refresh period, in seconds
    #[arg(long, env = "REFRESH_JITTER_SECS", default_value = "0")]
    refresh_jitter_secs: u64,

    /// Expose unauthenticated cache administration routes
    #[arg(long, env = "ENABLE_ADMIN")]
    enable_admin: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!(target: "targeting", "{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let loader: Arc<dyn DataLoader> = match &args.data_url {
        Some(url) => {
            log::info!(target: "targeting", url = url.as_str(); "loading targeting data over HTTP");
            Arc::new(HttpLoader::new(
                HttpLoaderConfig::new(url.as_str())
                    .with_timeout(Duration::from_secs(args.data_timeout_secs)),
            )
            .context("failed to create HTTP loader")?)
        }
        None => {
            log::info!(target: "targeting", path:display = args.data_file.display(); "loading targeting data from file");
            Arc::new(JsonFileLoader::new(&args.data_file))
        }
    };

    // Initial load happens here, before the server accepts any traffic. The blocking HTTP loader
    // must not run on the async runtime, so the service is started outside of it.
    let service = ServiceConfig::from_shared_loader(loader)
        .refresh(
            RefreshConfig::new()
                .with_interval(Duration::from_secs(args.refresh_interval_secs))
                .with_jitter(Duration::from_secs(args.refresh_jitter_secs)),
        )
        .start()
        .context("failed to start delivery service")?;

    let routes = Routes::new(service.evaluator().clone(), service.cache().clone())
        .with_admin(args.enable_admin);
    let addr = SocketAddr::new(args.bind_address, args.port);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let served = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        log::info!(target: "targeting", addr:display = addr; "delivery server listening");

        server::serve(listener, routes, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::warn!(target: "targeting", "failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await;
        anyhow::Ok(())
    });

    // Drop the runtime before the blocking HTTP client inside the loader goes away.
    drop(runtime);
    service.shutdown().context("failed to stop refresh thread")?;
    served
}
