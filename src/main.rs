//! `dnsbridge` CLI entry point: parses flags, merges them over an optional
//! TOML config file, and spawns the DNS listeners, the controller reactor,
//! and the registry timeout sweep.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use dnsbridge::config::{BridgeConfig, CliOverrides};
use dnsbridge::controller::ControllerReactor;
use dnsbridge::registry::Registry;
use dnsbridge::server::DnsServer;
use dnsbridge::timeout::TimeoutService;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("BUILD_DATE");
const GIT_HASH: &str = env!("GIT_HASH");

#[derive(Parser)]
#[command(name = "dnsbridge")]
#[command(author = "Sina Rabbani")]
#[command(version = VERSION)]
#[command(about = "DNS tunneling bridge between a TCP controller and DNS-only implants", long_about = None)]
struct Cli {
    /// `[addr:]port` for the DNS listener (UDP + TCP)
    #[arg(long, default_value = "0.0.0.0:53")]
    dnsaddr: String,

    /// `[addr:]port` for the controller TCP listener
    #[arg(long, default_value = "0.0.0.0:4444")]
    laddr: String,

    /// Authoritative domain to answer for; repeatable
    #[arg(short = 'D', long = "domain")]
    domain: Vec<String>,

    /// Static A-record address for the configured domains
    #[arg(long)]
    ipaddr: Option<Ipv4Addr>,

    /// Optional TOML config file; CLI flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_millis()
        .format_module_path(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("dnsbridge {} ({} {})", VERSION, GIT_HASH, BUILD_DATE);

    let overrides = CliOverrides {
        dns_addr: Some(cli.dnsaddr),
        listen_addr: Some(cli.laddr),
        domains: cli.domain,
        ip_addr: cli.ipaddr,
    };
    // exit code 2 is reserved for "required collaborator missing"; here
    // that's an unusable bind address/domain list after merge, since there
    // is no external DNS library dependency to be absent in this port.
    let config = BridgeConfig::load(cli.config.as_ref(), overrides)
        .context("loading configuration")
        .unwrap_or_else(|e| {
            eprintln!("{:#}", e);
            std::process::exit(2);
        });

    let registry = Arc::new(Registry::new());

    let dns_server = Arc::new(DnsServer::new(&config.domains, config.ip_addr, registry.clone()));
    let udp_server = dns_server.clone();
    let udp_addr = config.dns_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = udp_server.run_udp(&udp_addr).await {
            log::error!("DNS UDP listener failed: {}", e);
        }
    });

    let tcp_server = dns_server.clone();
    let tcp_addr = config.dns_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = tcp_server.run_tcp(&tcp_addr).await {
            log::error!("DNS TCP listener failed: {}", e);
        }
    });

    let reactor_registry = registry.clone();
    let listen_addr = config.listen_addr.clone();
    tokio::spawn(async move {
        match ControllerReactor::bind(&listen_addr, reactor_registry).await {
            Ok(reactor) => reactor.run().await,
            Err(e) => log::error!("controller reactor failed to bind {}: {}", listen_addr, e),
        }
    });

    let sweep_registry = registry.clone();
    let session_timeout_secs = config.session_timeout_secs;
    let stager_timeout_secs = config.stager_timeout_secs;
    let sweep = TimeoutService::new(Duration::from_secs(config.registry_tick_secs));
    sweep
        .run(move |now| {
            let registry = sweep_registry.clone();
            async move {
                registry.run_timeout_tick(now, session_timeout_secs, stager_timeout_secs).await;
            }
        })
        .await;

    Ok(())
}
