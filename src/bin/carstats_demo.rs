//! carstats demo
//!
//! Replays a short drive through Berlin and prints every snapshot a set of
//! listeners receives.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use carstats::{
    CarStats, CarStatsService, LifecycleState, Reading, ReplaySource, ServiceConfig,
    StaticPermission,
};

/// Demo configuration
struct Config {
    /// Interval between replayed readings
    interval_ms: u64,
    /// Number of listeners to attach
    listeners: usize,
    /// Number of snapshots each listener prints before exiting
    count: usize,
    /// Start without permission and grant it through the request flow
    deny_first: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            listeners: 2,
            count: 5,
            deny_first: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        std::process::exit(1);
    })
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--interval-ms" | "-i" => {
                config.interval_ms = parse_value(&args, i, "--interval-ms");
                i += 2;
            }
            "--listeners" | "-l" => {
                config.listeners = parse_value(&args, i, "--listeners");
                i += 2;
            }
            "--count" | "-c" => {
                config.count = parse_value(&args, i, "--count");
                i += 2;
            }
            "--deny-first" => {
                config.deny_first = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("carstats-demo - replay a location track through carstats");
                println!();
                println!("USAGE:");
                println!("    carstats-demo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -i, --interval-ms <MS>    Replay interval [default: 500]");
                println!("    -l, --listeners <N>       Number of listeners [default: 2]");
                println!("    -c, --count <N>           Snapshots per listener [default: 5]");
                println!("        --deny-first          Start without location permission");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }
    config
}

fn track() -> Vec<Reading> {
    [
        (52.5163, 13.3777),
        (52.5170, 13.3888),
        (52.5186, 13.4003),
        (52.5200, 13.4050),
        (52.5219, 13.4132),
        (52.5233, 13.4114),
    ]
    .into_iter()
    .map(|(lat, lon)| Reading::new(lat, lon, "replay", 0))
    .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "carstats demo starting");

    let source = Arc::new(ReplaySource::new(track()).repeat(true).live_clock(true));
    let permissions = Arc::new(if config.deny_first {
        StaticPermission::grant_on_request()
    } else {
        StaticPermission::granted()
    });

    let service = CarStatsService::new(
        ServiceConfig {
            update_interval_ms: config.interval_ms.max(1),
            ..ServiceConfig::default()
        },
        source,
        permissions,
    )?;

    println!("schema: {}", serde_json::to_string_pretty(&service.get_schema())?);

    let listeners: Vec<_> = (0..config.listeners)
        .map(|idx| {
            let stream = service.subscribe();
            let count = config.count;
            thread::spawn(move || {
                for _ in 0..count {
                    match stream.recv_timeout(Duration::from_secs(10)) {
                        Ok(snapshot) => match serde_json::to_string(&*snapshot) {
                            Ok(json) => println!("listener {idx}: {json}"),
                            Err(e) => eprintln!("listener {idx}: {e}"),
                        },
                        Err(e) => {
                            eprintln!("listener {idx}: {e}");
                            break;
                        }
                    }
                }
            })
        })
        .collect();

    if service.needs_permissions() {
        println!("permission required, requesting");
        service.request_permissions();
    }

    for handle in listeners {
        let _ = handle.join();
    }

    if service.state() == LifecycleState::Active {
        println!("latest: {:?}", service.get_merged_measurements());
    }
    println!("stats: {}", serde_json::to_string(&service.stats())?);

    service.shutdown();
    println!("Shut down");
    Ok(())
}
