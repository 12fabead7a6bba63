//! logsepd - log separator daemon.
//!
//! Follows one input log, splits each `<name>: <message>` line by name and
//! appends the message to that name's output file. SIGHUP reloads the
//! configuration, SIGTERM/SIGINT stop the daemon.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod signals;

use std::path::PathBuf;
use std::process;
use std::sync::mpsc;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use logsep_core::{ConfigSource, Engine, TomlConfigFile};

/// Log separator daemon.
#[derive(Parser, Debug)]
#[command(name = "logsepd", about = "Log separator daemon", version = logsep_core::VERSION)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "LOGSEP_CONFIG_PATH", default_value = "./config.toml")]
    config: PathBuf,

    /// Check the configuration file and exit.
    #[arg(long)]
    check: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` directives are kept,
/// our own crates get the level picked by -v/-q.
fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);

    let mut filter = EnvFilter::from_default_env();
    for target in ["logsepd", "logsep_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("logsepd {} starting", logsep_core::VERSION);
    info!("Config: {}", args.config.display());

    let source = TomlConfigFile::new(&args.config);

    if args.check {
        match source.load() {
            Ok(config) => {
                info!(
                    "Configuration OK: input={}, pos_file={}, {} routes",
                    config.input_path.display(),
                    config.position_file_path.display(),
                    config.routes.len()
                );
                return;
            }
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        }
    }

    // `tx` lives until the engine returns, so the signal channel never reads
    // as closed even when no forwarder could be started.
    let (tx, rx) = mpsc::channel();
    if let Err(e) = signals::spawn_forwarder(&tx) {
        warn!("Failed to set signal handlers, running without them: {}", e);
    }

    let result = Engine::new(source).run(rx);
    drop(tx);
    match result {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
