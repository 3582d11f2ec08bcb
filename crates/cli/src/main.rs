//! Process bootstrap for the Raven driver: resolve configuration, wire a
//! disk-backed filesystem into an `Engine`, and run the scheduler loop
//! until interrupted.

mod diskfs;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as ClapParser;
use raven_vm::config::{CliOverrides, RavenConfig};
use raven_vm::fs::VirtPath;
use raven_vm::Engine;

use diskfs::DiskFs;

#[derive(ClapParser, Debug)]
#[command(name = "raven")]
#[command(about = "Raven MUD driver: loads a mudlib and runs the scheduler", long_about = None)]
struct Cli {
    /// Root directory of the mudlib to load (falls back to RAVEN_MUDLIB, then ./raven.toml)
    mudlib: Option<PathBuf>,

    /// Path to a TOML config file (default: ./raven.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Virtual path of the startup blueprint, instantiated and sent `heartbeat`-free boot
    #[arg(long, default_value = "/secure/master")]
    master: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("raven=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        mudlib_root: cli.mudlib.clone(),
        config_path: cli.config.clone(),
    };
    let config = RavenConfig::resolve(&overrides);

    tracing::info!(mudlib = %config.mudlib_root.display(), "starting raven driver");

    let mut engine = Engine::new(config.gc_interval_ticks as u64);
    engine.set_heartbeat_interval_ticks(config.heartbeat_interval_ticks as u64);

    let fs = DiskFs::new(config.mudlib_root.clone());
    engine.set_filesystem(Box::new(fs));

    let master_path = VirtPath::parse(&cli.master);
    let bp = match engine.resolve_blueprint(&master_path.as_string(), true) {
        Some(bp) => bp,
        None => {
            tracing::error!(master = %cli.master, "failed to compile the master blueprint");
            return ExitCode::FAILURE;
        }
    };
    let obj = raven_vm::object::blueprint_instantiate(&mut engine.heap, bp);

    let interrupted = Arc::new(AtomicBool::new(false));
    install_sigint_handler(interrupted.clone());

    #[cfg(all(unix, feature = "diagnostics"))]
    {
        // A static Engine handle for the SIGQUIT dump would require moving
        // ownership into a 'static Mutex; left for the embedder that wires
        // a real accept loop on top of this bootstrap.
    }

    let _ = obj; // the master object exists for scripts to `call_out`/heartbeat against

    loop {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!("received interrupt, shutting down");
            break;
        }
        engine.drain_connection_events();
        engine.tick();
        if engine.scheduler.is_sleeping() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    ExitCode::SUCCESS
}

#[cfg(unix)]
fn install_sigint_handler(flag: Arc<AtomicBool>) {
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, flag) {
        tracing::warn!(error = %e, "failed to install SIGINT handler");
    }
}

#[cfg(not(unix))]
fn install_sigint_handler(_flag: Arc<AtomicBool>) {}
