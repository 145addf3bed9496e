//! `locoslam` – semantic mapping service for a LoCoBot.
//!
//! Startup:
//!
//! 1. Loads `~/.locoslam/config.toml` (or `$LOCOSLAM_CONFIG`) and applies
//!    environment overrides.
//! 2. With `--serve-registry`, starts a name registry on
//!    `LOCAL_IP:registry_port` and uses it instead of the one on `LOCOBOT_IP`.
//! 3. Resolves the robot through the registry, or uses the in-process
//!    simulated robot with `--sim`.  With both flags the simulated robot is
//!    served over the wire, registered under the robot name and resolved like
//!    a real one.
//! 4. Builds the map.  A robot that cannot produce a first map is fatal.
//! 5. Serves remote calls on `LOCAL_IP` and registers as `"slam"` (skipped
//!    for `--sim` without a registry).
//! 6. Interleaves calls with map refreshes until **Ctrl-C**.
//!
//! ```text
//! locoslam [ROBOT_NAME] [--sim] [--serve-registry]
//! ```

mod config;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use locoslam_mapping::COCO_CATEGORIES;
use locoslam_middleware::{
    NameServer, RemoteRobot, RobotHandler, RobotSource, RpcServer, SimRobot, call_queue, discovery,
};
use locoslam_runtime::{
    DefaultRefresh, LogFormat, ServiceLoop, SlamService, SlamSettings, init_tracing,
};
use locoslam_types::SlamError;

/// Name the service registers under.
const SERVICE_NAME: &str = "slam";

/// Pending remote calls buffered ahead of the service loop.
const CALL_QUEUE_CAPACITY: usize = 64;

fn main() -> ExitCode {
    // Held until exit so pending spans are flushed.
    let _telemetry = init_tracing("locoslam", LogFormat::from_env());

    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config::config_path().display(), error = %e, "config error");
            return ExitCode::FAILURE;
        }
    };
    let args = Args::parse(std::env::args().skip(1));
    if let Some(name) = args.robot_name.clone() {
        cfg.robot_name = name;
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current iteration …".yellow().bold());
        shutdown_clone.store(true, Ordering::Release);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process externally");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, args, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "locoslam stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::ServiceConfig, args: Args, shutdown: Arc<AtomicBool>) -> Result<(), SlamError> {
    // Background servers aborted on exit.
    let mut helpers = Vec::new();

    let registry = if args.serve_registry {
        let (url, handle) = start_registry(&cfg).await?;
        helpers.push(handle);
        url
    } else {
        cfg.registry_url()
    };

    let robot = connect_robot(&cfg, &args, &registry, &mut helpers).await?;

    let settings = SlamSettings {
        map: cfg.map_config(),
        num_categories: COCO_CATEGORIES.len(),
        snapshot_path: cfg.snapshot_path(),
        channel_order: cfg.snapshot_order,
    };
    let service = SlamService::new(robot, settings).await?;

    let (queue, calls) = call_queue(CALL_QUEUE_CAPACITY);
    let bound = RpcServer::new(queue)
        .bind(SocketAddr::new(cfg.local_ip, cfg.port))
        .await?;
    let url = bound.url();
    let server = bound.spawn();

    if !args.sim || args.serve_registry {
        discovery::register(&registry, SERVICE_NAME, &url).await?;
        info!(name = SERVICE_NAME, %url, %registry, "registered");
    }

    print_banner(&url);

    let hook = DefaultRefresh::new(shutdown, cfg.escalate_after);
    ServiceLoop::new(service, calls, hook, cfg.poll_interval())
        .run()
        .await;

    server.abort();
    for helper in helpers {
        helper.abort();
    }
    println!("{}", "  ✓ SLAM Server stopped.".green());
    Ok(())
}

type Helper = JoinHandle<Result<(), SlamError>>;

/// Serve a [`NameServer`] on `local_ip:registry_port`.
async fn start_registry(cfg: &config::ServiceConfig) -> Result<(String, Helper), SlamError> {
    let bound = RpcServer::new(NameServer::default())
        .bind(SocketAddr::new(cfg.local_ip, cfg.registry_port))
        .await?;
    let url = bound.url();
    info!(%url, "name registry started");
    Ok((url, bound.spawn()))
}

/// The robot the map is built from.
///
/// `--sim` alone keeps the simulated robot in-process.  With a served
/// registry the simulated robot is put on the wire first, so both cases
/// below resolve the robot by name.
async fn connect_robot(
    cfg: &config::ServiceConfig,
    args: &Args,
    registry: &str,
    helpers: &mut Vec<Helper>,
) -> Result<Box<dyn RobotSource>, SlamError> {
    if args.sim && !args.serve_registry {
        info!("using the simulated robot");
        return Ok(Box::new(SimRobot::demo()));
    }
    if args.sim {
        let bound = RpcServer::new(RobotHandler::new(SimRobot::demo()))
            .bind(SocketAddr::new(cfg.local_ip, 0))
            .await?;
        let url = bound.url();
        helpers.push(bound.spawn());
        discovery::register(registry, &cfg.robot_name, &url).await?;
        info!(robot = %cfg.robot_name, %url, "serving the simulated robot");
    }
    let uri = discovery::lookup(registry, &cfg.robot_name).await?;
    info!(robot = %cfg.robot_name, %uri, "robot resolved");
    Ok(Box::new(RemoteRobot::connect(&uri).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Overrides the configured robot name.
    robot_name: Option<String>,
    sim: bool,
    /// Run a name registry in-process.
    serve_registry: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut parsed = Args::default();
        for arg in args {
            if arg == "--sim" {
                parsed.sim = true;
            } else if arg == "--serve-registry" {
                parsed.serve_registry = true;
            } else if arg.starts_with("--") {
                warn!(flag = %arg, "ignoring unknown flag");
            } else if parsed.robot_name.is_none() {
                parsed.robot_name = Some(arg);
            } else {
                warn!(arg = %arg, "ignoring extra argument");
            }
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(url: &str) {
    println!();
    println!("  {} {}",
        "locoslam".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  {} at {}", "SLAM Server is started".green().bold(), url.bold());
    println!("  Press {} to stop.", "Ctrl-C".bold());
    println!();
}
