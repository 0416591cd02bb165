//! `laser-merger` – merge laser scans and point clouds into one cloud and
//! one synthetic scan.
//!
//! ```text
//! laser-merger [config.toml]
//! ```
//!
//! This binary:
//!
//! 1. Loads the configuration (defaults when no path is given) and applies
//!    `LASER_MERGER_*` overrides.
//! 2. Builds the transform tree from the configured static transforms.
//! 3. Starts the merge loop on its own thread.
//! 4. Reads newline-delimited JSON input messages from stdin and prints
//!    every published output as a JSON line on stdout.
//! 5. Stops on **Ctrl-C**, or one period after stdin reaches EOF, and waits
//!    for the merge loop to finish its current cycle.

mod input;
mod output;

use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use merger_middleware::{EventBus, Topic};
use merger_perception::{CloudTransformService, TfCloudTransformer, TransformProvider};
use merger_runtime::{InputSubscriptions, MergeScheduler, ReadingBuffer, config};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // Logs go to stderr; stdout carries the merged output.
    let _telemetry = merger_runtime::init_tracing("laser-merger");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let cfg = match config::load(config_path.as_deref()) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => fatal(&e),
    };
    if let Some(path) = &config_path {
        eprintln!("  Config loaded from {}", path.display().to_string().bold());
    }
    info!(
        target_frame = %cfg.target_frame,
        rate_hz = cfg.rate,
        static_transforms = cfg.static_transforms.len(),
        "configuration loaded"
    );

    // ── Wiring ────────────────────────────────────────────────────────────
    let tf = cfg.build_tf_engine();
    info!(frames = ?tf.frames(), "transform tree built");
    let transforms: Arc<dyn TransformProvider> = Arc::new(tf);
    let cloud_service: Arc<dyn CloudTransformService> =
        Arc::new(TfCloudTransformer::new(Arc::clone(&transforms)));
    let buffer = Arc::new(ReadingBuffer::new());
    let bus = EventBus::new(cfg.queue_size);

    let subscriptions = match InputSubscriptions::from_config(&cfg, Arc::clone(&buffer)) {
        Ok(subs) => subs,
        Err(e) => fatal(&e),
    };
    for (topic, kind) in subscriptions.topics() {
        eprintln!("  {} {} ({kind})", "↳".dimmed(), topic.bold());
    }

    let printers: Vec<_> = [Topic::MergedCloud, Topic::MergedScan]
        .into_iter()
        .filter_map(|topic| {
            let receiver = bus.subscribe_to(topic);
            thread::Builder::new()
                .name(format!("print-{}", topic.name()))
                .spawn(move || output::print_events(receiver))
                .map_err(|e| warn!(topic = topic.name(), error = %e, "could not start output printer"))
                .ok()
        })
        .collect();

    let scheduler = MergeScheduler::new(
        Arc::clone(&cfg),
        buffer,
        transforms,
        cloud_service,
        bus.clone(),
    );
    let handle = match scheduler.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "could not start the merge loop");
            std::process::exit(1);
        }
    };

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – stopping the merge loop …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; only stdin EOF will stop the merger");
    }

    // ── Stdin producer ────────────────────────────────────────────────────
    let shutdown_eof = Arc::clone(&shutdown);
    let period = cfg.period();
    let producer = thread::Builder::new().name("stdin-input".to_string()).spawn(move || {
        match input::pump(std::io::stdin().lock(), &subscriptions) {
            Ok(stats) => info!(accepted = stats.accepted, rejected = stats.rejected, "stdin closed"),
            Err(e) => warn!(error = %e, "stdin read failed"),
        }
        // Let the last readings go through one more cycle.
        thread::sleep(period);
        shutdown_eof.store(true, Ordering::SeqCst);
    });
    if let Err(e) = producer {
        warn!(error = %e, "could not start the stdin reader; waiting for Ctrl-C");
    }

    while !shutdown.load(Ordering::SeqCst) {
        if !handle.is_running() {
            error!("merge loop exited unexpectedly");
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    if handle.join().is_err() {
        error!("merge loop panicked");
    }
    // The printers exit once the last bus sender is gone.
    drop(bus);
    for printer in printers {
        if let Ok(written) = printer.join() {
            info!(written, "output printer joined");
        }
    }
    eprintln!("{}", "  ✓ Laser merger stopped.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    eprintln!();
    eprintln!("{}", r#"  _                           __  __                        "#.bold().cyan());
    eprintln!("{}", r#" | |   __ _ ___ ___ _ _ ___  |  \/  |___ _ _ __ _ ___ _ _ "#.bold().cyan());
    eprintln!("{}", r#" | |__/ _` (_-</ -_) '_|___| | |\/| / -_) '_/ _` / -_) '_|"#.bold().cyan());
    eprintln!("{}", r#" |____\__,_/__/\___|_|       |_|  |_\___|_| \__, \___|_|  "#.bold().cyan());
    eprintln!("{}", r#"                                           |___/         "#.bold().cyan());
    eprintln!();
    eprintln!(
        "  {} {}",
        "laser-merger".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    eprintln!("  Scans and clouds in, one cloud and one scan out");
    eprintln!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn fatal(e: &merger_types::MergeError) -> ! {
    error!(error = %e, "startup failed");
    eprintln!("{}: {}", "Startup error".red(), e);
    std::process::exit(1);
}
