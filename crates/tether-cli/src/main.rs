//! `tether` – tethered camera live view and capture from the terminal.
//!
//! ```text
//! tether list        list attached cameras
//! tether init        write a default ~/.tether/config.toml
//! tether [run]       connect and run the live-view loop
//! ```
//!
//! `run` connects to the configured camera (`~/.tether/config.toml`, see
//! [`config`]), drains live-view frames at roughly 60 Hz, prints a status line
//! every second and saves each photo into `output_dir`.  Commands are read
//! from stdin (`/help`).  Ctrl-C closes the camera before exiting.

mod commands;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use tether_capture::TetheredCamera;
use tether_hal::{DriverContext, SimDriver};
use tracing::{info, warn};

use crate::commands::Command;

/// Consumer loop period (~60 Hz).
const TICK: Duration = Duration::from_millis(16);
const STATUS_EVERY: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("tether");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let context = Arc::new(driver_context());

    match args.first().map(String::as_str) {
        None | Some("run") => run(context),
        Some("list") => list(&context),
        Some("init") => init(),
        Some("help" | "-h" | "--help") => {
            print_usage();
            ExitCode::SUCCESS
        }
        Some(other) => {
            eprintln!("{} '{}'", "Unknown subcommand:".red(), other.yellow());
            print_usage();
            ExitCode::FAILURE
        }
    }
}

/// No hardware backend is built into this binary; everything runs against
/// the simulator.
fn driver_context() -> DriverContext {
    println!(
        "  {}",
        "No camera backend available, using the built-in simulated camera.".dimmed()
    );
    DriverContext::new(Box::new(SimDriver::new().with_default_camera()))
}

// ─────────────────────────────────────────────────────────────────────────────
// tether list
// ─────────────────────────────────────────────────────────────────────────────

fn list(context: &DriverContext) -> ExitCode {
    match context.enumerate() {
        Ok(devices) if devices.is_empty() => {
            println!("{}", "No cameras detected.".yellow());
            ExitCode::SUCCESS
        }
        Ok(devices) => {
            println!("{}", "Cameras".bold().underline());
            for d in &devices {
                println!("  {:>2}  {}  {}", d.id, d.name.bold(), d.port.dimmed());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Enumeration failed".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// tether init
// ─────────────────────────────────────────────────────────────────────────────

fn init() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!("  Config already exists at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save(&config::Config::default()) {
        Ok(()) => {
            println!("  {} {}", "✓ Wrote".green(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Could not write config".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// tether run
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> config::Config {
    let (cfg, source) = config::load();
    match source {
        config::Source::File(path) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
        }
        config::Source::Defaults => {}
        config::Source::Fallback(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
    cfg
}

fn run(context: Arc<DriverContext>) -> ExitCode {
    let cfg = load_config();
    if let Err(e) = std::fs::create_dir_all(&cfg.output_dir) {
        eprintln!(
            "{} {}: {}",
            "Cannot create output directory".red(),
            cfg.output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let mut camera = match TetheredCamera::new(context, cfg.capture.clone()) {
        Ok(camera) => camera,
        Err(e) => {
            eprintln!("{}: {}", "Invalid capture configuration".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let device = cfg.device();
    if let Err(e) = camera.setup(device.clone()) {
        eprintln!("{} {}: {}", "Could not connect to".red(), device, e);
        return ExitCode::FAILURE;
    }
    if let Some(info) = camera.camera_info() {
        println!(
            "  {} {} on {}{}",
            "✓ Connected to".green(),
            info.name.bold(),
            info.port,
            info.serial_number
                .as_deref()
                .map(|s| format!(" (serial {s})"))
                .unwrap_or_default()
        );
    }
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing camera …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    let (tx, rx) = mpsc::channel();
    commands::spawn_reader(tx);

    let mut view = LiveView::new(cfg.output_dir.clone());
    while !shutdown.load(Ordering::SeqCst) {
        while let Ok(cmd) = rx.try_recv() {
            if !view.handle(&mut camera, cmd) {
                shutdown.store(true, Ordering::SeqCst);
            }
        }
        view.tick(&mut camera);
        thread::sleep(TICK);
    }

    camera.close();
    view.print_summary();
    println!("{}", "  ✓ Camera closed.".green());
    ExitCode::SUCCESS
}

/// Consumer-side bookkeeping for the run loop.
struct LiveView {
    output_dir: PathBuf,
    frames: u64,
    frames_since_status: u64,
    photos: u64,
    last_status: Instant,
    started: Instant,
}

impl LiveView {
    fn new(output_dir: PathBuf) -> Self {
        let now = Instant::now();
        Self {
            output_dir,
            frames: 0,
            frames_since_status: 0,
            photos: 0,
            last_status: now,
            started: now,
        }
    }

    /// Returns `false` when the loop should stop.
    fn handle(&mut self, camera: &mut TetheredCamera, cmd: Command) -> bool {
        match cmd {
            Command::Photo => match camera.take_photo(false) {
                Ok(()) => println!("  {}", "Taking photo …".cyan()),
                Err(e) => println!("{}: {}", "Photo request failed".red(), e),
            },
            Command::ToggleLiveView => {
                let enabled = !camera.is_live_view();
                camera.set_live_view(enabled);
                println!("  Live view {}", if enabled { "on".green() } else { "off".yellow() });
            }
            Command::KeepAlive => {
                camera.send_keep_alive();
                println!("  Keep-alive queued.");
            }
            Command::Stats => self.print_stats(camera),
            Command::Help => commands::print_help(),
            Command::Quit => return false,
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
        true
    }

    fn tick(&mut self, camera: &mut TetheredCamera) {
        camera.update();
        if camera.is_frame_new() {
            self.frames += 1;
            self.frames_since_status += 1;
        }
        if camera.is_photo_new() {
            self.save_photo(camera);
        }
        if let Some(err) = camera.take_photo_error() {
            println!("{}: {}", "Photo failed".red(), err);
        }
        if self.last_status.elapsed() >= STATUS_EVERY {
            self.print_status(camera);
        }
    }

    fn save_photo(&mut self, camera: &mut TetheredCamera) {
        let name = format!("photo-{}.jpg", chrono::Local::now().format("%Y%m%d-%H%M%S%.3f"));
        let path = self.output_dir.join(name);
        match camera.save_photo(&path) {
            Ok(()) => {
                self.photos += 1;
                println!("  {} {}", "✓ Photo saved to".green(), path.display().to_string().bold());
            }
            Err(e) => println!("{}: {}", "Could not save photo".red(), e),
        }
    }

    fn print_status(&mut self, camera: &TetheredCamera) {
        let elapsed = self.last_status.elapsed().as_secs_f32();
        let shown = self.frames_since_status as f32 / elapsed.max(f32::EPSILON);
        println!(
            "  {}x{} @ {:.1} fps (shown {:.1}) / {:.2} MiB/s",
            camera.width(),
            camera.height(),
            camera.frame_rate(),
            shown,
            camera.bandwidth() / (1024.0 * 1024.0),
        );
        self.frames_since_status = 0;
        self.last_status = Instant::now();
    }

    fn print_stats(&self, camera: &TetheredCamera) {
        let status = camera.status();
        println!("{}", "Session".bold().underline());
        println!("  connection      : {:?}", status.connection);
        println!("  live view       : {}", status.live_view);
        println!("  camera fps      : {:.1}", status.frame_rate);
        println!("  bytes per frame : {:.0}", status.bytes_per_frame);
        println!("  frames captured : {}", status.frames_captured);
        println!("  frames shown    : {}", self.frames);
        println!("  frames dropped  : {}", status.dropped_frames);
        println!("  photos taken    : {}", status.photos_taken);
        println!("  photos failed   : {}", status.photos_failed);
        println!("  photos saved    : {}", self.photos);
    }

    fn print_summary(&self) {
        let secs = self.started.elapsed().as_secs_f32();
        info!(frames = self.frames, photos = self.photos, seconds = secs, "session finished");
        println!(
            "  {} frames shown, {} photos saved in {:.0} s.",
            self.frames, self.photos, secs
        );
    }
}

fn print_usage() {
    println!("{}", "Usage".bold().underline());
    println!("  {}   connect and run live view (default)", "tether run".bold());
    println!("  {}  list attached cameras", "tether list".bold());
    println!("  {}  write a default config file", "tether init".bold());
}
