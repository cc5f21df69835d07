use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::mpsc;
use anyhow::Context;
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};
mod cancel;
mod codec;
mod endian;
mod error;
mod master;
mod reconcile;
mod record_reader;
mod report;
mod rewriter;
mod rules;

use crate::cancel::CancelToken;
use crate::reconcile::{Progress, Settings};
use crate::rules::RuleSwitches;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "ProbeCheck",
    about = "Reconciles probe XML configurations against the master configuration file",
    long_about = "Reconciles every station XML configuration under <root>/stations against the master configuration CSV, writing corrected copies to <root>/modified_stations.",
    after_long_help = "Examples:\n  ProbeCheck --root D:\\fleet\n  ProbeCheck --root . --check-time-intervals --progress\n  ProbeCheck --input-firmware 1.5.6 --output-firmware 1.6.0 --json-path summary.json --csv-path devices.csv",
    color = ColorChoice::Auto
)]
struct Args {
    /// Directory holding the master file, stations/ and modified_stations/
    #[arg(long, short = 'r')]
    root: Option<String>,
    #[arg(long, short = 'm')]
    master_file: Option<String>,
    #[arg(long)]
    input_firmware: Option<String>,
    #[arg(long)]
    output_firmware: Option<String>,
    #[arg(long, default_value_t = false, help = "Also check Central 0 communication time intervals")]
    check_time_intervals: bool,
    #[arg(long, default_value_t = false, help = "Also check the Service Mode connection")]
    check_service_mode: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            root: None,
            master_file: None,
            input_firmware: None,
            output_firmware: None,
            check_time_intervals: false,
            check_service_mode: false,
            progress: false,
            json_path: None,
            csv_path: None,
            no_color: false,
            force_color: false,
            log_level: None,
            log_format: None,
            log_path: None,
            verbose: 0,
            quiet: false,
            completions: None,
            completions_out: None,
            config: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct AppConfig {
    root: Option<String>,
    master_file: Option<String>,
    input_firmware: Option<String>,
    output_firmware: Option<String>,
    check_time_intervals: Option<bool>,
    check_service_mode: Option<bool>,
    progress: Option<bool>,
    json_path: Option<String>,
    csv_path: Option<String>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.root.is_none() && let Some(v) = cfg.root { args.root = Some(v); }
    if args.master_file.is_none() && let Some(v) = cfg.master_file { args.master_file = Some(v); }
    if args.input_firmware.is_none() && let Some(v) = cfg.input_firmware { args.input_firmware = Some(v); }
    if args.output_firmware.is_none() && let Some(v) = cfg.output_firmware { args.output_firmware = Some(v); }
    if let Some(v) = cfg.check_time_intervals { args.check_time_intervals |= v; }
    if let Some(v) = cfg.check_service_mode { args.check_service_mode |= v; }
    if let Some(v) = cfg.progress { args.progress |= v; }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if args.log_level.is_none() && let Some(v) = cfg.log_level { args.log_level = Some(v); }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

fn settings_from(args: &Args) -> Settings {
    let def = Settings::default();
    Settings {
        root: args.root.as_ref().map(PathBuf::from).unwrap_or(def.root),
        master_file: args.master_file.clone().unwrap_or(def.master_file),
        input_firmware: args.input_firmware.clone().unwrap_or(def.input_firmware),
        output_firmware: args.output_firmware.clone().unwrap_or(def.output_firmware),
        switches: RuleSwitches { check_time_intervals: args.check_time_intervals, check_service_mode: args.check_service_mode },
    }
}

fn level_filter(args: &Args) -> log::LevelFilter {
    if args.quiet { return log::LevelFilter::Error; }
    if let Some(lvl) = args.log_level {
        return match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
    }
    match args.verbose { 0 => log::LevelFilter::Info, 1 => log::LevelFilter::Debug, _ => log::LevelFilter::Trace }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.quiet || args.log_level.is_some() || args.verbose > 0 { builder.filter_level(level_filter(args)); }
    match args.log_format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => {
            builder.format(|buf, record| {
                use std::io::Write;
                let ts = chrono::Local::now().to_rfc3339();
                let obj = serde_json::json!({
                    "ts": ts,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{}", obj)
            });
        }
        LogFormat::Text => {
            builder.format(|buf, record| {
                use std::io::Write;
                let ts = chrono::Local::now().format("%H:%M:%S");
                writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
            });
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
        }
    }
    builder.init();
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&true) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

/// Drains worker progress into a bar until the worker drops its sender.
fn drive_progress(rx: mpsc::Receiver<Progress>, show: bool) {
    let pb = if show { Some(ProgressBar::new(0)) } else { None };
    if let Some(ref pb) = pb
        && let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} stations {msg}") { pb.set_style(style); }
    for p in rx {
        let Some(ref pb) = pb else { continue };
        match p {
            Progress::Range { min, max } => { pb.set_length(max.saturating_sub(min)); pb.set_position(0); }
            Progress::Advance(v) => pb.set_position(v),
        }
    }
    if let Some(pb) = pb { pb.finish_and_clear(); }
}

fn run(args: &Args) -> anyhow::Result<()> {
    log::debug!("Host byte order: {}", if endian::little_endian() { "little endian" } else { "big endian" });
    let settings = settings_from(args);
    let cancel = CancelToken::new();
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(sig, cancel.flag()) { log::warn!("Cannot install handler for signal {}: {}", sig, e); }
    }
    let (tx, rx) = mpsc::channel();
    let worker = {
        let settings = settings.clone();
        let cancel = cancel.clone();
        std::thread::Builder::new()
            .name("reconcile".to_string())
            .spawn(move || reconcile::run(&settings, cancel, Some(tx)))
            .context("Failed to start the reconciliation worker")?
    };
    drive_progress(rx, args.progress && std::io::stderr().is_terminal());
    let summary = match worker.join() {
        Ok(res) => res.context("Check aborted")?,
        Err(_) => anyhow::bail!("Reconciliation worker panicked"),
    };
    if !args.quiet { println!("{}", report::render_text(&summary)); }
    if let Some(p) = args.json_path.as_ref() {
        match report::write_json(p, &summary) {
            Ok(()) => if !args.quiet { println!("{}", paint(&format!("JSON written: {}", p), "1;36")); },
            Err(e) => log::error!("JSON write failed for {}: {}", p, e),
        }
    }
    if let Some(p) = args.csv_path.as_ref() {
        if let Err(e) = report::write_csv(p, &summary) { log::error!("CSV write failed for {}: {}", p, e); } else if !args.quiet { println!("{}", paint(&format!("CSV written: {}", p), "1;36")); }
    }
    Ok(())
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "ProbeCheck", &mut f); } else { clap_complete::generate(sh, &mut cmd, "ProbeCheck", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "ProbeCheck", &mut std::io::stdout());
        }
        return;
    }
    if let Some(p) = args.config.as_ref()
        && let Ok(s) = std::fs::read_to_string(p)
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    else {
        let def = "ProbeCheck.toml";
        if let Ok(s) = std::fs::read_to_string(def)
            && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    }
    init_logging(&args);
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    if let Err(e) = run(&args) {
        log::error!("{:#}", e);
        std::process::exit(2);
    }
}
