//! Input Audit CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use input_audit::app::cli::{declared_version, Cli, Commands, ConfigAction, TableArg};
use input_audit::app::Config;
use input_audit::capture::{CancelToken, Event, EventKind, KeyEvent};
use input_audit::codec::FormatVersion;
use input_audit::storage::file_log::parse_file_name;
use input_audit::storage::{list_logs, DecodedRecord, FileSink, LogReader};
use input_audit::time::SessionClock;
use input_audit::workflow::{format_record, format_summary, spawn_synthetic, typed_text, CaptureSession};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first so we can use --verbose to set log level
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_default()?
    };

    match cli.command {
        Commands::Record {
            duration,
            synthetic,
            log_dir,
        } => {
            run_record(duration, synthetic, log_dir, &config)?;
        }
        Commands::Dump {
            dir,
            table,
            json,
            as_version,
        } => {
            let declared = as_version.map(declared_version).transpose()?;
            run_dump(&dir, table, json, declared)?;
        }
        Commands::Keys { dir } => {
            run_keys(&dir)?;
        }
        Commands::Info { dir } => {
            run_info(&dir)?;
        }
        Commands::Init { force } => {
            run_init(force, &config)?;
        }
        Commands::Config { action } => {
            run_config(action, &config)?;
        }
    }

    Ok(())
}

/// Where events come from for one recording
enum Feed {
    Synthetic(std::thread::JoinHandle<u64>),
    #[cfg(target_os = "macos")]
    Tap(input_audit::capture::EventTap),
}

fn run_record(
    duration: u64,
    synthetic: Option<f64>,
    log_dir: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    if let Some(rate) = synthetic {
        if rate.is_nan() || rate <= 0.0 {
            anyhow::bail!("--synthetic rate must be positive, got {}", rate);
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| config.storage.log_dir.clone());
    let clock = SessionClock::start();
    let sink = FileSink::create(&log_dir, &clock)?;
    let session_config = config.session_config()?;

    let (session, source) = CaptureSession::start(&session_config, sink, config.exemption_policy(), clock)?;
    info!("Recording session {} into {:?}", clock.session_id(), log_dir);

    // Ctrl+C and the duration stop the feed; the session shuts down after it
    let stop = CancelToken::new();
    let feed = match synthetic {
        Some(rate) => Feed::Synthetic(spawn_synthetic(source, clock, rate, None, stop.clone())?),
        None => start_host_feed(source, clock)?,
    };

    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.cancel();
    })?;

    if duration > 0 {
        info!("Recording for {} seconds... Press Ctrl+C to stop", duration);
    } else {
        info!("Recording... Press Ctrl+C to stop");
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(duration);
    loop {
        if stop.wait_timeout(Duration::from_millis(250)) {
            break;
        }
        if duration > 0 && std::time::Instant::now() >= deadline {
            break;
        }
    }
    stop.cancel();

    match feed {
        Feed::Synthetic(handle) => match handle.join() {
            Ok(delivered) => info!("Synthetic source delivered {} events", delivered),
            Err(_) => warn!("Synthetic source panicked"),
        },
        #[cfg(target_os = "macos")]
        Feed::Tap(mut tap) => tap.stop(),
    }

    let outcome = session.shutdown()?;
    let counters = outcome.counters;
    println!("Session {} ({:.1}s)", clock.session_id(), outcome.duration.as_secs_f64());
    println!("  captured:        {}", counters.source.captured);
    println!("  exempted:        {}", counters.source.exempted);
    println!("  while disabled:  {}", counters.source.ignored_while_disabled);
    println!("  clock anomalies: {}", counters.source.clock_anomalies);
    println!("  written:         {}", counters.writer.records_written);
    println!("  dropped (full):  {}", counters.buffer.records_dropped);
    println!("  lost (sink):     {}", counters.writer.records_lost);
    for table in EventKind::ALL {
        let path = outcome.sink.path_for(table);
        if path.exists() {
            println!("  {:<6} {}", table.to_string(), path.display());
        }
    }

    Ok(())
}

#[cfg(target_os = "macos")]
fn start_host_feed(source: input_audit::capture::CaptureSource, clock: SessionClock) -> anyhow::Result<Feed> {
    use input_audit::capture::{request_accessibility_permissions, EventTap};

    if !request_accessibility_permissions() {
        warn!("Accessibility permissions are required to capture input");
    }
    let mut tap = EventTap::new();
    tap.start(source, clock)?;
    Ok(Feed::Tap(tap))
}

#[cfg(not(target_os = "macos"))]
fn start_host_feed(source: input_audit::capture::CaptureSource, _clock: SessionClock) -> anyhow::Result<Feed> {
    // Dropping the source abandons the producer, so the writer exits on its own
    drop(source);
    anyhow::bail!("No host event tap on this platform; use --synthetic RATE")
}

/// Log files in `dir` restricted to `table`
fn logs_for(dir: &Path, table: Option<EventKind>) -> anyhow::Result<Vec<(EventKind, PathBuf)>> {
    let logs: Vec<(EventKind, PathBuf)> = list_logs(dir)?
        .into_iter()
        .filter_map(|path| parse_file_name(&path).map(|(kind, _)| (kind, path)))
        .filter(|(kind, _)| table.map_or(true, |t| t == *kind))
        .collect();
    if logs.is_empty() {
        anyhow::bail!("No log files found in {:?}", dir);
    }
    Ok(logs)
}

fn run_dump(
    dir: &Path,
    table: Option<TableArg>,
    json: bool,
    declared: Option<FormatVersion>,
) -> anyhow::Result<()> {
    for (_, path) in logs_for(dir, table.map(EventKind::from))? {
        let reader = LogReader::open_as(&path, declared)?;
        let epoch = reader.header().epoch_unix;
        if !json {
            println!("# {} ({})", path.display(), reader.header().version());
        }
        for record in reader.decoded() {
            let record = record?;
            if json {
                println!("{}", serde_json::to_string(&record)?);
            } else {
                println!("{}", format_record(&record, epoch));
            }
        }
        if reader.torn_tail_bytes() > 0 {
            warn!("{}: {} trailing bytes ignored", path.display(), reader.torn_tail_bytes());
        }
    }
    Ok(())
}

fn run_keys(dir: &Path) -> anyhow::Result<()> {
    for (_, path) in logs_for(dir, Some(EventKind::Key))? {
        let reader = LogReader::open(&path)?;
        let keys = reader
            .decoded()
            .filter_map(|record| match record {
                Ok(DecodedRecord {
                    event: Event::Key(key), ..
                }) => Some(Ok(key)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<KeyEvent>, _>>()?;
        println!("# {}", path.display());
        println!("{}", typed_text(&keys));
    }
    Ok(())
}

fn run_info(dir: &Path) -> anyhow::Result<()> {
    for (_, path) in logs_for(dir, None)? {
        let summary = LogReader::open(&path)?.scan()?;
        print!("{}", format_summary(&summary));
    }
    Ok(())
}

fn run_init(force: bool, config: &Config) -> anyhow::Result<()> {
    let config_path = Config::default_path();

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {:?}. Use --force to overwrite.",
            config_path
        );
    }

    config.save_default()?;
    println!("Created config at {:?}", config_path);
    println!("\nConfig content:\n{}", config.to_toml()?);

    std::fs::create_dir_all(&config.storage.log_dir)?;
    println!("\nCreated log directory: {:?}", config.storage.log_dir);

    Ok(())
}

fn run_config(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration ({:?}):\n", Config::default_path());
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Get { key } => match config.get(&key)? {
            Some(v) => println!("{} = {}", key, v),
            None => anyhow::bail!("Configuration key '{}' not found", key),
        },
        ConfigAction::Reset { force } => {
            let config_path = Config::default_path();

            if config_path.exists() && !force {
                println!("Config exists at {:?}", config_path);
                println!("Use --force to reset to defaults");
                return Ok(());
            }

            Config::default().save_default()?;
            println!("Configuration reset to defaults at {:?}", config_path);
        }
    }

    Ok(())
}
