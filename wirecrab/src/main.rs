#![warn(clippy::all)]

#[macro_use]
extern crate log;

use clap::{crate_version, Parser};
use crossbeam_channel::RecvTimeoutError;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use libwirecrab_capture::CaptureService;
use libwirecrab_dissect::dissectors::DissectorsFactory;
use libwirecrab_tools::Config;

mod display;

/// Number of records fetched from the store at once
const PRINT_BATCH: usize = 1024;

/// Live packet capture and decoding tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Capture backend: native, replay, pdml or fields
    #[arg(short, long)]
    backend: Option<String>,

    /// Maximum number of packets kept in memory
    #[arg(long)]
    capacity: Option<usize>,

    /// Dissectors to load, comma-separated (default: all)
    #[arg(short, long)]
    dissectors: Option<String>,

    /// List dissectors and exit
    #[arg(long)]
    list_dissectors: bool,

    /// Stop capturing after this number of seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Interval between two reads of the packet store, in milliseconds
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,

    /// Print packets as JSON, one object per line
    #[arg(long)]
    json: bool,

    /// Print details of frame N before stopping
    #[arg(long, value_name = "N")]
    details: Option<u64>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,

    /// Interface name (or capture file, with the replay backend)
    device: Option<String>,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config
        .load_config(file)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn init_logging(config: &Config, log_stderr: bool) {
    let env_filter = EnvFilter::try_from_env("WIRECRAB_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(Level::INFO.into()));
    if log_stderr {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(env_filter)
            .compact()
            .init();
    } else {
        let log_file = config.get("log_file").unwrap_or("wirecrab.log");
        let output_dir = config.get("output_dir").unwrap_or(".");
        let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, log_file);
        tracing_subscriber::fmt()
            .with_writer(file_appender)
            .with_env_filter(env_filter)
            .with_ansi(false)
            .compact()
            .init();
    }
}

/// Print records stored since the last call. `printed` counts records already seen.
fn print_new<W: Write>(
    out: &mut W,
    service: &CaptureService,
    printed: &mut u64,
    json: bool,
) -> io::Result<()> {
    loop {
        let (first, records) = service.store().get_since(*printed, PRINT_BATCH);
        if first > *printed {
            warn!("{} packets evicted before being printed", first - *printed);
            *printed = first;
        }
        if records.is_empty() {
            break;
        }
        for record in &records {
            display::print_record(out, record, json)?;
        }
        *printed += records.len() as u64;
    }
    out.flush()
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(backend) = args.backend.as_ref() {
        config.set("capture.backend", backend.as_str());
    }
    if let Some(capacity) = args.capacity {
        config.set("store.capacity", capacity as i64);
    }

    // instantiate dissectors
    let factory = DissectorsFactory::default();
    let registry = if let Some(names) = args.dissectors.as_ref() {
        let names: Vec<_> = names.split(',').map(str::trim).collect();
        factory.build_filter_dissectors(|n| names.iter().any(|&x| x == n), &config)
    } else {
        factory.build_dissectors(&config)
    };
    if args.list_dissectors {
        display::print_dissectors(&mut io::stdout().lock(), &registry)?;
        return Ok(());
    }

    init_logging(&config, args.log_stderr);
    info!("wirecrab {}", crate_version!());
    if registry.num_dissectors() == 0 {
        warn!("No dissectors loaded");
    }

    let device = match args.device.as_ref() {
        Some(s) => s.as_str(),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Device name cannot be empty",
            ));
        }
    };

    let service = CaptureService::with_registry(&config, Arc::new(registry))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .map_err(io::Error::other)?;

    if let Err(e) = service.start(device) {
        error!("could not start capture: {e}");
        return Err(io::Error::other(e.to_string()));
    }

    let deadline = args.duration.map(|d| Instant::now() + Duration::from_secs(d));
    let poll = Duration::from_millis(args.poll_ms.max(1));
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0u64;
    loop {
        match rx.recv_timeout(poll) {
            Ok(()) => {
                info!("interrupted");
                break;
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        print_new(&mut out, &service, &mut printed, args.json)?;
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            info!("capture duration reached");
            break;
        }
        if !service.is_capturing() {
            info!("capture source exhausted");
            break;
        }
    }
    print_new(&mut out, &service, &mut printed, args.json)?;

    if let Some(number) = args.details {
        match service.get_packet_details(number) {
            Ok(details) => display::print_details(&mut out, &details, args.json)?,
            Err(e) => warn!("no details for frame {number}: {e}"),
        }
    }

    service.stop();
    info!("wirecrab: done ({} packets), exiting", printed);
    Ok(())
}
