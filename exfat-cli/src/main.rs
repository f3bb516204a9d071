use clap::{Parser, Subcommand};
use exfat_core::RecoveryError;
use exfat_log::{textlog_to_binlog, BinaryLogReader, BinaryRecord, LogRecord, TextLogReader};
use exfat_reconstruct::ReconstructionEngine;
use exfat_scan::{FileChunkSource, Scanner};
use exfat_store::FlatFileStore;
use exfat_volume::VolumeAccessor;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "resurrect-exfat")]
#[command(about = "Recovers files and directory structure from a damaged exFAT volume", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweeps a device for plausible directory entries, writing a text log.
    Scan { device: PathBuf, textlog: PathBuf },
    /// Converts a text log into the compact binary log format.
    TextlogToBinlog {
        device: PathBuf,
        textlog: PathBuf,
        binlog: PathBuf,
    },
    /// Loads entities from a log, adopts orphans, and writes fresh metadata.
    Reconstruct { device: PathBuf, textlog: PathBuf },
    /// Loads entities from a log and streams file contents to a destination.
    Extract {
        device: PathBuf,
        textlog: PathBuf,
        dest_dir: PathBuf,
    },
    /// Writes a fresh, empty metadata region over the current device.
    Init { device: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Scan { device, textlog } => run_scan(&device, &textlog),
        Commands::TextlogToBinlog {
            device,
            textlog,
            binlog,
        } => run_textlog_to_binlog(&device, &textlog, &binlog),
        Commands::Reconstruct { device, textlog } => run_reconstruct(&device, &textlog),
        Commands::Extract {
            device,
            textlog,
            dest_dir,
        } => run_extract(&device, &textlog, &dest_dir),
        Commands::Init { device } => run_init(&device),
    };

    ExitCode::from(code)
}

/// Exit code for verbs whose table is "0 ok; 2 device error; 3 log-write error".
fn scan_family_exit_code(e: &RecoveryError) -> u8 {
    match e {
        RecoveryError::DeviceUnavailable(_) | RecoveryError::MappingFailed(_) => 2,
        _ => 3,
    }
}

fn run_scan(device: &std::path::Path, textlog: &std::path::Path) -> u8 {
    let result = (|| -> Result<(), RecoveryError> {
        // Reads the device directly, sector by sector, rather than through a
        // memory mapping: a bad sector under mmap raises SIGBUS instead of
        // surfacing as a read error, which would make bad-sector recovery
        // unreachable.
        let source = FileChunkSource::open(device)?;
        let out = File::create(textlog)?;
        let stats = Scanner::scan(&source, out)?;
        println!(
            "scanned {} bytes, found {} entities, {} bad sectors",
            stats.bytes_scanned, stats.entities_found, stats.bad_sectors
        );
        Ok(())
    })();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "CRITICAL: scan failed");
            scan_family_exit_code(&e)
        }
    }
}

fn run_textlog_to_binlog(
    device: &std::path::Path,
    textlog: &std::path::Path,
    binlog: &std::path::Path,
) -> u8 {
    let result = (|| -> Result<(), RecoveryError> {
        let geometry = exfat_volume::detect_geometry(device)?;
        let volume = VolumeAccessor::open(device, geometry, false)?;
        let text_in = File::open(textlog)?;
        let binary_out = File::create(binlog)?;
        textlog_to_binlog(text_in, binary_out, volume.as_bytes(), |entry_bytes| {
            let continuations = entry_bytes.get(1).copied().unwrap_or(1) as usize;
            32 * (continuations + 1)
        })
    })();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "CRITICAL: textlog-to-binlog conversion failed");
            scan_family_exit_code(&e)
        }
    }
}

/// Reads every `Entity` record out of a text or binary log at `textlog`,
/// dispatching on extension (`.bin`/`.binlog` is treated as the binary
/// format, everything else as text).
fn read_logged_entities(textlog: &std::path::Path) -> Result<Vec<(u64, String)>, RecoveryError> {
    let is_binary = matches!(
        textlog.extension().and_then(|e| e.to_str()),
        Some("bin") | Some("binlog")
    );
    let mut entities = Vec::new();
    let file = File::open(textlog)?;
    if is_binary {
        let mut reader = BinaryLogReader::new(file);
        reader.for_each_record(|record| {
            if let BinaryRecord::Entity { offset, .. } = record {
                entities.push((offset, String::new()));
            }
        })?;
    } else {
        let mut reader = TextLogReader::new(file);
        reader.for_each_record(|record| {
            if let LogRecord::Entity { offset, name } = record {
                entities.push((offset, name));
            }
        })?;
    }
    Ok(entities)
}

fn run_reconstruct(device: &std::path::Path, textlog: &std::path::Path) -> u8 {
    let result = (|| -> Result<(), RecoveryError> {
        let entities = read_logged_entities(textlog)?;
        let geometry = exfat_volume::detect_geometry(device)?;
        let volume = VolumeAccessor::open(device, geometry, true)?;
        let mut engine = ReconstructionEngine::new(volume);

        let stats = engine.load_all(entities);
        println!("loaded {} entities, rejected {}", stats.loaded, stats.rejected);
        let adopted = engine.adopt_orphans();
        println!("adopted {} orphans", adopted.len());

        let store_path = textlog.with_extension("store.jsonl");
        let mut store = FlatFileStore::open(&store_path)?;
        engine.sync_store(&mut store)?;

        engine.write_metadata([0u8; 16], "")?;
        Ok(())
    })();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "CRITICAL: reconstruction failed");
            4
        }
    }
}

fn run_extract(device: &std::path::Path, textlog: &std::path::Path, dest_dir: &std::path::Path) -> u8 {
    let result = (|| -> Result<(), RecoveryError> {
        let entities = read_logged_entities(textlog)?;
        let geometry = exfat_volume::detect_geometry(device)?;
        let volume = VolumeAccessor::open(device, geometry, false)?;
        let mut engine = ReconstructionEngine::new(volume);

        engine.load_all(entities);
        engine.adopt_orphans();
        let report = engine.restore_all(dest_dir)?;
        println!(
            "extracted {} files, skipped {} non-contiguous, {} failed",
            report.extracted, report.skipped_non_contiguous, report.failed
        );
        Ok(())
    })();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "CRITICAL: extraction failed");
            5
        }
    }
}

fn run_init(device: &std::path::Path) -> u8 {
    let result = (|| -> Result<(), RecoveryError> {
        let geometry = exfat_volume::detect_geometry(device)?;
        let volume = VolumeAccessor::open(device, geometry, true)?;
        let mut engine = ReconstructionEngine::new(volume);
        engine.write_metadata([0u8; 16], "")?;
        println!("wrote fresh metadata region");
        Ok(())
    })();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "CRITICAL: init failed");
            4
        }
    }
}
