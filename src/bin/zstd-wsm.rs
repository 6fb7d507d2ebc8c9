//! zstd-wsm command line tool
//!
//! Drives the workspace pool the way a filesystem would: files are cut into
//! 128 KiB extents, each compressed through a pooled workspace and stored raw
//! when compression does not pay off.
//!
//! # Examples
//!
//! ```bash
//! # Show the per-level workspace sizes
//! zstd-wsm sizes
//!
//! # Compress a file into extent records, then restore it
//! zstd-wsm compress --level 9 data.bin data.wsm
//! zstd-wsm decompress data.wsm data.out
//!
//! # Hammer the pool from several threads
//! zstd-wsm stress --threads 8 --iterations 1000 --metrics
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zstd_wsm::level::{MAX_INPUT, TOP_BUCKET};
use zstd_wsm::{
    metrics, CompressedExtent, InodeRef, MemMapping, PoolConfig, WorkspaceManager, ZstdCodec,
    DEFAULT_LEVEL, MAX_LEVEL, PAGE_SIZE,
};

/// Extent container magic
const MAGIC: &[u8; 4] = b"ZWS1";
const KIND_RAW: u8 = 0;
const KIND_ZSTD: u8 = 1;

/// Inode id recorded on extents produced by this tool
const CLI_INODE: InodeRef = InodeRef { root: 5, ino: 256 };

/// zstd workspace pool tool
#[derive(Parser, Debug)]
#[command(name = "zstd-wsm")]
#[command(version = zstd_wsm::VERSION)]
#[command(about = "Pooled zstd workspaces for extent compression", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pool configuration file (TOML)
    #[arg(long, global = true, env = "ZSTD_WSM_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "ZSTD_WSM_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the workspace size table
    Sizes,

    /// Compress a file into extent records
    Compress(CompressArgs),

    /// Restore a file from extent records
    Decompress(DecompressArgs),

    /// Run concurrent acquire/compress/release cycles
    Stress(StressArgs),
}

#[derive(Args, Debug)]
struct CompressArgs {
    input: PathBuf,
    output: PathBuf,

    /// Compression level (negative for fast levels, 0 for default)
    #[arg(short, long, default_value_t = DEFAULT_LEVEL, allow_hyphen_values = true)]
    level: i32,
}

#[derive(Args, Debug)]
struct DecompressArgs {
    input: PathBuf,
    output: PathBuf,
}

#[derive(Args, Debug)]
struct StressArgs {
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Cycles per thread
    #[arg(short, long, default_value_t = 200)]
    iterations: usize,

    /// Print Prometheus metrics when done
    #[arg(long)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = setup_logging(&cli)?;
    metrics::init_metrics();

    let config = PoolConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sizes => sizes_command(config),
        Commands::Compress(args) => compress_command(config, args),
        Commands::Decompress(args) => decompress_command(config, args),
        Commands::Stress(args) => stress_command(config, args),
    }
}

/// Console logging plus optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color);

    match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "zstd-wsm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(console)
                .with(fmt::layer().json().with_writer(writer))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(console).with(filter).init();
            Ok(None)
        }
    }
}

fn sizes_command(config: PoolConfig) -> anyhow::Result<()> {
    let wsm = WorkspaceManager::new(
        ZstdCodec::new(),
        PoolConfig {
            preallocate: false,
            reclaim_thread: false,
            ..config
        },
    );
    println!("{:>6} {:>8} {:>12}", "bucket", "levels", "bytes");
    for (bucket, size) in wsm.sizes().iter() {
        let levels = if bucket == 0 {
            "<=1".to_string()
        } else {
            (bucket + 1).to_string()
        };
        println!("{:>6} {:>8} {:>12}", bucket, levels, size);
    }
    Ok(())
}

fn compress_command(config: PoolConfig, args: CompressArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mapping = MemMapping::new(CLI_INODE, &data)?;
    let wsm = WorkspaceManager::new(ZstdCodec::new(), config);

    let started = Instant::now();
    let mut out = Vec::with_capacity(data.len() / 2 + MAGIC.len());
    out.extend_from_slice(MAGIC);
    let (mut compressed, mut raw) = (0usize, 0usize);

    let mut ws = wsm.acquire(args.level);
    for (index, chunk) in data.chunks(MAX_INPUT).enumerate() {
        let start = (index * MAX_INPUT) as u64;
        // the compressed form must save at least a page
        let budget = chunk.len().div_ceil(PAGE_SIZE).saturating_sub(1).max(1);
        match ws.compress(&mapping, start, chunk.len(), budget) {
            Ok(pages) => {
                write_record(&mut out, KIND_ZSTD, chunk.len(), &pages.to_vec());
                compressed += 1;
            }
            Err(e) if e.is_too_big() => {
                write_record(&mut out, KIND_RAW, chunk.len(), chunk);
                raw += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("compressing extent at {}", start)),
        }
    }
    wsm.release(ws);

    std::fs::write(&args.output, &out)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        level = args.level,
        input = data.len(),
        output = out.len(),
        compressed,
        raw,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Compressed file"
    );
    Ok(())
}

fn write_record(out: &mut Vec<u8>, kind: u8, plain_len: usize, payload: &[u8]) {
    out.push(kind);
    out.extend_from_slice(&(plain_len as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

fn read_u32(reader: &mut impl Read) -> anyhow::Result<usize> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes) as usize)
}

fn decompress_command(config: PoolConfig, args: DecompressArgs) -> anyhow::Result<()> {
    let input = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mut reader = input.as_slice();
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .context("missing container header")?;
    if &magic != MAGIC {
        bail!("{} is not a zstd-wsm container", args.input.display());
    }

    let wsm = WorkspaceManager::new(ZstdCodec::new(), config);
    let mut ws = wsm.acquire(0);
    let mut out = Vec::new();

    while !reader.is_empty() {
        let mut kind = [0u8; 1];
        reader.read_exact(&mut kind)?;
        let plain_len = read_u32(&mut reader)?;
        let stored_len = read_u32(&mut reader)?;
        if plain_len > MAX_INPUT || stored_len > reader.len() {
            bail!("truncated or oversized extent record at {}", out.len());
        }
        let (payload, rest) = reader.split_at(stored_len);
        reader = rest;

        match kind[0] {
            KIND_RAW => out.extend_from_slice(payload),
            KIND_ZSTD => {
                let extent = CompressedExtent::from_bytes(payload, out.len() as u64, CLI_INODE)?;
                let mut plain = vec![0u8; plain_len];
                let filled = ws.decompress(&extent, &mut plain)?;
                if filled != plain_len {
                    bail!(
                        "extent at {} decompressed to {} bytes, expected {}",
                        extent.start,
                        filled,
                        plain_len
                    );
                }
                out.extend_from_slice(&plain);
            }
            other => bail!("unknown extent kind {}", other),
        }
    }
    drop(ws);

    write_file(&args.output, &out)?;
    info!(output = out.len(), "Restored file");
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut file =
        std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn stress_command(config: PoolConfig, args: StressArgs) -> anyhow::Result<()> {
    if args.threads == 0 {
        bail!("--threads must be at least 1");
    }
    let wsm = Arc::new(WorkspaceManager::new(ZstdCodec::new(), config));
    let sample = b"workspace pool stress sample ".repeat(MAX_INPUT / 29);
    let mapping = Arc::new(MemMapping::new(CLI_INODE, &sample)?);
    let started = Instant::now();

    let handles: Vec<_> = (0..args.threads)
        .map(|t| {
            let wsm = Arc::clone(&wsm);
            let mapping = Arc::clone(&mapping);
            let iterations = args.iterations;
            std::thread::spawn(move || -> zstd_wsm::error::Result<usize> {
                let mut done = 0;
                for i in 0..iterations {
                    let level = ((t * 7 + i * 3) % MAX_LEVEL as usize) as i32 + 1;
                    let len = PAGE_SIZE * (1 + (i + t) % 16);
                    let mut ws = wsm.acquire(level);
                    match ws.compress(mapping.as_ref(), 0, len, len / PAGE_SIZE) {
                        Ok(_) => done += 1,
                        Err(e) if e.is_too_big() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(done)
            })
        })
        .collect();

    let mut compressed = 0;
    for handle in handles {
        match handle.join() {
            Ok(result) => compressed += result?,
            Err(_) => warn!("Stress worker panicked"),
        }
    }

    let stats = wsm.stats();
    info!(
        threads = args.threads,
        iterations = args.iterations,
        compressed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Stress run finished"
    );
    println!(
        "allocated={} reused={} reused_larger={} waits={} reclaimed={} idle={} top_idle={} lru={}",
        stats.allocated,
        stats.reused,
        stats.reused_larger,
        stats.waits,
        stats.reclaimed,
        stats.idle_total(),
        stats.idle[TOP_BUCKET],
        stats.lru_len
    );
    if args.metrics {
        print!("{}", metrics::export_metrics());
    }
    Ok(())
}
