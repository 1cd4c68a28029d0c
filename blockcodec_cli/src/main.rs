use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockcodec_codecs::default_registry;
use blockcodec_core::format::DEFAULT_BLOCK_SIZE;
use blockcodec_core::{CodecRegistry, Reader, Writer};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "blockcodec",
    about = "Compress, inspect, and decode files of independently compressed blocks",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    /// BLOCKCODEC_LOG or RUST_LOG take precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into independently decodable blocks
    Compress {
        /// Source file to compress ("-" reads stdin)
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        /// Codec descriptor, e.g. ZSTD, ZSTD(5), ZSTD(3, 27), LZ4, DEFLATE(9), QATZSTD(6)
        #[arg(short, long, default_value = "ZSTD")]
        codec: String,
        /// Raw bytes per block (default: 65536 = 64 KB)
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,
    },
    /// Fully decompress a file back to raw bytes
    Decompress {
        /// Source file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
    /// Print header metadata and block index statistics
    Inspect {
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Decompress a single block by index
    ReadBlock {
        file: PathBuf,
        /// Zero-based block index to read
        #[arg(short, long)]
        index: u64,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List registered codecs and their method bytes
    Codecs,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("BLOCKCODEC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn open_reader(file: &Path, registry: &CodecRegistry) -> anyhow::Result<Reader> {
    Reader::open(file, registry).with_context(|| format!("opening {:?}", file))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    registry: &CodecRegistry,
    input: PathBuf,
    output: PathBuf,
    descriptor: &str,
    block_size: u32,
) -> anyhow::Result<()> {
    let codec = registry
        .get_by_text(descriptor)
        .with_context(|| format!("invalid codec descriptor {:?}", descriptor))?;
    let codec_display = codec.descriptor().to_string();
    info!(codec = %codec_display, block_size, "compressing {:?}", input);

    let mut writer = Writer::create(&output, codec, block_size)
        .with_context(|| format!("creating output file {:?}", output))?;

    let mut src: Box<dyn Read> = if input.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
        Box::new(BufReader::new(file))
    };

    let t0 = Instant::now();
    let mut buf = vec![0u8; block_size as usize];
    let mut bytes_read = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n])?;
        bytes_read += n as u64;
    }
    let block_count = writer.finish()?;
    let elapsed = t0.elapsed();

    let compressed_size = std::fs::metadata(&output)?.len();
    let ratio = bytes_read as f64 / compressed_size as f64;

    eprintln!("  codec       : {}", codec_display);
    eprintln!("  block size  : {}", human_bytes(block_size as u64));
    eprintln!("  blocks      : {}", block_count);
    eprintln!("  raw size    : {}", human_bytes(bytes_read));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((bytes_read as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(registry: &CodecRegistry, input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let mut reader = open_reader(&input, registry)?;

    let mut dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(&output).with_context(|| format!("creating output file {:?}", output))?)
    };

    let t0 = Instant::now();
    let block_count = reader.block_count();
    let mut total_raw = 0u64;
    for idx in 0..block_count {
        let block = reader
            .read_block(idx)
            .with_context(|| format!("decoding block {}", idx))?;
        total_raw += block.len() as u64;
        dst.write_all(&block)?;
    }
    dst.flush()?;

    let elapsed = t0.elapsed();
    eprintln!("  blocks      : {}", block_count);
    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(registry: &CodecRegistry, file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let reader = open_reader(&file, registry)?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== Block file: {:?} ===", file);
    println!();
    println!("  format version  : {}", reader.header.version);
    println!(
        "  codec           : {} (method 0x{:02x})",
        reader.codec().name(),
        reader.header.method_byte
    );
    println!("  descriptor hash : {:016x}", reader.header.descriptor_hash);
    println!("  block size      : {}", human_bytes(reader.block_size() as u64));
    println!("  block count     : {}", reader.block_count());
    println!("  raw size        : {}", human_bytes(reader.raw_size()));
    println!("  compressed      : {}", human_bytes(reader.compressed_size()));
    println!("  file on disk    : {}", human_bytes(file_size));
    println!("  ratio           : {:.2}x", reader.ratio());

    if show_blocks {
        println!();
        println!("  {:>8}  {:>14}  {:>12}  {:>12}", "block", "file offset", "frame", "raw");
        println!("  {}", "-".repeat(52));
        for (i, e) in reader.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}",
                i,
                e.offset,
                human_bytes(e.frame_len as u64),
                human_bytes(e.raw_len as u64)
            );
        }
    }
    Ok(())
}

fn run_read_block(
    registry: &CodecRegistry,
    file: PathBuf,
    index: u64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut reader = open_reader(&file, registry)?;

    let t0 = Instant::now();
    let raw = reader.read_block(index)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            let preview = &raw[..raw.len().min(256)];
            println!("--- block {} ({} bytes, first {} shown) ---", index, raw.len(), preview.len());
            for (i, chunk) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in chunk {
                    print!("{:02x} ", b);
                }
                for _ in chunk.len()..16 {
                    print!("   ");
                }
                print!("  |");
                for b in chunk {
                    if b.is_ascii_graphic() || *b == b' ' {
                        print!("{}", *b as char);
                    } else {
                        print!(".");
                    }
                }
                println!("|");
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }
    Ok(())
}

fn run_codecs(registry: &CodecRegistry) -> anyhow::Result<()> {
    println!("  {:<10}  {:>6}", "codec", "method");
    for (name, method) in registry.entries() {
        match method {
            Some(byte) => println!("  {:<10}  0x{:02x}", name, byte),
            None => println!("  {:<10}  {:>6}", name, "-"),
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = default_registry().context("registering codecs")?;
    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            block_size,
        } => run_compress(&registry, input, output, &codec, block_size),
        Commands::Decompress { input, output } => run_decompress(&registry, input, output),
        Commands::Inspect { file, blocks } => run_inspect(&registry, file, blocks),
        Commands::ReadBlock { file, index, output } => run_read_block(&registry, file, index, output),
        Commands::Codecs => run_codecs(&registry),
    }
}
