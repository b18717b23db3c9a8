//! # chunk-transcode CLI
//!
//! Streams files through encoding and line-ending filters one chunk at a
//! time, and inspects encodings of existing data.

#[cfg(feature = "cli")]
use std::fs::{self, File};
#[cfg(feature = "cli")]
use std::io::{self, BufWriter, Read, Write};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use serde::Serialize;
#[cfg(feature = "cli")]
use tracing::{debug, info};
#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cli")]
use chunk_transcode::config::{ByteSize, FilterSpec, PipelineConfig, parse_filter_chain};
#[cfg(feature = "cli")]
use chunk_transcode::detection::{DEFAULT_DETECTION_ORDER, EncodingDetector};
#[cfg(feature = "cli")]
use chunk_transcode::io::FilterReader;
#[cfg(feature = "cli")]
use chunk_transcode::{
    Encoding, EncodingCapability, EncodingFamily, EncodingRsCapability, LineEnding, Locale,
    Settings, SourceEncoding, SubstituteCharacter,
};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// chunk-transcode: chunk-safe encoding and line-ending conversion
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "chunk-transcode")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Stream input through a filter chain
    Convert(ConvertArgs),

    /// Pick the most plausible encoding from a candidate list
    Detect(DetectArgs),

    /// List supported encodings
    List(ListArgs),

    /// Check that input is well-formed in an encoding
    Validate(ValidateArgs),
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ConvertArgs {
    /// Source encoding: a name, `default` or `auto[:FALLBACK]`
    #[arg(short = 'f', long = "from", default_value = "default")]
    from: SourceEncoding,

    /// Target encoding
    #[arg(short = 't', long = "to")]
    to: Option<Encoding>,

    /// Normalize line endings, given as TO[:FROM]
    #[arg(long, value_name = "TO[:FROM]")]
    line_ending: Option<String>,

    /// Full filter chain, e.g. `convert.encoding.UTF-8:SJIS-win|convert.linefeed.LF`
    #[arg(long, conflicts_with_all = ["to", "line_ending", "config"])]
    filters: Option<String>,

    /// Pipeline configuration file (JSON)
    #[arg(long, conflicts_with_all = ["to", "line_ending"])]
    config: Option<PathBuf>,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Substitute policy: none, long, entity, a character or a code point
    #[arg(long)]
    substitute: Option<SubstituteCharacter>,

    /// Locale for the duration of the conversion
    #[arg(long)]
    locale: Option<Locale>,

    /// Detection candidates for `default` sources, comma separated
    #[arg(long, value_delimiter = ',')]
    detect_order: Option<Vec<Encoding>>,

    /// Read size, e.g. 8192 or 64K
    #[arg(long)]
    chunk_size: Option<ByteSize>,

    /// Bound on bytes held back between chunks (-1 for unlimited)
    #[arg(long, allow_hyphen_values = true)]
    deferred_limit: Option<ByteSize>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct DetectArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Show the score of every candidate
    #[arg(long)]
    scores: bool,

    /// Maximum bytes to read for detection
    #[arg(long, default_value = "8192")]
    sample_size: usize,

    /// Candidate encodings in priority order, comma separated
    #[arg(long, value_delimiter = ',')]
    candidates: Option<Vec<Encoding>>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ListArgs {
    /// Filter by family (utf8, japanese, other)
    #[arg(short, long)]
    family: Option<String>,

    /// Show only ASCII-compatible encodings
    #[arg(long)]
    ascii_compatible: bool,

    /// Show only multibyte encodings
    #[arg(long)]
    multibyte: bool,

    /// Show aliases and BOMs
    #[arg(long)]
    details: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ValidateArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Expected encoding
    #[arg(short, long)]
    encoding: Encoding,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionResult {
    success: bool,
    filters: Vec<String>,
    bytes_read: u64,
    bytes_written: u64,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Convert(ref args) => convert_command(args, &cli)?,
        Commands::Detect(ref args) => detect_command(args, &cli)?,
        Commands::List(ref args) => list_command(args, &cli)?,
        Commands::Validate(ref args) => validate_command(args, &cli)?,
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn init_tracing(verbose: bool) {
    let default = if verbose { "chunk_transcode=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn pipeline_config(args: &ConvertArgs) -> Result<PipelineConfig> {
    let mut config = if let Some(ref path) = args.config {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid pipeline config: {}", path.display()))?
    } else if let Some(ref chain) = args.filters {
        PipelineConfig {
            filters: parse_filter_chain(chain).context("Invalid filter chain")?,
            ..PipelineConfig::default()
        }
    } else {
        let mut filters = Vec::new();
        if let Some(to) = args.to {
            filters.push(FilterSpec::Encoding {
                to,
                from: args.from.clone(),
            });
        }
        if let Some(spec) = args.line_ending.as_deref() {
            let (to, from) = spec.split_once(':').unwrap_or((spec, "ALL"));
            filters.push(FilterSpec::LineEnding {
                to: to.parse::<LineEnding>()?,
                from: from.parse::<LineEnding>()?,
            });
        }
        PipelineConfig {
            filters,
            ..PipelineConfig::default()
        }
    };

    if args.substitute.is_some() {
        config.substitute = args.substitute;
    }
    if args.locale.is_some() {
        config.locale = args.locale.clone();
    }
    if args.detect_order.is_some() {
        config.detection_order = args.detect_order.clone();
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(limit) = args.deferred_limit {
        config.deferred_limit = limit;
    }

    config
        .validate()
        .context("Nothing to do: pass --to, --line-ending, --filters or --config")?;
    Ok(config)
}

#[cfg(feature = "cli")]
fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "reading input");
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => {
            info!("reading from stdin");
            Ok(Box::new(io::stdin().lock()))
        }
    }
}

#[cfg(feature = "cli")]
fn read_all(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read from stdin")?;
            Ok(buffer)
        }
    }
}

/// Counts bytes pulled from the wrapped reader.
#[cfg(feature = "cli")]
struct Counted<R> {
    inner: R,
    count: u64,
}

#[cfg(feature = "cli")]
impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(feature = "cli")]
fn convert_command(args: &ConvertArgs, cli: &Cli) -> Result<()> {
    let start_time = std::time::Instant::now();
    let config = pipeline_config(args)?;
    let settings = Settings::global();
    let capability: Arc<dyn EncodingCapability> = Arc::new(EncodingRsCapability::new());
    let filter_names: Vec<String> = config.filters.iter().map(ToString::to_string).collect();
    info!(filters = %filter_names.join("|"), chunk_size = config.chunk_size.0, "starting conversion");

    let (bytes_read, bytes_written) =
        settings.run_scoped(config.overrides(&settings), || -> Result<(u64, u64)> {
            let chain = config
                .build_chain(Arc::clone(&capability), Arc::clone(&settings))
                .context("Failed to build filter chain")?;

            let mut input = Counted {
                inner: open_input(args.input.as_deref())?,
                count: 0,
            };
            let mut reader = FilterReader::with_chunk_size(&mut input, chain, config.chunk_size.0);

            let written = match args.output {
                Some(ref path) => {
                    let file = File::create(path).with_context(|| {
                        format!("Failed to create output file: {}", path.display())
                    })?;
                    let mut writer = BufWriter::new(file);
                    let n = io::copy(&mut reader, &mut writer).context("Conversion failed")?;
                    writer
                        .flush()
                        .with_context(|| format!("Failed to write output file: {}", path.display()))?;
                    n
                }
                None => {
                    let mut writer = BufWriter::new(io::stdout().lock());
                    let n = io::copy(&mut reader, &mut writer).context("Conversion failed")?;
                    writer.flush().context("Failed to write to stdout")?;
                    n
                }
            };
            drop(reader);
            Ok((input.count, written))
        })?;

    let processing_time = start_time.elapsed();
    debug!(bytes_read, bytes_written, elapsed = ?processing_time, "conversion finished");

    match cli.format {
        OutputFormat::Json => {
            let result = ConversionResult {
                success: true,
                filters: filter_names,
                bytes_read,
                bytes_written,
                processing_time_ms: processing_time.as_millis() as u64,
            };
            eprintln!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            if cli.verbose || args.output.is_some() {
                eprintln!(
                    "✓ Converted {} bytes -> {} bytes in {:?}",
                    bytes_read, bytes_written, processing_time
                );
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn detect_command(args: &DetectArgs, cli: &Cli) -> Result<()> {
    let mut input = open_input(args.input.as_deref())?;
    let mut sample = Vec::with_capacity(args.sample_size);
    (&mut input)
        .take(args.sample_size as u64 + 1)
        .read_to_end(&mut sample)
        .context("Failed to read input")?;
    // one extra byte tells whether the sample is the whole input
    let is_final = sample.len() <= args.sample_size;
    sample.truncate(args.sample_size);

    let candidates = args
        .candidates
        .clone()
        .unwrap_or_else(|| DEFAULT_DETECTION_ORDER.to_vec());
    let detector = EncodingDetector::with_sample_size(args.sample_size);
    let result = detector.detect(&sample, &candidates, is_final);

    match cli.format {
        OutputFormat::Json => {
            let scores: Vec<_> = result
                .iter()
                .flat_map(|r| r.candidates.iter())
                .map(|(encoding, score)| {
                    serde_json::json!({
                        "encoding": encoding.name(),
                        "score": score
                    })
                })
                .collect();
            let json = serde_json::json!({
                "detected_encoding": result.as_ref().map(|r| r.encoding.name()),
                "score": result.as_ref().map(|r| r.score()),
                "sample_size": sample.len(),
                "complete": is_final,
                "candidates": scores
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            match result {
                Some(ref r) => println!("Detected encoding: {}", r.encoding.name()),
                None => println!("✗ No candidate decodes the input"),
            }
            println!("Sample size: {} bytes", sample.len());

            if let Some(ref r) = result {
                if args.scores {
                    println!("\nCandidates (lower is better):");
                    for (encoding, score) in &r.candidates {
                        println!("  {:12} {}", encoding.name(), score);
                    }
                }
            }
        }
    }

    if result.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn family_label(family: EncodingFamily) -> &'static str {
    match family {
        EncodingFamily::Utf8 => "utf8",
        EncodingFamily::LegacyJapaneseVariableWidth => "japanese",
        EncodingFamily::Other => "other",
    }
}

#[cfg(feature = "cli")]
fn list_command(args: &ListArgs, cli: &Cli) -> Result<()> {
    let encodings: Vec<Encoding> = Encoding::ALL
        .iter()
        .copied()
        .filter(|encoding| {
            if let Some(ref family) = args.family {
                if !family_label(encoding.family()).eq_ignore_ascii_case(family) {
                    return false;
                }
            }
            if args.ascii_compatible && !encoding.is_ascii_compatible() {
                return false;
            }
            if args.multibyte && !encoding.is_multibyte() {
                return false;
            }
            true
        })
        .collect();

    match cli.format {
        OutputFormat::Json => {
            let info: Vec<_> = encodings
                .iter()
                .map(|encoding| {
                    serde_json::json!({
                        "name": encoding.name(),
                        "family": family_label(encoding.family()),
                        "aliases": encoding.aliases(),
                        "ascii_compatible": encoding.is_ascii_compatible(),
                        "multibyte": encoding.is_multibyte(),
                        "has_bom": encoding.bom().is_some()
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            println!("Supported Encodings ({} total):", encodings.len());
            println!();

            for encoding in encodings {
                println!(
                    "{:15} {:10} {}",
                    encoding.name(),
                    format!("[{}]", family_label(encoding.family())),
                    if encoding.is_multibyte() { "multibyte" } else { "single-byte" }
                );

                if args.details {
                    if !encoding.aliases().is_empty() {
                        println!("                Aliases: {}", encoding.aliases().join(", "));
                    }
                    println!(
                        "                ASCII Compatible: {}",
                        if encoding.is_ascii_compatible() { "Yes" } else { "No" }
                    );
                    if let Some(bom) = encoding.bom() {
                        println!("                BOM: {:02X?}", bom);
                    }
                    println!();
                }
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn validate_command(args: &ValidateArgs, cli: &Cli) -> Result<()> {
    let data = read_all(args.input.as_deref())?;
    let valid = EncodingRsCapability::new().is_valid(&data, args.encoding);

    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "encoding": args.encoding.name(),
                "valid": valid,
                "size": data.len()
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if valid {
                println!("✓ Input is valid {}", args.encoding.name());
            } else {
                println!("✗ Input is not valid {}", args.encoding.name());
            }
        }
    }

    std::process::exit(if valid { 0 } else { 1 });
}
