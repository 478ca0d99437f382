use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use redis_hotkey::config::{
    DEFAULT_KEY_TOP, DEFAULT_MAX_KEY_LENGTH, DEFAULT_MONITOR_SECS, DEFAULT_SHARD_COUNT,
};
use redis_hotkey::files::capture_files;
use redis_hotkey::pipeline::{analyze_capture_files, now_us};
use redis_hotkey::sink::default_log_path;
use redis_hotkey::{
    AnalyzerConfig, CancelToken, HotKeySummary, PacketSource, PcapSource, show_hot_keys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "redis-hotkey")]
#[command(about = "Find hot Redis keys and slow commands from live or captured TCP traffic")]
#[command(version = "1.0.0")]
struct Args {
    /// Capture file, or directory of .pcap files, read in offline mode
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// Number of entries kept in each ranked list
    #[arg(short = 'k', long, default_value_t = DEFAULT_KEY_TOP)]
    key_top: usize,

    /// Capture window in seconds
    #[arg(short = 'm', long, default_value_t = DEFAULT_MONITOR_SECS)]
    monitor_time: u64,

    /// Keys longer than this many bytes are truncated
    #[arg(short = 'l', long, default_value_t = DEFAULT_MAX_KEY_LENGTH)]
    max_key_length: usize,

    /// Shard worker threads (0 = one per CPU core)
    #[arg(short = 't', long, default_value_t = DEFAULT_SHARD_COUNT)]
    thread_number: usize,

    /// Write every observed command to <tmp>/<start>_<port>.txt
    #[arg(short = 'w', long)]
    write_file: bool,

    /// Network device for live capture
    #[arg(short = 'd', long, default_value = "eth0")]
    device: String,

    /// IP address of the Redis host
    #[arg(short = 'i', long)]
    ip: IpAddr,

    /// Redis server port
    #[arg(short = 's', long, default_value_t = 6379)]
    port: u16,

    /// Read capture files from --path instead of a live device
    #[arg(short = 'o', long)]
    offline_mode: bool,

    /// BPF filter applied when the capture is opened
    #[arg(long)]
    filter: Option<String>,

    /// Output format of the summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Pin shard workers to CPU cores
    #[arg(long)]
    pin_workers: bool,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<AnalyzerConfig> {
    let mut config = AnalyzerConfig::new(args.port, args.ip);
    config.capture_duration = Duration::from_secs(args.monitor_time);
    config.top_n = args.key_top;
    config.max_key_length = args.max_key_length;
    config.pin_workers = args.pin_workers;
    config.shard_count = if args.thread_number == 0 {
        let cpu_count = num_cpus::get();
        info!("Auto-configuring {} shard workers", cpu_count);
        cpu_count
    } else {
        args.thread_number
    };

    config.validate().context("Invalid arguments")?;
    Ok(config)
}

async fn run_capture<S>(
    mut config: AnalyzerConfig,
    write_file: bool,
    source: S,
    cancel: &CancelToken,
) -> Result<HotKeySummary>
where
    S: PacketSource + 'static,
{
    if write_file {
        config.command_log = Some(default_log_path(now_us(), config.monitored_port));
    }

    let cancel = cancel.clone();
    let summary = tokio::task::spawn_blocking(move || show_hot_keys(&config, source, &cancel))
        .await
        .context("Analysis task failed")??;
    Ok(summary)
}

fn print_summary(summary: &HotKeySummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary.to_snapshot())
                .context("Failed to serialize summary")?;
            println!("{json}");
        }
        OutputFormat::Text => println!("{summary}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down...");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    if args.offline_mode {
        let Some(path) = &args.path else {
            bail!("--path is required in offline mode");
        };
        let files = capture_files(path, "pcap")
            .with_context(|| format!("Failed to list capture files in {}", path.display()))?;
        if files.is_empty() {
            bail!("No .pcap files found in {}", path.display());
        }

        info!("Analyzing {} capture files", files.len());
        let total = files.len();
        let filter = args.filter.clone();
        let format = args.format;
        let write_file = args.write_file;
        let batch_cancel = cancel.clone();
        let analyzed = tokio::task::spawn_blocking(move || {
            analyze_capture_files(
                &config,
                &files,
                write_file,
                |file| PcapSource::offline(file, filter.as_deref()),
                &batch_cancel,
                |file, summary| {
                    if let Err(e) = print_summary(&summary, format) {
                        warn!("Failed to print summary of {}: {}", file.display(), e);
                    }
                },
            )
        })
        .await
        .context("Analysis task failed")?;

        info!("Analyzed {} of {} capture files", analyzed, total);
        if analyzed == 0 && !cancel.is_cancelled() {
            bail!("None of the {} capture files could be analyzed", total);
        }
    } else {
        info!("Device: {}", args.device);
        let source = PcapSource::live(&args.device, args.filter.as_deref())
            .with_context(|| format!("Failed to open device: {}", args.device))?;
        let summary = run_capture(config, args.write_file, source, &cancel).await?;
        print_summary(&summary, args.format)?;
    }

    info!("Redis hot key analysis complete");
    Ok(())
}
