use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::channel::{Receiver, Sender, bounded};
use dashmap::DashSet;
use tracing::{debug, error, info, warn};

use crate::analyzer::analyze;
use crate::cancel::CancelToken;
use crate::capture::{PacketSource, SourceKind, spawn_pump};
use crate::config::AnalyzerConfig;
use crate::distributor::{Distributor, WindowOutcome};
use crate::error::{AnalyzerError, Result};
use crate::packet::RawPacket;
use crate::report::HotKeySummary;
use crate::sink::{CommandLog, default_log_path};
use crate::stats::aggregate;
use crate::worker::{ActiveConnections, ShardOutcome, ShardWorker, WorkerSettings};

/// Wall-clock time in microseconds since the Unix epoch
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn spawn_error(name: String) -> impl FnOnce(std::io::Error) -> AnalyzerError {
    move |source| AnalyzerError::Spawn { name, source }
}

/// Run one capture window over `source` and return the ranked summary.
///
/// Blocks until every shard has finished. Cancellation returns the partial
/// summary with `interrupted` set.
pub fn show_hot_keys<S>(
    config: &AnalyzerConfig,
    source: S,
    cancel: &CancelToken,
) -> Result<HotKeySummary>
where
    S: PacketSource + 'static,
{
    config.validate()?;

    let kind = source.kind();
    let started_us = now_us();
    info!(
        "Monitoring port {} on {} for {:.1}s with {} shards ({:?} source)",
        config.monitored_port,
        config.host_ip,
        config.capture_duration.as_secs_f64(),
        config.shard_count,
        kind
    );

    let command_log = match &config.command_log {
        Some(path) => Some(CommandLog::create(path)?),
        None => None,
    };

    let (shard_senders, shard_receivers): (Vec<Sender<RawPacket>>, Vec<Receiver<RawPacket>>) =
        (0..config.shard_count).map(|_| bounded(config.queue_capacity)).unzip();
    let distributor = Distributor::new(config.host_ip, shard_senders, config.capture_duration)?;

    let active: ActiveConnections = Arc::new(DashSet::new());
    let workers = start_shard_workers(
        config,
        shard_receivers,
        &active,
        command_log.as_ref(),
        cancel,
    )?;

    let (packet_tx, packet_rx) = bounded(config.queue_capacity);
    let running = Arc::new(AtomicBool::new(true));
    let pump = spawn_pump(source, packet_tx, running.clone(), cancel.clone())
        .map_err(spawn_error("capture-pump".to_string()))?;

    let report = distributor.run(&packet_rx, cancel);
    let stopped_us = now_us();

    running.store(false, Ordering::Relaxed);
    drop(packet_rx);
    match pump.join() {
        Ok(pump_report) => debug!("Capture pump forwarded {} packets", pump_report.forwarded),
        Err(e) => warn!("Error joining capture pump thread: {:?}", e),
    }

    let mut shards = Vec::with_capacity(workers.len());
    let mut panicked = None;
    for (shard_id, handle) in workers.into_iter().enumerate() {
        match handle.join() {
            Ok(outcome) => shards.push(outcome.stats),
            Err(e) => {
                warn!("Error joining worker thread {}: {:?}", shard_id, e);
                panicked.get_or_insert(shard_id);
            }
        }
    }

    if let Some(log) = command_log {
        log.finish();
    }
    if let Some(shard_id) = panicked {
        return Err(AnalyzerError::WorkerPanicked(shard_id));
    }

    for (shard_id, routed) in report.per_shard.iter().enumerate() {
        debug!("Shard {} received {} packets", shard_id, routed);
    }

    let mut global = aggregate(shards);
    global.unroutable_packets = report.unroutable;
    global.unrelated_packets = report.unrelated;

    match (kind, report.first_packet_us, report.last_packet_us) {
        (SourceKind::Offline, Some(first), Some(last)) => {
            global.monitor_start_us = first;
            global.monitor_end_us = last;
        }
        _ => {
            global.monitor_start_us = started_us;
            global.monitor_end_us = stopped_us;
        }
    }

    let mut summary = analyze(global, config.top_n);
    summary.interrupted = report.outcome == WindowOutcome::Cancelled || cancel.is_cancelled();

    info!(
        "Window closed ({:?}): {} packets routed, {} requests, {} unroutable, {} unrelated",
        report.outcome,
        report.routed,
        summary.total_requests,
        report.unroutable,
        report.unrelated
    );
    Ok(summary)
}

/// Analyze capture files one after another, each as its own window.
///
/// A file that cannot be opened or analyzed is logged and skipped. Only
/// cancellation stops the sequence early. Returns how many files produced
/// a summary.
pub fn analyze_capture_files<S, O, R>(
    config: &AnalyzerConfig,
    files: &[PathBuf],
    write_command_log: bool,
    mut open: O,
    cancel: &CancelToken,
    mut report: R,
) -> usize
where
    S: PacketSource + 'static,
    O: FnMut(&Path) -> Result<S>,
    R: FnMut(&Path, HotKeySummary),
{
    let mut analyzed = 0;

    for file in files {
        if cancel.is_cancelled() {
            info!("Cancelled, skipping remaining capture files");
            break;
        }
        info!("Capture file: {}", file.display());

        let source = match open(file) {
            Ok(source) => source,
            Err(e) => {
                error!("Capture file {} fail: {}", file.display(), e);
                continue;
            }
        };

        let mut file_config = config.clone();
        if write_command_log {
            file_config.command_log = Some(default_log_path(now_us(), config.monitored_port));
        }

        match show_hot_keys(&file_config, source, cancel) {
            Ok(summary) => {
                analyzed += 1;
                report(file, summary);
            }
            Err(e) => error!("Analysis of {} fail: {}", file.display(), e),
        }
    }

    analyzed
}

fn start_shard_workers(
    config: &AnalyzerConfig,
    queues: Vec<Receiver<RawPacket>>,
    active: &ActiveConnections,
    command_log: Option<&CommandLog>,
    cancel: &CancelToken,
) -> Result<Vec<thread::JoinHandle<ShardOutcome>>> {
    let core_ids = if config.pin_workers {
        match core_affinity::get_core_ids() {
            Some(ids) => {
                info!("Detected {} CPU cores for affinity", ids.len());
                Some(Arc::new(ids))
            }
            None => {
                info!("CPU affinity not supported here, continuing without core pinning");
                None
            }
        }
    } else {
        None
    };

    let settings = WorkerSettings::from(config);
    let mut handles = Vec::with_capacity(queues.len());

    for (shard_id, queue) in queues.into_iter().enumerate() {
        let worker = ShardWorker::new(
            shard_id,
            settings.clone(),
            active.clone(),
            command_log.map(CommandLog::recorder),
        );
        let cancel = cancel.clone();
        let core_ids = core_ids.clone();
        let name = format!("shard-{shard_id}");

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Some(cores) = &core_ids {
                    if !cores.is_empty() {
                        let core = cores[shard_id % cores.len()];
                        if core_affinity::set_for_current(core) {
                            debug!("Shard {} pinned to CPU core {}", shard_id, core.id);
                        } else {
                            debug!("Failed to set CPU affinity for shard {}", shard_id);
                        }
                    }
                }
                worker.run(queue, &cancel)
            })
            .map_err(spawn_error(name))?;
        handles.push(handle);
    }

    Ok(handles)
}
