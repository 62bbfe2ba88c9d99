//! Block-device emulation benchmark CLI.
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use blockbench::cpu::MonitoredProcess;
use blockbench::guest::SshGuest;
use blockbench::logging::init_logging;
use blockbench::metrics::LogSink;
use blockbench::{FioMode, Trial, TrialParams};

#[derive(Parser)]
#[command(name = "blockbench", about = "Block-device emulation benchmark for a VMM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trial against a guest block device
    Run {
        /// SSH target of the guest, e.g. root@172.16.0.2
        #[arg(long, env = "BLOCKBENCH_SSH_HOST")]
        ssh_host: String,

        /// SSH identity file
        #[arg(long, env = "BLOCKBENCH_IDENTITY_FILE")]
        identity_file: Option<PathBuf>,

        /// Target block device name inside the guest
        #[arg(long, default_value = "vdb")]
        device: String,

        /// fio access pattern
        #[arg(long, value_enum, default_value_t = FioMode::RandRead)]
        mode: FioMode,

        /// I/O block size in bytes
        #[arg(long, default_value_t = 4096)]
        block_size: u32,

        /// Device size in MiB
        #[arg(long, default_value_t = 2048)]
        device_size_mib: u64,

        /// Worker count; one fio job pinned per guest vCPU
        #[arg(long, default_value_t = 1)]
        workers: u32,

        /// Warmup excluded from measurement
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        warmup: Duration,

        /// Total workload runtime, warmup included
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        runtime: Duration,

        /// Bandwidth log and CPU sample cadence in milliseconds
        #[arg(long, default_value_t = 1000)]
        log_interval_ms: u64,

        /// PID of the monitored VMM process on the host
        #[arg(long, env = "BLOCKBENCH_VMM_PID")]
        pid: u32,

        /// Thread group for CPU attribution, `name=comm-prefix`;
        /// repeatable. Defaults to one `vmm` group covering all threads.
        #[arg(long = "thread-group")]
        thread_groups: Vec<String>,

        /// Local directory for retrieved fio logs
        #[arg(long, default_value = "fio_output")]
        artifact_dir: PathBuf,

        /// Skip the host-side cache flush (needs root otherwise)
        #[arg(long)]
        no_host_flush: bool,

        /// Report output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    match cli.command {
        Commands::Run {
            ssh_host,
            identity_file,
            device,
            mode,
            block_size,
            device_size_mib,
            workers,
            warmup,
            runtime,
            log_interval_ms,
            pid,
            thread_groups,
            artifact_dir,
            no_host_flush,
            format,
        } => {
            let params = TrialParams::new(mode, block_size, workers)
                .with_device_size_mib(device_size_mib)
                .with_warmup_secs(warmup.as_secs())
                .with_runtime_secs(runtime.as_secs())
                .with_log_interval_ms(log_interval_ms);

            let mut guest = SshGuest::new(ssh_host);
            if let Some(identity) = identity_file {
                guest = guest.with_identity_file(identity);
            }

            let process = monitored_process(pid, &thread_groups)?;
            let trial = Trial::new(params, device, artifact_dir).flush_host(!no_host_flush);

            let mut sink = LogSink::new();
            let report = trial.run(&guest, &process, &mut sink).await?;

            info!(run_id = %report.run_id, "benchmark complete");
            let output = match format {
                OutputFormat::Json => serde_json::to_string(&report)?,
                OutputFormat::Pretty => serde_json::to_string_pretty(&report)?,
            };
            println!("{output}");
        }
    }

    Ok(())
}

/// Build the monitored-process handle from `name=comm-prefix` specs.
fn monitored_process(pid: u32, specs: &[String]) -> Result<MonitoredProcess> {
    let mut process = MonitoredProcess::new(pid);
    if specs.is_empty() {
        return Ok(process.with_group("vmm", ""));
    }
    for spec in specs {
        let (name, prefix) = spec
            .split_once('=')
            .with_context(|| format!("invalid thread group spec `{spec}`, expected name=prefix"))?;
        process = process.with_group(name, prefix);
    }
    Ok(process)
}
