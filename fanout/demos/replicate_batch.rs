//! Run a batch of simulation replicates as worker processes.
//!
//! The demo binary plays both roles: run without arguments it schedules the
//! batch, re-executing itself with the `worker` subcommand for every job.
//! Press Ctrl+C mid-run to see live workers killed and their partial outputs
//! removed.
//!
//! ```text
//! RUST_LOG=fanout=debug cargo run --example replicate_batch -- [replicates] [concurrency]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fanout::*;
use tracing_subscriber::EnvFilter;

const WORKER_SUBCOMMAND: &str = "worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some(WORKER_SUBCOMMAND) {
        return run_worker(&args[2..]).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fanout=info")),
        )
        .init();

    let replicates: u32 = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(12);
    let concurrency: usize = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(4);

    let out_dir = std::env::temp_dir().join("fanout-replicate-demo");
    std::fs::create_dir_all(&out_dir)?;

    let template = SimulationReplicate::new(
        out_dir.join("bulltrout.conf"),
        vec![out_dir.join("bulltrout.lt")],
        out_dir.join("params.txt"),
        out_dir.join("bulltrout"),
    );
    let queue: JobQueue<AnalysisJob> =
        template.replicates(replicates).into_iter().collect();

    let bus = Arc::new(InProcEventBus::new(256));
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.payload {
                RunEventPayload::Dispatched { sequence, live, .. } => {
                    println!("  dispatched #{sequence} ({live} live)");
                }
                RunEventPayload::Finished { sequence, status, .. } => {
                    println!("  finished   #{sequence}: {status}");
                }
                RunEventPayload::CancellationObserved { live, undispatched } => {
                    println!("  cancelling: {live} live, {undispatched} never started");
                }
                _ => {}
            }
        }
    });

    let scheduler = SchedulerBuilder::<AnalysisJob>::new()
        .with_invoker(Arc::new(
            WorkerBinaryInvoker::current_exe(WORKER_SUBCOMMAND)?.quiet(),
        ))
        .with_events(bus as Arc<dyn EventPublisher>)
        .build()?;

    let signal = CancellationSignal::new();
    let ctrl_c = cancel_on_ctrl_c(signal.clone());

    println!(
        "Running {replicates} replicates, {concurrency} at a time, into {}",
        out_dir.display()
    );
    let config = RunConfig::new(concurrency).with_kill_grace(2_000);
    let report = scheduler.run(queue, &config, &signal).await;
    ctrl_c.abort();

    println!();
    println!("Outcome:      {:?}", report.outcome);
    println!("Succeeded:    {}", report.succeeded());
    println!("Killed:       {}", report.killed());
    println!("Never run:    {}", report.undispatched.len());
    println!("Peak workers: {}", report.peak_live);
    println!("Removed:      {} files", report.cleanup.removed.len());
    for warning in &report.cleanup.warnings {
        println!("Warning:      {warning}");
    }

    Ok(())
}

/// Worker side: decode the job and write its outputs slowly, so an
/// interrupted run leaves partial files behind.
async fn run_worker(args: &[String]) -> anyhow::Result<()> {
    let invocation = WorkerInvocation::<AnalysisJob>::parse(args.iter().cloned())?;
    let AnalysisJob::SimulationReplicate(job) = &invocation.job else {
        anyhow::bail!("this demo only runs simulation replicates");
    };

    for suffix in SIMULATION_REPLICATE_SUFFIXES {
        if *suffix == "conf" && !job.writes_batch_config() {
            continue;
        }
        write_output(job.output_prefix(), suffix, job.replicate_number())?;
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    Ok(())
}

fn write_output(prefix: &Path, suffix: &str, replicate: u32) -> std::io::Result<()> {
    let mut path = prefix.as_os_str().to_owned();
    path.push(suffix);
    std::fs::write(path, format!("replicate {replicate}\n"))
}
