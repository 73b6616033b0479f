mod args;
mod driver;
mod generation;
mod logging;
mod oracle;
mod plan;

use std::time::Instant;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

use crate::args::{Args, SimConfig};
use crate::driver::run_plan;
use crate::generation::generate_plan;
use crate::logging::{EventLog, LogWriter};
use crate::plan::Plan;

fn main() {
    let args = Args::parse();
    let config = SimConfig::from_args(args);
    let writer = LogWriter::new(config.log.clone()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .unwrap_or_else(|err| {
            eprintln!("failed to build tokio runtime: {err}");
            std::process::exit(1);
        });

    if let Err(reason) = runtime.block_on(run(&config)) {
        tracing::error!("{reason}");
        std::process::exit(1);
    }
}

async fn run(config: &SimConfig) -> Result<(), String> {
    let mut events = EventLog::new(config.first_steps, config.tail_steps);

    if let Some(path) = &config.plan {
        let plan = Plan::from_json_path(path)?;
        return run_one(config, &mut events, 0, config.seed, &plan).await;
    }

    let started = Instant::now();
    let max_iterations = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut iteration: u64 = 0;
    while iteration < max_iterations
        && u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX) <= max_time
    {
        let seed = config.seed.wrapping_add(iteration);
        let plan = generate_plan(config, &mut ChaCha8Rng::seed_from_u64(seed));
        run_one(config, &mut events, iteration, seed, &plan).await?;
        iteration += 1;
    }

    tracing::info!(
        "complete: iterations={} time={}ms seed={} steps={}",
        iteration,
        started.elapsed().as_millis(),
        config.seed,
        config.steps
    );
    Ok(())
}

async fn run_one(
    config: &SimConfig,
    events: &mut EventLog,
    iteration: u64,
    seed: u64,
    plan: &Plan,
) -> Result<(), String> {
    match run_plan(plan).await {
        Ok(summary) => {
            events.record(format!(
                "iteration={iteration} seed={seed} submissions={} marks={}",
                summary.submissions, summary.marks
            ));
            Ok(())
        }
        Err(reason) => {
            events.dump_failure(&reason);
            if let Some(path) = &config.dump_plan {
                plan.write_json_path(path)?;
                tracing::error!("failing plan written to {}", path.display());
            }
            Err(format!("iteration {iteration} (seed {seed}) failed"))
        }
    }
}
