use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic sqlite-scheduler simulator")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Submissions generated per iteration.
    #[arg(long, default_value_t = 64)]
    pub(crate) steps: usize,
    #[arg(long, default_value_t = 4)]
    pub(crate) worker_threads: usize,
    #[arg(long, default_value_t = 0.25)]
    pub(crate) exclusive_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) wait_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) scope_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) toggle_rate: f64,
    #[arg(long, default_value_t = 200)]
    pub(crate) max_hold_us: u64,
    /// Replay a plan file instead of generating workloads.
    #[arg(long)]
    pub(crate) plan: Option<PathBuf>,
    /// Write the failing plan here.
    #[arg(long)]
    pub(crate) dump_plan: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) steps: usize,
    pub(crate) worker_threads: usize,
    pub(crate) exclusive_rate: f64,
    pub(crate) wait_rate: f64,
    pub(crate) scope_rate: f64,
    pub(crate) toggle_rate: f64,
    pub(crate) max_hold_us: u64,
    pub(crate) plan: Option<PathBuf>,
    pub(crate) dump_plan: Option<PathBuf>,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            duration_ms: args
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            steps: args.steps.max(1),
            worker_threads: args.worker_threads.max(1),
            exclusive_rate: clamp_rate(args.exclusive_rate),
            wait_rate: clamp_rate(args.wait_rate),
            scope_rate: clamp_rate(args.scope_rate),
            toggle_rate: clamp_rate(args.toggle_rate),
            max_hold_us: args.max_hold_us,
            plan: args.plan,
            dump_plan: args.dump_plan,
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(200);
        self.duration_ms = None;
        self.steps = 32;
        self.worker_threads = 2;
        self.max_hold_us = 50;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(5_000);
        self.duration_ms = None;
        self.steps = 256;
        self.worker_threads = 8;
        self.exclusive_rate = 0.35;
        self.wait_rate = 0.08;
        self.scope_rate = 0.08;
        self.toggle_rate = 0.04;
        self.max_hold_us = 500;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}
