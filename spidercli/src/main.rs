use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::Rng;

use spidercli::miner::{self, MineConfig};
use spidercli::pool::{self, BuildConfig};
use spiderbot::analysis::analyze_seed;
use spiderbot::solver::SearchLimits;

#[derive(Parser)]
#[command(name = "spidercli", version, about = "Spider solitaire solvability and difficulty tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze seeds and print one JSON report per seed
    Analyze {
        /// Seed to analyze; can be repeated
        #[arg(long, required = true)]
        seed: Vec<u64>,
        /// Suit count
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        suits: u8,
        /// Search node limit
        #[arg(long, default_value_t = 200_000)]
        max_nodes: usize,
        /// Search time limit in seconds
        #[arg(long, default_value_t = 2.0)]
        max_seconds: f64,
        /// Search frontier size limit
        #[arg(long, default_value_t = 500_000)]
        max_frontier: usize,
        /// Disable staged widening search
        #[arg(long)]
        single_stage: bool,
        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Scan a seed range in parallel and bucket solved seeds by difficulty
    Pool {
        /// Suit count
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        suits: u8,
        /// Start seed inclusive; a fresh 31-bit random seed when omitted
        #[arg(long)]
        start_seed: Option<u64>,
        /// How many seeds to scan
        #[arg(long)]
        count: u64,
        /// Parallel workers
        #[arg(long)]
        workers: Option<usize>,
        /// Per-seed search time budget
        #[arg(long, default_value_t = 4.0)]
        max_seconds: f64,
        /// Per-seed node budget
        #[arg(long, default_value_t = 1_500_000)]
        max_nodes: usize,
        /// Per-seed frontier budget
        #[arg(long, default_value_t = 800_000)]
        max_frontier: usize,
        /// Disable staged widening search
        #[arg(long)]
        single_stage: bool,
        /// Cap seeds per bucket; 0 means unlimited
        #[arg(long, default_value_t = 0)]
        max_per_bucket: usize,
        /// Log progress every N completed seeds
        #[arg(long, default_value_t = 10)]
        progress_every: usize,
        /// Seconds between atomic checkpoints
        #[arg(long, default_value_t = 60)]
        save_interval_sec: u64,
        /// Output JSON path
        #[arg(long)]
        out: Option<PathBuf>,
        /// Optional raw per-seed JSONL path
        #[arg(long)]
        raw_jsonl: Option<PathBuf>,
        /// Discard previously persisted rows instead of merging
        #[arg(long)]
        overwrite: bool,
    },
    /// Scan seeds serially until enough solvable ones are found
    Mine {
        /// Suit count
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        suits: u8,
        /// Start seed inclusive
        #[arg(long)]
        start_seed: u64,
        /// How many seeds to scan
        #[arg(long)]
        count: u64,
        /// Per-seed solver time limit
        #[arg(long, default_value_t = 10.0)]
        max_seconds: f64,
        /// Per-seed node limit
        #[arg(long, default_value_t = 2_000_000)]
        max_nodes: usize,
        /// Per-seed frontier limit
        #[arg(long, default_value_t = 1_000_000)]
        max_frontier: usize,
        /// Stop early after this many solved seeds
        #[arg(long, default_value_t = 1)]
        target_solved: usize,
        /// Optional output JSONL path
        #[arg(long)]
        jsonl: Option<PathBuf>,
        /// Disable staged widening search
        #[arg(long)]
        single_stage: bool,
    },
}

fn init_logging() {
    let config = simplelog::ConfigBuilder::new()
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let _ = simplelog::TermLogger::init(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            seed,
            suits,
            max_nodes,
            max_seconds,
            max_frontier,
            single_stage,
            pretty,
        } => {
            let limits = SearchLimits {
                max_nodes,
                max_seconds,
                max_frontier,
            };
            for seed in seed {
                let result = analyze_seed(seed, suits, &limits, !single_stage)?;
                let rendered = if pretty {
                    serde_json::to_string_pretty(&result)?
                } else {
                    serde_json::to_string(&result)?
                };
                println!("{rendered}");
            }
        }
        Commands::Pool {
            suits,
            start_seed,
            count,
            workers,
            max_seconds,
            max_nodes,
            max_frontier,
            single_stage,
            max_per_bucket,
            progress_every,
            save_interval_sec,
            out,
            raw_jsonl,
            overwrite,
        } => {
            let start_seed = start_seed.unwrap_or_else(|| {
                let drawn = rand::rng().random_range(0..1u64 << 31);
                log::info!("no --start-seed given, drew {drawn}");
                drawn
            });
            let config = BuildConfig {
                suits,
                start_seed,
                count,
                workers: workers
                    .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
                    .max(1),
                limits: SearchLimits {
                    max_nodes,
                    max_seconds,
                    max_frontier,
                },
                single_stage,
                max_per_bucket,
                progress_every,
                save_interval_sec,
                out: out.unwrap_or_else(|| PathBuf::from(format!("data/seed_pool_{suits}s.json"))),
                raw_jsonl,
                overwrite,
            };
            pool::run_build(&config)?;
        }
        Commands::Mine {
            suits,
            start_seed,
            count,
            max_seconds,
            max_nodes,
            max_frontier,
            target_solved,
            jsonl,
            single_stage,
        } => {
            let config = MineConfig {
                suits,
                start_seed,
                count,
                limits: SearchLimits {
                    max_nodes,
                    max_seconds,
                    max_frontier,
                },
                target_solved,
                single_stage,
                jsonl,
            };
            miner::run_mine(&config)?;
        }
    }
    Ok(())
}
