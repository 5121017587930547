use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use workgroup::{GroupConfig, Job, Result, TryAddError, WorkerGroup};

mod checksum;

use checksum::fnv1a;

const DEFAULT_JOBS: usize = 256;
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Parser)]
#[command(
    name = "workgroup-bench",
    version,
    about = "Hashes synthetic data blocks on a worker group"
)]
struct Cli {
    /// Number of blocks to hash
    #[arg(long, default_value_t = DEFAULT_JOBS)]
    jobs: usize,

    /// Size of each block in bytes
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_name = "BYTES")]
    block_size: usize,

    /// Worker count (maximum worker count with --adaptive); defaults to the number of CPUs
    #[arg(long)]
    workers: Option<usize>,

    /// Use a load-adaptive worker group
    #[arg(long)]
    adaptive: bool,

    /// Maximum number of queued jobs
    #[arg(long, value_name = "LEN")]
    queue_len: Option<usize>,

    /// Read the group configuration from a JSON file instead
    #[arg(long, value_name = "FILE", conflicts_with_all = ["workers", "adaptive", "queue_len"])]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    info!("workgroup-bench {}", env!("CARGO_PKG_VERSION"));
    info!(
        "{:?} group of {} workers, queue length {:?}",
        config.mode, config.workers, config.max_queue_len
    );

    let group = WorkerGroup::with_config(config)?;
    let checksum = Arc::new(AtomicU64::new(0));
    let mut peak_workers = 0;
    let mut submitted = 0;
    let mut rejected = 0usize;
    let started = Instant::now();

    for index in 0..cli.jobs {
        let checksum = checksum.clone();
        let block_size = cli.block_size;
        let job: Job = Box::new(move || {
            let block = make_block(index, block_size);
            checksum.fetch_xor(fnv1a(&block), Ordering::Relaxed);
        });
        match submit(&group, job) {
            Some(retries) => {
                rejected += retries;
                submitted += 1;
            }
            None => {
                error!("Worker group stopped while submitting job {}", index);
                break;
            }
        }
        peak_workers = peak_workers.max(group.worker_count());
    }

    group.stop();
    group.wait();

    let elapsed = started.elapsed();
    info!(
        "Peak of {} workers, {} rejected submissions retried",
        peak_workers, rejected
    );
    println!(
        "completed {} jobs in {:.3}s, checksum {:016x}, rejected {}",
        submitted,
        elapsed.as_secs_f64(),
        checksum.load(Ordering::Relaxed),
        rejected
    );
    Ok(())
}

/// Builds the group configuration from the command line.
fn resolve_config(cli: &Cli) -> Result<GroupConfig> {
    if let Some(path) = &cli.config {
        return GroupConfig::from_json_file(path);
    }

    let workers = cli.workers.unwrap_or_else(num_cpus::get);
    let mut config = if cli.adaptive {
        GroupConfig::adaptive(workers)
    } else {
        GroupConfig::fixed(workers)
    };
    config = config.with_label("bench");
    config.max_queue_len = cli.queue_len;
    config.validate()?;
    Ok(config)
}

/// Submits a job, retrying while the queue is full. Returns the number
/// of rejections, or `None` if the group stopped.
fn submit(group: &WorkerGroup, mut job: Job) -> Option<usize> {
    let mut rejected = 0;
    loop {
        match group.try_add_boxed(job) {
            Ok(()) => return Some(rejected),
            Err(TryAddError::Full(returned)) => {
                rejected += 1;
                job = returned;
                thread::yield_now();
            }
            Err(TryAddError::Stopped(_)) => return None,
        }
    }
}

/// Deterministic pseudo-random block contents.
fn make_block(index: usize, len: usize) -> Vec<u8> {
    let mut state = (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}
