use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::domain::FerryError;
use ferry_core::impls::RasterCodec;
use ferry_core::tasks::{
    BUILTIN_TASKS, BufferReverse, ImageCompress, StringUpper, register_builtin,
};
use ferry_core::{PoolBuilder, PoolConfig, TransferList, WorkerPool};

/// Run the built-in tasks through a worker pool.
#[derive(Debug, Parser)]
#[command(name = "ferry", version)]
struct Args {
    /// Image to reverse and compress.
    #[arg(env = "FERRY_IMAGE")]
    image: PathBuf,

    /// Pool config as JSON; flags below override it.
    #[arg(long, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "FERRY_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "FERRY_TASK_TIMEOUT_MS")]
    task_timeout_ms: Option<u64>,

    #[arg(long, env = "FERRY_SHUTDOWN_TIMEOUT_MS", default_value_t = 5_000)]
    shutdown_timeout_ms: u64,

    /// JPEG quality, 1..=100.
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// How many copies of each task to submit concurrently.
    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

impl Args {
    async fn pool_config(&self) -> Result<PoolConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => PoolConfig::default(),
        };
        if let Some(workers) = self.workers {
            config = config.with_size(workers);
        }
        if let Some(ms) = self.task_timeout_ms {
            config = config.with_task_timeout(Duration::from_millis(ms));
        }
        Ok(config.with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms)))
    }
}

#[derive(Debug, Serialize)]
struct Summary<T: Serialize> {
    task: &'static str,
    index: usize,
    value: T,
    returned_bytes: Option<usize>,
}

fn print_summary<T: Serialize>(summary: &Summary<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn report_failure(task: &str, index: usize, err: &FerryError) {
    match err.as_remote() {
        Some(remote) => tracing::error!(
            task,
            index,
            name = remote.name(),
            message = remote.message(),
            extra = %serde_json::Value::Object(remote.extra().clone()),
            stack = remote.stack().unwrap_or(""),
            "task failed"
        ),
        None => tracing::error!(task, index, error = %err, "task failed"),
    }
}

async fn run_string_upper(pool: &WorkerPool, repeat: usize) -> Result<usize> {
    let calls = (0..repeat).map(|i| {
        let pool = pool.clone();
        tokio::spawn(async move {
            let task = StringUpper {
                message: format!("{i}: Hello World from the main task!"),
            };
            (i, pool.run(&task, TransferList::new()).await)
        })
    });

    let mut failures = 0;
    for call in calls.collect::<Vec<_>>() {
        match call.await? {
            (i, Ok(out)) => print_summary(&Summary {
                task: "string-upper",
                index: i,
                value: out.value,
                returned_bytes: None,
            })?,
            (i, Err(err)) => {
                report_failure("string-upper", i, &err);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

async fn run_buffer_reverse(pool: &WorkerPool, image: &[u8], repeat: usize) -> Result<usize> {
    let calls = (0..repeat).map(|i| {
        let pool = pool.clone();
        let bytes = image.to_vec();
        tokio::spawn(async move {
            let mut transfer = TransferList::new();
            let data = transfer.attach(bytes);
            let task = BufferReverse {
                description: format!("{i}: buffer from image file"),
                data,
            };
            (i, pool.run(&task, transfer).await)
        })
    });

    let mut failures = 0;
    for call in calls.collect::<Vec<_>>() {
        match call.await? {
            (i, Ok(mut out)) => {
                let reversed = out.buffers.take(out.value.data)?;
                print_summary(&Summary {
                    task: "buffer-reverse",
                    index: i,
                    value: out.value,
                    returned_bytes: Some(reversed.len()),
                })?
            }
            (i, Err(err)) => {
                report_failure("buffer-reverse", i, &err);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

async fn run_image_compress(
    pool: &WorkerPool,
    image: &[u8],
    quality: u8,
    repeat: usize,
) -> Result<usize> {
    let calls = (0..repeat).map(|i| {
        let pool = pool.clone();
        let bytes = image.to_vec();
        tokio::spawn(async move {
            let mut transfer = TransferList::new();
            let data = transfer.attach(bytes);
            let task = ImageCompress {
                description: format!("{i}: image file"),
                data,
                quality: Some(quality),
            };
            (i, pool.run(&task, transfer).await)
        })
    });

    let mut failures = 0;
    for call in calls.collect::<Vec<_>>() {
        match call.await? {
            (i, Ok(mut out)) => {
                let compressed = out.buffers.take(out.value.data)?;
                print_summary(&Summary {
                    task: "image-compress",
                    index: i,
                    value: out.value,
                    returned_bytes: Some(compressed.len()),
                })?
            }
            (i, Err(err)) => {
                report_failure("image-compress", i, &err);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.pool_config().await?;
    let shutdown_timeout = config.shutdown_timeout();
    tracing::info!(?config, "starting worker pool");

    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("reading {}", args.image.display()))?;

    let pool = register_builtin(PoolBuilder::new(), Arc::new(RasterCodec::new()))?
        .expect_tasks(&BUILTIN_TASKS)
        .config(config)
        .build()?;

    let mut failures = run_string_upper(&pool, args.repeat).await?;
    failures += run_buffer_reverse(&pool, &image, args.repeat).await?;
    failures += run_image_compress(&pool, &image, args.quality, args.repeat).await?;

    let status = pool.status().await?;
    tracing::info!(
        completed = status.completed,
        failed = status.failed,
        timed_out = status.timed_out,
        protocol_violations = status.protocol_violations,
        "all tasks finished"
    );

    let report = pool.shutdown(shutdown_timeout).await?;
    tracing::info!(?report, "worker pool stopped");

    if failures > 0 {
        anyhow::bail!("{failures} task(s) failed");
    }
    Ok(())
}
