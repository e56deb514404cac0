//! Upload benchmark binary

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use upload_bench::config::{ApiConfig, CopyConfig, StoreConfig, UploadConfig};
use upload_bench::coordinator::{run_digestion, run_sweep, ApiClient, UploadCoordinator, DEFAULT_COPY_CONCURRENCY};
use upload_bench::plan::{kib, mib};
use upload_bench::report::write_sweep_file;
use upload_bench::runtime::FailurePolicy;
use upload_bench::storage::{PayloadSource, PresignedPutTransfer};
use upload_bench::zarr::{generate_source_files, ZarrClient, ZarrOptions};
use upload_bench::{DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE};

#[derive(Parser)]
#[command(name = "upload-bench")]
#[command(about = "Benchmark multipart uploads through a presigned-URL service", long_about = None)]
struct Cli {
    #[arg(long, global = true, help = "Coordination service root (overrides UPLOAD_API_ROOT)")]
    api_root: Option<String>,

    #[arg(long, global = true, help = "Coordination service API key (overrides UPLOAD_API_KEY)")]
    api_key: Option<String>,

    #[arg(long, global = true, help = "Print transfer metrics in Prometheus text format when done")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one large object part by part
    LargeFile {
        #[arg(long, default_value_t = 10_000_000, help = "Object size in bytes")]
        size: u64,
        #[arg(long, default_value_t = DEFAULT_PART_SIZE, help = "Target part size in bytes")]
        part_size: u64,
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY, help = "Concurrent part uploads")]
        workers: usize,
        #[arg(long, default_value = "000001", help = "Dandiset the object belongs to")]
        dandiset: String,
        #[arg(long, help = "Upload this file instead of random bytes")]
        file: Option<PathBuf>,
        #[arg(long, help = "Host header sent to the object store")]
        host: Option<String>,
        #[arg(long, help = "Stop dispatching parts after the first failure")]
        stop_on_failure: bool,
    },
    /// Upload a directory tree into a zarr archive
    Zarr {
        /// Directory to upload
        #[arg(default_value = "upload")]
        source_dir: PathBuf,
        #[arg(long, help = "Existing zarr archive to upload to")]
        zarr_id: Option<String>,
        #[arg(long, default_value_t = 50, help = "Concurrent file uploads")]
        workers: usize,
        #[arg(long, default_value_t = kib(150), help = "Size of each generated file")]
        part_size: u64,
        #[arg(long, default_value_t = mib(200), help = "Total size of the generated files")]
        total_size: u64,
        #[arg(long, help = "Generate the source files before uploading")]
        generate: bool,
        #[arg(long, help = "Replace an existing source directory when generating")]
        force: bool,
        #[arg(long, help = "Complete the upload after the transfer")]
        complete: bool,
    },
    /// Slice a stored object into per-part objects with server-side copies
    Digest {
        #[arg(long, help = "Bucket holding the source object (overrides S3_BUCKET)")]
        bucket: Option<String>,
        #[arg(long, help = "Key of the source object (overrides S3_SOURCE_KEY)")]
        source_key: Option<String>,
        #[arg(long, help = "S3 endpoint (overrides S3_ENDPOINT)")]
        endpoint: Option<String>,
        #[arg(long, default_value_t = mib(200), help = "Bytes of the source object to digest")]
        total_size: u64,
        #[arg(long, default_value_t = DEFAULT_PART_SIZE, help = "Target part size in bytes")]
        part_size: u64,
        #[arg(long, default_value_t = DEFAULT_COPY_CONCURRENCY, help = "Concurrent copies")]
        workers: usize,
        #[arg(long, help = "Run once per worker count from 1 up to --workers")]
        sweep: bool,
        #[arg(short, long, help = "CSV output of a sweep")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut api = ApiConfig::from_env();
    if let Some(root) = cli.api_root {
        api.api_root = root;
    }
    if let Some(key) = cli.api_key {
        api.api_key = Some(key);
    }

    match cli.command {
        Commands::LargeFile {
            size,
            part_size,
            workers,
            dandiset,
            file,
            host,
            stop_on_failure,
        } => {
            let mut store = StoreConfig::default();
            if let Some(host) = host {
                store = store.with_header("host", host);
            }

            let (payload, size) = match file {
                Some(path) => {
                    let len = tokio::fs::metadata(&path)
                        .await
                        .with_context(|| format!("cannot read {}", path.display()))?
                        .len();
                    (PayloadSource::FileRange(path), len)
                }
                None => (PayloadSource::Random, size),
            };

            let policy = if stop_on_failure {
                FailurePolicy::StopDispatch
            } else {
                FailurePolicy::Drain
            };
            let config = UploadConfig {
                part_size,
                dandiset,
                ..Default::default()
            }
            .with_concurrency(workers)
            .with_failure_policy(policy);

            let service = ApiClient::new(&api, &store)?;
            let factory = || PresignedPutTransfer::new(&store, payload.clone());
            let coordinator = UploadCoordinator::new(service, factory, config);

            info!("Uploading {:.3} MB to {}", size as f64 / 1_000_000.0, api.api_root);
            let report = coordinator.upload(size).await?;

            info!("Upload {} finished in {} parts", report.upload_id, report.part_count());
            info!("Initialize took {:.4} s", report.timings.initialize.as_secs_f64());
            info!(
                "Transfer took {:.4} s ({})",
                report.timings.transfer.as_secs_f64(),
                report.transfer_throughput()
            );
            info!("Completion took {:.4} s", report.timings.complete.as_secs_f64());
            info!("Store completion took {:.4} s", report.timings.post_complete.as_secs_f64());
            info!(
                "Total time taken: {:.4} s ({})",
                report.timings.total().as_secs_f64(),
                report.total_throughput()
            );
        }

        Commands::Zarr {
            source_dir,
            zarr_id,
            workers,
            part_size,
            total_size,
            generate,
            force,
            complete,
        } => {
            if generate {
                if part_size == 0 {
                    bail!("--part-size must be positive");
                }
                if tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
                    if !force {
                        bail!("{} already exists; pass --force to replace it", source_dir.display());
                    }
                    warn!("Removing {}", source_dir.display());
                    tokio::fs::remove_dir_all(&source_dir)
                        .await
                        .with_context(|| format!("cannot remove {}", source_dir.display()))?;
                }
                generate_source_files(&source_dir, total_size / part_size, part_size as usize).await?;
            }

            let client = ZarrClient::new(&api, StoreConfig::default())?;
            let options = ZarrOptions {
                zarr_id,
                source_dir,
                workers,
                complete,
                ..Default::default()
            };
            let report = client.run(&options).await?;

            info!("Uploaded {} files to {}", report.file_count, report.zarr_id);
            info!("Initialize took {:.4} s", report.initialize.as_secs_f64());
            info!(
                "Upload took {:.4} s ({})",
                report.upload.as_secs_f64(),
                report.upload_throughput()
            );
            if let Some(complete) = report.complete {
                info!("Completion took {:.4} s", complete.as_secs_f64());
            }
            info!(
                "Total time taken: {:.4} s ({})",
                report.total.as_secs_f64(),
                report.total_throughput()
            );
        }

        Commands::Digest {
            bucket,
            source_key,
            endpoint,
            total_size,
            part_size,
            workers,
            sweep,
            output,
        } => {
            let mut copy = CopyConfig::from_env();
            if let Some(bucket) = bucket {
                copy.bucket = bucket;
            }
            if let Some(key) = source_key {
                copy.source_key = key;
            }
            if endpoint.is_some() {
                copy.endpoint = endpoint;
            }
            if copy.source_key.is_empty() {
                bail!("no source object; set --source-key or S3_SOURCE_KEY");
            }

            let config = UploadConfig {
                part_size,
                ..Default::default()
            }
            .with_concurrency(workers);

            if sweep {
                let rows = run_sweep(&copy, config, total_size, workers).await?;
                let path = output.unwrap_or_else(|| {
                    PathBuf::from(format!("benchmark_{}.csv", chrono::Local::now().format("%Y-%m-%dT%H-%M-%S")))
                });
                write_sweep_file(&path, &rows)?;
                info!("Wrote {} rows to {}", rows.len(), path.display());
            } else {
                let report = run_digestion(&copy, config, total_size).await?;
                let summary = report.part_timing_summary();
                info!("Digested {} bytes into {} parts", report.total_size, report.part_count());
                info!("Total time taken: {:.4} s", report.timings.total().as_secs_f64());
                info!("Average total part time: {:.4} s", summary.avg_part.as_secs_f64());
                info!(
                    "Average time spent creating uploads: {:.4} s",
                    summary.avg_create_upload.as_secs_f64()
                );
                info!("Average time spent copying parts: {:.4} s", summary.avg_copy_part.as_secs_f64());
                info!(
                    "Average time spent completing uploads: {:.4} s",
                    summary.avg_complete_upload.as_secs_f64()
                );
            }
        }
    }

    if cli.print_metrics {
        print!("{}", upload_bench::metrics::gather_system_metrics());
    }

    Ok(())
}
