use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use droidcheck::adb::{AaptApkReader, AdbBridge};
use droidcheck::backend::MoodleBackend;
use droidcheck::bus::InMemoryBus;
use droidcheck::cache::FileCache;
use droidcheck::config::{CoordinatorConfig, WorkerConfig};
use droidcheck::coordinator::{ResultReconciler, Synchronizer};
use droidcheck::devices::DevicePool;
use droidcheck::gradle::GradleRunner;
use droidcheck::store::InMemoryRecordStore;
use droidcheck::worker::{CheckWorker, SubmissionChecker};

#[derive(Parser, Debug)]
#[command(name = "droidcheck")]
#[command(version)]
#[command(about = "Automated grading of Android programming assignments")]
struct Args {
    /// Base URL of the backend (Moodle-style webservice endpoint)
    #[arg(long)]
    backend_url: String,

    /// Webservice token for the backend
    #[arg(long, env = "DROIDCHECK_BACKEND_TOKEN")]
    backend_token: String,

    /// Directory for the content-addressed file cache
    #[arg(long, default_value = "/var/cache/droidcheck")]
    cache_dir: PathBuf,

    /// Device serials available to the worker (comma-separated)
    #[arg(long, value_delimiter = ',')]
    devices: Vec<String>,

    /// Parallel test attempts per job
    #[arg(long, default_value = "3")]
    parallel_tests: usize,

    /// Bus topic / checker system name this worker serves
    #[arg(long, default_value = "android")]
    topic: String,

    /// ANDROID_SDK_ROOT exported to gradle builds
    #[arg(long, env = "ANDROID_SDK_ROOT")]
    android_sdk_root: Option<PathBuf>,

    /// Path to the adb executable
    #[arg(long, default_value = "adb")]
    adb: PathBuf,

    /// Path to the aapt executable
    #[arg(long, default_value = "aapt")]
    aapt: PathBuf,

    /// Backend polling interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let worker_config = WorkerConfig {
        checker_topic: args.topic.clone(),
        simultaneous_tests: args.parallel_tests,
        device_serials: args.devices.clone(),
        android_sdk_root: args.android_sdk_root.clone(),
        adb_path: args.adb.clone(),
        aapt_path: args.aapt.clone(),
    };
    worker_config.validate()?;

    let coordinator_config = CoordinatorConfig {
        poll_interval_ms: args.poll_interval_ms,
        ..Default::default()
    };

    let cache = FileCache::new(&args.cache_dir)?;
    let backend = Arc::new(MoodleBackend::new(&args.backend_url, args.backend_token));
    let store = Arc::new(InMemoryRecordStore::new());
    let bus = Arc::new(InMemoryBus::new());

    let checker = Arc::new(SubmissionChecker::new(
        GradleRunner::new(worker_config.android_sdk_root.clone()),
        DevicePool::new(worker_config.device_serials.clone()),
        Arc::new(AdbBridge::new(worker_config.adb_path.clone())),
        Arc::new(AaptApkReader::new(worker_config.aapt_path.clone())),
        cache.clone(),
        worker_config.simultaneous_tests,
    )?);

    let synchronizer = Synchronizer::new(
        backend.clone(),
        store.clone(),
        bus.clone(),
        cache.clone(),
        coordinator_config.clone(),
    );
    let reconciler = Arc::new(ResultReconciler::new(
        bus.clone(),
        store.clone(),
        backend.clone(),
        coordinator_config,
    ));
    let worker = CheckWorker::new(bus.clone(), checker, worker_config.checker_topic.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not install signal handler");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        });
    }

    tracing::info!(
        devices = args.devices.len(),
        parallel_tests = args.parallel_tests,
        topic = %args.topic,
        "starting coordinator and worker"
    );

    let sync_handle = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { synchronizer.run(cancel).await })
    };
    let reconcile_handle = {
        let reconciler = reconciler.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };
    let status_handle = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { reconciler.run_status_relay(cancel).await })
    };
    let worker_handle = {
        let cancel = shutdown.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let _ = tokio::join!(sync_handle, reconcile_handle, status_handle, worker_handle);
    tracing::info!("droidcheck stopped");
    Ok(())
}
