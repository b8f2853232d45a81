use std::sync::Arc;

use clap::{Parser, Subcommand};

use kindlab::cancel::CancellationScope;
use kindlab::collab::TierDeployer;
use kindlab::config::LabConfig;
use kindlab::exec::{lab_context, DockerRegistry, Helm, HelmTier, KindCluster, Kubectl};
use kindlab::status::{lab_checks, probe_all};
use kindlab::tiers::{Tier, TierSequencer};
use kindlab::warmup::{start_warmup, TaskResult, WarmupOrchestrator, WarmupResult, WarmupSettings};
use kindlab::{klog, klog_warn, Result};

/// kindlab - tiered local Kubernetes lab with background warmup
#[derive(Parser, Debug)]
#[command(name = "kindlab")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    KINDLAB_DEBUG=1     Same as --debug")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.kindlab/kindlab.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Deploy the lab up to a tier (0=cluster, 1=infrastructure, 2=platform, 3=applications)
    Up {
        #[arg(long, default_value = "3")]
        tier: Tier,

        /// Enable GPU acceleration
        #[arg(long)]
        gpu: bool,

        /// Model to pre-download (e.g. org/name)
        #[arg(long)]
        model: Option<String>,

        /// Container image to pre-stage on the elected node
        #[arg(long)]
        image: Option<String>,
    },

    /// Run the warmup tasks on their own and wait for them
    Warmup,

    /// Probe nodes, host services and releases
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    kindlab::log::init_with_debug(cli.debug);
    if cli.debug {
        if let Some(path) = kindlab::log::log_path() {
            eprintln!("Debug log: {}", path.display());
        }
    }

    let mut config = LabConfig::load()?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Up {
            tier,
            gpu,
            model,
            image,
        } => {
            config.gpu |= gpu;
            if model.is_some() {
                config.model = model;
            }
            if image.is_some() {
                config.warmup_image = image;
            }
            config.validate()?;
            rt.block_on(run_up(config, tier))
        }
        Command::Warmup => rt.block_on(run_warmup(config)),
        Command::Status { json } => rt.block_on(run_status(config, json)),
    }
}

/// Root scope cancelled on Ctrl-C.
fn interruptible_scope() -> CancellationScope {
    let root = CancellationScope::new();
    let scope = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            klog_warn!("Interrupted by user");
            scope.cancel("interrupted by user");
        }
    });
    root
}

async fn run_up(config: LabConfig, target: Tier) -> Result<()> {
    let helm = Helm::new(&config.cluster_name);
    let deployers: [Arc<dyn TierDeployer>; 4] = [
        Arc::new(KindCluster::new()),
        Arc::new(HelmTier::new(helm.clone(), Tier::Infrastructure)),
        Arc::new(HelmTier::new(helm.clone(), Tier::Platform)),
        Arc::new(HelmTier::new(helm, Tier::Applications)),
    ];
    // Below tier 3 warmup never starts; its tools stay unresolved.
    let settings = WarmupSettings::from_config(&config)?;
    let warmup = WarmupOrchestrator::new(lab_context(&config), settings);
    let mut sequencer = TierSequencer::new(deployers, warmup);

    let scope = interruptible_scope();
    println!(
        "Deploying {} through {} (run {})",
        config.cluster_name,
        target,
        sequencer.run_id().short()
    );
    let summary = sequencer.run(&scope, target, &config).await;

    if let Some(result) = sequencer.warmup().result() {
        print_warmup(result);
    }
    let summary = summary?;
    for tier in &summary.completed {
        println!("  done  {}", tier);
    }
    println!("Lab ready");
    Ok(())
}

async fn run_warmup(config: LabConfig) -> Result<()> {
    let scope = interruptible_scope();
    let mut orchestrator = start_warmup(lab_context(&config), &config, &scope)?;
    let joined = orchestrator.join().await;
    if let Some(result) = orchestrator.result() {
        print_warmup(result);
    }
    joined.map(|_| ())
}

async fn run_status(config: LabConfig, json: bool) -> Result<()> {
    let cluster = Arc::new(Kubectl::new(&config.cluster_name));
    let registry = Arc::new(DockerRegistry::new(&config.registry));
    let releases = Arc::new(Helm::new(&config.cluster_name));
    let checks = lab_checks(cluster, registry, releases, &config).await;
    klog!("Status: probing {} checks", checks.len());
    let report = probe_all(checks, config.status_timeout()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    if !report.healthy() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_warmup(result: &WarmupResult) {
    println!("Warmup:");
    if !result.model_warmup_started && !result.image_warmup_started {
        println!("  nothing to warm up");
    }
    for task in [&result.model, &result.image].into_iter().flatten() {
        let subject = match task {
            TaskResult::Model { path, .. } => path.display().to_string(),
            TaskResult::Image { image, .. } => image.clone(),
        };
        println!("  {:<5} {:<40} {:?}", task.task_name(), subject, task.outcome());
    }
}
