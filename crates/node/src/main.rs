use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use cortex_core::{ConfigMap, Graph, ModelGraph, Precision};
use cortex_dispatch::{classify, AutoDispatcher, CapabilityLookup, DeviceSelector, SlotKind};

mod config;

use config::DeviceEnvironment;

#[derive(Parser)]
#[command(name = "cortex-auto")]
#[command(about = "CortexOS AUTO device - pick an accelerator and compile on it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Device environment file (JSON)
    #[arg(short, long)]
    env: Option<PathBuf>,

    /// Per-request setting, repeatable: --config AUTO_DEVICE_LIST=CPU,GPU.0
    #[arg(short, long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// Graph description (JSON)
    #[arg(short, long, conflicts_with = "path")]
    graph: Option<PathBuf>,

    /// Model file, compiled by path without inspecting it
    #[arg(short, long)]
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available devices with their tier and capabilities
    Devices,
    /// Choose a device without compiling anything
    Select {
        /// FP32, FP16 or INT8; omit for an unconstrained pick
        #[arg(long)]
        precision: Option<Precision>,
    },
    /// Classify a graph's dominant precision
    Classify {
        #[arg(short, long)]
        graph: PathBuf,
    },
    /// Dispatch a model and wait for the compile slots
    Load {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Operations of a graph the device pool supports
    Query {
        #[arg(short, long)]
        graph: PathBuf,
    },
    /// Read a dispatcher metric
    Metric { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let env = DeviceEnvironment::resolve(cli.env)?;
    let catalog = env.build_catalog();
    let dispatcher = AutoDispatcher::with_catalog(Arc::clone(&catalog))
        .with_tier_table(env.tier_table());
    dispatcher.set_config(&env.config)?;

    let request = ConfigMap::from_pairs(&cli.config)?;

    match cli.command {
        Commands::Devices => {
            let full_config = cortex_core::merge(&dispatcher.config(), &request);
            let devices = catalog.list_devices(&full_config)?;
            let selector = DeviceSelector::new(dispatcher.tier_table(), catalog.as_ref());
            let partition = selector.partition(&devices);
            for device in &devices {
                let tier = partition
                    .tier_of(device)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unclassified".to_string());
                match catalog.capabilities_of(device) {
                    Ok(manifest) => println!("{:<12} {:<24} {}", device, tier, manifest.summary()),
                    Err(e) => println!("{:<12} {:<24} unavailable: {}", device, tier, e),
                }
            }
        }
        Commands::Select { precision } => {
            let full_config = cortex_core::merge(&dispatcher.config(), &request);
            let devices = catalog.list_devices(&full_config)?;
            let selected = dispatcher.select(&devices, precision)?;
            println!("{}", selected);
        }
        Commands::Classify { graph } => {
            let graph = read_graph(&graph)?;
            println!("{}", classify(&graph));
        }
        Commands::Load { model } => {
            let workload = match (model.graph, model.path) {
                (Some(graph), _) => {
                    let graph: Arc<dyn ModelGraph> = Arc::new(read_graph(&graph)?);
                    dispatcher.load_from_graph(graph, &request).await?
                }
                (None, Some(path)) => dispatcher.load_from_path(path, &request).await?,
                (None, None) => dispatcher.load_from_path(PathBuf::new(), &request).await?,
            };

            for slot in workload.slots() {
                match slot.wait().await {
                    Ok(model) => info!(
                        slot = %slot.kind(),
                        device = %slot.device(),
                        model = model.model_name(),
                        "Slot ready"
                    ),
                    Err(e) => warn!(slot = %slot.kind(), error = %e, "Slot failed"),
                }
            }

            let serving = workload.settle().await?;
            let accelerator = match workload.slot(SlotKind::Accelerator) {
                Ok(slot) => slot.device().to_string(),
                Err(_) => "none".to_string(),
            };
            println!(
                "workload {} served by {} (accelerator {}, perf_count={})",
                workload.id(),
                serving.device(),
                accelerator,
                workload.perf_count()
            );
        }
        Commands::Query { graph } => {
            let graph = read_graph(&graph)?;
            let supported = dispatcher.query(&graph, &request)?;
            for op in graph.ordered_ops() {
                let owner = supported.get(&op.name).map(String::as_str).unwrap_or("-");
                println!("{:<24} {:<24} {}", op.name, op.type_name, owner);
            }
        }
        Commands::Metric { name } => {
            let value = dispatcher.get_metric(&name, &request)?;
            println!("{}", value);
        }
    }

    Ok(())
}

fn read_graph(path: &Path) -> Result<Graph, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    let graph = Graph::from_json(&json)?;
    info!(graph = graph.name(), ops = graph.ordered_ops().len(), "Read graph");
    Ok(graph)
}
