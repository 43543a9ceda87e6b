//! `spyglass instrument`: the build-time half.
//!
//! Reads a JSON topology description, instruments it, and writes the
//! artifacts the deployment and the tests consume.

use anyhow::Context;
use clap::Args;
use spyglass_core::constants::write_constants;
use spyglass_core::instrument::{GraphInstrumenter, Instrumentation, InstrumenterSettings};
use spyglass_core::topology::{Topology, TopologySpec};
use std::path::{Path, PathBuf};

/// Arguments of `spyglass instrument`.
#[derive(Args, Debug)]
pub struct InstrumentArgs {
    /// JSON topology description to instrument
    pub input: PathBuf,

    /// Where to write the routing document read by `spyglass serve`
    #[arg(long, default_value = "./spyglass-routing.json")]
    pub routing_out: PathBuf,

    /// Where to write the instrumented topology description
    #[arg(long)]
    pub topology_out: Option<PathBuf>,

    /// Where to write the generated `SpyEvents` constants
    #[arg(long)]
    pub constants: Option<PathBuf>,

    /// Name of the group holding everything the instrumenter adds
    #[arg(long, default_value = "Spyglass")]
    pub group_name: String,

    /// Live channel address written into every forwarding endpoint
    #[arg(long, env = "SPYGLASS_CHANNEL_ADDRESS", default_value = "ws://127.0.0.1:8080/ws")]
    pub channel_address: String,

    /// Interceptor layer attached to observed functions
    #[arg(long, default_value = "spyglass-interceptor")]
    pub interceptor_layer: String,

    /// Exec wrapper the function runtime runs handlers through
    #[arg(long, default_value = "/opt/spyglass-wrapper")]
    pub exec_wrapper: String,
}

impl From<&InstrumentArgs> for InstrumenterSettings {
    fn from(args: &InstrumentArgs) -> Self {
        Self {
            group_name: args.group_name.clone(),
            channel_address: args.channel_address.clone(),
            interceptor_layer: args.interceptor_layer.clone(),
            exec_wrapper: args.exec_wrapper.clone(),
        }
    }
}

pub fn run(args: &InstrumentArgs) -> anyhow::Result<Instrumentation> {
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read topology {:?}", args.input))?;
    let spec: TopologySpec = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse topology {:?}", args.input))?;
    let topology = Topology::from_spec(&spec)?;

    let instrumenter = GraphInstrumenter::new(InstrumenterSettings::from(args));
    let instrumentation = instrumenter.instrument(topology)?;

    write_json(&args.routing_out, &instrumentation.routing_document())?;
    tracing::info!(path = ?args.routing_out, "Routing document written");

    if let Some(path) = &args.topology_out {
        write_json(path, &instrumentation.topology.to_spec())?;
        tracing::info!(?path, "Instrumented topology written");
    }
    if let Some(path) = &args.constants {
        write_constants(path, instrumentation.service_keys())?;
        tracing::info!(?path, keys = instrumentation.service_keys().len(), "Constants written");
    }
    Ok(instrumentation)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {path:?}"))?;
    Ok(())
}
