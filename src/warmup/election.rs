//! Choosing the node that receives pre-staged images.
//!
//! Election is deterministic: candidates are sorted by name and the first
//! one wins, so repeated runs against the same topology agree.

use std::fmt;

use crate::collab::ClusterManager;
use crate::{klog, klog_debug, Error, Result};

/// Marker label set on the elected node.
pub const WARMUP_TARGET_LABEL: &str = "kindlab.io/warmup-target";
pub const ACCELERATOR_SELECTOR: &str = "kindlab.io/accelerator=gpu";
pub const WORKER_SELECTOR: &str = "node-role.kubernetes.io/worker";
/// Taint that keeps workloads off a single-node cluster's only node.
pub const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    SingleNode,
    MultiNodeGpu,
    MultiNodeCpu,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::SingleNode => write!(f, "single-node"),
            Topology::MultiNodeGpu => write!(f, "multi-node-gpu"),
            Topology::MultiNodeCpu => write!(f, "multi-node-cpu"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectedNode {
    pub name: String,
    pub topology: Topology,
}

/// Pure election over already-fetched node lists.
///
/// `candidates` are the nodes carrying the label required by the topology;
/// they are ignored for single-node clusters.
pub fn choose(nodes: &[String], candidates: &[String], gpu: bool) -> Result<ElectedNode> {
    match nodes.len() {
        0 => Err(Error::election("no nodes found")),
        1 => Ok(ElectedNode {
            name: nodes[0].clone(),
            topology: Topology::SingleNode,
        }),
        _ => {
            let mut sorted: Vec<&String> = candidates.iter().collect();
            sorted.sort();
            let topology = if gpu {
                Topology::MultiNodeGpu
            } else {
                Topology::MultiNodeCpu
            };
            match sorted.first() {
                Some(name) => Ok(ElectedNode {
                    name: (*name).clone(),
                    topology,
                }),
                None if gpu => Err(Error::election("no accelerator node found")),
                None => Err(Error::election("no worker node found")),
            }
        }
    }
}

/// Elect a node, lift the single-node taint if needed, and label it.
pub async fn elect_node(cluster: &dyn ClusterManager, gpu: bool) -> Result<ElectedNode> {
    let nodes = cluster.node_names().await?;
    let candidates = if nodes.len() > 1 {
        let selector = if gpu {
            ACCELERATOR_SELECTOR
        } else {
            WORKER_SELECTOR
        };
        cluster.nodes_by_label(selector).await?
    } else {
        Vec::new()
    };
    klog_debug!(
        "elect_node nodes={:?} candidates={:?} gpu={}",
        nodes,
        candidates,
        gpu
    );

    let elected = choose(&nodes, &candidates, gpu)?;

    if elected.topology == Topology::SingleNode {
        cluster.remove_taint(&elected.name, CONTROL_PLANE_TAINT).await?;
    }
    cluster
        .label_node(&elected.name, WARMUP_TARGET_LABEL, "true")
        .await?;

    klog!("Elected node {} ({})", elected.name, elected.topology);
    Ok(elected)
}
