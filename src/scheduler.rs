use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::models::ResourceInfo;

/// Metric the scheduler minimises when choosing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  TaskCount,
  CpuUsage,
  MemUsage,
  LoadUsage,
}

impl Strategy {
  fn metric(&self, info: &ResourceInfo) -> f64 {
    match self {
      Strategy::TaskCount => info.task_count as f64,
      Strategy::CpuUsage => info.cpu_usage,
      Strategy::MemUsage => info.memory_usage,
      Strategy::LoadUsage => info.load_usage,
    }
  }
}

impl FromStr for Strategy {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "taskCount" => Ok(Strategy::TaskCount),
      "cpuUsage" => Ok(Strategy::CpuUsage),
      "memUsage" => Ok(Strategy::MemUsage),
      "loadUsage" => Ok(Strategy::LoadUsage),
      other => Err(anyhow!("unknown schedule strategy {other:?}")),
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Strategy::TaskCount => "taskCount",
      Strategy::CpuUsage => "cpuUsage",
      Strategy::MemUsage => "memUsage",
      Strategy::LoadUsage => "loadUsage",
    };
    f.write_str(name)
  }
}

/// Picks the node with the smallest metric. Ties go to the lexicographically
/// smallest node name so the choice is reproducible. `None` means no worker.
pub fn select_node(snapshot: &HashMap<String, ResourceInfo>, strategy: Strategy) -> Option<String> {
  snapshot
    .iter()
    .min_by(|(a_name, a), (b_name, b)| {
      strategy
        .metric(a)
        .total_cmp(&strategy.metric(b))
        .then_with(|| a_name.cmp(b_name))
    })
    .map(|(name, _)| name.clone())
}

/// Same ordering as `select_node`, exposed for callers that rank nodes.
pub fn compare(strategy: Strategy, a: (&str, &ResourceInfo), b: (&str, &ResourceInfo)) -> Ordering {
  strategy
    .metric(a.1)
    .total_cmp(&strategy.metric(b.1))
    .then_with(|| a.0.cmp(b.0))
}
