use tracing::debug;

use crate::config::SelectionSettings;
use crate::error::{BalancerError, Result};
use crate::models::NodeStatus;

/// Picks the healthy node with the lowest weighted load.
///
/// Candidates are ordered by address first, so equal scores always resolve
/// to the lexicographically smallest `host:port`.
pub fn select<'a>(nodes: &'a [NodeStatus], settings: &SelectionSettings) -> Result<&'a NodeStatus> {
  if nodes.is_empty() {
    return Err(BalancerError::NoNodesAvailable);
  }

  let mut healthy: Vec<(String, f64, &NodeStatus)> = nodes
    .iter()
    .filter(|node| node.is_healthy)
    .map(|node| {
      let score = settings.score(node.record.gpu_usage, node.record.cpu_usage);
      (node.record.addr().to_string(), score, node)
    })
    .collect();
  healthy.sort_by(|a, b| a.0.cmp(&b.0));

  let mut best: Option<&(String, f64, &NodeStatus)> = None;
  for candidate in &healthy {
    debug!("Node {} score={:.2}", candidate.0, candidate.1);
    best = match best {
      Some(current) if current.1.total_cmp(&candidate.1).is_le() => Some(current),
      _ => Some(candidate),
    };
  }

  let (addr, score, node) = best.ok_or(BalancerError::NoHealthyNodes)?;
  debug!("Selected node {} (score={:.2})", addr, score);
  Ok(*node)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::NodeRecord;

  fn node(host: &str, port: u16, gpu: f64, cpu: f64, healthy: bool) -> NodeStatus {
    NodeStatus {
      record: NodeRecord {
        host: host.into(),
        port,
        cpu_usage: cpu,
        gpu_usage: gpu,
        last_update: 0.0,
      },
      is_healthy: healthy,
    }
  }

  #[test]
  fn test_empty_pool_is_no_nodes() {
    let err = select(&[], &SelectionSettings::default()).unwrap_err();
    assert!(matches!(err, BalancerError::NoNodesAvailable));
  }

  #[test]
  fn test_all_stale_is_no_healthy_nodes() {
    let nodes = vec![node("a", 1, 0.0, 0.0, false), node("b", 1, 0.0, 0.0, false)];
    let err = select(&nodes, &SelectionSettings::default()).unwrap_err();
    assert!(matches!(err, BalancerError::NoHealthyNodes));
  }

  #[test]
  fn test_gpu_weighted_choice() {
    // 0.7*80 + 0.3*10 = 59, 0.7*50 + 0.3*90 = 62
    let nodes = vec![node("n1", 9000, 80.0, 10.0, true), node("n2", 9000, 50.0, 90.0, true)];
    let chosen = select(&nodes, &SelectionSettings::default()).unwrap();
    assert_eq!(chosen.record.host, "n1");
  }

  #[test]
  fn test_unhealthy_node_is_never_chosen() {
    let nodes = vec![node("idle", 1, 0.0, 0.0, false), node("busy", 1, 95.0, 95.0, true)];
    let chosen = select(&nodes, &SelectionSettings::default()).unwrap();
    assert_eq!(chosen.record.host, "busy");
  }

  #[test]
  fn test_ties_break_by_address_regardless_of_input_order() {
    let a = node("10.0.0.1", 9000, 40.0, 40.0, true);
    let b = node("10.0.0.2", 9000, 40.0, 40.0, true);
    let c = node("10.0.0.1", 8000, 40.0, 40.0, true);
    let forward = vec![a.clone(), b.clone(), c.clone()];
    let reversed = vec![c, b, a];

    let settings = SelectionSettings::default();
    assert_eq!(select(&forward, &settings).unwrap().record.addr().to_string(), "10.0.0.1:8000");
    assert_eq!(select(&reversed, &settings).unwrap().record.addr().to_string(), "10.0.0.1:8000");
  }

  #[test]
  fn test_result_has_minimum_score() {
    let settings = SelectionSettings::default();
    let nodes: Vec<NodeStatus> = (0..20)
      .map(|i| {
        let gpu = ((i * 37) % 100) as f64;
        let cpu = ((i * 53) % 100) as f64;
        node(&format!("host{}", i), 8188, gpu, cpu, i % 3 != 0)
      })
      .collect();

    let chosen = select(&nodes, &settings).unwrap();
    let chosen_score = settings.score(chosen.record.gpu_usage, chosen.record.cpu_usage);
    assert!(chosen.is_healthy);
    for n in nodes.iter().filter(|n| n.is_healthy) {
      assert!(chosen_score <= settings.score(n.record.gpu_usage, n.record.cpu_usage));
    }
  }

  #[test]
  fn test_custom_weights() {
    let settings = SelectionSettings {
      gpu_weight: 0.0,
      cpu_weight: 1.0,
      ..Default::default()
    };
    let nodes = vec![node("n1", 1, 80.0, 10.0, true), node("n2", 1, 10.0, 50.0, true)];
    assert_eq!(select(&nodes, &settings).unwrap().record.host, "n1");
  }
}
