use std::process::Command;

use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::debug;

pub struct MetricsSampler {
  system: System,
}

impl MetricsSampler {
  pub fn new() -> Self {
    let mut system = System::new();
    system.refresh_cpu_usage();
    Self { system }
  }

  /// Global CPU usage in percent since the previous sample.
  pub async fn cpu_usage(&mut self) -> f64 {
    tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
    self.system.refresh_cpu_usage();
    self.system.global_cpu_usage() as f64
  }

  /// Utilization averaged over every GPU on the node, 0 when none is visible.
  pub async fn gpu_usage(&self) -> f64 {
    let output = tokio::task::spawn_blocking(|| {
      Command::new("nvidia-smi")
        .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
        .output()
    })
      .await;

    match output {
      Ok(Ok(output)) if output.status.success() => {
        average_gpu_usage(&String::from_utf8_lossy(&output.stdout))
      }
      _ => {
        debug!("nvidia-smi unavailable, reporting 0% GPU usage");
        0.0
      }
    }
  }
}

impl Default for MetricsSampler {
  fn default() -> Self {
    Self::new()
  }
}

pub fn average_gpu_usage(nvidia_smi_output: &str) -> f64 {
  let loads: Vec<f64> = nvidia_smi_output
    .lines()
    .filter_map(|line| line.trim().parse::<f64>().ok())
    .collect();
  if loads.is_empty() {
    return 0.0;
  }
  loads.iter().sum::<f64>() / loads.len() as f64
}
