use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{BalancerError, Result};
use crate::models::NodeAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMethod {
  Get,
  Post,
}

impl ForwardMethod {
  pub fn parse(method: &str) -> Result<Self> {
    if method.eq_ignore_ascii_case("GET") {
      Ok(ForwardMethod::Get)
    } else if method.eq_ignore_ascii_case("POST") {
      Ok(ForwardMethod::Post)
    } else {
      Err(BalancerError::MethodNotAllowed(method.to_string()))
    }
  }
}

/// Relays calls to a node's `/api` surface. One attempt per call; transport
/// failures, timeouts, and non-JSON replies all become `BalancerError::Forward`.
#[derive(Clone)]
pub struct Forwarder {
  client: Client,
}

impl Forwarder {
  pub fn new(timeout: Duration) -> reqwest::Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client })
  }

  pub fn url(node: &NodeAddr, path: &str) -> String {
    format!("http://{}:{}/api{}", node.host, node.port, path)
  }

  pub async fn forward(&self, node: &NodeAddr, path: &str, method: &str, body: Option<&Value>) -> Result<Value> {
    let method = ForwardMethod::parse(method)?;
    let url = Self::url(node, path);
    debug!("Forwarding {:?} {}", method, url);

    let request = match method {
      ForwardMethod::Get => self.client.get(&url),
      ForwardMethod::Post => match body {
        Some(body) => self.client.post(&url).json(body),
        None => self.client.post(&url),
      },
    };

    let response = request.send().await.map_err(|e| {
      error!("Error forwarding request to {}: {}", url, e);
      BalancerError::forward(url.as_str(), e)
    })?;

    response.json::<Value>().await.map_err(|e| {
      error!("Invalid response body from {}: {}", url, e);
      BalancerError::forward(url.as_str(), e)
    })
  }
}
