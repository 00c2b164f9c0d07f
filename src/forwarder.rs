use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ForwardError;

pub const SUCCESS_CODE: i32 = 200;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// `{code, message, data}` envelope every node answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
  pub code: i32,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub data: Value,
}

/// Relays an operation to the node that should handle it. No retries.
#[derive(Debug, Clone)]
pub struct Forwarder {
  client: reqwest::Client,
}

impl Forwarder {
  pub fn new() -> Result<Self, ForwardError> {
    let client = reqwest::Client::builder().timeout(FORWARD_TIMEOUT).build()?;
    Ok(Self { client })
  }

  /// POSTs `body` as JSON to `http://{address}{path}` and unwraps the envelope.
  pub async fn forward<B: Serialize + ?Sized>(&self, address: &str, path: &str, body: &B) -> Result<Value, ForwardError> {
    let url = format!("http://{address}{path}");
    debug!(%url, "Forwarding request");
    let envelope: Envelope = self
      .client
      .post(&url)
      .json(body)
      .send()
      .await?
      .json()
      .await?;

    if envelope.code != SUCCESS_CODE {
      return Err(ForwardError::Remote {
        code: envelope.code,
        message: envelope.message,
      });
    }
    Ok(envelope.data)
  }
}
