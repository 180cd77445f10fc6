//! HTTP tracker backend
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `POST /runs` with `{"run_id", "config"}` when the run starts
//! - `POST /runs/{run_id}/log` with `{"timestamp", "step", "metrics"}`
//! - `POST /runs/{run_id}/finish` with `{"timestamp", "total_steps"}`

use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::json;
use tracing::{debug, info};

use super::{Metrics, Tracker};
use crate::config::Config;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Tracker`] posting observations to an HTTP service.
#[derive(Debug)]
pub struct RemoteTracker {
    client: Client,
    base: String,
    run_id: String,
    total_steps: u64,
    finished: bool,
}

impl RemoteTracker {
    /// Register the run with the service.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the client cannot be built or the service
    /// rejects the run.
    pub fn create(endpoint: &str, run_id: &str, config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Tracker(format!("cannot build HTTP client: {e}")))?;
        let tracker = Self {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
            run_id: run_id.to_string(),
            total_steps: 0,
            finished: false,
        };
        tracker.post("runs".to_string(), &json!({ "run_id": run_id, "config": config }))?;
        info!(run_id, endpoint = tracker.base, "remote tracker registered run");
        Ok(tracker)
    }

    fn post(&self, path: String, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{path}", self.base);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| Error::Tracker(format!("POST {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tracker(format!("POST {url} returned {status}")));
        }
        debug!(url, %status, "tracker request");
        Ok(())
    }
}

impl Tracker for RemoteTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn log(&mut self, metrics: &Metrics, step: Option<u64>) -> Result<()> {
        if self.finished {
            return Err(Error::Tracker(format!("run `{}` is already finished", self.run_id)));
        }
        self.post(
            format!("runs/{}/log", self.run_id),
            &json!({ "timestamp": Utc::now(), "step": step, "metrics": metrics }),
        )?;
        if let Some(step) = step {
            self.total_steps = self.total_steps.max(step);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.post(
            format!("runs/{}/finish", self.run_id),
            &json!({ "timestamp": Utc::now(), "total_steps": self.total_steps }),
        )?;
        self.finished = true;
        Ok(())
    }
}
