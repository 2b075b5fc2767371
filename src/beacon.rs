//! Liveness beacon.
//!
//! After each successfully processed message the service pings an external
//! endpoint. The ping is fire-and-forget: failures are logged and never
//! joined against the processing path. Without a configured URL the beacon
//! is a no-op.

use tracing::{debug, warn};

#[derive(Clone)]
pub struct Beacon {
    client: reqwest::Client,
    url: Option<String>,
}

impl Beacon {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Fire one ping in the background.
    pub fn fire(&self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("liveness beacon delivered");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "liveness beacon rejected");
                }
                Err(err) => {
                    warn!(error = %err, "liveness beacon failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_beacon_is_a_no_op() {
        // No runtime running: fire() must return before spawning anything.
        Beacon::new(None).fire();
    }
}
