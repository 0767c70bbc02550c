//! Probe module for reachability checks.
//!
//! Supports HTTP(S) and ICMP ping checks. A failed check is an expected
//! outcome and becomes a `Down` observation; it never aborts the run.

mod http;
mod ping;

pub use http::*;
pub use ping::*;

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::config::RunConfig;
use crate::history::{Observation, Status};
use crate::registry::{ConfigError, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Which check strategy to run against every target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Up if any HTTP response arrives, whatever its status code.
    Http,
    /// Up if a majority of echo requests are answered.
    Ping,
}

impl FromStr for ProbePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ProbePolicy::Http),
            "ping" | "icmp" => Ok(ProbePolicy::Ping),
            _ => Err(ConfigError::InvalidValue {
                key: "UPWATCH_PROBE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Runs one bounded check per target.
#[derive(Debug, Clone)]
pub struct Prober {
    policy: ProbePolicy,
    timeout: Duration,
    ping_count: u32,
}

impl Prober {
    pub fn new(policy: ProbePolicy, timeout: Duration, ping_count: u32) -> Self {
        Self {
            policy,
            timeout,
            ping_count: ping_count.max(1),
        }
    }

    pub fn from_config(cfg: &RunConfig) -> Self {
        Self::new(cfg.probe_policy, cfg.timeout, cfg.ping_count)
    }

    /// Run the configured check, bounded by the wall-clock timeout.
    pub async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let check = async {
            match self.policy {
                ProbePolicy::Http => run_http_probe(address, self.timeout).await.map(|_| ()),
                ProbePolicy::Ping => {
                    run_ping_probe(address, self.timeout, self.ping_count).await
                }
            }
        };

        tokio::time::timeout(self.timeout, check)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    /// Check one target. Errors are downgraded to `Down`.
    pub async fn check(&self, target: &Target, at: DateTime<Utc>) -> Observation {
        let status = match self.probe(&target.address).await {
            Ok(()) => {
                tracing::info!("Check for {} ({}) is Up", target.identity, target.address);
                Status::Up
            }
            Err(e) => {
                tracing::warn!(
                    "Check for {} ({}) is Down: {}",
                    target.identity,
                    target.address,
                    e
                );
                Status::Down
            }
        };
        Observation::new(&target.identity, status, at)
    }

    /// Check every target in order. Timestamps never go backwards within a run.
    pub async fn check_all(&self, targets: &[Target]) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(targets.len());
        let mut last: Option<DateTime<Utc>> = None;

        for target in targets {
            let now = Utc::now();
            let at = last.map_or(now, |prev| prev.max(now));
            last = Some(at);
            observations.push(self.check(target, at).await);
        }

        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response and return the address.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    async fn refused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("http".parse::<ProbePolicy>().unwrap(), ProbePolicy::Http);
        assert_eq!(" PING ".parse::<ProbePolicy>().unwrap(), ProbePolicy::Ping);
        assert!("dns".parse::<ProbePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_server_error_counts_as_up() {
        let address = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let prober = Prober::new(ProbePolicy::Http, Duration::from_secs(2), 1);
        let target = Target::new("Flaky", address);

        let obs = prober.check(&target, Utc::now()).await;
        assert_eq!(obs.status, Status::Up);
        assert_eq!(obs.target_identity, "Flaky");
    }

    #[tokio::test]
    async fn test_redirect_is_scored_on_its_own_response() {
        let address = serve_once(
            "HTTP/1.1 302 Found\r\nlocation: http://127.0.0.1:1/\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let prober = Prober::new(ProbePolicy::Http, Duration::from_secs(2), 1);
        let target = Target::new("Moved", address);

        let obs = prober.check(&target, Utc::now()).await;
        assert_eq!(obs.status, Status::Up);
    }

    #[tokio::test]
    async fn test_connection_refused_is_down() {
        let prober = Prober::new(ProbePolicy::Http, Duration::from_secs(2), 1);
        let target = Target::new("Gone", refused_address().await);

        let obs = prober.check(&target, Utc::now()).await;
        assert_eq!(obs.status, Status::Down);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(held);
        });

        let prober = Prober::new(ProbePolicy::Http, Duration::from_millis(300), 1);
        let result = prober.probe(&format!("http://{}", addr)).await;
        assert!(matches!(result, Err(ProbeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_check_all_preserves_order_and_time() {
        let up = serve_once("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;
        let targets = vec![
            Target::new("first", refused_address().await),
            Target::new("second", up),
        ];
        let prober = Prober::new(ProbePolicy::Http, Duration::from_secs(2), 1);

        let observations = prober.check_all(&targets).await;
        let ids: Vec<_> = observations.iter().map(|o| o.target_identity.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(observations[0].status, Status::Down);
        assert_eq!(observations[1].status, Status::Up);
        assert!(observations[0].timestamp <= observations[1].timestamp);
    }
}
