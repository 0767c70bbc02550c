//! HTTP(S) probe implementation.

use std::time::Duration;
use super::ProbeError;

/// Normalize an address into a URL. Bare hosts are checked over HTTPS.
pub fn probe_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

/// Run an HTTP probe against the given address.
///
/// Any response counts as reachable, including 4xx and 5xx. Returns the
/// status code.
pub async fn run_http_probe(address: &str, timeout: Duration) -> Result<u16, ProbeError> {
    let url = probe_url(address);

    // A proxy or a redirect target would answer on the target's behalf,
    // so only the target's own response counts.
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("{} answered with {}", url, status);
    }

    Ok(status.as_u16())
}
