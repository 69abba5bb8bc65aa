//! Shared HTTP client construction

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use reqwest::{redirect::Policy, Client};

/// Build the client used for both the catalog and snapshot downloads.
///
/// Redirects are followed up to `max_redirects` hops. No total request
/// timeout is set here: snapshots run to several gigabytes, so downloads
/// enforce an idle timeout per chunk and the catalog sets its own deadline.
pub fn build_client(config: &IngestConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout())
        .redirect(Policy::limited(config.max_redirects))
        .build()
        .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Translate a send failure, keeping redirect exhaustion distinct from
/// ordinary transport errors.
pub(crate) fn map_send_error(
    err: reqwest::Error,
    url: &str,
    max_redirects: usize,
    transport: fn(reqwest::Error) -> IngestError,
) -> IngestError {
    if err.is_redirect() {
        IngestError::TooManyRedirects {
            url: url.to_string(),
            limit: max_redirects,
        }
    } else {
        transport(err)
    }
}
