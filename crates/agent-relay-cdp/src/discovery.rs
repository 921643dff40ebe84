//! Target discovery over the host's loopback target-list endpoint.

use std::time::Duration;

use agent_relay_core::config::DiscoveryConfig;
use serde::{Deserialize, Serialize};

use crate::CdpError;

/// One inspectable target as listed by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Target {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "webSocketDebuggerUrl")]
    pub connect_address: String,
}

/// Pick the target to attach to.
///
/// Candidates without a connect address are ignored. Preference order: the
/// configured known address, a title naming the product, a URL naming the
/// main document, then any page.
#[must_use]
pub fn select_target<'a>(targets: &'a [Target], config: &DiscoveryConfig) -> Option<&'a Target> {
    let candidates = || targets.iter().filter(|t| !t.connect_address.is_empty());
    let product = config.product_name.to_lowercase();

    config
        .known_address
        .as_deref()
        .and_then(|known| candidates().find(|t| t.connect_address == known))
        .or_else(|| {
            if product.is_empty() {
                return None;
            }
            candidates().find(|t| t.title.to_lowercase().contains(&product))
        })
        .or_else(|| {
            if config.main_document.is_empty() {
                return None;
            }
            candidates().find(|t| t.url.contains(&config.main_document))
        })
        .or_else(|| candidates().find(|t| t.kind == "page"))
}

/// Query every configured port and collect the listed targets.
///
/// Ports that refuse, time out or answer with garbage are skipped.
///
/// # Errors
/// Returns error if no port answered with a target list.
pub async fn fetch_targets(
    client: &reqwest::Client,
    config: &DiscoveryConfig,
) -> Result<Vec<Target>, CdpError> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let mut targets = Vec::new();
    let mut answered = false;

    for port in &config.ports {
        let url = format!("http://127.0.0.1:{port}{}", config.path);
        let listed = async {
            client
                .get(&url)
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<Target>>()
                .await
        };
        match listed.await {
            Ok(found) => {
                tracing::debug!(port, count = found.len(), "Listed inspection targets");
                answered = true;
                targets.extend(found);
            }
            Err(e) => tracing::debug!(port, error = %e, "Target list unavailable"),
        }
    }

    if answered {
        Ok(targets)
    } else {
        Err(CdpError::Discovery(format!(
            "no target list on ports {:?}",
            config.ports
        )))
    }
}
