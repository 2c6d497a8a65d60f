//! Background health prober.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::gateway::ProviderGateway;

/// Spawn the periodic health prober for a gateway.
///
/// The first sweep runs immediately so startup health converges fast; after
/// that, one sweep per interval.
pub fn spawn_health_prober(
    gateway: Arc<ProviderGateway>,
    interval: Duration,
    probe_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            gateway.probe_all(probe_timeout).await;
            tracing::trace!("Provider health sweep complete");
        }
    })
}
