//! Notification fan-out.
//!
//! A dispatch resolves its audience, drops subscriptions without keys, then
//! delivers to every remaining subscriber concurrently. Each delivery has its
//! own timeout and the whole fan-out has a wall-clock budget. Subscriptions
//! the push service reports as gone are purged in one batch at the end.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spacebook_core::config::PushConfig;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{
    DeliveryError, NotificationError, Payload, PushKeys, PushTransport, SubscriptionStore, Target,
};
use crate::storage::Subscription;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Subscribers with usable keys that a delivery was started for.
    pub attempted: usize,
    /// Deliveries the push service accepted.
    pub sent: usize,
}

/// Fans notifications out to subscribers.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn PushTransport>,
    recipient_timeout: Duration,
    budget: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
        config: &PushConfig,
    ) -> Self {
        Self::with_timeouts(
            store,
            transport,
            config.recipient_timeout(),
            config.dispatch_budget(),
        )
    }

    pub fn with_timeouts(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
        recipient_timeout: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            recipient_timeout,
            budget,
        }
    }

    /// Deliver `payload` to every subscriber addressed by `target`.
    ///
    /// Individual delivery failures never fail the dispatch; only a failure
    /// to look up the audience does.
    #[instrument(skip(self, payload), fields(title = %payload.title))]
    pub async fn dispatch(
        &self,
        target: &Target,
        payload: &Payload,
    ) -> Result<DispatchReport, NotificationError> {
        let subscribers = self.store.resolve(target).await?;
        let (valid, invalid): (Vec<Subscription>, Vec<Subscription>) =
            subscribers.into_iter().partition(Subscription::has_keys);

        if !invalid.is_empty() {
            let endpoints: Vec<String> = invalid.into_iter().map(|s| s.endpoint).collect();
            info!(count = endpoints.len(), "Purging subscriptions without keys");
            if let Err(e) = self.store.remove_many(&endpoints).await {
                warn!(error = %e, "Failed to purge subscriptions without keys");
            }
        }

        let attempted = valid.len();
        if attempted == 0 {
            debug!("No subscribers to notify");
            return Ok(DispatchReport::default());
        }

        let body: Arc<str> = serde_json::to_string(payload)
            .map_err(|e| NotificationError::Payload(e.to_string()))?
            .into();

        let mut deliveries = JoinSet::new();
        for sub in valid {
            let transport = Arc::clone(&self.transport);
            let body = Arc::clone(&body);
            let per_recipient = self.recipient_timeout;
            deliveries.spawn(async move {
                let keys = PushKeys::from(&sub);
                let outcome =
                    tokio::time::timeout(per_recipient, transport.deliver(&sub.endpoint, &keys, &body))
                        .await
                        .unwrap_or_else(|_| {
                            Err(DeliveryError::Transient("delivery timed out".to_string()))
                        });
                (sub.endpoint, outcome)
            });
        }

        let deadline = Instant::now() + self.budget;
        let mut sent = 0;
        let mut transient = 0;
        let mut gone = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, deliveries.join_next()).await {
                Ok(Some(Ok((_, Ok(()))))) => sent += 1,
                Ok(Some(Ok((endpoint, Err(e))))) => {
                    if e.is_permanent() {
                        debug!(endpoint = %endpoint, error = %e, "Subscription gone");
                        gone.push(endpoint);
                    } else {
                        debug!(endpoint = %endpoint, error = %e, "Delivery failed");
                        transient += 1;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Delivery task failed");
                    transient += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let remaining = deliveries.len();
                    deliveries.abort_all();
                    warn!(remaining, budget = ?self.budget, "Dispatch budget exhausted");
                    transient += remaining;
                    break;
                }
            }
        }

        if !gone.is_empty() {
            if let Err(e) = self.store.remove_many(&gone).await {
                warn!(count = gone.len(), error = %e, "Failed to purge gone subscriptions");
            }
        }

        info!(attempted, sent, purged = gone.len(), transient, "Dispatch complete");
        Ok(DispatchReport { attempted, sent })
    }
}
