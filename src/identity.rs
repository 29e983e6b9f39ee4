use std::time::Duration;

use tracing::{debug, info};
use zap_entities::EndpointId;

use crate::{Transport, TransportError};

/// Claims a fresh [`EndpointId`] at the broker, retrying on collisions.
pub struct IdentityAllocator {
    retry_delay: Duration,
    candidates: Box<dyn FnMut() -> EndpointId + Send>,
}

impl IdentityAllocator {
    pub fn new(retry_delay: Duration) -> Self {
        Self::with_candidates(retry_delay, EndpointId::random)
    }

    /// Uses `candidates` instead of random ids.
    pub fn with_candidates(
        retry_delay: Duration,
        candidates: impl FnMut() -> EndpointId + Send + 'static,
    ) -> Self {
        Self {
            retry_delay,
            candidates: Box::new(candidates),
        }
    }

    /// Registers candidates until one is free. Collisions are retried
    /// without limit; any other transport error ends the attempt.
    pub async fn allocate<T: Transport>(
        &mut self,
        transport: &T,
    ) -> Result<EndpointId, TransportError> {
        let mut attempts = 0u32;
        loop {
            let candidate = (self.candidates)();
            attempts += 1;
            match transport.register(&candidate).await {
                Ok(()) => {
                    info!(id = %candidate, attempts, "Allocated endpoint id");
                    return Ok(candidate);
                }
                Err(TransportError::IdTaken(_)) => {
                    debug!(id = %candidate, "Id taken, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::LocalBroker;

    fn id(s: &str) -> EndpointId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn retries_until_a_free_id() {
        let broker = LocalBroker::new();
        broker.transport().register(&id("AAAA")).await.unwrap();
        broker.transport().register(&id("BBBB")).await.unwrap();

        let mut queue: VecDeque<EndpointId> =
            [id("AAAA"), id("BBBB"), id("CCCC")].into_iter().collect();
        let mut allocator = IdentityAllocator::with_candidates(
            Duration::from_millis(1),
            move || queue.pop_front().unwrap_or_else(EndpointId::random),
        );

        let transport = broker.transport();
        let allocated = allocator.allocate(&transport).await.unwrap();
        assert_eq!(allocated, id("CCCC"));
        assert_eq!(transport.id(), Some(id("CCCC")));
    }

    #[tokio::test]
    async fn random_ids_register() {
        let broker = LocalBroker::new();
        let transport = broker.transport();
        let allocated = IdentityAllocator::new(Duration::from_millis(1))
            .allocate(&transport)
            .await
            .unwrap();
        assert!(broker.is_registered(&allocated));
    }
}
