//! Binding of a task's push stream to a worker connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::ShuffleResult;
use crate::push::state::PushState;
use crate::transport::TransportClientFactory;
use crate::types::{BatchId, PartitionLocation};

#[derive(Debug)]
struct BoundConnection<C> {
    endpoint: String,
    client: Arc<C>,
}

/// The connection a task currently pushes through.
///
/// Batches sent through a previous connection must all be acknowledged before anything is sent
/// through a new one, so a switch first drains the old endpoint and only then replaces the
/// binding. Lookups of an unchanged binding only take the read lock.
#[derive(Debug)]
pub struct EndpointBinding<C> {
    current: RwLock<Option<BoundConnection<C>>>,
}

impl<C> EndpointBinding<C> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Returns the endpoint of the bound connection, if any.
    pub async fn current_endpoint(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|bound| bound.endpoint.clone())
    }

    /// Returns a connection to `location`, switching the binding to it when needed.
    ///
    /// Connection errors are returned as is. `own_batch` is the slot the caller holds for
    /// itself, which is not waited for while draining.
    ///
    /// The drain runs without holding the binding lock, so callers still using the old
    /// connection can finish and release their slots. The swap only happens once the old
    /// endpoint is drained under the write lock.
    pub async fn bind<F>(
        &self,
        factory: &F,
        location: &PartitionLocation,
        push_state: &PushState,
        own_batch: Option<BatchId>,
        drain_timeout: Duration,
        shutdown: &ShutdownRx,
    ) -> ShuffleResult<Arc<C>>
    where
        F: TransportClientFactory<Client = C>,
    {
        let client = factory
            .create_client(&location.host, location.push_port, location.id)
            .await?;

        loop {
            let previous = match self.current.read().await.as_ref() {
                Some(bound) if Arc::ptr_eq(&bound.client, &client) => return Ok(client),
                Some(bound) => Some((bound.endpoint.clone(), bound.client.clone())),
                None => None,
            };

            if let Some((endpoint, _)) = &previous {
                info!(
                    task = %push_state.task(),
                    from = %endpoint,
                    to = %location.host_and_push_port(),
                    in_flight = push_state.in_flight_count(endpoint),
                    "switching push connection, draining in-flight batches"
                );
                push_state
                    .await_drain(endpoint, own_batch, drain_timeout, shutdown)
                    .await?;
            }

            let mut current = self.current.write().await;
            let unchanged = match (current.as_ref(), &previous) {
                (None, None) => true,
                (Some(bound), Some((_, previous_client))) => {
                    Arc::ptr_eq(&bound.client, previous_client)
                        && push_state.is_drained(&bound.endpoint, own_batch)
                }
                _ => false,
            };

            // Another caller rebound, or used the old connection while we drained.
            if !unchanged {
                continue;
            }

            if previous.is_none() {
                debug!(
                    task = %push_state.task(),
                    endpoint = %location.host_and_push_port(),
                    "binding push connection"
                );
            }

            *current = Some(BoundConnection {
                endpoint: location.host_and_push_port(),
                client: client.clone(),
            });

            return Ok(client);
        }
    }
}

impl<C> Default for EndpointBinding<C> {
    fn default() -> Self {
        Self::new()
    }
}
