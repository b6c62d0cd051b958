//! Interfaces of the collaborators the push client drives.
//!
//! The client owns no sockets. Connections are created and pooled by a
//! [`TransportClientFactory`], requests are shipped by a [`TransportClient`], and replacement
//! locations are obtained from the lifecycle manager through a [`LifecycleManagerClient`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::ShuffleResult;
use crate::protocol::{PushData, StatusCode};
use crate::types::{PartitionLocation, ShuffleId};

/// Completion signal of a one-way push.
///
/// Resolves with the worker response, or with the transport failure. A sender dropped without
/// sending means the connection went away before the worker answered.
pub type PushCompletion = oneshot::Receiver<ShuffleResult<Bytes>>;

/// A connection to a shuffle worker.
///
/// Connections are reference counted handles owned by the factory; the client compares them by
/// identity to detect endpoint switches and never closes them itself.
pub trait TransportClient: Send + Sync + 'static {
    /// Hands a framed batch to the transport without waiting for the worker.
    ///
    /// Returns an error when the request could not be sent at all. Otherwise the returned
    /// [`PushCompletion`] resolves once the worker answers or the request fails.
    fn push_data(&self, request: PushData, timeout: Duration) -> ShuffleResult<PushCompletion>;

    /// Sends an encoded request and waits for the worker response.
    fn send_rpc_sync(
        &self,
        request: Bytes,
        timeout: Duration,
    ) -> impl Future<Output = ShuffleResult<Bytes>> + Send;
}

/// Creates and pools worker connections.
pub trait TransportClientFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Client: TransportClient;

    /// Returns a connection to `host:port`, reusing a pooled one when possible.
    fn create_client(
        &self,
        host: &str,
        port: u16,
        partition_id: i32,
    ) -> impl Future<Output = ShuffleResult<Arc<Self::Client>>> + Send;

    /// Closes every pooled connection.
    fn close(&self);
}

/// Request for a replacement of a location that can no longer accept data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviveRequest {
    pub application_id: String,
    pub shuffle_id: ShuffleId,
    pub map_id: i32,
    pub attempt_id: i32,
    pub partition_id: i32,
    pub epoch: i32,
    pub old_location: PartitionLocation,
    pub cause: StatusCode,
}

/// Answer of the lifecycle manager to a [`ReviveRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviveResponse {
    pub status: StatusCode,
    pub location: Option<PartitionLocation>,
}

/// Control-plane client used to revive split locations.
pub trait LifecycleManagerClient: Send + Sync + 'static {
    /// Asks for a replacement location and waits for the answer.
    fn revive(
        &self,
        request: ReviveRequest,
        timeout: Duration,
    ) -> impl Future<Output = ShuffleResult<ReviveResponse>> + Send;
}
