//! The push protocol engine.
//!
//! [`ShuffleClient`] drives the four push messages of a map task against a partition location:
//! the handshake opening the stream, region start and finish around each region, and the
//! one-way pushes carrying framed batches in between. Pushes are bounded per endpoint, ordered
//! per task and drained before the task switches to a different connection. The synchronous
//! messages are retried on transient failures, and a region start answered with a hard split
//! revives the location through the lifecycle manager.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use config::shared::{PushConfig, ShuffleClientConfig};
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, ShuffleError, ShuffleResult};
use crate::failpoints::{PUSH_DATA_BEFORE_SEND, SEND_RPC_SYNC_BEFORE_SEND, shuffle_fail_point};
use crate::metrics::{
    ENDPOINT_LABEL, SHUFFLE_ID_LABEL, SHUFFLE_PUSH_BYTES_TOTAL, SHUFFLE_PUSH_FAILURES_TOTAL,
    SHUFFLE_PUSH_SKIPPED_TOTAL, SHUFFLE_REVIVES_TOTAL, STATUS_LABEL,
};
use crate::protocol::{
    BatchHeader, PushData, PushDataHandshake, RegionFinish, RegionStart, RpcRequest, StatusCode,
};
use crate::push::binding::EndpointBinding;
use crate::push::lifecycle::MapperEndTracker;
use crate::push::retry::RetryExecutor;
use crate::push::state::PushState;
use crate::transport::{
    LifecycleManagerClient, PushCompletion, ReviveRequest, TransportClient,
    TransportClientFactory,
};
use crate::types::{BatchId, PartitionLocation, PartitionMode, ShuffleId, TaskKey};
use crate::{bail, shuffle_error};

/// Push state and connection binding of one task.
#[derive(Debug)]
struct TaskPushContext<C> {
    push_state: Arc<PushState>,
    binding: EndpointBinding<C>,
    /// Serializes batch id allocation, admission, binding and sending of the task's pushes.
    admission: tokio::sync::Mutex<()>,
}

impl<C> TaskPushContext<C> {
    fn new(task: TaskKey) -> Self {
        Self {
            push_state: Arc::new(PushState::new(task)),
            binding: EndpointBinding::new(),
            admission: tokio::sync::Mutex::new(()),
        }
    }
}

type TaskRegistry<C> = HashMap<TaskKey, Arc<TaskPushContext<C>>>;

/// Slot reserved by a synchronous message for its whole duration, released on drop.
struct ReservedSlot {
    push_state: Arc<PushState>,
    batch_id: BatchId,
    endpoint: String,
}

impl ReservedSlot {
    fn reserve(push_state: &Arc<PushState>, batch_id: BatchId, endpoint: String) -> Self {
        push_state.reserve(batch_id, &endpoint);

        Self {
            push_state: push_state.clone(),
            batch_id,
            endpoint,
        }
    }
}

impl Drop for ReservedSlot {
    fn drop(&mut self) {
        self.push_state.release(self.batch_id, &self.endpoint);
    }
}

/// Bookkeeping run once the worker answered a pushed batch, or failed to.
struct BatchCompletion {
    task: TaskKey,
    batch_id: BatchId,
    location: String,
    endpoint: String,
    push_state: Arc<PushState>,
    mapper_ends: Arc<MapperEndTracker>,
}

impl BatchCompletion {
    async fn wait(self, completion: PushCompletion, timeout: std::time::Duration) {
        let result = match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(shuffle_error!(
                ErrorKind::TransportClosed,
                "Connection closed before the push was acknowledged"
            )),
            Err(elapsed) => Err(ShuffleError::from(elapsed)),
        };

        match result {
            Ok(response) => self.on_success(&response),
            Err(err) => self.on_failure(err),
        }
    }

    fn on_success(&self, response: &Bytes) {
        self.push_state.release(self.batch_id, &self.endpoint);

        if StatusCode::from_response(response) == Some(StatusCode::StageEnded) {
            self.mapper_ends.mark_ended(self.task);
        }

        debug!(
            task = %self.task,
            batch_id = self.batch_id,
            endpoint = %self.endpoint,
            "push acknowledged"
        );
    }

    fn on_failure(&self, err: ShuffleError) {
        self.push_state.release(self.batch_id, &self.endpoint);

        if self.push_state.first_error().is_some() {
            debug!(
                task = %self.task,
                batch_id = self.batch_id,
                error = %err,
                "push failed after the task already recorded a failure"
            );
            return;
        }

        if self.mapper_ends.is_ended(self.task) {
            warn!(
                task = %self.task,
                batch_id = self.batch_id,
                error = %err,
                "push failed after the mapper ended, ignoring"
            );
            return;
        }

        let err = shuffle_error!(
            ErrorKind::PushDataFailed,
            "Push data failed",
            format!(
                "push to {} failed for shuffle {} map {} attempt {} batch {}",
                self.location,
                self.task.shuffle_id,
                self.task.map_id,
                self.task.attempt_id,
                self.batch_id
            ),
            source: err
        );

        if self.push_state.record_error(err.clone()) {
            counter!(
                SHUFFLE_PUSH_FAILURES_TOTAL,
                SHUFFLE_ID_LABEL => self.task.shuffle_id.to_string(),
                ENDPOINT_LABEL => self.endpoint.clone()
            )
            .increment(1);
            error!(task = %self.task, batch_id = self.batch_id, error = %err, "push failed");
        }
    }
}

/// Client pushing map output of one application to shuffle workers.
///
/// Every operation is scoped by a [`TaskKey`]; per-task state is created on first use and
/// dropped by [`ShuffleClient::cleanup`]. Operations of different tasks never wait for each
/// other.
pub struct ShuffleClient<F, L>
where
    F: TransportClientFactory,
{
    application_id: String,
    config: PushConfig,
    transport: F,
    lifecycle_manager: L,
    tasks: Mutex<TaskRegistry<F::Client>>,
    mapper_ends: Arc<MapperEndTracker>,
    retry: RetryExecutor,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<F, L> ShuffleClient<F, L>
where
    F: TransportClientFactory,
    L: LifecycleManagerClient,
{
    /// Creates a client after validating `config`.
    pub fn new(
        config: ShuffleClientConfig,
        transport: F,
        lifecycle_manager: L,
    ) -> ShuffleResult<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let retry = RetryExecutor::new(&config.push.retry, shutdown_rx.clone());

        info!(
            application_id = %config.application_id,
            max_in_flight_batches_per_endpoint = config.push.max_in_flight_batches_per_endpoint,
            max_retries = config.push.retry.max_retries,
            "shuffle client created"
        );

        Ok(Self {
            application_id: config.application_id,
            config: config.push,
            transport,
            lifecycle_manager,
            tasks: Mutex::new(HashMap::new()),
            mapper_ends: Arc::new(MapperEndTracker::new()),
            retry,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Returns the key scoping every request of `shuffle_id`, `"{application_id}-{shuffle_id}"`.
    pub fn shuffle_key(&self, shuffle_id: ShuffleId) -> String {
        format!("{}-{}", self.application_id, shuffle_id)
    }

    /// Returns the tracker of tasks whose stage ended.
    pub fn mapper_end_tracker(&self) -> &MapperEndTracker {
        &self.mapper_ends
    }

    pub fn mapper_ended(&self, task: TaskKey) -> bool {
        self.mapper_ends.is_ended(task)
    }

    /// Returns the first push failure recorded for `task`.
    ///
    /// Pushes report success as soon as a batch is handed to the transport, so callers check
    /// this before committing a task.
    pub fn first_error(&self, task: TaskKey) -> Option<ShuffleError> {
        self.existing_context(task)
            .and_then(|context| context.push_state.first_error())
    }

    /// Returns the number of batches of `task` not yet acknowledged.
    pub fn in_flight_batches(&self, task: TaskKey) -> usize {
        self.existing_context(task)
            .map_or(0, |context| context.push_state.total_in_flight())
    }

    /// Opens the push stream of `task` on `location`.
    pub async fn handshake(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
        num_partitions: i32,
        buffer_size: i32,
    ) -> ShuffleResult<()> {
        let request = RpcRequest::Handshake(PushDataHandshake {
            mode: PartitionMode::Primary,
            shuffle_key: self.shuffle_key(task.shuffle_id),
            partition_unique_id: location.unique_id(),
            attempt_id: task.attempt_id,
            num_partitions,
            buffer_size,
        });

        self.send_message(task, location, request, |_| async { Ok(()) })
            .await
            .map(|_| ())
    }

    /// Starts a region on `location`.
    ///
    /// Returns the replacement location when the worker answered with a hard split and the
    /// lifecycle manager revived the location. `None` means the caller keeps pushing to
    /// `location`, or that the task ended meanwhile.
    pub async fn region_start(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
        current_region_index: i32,
        is_broadcast: bool,
    ) -> ShuffleResult<Option<PartitionLocation>> {
        let request = RpcRequest::RegionStart(RegionStart {
            mode: PartitionMode::Primary,
            shuffle_key: self.shuffle_key(task.shuffle_id),
            partition_unique_id: location.unique_id(),
            attempt_id: task.attempt_id,
            current_region_index,
            is_broadcast,
        });

        let new_location = self
            .send_message(task, location, request, move |response| async move {
                if StatusCode::from_response(&response) != Some(StatusCode::HardSplit) {
                    return Ok(None);
                }

                info!(
                    task = %task,
                    location = %location,
                    region = current_region_index,
                    "location is full, reviving"
                );
                self.revive(task, location).await
            })
            .await?;

        Ok(new_location.flatten())
    }

    /// Finishes the current region on `location`.
    pub async fn region_finish(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
    ) -> ShuffleResult<()> {
        let request = RpcRequest::RegionFinish(RegionFinish {
            mode: PartitionMode::Primary,
            shuffle_key: self.shuffle_key(task.shuffle_id),
            partition_unique_id: location.unique_id(),
            attempt_id: task.attempt_id,
        });

        self.send_message(task, location, request, |_| async { Ok(()) })
            .await
            .map(|_| ())
    }

    /// Pushes one batch of `partition_id` to `location`.
    ///
    /// `data` must start with [`crate::protocol::BATCH_HEADER_SIZE`] bytes reserved for the
    /// batch header, followed by the payload. Returns once the batch is handed to the
    /// transport, with the number of bytes accepted, header included. Failures reported later
    /// by the worker are exposed through [`ShuffleClient::first_error`] and fail the next push.
    ///
    /// Returns 0 without sending anything when the task's stage already ended.
    pub async fn push_data(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
        partition_id: i32,
        mut data: BytesMut,
    ) -> ShuffleResult<usize> {
        if self.mapper_ends.is_ended(task) {
            debug!(task = %task, partition_id, "mapper already ended, skipping push");
            counter!(SHUFFLE_PUSH_SKIPPED_TOTAL, SHUFFLE_ID_LABEL => task.shuffle_id.to_string())
                .increment(1);

            if let Some(context) = self.existing_context(task) {
                context.push_state.discard();
            }

            return Ok(0);
        }

        let context = self.task_context(task);
        let push_state = &context.push_state;
        if let Some(err) = push_state.first_error() {
            return Err(err);
        }

        let endpoint = location.host_and_push_port();
        let _admission = context.admission.lock().await;

        let batch_id = push_state.next_batch_id();
        BatchHeader::frame(&mut data, partition_id, task.attempt_id, batch_id)?;
        let total_length = data.len();

        push_state
            .await_below(
                &endpoint,
                self.config.max_in_flight_batches_per_endpoint,
                self.config.limit_in_flight_timeout(),
                &self.shutdown_rx,
            )
            .await?;

        let request = PushData {
            mode: PartitionMode::Primary,
            shuffle_key: self.shuffle_key(task.shuffle_id),
            partition_unique_id: location.unique_id(),
            body: data.freeze(),
        };
        let completion = BatchCompletion {
            task,
            batch_id,
            location: location.to_string(),
            endpoint: endpoint.clone(),
            push_state: push_state.clone(),
            mapper_ends: self.mapper_ends.clone(),
        };

        match self.send_batch(&context, location, &endpoint, batch_id, request).await {
            Ok(receiver) => {
                debug!(task = %task, batch_id, endpoint = %endpoint, "push sent");
                counter!(SHUFFLE_PUSH_BYTES_TOTAL, SHUFFLE_ID_LABEL => task.shuffle_id.to_string())
                    .increment(total_length as u64);
                tokio::spawn(completion.wait(receiver, self.config.push_rpc_timeout()));
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                push_state.release(batch_id, &endpoint);
                return Err(err);
            }
            Err(err) => {
                error!(
                    task = %task,
                    batch_id,
                    endpoint = %endpoint,
                    error = %err,
                    "failed to send push"
                );
                completion.on_failure(err);
            }
        }

        Ok(total_length)
    }

    /// Drops the push state and connection binding of `task`.
    ///
    /// Outstanding batches are forgotten, not awaited.
    pub fn cleanup(&self, task: TaskKey) {
        let removed = self.lock_tasks().remove(&task);

        if let Some(context) = removed {
            debug!(
                task = %task,
                in_flight = context.push_state.total_in_flight(),
                "cleaning up task push state"
            );
            context.push_state.discard();
        }
    }

    /// Cancels every pending wait and retry loop, then closes the transport.
    pub fn shutdown(&self) {
        info!(application_id = %self.application_id, "shutting down shuffle client");

        self.shutdown_tx.shutdown();
        self.transport.close();
    }

    async fn send_batch(
        &self,
        context: &TaskPushContext<F::Client>,
        location: &PartitionLocation,
        endpoint: &str,
        batch_id: BatchId,
        request: PushData,
    ) -> ShuffleResult<PushCompletion> {
        shuffle_fail_point(PUSH_DATA_BEFORE_SEND)?;

        let client = context
            .binding
            .bind(
                &self.transport,
                location,
                &context.push_state,
                None,
                self.config.limit_in_flight_timeout(),
                &self.shutdown_rx,
            )
            .await?;
        context.push_state.reserve(batch_id, endpoint);

        client.push_data(request, self.config.push_rpc_timeout())
    }

    /// Sends a synchronous message with retries and hands the response to `on_response`.
    ///
    /// The message holds a slot on the endpoint until it completes, so a later connection
    /// switch waits for it like for any pushed batch. Returns `None` when the task's stage
    /// already ended.
    async fn send_message<T, R, Fut>(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
        request: RpcRequest,
        on_response: R,
    ) -> ShuffleResult<Option<T>>
    where
        R: Fn(Bytes) -> Fut,
        Fut: Future<Output = ShuffleResult<T>>,
    {
        let operation_name = request.name();
        if self.mapper_ends.is_ended(task) {
            debug!(task = %task, operation = operation_name, "mapper already ended, skipping");
            return Ok(None);
        }

        let context = self.task_context(task);
        let batch_id = context.push_state.next_batch_id();
        let _slot = ReservedSlot::reserve(
            &context.push_state,
            batch_id,
            location.host_and_push_port(),
        );

        let encoded = request.encode();
        let context = &context;
        let on_response = &on_response;
        let result = self
            .retry
            .run(operation_name, move |attempt| {
                let encoded = encoded.clone();
                async move {
                    shuffle_fail_point(SEND_RPC_SYNC_BEFORE_SEND)?;

                    let client = context
                        .binding
                        .bind(
                            &self.transport,
                            location,
                            &context.push_state,
                            Some(batch_id),
                            self.config.limit_in_flight_timeout(),
                            &self.shutdown_rx,
                        )
                        .await?;

                    debug!(
                        task = %task,
                        operation = operation_name,
                        attempt,
                        location = %location,
                        "sending push rpc"
                    );
                    let response = self.send_rpc(client.as_ref(), encoded).await?;

                    on_response(response).await
                }
            })
            .await?;

        Ok(Some(result))
    }

    async fn send_rpc(&self, client: &F::Client, request: Bytes) -> ShuffleResult<Bytes> {
        let timeout = self.config.push_rpc_timeout();

        tokio::time::timeout(timeout, client.send_rpc_sync(request, timeout)).await?
    }

    /// Asks the lifecycle manager for a replacement of a location answered with a hard split.
    async fn revive(
        &self,
        task: TaskKey,
        location: &PartitionLocation,
    ) -> ShuffleResult<Option<PartitionLocation>> {
        let request = ReviveRequest {
            application_id: self.application_id.clone(),
            shuffle_id: task.shuffle_id,
            map_id: task.map_id,
            attempt_id: task.attempt_id,
            partition_id: location.id,
            epoch: location.epoch,
            old_location: location.clone(),
            cause: StatusCode::HardSplit,
        };

        let timeout = self.config.revive_rpc_timeout();
        let response = tokio::time::timeout(timeout, self.lifecycle_manager.revive(request, timeout))
            .await??;

        counter!(SHUFFLE_REVIVES_TOTAL, STATUS_LABEL => format!("{:?}", response.status))
            .increment(1);

        match (response.status, response.location) {
            (StatusCode::Success, Some(new_location)) => {
                info!(task = %task, from = %location, to = %new_location, "location revived");
                Ok(Some(new_location))
            }
            (StatusCode::MapEnded, _) => {
                self.mapper_ends.mark_ended(task);
                Ok(None)
            }
            (status, new_location) => {
                bail!(
                    ErrorKind::ReviveFailed,
                    "Revive of a split location failed",
                    format!(
                        "revive of {location} for shuffle {} map {} attempt {} answered {status:?}{}",
                        task.shuffle_id,
                        task.map_id,
                        task.attempt_id,
                        if new_location.is_none() { " without a location" } else { "" }
                    )
                );
            }
        }
    }

    fn task_context(&self, task: TaskKey) -> Arc<TaskPushContext<F::Client>> {
        self.lock_tasks()
            .entry(task)
            .or_insert_with(|| Arc::new(TaskPushContext::new(task)))
            .clone()
    }

    fn existing_context(&self, task: TaskKey) -> Option<Arc<TaskPushContext<F::Client>>> {
        self.lock_tasks().get(&task).cloned()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, TaskRegistry<F::Client>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
