use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::bail;
use crate::error::{ErrorKind, ShuffleResult};
use crate::protocol::{BATCH_HEADER_SIZE, BatchHeader, PushData, RpcRequest};
use crate::shuffle_error;
use crate::test_utils::notify::ActivitySignal;
use crate::transport::{
    LifecycleManagerClient, PushCompletion, ReviveRequest, ReviveResponse, TransportClient,
    TransportClientFactory,
};
use crate::types::BatchId;

/// Builds a push buffer with room for the batch header followed by `payload`.
pub fn framed_buffer(payload: &[u8]) -> BytesMut {
    let mut buffer = BytesMut::with_capacity(BATCH_HEADER_SIZE + payload.len());
    buffer.put_bytes(0, BATCH_HEADER_SIZE);
    buffer.put_slice(payload);
    buffer
}

/// How a [`MockConnection`] answers pushed batches.
#[derive(Debug, Clone)]
pub enum PushBehavior {
    /// Acknowledges every batch right away with the given response.
    Acknowledge(Bytes),
    /// Keeps batches pending until the test completes them.
    Hold,
    /// Fails every batch asynchronously with the given kind.
    Fail(ErrorKind),
}

/// A batch received by a [`MockConnection`].
#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub request: PushData,
    pub header: BatchHeader,
}

#[derive(Debug)]
struct ConnectionState {
    behavior: PushBehavior,
    send_failures: usize,
    pushes: Vec<RecordedPush>,
    pending: HashMap<BatchId, oneshot::Sender<ShuffleResult<Bytes>>>,
    rpc_requests: Vec<RpcRequest>,
    rpc_responses: VecDeque<ShuffleResult<Bytes>>,
}

/// In-memory worker connection recording every request it receives.
#[derive(Debug)]
pub struct MockConnection {
    endpoint: String,
    state: Mutex<ConnectionState>,
    activity: ActivitySignal,
}

impl MockConnection {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            state: Mutex::new(ConnectionState {
                behavior: PushBehavior::Acknowledge(Bytes::new()),
                send_failures: 0,
                pushes: Vec::new(),
                pending: HashMap::new(),
                rpc_requests: Vec::new(),
                rpc_responses: VecDeque::new(),
            }),
            activity: ActivitySignal::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_push_behavior(&self, behavior: PushBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// Makes the next `times` pushes fail before they are sent.
    pub fn fail_next_sends(&self, times: usize) {
        self.state.lock().unwrap().send_failures = times;
    }

    /// Queues the response of the next synchronous request.
    ///
    /// Requests without a queued response are answered with an empty body.
    pub fn respond_to_rpc(&self, response: ShuffleResult<Bytes>) {
        self.state.lock().unwrap().rpc_responses.push_back(response);
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn pushed_batch_ids(&self) -> Vec<BatchId> {
        self.state
            .lock()
            .unwrap()
            .pushes
            .iter()
            .map(|push| push.header.batch_id)
            .collect()
    }

    /// Returns the ids of held batches not completed yet, in ascending order.
    pub fn pending_batches(&self) -> Vec<BatchId> {
        let mut batch_ids: Vec<_> = self.state.lock().unwrap().pending.keys().copied().collect();
        batch_ids.sort_unstable();
        batch_ids
    }

    /// Completes a held batch, returning `false` if it is not pending.
    pub fn complete(&self, batch_id: BatchId, result: ShuffleResult<Bytes>) -> bool {
        let sender = self.state.lock().unwrap().pending.remove(&batch_id);

        match sender {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Acknowledges a held batch with an empty response.
    pub fn acknowledge(&self, batch_id: BatchId) -> bool {
        self.complete(batch_id, Ok(Bytes::new()))
    }

    /// Drops a held batch without answering, as a closed connection would.
    pub fn abandon(&self, batch_id: BatchId) -> bool {
        self.state.lock().unwrap().pending.remove(&batch_id).is_some()
    }

    pub fn rpc_requests(&self) -> Vec<RpcRequest> {
        self.state.lock().unwrap().rpc_requests.clone()
    }

    /// Waits until at least `count` batches were pushed.
    pub async fn wait_for_pushes(&self, count: usize) {
        self.activity
            .wait_for("pushed batches", || {
                self.state.lock().unwrap().pushes.len() >= count
            })
            .await;
    }
}

impl TransportClient for MockConnection {
    fn push_data(&self, request: PushData, _timeout: Duration) -> ShuffleResult<PushCompletion> {
        let header = BatchHeader::read(&request.body)?;
        let (sender, receiver) = oneshot::channel();

        {
            let mut state = self.state.lock().unwrap();
            if state.send_failures > 0 {
                state.send_failures -= 1;
                bail!(
                    ErrorKind::ConnectionFailed,
                    "Mock connection refused the push",
                    format!("batch {} to {}", header.batch_id, self.endpoint)
                );
            }

            match state.behavior.clone() {
                PushBehavior::Acknowledge(response) => {
                    let _ = sender.send(Ok(response));
                }
                PushBehavior::Hold => {
                    state.pending.insert(header.batch_id, sender);
                }
                PushBehavior::Fail(kind) => {
                    let _ = sender.send(Err(shuffle_error!(kind, "Mock push failure")));
                }
            }

            state.pushes.push(RecordedPush { request, header });
        }

        self.activity.signal();

        Ok(receiver)
    }

    async fn send_rpc_sync(&self, request: Bytes, _timeout: Duration) -> ShuffleResult<Bytes> {
        let request = RpcRequest::decode(request)?;

        let response = {
            let mut state = self.state.lock().unwrap();
            state.rpc_requests.push(request);
            state
                .rpc_responses
                .pop_front()
                .unwrap_or_else(|| Ok(Bytes::new()))
        };

        self.activity.signal();

        response
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    connections: HashMap<String, Arc<MockConnection>>,
    connect_failures: HashMap<String, usize>,
    connects: usize,
    closed: bool,
}

/// Connection factory handing out one [`MockConnection`] per endpoint.
///
/// Clones share their connections, so a test keeps a clone to inspect what the client sent.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    inner: Arc<Mutex<FactoryState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connection to `host:port`, creating it if needed.
    pub fn connection(&self, host: &str, port: u16) -> Arc<MockConnection> {
        let endpoint = format!("{host}:{port}");

        self.inner
            .lock()
            .unwrap()
            .connections
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(MockConnection::new(endpoint)))
            .clone()
    }

    /// Replaces the pooled connection to `host:port` with a new one, as after a reconnect.
    pub fn reconnect(&self, host: &str, port: u16) -> Arc<MockConnection> {
        let endpoint = format!("{host}:{port}");
        let connection = Arc::new(MockConnection::new(endpoint.clone()));

        self.inner
            .lock()
            .unwrap()
            .connections
            .insert(endpoint, connection.clone());

        connection
    }

    /// Makes the next `times` connection attempts to `host:port` fail.
    pub fn fail_next_connects(&self, host: &str, port: u16, times: usize) {
        self.inner
            .lock()
            .unwrap()
            .connect_failures
            .insert(format!("{host}:{port}"), times);
    }

    /// Returns how many connections were requested, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl TransportClientFactory for MockTransportFactory {
    type Client = MockConnection;

    async fn create_client(
        &self,
        host: &str,
        port: u16,
        _partition_id: i32,
    ) -> ShuffleResult<Arc<MockConnection>> {
        let endpoint = format!("{host}:{port}");

        {
            let mut state = self.inner.lock().unwrap();
            state.connects += 1;

            if state.closed {
                bail!(
                    ErrorKind::TransportClosed,
                    "Mock transport is closed",
                    endpoint
                );
            }

            let remaining = state.connect_failures.entry(endpoint.clone()).or_default();
            if *remaining > 0 {
                *remaining -= 1;
                bail!(
                    ErrorKind::ConnectionFailed,
                    "Mock connection refused",
                    endpoint
                );
            }
        }

        Ok(self.connection(host, port))
    }

    fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

#[derive(Debug, Default)]
struct LifecycleState {
    responses: VecDeque<ShuffleResult<ReviveResponse>>,
    requests: Vec<ReviveRequest>,
}

/// Lifecycle manager answering revive requests with scripted responses.
#[derive(Debug, Clone, Default)]
pub struct MockLifecycleManager {
    inner: Arc<Mutex<LifecycleState>>,
}

impl MockLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next revive request.
    pub fn respond_with(&self, response: ShuffleResult<ReviveResponse>) {
        self.inner.lock().unwrap().responses.push_back(response);
    }

    pub fn requests(&self) -> Vec<ReviveRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

impl LifecycleManagerClient for MockLifecycleManager {
    async fn revive(
        &self,
        request: ReviveRequest,
        _timeout: Duration,
    ) -> ShuffleResult<ReviveResponse> {
        let mut state = self.inner.lock().unwrap();
        state.requests.push(request);

        match state.responses.pop_front() {
            Some(response) => response,
            None => bail!(
                ErrorKind::ProtocolError,
                "No revive response was scripted"
            ),
        }
    }
}
