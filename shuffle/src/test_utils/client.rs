use std::sync::Arc;
use std::time::Duration;

use config::shared::{PushConfig, RetryConfig, ShuffleClientConfig};
use tokio::time::{sleep, timeout};

use crate::push::ShuffleClient;
use crate::test_utils::notify::DEFAULT_NOTIFY_TIMEOUT;
use crate::test_utils::transport::{MockLifecycleManager, MockTransportFactory};

pub const TEST_APPLICATION_ID: &str = "app-test";

pub type TestShuffleClient = ShuffleClient<MockTransportFactory, MockLifecycleManager>;

/// A client wired to mock collaborators, with handles to inspect them.
pub struct TestClient {
    pub client: Arc<TestShuffleClient>,
    pub transport: MockTransportFactory,
    pub lifecycle_manager: MockLifecycleManager,
}

/// Returns a configuration with short timeouts and backoff suited to tests.
pub fn test_config() -> ShuffleClientConfig {
    ShuffleClientConfig {
        application_id: TEST_APPLICATION_ID.to_string(),
        push: PushConfig {
            max_in_flight_batches_per_endpoint: 16,
            push_rpc_timeout_ms: 5_000,
            revive_rpc_timeout_ms: 5_000,
            limit_in_flight_timeout_ms: 10_000,
            io_threads: 2,
            retry: RetryConfig {
                max_retries: 3,
                retry_backoff_ms: 10,
            },
        },
    }
}

pub fn create_test_client(config: ShuffleClientConfig) -> TestClient {
    let transport = MockTransportFactory::new();
    let lifecycle_manager = MockLifecycleManager::new();
    let client = ShuffleClient::new(config, transport.clone(), lifecycle_manager.clone())
        .expect("test configuration is valid");

    TestClient {
        client: Arc::new(client),
        transport,
        lifecycle_manager,
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within [`DEFAULT_NOTIFY_TIMEOUT`].
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let polling = async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    };

    if timeout(DEFAULT_NOTIFY_TIMEOUT, polling).await.is_err() {
        panic!("condition not reached within {DEFAULT_NOTIFY_TIMEOUT:?}");
    }
}

