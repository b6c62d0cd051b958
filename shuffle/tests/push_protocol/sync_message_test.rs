use std::time::Duration;

use shuffle::error::ErrorKind;
use shuffle::protocol::{PushDataHandshake, RegionFinish, RegionStart, RpcRequest};
use shuffle::shuffle_error;
use shuffle::test_utils::client::{create_test_client, test_config, wait_until};
use shuffle::test_utils::transport::{PushBehavior, framed_buffer};
use shuffle::types::PartitionMode;
use telemetry::init_test_tracing;
use tokio::time::{sleep, timeout};

use super::{PUSH_PORT, location_a, location_b, task};

#[tokio::test]
async fn handshake_sends_encoded_request_and_releases_its_slot() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);

    test.client
        .handshake(task(), &location_a(), 8, 65536)
        .await
        .unwrap();

    assert_eq!(
        connection.rpc_requests(),
        vec![RpcRequest::Handshake(PushDataHandshake {
            mode: PartitionMode::Primary,
            shuffle_key: "app-test-1".to_string(),
            partition_unique_id: "3-0".to_string(),
            attempt_id: 0,
            num_partitions: 8,
            buffer_size: 65536,
        })]
    );
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn region_messages_carry_region_details() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);

    let new_location = test
        .client
        .region_start(task(), &location_a(), 2, true)
        .await
        .unwrap();
    test.client.region_finish(task(), &location_a()).await.unwrap();

    assert_eq!(new_location, None);
    assert_eq!(
        connection.rpc_requests(),
        vec![
            RpcRequest::RegionStart(RegionStart {
                mode: PartitionMode::Primary,
                shuffle_key: "app-test-1".to_string(),
                partition_unique_id: "3-0".to_string(),
                attempt_id: 0,
                current_region_index: 2,
                is_broadcast: true,
            }),
            RpcRequest::RegionFinish(RegionFinish {
                mode: PartitionMode::Primary,
                shuffle_key: "app-test-1".to_string(),
                partition_unique_id: "3-0".to_string(),
                attempt_id: 0,
            }),
        ]
    );
}

#[tokio::test]
async fn transient_rpc_failures_are_retried() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.respond_to_rpc(Err(shuffle_error!(ErrorKind::RpcTimeout, "Timed out")));
    connection.respond_to_rpc(Err(shuffle_error!(ErrorKind::RpcTimeout, "Timed out")));

    test.client.region_finish(task(), &location_a()).await.unwrap();

    assert_eq!(connection.rpc_requests().len(), 3);
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn non_retryable_rpc_failure_aborts_after_one_attempt() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.respond_to_rpc(Err(shuffle_error!(
        ErrorKind::ProtocolError,
        "Worker rejected request"
    )));

    let err = test
        .client
        .region_finish(task(), &location_a())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RpcFailed);
    assert!(err.has_kind(ErrorKind::ProtocolError));
    assert_eq!(connection.rpc_requests().len(), 1);
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn exhausted_connect_retries_surface_connection_error() {
    init_test_tracing();
    let mut config = test_config();
    config.push.retry.max_retries = 2;
    let test = create_test_client(config);
    test.transport.fail_next_connects("worker-a", PUSH_PORT, 10);

    let err = test
        .client
        .handshake(task(), &location_a(), 1, 1024)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert_eq!(test.transport.connect_count(), 3);
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn messages_for_ended_mapper_are_skipped() {
    init_test_tracing();
    let test = create_test_client(test_config());
    test.client.mapper_end_tracker().mark_ended(task());

    test.client
        .handshake(task(), &location_a(), 1, 1024)
        .await
        .unwrap();
    let new_location = test
        .client
        .region_start(task(), &location_a(), 0, false)
        .await
        .unwrap();
    test.client.region_finish(task(), &location_a()).await.unwrap();

    assert_eq!(new_location, None);
    assert_eq!(test.transport.connect_count(), 0);
}

#[tokio::test]
async fn message_to_new_endpoint_waits_for_pushes_on_previous_one() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection_a = test.transport.connection("worker-a", PUSH_PORT);
    let connection_b = test.transport.connection("worker-b", PUSH_PORT);
    connection_a.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    let handshake = tokio::spawn({
        let client = test.client.clone();
        async move { client.handshake(task(), &location_b(), 1, 1024).await }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!handshake.is_finished());
    assert!(connection_b.rpc_requests().is_empty());

    assert!(connection_a.acknowledge(1));
    handshake.await.unwrap().unwrap();

    assert_eq!(connection_b.rpc_requests().len(), 1);
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn message_to_current_endpoint_proceeds_while_push_switches_away() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection_a = test.transport.connection("worker-a", PUSH_PORT);
    let connection_b = test.transport.connection("worker-b", PUSH_PORT);
    connection_a.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    let switched = tokio::spawn({
        let client = test.client.clone();
        async move {
            client
                .push_data(task(), &location_b(), 0, framed_buffer(b"moved"))
                .await
        }
    });
    sleep(Duration::from_millis(50)).await;
    assert!(!switched.is_finished());

    let handshake = tokio::spawn({
        let client = test.client.clone();
        async move { client.handshake(task(), &location_a(), 1, 1024).await }
    });
    timeout(Duration::from_secs(1), handshake)
        .await
        .expect("handshake on the bound endpoint was blocked by the switch")
        .unwrap()
        .unwrap();

    assert_eq!(connection_a.rpc_requests().len(), 1);
    assert!(!switched.is_finished());
    assert!(connection_b.pushes().is_empty());

    assert!(connection_a.acknowledge(1));
    let accepted = timeout(Duration::from_secs(1), switched)
        .await
        .expect("switch did not complete once the previous endpoint drained")
        .unwrap()
        .unwrap();

    assert_eq!(accepted, 21);
    connection_b.wait_for_pushes(1).await;
    assert_eq!(connection_b.pushed_batch_ids(), vec![2]);
    assert!(test.client.first_error(task()).is_none());
}

#[tokio::test]
async fn recorded_push_failure_is_not_retried_by_messages() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection_a = test.transport.connection("worker-a", PUSH_PORT);
    let connection_b = test.transport.connection("worker-b", PUSH_PORT);
    connection_a.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();
    connection_a.complete(
        1,
        Err(shuffle_error!(ErrorKind::RpcTimeout, "Worker did not answer")),
    );
    wait_until(|| test.client.first_error(task()).is_some()).await;
    let connects_before = test.transport.connect_count();

    let err = test
        .client
        .handshake(task(), &location_b(), 1, 1024)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PushDataFailed);
    assert!(err.has_kind(ErrorKind::RpcTimeout));
    assert_eq!(test.transport.connect_count(), connects_before + 1);
    assert!(connection_b.rpc_requests().is_empty());
}

#[tokio::test]
async fn shutdown_stops_retrying() {
    init_test_tracing();
    let test = create_test_client(test_config());
    test.client.shutdown();

    let err = test
        .client
        .region_finish(task(), &location_a())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(test.transport.connect_count(), 0);
}
