use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use config::shared::ShuffleClientConfig;
use shuffle::error::{ErrorKind, ShuffleError};
use shuffle::protocol::{BatchHeader, StatusCode};
use shuffle::shuffle_error;
use shuffle::test_utils::client::{create_test_client, test_config, wait_until};
use shuffle::test_utils::transport::{PushBehavior, framed_buffer};
use shuffle::types::{PartitionMode, TaskKey};
use telemetry::init_test_tracing;
use tokio::sync::Barrier;
use tokio::time::sleep;

use super::{PUSH_PORT, location_a, location_b, task};

fn config_with_cap(cap: usize) -> ShuffleClientConfig {
    let mut config = test_config();
    config.push.max_in_flight_batches_per_endpoint = cap;
    config
}

#[tokio::test]
async fn push_frames_batch_header_and_reports_accepted_bytes() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let task = TaskKey::new(1, 7, 2);
    let location = location_a();

    let accepted = test
        .client
        .push_data(task, &location, 11, framed_buffer(b"hello"))
        .await
        .unwrap();

    assert_eq!(accepted, 21);

    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.wait_for_pushes(1).await;
    let pushes = connection.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(
        pushes[0].header,
        BatchHeader {
            partition_id: 11,
            attempt_id: 2,
            batch_id: 1,
            payload_len: 5,
        }
    );
    assert_eq!(pushes[0].request.mode, PartitionMode::Primary);
    assert_eq!(pushes[0].request.shuffle_key, "app-test-1");
    assert_eq!(pushes[0].request.partition_unique_id, "3-0");
    assert_eq!(&pushes[0].request.body[16..], b"hello");

    wait_until(|| test.client.in_flight_batches(task) == 0).await;
    assert!(test.client.first_error(task).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pushes_reach_transport_in_batch_id_order() {
    init_test_tracing();
    let test = create_test_client(config_with_cap(4));
    let connection = test.transport.connection("worker-a", PUSH_PORT);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let client = test.client.clone();
            tokio::spawn(async move {
                client
                    .push_data(task(), &location_a(), i, framed_buffer(&[i as u8; 8]))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), 24);
    }

    let batch_ids = connection.pushed_batch_ids();
    assert_eq!(batch_ids, (1..=50).collect::<Vec<_>>());
}

#[tokio::test]
async fn push_waits_while_endpoint_is_at_capacity() {
    init_test_tracing();
    let test = create_test_client(config_with_cap(2));
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    for _ in 0..2 {
        test.client
            .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
            .await
            .unwrap();
    }

    let third = tokio::spawn({
        let client = test.client.clone();
        async move {
            client
                .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
                .await
        }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!third.is_finished());
    assert_eq!(connection.pushed_batch_ids(), vec![1, 2]);

    assert!(connection.acknowledge(1));
    third.await.unwrap().unwrap();

    assert_eq!(connection.pushed_batch_ids(), vec![1, 2, 3]);
    assert_eq!(connection.pending_batches(), vec![2, 3]);
}

#[tokio::test]
async fn switching_endpoint_drains_previous_connection_first() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection_a = test.transport.connection("worker-a", PUSH_PORT);
    let connection_b = test.transport.connection("worker-b", PUSH_PORT);
    connection_a.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"first"))
        .await
        .unwrap();

    let switched = tokio::spawn({
        let client = test.client.clone();
        async move {
            client
                .push_data(task(), &location_b(), 0, framed_buffer(b"second"))
                .await
        }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!switched.is_finished());
    assert!(connection_b.pushes().is_empty());

    assert!(connection_a.acknowledge(1));
    switched.await.unwrap().unwrap();

    assert_eq!(connection_b.pushed_batch_ids(), vec![2]);
}

#[tokio::test]
async fn replaced_connection_to_same_endpoint_is_drained() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let old_connection = test.transport.connection("worker-a", PUSH_PORT);
    old_connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"first"))
        .await
        .unwrap();

    let new_connection = test.transport.reconnect("worker-a", PUSH_PORT);
    let pushed = tokio::spawn({
        let client = test.client.clone();
        async move {
            client
                .push_data(task(), &location_a(), 0, framed_buffer(b"second"))
                .await
        }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!pushed.is_finished());

    assert!(old_connection.acknowledge(1));
    pushed.await.unwrap().unwrap();

    assert_eq!(new_connection.pushed_batch_ids(), vec![2]);
}

#[tokio::test]
async fn stage_ended_response_short_circuits_later_pushes() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Acknowledge(Bytes::from(vec![
        StatusCode::StageEnded.as_u8(),
    ])));

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"last"))
        .await
        .unwrap();
    wait_until(|| test.client.mapper_ended(task())).await;

    let accepted = test
        .client
        .push_data(task(), &location_a(), 0, framed_buffer(b"ignored"))
        .await
        .unwrap();

    assert_eq!(accepted, 0);
    assert_eq!(connection.pushed_batch_ids(), vec![1]);
}

#[tokio::test]
async fn push_for_ended_mapper_does_not_touch_the_network() {
    init_test_tracing();
    let test = create_test_client(test_config());
    test.client.mapper_end_tracker().mark_ended(task());

    let accepted = test
        .client
        .push_data(task(), &location_a(), 0, framed_buffer(b"ignored"))
        .await
        .unwrap();

    assert_eq!(accepted, 0);
    assert_eq!(test.transport.connect_count(), 0);
}

#[tokio::test]
async fn first_failure_is_recorded_once_and_fails_later_pushes() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    for _ in 0..2 {
        test.client
            .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
            .await
            .unwrap();
    }

    connection.complete(
        1,
        Err(shuffle_error!(ErrorKind::RpcTimeout, "Worker did not answer")),
    );
    wait_until(|| test.client.first_error(task()).is_some()).await;

    connection.complete(
        2,
        Err(shuffle_error!(ErrorKind::ProtocolError, "Worker rejected batch")),
    );
    wait_until(|| test.client.in_flight_batches(task()) == 0).await;

    let first_error = test.client.first_error(task()).unwrap();
    assert_eq!(first_error.kind(), ErrorKind::PushDataFailed);
    assert!(first_error.has_kind(ErrorKind::RpcTimeout));
    assert!(!first_error.has_kind(ErrorKind::ProtocolError));
    let detail = first_error.detail().unwrap();
    assert!(detail.contains("shuffle 1 map 7 attempt 0 batch 1"), "{detail}");
    assert!(detail.contains("worker-a:9092"), "{detail}");

    let err = test
        .client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PushDataFailed);
    assert_eq!(connection.pushed_batch_ids(), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_record_a_single_consistent_first_error() {
    const BATCHES: i32 = 8;

    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    for _ in 0..BATCHES {
        test.client
            .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
            .await
            .unwrap();
    }
    assert_eq!(connection.pending_batches(), (1..=BATCHES).collect::<Vec<_>>());

    let barrier = Arc::new(Barrier::new(BATCHES as usize));
    let completions: Vec<_> = (1..=BATCHES)
        .map(|batch_id| {
            let connection = connection.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                connection.complete(
                    batch_id,
                    Err(shuffle_error!(
                        ErrorKind::IoError,
                        "Connection reset",
                        format!("failed batch {batch_id}")
                    )),
                )
            })
        })
        .collect();
    for completed in futures::future::join_all(completions).await {
        assert!(completed.unwrap());
    }
    wait_until(|| test.client.in_flight_batches(task()) == 0).await;

    let first_error = test.client.first_error(task()).unwrap();
    assert_eq!(first_error.kind(), ErrorKind::PushDataFailed);

    // The recorded context and its cause come from the same batch.
    let cause = first_error
        .source()
        .and_then(|source| source.downcast_ref::<ShuffleError>())
        .unwrap();
    let failed_batch = cause.detail().unwrap().strip_prefix("failed batch ").unwrap();
    let detail = first_error.detail().unwrap();
    assert!(detail.ends_with(&format!("batch {failed_batch}")), "{detail}");

    let again = test.client.first_error(task()).unwrap();
    assert_eq!(again.detail(), first_error.detail());
}

#[tokio::test]
async fn failure_after_mapper_ended_is_suppressed() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();
    test.client.mapper_end_tracker().mark_ended(task());

    connection.complete(
        1,
        Err(shuffle_error!(ErrorKind::IoError, "Connection reset")),
    );
    wait_until(|| test.client.in_flight_batches(task()) == 0).await;

    assert!(test.client.first_error(task()).is_none());
}

#[tokio::test]
async fn synchronous_send_failure_takes_the_failure_path() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.fail_next_sends(1);

    let accepted = test
        .client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    assert_eq!(accepted, 20);
    assert_eq!(test.client.in_flight_batches(task()), 0);
    let first_error = test.client.first_error(task()).unwrap();
    assert_eq!(first_error.kind(), ErrorKind::PushDataFailed);
    assert!(first_error.has_kind(ErrorKind::ConnectionFailed));
}

#[tokio::test]
async fn connect_failure_takes_the_failure_path() {
    init_test_tracing();
    let test = create_test_client(test_config());
    test.transport.fail_next_connects("worker-a", PUSH_PORT, 1);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    let first_error = test.client.first_error(task()).unwrap();
    assert!(first_error.has_kind(ErrorKind::ConnectionFailed));
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn abandoned_push_is_reported_as_closed_connection() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();
    assert!(connection.abandon(1));

    wait_until(|| test.client.first_error(task()).is_some()).await;
    let first_error = test.client.first_error(task()).unwrap();
    assert!(first_error.has_kind(ErrorKind::TransportClosed));
    assert_eq!(test.client.in_flight_batches(task()), 0);
}

#[tokio::test]
async fn buffer_without_header_room_is_rejected() {
    init_test_tracing();
    let test = create_test_client(test_config());

    let err = test
        .client
        .push_data(task(), &location_a(), 0, BytesMut::from(&[0u8; 4][..]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert_eq!(test.transport.connect_count(), 0);
}

#[tokio::test]
async fn cleanup_forgets_task_state() {
    init_test_tracing();
    let test = create_test_client(test_config());
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();
    assert_eq!(test.client.in_flight_batches(task()), 1);

    test.client.cleanup(task());

    assert_eq!(test.client.in_flight_batches(task()), 0);
    assert!(test.client.first_error(task()).is_none());

    // A late completion of a forgotten batch is harmless.
    assert!(connection.acknowledge(1));
}

#[tokio::test]
async fn shutdown_cancels_push_waiting_for_capacity() {
    init_test_tracing();
    let test = create_test_client(config_with_cap(1));
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    let blocked = tokio::spawn({
        let client = test.client.clone();
        async move {
            client
                .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
                .await
        }
    });
    sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    test.client.shutdown();

    let err = blocked.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(test.transport.is_closed());
    assert_eq!(connection.pushed_batch_ids(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn push_gives_up_when_capacity_never_frees() {
    init_test_tracing();
    let mut config = config_with_cap(1);
    config.push.push_rpc_timeout_ms = 60_000;
    let test = create_test_client(config);
    let connection = test.transport.connection("worker-a", PUSH_PORT);
    connection.set_push_behavior(PushBehavior::Hold);

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    let err = test
        .client
        .push_data(task(), &location_a(), 0, framed_buffer(b"data"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InFlightLimitTimeout);
    assert!(test.client.first_error(task()).is_none());
}
