use shuffle::metrics::{SHUFFLE_PUSH_BATCHES_IN_FLIGHT, SHUFFLE_PUSH_BYTES_TOTAL};
use shuffle::test_utils::client::{create_test_client, test_config, wait_until};
use shuffle::test_utils::transport::framed_buffer;
use shuffle::types::TaskKey;
use telemetry::init_test_tracing;
use telemetry::metrics::init_metrics_handle;

use super::{PUSH_PORT, location_a, task};

#[tokio::test]
async fn pushes_are_exported_as_prometheus_metrics() {
    init_test_tracing();
    let handle = init_metrics_handle().unwrap();
    let test = create_test_client(test_config());

    test.client
        .push_data(task(), &location_a(), 0, framed_buffer(b"metrics"))
        .await
        .unwrap();
    wait_until(|| test.client.in_flight_batches(task()) == 0).await;

    let rendered = handle.render();
    assert!(rendered.contains(SHUFFLE_PUSH_BYTES_TOTAL), "{rendered}");
    assert!(rendered.contains(SHUFFLE_PUSH_BATCHES_IN_FLIGHT), "{rendered}");
}

#[tokio::test]
async fn bytes_of_unsent_batches_are_not_counted() {
    init_test_tracing();
    let handle = init_metrics_handle().unwrap();
    let test = create_test_client(test_config());
    let task = TaskKey::new(42, 1, 0);
    test.transport
        .connection("worker-a", PUSH_PORT)
        .fail_next_sends(1);

    let accepted = test
        .client
        .push_data(task, &location_a(), 0, framed_buffer(b"lost"))
        .await
        .unwrap();

    assert_eq!(accepted, 20);
    assert!(test.client.first_error(task).is_some());

    let rendered = handle.render();
    let counted = rendered
        .lines()
        .any(|line| line.starts_with(SHUFFLE_PUSH_BYTES_TOTAL) && line.contains("shuffle_id=\"42\""));
    assert!(!counted, "{rendered}");
}
