use shuffle::error::ErrorKind;
use shuffle::failpoints::{PUSH_DATA_BEFORE_SEND, SEND_RPC_SYNC_BEFORE_SEND};
use shuffle::test_utils::client::{create_test_client, test_config};
use shuffle::test_utils::failpoints::ShuffleFailScenario;
use shuffle::test_utils::transport::framed_buffer;
use shuffle::types::{PartitionLocation, TaskKey};
use telemetry::init_test_tracing;

const PUSH_PORT: u16 = 9092;

fn location() -> PartitionLocation {
    PartitionLocation::new(5, 0, "worker-a", PUSH_PORT)
}

#[tokio::test]
async fn push_failing_before_send_records_first_error() {
    init_test_tracing();
    let _scenario = ShuffleFailScenario::setup(&[(PUSH_DATA_BEFORE_SEND, "1*return(io)")]);
    let test = create_test_client(test_config());
    let task = TaskKey::new(2, 0, 0);

    let accepted = test
        .client
        .push_data(task, &location(), 0, framed_buffer(b"data"))
        .await
        .unwrap();

    assert_eq!(accepted, 20);
    let first_error = test.client.first_error(task).unwrap();
    assert_eq!(first_error.kind(), ErrorKind::PushDataFailed);
    assert!(first_error.has_kind(ErrorKind::IoError));
    assert_eq!(test.client.in_flight_batches(task), 0);
    assert_eq!(test.transport.connect_count(), 0);
}

#[tokio::test]
async fn sync_rpc_recovers_from_transient_fail_point_errors() {
    init_test_tracing();
    let _scenario =
        ShuffleFailScenario::setup(&[(SEND_RPC_SYNC_BEFORE_SEND, "2*return(timeout)")]);
    let test = create_test_client(test_config());
    let task = TaskKey::new(2, 1, 0);

    test.client
        .handshake(task, &location(), 4, 1024)
        .await
        .unwrap();

    let connection = test.transport.connection("worker-a", PUSH_PORT);
    assert_eq!(connection.rpc_requests().len(), 1);
}

#[tokio::test]
async fn sync_rpc_gives_up_on_protocol_fail_point_error() {
    init_test_tracing();
    let _scenario =
        ShuffleFailScenario::setup(&[(SEND_RPC_SYNC_BEFORE_SEND, "return(protocol)")]);
    let test = create_test_client(test_config());
    let task = TaskKey::new(2, 2, 0);

    let err = test
        .client
        .region_finish(task, &location())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RpcFailed);
    assert!(err.has_kind(ErrorKind::ProtocolError));
    assert_eq!(test.transport.connect_count(), 0);
}
