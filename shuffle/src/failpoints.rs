use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, ShuffleResult};

pub const PUSH_DATA_BEFORE_SEND: &str = "push_data.before_send";
pub const SEND_RPC_SYNC_BEFORE_SEND: &str = "send_rpc_sync.before_send";

/// Evaluates a fail point, turning an activated one into an error of the requested kind.
///
/// The parameter selects the kind: `timeout`, `io`, `connect` or `protocol`.
pub fn shuffle_fail_point(name: &str) -> ShuffleResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("timeout") => ErrorKind::RpcTimeout,
            Some("io") => ErrorKind::IoError,
            Some("connect") => ErrorKind::ConnectionFailed,
            _ => ErrorKind::ProtocolError,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
