use config::shared::PushConfig;
use tokio::runtime::Runtime;

use crate::error::ShuffleResult;

/// Thread name prefix of the push I/O runtime.
const IO_THREAD_NAME: &str = "shuffle-push-io";

/// Builds the multi-threaded runtime that drives push I/O and completions.
///
/// The runtime gets one worker thread per configured I/O thread.
pub fn build_io_runtime(config: &PushConfig) -> ShuffleResult<Runtime> {
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads)
        .thread_name(IO_THREAD_NAME)
        .enable_all()
        .build()?;

    Ok(runtime)
}
