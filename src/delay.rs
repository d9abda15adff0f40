use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wait for `duration` or until `cancel` fires, whichever comes first.
///
/// Both outcomes look the same to the caller, which is expected to check the
/// token itself afterwards. The timer is dropped as soon as cancellation wins.
pub async fn delay(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
