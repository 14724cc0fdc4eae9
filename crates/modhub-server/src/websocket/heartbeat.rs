//! Liveness monitoring.
//!
//! The write task sends Ping frames; this loop only watches how long the
//! module has been silent.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ModuleConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The module stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection until it goes silent for `timeout` or `cancel` fires.
///
/// Silence is checked every `interval`, so the actual cut-off lands within
/// one interval after `timeout`.
pub async fn run_heartbeat(
    connection: Arc<ModuleConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.last_seen_elapsed() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhub_core::ConnectionId;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ModuleConnection> {
        let (tx, _rx) = mpsc::channel(32);
        Arc::new(ModuleConnection::new(ConnectionId::new(), "hb".into(), tx))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let conn = make_connection();
        let result = run_heartbeat(
            conn,
            Duration::from_secs(1),
            Duration::from_secs(3),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_up() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            conn.clone(),
            Duration::from_secs(1),
            Duration::from_secs(3),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_secs(1)).await;
            conn.mark_alive();
        }
        assert!(!handle.is_finished());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(
            conn,
            Duration::from_secs(60),
            Duration::from_secs(120),
            cancel,
        )
        .await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }
}
