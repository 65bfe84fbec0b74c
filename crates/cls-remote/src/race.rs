use std::sync::Arc;
use std::time::Duration;

use cls_types::{Endpoint, ProcessId};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;

use crate::discovery::discover_candidates;
use crate::error::{RemoteError, Result};
use crate::session::RemoteSession;
use crate::transport::Connector;

/// Agent port bases; the editor listens on `base + pid % 1000`
const PORT_BASES: [u16; 2] = [56000, 55000];

/// Loopback endpoints a process with this pid may be listening on
pub fn candidate_endpoints(pid: ProcessId) -> Vec<Endpoint> {
    let offset = (pid % 1000) as u16;
    PORT_BASES
        .iter()
        .map(|base| Endpoint::localhost(base + offset))
        .collect()
}

/// Race connection attempts to every endpoint and keep the first that
/// completes a full pause/resume round trip.
///
/// Losing attempts are cancelled and awaited, so no connection outlives the call.
pub async fn connect(
    connector: Arc<dyn Connector>,
    pid: Option<ProcessId>,
    endpoints: &[Endpoint],
    cancel: &CancellationToken,
) -> Result<RemoteSession> {
    settle(race(connector, pid, endpoints, cancel, None).await, cancel).await
}

/// Connect to a process by pid, bounded by `timeout`
pub async fn connect_process(
    connector: Arc<dyn Connector>,
    pid: ProcessId,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RemoteSession> {
    let won = race(connector, Some(pid), &candidate_endpoints(pid), cancel, Some(timeout)).await;
    settle(won, cancel).await
}

/// Connect to a single known endpoint, bounded by `timeout`
pub async fn connect_endpoint(
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RemoteSession> {
    settle(race(connector, None, &[endpoint], cancel, Some(timeout)).await, cancel).await
}

/// A caller cancel that lands while losers drain still discards the winner
async fn settle(won: Result<RemoteSession>, cancel: &CancellationToken) -> Result<RemoteSession> {
    match won {
        Ok(mut session) if cancel.is_cancelled() => {
            session.dispose().await;
            Err(RemoteError::Cancelled)
        }
        other => other,
    }
}

/// Connect to every discovered editor in parallel under one shared timeout.
/// Processes that cannot be reached are skipped.
pub async fn discover_and_connect_all(
    connector: Arc<dyn Connector>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteSession>> {
    let pids: Vec<ProcessId> = discover_candidates().into_iter().map(|c| c.pid).collect();
    connect_all(connector, &pids, timeout, cancel).await
}

pub(crate) async fn connect_all(
    connector: Arc<dyn Connector>,
    pids: &[ProcessId],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteSession>> {
    // Fires at the deadline or on caller cancel; sessions won before it are kept
    let stop = cancel.child_token();
    let deadline = {
        let token = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    };

    let mut attempts: FuturesUnordered<_> = pids
        .iter()
        .map(|&pid| {
            let connector = Arc::clone(&connector);
            let token = stop.clone();
            tokio::spawn(async move {
                let endpoints = candidate_endpoints(pid);
                (pid, race(connector, Some(pid), &endpoints, &token, None).await)
            })
        })
        .collect();

    let mut sessions = Vec::new();
    while let Some(joined) = attempts.next().await {
        match joined {
            Ok((_, Ok(session))) => sessions.push(session),
            Ok((pid, Err(e))) => tracing::debug!(pid, error = %e, "Skipping unreachable process"),
            Err(e) => tracing::warn!(error = %e, "Connection task failed"),
        }
    }
    deadline.abort();

    if cancel.is_cancelled() {
        for session in &mut sessions {
            session.dispose().await;
        }
        return Err(RemoteError::Cancelled);
    }

    sessions.sort_by_key(|s| s.pid());
    Ok(sessions)
}

async fn race(
    connector: Arc<dyn Connector>,
    pid: Option<ProcessId>,
    endpoints: &[Endpoint],
    stop: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<RemoteSession> {
    let race_cancel = stop.child_token();

    let mut attempts: FuturesUnordered<_> = endpoints
        .iter()
        .map(|&endpoint| {
            let connector = Arc::clone(&connector);
            let token = race_cancel.clone();
            let handle = tokio::spawn(async move { attempt(connector, pid, endpoint, token).await });
            async move { (endpoint, handle.await) }
        })
        .collect();

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut winner: Option<RemoteSession> = None;
    let mut failures = Vec::new();
    let mut timed_out = false;

    loop {
        tokio::select! {
            next = attempts.next() => {
                let Some((endpoint, joined)) = next else { break };
                let outcome = joined.unwrap_or_else(|e| {
                    Err(RemoteError::Io(std::io::Error::other(e.to_string())))
                });
                match outcome {
                    Ok(mut session) => {
                        if winner.is_none() && !stop.is_cancelled() {
                            tracing::info!(%endpoint, "Connected to debugger agent");
                            winner = Some(session);
                            race_cancel.cancel();
                        } else {
                            session.dispose().await;
                        }
                    }
                    Err(RemoteError::Cancelled) if winner.is_some() || stop.is_cancelled() => {}
                    Err(RemoteError::Cancelled) if timed_out => {
                        tracing::debug!(%endpoint, "Connection attempt timed out");
                        failures.push((endpoint, RemoteError::timed_out()));
                    }
                    Err(e) => {
                        tracing::debug!(%endpoint, error = %e, "Connection attempt failed");
                        failures.push((endpoint, e));
                    }
                }
            }
            _ = &mut deadline, if !timed_out => {
                timed_out = true;
                race_cancel.cancel();
            }
        }
    }

    match winner {
        Some(session) => Ok(session),
        None if stop.is_cancelled() => Err(RemoteError::Cancelled),
        None => Err(RemoteError::ConnectionFailed { failures }),
    }
}

/// One endpoint: transport connect, then a pause/resume round trip
async fn attempt(
    connector: Arc<dyn Connector>,
    pid: Option<ProcessId>,
    endpoint: Endpoint,
    cancel: CancellationToken,
) -> Result<RemoteSession> {
    let connection = tokio::select! {
        _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
        connection = connector.connect(&endpoint) => connection?,
    };

    let mut session = RemoteSession::new(pid, endpoint, connection);
    match session.load_project_root(&cancel).await {
        Ok(()) => Ok(session),
        Err(e) => {
            session.dispose().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockConnector, MockScript};

    fn ports() -> [Endpoint; 3] {
        [
            Endpoint::localhost(56001),
            Endpoint::localhost(56002),
            Endpoint::localhost(56003),
        ]
    }

    #[test]
    fn test_candidate_endpoints() {
        assert_eq!(
            candidate_endpoints(12345),
            vec![Endpoint::localhost(56345), Endpoint::localhost(55345)]
        );
    }

    #[tokio::test]
    async fn test_only_third_endpoint_succeeds() {
        let [first, second, third] = ports();
        let connector = Arc::new(MockConnector::new(vec![
            (
                first,
                MockScript {
                    connect_error: true,
                    ..MockScript::default()
                },
            ),
            (
                second,
                MockScript {
                    polls_before_hit: usize::MAX,
                    ..MockScript::default()
                },
            ),
            (
                third,
                MockScript {
                    project_root: "/work/Game".into(),
                    connect_delay: Duration::from_millis(20),
                    ..MockScript::default()
                },
            ),
        ]));

        let cancel = CancellationToken::new();
        let session = connect(connector.clone(), Some(1), &ports(), &cancel)
            .await
            .unwrap();

        assert_eq!(session.endpoint(), third);
        assert_eq!(session.project_root(), "/work/Game");
        assert!(connector.calls_for(first).is_empty());

        // The stalled attempt was cancelled, disarmed and detached before connect returned
        let second_calls = connector.calls_for(second);
        assert!(second_calls.contains(&Call::Disarm));
        assert_eq!(second_calls.last(), Some(&Call::Detach));
        assert!(!connector.calls_for(third).contains(&Call::Detach));
    }

    #[tokio::test]
    async fn test_all_failures_reported() {
        let [first, second, _] = ports();
        let connector = Arc::new(MockConnector::new(vec![(
            first,
            MockScript {
                connect_error: true,
                ..MockScript::default()
            },
        )]));

        let cancel = CancellationToken::new();
        let err = connect(connector, None, &[first, second], &cancel)
            .await
            .unwrap_err();
        match err {
            RemoteError::ConnectionFailed { failures } => {
                let endpoints: Vec<_> = failures.iter().map(|(e, _)| *e).collect();
                assert_eq!(endpoints.len(), 2);
                assert!(endpoints.contains(&first) && endpoints.contains(&second));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_reports_timed_out_endpoint() {
        let endpoint = Endpoint::localhost(56009);
        let connector = Arc::new(MockConnector::new(vec![(
            endpoint,
            MockScript {
                polls_before_hit: usize::MAX,
                ..MockScript::default()
            },
        )]));

        let cancel = CancellationToken::new();
        let err = connect_endpoint(connector.clone(), endpoint, Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        match err {
            RemoteError::ConnectionFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(&failures[0].1, RemoteError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(connector.calls_for(endpoint).last(), Some(&Call::Detach));
    }

    #[tokio::test]
    async fn test_caller_cancel_disposes_everything() {
        let [first, second, _] = ports();
        let stalled = MockScript {
            polls_before_hit: usize::MAX,
            ..MockScript::default()
        };
        let connector = Arc::new(MockConnector::new(vec![
            (first, stalled.clone()),
            (second, stalled),
        ]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = connect(connector.clone(), None, &[first, second], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
        for endpoint in [first, second] {
            assert_eq!(connector.calls_for(endpoint).last(), Some(&Call::Detach));
        }
    }

    #[tokio::test]
    async fn test_connect_all_skips_failures() {
        let connector = Arc::new(MockConnector::new(vec![
            (Endpoint::localhost(56010), MockScript::default()),
            (Endpoint::localhost(55020), MockScript::default()),
        ]));

        let cancel = CancellationToken::new();
        let sessions = connect_all(connector, &[10, 20, 30], Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        let pids: Vec<_> = sessions.iter().map(|s| s.pid()).collect();
        assert_eq!(pids, vec![Some(10), Some(20)]);
    }

    fn stalled() -> MockScript {
        MockScript {
            polls_before_hit: usize::MAX,
            ..MockScript::default()
        }
    }

    #[tokio::test]
    async fn test_connect_all_keeps_winner_when_deadline_hits_while_loser_drains() {
        // 55001 is still inside its poll slice when the 50 ms deadline fires
        let connector = Arc::new(MockConnector::new(vec![
            (Endpoint::localhost(56001), MockScript::default()),
            (Endpoint::localhost(55001), stalled()),
        ]));

        let cancel = CancellationToken::new();
        let sessions = connect_all(connector.clone(), &[1], Duration::from_millis(50), &cancel)
            .await
            .unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pid(), Some(1));
        assert_eq!(sessions[0].endpoint(), Endpoint::localhost(56001));
        assert!(!connector.calls_for(Endpoint::localhost(56001)).contains(&Call::Detach));
        assert_eq!(connector.calls_for(Endpoint::localhost(55001)).last(), Some(&Call::Detach));
    }

    #[tokio::test]
    async fn test_connect_all_cancel_disposes_connected_sessions() {
        let connector = Arc::new(MockConnector::new(vec![
            (Endpoint::localhost(56001), MockScript::default()),
            (Endpoint::localhost(56002), stalled()),
        ]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = connect_all(connector.clone(), &[1, 2], Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));

        // pid 1 connected before the cancel and was still detached
        let first = connector.calls_for(Endpoint::localhost(56001));
        assert!(first.contains(&Call::Resume));
        assert_eq!(first.last(), Some(&Call::Detach));
        assert_eq!(connector.calls_for(Endpoint::localhost(56002)).last(), Some(&Call::Detach));
    }

    #[tokio::test]
    async fn test_cancel_while_loser_drains_discards_winner() {
        let [first, second, _] = ports();
        let connector = Arc::new(MockConnector::new(vec![
            (first, MockScript::default()),
            (second, stalled()),
        ]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = connect(connector.clone(), None, &[first, second], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
        assert_eq!(connector.calls_for(first).last(), Some(&Call::Detach));
        assert_eq!(connector.calls_for(second).last(), Some(&Call::Detach));
    }
}
