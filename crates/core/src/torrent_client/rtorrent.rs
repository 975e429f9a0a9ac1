//! rTorrent implementation of the torrent directory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::rpc::{HttpTransport, MethodCall, RpcError, RpcTransport, Value, ValueExt};

use super::backoff::{ConfirmBackoff, ConfirmPolicy};
use super::fields::{decode_record, record_calls, FIELDS_PER_RECORD};
use super::{RemovalOutcome, TorrentClientError, TorrentDirectory, TorrentRecord};

/// Downloads fetched per multicall round trip.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// rTorrent client over an RPC transport.
pub struct RtorrentClient {
    transport: Arc<dyn RpcTransport>,
    batch_size: usize,
    confirm: ConfirmPolicy,
    /// Held across erase and its confirmation polls.
    erase_lock: Mutex<()>,
}

impl RtorrentClient {
    /// Create a client with default batching and confirmation policy.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
            confirm: ConfirmPolicy::default(),
            erase_lock: Mutex::new(()),
        }
    }

    /// Create a client talking XML-RPC over HTTP to the configured endpoint.
    pub fn from_config(config: &Config) -> Result<Self, RpcError> {
        let transport = HttpTransport::new(
            &config.rtorrent.url,
            Duration::from_secs(u64::from(config.rtorrent.timeout_secs)),
        )?;
        Ok(Self::new(Arc::new(transport))
            .with_batch_size(config.rtorrent.batch_size)
            .with_confirm_policy(config.erase.policy()))
    }

    /// Set the multicall chunk size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_confirm_policy(mut self, policy: ConfirmPolicy) -> Self {
        self.confirm = policy;
        self
    }

    /// Poll the session until none of `ids` remain or the policy runs out.
    async fn confirm_removed(&self, ids: &[String]) -> Result<RemovalOutcome, TorrentClientError> {
        let mut backoff = ConfirmBackoff::new(self.confirm);
        loop {
            let live: HashSet<String> = self.list_ids().await?.into_iter().collect();
            let remaining: Vec<String> = ids.iter().filter(|id| live.contains(*id)).cloned().collect();

            if remaining.is_empty() {
                debug!(count = ids.len(), polls = backoff.polls() + 1, "Erase confirmed");
                metrics::ERASE_CONFIRMATIONS
                    .with_label_values(&["confirmed"])
                    .inc();
                return Ok(RemovalOutcome::Confirmed);
            }

            match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        remaining = remaining.len(),
                        delay_ms = delay.as_millis() as u64,
                        "Erase not yet visible, polling again"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        remaining = ?remaining,
                        polls = backoff.polls(),
                        "Erase accepted but not confirmed"
                    );
                    metrics::ERASE_CONFIRMATIONS
                        .with_label_values(&["unconfirmed"])
                        .inc();
                    return Ok(RemovalOutcome::TimedOutUnconfirmed { remaining });
                }
            }
        }
    }
}

#[async_trait]
impl TorrentDirectory for RtorrentClient {
    fn name(&self) -> &str {
        "rtorrent"
    }

    async fn list_ids(&self) -> Result<Vec<String>, TorrentClientError> {
        let response = self.transport.call("download_list", Vec::new()).await?;
        let Value::Array(items) = response else {
            return Err(TorrentClientError::MalformedResponse(format!(
                "download_list returned {}",
                response.kind()
            )));
        };
        items
            .into_iter()
            .map(|item| {
                let kind = item.kind();
                item.into_text().ok_or_else(|| {
                    TorrentClientError::MalformedResponse(format!(
                        "download_list entry is {kind}, expected string"
                    ))
                })
            })
            .collect()
    }

    async fn get_records(&self, ids: &[String]) -> Result<Vec<TorrentRecord>, TorrentClientError> {
        let mut records = Vec::with_capacity(ids.len());

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            debug!(batch = index, size = chunk.len(), "Fetching torrent records");
            let calls: Vec<MethodCall> = chunk.iter().flat_map(|id| record_calls(id)).collect();
            let mut results = self.transport.call_batch(calls).await?.into_iter();

            for id in chunk {
                let fields: Vec<_> = results.by_ref().take(FIELDS_PER_RECORD).collect();
                match decode_record(id, fields) {
                    Ok(record) => records.push(record),
                    Err(e) if e.is_fault() => {
                        warn!(id = %id, error = %e, "Download vanished during fetch, skipping");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(records)
    }

    async fn erase(&self, ids: &[String]) -> Result<RemovalOutcome, TorrentClientError> {
        if ids.is_empty() {
            return Ok(RemovalOutcome::Confirmed);
        }
        let _guard = self.erase_lock.lock().await;

        let calls = ids
            .iter()
            .map(|id| MethodCall::new("d.erase", vec![Value::from(id.as_str())]))
            .collect();
        let results = self.transport.call_batch(calls).await?;
        let mut faulted = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(id = %id, error = %e, "d.erase reported a fault");
                faulted.push((id.clone(), e));
            }
        }
        metrics::TORRENTS_ERASED.inc_by((ids.len() - faulted.len()) as u64);
        info!(count = ids.len(), faulted = faulted.len(), "Erase requested");

        if !faulted.is_empty() {
            // A fault for a download that is already gone is harmless.
            let live: HashSet<String> = self.list_ids().await?.into_iter().collect();
            let refused: Vec<(String, RpcError)> = faulted
                .into_iter()
                .filter(|(id, _)| live.contains(id))
                .collect();
            if let Some((_, first)) = refused.first() {
                return Err(TorrentClientError::EraseRefused {
                    reason: first.to_string(),
                    ids: refused.iter().map(|(id, _)| id.clone()).collect(),
                });
            }
        }

        self.confirm_removed(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockRtorrent};

    fn fast_policy() -> ConfirmPolicy {
        ConfirmPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    fn client(mock: &MockRtorrent) -> RtorrentClient {
        RtorrentClient::new(Arc::new(mock.clone())).with_confirm_policy(fast_policy())
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("HASH{i:02}")).collect()
    }

    async fn session(n: usize) -> MockRtorrent {
        let mock = MockRtorrent::new();
        for id in ids(n) {
            mock.add_download(fixtures::download(&id, "/data")).await;
        }
        mock
    }

    #[tokio::test]
    async fn test_list_ids() {
        let mock = session(3).await;
        let listed = client(&mock).list_ids().await.unwrap();
        assert_eq!(listed, ids(3));
    }

    #[tokio::test]
    async fn test_list_ids_empty_session() {
        let mock = MockRtorrent::new();
        assert!(client(&mock).list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_records_chunks_and_keeps_order() {
        let mock = session(7).await;
        let client = client(&mock).with_batch_size(3);
        let wanted = ids(7);

        let records = client.get_records(&wanted).await.unwrap();
        let got: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(got, wanted);

        let multicalls = mock.calls_to("system.multicall").await;
        assert_eq!(multicalls.len(), 3);
    }

    #[tokio::test]
    async fn test_get_records_skips_vanished_downloads() {
        let mock = session(2).await;
        let mut wanted = ids(2);
        wanted.insert(1, "MISSING".to_string());

        let records = client(&mock).get_records(&wanted).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "HASH01");
    }

    #[tokio::test]
    async fn test_get_records_empty_issues_no_call() {
        let mock = session(2).await;
        let records = client(&mock).get_records(&[]).await.unwrap();
        assert!(records.is_empty());
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_ids_over_threshold_does_not_erase() {
        let mock = session(10).await;
        let err = client(&mock).remove_ids(&ids(6), 0.5).await.unwrap_err();
        assert!(matches!(err, TorrentClientError::ThresholdExceeded { .. }));
        assert_eq!(mock.erase_count().await, 0);
        assert_eq!(mock.torrent_count().await, 10);
    }

    #[tokio::test]
    async fn test_remove_ids_within_threshold_erases() {
        let mock = session(10).await;
        let outcome = client(&mock).remove_ids(&ids(6), 0.7).await.unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(mock.torrent_count().await, 4);
        // One batched erase for all six ids.
        let multicalls = mock.calls_to("system.multicall").await;
        assert_eq!(multicalls.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_ids_empty_is_noop() {
        let mock = session(2).await;
        let outcome = client(&mock).remove_ids(&[], 0.0).await.unwrap();
        assert!(outcome.is_confirmed());
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_erase_waits_for_lagging_session() {
        let mock = session(4).await;
        mock.set_erase_lag(2).await;
        let outcome = client(&mock).erase(&ids(1)).await.unwrap();
        assert!(outcome.is_confirmed());
        // Two polls still list the id, the third does not.
        assert_eq!(mock.calls_to("download_list").await.len(), 3);
    }

    #[tokio::test]
    async fn test_erase_unconfirmed_is_not_an_error() {
        let mock = session(4).await;
        mock.set_erase_lag(100).await;
        let outcome = client(&mock).erase(&ids(1)).await.unwrap();
        assert_eq!(
            outcome,
            RemovalOutcome::TimedOutUnconfirmed {
                remaining: vec!["HASH00".to_string()]
            }
        );
        assert_eq!(mock.calls_to("download_list").await.len(), 5);
    }

    #[tokio::test]
    async fn test_refused_erase_is_an_error() {
        let mock = session(3).await;
        mock.refuse_erase("HASH01").await;

        let err = client(&mock).erase(&ids(2)).await.unwrap_err();
        match err {
            TorrentClientError::EraseRefused { ids, reason } => {
                assert_eq!(ids, vec!["HASH01".to_string()]);
                assert!(reason.contains("-503"));
            }
            other => panic!("expected refusal, got {other:?}"),
        }
        assert!(mock.has_torrent("HASH01").await);
        assert!(!mock.has_torrent("HASH00").await);
    }

    #[tokio::test]
    async fn test_fault_for_already_gone_download_is_ignored() {
        let mock = session(2).await;
        let mut wanted = ids(2);
        wanted.push("GONE".to_string());

        let outcome = client(&mock).erase(&wanted).await.unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(mock.torrent_count().await, 0);
    }

    #[tokio::test]
    async fn test_list_failure_during_confirmation_propagates() {
        let mock = session(2).await;
        mock.fail_method("download_list", RpcError::Timeout).await;
        let err = client(&mock).erase(&ids(1)).await.unwrap_err();
        assert!(matches!(err, TorrentClientError::Transport(RpcError::Timeout)));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mock = session(2).await;
        mock.set_next_error(RpcError::Status(502)).await;
        let err = client(&mock).list_ids().await.unwrap_err();
        assert!(matches!(err, TorrentClientError::Transport(RpcError::Status(502))));
    }
}
