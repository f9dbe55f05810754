//! JSON-RPC client for an external node.
//!
//! Uses a websocket connection so block notifications can be subscribed
//! to. Transactions travel as hex-encoded bincode; block notifications
//! carry hex-encoded header and transaction bytes that are decoded by the
//! wallet's [`ChainFeed`].

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use memwallet::{ChainFeed, MalfunctionReporter, NodeClient, NodeError};
use memwallet_core::address::Address;
use memwallet_core::error::CodecError;
use memwallet_core::types::{Hash256, OutPoint, Transaction};

/// A block notification as delivered by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockNotification {
    Connected { header: String, txs: Vec<String> },
    Disconnected { header: String },
}

#[derive(Debug, Deserialize)]
struct BestBlock {
    hash: String,
    height: u64,
}

/// Delay before connection attempt `attempt + 1`: `ln(attempt + 3) * 50ms`.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(f64::from(attempt + 3).ln() * 0.05)
}

/// The task moving subscription items into a wallet's feed.
#[derive(Debug, Default)]
struct Forwarder {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    /// Install `task`, aborting any forwarder it replaces.
    fn replace(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn abort(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("block notification forwarder aborted");
        }
    }
}

pub struct RpcNodeClient {
    client: WsClient,
    endpoint: String,
    forwarder: Forwarder,
}

impl std::fmt::Debug for RpcNodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcNodeClient")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.client.is_connected())
            .finish()
    }
}

impl RpcNodeClient {
    /// Connect once.
    pub async fn connect(endpoint: &str) -> Result<Self, NodeError> {
        let client = WsClientBuilder::default()
            .build(endpoint)
            .await
            .map_err(transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            forwarder: Forwarder::default(),
        })
    }

    /// Connect, retrying up to `attempts` times with growing backoff.
    /// There is no delay after the final attempt.
    pub async fn connect_with_retry(endpoint: &str, attempts: u32) -> Result<Self, NodeError> {
        let mut last_error = NodeError::Transport("no connection attempts made".into());
        for attempt in 0..attempts {
            match Self::connect(endpoint).await {
                Ok(client) => {
                    info!(endpoint, attempt, "connected to node");
                    return Ok(client);
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = retry_delay(attempt);
                    warn!(endpoint, attempt, error = %e, ?delay, "node connection failed, retrying");
                    last_error = e;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "node connection failed, giving up");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Connect with retry; exhausting the attempts is a setup malfunction.
    pub async fn connect_or_report(
        endpoint: &str,
        attempts: u32,
        reporter: &dyn MalfunctionReporter,
    ) -> Self {
        match Self::connect_with_retry(endpoint, attempts).await {
            Ok(client) => client,
            Err(e) => reporter.report(&format!(
                "could not connect to node at {endpoint} after {attempts} attempts: {e}"
            )),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn transport(e: impl std::fmt::Display) -> NodeError {
    NodeError::Transport(e.to_string())
}

fn classify(e: ClientError) -> NodeError {
    match e {
        ClientError::Call(obj) => NodeError::Rejected(obj.message().to_string()),
        other => transport(other),
    }
}

fn params<I: IntoIterator<Item = serde_json::Value>>(values: I) -> Result<ArrayParams, NodeError> {
    let mut params = ArrayParams::new();
    for v in values {
        params.insert(v).map_err(transport)?;
    }
    Ok(params)
}

fn parse_hash(s: &str) -> Result<Hash256, NodeError> {
    let bytes = hex::decode(s).map_err(transport)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::Transport(format!("hash {s:?} is not 32 bytes")))?;
    Ok(Hash256(bytes))
}

/// Hand one notification to the feed. Bad hex is as fatal as bad bytes.
fn forward(feed: &ChainFeed, notification: BlockNotification) {
    let hex_err = |what: &str, e: hex::FromHexError| {
        CodecError::MalformedHeader(format!("{what} is not valid hex: {e}"))
    };
    match notification {
        BlockNotification::Connected { header, txs } => {
            let header = match hex::decode(&header) {
                Ok(bytes) => bytes,
                Err(e) => feed.reject(hex_err("header", e)),
            };
            let txs = match txs.iter().map(hex::decode).collect::<Result<Vec<_>, _>>() {
                Ok(txs) => txs,
                Err(e) => feed.reject(hex_err("transaction", e)),
            };
            feed.on_block_connected(&header, &txs);
        }
        BlockNotification::Disconnected { header } => match hex::decode(&header) {
            Ok(bytes) => feed.on_block_disconnected(&bytes),
            Err(e) => feed.reject(hex_err("header", e)),
        },
    }
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn notify_blocks(&self, feed: ChainFeed) -> Result<(), NodeError> {
        let mut subscription = self
            .client
            .subscribe::<BlockNotification, _>("notifyblocks", ArrayParams::new(), "stopnotifyblocks")
            .await
            .map_err(classify)?;

        let task = tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                match item {
                    Ok(notification) => forward(&feed, notification),
                    Err(e) => feed.reject(CodecError::MalformedHeader(e.to_string())),
                }
            }
            debug!("block notification stream closed");
        });
        self.forwarder.replace(task);
        Ok(())
    }

    fn stop_notifications(&self) {
        self.forwarder.abort();
    }

    async fn load_tx_filter(
        &self,
        reload: bool,
        addresses: Vec<Address>,
        outpoints: Vec<OutPoint>,
    ) -> Result<(), NodeError> {
        let addresses: Vec<String> = addresses.iter().map(Address::encode).collect();
        let outpoints: Vec<String> = outpoints.iter().map(OutPoint::to_string).collect();
        let params = params([
            serde_json::Value::Bool(reload),
            serde_json::json!(addresses),
            serde_json::json!(outpoints),
        ])?;
        self.client
            .request::<serde_json::Value, _>("loadtxfilter", params)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<Hash256, NodeError> {
        let encoded = tx.to_bytes().map_err(transport)?;
        let params = params([
            serde_json::Value::String(hex::encode(encoded)),
            serde_json::Value::Bool(allow_high_fees),
        ])?;
        let txid: String = self
            .client
            .request("sendrawtransaction", params)
            .await
            .map_err(classify)?;
        parse_hash(&txid)
    }

    async fn get_best_block(&self) -> Result<(Hash256, u64), NodeError> {
        let best: BestBlock = self
            .client
            .request("getbestblock", ArrayParams::new())
            .await
            .map_err(classify)?;
        Ok((parse_hash(&best.hash)?, best.height))
    }
}

impl Drop for RpcNodeClient {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn retry_delay_grows_logarithmically() {
        let first = retry_delay(0);
        assert!(first > Duration::from_millis(54) && first < Duration::from_millis(56));
        let mut previous = first;
        for attempt in 1..10 {
            let d = retry_delay(attempt);
            assert!(d > previous);
            previous = d;
        }
        assert!(retry_delay(100) < Duration::from_millis(240));
    }

    #[test]
    fn notification_json_shape() {
        let json = r#"{"kind":"connected","header":"00","txs":["01","02"]}"#;
        let n: BlockNotification = serde_json::from_str(json).unwrap();
        assert_eq!(
            n,
            BlockNotification::Connected {
                header: "00".into(),
                txs: vec!["01".into(), "02".into()],
            }
        );
        let json = r#"{"kind":"disconnected","header":"ff"}"#;
        assert!(matches!(
            serde_json::from_str::<BlockNotification>(json).unwrap(),
            BlockNotification::Disconnected { .. }
        ));
    }

    #[test]
    fn parse_hash_checks_length() {
        assert_eq!(parse_hash(&"ab".repeat(32)).unwrap(), Hash256([0xAB; 32]));
        assert!(parse_hash("abcd").is_err());
        assert!(parse_hash("zz").is_err());
    }

    #[tokio::test]
    async fn connect_with_retry_gives_up() {
        let err = RpcNodeClient::connect_with_retry("ws://127.0.0.1:1", 2).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }

    #[tokio::test]
    async fn no_backoff_after_last_attempt() {
        let started = Instant::now();
        RpcNodeClient::connect_with_retry("ws://127.0.0.1:1", 2).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= retry_delay(0));
        assert!(elapsed < retry_delay(0) + retry_delay(1), "{elapsed:?}");
    }

    #[tokio::test]
    async fn forwarder_abort_cancels_task() {
        let forwarder = Forwarder::default();
        let first = tokio::spawn(std::future::pending::<()>());
        let first_abort = first.abort_handle();
        forwarder.replace(first);
        let second = tokio::spawn(std::future::pending::<()>());
        let second_abort = second.abort_handle();
        forwarder.replace(second);

        forwarder.abort();
        forwarder.abort();
        for _ in 0..100 {
            if first_abort.is_finished() && second_abort.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(first_abort.is_finished());
        assert!(second_abort.is_finished());
    }
}
