//! Tezos adapter.

use super::{Blockchain, endpoint_from_env};
use crate::Result;
use crate::fetch::{BatchFetchConfig, BatchFetcher, FetchStats, HttpTransport};
use chainstat_core::{Action, Block};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RPC_ENDPOINT: &str = "https://api.tezos.org.ua";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub level: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    pub kind: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TezosBlock {
    pub header: Header,
    /// Operations grouped by validation pass.
    #[serde(default)]
    pub operations: Vec<Vec<Operation>>,
    #[serde(skip)]
    actions: OnceLock<Vec<Action>>,
}

impl Block for TezosBlock {
    fn number(&self) -> u64 {
        self.header.level
    }

    fn time(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    fn transactions_count(&self) -> usize {
        self.operations.iter().map(Vec::len).sum()
    }

    fn list_actions(&self) -> &[Action] {
        self.actions.get_or_init(|| {
            self.operations
                .iter()
                .flatten()
                .flat_map(|operation| &operation.contents)
                .map(|content| Action::new(&content.kind, &content.source, &content.destination))
                .collect()
        })
    }
}

/// Tezos mainnet through a node RPC endpoint.
#[derive(Debug, Clone)]
pub struct Tezos {
    rpc_endpoint: String,
    fetch: BatchFetchConfig,
}

impl Tezos {
    pub fn new(rpc_endpoint: impl Into<String>, fetch: BatchFetchConfig) -> Self {
        Self {
            rpc_endpoint: rpc_endpoint.into(),
            fetch,
        }
    }

    /// Endpoint from `TEZOS_RPC_ENDPOINT`, default fetch settings.
    pub fn from_env() -> Self {
        Self::new(
            endpoint_from_env("TEZOS_RPC_ENDPOINT", DEFAULT_RPC_ENDPOINT),
            BatchFetchConfig::default(),
        )
    }

    pub fn block_url(&self, number: u64) -> String {
        format!("{}/chains/main/blocks/{}", self.rpc_endpoint, number)
    }
}

impl Blockchain for Tezos {
    type Block = TezosBlock;

    fn name(&self) -> &'static str {
        "tezos"
    }

    fn parse_block(&self, raw: &[u8]) -> Result<TezosBlock> {
        Ok(serde_json::from_slice(raw)?)
    }

    async fn fetch_data(
        &self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: CancellationToken,
    ) -> Result<FetchStats> {
        tracing::info!("Fetching Tezos blocks {}..={} from {}", start, end, self.rpc_endpoint);
        let this = self.clone();
        let transport =
            HttpTransport::new(move |client, number| client.get(this.block_url(number)))?;
        BatchFetcher::new(transport, self.fetch.clone())
            .fetch(output, start, end, &shutdown)
            .await
    }
}
