//! EOS adapter.

use super::{Blockchain, MaybeInline, endpoint_from_env};
use crate::Result;
use crate::fetch::{BatchFetchConfig, BatchFetcher, FetchStats, HttpTransport};
use chainstat_core::{Action, Block};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PRODUCER_URL: &str = "https://api.main.alohaeos.com:443";

/// Block producers emit timestamps without a zone; they are UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(
        time: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.naive_utc().format("%Y-%m-%dT%H:%M:%S%.3f"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(trimmed, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Authorization {
    pub actor: String,
    #[serde(default)]
    pub permission: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EosAction {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub authorization: Vec<Authorization>,
    /// Contract-specific payload, ABI-decoded by the producer when possible.
    #[serde(default)]
    pub data: Value,
}

/// Payload of a token `transfer` action.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TransferData {
    from: String,
    to: String,
    quantity: String,
    memo: String,
}

/// One token transfer, in CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub block: u64,
    pub tx: String,
    pub account: String,
    pub symbol: String,
    pub from: String,
    pub to: String,
    pub quantity: String,
    pub memo: String,
}

impl Transfer {
    pub const COLUMNS: [&'static str; 8] =
        ["block", "tx", "account", "symbol", "from", "to", "quantity", "memo"];
}

/// Split an asset such as `"1.0000 EOS"` into amount and symbol.
///
/// The amount must be a number and be separated from the symbol by exactly
/// one space.
pub fn parse_quantity(raw: &str) -> Option<(&str, &str)> {
    let (amount, symbol) = raw.split_once(' ')?;
    if symbol.is_empty() || symbol.contains(' ') || amount.parse::<f64>().is_err() {
        return None;
    }
    Some((amount, symbol))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionBody {
    #[serde(default)]
    pub actions: Vec<EosAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackedTransaction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub transaction: TransactionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(default)]
    pub status: String,
    /// Deferred transactions only carry their id.
    pub trx: MaybeInline<PackedTransaction>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EosBlock {
    pub block_num: u64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub transactions: Vec<TransactionReceipt>,
    #[serde(skip)]
    actions: OnceLock<Vec<Action>>,
}

impl Block for EosBlock {
    fn number(&self) -> u64 {
        self.block_num
    }

    fn time(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn transactions_count(&self) -> usize {
        self.transactions.len()
    }

    fn list_actions(&self) -> &[Action] {
        self.actions.get_or_init(|| {
            self.transactions
                .iter()
                .filter_map(|receipt| receipt.trx.inline())
                .flat_map(|trx| &trx.transaction.actions)
                .map(|action| {
                    let sender = action
                        .authorization
                        .first()
                        .map_or("", |auth| auth.actor.as_str());
                    Action::new(&action.name, sender, &action.account)
                })
                .collect()
        })
    }
}

impl EosBlock {
    /// Token transfers of the executed inline transactions.
    ///
    /// Transfer actions whose payload is not a decoded transfer, or whose
    /// quantity is malformed, are skipped.
    pub fn transfers(&self) -> impl Iterator<Item = Transfer> + '_ {
        self.transactions
            .iter()
            .filter_map(|receipt| receipt.trx.inline())
            .flat_map(move |trx| {
                trx.transaction
                    .actions
                    .iter()
                    .filter(|action| action.name == "transfer")
                    .filter_map(move |action| self.transfer(&trx.id, action))
            })
    }

    fn transfer(&self, tx: &str, action: &EosAction) -> Option<Transfer> {
        let data = TransferData::deserialize(&action.data).ok()?;
        let Some((quantity, symbol)) = parse_quantity(&data.quantity) else {
            tracing::debug!(
                "Skipping transfer in block {} with quantity {:?}",
                self.block_num,
                data.quantity
            );
            return None;
        };
        Some(Transfer {
            block: self.block_num,
            tx: tx.to_string(),
            account: action.account.clone(),
            symbol: symbol.to_string(),
            from: data.from,
            to: data.to,
            quantity: quantity.to_string(),
            memo: data.memo,
        })
    }
}

/// EOS mainnet through a block producer API.
#[derive(Debug, Clone)]
pub struct Eos {
    producer_url: String,
    fetch: BatchFetchConfig,
}

impl Eos {
    pub fn new(producer_url: impl Into<String>, fetch: BatchFetchConfig) -> Self {
        Self {
            producer_url: producer_url.into(),
            fetch,
        }
    }

    /// Endpoint from `EOS_PRODUCER_URL`, default fetch settings.
    pub fn from_env() -> Self {
        Self::new(
            endpoint_from_env("EOS_PRODUCER_URL", DEFAULT_PRODUCER_URL),
            BatchFetchConfig::default(),
        )
    }

    pub fn get_block_url(&self) -> String {
        format!("{}/v1/chain/get_block", self.producer_url)
    }
}

impl Default for Eos {
    fn default() -> Self {
        Self::new(DEFAULT_PRODUCER_URL, BatchFetchConfig::default())
    }
}

impl Blockchain for Eos {
    type Block = EosBlock;

    fn name(&self) -> &'static str {
        "eos"
    }

    fn parse_block(&self, raw: &[u8]) -> Result<EosBlock> {
        Ok(serde_json::from_slice(raw)?)
    }

    async fn fetch_data(
        &self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: CancellationToken,
    ) -> Result<FetchStats> {
        let url = self.get_block_url();
        tracing::info!("Fetching EOS blocks {}..={} from {}", start, end, url);
        let transport = HttpTransport::new(move |client, number| {
            client.post(url.as_str()).json(&json!({ "block_num_or_id": number }))
        })?;
        BatchFetcher::new(transport, self.fetch.clone())
            .fetch(output, start, end, &shutdown)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstat_core::ActionProperty;
    use chrono::TimeZone;

    const BLOCK: &str = r#"{
        "timestamp": "2020-03-27T20:52:50.500",
        "producer": "eoshuobipool",
        "block_num": 112233445,
        "transactions": [
            {
                "status": "executed",
                "trx": {
                    "id": "t1",
                    "transaction": {
                        "actions": [
                            {"account": "eosio.token", "name": "transfer",
                             "authorization": [{"actor": "alice", "permission": "active"}],
                             "data": {"from": "alice", "to": "bob", "quantity": "1.0000 EOS",
                                      "memo": "rent, april"}},
                            {"account": "betdicegroup", "name": "removetask", "authorization": []},
                            {"account": "eosio.token", "name": "transfer",
                             "authorization": [{"actor": "bob", "permission": "active"}],
                             "data": {"from": "bob", "to": "carol", "quantity": "lots EOS"}},
                            {"account": "junktokens", "name": "transfer",
                             "authorization": [{"actor": "bob", "permission": "active"}],
                             "data": "0000a0a2e9c8b1"}
                        ]
                    }
                }
            },
            {"status": "executed", "trx": "a1b2c3"}
        ]
    }"#;

    fn eos() -> Eos {
        Eos::new("http://localhost:8888", BatchFetchConfig::default())
    }

    #[test]
    fn test_parse_block() {
        let block = eos().parse_block(BLOCK.as_bytes()).unwrap();
        assert_eq!(block.number(), 112233445);
        assert_eq!(block.transactions_count(), 2);
        let expected = Utc.with_ymd_and_hms(2020, 3, 27, 20, 52, 50).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(block.time(), expected);
    }

    #[test]
    fn test_actions() {
        let block = eos().parse_block(BLOCK.as_bytes()).unwrap();
        let actions = block.list_actions();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[0], Action::new("transfer", "alice", "eosio.token"));
        assert_eq!(actions[1], Action::new("removetask", "", "betdicegroup"));
        assert_eq!(block.actions_count(ActionProperty::Receiver).get("eosio.token"), 2);
    }

    #[test]
    fn test_msgpack_round_trip() {
        let block = eos().parse_block(BLOCK.as_bytes()).unwrap();
        let bytes = rmp_serde::to_vec_named(&block).unwrap();
        let decoded: EosBlock = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.time(), block.time());
        assert_eq!(decoded.list_actions(), block.list_actions());
        assert_eq!(decoded.transactions_count(), 2);
    }

    #[test]
    fn test_transfers() {
        let block = eos().parse_block(BLOCK.as_bytes()).unwrap();
        let transfers: Vec<Transfer> = block.transfers().collect();
        assert_eq!(
            transfers,
            vec![Transfer {
                block: 112233445,
                tx: "t1".to_string(),
                account: "eosio.token".to_string(),
                symbol: "EOS".to_string(),
                from: "alice".to_string(),
                to: "bob".to_string(),
                quantity: "1.0000".to_string(),
                memo: "rent, april".to_string(),
            }]
        );
    }

    #[test]
    fn test_transfers_survive_msgpack() {
        let block = eos().parse_block(BLOCK.as_bytes()).unwrap();
        let bytes = rmp_serde::to_vec_named(&block).unwrap();
        let decoded: EosBlock = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.transfers().count(), 1);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1.0000 EOS"), Some(("1.0000", "EOS")));
        assert_eq!(parse_quantity("0.5 KARMA"), Some(("0.5", "KARMA")));
        assert_eq!(parse_quantity("12 EOS"), Some(("12", "EOS")));
        assert_eq!(parse_quantity("lots EOS"), None);
        assert_eq!(parse_quantity("1.0000"), None);
        assert_eq!(parse_quantity("1.0000 EOS extra"), None);
        assert_eq!(parse_quantity("1.0000  EOS"), None);
        assert_eq!(parse_quantity(""), None);
    }

    #[test]
    fn test_invalid_timestamp() {
        let raw = r#"{"timestamp": "27/03/2020", "block_num": 1, "transactions": []}"#;
        assert!(eos().parse_block(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_get_block_url() {
        assert_eq!(eos().get_block_url(), "http://localhost:8888/v1/chain/get_block");
    }
}
