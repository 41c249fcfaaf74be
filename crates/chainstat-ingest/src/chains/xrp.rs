//! XRP Ledger adapter.
//!
//! Ledgers are requested from a rippled websocket endpoint with the `ledger`
//! command (transactions expanded) and stored exactly as received. Both the
//! full response envelope and a bare ledger object decode to [`Ledger`].

use super::{Blockchain, MaybeInline, endpoint_from_env, number_or_string};
use crate::Result;
use crate::fetch::{
    FetchStats, Reply, WindowedFetchConfig, WindowedFetcher, WindowedProtocol, WsConnector,
};
use chainstat_core::{Action, Block};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Seconds between the Unix epoch and the ripple epoch (2000-01-01T00:00:00Z).
const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

pub const DEFAULT_WS_URI: &str = "wss://xrpl.ws";

/// One transaction of a ledger fetched with `expand: true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    pub transaction_type: String,
    #[serde(default)]
    pub account: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(deserialize_with = "number_or_string")]
    pub ledger_index: u64,
    /// Seconds since the ripple epoch.
    pub close_time: i64,
    #[serde(default)]
    pub transactions: Vec<MaybeInline<Transaction>>,
    #[serde(skip)]
    actions: OnceLock<Vec<Action>>,
}

impl Ledger {
    pub fn new(
        ledger_index: u64,
        close_time: i64,
        transactions: Vec<MaybeInline<Transaction>>,
    ) -> Self {
        Self {
            ledger_index,
            close_time,
            transactions,
            actions: OnceLock::new(),
        }
    }
}

impl Block for Ledger {
    fn number(&self) -> u64 {
        self.ledger_index
    }

    fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.close_time + RIPPLE_EPOCH_OFFSET, 0).unwrap_or_default()
    }

    fn transactions_count(&self) -> usize {
        self.transactions.len()
    }

    fn list_actions(&self) -> &[Action] {
        self.actions.get_or_init(|| {
            self.transactions
                .iter()
                .filter_map(MaybeInline::inline)
                .map(|tx| Action::new(&tx.transaction_type, &tx.account, &tx.destination))
                .collect()
        })
    }
}

/// Request/response correlation for the rippled `ledger` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct XrpProtocol;

#[derive(Deserialize)]
struct ReplyHeader {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<ReplyResult>,
}

#[derive(Deserialize)]
struct ReplyResult {
    #[serde(default)]
    ledger: Option<LedgerIndex>,
}

#[derive(Deserialize)]
struct LedgerIndex {
    #[serde(deserialize_with = "number_or_string")]
    ledger_index: u64,
}

impl WindowedProtocol for XrpProtocol {
    fn request(&self, number: u64) -> String {
        json!({
            "id": number,
            "command": "ledger",
            "ledger_index": number,
            "transactions": true,
            "expand": true,
        })
        .to_string()
    }

    fn classify(&self, message: &[u8]) -> Reply {
        let Ok(header) = serde_json::from_slice::<ReplyHeader>(message) else {
            return Reply::Unknown;
        };
        if header.status.as_deref() == Some("error") {
            return header.id.map_or(Reply::Unknown, Reply::Failed);
        }
        match header.result.and_then(|result| result.ledger) {
            Some(ledger) => Reply::Record(ledger.ledger_index),
            None => header.id.map_or(Reply::Unknown, Reply::Failed),
        }
    }
}

/// The XRP Ledger.
#[derive(Debug, Clone)]
pub struct Xrp {
    ws_uri: String,
    fetch: WindowedFetchConfig,
}

impl Xrp {
    pub fn new(ws_uri: impl Into<String>, fetch: WindowedFetchConfig) -> Self {
        Self {
            ws_uri: ws_uri.into(),
            fetch,
        }
    }

    /// Endpoint from `XRP_WS_URI`, default fetch settings.
    pub fn from_env() -> Self {
        Self::new(
            endpoint_from_env("XRP_WS_URI", DEFAULT_WS_URI),
            WindowedFetchConfig::default(),
        )
    }

    pub fn ws_uri(&self) -> &str {
        &self.ws_uri
    }
}

impl Default for Xrp {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URI, WindowedFetchConfig::default())
    }
}

impl Blockchain for Xrp {
    type Block = Ledger;

    fn name(&self) -> &'static str {
        "xrp"
    }

    fn parse_block(&self, raw: &[u8]) -> Result<Ledger> {
        let value: Value = serde_json::from_slice(raw)?;
        let ledger = match value {
            Value::Object(mut map) if map.contains_key("result") => map
                .remove("result")
                .and_then(|mut result| result.get_mut("ledger").map(Value::take))
                .unwrap_or(Value::Null),
            other => other,
        };
        Ok(serde_json::from_value(ledger)?)
    }

    async fn fetch_data(
        &self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: CancellationToken,
    ) -> Result<FetchStats> {
        tracing::info!("Fetching XRP ledgers {}..={} from {}", start, end, self.ws_uri);
        let mut fetcher = WindowedFetcher::new(
            WsConnector::new(&self.ws_uri),
            XrpProtocol,
            self.fetch.clone(),
        );
        fetcher.fetch(output, start, end, &shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstat_core::ActionProperty;
    use chrono::TimeZone;

    fn xrp() -> Xrp {
        Xrp::new(DEFAULT_WS_URI, WindowedFetchConfig::default())
    }

    const ENVELOPE: &str = r#"{
        "id": 54387329,
        "result": {
            "ledger": {
                "ledger_index": "54387329",
                "close_time": 638657570,
                "transactions": [
                    {
                        "TransactionType": "Payment",
                        "Account": "rA",
                        "Destination": "rB",
                        "hash": "AA"
                    },
                    {"TransactionType": "OfferCreate", "Account": "rA", "TakerGets": "1000"},
                    {"TransactionType": "OfferCreate", "Account": "rC"},
                    "E3FE6EA3D48F0C2B639448020EA4F03D4F4F8FFDB243A852A0F59177921B4879"
                ]
            },
            "ledger_index": 54387329,
            "validated": true
        },
        "status": "success",
        "type": "response"
    }"#;

    #[test]
    fn test_parse_response_envelope() {
        let ledger = xrp().parse_block(ENVELOPE.as_bytes()).unwrap();
        assert_eq!(ledger.number(), 54387329);
        assert_eq!(ledger.transactions_count(), 4);
        assert_eq!(
            ledger.time(),
            Utc.with_ymd_and_hms(2020, 3, 27, 20, 52, 50).unwrap()
        );
    }

    #[test]
    fn test_parse_bare_ledger() {
        let raw = r#"{"ledger_index": 50387844, "close_time": 620000000, "transactions": []}"#;
        let ledger = xrp().parse_block(raw.as_bytes()).unwrap();
        assert_eq!(ledger.number(), 50387844);
        assert_eq!(ledger.transactions_count(), 0);
        assert!(ledger.list_actions().is_empty());
    }

    #[test]
    fn test_parse_invalid_ledger() {
        assert!(xrp().parse_block(b"{\"result\": {}}").is_err());
        assert!(xrp().parse_block(b"not json").is_err());
    }

    #[test]
    fn test_actions_skip_references() {
        let ledger = xrp().parse_block(ENVELOPE.as_bytes()).unwrap();
        let actions = ledger.list_actions();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0], Action::new("Payment", "rA", "rB"));
        assert_eq!(actions[1].receiver, "");

        let counts = ledger.actions_count(ActionProperty::Name);
        assert_eq!(counts.get("Payment"), 1);
        assert_eq!(counts.get("OfferCreate"), 2);

        let senders = ledger.actions_count(ActionProperty::Sender);
        assert_eq!(senders.get("rA"), 2);
    }

    #[test]
    fn test_msgpack_round_trip_keeps_actions() {
        let ledger = xrp().parse_block(ENVELOPE.as_bytes()).unwrap();
        let bytes = rmp_serde::to_vec_named(&ledger).unwrap();
        let decoded: Ledger = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.number(), ledger.number());
        assert_eq!(decoded.time(), ledger.time());
        assert_eq!(decoded.list_actions(), ledger.list_actions());
    }

    #[test]
    fn test_request_message() {
        let request: Value = serde_json::from_str(&XrpProtocol.request(54387329)).unwrap();
        assert_eq!(request["command"], "ledger");
        assert_eq!(request["ledger_index"], 54387329);
        assert_eq!(request["transactions"], true);
        assert_eq!(request["expand"], true);
    }

    #[test]
    fn test_classify_replies() {
        assert!(matches!(
            XrpProtocol.classify(ENVELOPE.as_bytes()),
            Reply::Record(54387329)
        ));
        let error = r#"{"id": 12, "error": "lgrNotFound", "status": "error", "type": "response"}"#;
        assert!(matches!(XrpProtocol.classify(error.as_bytes()), Reply::Failed(12)));
        assert!(matches!(XrpProtocol.classify(b"{}"), Reply::Unknown));
        assert!(matches!(XrpProtocol.classify(b"garbage"), Reply::Unknown));
    }
}
