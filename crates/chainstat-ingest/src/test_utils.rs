//! Deterministic XRP fixtures for pipeline and aggregator tests.
//!
//! The main fixture holds 100 consecutive ledgers closing four seconds
//! apart from 2020-03-27T20:51:00Z, so they span seven one-minute buckets.
//!
//! | Figure                          | Value |
//! |---------------------------------|-------|
//! | Ledgers                         | 100   |
//! | Transactions                    | 4518  |
//! | `Payment`                       | 1129  |
//! | `OfferCreate`                   | 3088  |
//! | Transactions in 20:54 bucket    | 803   |
//! | `OfferCreate` in 20:54 bucket   | 519   |

use chainstat_core::files::OutputFile;
use serde_json::{Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FIRST_LEDGER: u64 = 54_387_273;
pub const LAST_LEDGER: u64 = FIRST_LEDGER + 99;

/// 2020-03-27T20:51:00Z
pub const FIRST_CLOSE_UNIX: i64 = 1_585_342_260;
const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;
const CLOSE_INTERVAL: i64 = 4;

/// Ledgers 45..60 close within 20:54.
const BUCKET: std::ops::Range<u64> = 45..60;

const OTHER_TYPES: [&str; 3] = ["OfferCancel", "TrustSet", "AccountSet"];

/// Share `idx` of `total` spread as evenly as possible over `count` parts.
fn spread(total: u64, count: u64, idx: u64) -> u64 {
    total / count + u64::from(idx < total % count)
}

/// `(offers, payments, others)` for the ledger at `offset` in the fixture.
fn transaction_mix(offset: u64) -> (u64, u64, u64) {
    let bucket_len = BUCKET.end - BUCKET.start;
    if BUCKET.contains(&offset) {
        let idx = offset - BUCKET.start;
        (
            spread(519, bucket_len, idx),
            spread(210, bucket_len, idx),
            spread(74, bucket_len, idx),
        )
    } else {
        let idx = if offset < BUCKET.start { offset } else { offset - bucket_len };
        let rest = 100 - bucket_len;
        (
            spread(2569, rest, idx),
            spread(919, rest, idx),
            spread(227, rest, idx),
        )
    }
}

fn transactions(offset: u64) -> Vec<Value> {
    let (offers, payments, others) = transaction_mix(offset);
    let mut txs = Vec::new();
    for i in 0..offers {
        txs.push(json!({
            "TransactionType": "OfferCreate",
            "Account": format!("rTrader{}", (offset + i) % 11),
            "hash": format!("{:016X}{:08X}", offset, i),
        }));
    }
    for i in 0..payments {
        txs.push(json!({
            "TransactionType": "Payment",
            "Account": format!("rSender{}", (offset + i) % 7),
            "Destination": format!("rReceiver{}", i % 5),
            "hash": format!("{:016X}{:08X}", offset, offers + i),
        }));
    }
    for i in 0..others {
        txs.push(json!({
            "TransactionType": OTHER_TYPES[(i % 3) as usize],
            "Account": format!("rAccount{}", i % 3),
            "hash": format!("{:016X}{:08X}", offset, offers + payments + i),
        }));
    }
    txs
}

/// One ledger as a bare object.
pub fn ledger_json(index: u64, close_unix: i64, transactions: Vec<Value>) -> Value {
    json!({
        "ledger_index": index.to_string(),
        "close_time": close_unix - RIPPLE_EPOCH_OFFSET,
        "transactions": transactions,
    })
}

/// One ledger wrapped in a rippled `ledger` response.
pub fn ledger_response(index: u64, close_unix: i64, transactions: Vec<Value>) -> Value {
    json!({
        "id": index,
        "result": {
            "ledger": ledger_json(index, close_unix, transactions),
            "ledger_index": index,
            "validated": true,
        },
        "status": "success",
        "type": "response",
    })
}

/// Raw JSON lines of the 100-ledger fixture. Every tenth ledger is stored
/// bare, the rest as full responses.
pub fn xrp_fixture_lines() -> Vec<String> {
    (0..100u64)
        .map(|offset| {
            let index = FIRST_LEDGER + offset;
            let close = FIRST_CLOSE_UNIX + CLOSE_INTERVAL * offset as i64;
            let value = if offset % 10 == 0 {
                let mut bare = ledger_json(index, close, transactions(offset));
                bare["ledger_index"] = json!(index);
                bare
            } else {
                ledger_response(index, close, transactions(offset))
            };
            value.to_string()
        })
        .collect()
}

/// Write `lines` to `path` (gzip when it ends in `.gz`).
pub fn write_lines(path: &Path, lines: &[String]) -> PathBuf {
    let mut file = OutputFile::create(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.finish().unwrap();
    path.to_path_buf()
}

/// Write the 100-ledger fixture into `dir`.
pub fn write_xrp_fixture(dir: &Path) -> PathBuf {
    let path = dir.join(format!("xrp-{}--{}.jsonl.gz", FIRST_LEDGER, LAST_LEDGER));
    write_lines(&path, &xrp_fixture_lines())
}

/// Three distinct ledgers, the middle one stored three times.
pub fn write_duplicates_fixture(dir: &Path) -> PathBuf {
    let line = |index: u64| {
        let close = FIRST_CLOSE_UNIX + (index as i64 - 10) * CLOSE_INTERVAL;
        let tx = vec![json!({"TransactionType": "Payment", "Account": "rA", "Destination": "rB"})];
        ledger_response(index, close, tx).to_string()
    };
    let path = dir.join("xrp-duplicates.jsonl");
    write_lines(&path, &[line(10), line(11), line(11), line(12), line(11)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_totals() {
        let (mut offers, mut payments, mut others) = (0, 0, 0);
        let (mut bucket_offers, mut bucket_total) = (0, 0);
        for offset in 0..100 {
            let (o, p, r) = transaction_mix(offset);
            offers += o;
            payments += p;
            others += r;
            if BUCKET.contains(&offset) {
                bucket_offers += o;
                bucket_total += o + p + r;
            }
        }
        assert_eq!(offers, 3088);
        assert_eq!(payments, 1129);
        assert_eq!(offers + payments + others, 4518);
        assert_eq!(bucket_offers, 519);
        assert_eq!(bucket_total, 803);
    }

    #[test]
    fn test_bucket_boundaries() {
        // 20:54:00 is 180s after the first close
        assert_eq!(FIRST_CLOSE_UNIX + CLOSE_INTERVAL * BUCKET.start as i64, FIRST_CLOSE_UNIX + 180);
        assert_eq!(FIRST_CLOSE_UNIX + CLOSE_INTERVAL * BUCKET.end as i64, FIRST_CLOSE_UNIX + 240);
    }
}
