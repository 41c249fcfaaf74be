//! Chain adapters.
//!
//! Each supported chain implements [`Blockchain`]: it knows how to decode its
//! own wire format into a [`Block`] and how to fetch a range of blocks into
//! batch files.
//!
//! # Available Chains
//!
//! - [`Xrp`] - rippled ledgers over a websocket ([`crate::fetch::WindowedFetcher`])
//! - [`Tezos`] - RPC blocks over HTTP GET ([`crate::fetch::BatchFetcher`])
//! - [`Eos`] - producer API blocks over HTTP POST ([`crate::fetch::BatchFetcher`])

mod eos;
mod tezos;
mod xrp;

pub use eos::{Eos, EosBlock, Transfer, parse_quantity};
pub use tezos::{Tezos, TezosBlock};
pub use xrp::{Ledger, Xrp, XrpProtocol};

use crate::Result;
use crate::fetch::FetchStats;
use chainstat_core::Block;
use serde::de::{self, DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// A source of blocks for one chain.
///
/// `Block` doubles as the decoding target for packed binary files, so it must
/// round-trip through serde.
pub trait Blockchain: Send + Sync + 'static {
    type Block: Block + Serialize + DeserializeOwned + Send + 'static;

    /// Short lowercase name used in logs and file names.
    fn name(&self) -> &'static str;

    /// Decode one raw JSON record.
    fn parse_block(&self, raw: &[u8]) -> Result<Self::Block>;

    /// Fetch `[start, end]` into batch files prefixed with `output`.
    ///
    /// Stops early, without error, once `shutdown` is cancelled.
    fn fetch_data(
        &self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: CancellationToken,
    ) -> impl Future<Output = Result<FetchStats>> + Send;
}

/// A JSON field holding either a string reference (usually a hash) or the
/// full inline object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaybeInline<T> {
    Reference(String),
    Inline(T),
}

impl<T> MaybeInline<T> {
    pub fn inline(&self) -> Option<&T> {
        match self {
            Self::Inline(value) => Some(value),
            Self::Reference(_) => None,
        }
    }
}

impl<T: Serialize> Serialize for MaybeInline<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Reference(reference) => serializer.serialize_str(reference),
            Self::Inline(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeInline<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MaybeInlineVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for MaybeInlineVisitor<T> {
            type Value = MaybeInline<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string reference or an object")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(MaybeInline::Reference(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
                Ok(MaybeInline::Reference(v))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                T::deserialize(de::value::MapAccessDeserializer::new(map)).map(MaybeInline::Inline)
            }
        }

        deserializer.deserialize_any(MaybeInlineVisitor(PhantomData))
    }
}

/// Accepts an unsigned integer given either as a number or a decimal string.
pub(crate) fn number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u64, D::Error> {
    struct NumberVisitor;

    impl Visitor<'_> for NumberVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("negative number {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u64, E> {
            v.trim().parse().map_err(|_| E::custom(format!("invalid number {:?}", v)))
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}

/// Read an endpoint from `var`, falling back to `default` when unset or empty.
pub(crate) fn endpoint_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
