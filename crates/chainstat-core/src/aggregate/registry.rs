//! Mapping from declarative processor types to aggregator instances.
//!
//! The registry is built explicitly (usually with
//! [`AggregatorRegistry::with_defaults`]) and handed to whoever needs to
//! instantiate aggregators; there is no global registration.
//!
//! # Built-in Types
//!
//! | Type                           | Params                  |
//! |--------------------------------|-------------------------|
//! | `count-transactions`           | none                    |
//! | `count-actions`                | `By`                    |
//! | `group-actions`                | `By`, `Detailed`        |
//! | `group-actions-over-time`      | `By`, `Duration`        |
//! | `count-transactions-over-time` | `Duration`              |

use super::{
    ActionsCounter, Aggregator, GroupedActions, TimeGroupedActions, TimeGroupedTransactionCount,
    TransactionCounter,
};
use crate::time::parse_duration;
use crate::{ActionProperty, Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Builds an aggregator from a processor name and its raw parameters.
pub type AggregatorFactory =
    Box<dyn Fn(&str, &Value) -> Result<Box<dyn Aggregator>> + Send + Sync>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ByParams {
    #[serde(default, alias = "by")]
    by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupActionsParams {
    #[serde(default, alias = "by")]
    by: Option<String>,
    #[serde(default, alias = "detailed")]
    detailed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupActionsOverTimeParams {
    #[serde(default, alias = "by")]
    by: Option<String>,
    #[serde(alias = "duration")]
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CountTransactionsOverTimeParams {
    #[serde(alias = "duration")]
    duration: String,
}

/// Decode `params` into `T`, treating a missing/null value as `{}`.
fn parse_params<T: DeserializeOwned>(name: &str, params: &Value) -> Result<T> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| Error::InvalidParams {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_property(by: Option<&str>) -> Result<ActionProperty> {
    by.map_or(Ok(ActionProperty::default()), str::parse)
}

/// Registry of aggregator factories keyed by processor type.
pub struct AggregatorRegistry {
    factories: BTreeMap<String, AggregatorFactory>,
}

impl AggregatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every built-in processor type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("count-transactions", |_, _| {
            Ok(Box::new(TransactionCounter::new()))
        });

        registry.register("count-actions", |name, params| {
            let params: ByParams = parse_params(name, params)?;
            let by = parse_property(params.by.as_deref())?;
            Ok(Box::new(ActionsCounter::new(by)))
        });

        registry.register("group-actions", |name, params| {
            let params: GroupActionsParams = parse_params(name, params)?;
            let by = parse_property(params.by.as_deref())?;
            Ok(Box::new(GroupedActions::new(by, params.detailed)))
        });

        registry.register("group-actions-over-time", |name, params| {
            let params: GroupActionsOverTimeParams = parse_params(name, params)?;
            let by = parse_property(params.by.as_deref())?;
            let duration = parse_duration(&params.duration)?;
            Ok(Box::new(TimeGroupedActions::new(duration, by)))
        });

        registry.register("count-transactions-over-time", |name, params| {
            let params: CountTransactionsOverTimeParams = parse_params(name, params)?;
            let duration = parse_duration(&params.duration)?;
            Ok(Box::new(TimeGroupedTransactionCount::new(duration)))
        });

        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str, &Value) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered processor types, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the processor `name` of type `kind`.
    pub fn create(&self, name: &str, kind: &str, params: &Value) -> Result<Box<dyn Aggregator>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| Error::UnknownProcessor {
                name: name.to_string(),
                kind: kind.to_string(),
            })?;
        factory(name, params)
    }
}

impl Default for AggregatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
