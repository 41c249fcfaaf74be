//! Declarative multi-aggregator runs.
//!
//! A bulk configuration names the input files, the block range and any
//! number of processors:
//!
//! ```json
//! {
//!   "Pattern": "data/xrp-*.jsonl.gz",
//!   "StartBlock": 54387273,
//!   "EndBlock": 54387372,
//!   "Processors": [
//!     {"Name": "tx", "Type": "count-transactions"},
//!     {"Name": "hourly", "Type": "group-actions-over-time",
//!      "Params": {"By": "sender", "Duration": "1h"}}
//!   ]
//! }
//! ```
//!
//! Every processor is built before any file is opened, so a bad
//! configuration fails fast. One ingestion pass then feeds all of them plus
//! an implicit [`MissingBlocks`] over the configured range.

use crate::chains::Blockchain;
use crate::pipeline::{IngestStats, PipelineConfig, stream_blocks};
use crate::{Error, Result};
use chainstat_core::files::open_file;
use chainstat_core::{Aggregator, AggregatorRegistry, MissingBlocks};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One entry of [`BulkConfig::processors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessorConfig {
    #[serde(alias = "name")]
    pub name: String,

    /// Registered aggregator type, e.g. `count-transactions`.
    #[serde(rename = "Type", alias = "type")]
    pub kind: String,

    #[serde(default, alias = "params", skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Bulk run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BulkConfig {
    #[serde(alias = "pattern")]
    pub pattern: String,

    #[serde(default, alias = "startBlock", alias = "start_block")]
    pub start_block: u64,

    #[serde(default, alias = "endBlock", alias = "end_block")]
    pub end_block: u64,

    #[serde(default, alias = "processors")]
    pub processors: Vec<ProcessorConfig>,
}

impl BulkConfig {
    /// Load a configuration from a JSON file (optionally gzipped).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_file(path)?;
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Output of a bulk run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BulkReport {
    pub config: BulkConfig,
    /// Processor name to aggregator result.
    pub results: BTreeMap<String, Value>,
    /// Block numbers of the configured range that were never seen.
    pub missing_blocks: Vec<u64>,
    pub stats: IngestStats,
}

/// Runs bulk configurations against an aggregator registry.
pub struct BulkRunner {
    registry: AggregatorRegistry,
    pipeline: PipelineConfig,
}

impl BulkRunner {
    pub fn new(registry: AggregatorRegistry) -> Self {
        Self {
            registry,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Use `pipeline` for worker count, channel capacity and progress
    /// interval. Its pattern and range are replaced by each configuration's.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Instantiate every processor of `config`, in declaration order.
    pub fn build(&self, config: &BulkConfig) -> Result<Vec<(String, Box<dyn Aggregator>)>> {
        if config.pattern.is_empty() {
            return Err(Error::Config("bulk configuration has an empty Pattern".to_string()));
        }

        let mut names = HashSet::new();
        let mut aggregators = Vec::with_capacity(config.processors.len());
        for processor in &config.processors {
            if !names.insert(processor.name.as_str()) {
                let name = processor.name.clone();
                return Err(chainstat_core::Error::DuplicateProcessor(name).into());
            }
            let aggregator = self
                .registry
                .create(&processor.name, &processor.kind, &processor.params)?;
            aggregators.push((processor.name.clone(), aggregator));
        }
        Ok(aggregators)
    }

    /// Run one ingestion pass feeding every configured processor.
    pub fn run<C: Blockchain>(&self, chain: Arc<C>, config: &BulkConfig) -> Result<BulkReport> {
        let mut aggregators = self.build(config)?;
        let mut missing = MissingBlocks::new(config.start_block, config.end_block);

        info!(
            "Bulk run over {} with {} processors",
            config.pattern,
            aggregators.len()
        );

        let pipeline = PipelineConfig {
            pattern: config.pattern.clone(),
            start: config.start_block,
            end: config.end_block,
            ..self.pipeline.clone()
        };
        let mut stream = stream_blocks(chain, &pipeline)?;
        for block in stream.by_ref() {
            for (_, aggregator) in aggregators.iter_mut() {
                aggregator.add_block(&block);
            }
            missing.add_block(&block);
        }
        let stats = stream.finish()?;

        let results = aggregators
            .iter()
            .map(|(name, aggregator)| (name.clone(), aggregator.result()))
            .collect();
        let missing_blocks = missing.missing();
        if !missing_blocks.is_empty() {
            info!("{} blocks missing from the configured range", missing_blocks.len());
        }

        Ok(BulkReport {
            config: config.clone(),
            results,
            missing_blocks,
            stats,
        })
    }
}
