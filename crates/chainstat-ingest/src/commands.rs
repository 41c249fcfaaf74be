//! Offline operations over stored block files.

use crate::Result;
use crate::chains::{Blockchain, Eos, Transfer};
use crate::pipeline::{IngestStats, PipelineConfig, stream_blocks};
use chainstat_core::files::OutputFile;
use chainstat_core::{Aggregator, MissingBlocks};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Feed every block matching `config` into `aggregator`.
pub fn run_aggregator<C: Blockchain>(
    chain: Arc<C>,
    config: &PipelineConfig,
    aggregator: &mut dyn Aggregator,
) -> Result<IngestStats> {
    let mut stream = stream_blocks(chain, config)?;
    for block in stream.by_ref() {
        aggregator.add_block(&block);
    }
    stream.finish()
}

/// Write the block numbers of `[config.start, config.end]` absent from the
/// input files to `output`, one per line. Returns how many were missing.
pub fn check_missing<C: Blockchain>(
    chain: Arc<C>,
    config: &PipelineConfig,
    output: &Path,
) -> Result<usize> {
    let mut missing = MissingBlocks::new(config.start, config.end);
    run_aggregator(chain, config, &mut missing)?;

    let numbers = missing.missing();
    let mut file = OutputFile::create(output)?;
    for number in &numbers {
        writeln!(file, "{}", number)?;
    }
    file.finish()?;

    info!("{} missing blocks written to {}", numbers.len(), output.display());
    Ok(numbers.len())
}

/// Re-encode the blocks matching `config` as concatenated MessagePack maps.
pub fn export<C: Blockchain>(
    chain: Arc<C>,
    config: &PipelineConfig,
    output: &Path,
) -> Result<IngestStats> {
    let mut file = OutputFile::create(output)?;
    let mut stream = stream_blocks(chain, config)?;
    for block in stream.by_ref() {
        rmp_serde::encode::write_named(&mut file, &block)?;
    }
    let stats = stream.finish()?;
    file.finish()?;

    info!("Exported {} blocks to {}", stats.delivered, output.display());
    Ok(stats)
}

/// Write the token transfers of the EOS blocks matching `config` as CSV.
/// Returns how many rows were written.
pub fn export_transfers(chain: Arc<Eos>, config: &PipelineConfig, output: &Path) -> Result<u64> {
    let mut file = OutputFile::create(output)?;
    let mut rows = 0u64;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut file);
        writer.write_record(Transfer::COLUMNS)?;

        let mut stream = stream_blocks(chain, config)?;
        for block in stream.by_ref() {
            for transfer in block.transfers() {
                writer.serialize(&transfer)?;
                rows += 1;
            }
        }
        stream.finish()?;
        writer.flush()?;
    }
    file.finish()?;

    info!("{} transfers written to {}", rows, output.display());
    Ok(rows)
}

/// Persist `value` as pretty JSON, gzipped when `output` ends in `.gz`.
pub fn write_result<T: Serialize + ?Sized>(value: &T, output: &Path) -> Result<()> {
    let mut file = OutputFile::create(output)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    writeln!(file)?;
    file.finish()?;
    Ok(())
}
