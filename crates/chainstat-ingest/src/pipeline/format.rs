//! On-disk record formats read by the ingestion workers.
//!
//! - JSON lines (`*.jsonl`, `*.jsonl.gz`): one raw block per line, in the
//!   shape the chain's fetcher wrote it. Bad lines are counted and skipped.
//! - MessagePack (`*.dat`, `*.dat.gz`): a concatenation of serialized
//!   blocks. There is no framing, so a record that fails to decode ends
//!   the file.

use crate::Result;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::io::BufRead;
use std::path::Path;

/// Format of an input file, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    JsonLines,
    MsgPack,
}

impl FileFormat {
    /// Detect the format from the extensions in the file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        let mut extensions = name.split('.').skip(1);
        extensions.find_map(|ext| match ext {
            "jsonl" => Some(Self::JsonLines),
            "dat" => Some(Self::MsgPack),
            _ => None,
        })
    }
}

/// Per-file counters.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub records: u64,
    pub decode_errors: u64,
}

/// Drop invalid UTF-8 sequences from `bytes`.
pub fn sanitize_utf8(bytes: &[u8]) -> Cow<'_, str> {
    let mut chunks = bytes.utf8_chunks();
    match chunks.next() {
        None => Cow::Borrowed(""),
        Some(first) if first.invalid().is_empty() && first.valid().len() == bytes.len() => {
            Cow::Borrowed(first.valid())
        }
        Some(first) => {
            let mut clean = String::with_capacity(bytes.len());
            clean.push_str(first.valid());
            for chunk in chunks {
                clean.push_str(chunk.valid());
            }
            Cow::Owned(clean)
        }
    }
}

/// Read newline-delimited records, handing each decoded block to `emit`.
///
/// Stops early when `emit` returns `false`.
pub fn read_json_lines<R, B>(
    mut reader: R,
    path: &Path,
    parse: impl Fn(&[u8]) -> Result<B>,
    report: &mut FileReport,
    mut emit: impl FnMut(B) -> bool,
) -> Result<()>
where
    R: BufRead,
{
    let mut line = Vec::with_capacity(64 * 1024);
    let mut line_number = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_number += 1;

        let text = sanitize_utf8(line.trim_ascii());
        if text.is_empty() {
            continue;
        }

        match parse(text.as_bytes()) {
            Ok(block) => {
                report.records += 1;
                if !emit(block) {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("{}:{}: {}", path.display(), line_number, e);
                report.decode_errors += 1;
            }
        }
    }
    Ok(())
}

/// Read concatenated MessagePack records, handing each block to `emit`.
///
/// Stops early when `emit` returns `false`.
pub fn read_msgpack<R, B>(
    mut reader: R,
    path: &Path,
    report: &mut FileReport,
    mut emit: impl FnMut(B) -> bool,
) -> Result<()>
where
    R: BufRead,
    B: DeserializeOwned,
{
    while !reader.fill_buf()?.is_empty() {
        match rmp_serde::from_read::<_, B>(&mut reader) {
            Ok(block) => {
                report.records += 1;
                if !emit(block) {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "{}: record {}: {}, skipping rest of file",
                    path.display(),
                    report.records + 1,
                    e
                );
                report.decode_errors += 1;
                break;
            }
        }
    }
    Ok(())
}
