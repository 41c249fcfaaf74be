//! Batch file naming and transparent gzip I/O.
//!
//! # Naming
//!
//! A base path such as `data/xrp.jsonl.gz` is expanded per batch into
//! `data/xrp-<first>--<last>.jsonl.gz`, and into
//! `data/xrp-<first>--<last>-errors.jsonl.gz` for the identifiers that could
//! not be fetched. Only the file name is split on its first `.`, so dots in
//! directory names are preserved.
//!
//! # Compression
//!
//! A `.gz` suffix selects gzip on both read and write.

use crate::Result;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffer size used for batch files.
const FILE_BUFFER_SIZE: usize = 1024 * 1024;

/// Split `path` into `(prefix, extension)` at the first `.` of its file name.
fn split_base(path: &str) -> (String, Option<String>) {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (stem, ext) = match file_name.split_once('.') {
        Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
        None => (file_name, None),
    };

    let prefix = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(stem).to_string_lossy().into_owned()
        }
        _ => stem,
    };
    (prefix, ext)
}

fn batch_filename(base: &str, first: u64, last: u64, suffix: &str) -> PathBuf {
    let (prefix, ext) = split_base(base);
    let name = match ext {
        Some(ext) => format!("{prefix}-{first}--{last}{suffix}.{ext}"),
        None => format!("{prefix}-{first}--{last}{suffix}"),
    };
    PathBuf::from(name)
}

/// Output file for the batch `[first, last]`.
pub fn make_filename(base: &str, first: u64, last: u64) -> PathBuf {
    batch_filename(base, first, last, "")
}

/// Side file listing the identifiers of `[first, last]` that failed.
pub fn make_err_filename(base: &str, first: u64, last: u64) -> PathBuf {
    batch_filename(base, first, last, "-errors")
}

/// Whether `path` should be read or written through gzip.
pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// A writable output file, optionally gzip-compressed.
///
/// Call [`OutputFile::finish`] to flush buffers and write the gzip trailer;
/// dropping the file without finishing it may leave a truncated stream.
pub enum OutputFile {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    /// Create (or truncate) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let writer = BufWriter::with_capacity(FILE_BUFFER_SIZE, File::create(path)?);
        Ok(if is_gzip(path) {
            Self::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            Self::Plain(writer)
        })
    }

    /// Flush all data and close the compression stream.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Plain(mut writer) => writer.flush()?,
            Self::Gzip(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(writer) => writer.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(writer) => writer.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Open `path` for buffered reading, decompressing `.gz` files.
///
/// Concatenated gzip members are read as one stream, so files that were
/// appended to across runs decode completely.
pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    Ok(if is_gzip(path) {
        Box::new(BufReader::with_capacity(
            FILE_BUFFER_SIZE,
            MultiGzDecoder::new(BufReader::new(file)),
        ))
    } else {
        Box::new(BufReader::with_capacity(FILE_BUFFER_SIZE, file))
    })
}
