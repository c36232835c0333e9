// dbmagic/src/backup/archive.rs
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::backup::PipelineStep;
use crate::errors::{AppError, Result};
use crate::utils::artifacts::create_private;

const GZIP_SUFFIX: &str = ".gz";

/// Gzips `path` into `path.gz` and removes the original, like `gzip -f`.
pub fn compress_in_place(path: &Path) -> Result<PathBuf> {
    let target = PathBuf::from(format!("{}{}", path.display(), GZIP_SUFFIX));
    let step = PipelineStep::Compress;

    let mut input = File::open(path).map_err(|e| io_failure(step, path, e))?;
    let output = create_private(&target).map_err(|e| io_failure(step, &target, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder).map_err(|e| io_failure(step, path, e))?;
    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .map_err(|e| io_failure(step, &target, e))?;

    fs::remove_file(path).map_err(|e| io_failure(step, path, e))?;
    debug!(from = %path.display(), to = %target.display(), "Compressed artifact");
    Ok(target)
}

/// Gunzips `name.gz` into `name` and removes the compressed file, like `gunzip -f`.
pub fn decompress_in_place(path: &Path) -> Result<PathBuf> {
    let step = PipelineStep::Decompress;
    let target = path
        .to_str()
        .and_then(|p| p.strip_suffix(GZIP_SUFFIX))
        .map(PathBuf::from)
        .ok_or_else(|| {
            AppError::step(step, format!("{} has no {} suffix", path.display(), GZIP_SUFFIX))
        })?;

    let input = File::open(path).map_err(|e| io_failure(step, path, e))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut output =
        BufWriter::new(create_private(&target).map_err(|e| io_failure(step, &target, e))?);
    io::copy(&mut decoder, &mut output).map_err(|e| io_failure(step, path, e))?;
    output.flush().map_err(|e| io_failure(step, &target, e))?;

    fs::remove_file(path).map_err(|e| io_failure(step, path, e))?;
    debug!(from = %path.display(), to = %target.display(), "Decompressed artifact");
    Ok(target)
}

fn io_failure(step: PipelineStep, path: &Path, err: io::Error) -> AppError {
    AppError::step(step, format!("{}: {}", path.display(), err))
}
