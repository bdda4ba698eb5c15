use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{MeshError, Result};
use crate::plan::DownloadPlan;

/// A finished download on disk.
#[derive(Clone, Debug)]
pub struct ReassembledFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub blake3: blake3::Hash,
}

/// Write adapter that hashes and counts everything passing through.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Indices of parts that have no staged file.
pub fn missing_parts(plan: &DownloadPlan, part_files: &[Option<PathBuf>]) -> Vec<usize> {
    (0..plan.parts().len())
        .filter(|&i| !matches!(part_files.get(i), Some(Some(_))))
        .collect()
}

/// Concatenate staged parts, in index order, into `dest`.
///
/// Nothing is created at `dest` unless every part is present and the result has exactly
/// `plan.total_size()` bytes; the output is built in a temporary file next to `dest` and
/// renamed into place at the end.
pub fn reassemble(
    plan: &DownloadPlan,
    part_files: &[Option<PathBuf>],
    dest: &Path,
) -> Result<ReassembledFile> {
    let missing = missing_parts(plan, part_files);
    if !missing.is_empty() {
        return Err(MeshError::MissingParts {
            name: plan.name().to_string(),
            missing,
        });
    }

    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;

    let (bytes, digest) = {
        let mut w = HashingWriter::new(BufWriter::new(tmp.as_file_mut()));
        for path in part_files.iter().flatten() {
            let mut part = File::open(path)?;
            let n = std::io::copy(&mut part, &mut w)?;
            debug!(part = %path.display(), bytes = n, "appended part");
        }
        w.flush()?;
        (w.written, w.hasher.finalize())
    };

    if bytes != plan.total_size() {
        // tmp is removed on drop
        return Err(MeshError::ShortRange {
            expected: plan.total_size(),
            received: bytes,
        });
    }

    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| MeshError::Io(e.error))?;
    info!(path = %dest.display(), bytes, blake3 = %digest.to_hex(), "reassembled");

    Ok(ReassembledFile {
        path: dest.to_path_buf(),
        bytes,
        blake3: digest,
    })
}
