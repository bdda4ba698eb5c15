use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::domain::ContentDescriptor;
use crate::error::{MeshError, Result};

/// Regular files directly inside `dir`, as advertised to the registry.
pub fn scan(dir: &Path) -> Result<BTreeSet<ContentDescriptor>> {
    let mut out = BTreeSet::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("content directory walk failed"))
                    .into());
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        if name.chars().any(char::is_whitespace) {
            warn!(name, "skipping file name with whitespace");
            continue;
        }
        let len = entry.metadata().map_err(std::io::Error::from)?.len();
        out.insert(ContentDescriptor::new(name, len));
    }
    Ok(out)
}

/// Path of `name` inside `dir`. Anything that could escape the directory counts as missing.
pub fn resolve(dir: &Path, name: &str) -> Result<PathBuf> {
    let p = Path::new(name);
    let mut comps = p.components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(p)),
        _ => Err(MeshError::FileNotFound(name.to_string())),
    }
}
