use std::ops::Range;

use crate::domain::PeerAddr;
use crate::error::{MeshError, Result};

/// Byte range of `part` when `total_size` bytes are cut into `total_parts` pieces.
///
/// Every piece is `total_size / total_parts` bytes long except the last, which also takes
/// the remainder. Content peers and downloaders both call this, so a peer can serve its
/// slice knowing only the part index and count.
pub fn part_range(total_size: u64, part: u32, total_parts: u32) -> Range<u64> {
    debug_assert!(total_parts > 0 && part < total_parts);
    let part_size = total_size / u64::from(total_parts);
    let start = u64::from(part) * part_size;
    let end = if part + 1 < total_parts {
        start + part_size
    } else {
        total_size
    };
    start..end
}

pub fn split(total_size: u64, total_parts: u32) -> Vec<Range<u64>> {
    (0..total_parts)
        .map(|i| part_range(total_size, i, total_parts))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPart {
    pub index: usize,
    pub peer: PeerAddr,
    pub range: Range<u64>,
}

impl PlannedPart {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable assignment of byte ranges to peers for one download.
#[derive(Clone, Debug)]
pub struct DownloadPlan {
    name: String,
    total_size: u64,
    parts: Vec<PlannedPart>,
}

impl DownloadPlan {
    /// One part per entry of `peers`, in order. A peer listed twice serves two parts.
    pub fn new(name: impl Into<String>, total_size: u64, peers: Vec<PeerAddr>) -> Result<Self> {
        let name = name.into();
        if peers.is_empty() {
            return Err(MeshError::NoPeers(name));
        }
        let total_parts = u32::try_from(peers.len())
            .map_err(|_| MeshError::Config(format!("too many parts: {}", peers.len())))?;
        let parts = peers
            .into_iter()
            .zip(split(total_size, total_parts))
            .enumerate()
            .map(|(index, (peer, range))| PlannedPart { index, peer, range })
            .collect();
        Ok(Self {
            name,
            total_size,
            parts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn parts(&self) -> &[PlannedPart] {
        &self.parts
    }

    pub fn total_parts(&self) -> u32 {
        // bounded by the check in `new`
        self.parts.len() as u32
    }
}
