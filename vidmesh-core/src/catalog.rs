// vidmesh_core/src/catalog.rs
use std::collections::BTreeMap;

use tracing::warn;

use crate::domain::PeerAddr;
use crate::wire::parse_listing_line;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub size: u64,
    pub peers: Vec<PeerAddr>,
}

/// What a QUERY answer says is downloadable, grouped by content name.
///
/// The first size seen for a name wins; a peer that advertises a different size for the
/// same name is left out of that entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn from_listing(text: &str) -> Self {
        let mut entries: BTreeMap<String, CatalogEntry> = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let (desc, peer) = match parse_listing_line(line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(line, error = %e, "ignoring listing line");
                    continue;
                }
            };
            let entry = entries.entry(desc.name.clone()).or_insert_with(|| CatalogEntry {
                size: desc.total_size,
                peers: Vec::new(),
            });
            if entry.size != desc.total_size {
                warn!(
                    name = %desc.name,
                    %peer,
                    advertised = desc.total_size,
                    expected = entry.size,
                    "size disagrees with first holder; peer skipped"
                );
                continue;
            }
            if !entry.peers.contains(&peer) {
                entry.peers.push(peer);
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
