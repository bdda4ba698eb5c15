// vidmesh_core/src/registry.rs
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::domain::{ContentDescriptor, PeerAddr};
use crate::wire::listing_line;

/// Failures in a row after which a peer is dropped from the table.
pub const DEFAULT_EVICTION_THRESHOLD: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub addr: PeerAddr,
    pub holdings: BTreeMap<String, u64>,
    pub consecutive_failures: u32,
    /// Bumped on every registration, so a probe started against an older record can be told apart.
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy,
    Failing(u32),
    Evicted,
    /// The peer left the table between the probe and its verdict.
    Unknown,
    /// The peer re-registered after the probe started; the result is discarded.
    Stale,
}

/// Content index of the registry.
///
/// A peer appears in the list of every name it holds and in no other list; lists that
/// become empty are removed. Records are only ever swapped out whole, apart from the
/// failure counter the health monitor maintains.
#[derive(Clone, Debug, Default)]
pub struct RegistryTable {
    peers: HashMap<PeerAddr, PeerRecord>,
    by_name: BTreeMap<String, Vec<PeerAddr>>,
    generations: u64,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever `peer` advertised before with `holdings`.
    pub fn register(&mut self, peer: PeerAddr, holdings: Vec<ContentDescriptor>) {
        self.unlink(&peer);

        let mut held = BTreeMap::new();
        for h in holdings {
            // a repeated name keeps its last size
            held.insert(h.name, h.total_size);
        }
        for name in held.keys() {
            self.by_name
                .entry(name.clone())
                .or_default()
                .push(peer.clone());
        }
        self.generations += 1;
        info!(%peer, items = held.len(), generation = self.generations, "peer registered");
        self.peers.insert(
            peer.clone(),
            PeerRecord {
                addr: peer,
                holdings: held,
                consecutive_failures: 0,
                generation: self.generations,
            },
        );
    }

    /// Drop `peer` from the table. Returns false if it was not registered.
    pub fn evict(&mut self, peer: &PeerAddr) -> bool {
        let known = self.unlink(peer);
        if known {
            info!(%peer, "peer evicted");
        }
        known
    }

    fn unlink(&mut self, peer: &PeerAddr) -> bool {
        let Some(old) = self.peers.remove(peer) else {
            return false;
        };
        for name in old.holdings.keys() {
            if let Some(list) = self.by_name.get_mut(name) {
                list.retain(|p| p != peer);
                if list.is_empty() {
                    self.by_name.remove(name);
                }
            }
        }
        true
    }

    /// Apply one heartbeat result taken against record `generation` of `peer`.
    pub fn record_probe(
        &mut self,
        peer: &PeerAddr,
        generation: u64,
        ok: bool,
        threshold: u32,
    ) -> ProbeVerdict {
        let Some(rec) = self.peers.get_mut(peer) else {
            return ProbeVerdict::Unknown;
        };
        if rec.generation != generation {
            debug!(%peer, probed = generation, current = rec.generation, "stale heartbeat result");
            return ProbeVerdict::Stale;
        }
        if ok {
            rec.consecutive_failures = 0;
            return ProbeVerdict::Healthy;
        }
        rec.consecutive_failures += 1;
        let n = rec.consecutive_failures;
        if n >= threshold {
            self.evict(peer);
            ProbeVerdict::Evicted
        } else {
            debug!(%peer, failures = n, "heartbeat failed");
            ProbeVerdict::Failing(n)
        }
    }

    /// The QUERY answer: one line per (name, peer) pair.
    pub fn listing(&self) -> String {
        let mut lines = Vec::new();
        for (name, peers) in &self.by_name {
            for peer in peers {
                if let Some(size) = self.peers.get(peer).and_then(|r| r.holdings.get(name)) {
                    lines.push(listing_line(name, *size, peer));
                }
            }
        }
        lines.join("\n")
    }

    pub fn peers(&self) -> Vec<PeerAddr> {
        self.peers.keys().cloned().collect()
    }

    /// Every registered peer with the generation of its current record.
    pub fn probe_targets(&self) -> Vec<(PeerAddr, u64)> {
        self.peers
            .values()
            .map(|r| (r.addr.clone(), r.generation))
            .collect()
    }

    pub fn peer(&self, peer: &PeerAddr) -> Option<&PeerRecord> {
        self.peers.get(peer)
    }

    pub fn holders(&self, name: &str) -> &[PeerAddr] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
