#![forbid(unsafe_code)]

pub mod catalog;
pub mod domain;
pub mod error;
pub mod holdings;
pub mod plan;
pub mod progress;
pub mod reassemble;
pub mod registry;
pub mod wire;

// Re-exports: stable API surface
pub use catalog::{Catalog, CatalogEntry};
pub use domain::{ContentDescriptor, PeerAddr};
pub use error::{MeshError, Result};
pub use plan::{DownloadPlan, PlannedPart, part_range, split};
pub use progress::{DownloadProgress, ProgressSnapshot};
pub use reassemble::{ReassembledFile, reassemble};
pub use registry::{ProbeVerdict, RegistryTable};
pub use wire::Command;
