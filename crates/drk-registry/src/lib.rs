//! Version registry for DRK packages.
//!
//! Records every registered package file, tracks which version is current
//! and which is the latest stable release, and plans the cheapest update
//! path for a client.

pub mod db;
pub mod error;
pub mod model;
pub mod planner;
pub mod service;

pub use db::RegistryDb;
pub use error::{RegistryError, RegistryResult};
pub use model::{
    CleanupItem, CleanupOutcome, CleanupReport, CreateVersion, NewPackage, Package,
    PackageVersion, UpdatePath, UpdateStrategy, VersionComparison,
};
pub use service::VersionManagementService;
