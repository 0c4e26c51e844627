//! Registry: persisted record set plus the derived lookup index.

pub mod document;
pub mod store;

pub use document::{AddressView, CURRENT_VERSION, Records, RegistryDocument};
pub use store::{DeploymentFilter, PruneReport, PruneSet, Record, RecordRef, RegistryStore};
