pub mod aggregate;
pub mod client;
pub mod kinds;
pub mod ledger;
pub mod projector;
pub mod store;

pub use client::{build_client, ClusterClient};
pub use kinds::ResourceKind;
