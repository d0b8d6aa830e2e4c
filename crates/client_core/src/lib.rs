//! Client-side synchronization of the admin backend's REST collections.

pub mod catalog;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod resource;
pub mod session;
pub mod synchronizer;
pub mod transport;

pub use catalog::{endpoints, CategoryList, Taxonomy};
pub use error::SyncError;
pub use filter::{FilterDef, FilterDomain, FilterEffect, FilterState};
pub use resource::{Auxiliary, Endpoint, Resource};
pub use session::{Session, SessionContext};
pub use synchronizer::{
    AlwaysConfirm, ConfirmGate, DeleteOutcome, LoadOutcome, PendingDelete, ResourceSynchronizer,
    SyncEvent, SyncPhase, SyncSnapshot,
};
pub use transport::{HttpTransport, Transport};
