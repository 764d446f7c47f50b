pub mod allocation;
pub mod calculations;
pub mod catalog;
pub mod config;
pub mod floor;
pub mod metadata;
pub mod notify;
pub mod persistence;
pub mod project;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod table;
pub mod transform;
pub mod validation;

#[cfg(feature = "http_api")]
pub mod http_api;

pub use allocation::{AllocationKey, AllocationTable, UnitAllocation};
pub use calculations::{BuildingSummary, SpaceAllocation, SummaryThresholds, WarningKind};
pub use catalog::{NonRentableAllocation, NonRentableType, Product, UnitType};
pub use config::EngineConfig;
pub use floor::{Floor, FloorPatch, FloorPlateTemplate, FloorType};
pub use metadata::{FarMetrics, ProjectMetadata};
pub use notify::{Notification, NotificationLevel, NotificationLog, NotificationSink};
pub use persistence::{KeyValueStorage, LocalPersistence, MemoryStorage};
pub use project::{Project, ProjectError, ProjectSnapshot};
pub use reconcile::{NonRentableReconciler, ReconcileReport};
pub use remote::{MemoryRemoteStore, RemoteStore, Table};
pub use store::{AllocationStore, NonRentableStore};
