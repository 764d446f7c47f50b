use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::remote::{RecordId, RemoteError};
use crate::transform::TransformError;

pub mod allocation_store;
pub mod keyed;
pub mod non_rentable;

pub use allocation_store::{AllocationChange, AllocationStore, SaveAllReport};
pub use keyed::KeyedLocks;
pub use non_rentable::NonRentableStore;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("non-rentable allocation {0} is not loaded")]
    UnknownAllocation(RecordId),
    #[error("store has been closed")]
    Closed,
}

pub type AllocationResult<T> = Result<T, AllocationError>;

/// Shared "is the owner still around" flag.
///
/// Results of remote calls that resolve after [`Liveness::shut_down`] are not applied locally.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn shut_down(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
