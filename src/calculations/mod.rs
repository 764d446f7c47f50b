pub mod space;
pub mod summary;

pub use space::{FloorSpace, SpaceAllocation, SpaceBreakdown};
pub use summary::{
    BuildingSummary, FloorUtilization, Severity, SummaryThresholds, TemplateUsage, Warning,
    WarningKind,
};
