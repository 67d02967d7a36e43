pub mod plan;
pub mod relocate;

pub use plan::{StagingEntry, StagingPlanner};
pub use relocate::{Relocated, Relocator};
