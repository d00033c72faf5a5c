#![forbid(unsafe_code)]

mod engine;
pub mod policy;
mod resource;
mod scheduler;

pub use engine::{Engine, EngineStatus, ReconcileReport};
pub use policy::{Evaluation, SweepPlan, SweepReport, Verdict};
pub use resource::{OpenResource, ResourceManager};
pub use scheduler::SchedulerState;
