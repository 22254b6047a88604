pub mod action;
pub mod color;
pub mod types;

pub use action::{CanonicalAction, normalize};
pub use color::{colors_match, normalize_color};
pub use types::{PlanError, PlanMeta, PlanResult, RawStep, Scenario, TestPlan};
