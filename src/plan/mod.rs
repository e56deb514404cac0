//! Part planning for multipart transfers

pub mod planner;

pub use planner::{gib, kib, mib, plan_parts, tib, PartDescriptor, PartLimits, PartPlan};
