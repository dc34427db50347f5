//! Admission decisions: policy, engine, and the gate facade.

mod engine;
mod gate;
mod policy;
mod verdict;

pub use engine::DecisionEngine;
pub use gate::{Gate, GateBuilder};
pub use policy::{Consistency, Policy};
pub use verdict::Verdict;
