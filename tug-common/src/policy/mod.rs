//! Update policy evaluation: scope/ignore filtering, maintenance windows,
//! and the decision engine that composes them into an auditable verdict.

pub mod decision;
pub mod filter;
pub mod window;

pub use decision::{
    CheckOutcome, Decision, EngineSettings, HoldReason, Proposal, RegistryObservation, TraceEntry,
    Verdict, evaluate,
};
pub use filter::{CandidateOutcome, IgnoreRule, Selection, select_candidate};
pub use window::{MaintenanceWindow, WindowError};
