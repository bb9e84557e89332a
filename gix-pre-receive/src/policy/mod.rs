//! Protection rules for ref updates.
//!
//! Each update is handled by the first rule whose namespace matches its ref name:
//! 1. master branch: never deleted, never force-pushed
//! 2. release tags: tags created by the deployer are immutable
//! 3. release branches: created from master only, and not rewritten while an unmerged
//!    deployer tag is on them
//!
//! Updates of all other refs are allowed.

pub mod ff;
pub mod set;

pub use ff::{classify, Classification};
pub use set::{PolicyDecision, PolicySet, ReasonCode, Rule};
