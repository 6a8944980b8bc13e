//! Single-node upgrade decision and sequencing.
//!
//! Callers must upgrade one node at a time: classification and tolerance
//! checks read cluster-wide state without locking.

pub mod apply;
pub mod node;
pub mod path;
pub mod pipeline;
pub mod tolerance;

#[cfg(test)]
pub mod fakes;
