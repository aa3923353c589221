//! Scenario tests for the synchronization core
//!
//! - Two-participant walkthroughs over a hand-driven wire (reordering, echoes, disconnect)
//! - Convergence of the directory under every admissible delivery order
//! - Full sessions over the in-memory store (join, tick, leave, failure paths)



#[cfg(test)]
pub mod session_test;
