//! Integration tests for fleet key rotation
//!
//! This test suite validates, against a scripted in-memory fleet:
//! - Fleet status aggregation and the rotation decision
//! - Two-phase apply with ordered rollback
//! - Full rotation cycles and the outcome they record
//! - The rotation loop and its shutdown signal



#[cfg(test)]
mod commit_tests;

#[cfg(test)]
mod cycle_tests;
