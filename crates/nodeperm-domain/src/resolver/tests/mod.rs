//! Tests for the inheritance resolver.
//!
//! Organized by functionality:
//! - Own nodes and ranking
//! - Weight and distance ordering
//! - Cycle and duplicate suppression
//! - Dangling edges and lookup failures
//! - Primary group handling
//! - Context filtering of inheritance edges
//! - Consistency under concurrent mutation
//! - Property tests over random graphs


#[cfg(test)]
mod resolver_tests;
