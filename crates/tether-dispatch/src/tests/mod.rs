//! Test suites for the dispatch core.

mod bootstrap_behaviour;
pub(crate) mod support;
