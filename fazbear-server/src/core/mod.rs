//! Core primitives shared by the rules engine.
//!
//! Kept free of I/O and clocks so the simulation stays replayable.

pub mod rng;

pub use rng::{derive_match_seed, MatchRng};
