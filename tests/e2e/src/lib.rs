//! End-to-end test support for the memory engine
//!
//! Deterministic mock providers and fixtures shared by the journey
//! tests. The embedder is a weighted bag-of-words projection so that
//! texts about the same topic land near each other, which makes the
//! similarity thresholds in the engine behave the way they would under a
//! real model — but fully reproducibly.

pub mod mocks;
