//! Caracal scope engine.
//!
//! Resource and action scopes are sets of patterns. This crate compiles
//! stored pattern strings into anchored matchers for the validation hot
//! path and decides the containment order used by mandate issuance:
//! `p` contains `q` iff every concrete string matching `q` also matches
//! `p`.

#![deny(unsafe_code)]

mod containment;
mod pattern;

pub use pattern::{Pattern, PatternKind, PatternSet, ScopeError};
