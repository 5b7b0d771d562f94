//! Caracal gateway validator.
//!
//! The request-path component: parses the mandate token, runs the strict
//! six-step validation sequence, and emits exactly one authority event
//! per decision. Fail-closed throughout — any unexpected failure
//! terminates in `deny(internal_error)`, and a decision whose event
//! cannot be recorded is never served as an allow.

#![deny(unsafe_code)]

mod http;
mod validator;

pub use http::{gateway_routes, GatewayState};
pub use validator::{
    spawn_replay_sweeper, MalformedRequest, RecordingUnavailable, ValidationOutcome,
    ValidationRequest, Validator, ValidatorConfig, Verdict,
};
