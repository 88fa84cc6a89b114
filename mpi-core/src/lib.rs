//! Core types for the MPI adapter protocol stack
//!
//! This crate provides the error taxonomy shared by the transport, link and
//! application layers.

pub mod error;

pub use error::{MpiError, MpiResult};
