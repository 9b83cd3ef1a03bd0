//! Credential storage
//!
//! The signed-in session (tokens included) lives in the OS keyring, with a
//! private file as fallback when no keyring is available.

pub mod keyring;

pub use keyring::{clear_session, load_session, save_session};
