//! Certkeeper Core - Issuance backend wire types
//!
//! This crate contains the JSON envelopes exchanged with the secret-issuance
//! backend: the role/secret login call and the certificate issue call.
//!
//! Everything that touches the network, the filesystem or the process
//! (renewal decisions, persistence, reloads) lives in the `certkeeper` crate.

mod protocol;

pub use protocol::*;
