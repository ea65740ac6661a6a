//! Java RMI assessment client: registry enumeration, method guessing without
//! interface definitions, and payload delivery over JRMP.
//!

/// Byte streams to a target and how they are opened.
pub mod connection;

/// One JRMP connection carrying calls one after another.
pub mod session;

pub mod endpoint;
pub mod error;
pub mod protocol;

/// Java object serialization, as much of it as RMI calls need.
pub mod serial;

/// Method signatures and the hashes servers dispatch on.
pub mod candidate;

/// Call frames and the raw invoke primitive.
pub mod call;

/// Return frames and their classification.
pub mod response;

pub mod reference;
pub mod catalog;
pub mod findings;

/// Registry operations and enumeration.
pub mod registry;

/// Distributed garbage collector calls.
pub mod dgc;

/// Activator calls.
pub mod activation;

/// Bound names and their resolved classes.
pub mod directory;

/// Concurrent method guessing.
pub mod guesser;

/// Payload delivery through method arguments.
pub mod attacker;

pub mod config;

/// External payload generator.
pub mod gadget;

/// Candidate signatures from files.
pub mod wordlist;

pub mod util;

#[cfg(test)]
mod mock;
