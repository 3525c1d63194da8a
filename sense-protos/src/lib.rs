//! # Sense Protos
//!
//! Protobuf definitions for the Cochlear Sense classification service.
//! This crate contains the generated gRPC client/server and message types.

// RPC names are snake_case on the wire, so are the generated stream types
#[allow(non_camel_case_types)]
pub mod cochlear_sense {
    tonic::include_proto!("cochlear_sense");
}

// Re-export common types for convenience
pub use cochlear_sense::*;
