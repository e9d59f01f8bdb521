// src/rpc/mod.rs

//! Generated protobuf/gRPC code plus the client abstractions built on it.

pub mod client;
pub mod factory;
pub mod local;
pub mod tunnel;

pub mod proto {
    tonic::include_proto!("meshgate.authority.v1");
}

pub use client::{AuthorityClient, NetworkAuthorityClient};
pub use factory::{build_authority_client, ClientFactoryInput};
