//! Object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `ObjectBackend` trait and the shared `ObjectClient` handle
//! - `s3`: S3-compatible adapter on aws-sdk-s3
//! - `localfs`: directory-backed store for local runs
//! - `memory`: in-memory store with fault injection for tests
//!
pub mod client;
pub mod localfs;
pub mod memory;
pub mod s3;

pub use client::{
    ListPage, ObjectBackend, ObjectBody, ObjectClient, ObjectRecord, PutMeta, PutReceipt,
};
