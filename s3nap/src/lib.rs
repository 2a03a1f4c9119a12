//! s3nap: back up an unbounded byte stream to an S3-compatible bucket as a
//! sequence of fixed-size chunk objects, and restore it later.
//!
//! A logical file `name` is stored as `name:000000`, `name:000001`, ... Listing
//! a bucket regroups those keys into per-file chunk sequences.

pub mod cadapter;
pub mod chunk;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod progress;
pub mod transfer;

pub use commands::{ChunkedStore, DEFAULT_CHUNK_SIZE, PipelineOptions};
pub use error::{Result, S3napError};
