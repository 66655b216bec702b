//! Checksum-verified access to named tiles on local disk, over HTTP and in
//! object stores, with an optional shared on-disk content cache.
//!
//! The usual entry point is a [`resolve::Resolver`], which turns a reference
//! like `https://example.com/run/fov_0/tile.npy` into a backend and an object
//! name. Reading through the backend with a known checksum either yields
//! verified bytes or fails with [`Error::ChecksumMismatch`].

pub mod backend;
pub mod cache;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod logger;
pub mod reference;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod stream;
pub mod tile;

pub use error::{Error, Result};
