//! Container lifecycle orchestration for stevedore.
//!
//! This crate turns a normalized set of Docker-style container options into
//! calls against a containerd-style runtime service: it assembles the OCI
//! runtime spec, allocates per-container on-disk state, coordinates network
//! setup through OCI hooks, drives task I/O, and tears everything down again.
//! The runtime service itself is reached through the trait seams in
//! [`runtime`]; this crate never executes container processes.

pub mod container;
pub mod create;
pub mod datastore;
pub mod error;
pub mod idgen;
pub mod labels;
pub mod names;
pub mod network;
pub mod options;
pub mod remove;
pub mod restart;
pub mod runtime;
pub mod signal;
pub mod spec;
pub mod task;
pub mod tty;
pub mod volume;

pub use error::{Result, StevedoreError};
