//! Layers for tracing gRPC clients.
//!
//! This module is inspired by `fastrace-tonic` but keeps its own implementation
//! to have more control over span names and attributes.

pub mod client;

pub use client::{TracingClientLayer, TracingClientService};
