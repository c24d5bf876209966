//! HTTP route handlers

pub mod blobs;
pub mod packages;
