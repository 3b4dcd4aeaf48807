//! Kubernetes operator that keeps Hetzner Cloud floating IPs assigned to
//! one healthy node out of a label-selected pool.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod provider;
pub mod rest_api;

pub use error::{Error, Result};
