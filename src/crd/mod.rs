//! Custom Resource Definitions for the floating IP operator
//!
//! This module defines the Kubernetes CRD declaring which floating IP should
//! follow which pool of nodes.

mod floating_ip;
mod types;

pub use floating_ip::{label_selector, FloatingIP, FloatingIPSpec, FloatingIPStatus};
pub use types::*;
