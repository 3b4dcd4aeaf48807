//! Central error types for the floating IP operator
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Central error type for the floating IP operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Finalizer-related error during cleanup
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// FloatingIP spec validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The address literal in a spec does not parse as an IP
    #[error("Invalid IP address literal: {0:?}")]
    InvalidAddress(String),

    /// Zero or several provider floating IPs carry the requested address
    #[error("Expected exactly one provider floating IP for {address}, found {matches}")]
    AddressLookup { address: String, matches: usize },

    /// A selected node has no provider server with the same name
    #[error("No provider server found for node {0}")]
    InstanceLookup(String),

    /// No node matches the selector and reports Ready
    #[error("No eligible nodes found for FloatingIP {0}")]
    NoEligibleTarget(String),

    /// Transport, auth or rate-limit failure from the provider API
    #[error("Provider API error during {operation}: {message}")]
    ProviderApi { operation: String, message: String },

    /// Transport or decoding failure talking to the provider (from reqwest)
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Result type alias for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Build a provider API error for the given operation
    pub fn provider(operation: &str, message: impl Into<String>) -> Self {
        Error::ProviderApi {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Check if this error type should trigger a retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_)
                | Error::FinalizerError(_)
                | Error::ProviderApi { .. }
                | Error::HttpError(_)
                | Error::AddressLookup { .. }
                | Error::InstanceLookup(_)
                | Error::NoEligibleTarget(_)
        )
    }

    /// Stable, low-cardinality label used for metrics and condition reasons
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAddress(_) | Error::ValidationError(_) => "input",
            Error::AddressLookup { .. } | Error::InstanceLookup(_) => "lookup",
            Error::NoEligibleTarget(_) => "no_eligible_target",
            Error::ProviderApi { .. } | Error::HttpError(_) => "provider_api",
            Error::KubeError(_) | Error::FinalizerError(_) => "kube",
            Error::ConfigError(_) => "config",
        }
    }

    /// Convert to a human-readable message for status updates
    pub fn status_message(&self) -> String {
        match self {
            Error::KubeError(e) => format!("Kubernetes error: {}", e),
            Error::ValidationError(msg) => format!("Validation failed: {}", msg),
            Error::InvalidAddress(ip) => format!("{:?} is not a valid IP address", ip),
            Error::AddressLookup { address, matches: 0 } => {
                format!("No provider floating IP matches {}", address)
            }
            Error::AddressLookup { address, matches } => {
                format!("{} provider floating IPs match {}", matches, address)
            }
            Error::NoEligibleTarget(_) => "No Ready node matches the node selector".to_string(),
            Error::HttpError(e) => format!("HTTP request failed: {}", e),
            _ => self.to_string(),
        }
    }
}

// Implement From for kube::runtime::finalizer::Error to enable ? operator
impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(e.to_string())
    }
}
