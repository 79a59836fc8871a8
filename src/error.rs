//! Error types for the BYOH operator
//!
//! Errors are structured with fields so that every failure can be attributed
//! to the host address or cluster member that caused it.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Why an address could not be used as a host address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// The address is an IPv6 literal
    UnsupportedAddressFamily,
    /// The address is not an IPv4 literal and did not resolve to any address
    UnresolvableAddress(String),
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionFailure::UnsupportedAddressFamily => write!(f, "ipv6 is not supported"),
            ResolutionFailure::UnresolvableAddress(reason) => {
                write!(f, "address did not resolve: {}", reason)
            }
        }
    }
}

/// Main error type for BYOH operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error not otherwise classified
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A desired-state entry has an invalid format
    #[error("validation error for {address}: {message}")]
    Validation {
        /// Address key of the offending entry
        address: String,
        /// Description of what's invalid
        message: String,
    },

    /// A desired-state address is unusable
    #[error("invalid address {address}: {reason}")]
    Resolution {
        /// The offending address
        address: String,
        /// Why the address was rejected
        reason: ResolutionFailure,
    },

    /// The signing credential could not be loaded
    #[error("unable to create signer from secret {secret}: {message}")]
    Credential {
        /// Namespaced name of the secret
        secret: String,
        /// Description of what failed
        message: String,
    },

    /// Configuring a host failed
    #[error("error configuring host with address {address}: {message}")]
    Configure {
        /// Address of the host being configured
        address: String,
        /// Description of what failed
        message: String,
    },

    /// Deconfiguring one or more stale members failed
    #[error("unable to deconfigure instance with node {member} ({failures} failed): {message}")]
    Deconfigure {
        /// Name of the first member that failed
        member: String,
        /// Description of the first failure
        message: String,
        /// Total number of members that failed in the pass
        failures: usize,
    },

    /// A requested object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the object (e.g. "ConfigMap")
        kind: String,
        /// Namespaced name of the object
        name: String,
    },

    /// Telemetry configuration failed after a successful pass
    #[error("unable to configure telemetry: {message}")]
    Telemetry {
        /// Description of what failed
        message: String,
    },

    /// The pass was cancelled before it completed
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "provisioner", "startup")
        context: String,
    },
}

impl Error {
    /// Create a validation error for a desired-state entry
    pub fn validation(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Create a resolution error for an address
    pub fn resolution(address: impl Into<String>, reason: ResolutionFailure) -> Self {
        Self::Resolution {
            address: address.into(),
            reason,
        }
    }

    /// Create a credential error for the given secret
    pub fn credential(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credential {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create a configure error for a host address
    pub fn configure(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configure {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Create a deconfigure error for a single member
    pub fn deconfigure(member: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Deconfigure {
            member: member.into(),
            message: msg.into(),
            failures: 1,
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a telemetry error
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check whether this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check whether a create failed because the object already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae),
            } if ae.code == 409
        )
    }

    /// Check if a failed pass should be re-queued on the short backoff
    ///
    /// Every failed pass is re-queued: a bad record may be fixed by the user,
    /// DNS may recover and RBAC may still be propagating. 4xx API errors other
    /// than conflicts and throttling, and missing objects, are unlikely to
    /// clear quickly and wait for the longest requeue delay instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
                    && ae.code != 409
                    && ae.code != 429
            ),
            Error::NotFound { .. } => false,
            _ => true,
        }
    }

    /// The host address or member name this error is attributed to
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::Validation { address, .. } => Some(address),
            Error::Resolution { address, .. } => Some(address),
            Error::Configure { address, .. } => Some(address),
            Error::Deconfigure { member, .. } => Some(member),
            Error::Credential { secret, .. } => Some(secret),
            Error::NotFound { name, .. } => Some(name),
            Error::Kube { .. }
            | Error::Telemetry { .. }
            | Error::Cancelled
            | Error::Internal { .. } => None,
        }
    }

    /// Short machine-readable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "transport",
            Error::Validation { .. } => "validation",
            Error::Resolution { .. } => "resolution",
            Error::Credential { .. } => "credential",
            Error::Configure { .. } => "configure",
            Error::Deconfigure { .. } => "deconfigure",
            Error::NotFound { .. } => "not_found",
            Error::Telemetry { .. } => "telemetry",
            Error::Cancelled => "cancelled",
            Error::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a malformed record entry names the offending address
    #[test]
    fn story_validation_errors_name_the_entry() {
        let err = Error::validation("10.0.0.5", "data for entry has an incorrect format");
        assert!(err.to_string().contains("10.0.0.5"));
        assert!(err.to_string().contains("incorrect format"));
        assert_eq!(err.target(), Some("10.0.0.5"));
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn story_resolution_errors_distinguish_ipv6_from_dns() {
        let err = Error::resolution("::1", ResolutionFailure::UnsupportedAddressFamily);
        assert!(err.to_string().contains("ipv6 is not supported"));

        let err = Error::resolution(
            "no-such-host.invalid",
            ResolutionFailure::UnresolvableAddress("lookup failed".to_string()),
        );
        assert!(err.to_string().contains("did not resolve"));
        assert!(err.to_string().contains("no-such-host.invalid"));
    }

    #[test]
    fn story_deconfigure_error_reports_failure_count() {
        let err = Error::Deconfigure {
            member: "win-node-1".to_string(),
            message: "ssh timeout".to_string(),
            failures: 2,
        };
        assert!(err.to_string().contains("win-node-1"));
        assert!(err.to_string().contains("2 failed"));
        assert_eq!(err.target(), Some("win-node-1"));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::not_found("ConfigMap", "byoh-system/byoh-instances").is_not_found());
        assert!(Error::from(api_error(404)).is_not_found());
        assert!(!Error::from(api_error(500)).is_not_found());
        assert!(!Error::Cancelled.is_not_found());
    }

    #[test]
    fn test_already_exists_detection() {
        assert!(Error::from(api_error(409)).is_already_exists());
        assert!(!Error::from(api_error(404)).is_already_exists());
        assert!(!Error::internal("conflict").is_already_exists());
    }

    #[test]
    fn test_retryability() {
        assert!(Error::Cancelled.is_retryable());
        assert!(Error::configure("10.0.0.5", "failed").is_retryable());
        assert!(Error::credential("ns/key", "missing").is_retryable());
        assert!(Error::from(api_error(503)).is_retryable());
        assert!(Error::from(api_error(409)).is_retryable());
        assert!(!Error::from(api_error(403)).is_retryable());
    }

    #[test]
    fn test_untargeted_errors() {
        assert_eq!(Error::Cancelled.target(), None);
        assert_eq!(Error::telemetry("x").target(), None);
        assert_eq!(Error::internal("x").target(), None);
    }
}
