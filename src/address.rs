//! Host address validation
//!
//! A desired-state address must be either an IPv4 literal or a hostname that
//! resolves to at least one address. IPv6 is rejected outright.
//!
//! Resolution is never cached: every pass validates every address again.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, ResolutionFailure};

/// Trait abstracting hostname resolution
///
/// Allows tests to control DNS answers while production uses the system
/// resolver.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a hostname, returning every address it maps to
    ///
    /// An `Err` carries the resolver's failure reason.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, String>;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        // lookup_host requires a port; it is discarded from the answers
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| e.to_string())?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Validate that `address` is an IPv4 literal or a resolvable hostname
///
/// IPv4-mapped IPv6 literals such as `::ffff:10.0.0.5` are rejected as IPv6
/// even though they carry an IPv4 address. Write the plain dotted quad
/// instead.
pub async fn validate_address<R>(address: &str, resolver: &R) -> Result<(), Error>
where
    R: Resolver + ?Sized,
{
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => return Ok(()),
        // IPv4-mapped IPv6 forms are rejected too: member addresses are
        // matched textually, so they could never match a registered node
        Ok(IpAddr::V6(_)) => {
            return Err(Error::resolution(
                address,
                ResolutionFailure::UnsupportedAddressFamily,
            ))
        }
        Err(_) => {}
    }

    let resolved = resolver.lookup(address).await.map_err(|e| {
        Error::resolution(
            address,
            ResolutionFailure::UnresolvableAddress(format!("error looking up DNS: {}", e)),
        )
    })?;

    if resolved.is_empty() {
        return Err(Error::resolution(
            address,
            ResolutionFailure::UnresolvableAddress("DNS did not resolve to an address".into()),
        ));
    }

    debug!(address, resolved = resolved.len(), "hostname resolved");
    Ok(())
}
