//! Instance descriptors parsed from the tracking resource
//!
//! Each entry of the tracking ConfigMap describes one host:
//!
//! ```text
//! <address>: username=<username>
//! ```
//!
//! Parsing is fail-fast: one bad entry rejects the whole record, so a pass
//! never reconciles against a record known to be partially corrupt.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::address::{validate_address, Resolver};
use crate::error::Error;

/// Key of the only field accepted in an entry value
pub const USERNAME_KEY: &str = "username";

/// A host that should be a cluster member
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    /// IPv4 address or resolvable hostname of the host
    pub address: String,
    /// User to log into the host as
    pub username: String,
}

impl InstanceDescriptor {
    /// Create a new descriptor
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
        }
    }
}

/// Parse an entry value of the form `username=<name>`
pub fn parse_username(address: &str, value: &str) -> Result<String, Error> {
    let incorrect = || Error::validation(address, "data for entry has an incorrect format");

    let (key, name) = value.split_once('=').ok_or_else(incorrect)?;
    if key != USERNAME_KEY || name.is_empty() || name.contains('=') {
        return Err(incorrect());
    }
    Ok(name.to_string())
}

/// Build the desired set from the tracking resource's data
///
/// Descriptors are returned in key order. Addresses are unique because they
/// are the record's keys.
pub async fn parse_hosts<R>(
    data: &BTreeMap<String, String>,
    resolver: &R,
) -> Result<Vec<InstanceDescriptor>, Error>
where
    R: Resolver + ?Sized,
{
    let mut hosts = Vec::with_capacity(data.len());
    for (address, value) in data {
        validate_address(address, resolver).await?;
        let username = parse_username(address, value)?;
        hosts.push(InstanceDescriptor::new(address.clone(), username));
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MockResolver;
    use crate::error::ResolutionFailure;
    use rstest::rstest;

    fn record(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case("username=admin", "admin")]
    #[case("username=Administrator", "Administrator")]
    #[case("username=dom\\user", "dom\\user")]
    fn well_formed_values_yield_the_username(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(parse_username("10.0.0.5", value).unwrap(), expected);
    }

    #[rstest]
    #[case("admin")]
    #[case("user=admin")]
    #[case("username:admin")]
    #[case("username=")]
    #[case("username=a=b")]
    #[case("")]
    fn malformed_values_are_rejected(#[case] value: &str) {
        let err = parse_username("10.0.0.5", value).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(err.target(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn story_single_host_record_parses() {
        let resolver = MockResolver::new();
        let hosts = parse_hosts(&record(&[("10.0.0.5", "username=admin")]), &resolver)
            .await
            .unwrap();
        assert_eq!(hosts, vec![InstanceDescriptor::new("10.0.0.5", "admin")]);
    }

    #[tokio::test]
    async fn empty_record_is_an_empty_desired_set() {
        let resolver = MockResolver::new();
        let hosts = parse_hosts(&BTreeMap::new(), &resolver).await.unwrap();
        assert!(hosts.is_empty());
    }

    #[tokio::test]
    async fn descriptors_follow_key_order() {
        let resolver = MockResolver::new();
        let hosts = parse_hosts(
            &record(&[
                ("10.0.0.7", "username=c"),
                ("10.0.0.5", "username=a"),
                ("10.0.0.6", "username=b"),
            ]),
            &resolver,
        )
        .await
        .unwrap();
        let addresses: Vec<_> = hosts.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.5", "10.0.0.6", "10.0.0.7"]);
    }

    /// Story: one malformed entry blocks the whole pass, even though the
    /// other entries are fine
    #[tokio::test]
    async fn story_malformed_entry_aborts_whole_record() {
        let resolver = MockResolver::new();
        let err = parse_hosts(
            &record(&[
                ("10.0.0.5", "username=admin"),
                ("10.0.0.6", "admin"),
                ("10.0.0.7", "username=admin"),
            ]),
            &resolver,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(err.target(), Some("10.0.0.6"));
    }

    #[tokio::test]
    async fn ipv6_entry_aborts_whole_record() {
        let resolver = MockResolver::new();
        let err = parse_hosts(
            &record(&[("10.0.0.5", "username=admin"), ("::1", "username=admin")]),
            &resolver,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Resolution {
                reason: ResolutionFailure::UnsupportedAddressFamily,
                ..
            }
        ));
        assert_eq!(err.target(), Some("::1"));
    }

    #[tokio::test]
    async fn hostnames_are_resolved_during_parsing() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .withf(|host| host == "win-1.example.internal")
            .times(1)
            .returning(|_| Ok(vec!["10.1.2.3".parse().unwrap()]));

        let hosts = parse_hosts(
            &record(&[("win-1.example.internal", "username=admin")]),
            &resolver,
        )
        .await
        .unwrap();
        assert_eq!(hosts[0].address, "win-1.example.internal");
    }
}
