use std::net::IpAddr;

use tracing::warn;

use crate::error::StartupError;

/// Resolves the ping target to the first IPv4 address it has.
pub fn resolve_target(host: &str) -> Result<IpAddr, StartupError> {
    if let Ok(address) = host.parse::<IpAddr>() {
        return match address {
            IpAddr::V4(_) => Ok(address),
            IpAddr::V6(_) => Err(StartupError::NoIpv4Address(host.to_string())),
        };
    }

    let addresses = dns_lookup::lookup_host(host)
        .map_err(|source| StartupError::Resolve { host: host.to_string(), source })?;
    addresses.into_iter()
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| StartupError::NoIpv4Address(host.to_string()))
}

/// Name of the machine running the exporter, for the `hostname` label.
pub fn local_hostname() -> String {
    dns_lookup::get_hostname().unwrap_or_else(|e| {
        warn!("unable to get hostname: {}", e);
        String::from("unknown")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn literal_ipv4_needs_no_lookup() {
        assert_eq!(resolve_target("192.0.2.1").unwrap(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn literal_ipv6_is_rejected() {
        assert!(matches!(resolve_target("::1"), Err(StartupError::NoIpv4Address(_))));
    }

    #[test]
    fn unresolvable_name_is_an_error() {
        assert!(resolve_target("does-not-exist.invalid").is_err());
    }
}
