//! Deterministic address derivation for cluster nodes.
//!
//! Nodes receive contiguous static addresses out of a configured subnet:
//! the master sits at the 1-based `start_offset` into the usable host
//! range, agents follow immediately after it. The derivation is a pure
//! function of (subnet, offset, index) so re-provisioning a cluster always
//! yields the same layout.

use std::fmt;
use std::net::Ipv4Addr;

use crate::errors::{Error, Result};

/// An IPv4 subnet in CIDR notation.
///
/// Host bits in the parsed address are masked off, so `192.168.0.5/24`
/// normalises to `192.168.0.0/24`. Prefixes of /31 and /32 are rejected
/// because they leave no usable host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: u32,
    prefix: u8,
}

impl Subnet {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidSubnet(text.to_string());

        let (addr_part, prefix_part) = text.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr_part.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix_part.parse().map_err(|_| invalid())?;
        if prefix > 30 {
            return Err(invalid());
        }

        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };

        Ok(Subnet {
            network: u32::from(addr) & mask,
            prefix,
        })
    }

    /// Number of usable host addresses (network and broadcast excluded).
    pub fn host_count(&self) -> u64 {
        (1u64 << (32 - self.prefix)) - 2
    }

    /// The usable host at 0-based `position`, i.e. network + 1 + position.
    pub fn host_at(&self, position: u64) -> Result<Ipv4Addr> {
        if position >= self.host_count() {
            return Err(Error::AddressRange {
                subnet: self.to_string(),
                position,
                capacity: self.host_count(),
            });
        }
        Ok(Ipv4Addr::from(self.network + 1 + position as u32))
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix)
    }
}

/// Address at `start_offset - 1 + index` in the usable host range,
/// rendered with the subnet's prefix length appended (`a.b.c.d/24`).
///
/// `start_offset` is 1-based; an offset of 0 or a position past the end of
/// the host range is an [`Error::AddressRange`].
pub fn address_at(subnet: &Subnet, start_offset: u64, index: u64) -> Result<String> {
    let base = start_offset.checked_sub(1).ok_or_else(|| Error::AddressRange {
        subnet: subnet.to_string(),
        position: 0,
        capacity: subnet.host_count(),
    })?;
    let host = subnet.host_at(base + index)?;
    Ok(format!("{}/{}", host, subnet.prefix()))
}

/// The master's address: the host at `start_offset` itself.
pub fn master_address(subnet: &Subnet, start_offset: u64) -> Result<String> {
    address_at(subnet, start_offset, 0)
}

/// Agent addresses, contiguous after the master.
///
/// Fails with [`Error::AddressRange`] when `count` agents do not fit in the
/// remaining host range.
pub fn agent_addresses(subnet: &Subnet, start_offset: u64, count: u64) -> Result<Vec<String>> {
    (0..count)
        .map(|i| address_at(subnet, start_offset, i + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalises_cidr() {
        let subnet = Subnet::parse("192.168.0.5/24").unwrap();
        assert_eq!(subnet.to_string(), "192.168.0.0/24");
        assert_eq!(subnet.host_count(), 254);
    }

    #[test]
    fn rejects_malformed_and_hostless_subnets() {
        assert!(Subnet::parse("not-a-subnet").is_err());
        assert!(Subnet::parse("192.168.0.0").is_err());
        assert!(Subnet::parse("192.168.0.0/33").is_err());
        // /31 and /32 leave no usable hosts.
        assert!(Subnet::parse("192.168.0.0/31").is_err());
        assert!(Subnet::parse("192.168.0.0/32").is_err());
    }

    #[test]
    fn master_and_agents_are_contiguous() {
        let subnet = Subnet::parse("192.168.0.0/24").unwrap();
        assert_eq!(master_address(&subnet, 30).unwrap(), "192.168.0.30/24");
        assert_eq!(
            agent_addresses(&subnet, 30, 3).unwrap(),
            vec!["192.168.0.31/24", "192.168.0.32/24", "192.168.0.33/24"]
        );
    }

    #[test]
    fn address_at_is_deterministic() {
        let subnet = Subnet::parse("10.0.0.0/16").unwrap();
        let first = address_at(&subnet, 5, 7).unwrap();
        let second = address_at(&subnet, 5, 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn agents_are_distinct_and_follow_the_master() {
        let subnet = Subnet::parse("10.1.2.0/24").unwrap();
        let master = master_address(&subnet, 10).unwrap();
        let agents = agent_addresses(&subnet, 10, 20).unwrap();

        let mut seen = std::collections::HashSet::new();
        seen.insert(master.clone());
        for agent in &agents {
            assert!(seen.insert(agent.clone()), "duplicate address {agent}");
            assert_ne!(agent, &master);
        }
    }

    #[test]
    fn exhausted_range_is_an_error_not_a_wrapped_address() {
        let subnet = Subnet::parse("192.168.0.0/29").unwrap();
        // /29 has 6 usable hosts; offset 5 leaves room for the master and one agent.
        assert!(master_address(&subnet, 5).is_ok());
        assert!(agent_addresses(&subnet, 5, 1).is_ok());
        let err = agent_addresses(&subnet, 5, 2).unwrap_err();
        assert!(matches!(err, Error::AddressRange { .. }), "got: {err}");
    }

    #[test]
    fn zero_offset_is_rejected() {
        let subnet = Subnet::parse("192.168.0.0/24").unwrap();
        assert!(matches!(
            address_at(&subnet, 0, 0),
            Err(Error::AddressRange { .. })
        ));
    }
}
