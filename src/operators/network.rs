//! Network operators (@ipMatch, @ipMatchFromFile, @ipMatchFromDataset).

use super::traits::{Operator, OperatorContext};
use super::OperatorOptions;
use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// IP match operator.
#[derive(Debug)]
pub struct IpMatchOperator {
    networks: Vec<IpNetwork>,
    name: &'static str,
}

/// Parse an address or CIDR; a bare address becomes a /32 or /128 network.
fn parse_network(s: &str) -> Result<IpNetwork> {
    if !s.contains('/') {
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(IpNetwork::from(ip));
        }
    }
    s.parse::<IpNetwork>().map_err(|e| Error::InvalidIp {
        value: s.to_string(),
        message: e.to_string(),
    })
}

impl IpMatchOperator {
    /// Create from a comma or space separated address/CIDR list.
    pub fn new(ips: &str) -> Result<Self> {
        let entries = ips
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty());
        Self::from_entries("ipMatch", entries)
    }

    fn from_entries<'a>(name: &'static str, entries: impl Iterator<Item = &'a str>) -> Result<Self> {
        let networks = entries
            .map(|s| parse_network(s.trim()))
            .collect::<Result<Vec<_>>>()?;
        if networks.is_empty() {
            return Err(Error::operator(name, "no addresses given"));
        }
        Ok(Self { networks, name })
    }

    /// Create from a file containing one address or CIDR per line.
    pub fn from_file(options: &OperatorOptions<'_>) -> Result<Self> {
        let content = options.read_data_file()?;
        Self::from_entries(
            "ipMatchFromFile",
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    /// Create from a `SecDataset` table entry.
    pub fn from_dataset(options: &OperatorOptions<'_>) -> Result<Self> {
        let name = options.arguments.trim();
        let lines = options
            .datasets
            .get(name)
            .ok_or_else(|| Error::operator("ipMatchFromDataset", format!("dataset {name} not found")))?;
        Self::from_entries("ipMatchFromDataset", lines.iter().map(String::as_str))
    }
}

impl Operator for IpMatchOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, input: &str) -> bool {
        let Ok(ip) = input.trim().parse::<IpAddr>() else {
            return false;
        };
        self.networks.iter().any(|net| net.contains(ip))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::traits::testing::TestContext;

    #[test]
    fn test_ip_match_single() {
        let op = IpMatchOperator::new("192.168.1.1").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "192.168.1.1"));
        assert!(!op.evaluate(&mut ctx, "192.168.1.2"));
    }

    #[test]
    fn test_ip_match_cidr_list() {
        let op = IpMatchOperator::new("10.0.0.0/8,192.168.0.0/16 ::1").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "10.20.30.40"));
        assert!(op.evaluate(&mut ctx, "192.168.5.5"));
        assert!(op.evaluate(&mut ctx, "::1"));
        assert!(!op.evaluate(&mut ctx, "172.16.0.1"));
    }

    #[test]
    fn test_ip_match_invalid_input() {
        let op = IpMatchOperator::new("127.0.0.1").unwrap();
        assert!(!op.evaluate(&mut TestContext::new(), "not-an-ip"));
        assert!(IpMatchOperator::new("999.1.1.1").is_err());
        assert!(IpMatchOperator::new("").is_err());
    }
}
