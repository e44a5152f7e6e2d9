//! Literal-IP and CIDR membership lists.
//!
//! Used for `trusted_proxies` and `whitelisted_ips`. Entries containing a
//! `/` are parsed as networks, everything else as a single address; any
//! parse failure aborts construction naming the offending input.

use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpListError {
    #[error("Invalid IP: {0}")]
    InvalidIp(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

/// Immutable set of literal addresses and networks.
#[derive(Debug, Default)]
pub struct IpList {
    ips: Vec<IpAddr>,
    nets: Vec<IpNet>,
}

impl IpList {
    pub fn new(entries: &[String]) -> Result<Self, IpListError> {
        let mut ips = Vec::new();
        let mut nets = Vec::new();
        for entry in entries {
            if entry.contains('/') {
                let net = entry
                    .parse::<IpNet>()
                    .map_err(|_| IpListError::InvalidNetwork(entry.clone()))?;
                nets.push(net);
                continue;
            }

            let ip = entry
                .parse::<IpAddr>()
                .map_err(|_| IpListError::InvalidIp(entry.clone()))?;
            ips.push(ip);
        }

        Ok(Self { ips, nets })
    }

    /// Membership test. Unparseable candidates are never members.
    pub fn contains(&self, candidate: &str) -> bool {
        let Ok(ip) = candidate.parse::<IpAddr>() else {
            return false;
        };

        self.nets.iter().any(|net| net.contains(&ip)) || self.ips.iter().any(|known| *known == ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> IpList {
        let entries: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        IpList::new(&entries).unwrap()
    }

    #[test]
    fn matches_literals_and_networks() {
        let list = list(&["1.2.3.4", "10.0.0.0/8", "::1"]);

        assert!(list.contains("1.2.3.4"));
        assert!(list.contains("10.200.3.4"));
        assert!(list.contains("::1"));
        assert!(!list.contains("1.2.3.5"));
        assert!(!list.contains("11.0.0.1"));
    }

    #[test]
    fn unparseable_candidates_are_not_members() {
        let list = list(&["10.0.0.0/8"]);

        assert!(!list.contains("not-an-ip"));
        assert!(!list.contains(""));
    }

    #[test]
    fn construction_names_the_bad_entry() {
        let err = IpList::new(&["bogus".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid IP: bogus");

        let err = IpList::new(&["bogus/8".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid network: bogus/8");
    }

    #[test]
    fn empty_list_matches_nothing() {
        let list = IpList::new(&[]).unwrap();
        assert!(!list.contains("127.0.0.1"));
    }
}
