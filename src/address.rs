//! Host addresses and address ranges
//!
//! Per-host shaping keys everything off the dotted-quad address: the 4th
//! octet becomes the HTB class minor number and the 3rd octet is carried as
//! the "net" part of the flow id.

use crate::error::ShapeError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A validated dotted-quad host address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddress {
    octets: [u8; 4],
}

impl HostAddress {
    /// Net identifier (3rd octet)
    pub fn net(&self) -> u8 {
        self.octets[2]
    }

    /// Host identifier (4th octet), used as the class minor number
    pub fn host(&self) -> u8 {
        self.octets[3]
    }

    /// Flow id in `net:host` form, e.g. `10:10` for 10.10.10.10
    pub fn flow_id(&self) -> String {
        format!("{}:{}", self.net(), self.host())
    }

    pub fn to_ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.octets)
    }
}

impl FromStr for HostAddress {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ShapeError::InvalidAddress(s.to_string());

        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() != 4 {
            return Err(invalid());
        }

        let mut octets = [0u8; 4];
        for (slot, segment) in octets.iter_mut().zip(segments) {
            // u8::from_str accepts a leading '+', plain digits only here
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let value: u32 = segment.parse().map_err(|_| invalid())?;
            *slot = u8::try_from(value).map_err(|_| invalid())?;
        }

        Ok(Self { octets })
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// An IPv4 CIDR block such as `223.202.61.0/26`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressRange {
    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        (u32::from(addr) & mask) == (u32::from(self.network) & mask)
    }
}

impl FromStr for AddressRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, prefix),
            None => (s, "32"),
        };

        let network: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid network address in {:?}", s))?;
        let prefix_len: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid prefix length in {:?}", s))?;

        if prefix_len > 32 {
            return Err(anyhow::anyhow!("Prefix length out of range in {:?}", s));
        }

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}
