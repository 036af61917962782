// `major:minor` identifiers for qdiscs, classes and flows

use std::fmt;
use std::str::FromStr;

/// A tc handle or class id
///
/// tc reads both halves as hex. A qdisc handle is a handle with minor 0 and
/// prints as `major:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    major: u32,
    minor: u32,
}

impl Handle {
    /// Shaping root qdisc, `1:`
    pub const ROOT: Handle = Handle::new(1, 0);
    /// Top-level class under the root, `1:1`
    pub const TOP_CLASS: Handle = Handle::new(1, 1);
    /// Ingress qdisc, `ffff:`
    pub const INGRESS: Handle = Handle::new(0xffff, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn qdisc(major: u32) -> Self {
        Self { major, minor: 0 }
    }

    /// Class `1:<host>` where the host octet's decimal digits are written
    /// out as-is, so 10.10.10.10 lands in `1:10` on the command line and in
    /// `tc class show` output alike.
    pub fn host_class(host: u8) -> Self {
        Self::new(Self::ROOT.major, digits_as_hex(host))
    }

    /// SFQ leaf qdisc `<host>:` attached below a host class
    pub fn host_leaf(host: u8) -> Self {
        Self::qdisc(digits_as_hex(host))
    }
}

/// Reinterpret the decimal digits of `n` as a hex number (10 -> 0x10)
fn digits_as_hex(n: u8) -> u32 {
    n.to_string()
        .bytes()
        .fold(0, |acc, digit| acc * 16 + u32::from(digit - b'0'))
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{:x}:", self.major)
        } else {
            write!(f, "{:x}:{:x}", self.major, self.minor)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHandleError(String);

impl fmt::Display for ParseHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tc handle: {:?}", self.0)
    }
}

impl std::error::Error for ParseHandleError {}

impl FromStr for Handle {
    type Err = ParseHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHandleError(s.to_string());

        let (major, minor) = s.split_once(':').ok_or_else(err)?;
        let major = u32::from_str_radix(major, 16).map_err(|_| err())?;
        let minor = if minor.is_empty() {
            0
        } else {
            u32::from_str_radix(minor, 16).map_err(|_| err())?
        };

        if major > 0xffff || minor > 0xffff {
            return Err(err());
        }

        Ok(Self { major, minor })
    }
}
