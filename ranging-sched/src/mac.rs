/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! MAC address value object.
//!
//! The MAC is the natural key of the node database: two [`MacAddress`]
//! values are equal exactly when their six bytes match.  Ordering follows the
//! byte order so that `BTreeMap<MacAddress, _>` iterates deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a textual MAC address could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacParseError {
    #[error("expected 6 colon-separated octets in '{input}'")]
    WrongLength { input: String },

    #[error("invalid hex octet '{octet}' in '{input}'")]
    BadOctet { input: String, octet: String },
}

/// A 6-byte IEEE 802 MAC address identifying one ranging target.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// `true` for `00:00:00:00:00:00`.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// `true` when the group bit (LSB of the first octet) is set.  This
    /// includes the broadcast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// A MAC that can name a single ranging peer.
    pub fn is_unicast(&self) -> bool {
        !self.is_zero() && !self.is_multicast()
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError::WrongLength {
                input: s.to_owned(),
            });
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(MacParseError::BadOctet {
                    input: s.to_owned(),
                    octet: (*part).to_owned(),
                });
            }
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| MacParseError::BadOctet {
                input: s.to_owned(),
                octet: (*part).to_owned(),
            })?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_and_uppercase_hex() {
        let a: MacAddress = "00:1a:2b:3c:4d:5e".parse().unwrap();
        let b: MacAddress = "00:1A:2B:3C:4D:5E".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), &[0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
    }

    #[test]
    fn display_is_lowercase_colon_separated() {
        let mac = MacAddress::new([0xAA, 0xBB, 0x0C, 0x01, 0x02, 0xFF]);
        assert_eq!(mac.to_string(), "aa:bb:0c:01:02:ff");
    }

    #[test]
    fn wrong_octet_count_is_rejected() {
        let err = "00:11:22:33:44".parse::<MacAddress>().unwrap_err();
        assert!(matches!(err, MacParseError::WrongLength { .. }));
    }

    #[test]
    fn non_hex_octet_is_rejected() {
        let err = "00:11:22:33:44:zz".parse::<MacAddress>().unwrap_err();
        assert!(matches!(err, MacParseError::BadOctet { ref octet, .. } if octet == "zz"));
    }

    #[test]
    fn unicast_classification() {
        assert!(!MacAddress::default().is_unicast());
        assert!(!MacAddress::BROADCAST.is_unicast());
        assert!(MacAddress::new([0x01, 0, 0x5e, 0, 0, 1]).is_multicast());
        assert!(MacAddress::new([0x02, 0, 0, 0, 0, 1]).is_unicast());
    }

    #[test]
    fn deserializes_from_yaml_string() {
        let mac: MacAddress = serde_yaml::from_str("\"02:00:00:00:00:07\"").unwrap();
        assert_eq!(mac, MacAddress::new([2, 0, 0, 0, 0, 7]));
    }
}
