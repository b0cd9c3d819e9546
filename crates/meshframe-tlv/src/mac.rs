use std::fmt;
use std::str::FromStr;

use crate::error::ParseMacError;
use crate::field::WireType;

/// 48-bit IEEE MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    /// IEEE 1905.1 multicast destination.
    pub const IEEE1905_MULTICAST: MacAddr = MacAddr([0x01, 0x80, 0xC2, 0x00, 0x00, 0x13]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl WireType for MacAddr {
    const SIZE: usize = 6;

    fn read(bytes: &[u8]) -> Self {
        Self(<[u8; 6]>::read(bytes))
    }

    fn write(&self, bytes: &mut [u8]) {
        self.0.write(bytes);
    }

    fn swap(_bytes: &mut [u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let mac: MacAddr = "02:AA:bb:0c:00:ff".parse().unwrap();
        assert_eq!(mac, MacAddr([0x02, 0xAA, 0xBB, 0x0C, 0x00, 0xFF]));
        assert_eq!(mac.to_string(), "02:aa:bb:0c:00:ff");
        assert_eq!("02-aa-bb-0c-00-ff".parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("02:aa:bb:0c:00".parse::<MacAddr>().is_err());
        assert!("02:aa:bb:0c:00:ff:11".parse::<MacAddr>().is_err());
        assert!("02:aa:bb:0c:00:zz".parse::<MacAddr>().is_err());
        assert!("2:aa:bb:0c:00:ff".parse::<MacAddr>().is_err());
    }
}
