use std::fmt;
use serde::{Serialize, Serializer};
use crate::endian;

/// IPv4 address packed into 32 bits. Zero doubles as the "invalid" value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AddressValue(u32);

impl AddressValue {
    pub const INVALID: Self = Self(0);

    pub fn from_fields(fields: [u8; 4]) -> Self {
        let mut raw = [0u8; 4];
        for (i, f) in fields.iter().enumerate() { raw[endian::network_index(i)] = *f; }
        Self(u32::from_ne_bytes(raw))
    }

    /// Octets in network order.
    pub fn fields(self) -> [u8; 4] {
        let raw = self.0.to_ne_bytes();
        std::array::from_fn(|i| raw[endian::network_index(i)])
    }

    pub fn parse(text: &str) -> Self {
        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.len() != 4 { return Self::INVALID; }
        let mut fields = [0u8; 4];
        for (i, p) in parts.iter().enumerate() {
            match p.trim().parse::<u8>() {
                Ok(v) => fields[i] = v,
                Err(_) => return Self::INVALID,
            }
        }
        Self::from_fields(fields)
    }

    /// Reads an address as stored in a device document: a signed or unsigned
    /// 32-bit literal, first octet in the most significant byte. Dotted quads
    /// are accepted too.
    pub fn from_packed_text(text: &str) -> Self {
        let t = text.trim();
        if let Ok(v) = t.parse::<i32>() { return Self(v as u32); }
        if let Ok(v) = t.parse::<u32>() { return Self(v); }
        if t.contains('.') { return Self::parse(t); }
        Self::INVALID
    }

    pub fn to_packed_text(self) -> String { (self.0 as i32).to_string() }

    pub fn is_valid(self) -> bool { self.0 != 0 }
}

impl fmt::Display for AddressValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.fields();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl Serialize for AddressValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.collect_str(self) }
}

/// 16-bit TCP port. Documents store it as `(port << 16) + 1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PortValue(u16);

impl PortValue {
    pub const INVALID: Self = Self(0);
    const CODED_FLAG: u32 = 1;

    #[cfg(test)]
    pub fn new(port: u16) -> Self { Self(port) }
    #[cfg(test)]
    pub fn get(self) -> u16 { self.0 }

    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<u32>() {
            Ok(v) if v <= u16::MAX as u32 => Self(v as u16),
            _ => Self::INVALID,
        }
    }

    /// Port held in the upper half of a coded document value.
    pub fn parse_coded(text: &str) -> Self {
        let v = text.trim().parse::<u32>().unwrap_or(0);
        Self(((v & 0xFFFF_0000) >> 16) as u16)
    }

    pub fn to_coded(self) -> String { (((self.0 as u32) << 16) + Self::CODED_FLAG).to_string() }

    pub fn is_valid(self) -> bool { self.0 != 0 }
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
