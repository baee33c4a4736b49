// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::Ipv6Addr;

use crate::libc_extra::*;

/// Walks a chain of route attributes, yielding `(type, payload)` pairs.
///
/// Iteration stops silently at the first attribute whose declared length is shorter than its
/// header or runs past the end of the buffer. The `NLA_F_NESTED` and `NLA_F_NET_BYTEORDER` bits
/// are masked off the returned type.
#[derive(Clone, Debug)]
pub struct RtAttrIter<'a> {
    data: &'a [u8],
}

impl<'a> RtAttrIter<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for RtAttrIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let &[l0, l1, t0, t1, ..] = self.data else {
            self.data = &[];
            return None;
        };

        let rta_len = u16::from_ne_bytes([l0, l1]) as usize;
        let rta_type = u16::from_ne_bytes([t0, t1]);

        let Some(attr) = self.data.get(..rta_len).filter(|_| rta_len >= RTA_HDRLEN) else {
            self.data = &[];
            return None;
        };

        self.data = self.data.get(RTA_ALIGN(rta_len)..).unwrap_or(&[]);
        Some((rta_type & NLA_TYPE_MASK, &attr[RTA_HDRLEN..]))
    }
}

/// Route attributes indexed by type, for types `0..N`.
///
/// Attributes with a type of `N` or above are ignored. When a type appears more than once, the
/// last occurrence wins.
#[derive(Clone, Copy, Debug)]
pub struct AttrTable<'a, const N: usize> {
    slots: [Option<&'a [u8]>; N],
}

impl<'a, const N: usize> AttrTable<'a, N> {
    pub fn parse(data: &'a [u8]) -> Self {
        let mut slots = [None; N];
        for (rta_type, payload) in RtAttrIter::new(data) {
            if let Some(slot) = slots.get_mut(rta_type as usize) {
                *slot = Some(payload);
            }
        }

        Self { slots }
    }

    /// The raw payload of the attribute of type `rta_type`, if present.
    #[inline]
    pub fn get(&self, rta_type: u16) -> Option<&'a [u8]> {
        self.slots.get(rta_type as usize).copied().flatten()
    }

    #[inline]
    pub fn contains(&self, rta_type: u16) -> bool {
        self.get(rta_type).is_some()
    }

    /// Reads a native-endian `u32` attribute. Payloads shorter than 4 bytes yield `None`.
    pub fn get_u32(&self, rta_type: u16) -> Option<u32> {
        match self.get(rta_type)? {
            &[b0, b1, b2, b3, ..] => Some(u32::from_ne_bytes([b0, b1, b2, b3])),
            _ => None,
        }
    }

    /// Reads an IPv6 address attribute; any payload that isn't exactly 16 bytes yields `None`.
    pub fn get_ipv6(&self, rta_type: u16) -> Option<Ipv6Addr> {
        let octets: [u8; 16] = self.get(rta_type)?.try_into().ok()?;
        Some(Ipv6Addr::from(octets))
    }

    /// Reads a NUL-terminated string attribute. A missing terminator is tolerated.
    pub fn get_str(&self, rta_type: u16) -> Option<&'a str> {
        let raw = self.get(rta_type)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..end]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(rta_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(((RTA_HDRLEN + payload.len()) as u16).to_ne_bytes());
        buf.extend(rta_type.to_ne_bytes());
        buf.extend(payload);
        buf.resize(RTA_ALIGN(buf.len()), 0);
        buf
    }

    #[test]
    fn iterates_padded_attributes() {
        let mut buf = attr(3, b"lo\0");
        buf.extend(attr(1, &[0xaa; 6]));
        buf.extend(attr(5, &7u32.to_ne_bytes()));

        let attrs: Vec<_> = RtAttrIter::new(&buf).collect();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0], (3, &b"lo\0"[..]));
        assert_eq!(attrs[1], (1, &[0xaa; 6][..]));
        assert_eq!(attrs[2].0, 5);
    }

    #[test]
    fn stops_at_malformed_attribute() {
        let mut buf = attr(1, &[1, 2, 3, 4]);
        // Declares 64 bytes but only 8 follow
        buf.extend(64u16.to_ne_bytes());
        buf.extend(2u16.to_ne_bytes());
        buf.extend([0u8; 4]);
        assert_eq!(RtAttrIter::new(&buf).count(), 1);

        let mut buf = attr(1, &[1, 2, 3, 4]);
        // Declared length shorter than the header
        buf.extend(2u16.to_ne_bytes());
        buf.extend(2u16.to_ne_bytes());
        assert_eq!(RtAttrIter::new(&buf).count(), 1);

        assert_eq!(RtAttrIter::new(&[1, 0]).count(), 0);
    }

    #[test]
    fn masks_flag_bits() {
        let buf = attr(12 | NLA_F_NESTED, &[]);
        let (rta_type, payload) = RtAttrIter::new(&buf).next().unwrap();
        assert_eq!(rta_type, 12);
        assert!(payload.is_empty());
    }

    #[test]
    fn table_lookups() {
        let v6: Ipv6Addr = "fe80::1".parse().unwrap();
        let mut buf = attr(1, &v6.octets());
        buf.extend(attr(2, &[10, 0, 0, 1]));
        buf.extend(attr(3, b"eth0\0"));
        buf.extend(attr(8, &0x80u32.to_ne_bytes()));
        buf.extend(attr(40, b"ignored"));

        let table = AttrTable::<'_, 11>::parse(&buf);
        assert_eq!(table.get_ipv6(1), Some(v6));
        assert_eq!(table.get_ipv6(2), None);
        assert_eq!(table.get_str(3), Some("eth0"));
        assert_eq!(table.get_u32(8), Some(0x80));
        assert_eq!(table.get_u32(2), Some(u32::from_ne_bytes([10, 0, 0, 1])));
        assert!(!table.contains(4));
        assert!(table.get(40).is_none());
    }

    #[test]
    fn later_duplicate_wins() {
        let mut buf = attr(1, &[1]);
        buf.extend(attr(1, &[2]));
        let table = AttrTable::<'_, 4>::parse(&buf);
        assert_eq!(table.get(1), Some(&[2u8][..]));
    }

    #[test]
    fn unterminated_string() {
        let buf = attr(3, b"wlan0");
        let table = AttrTable::<'_, 4>::parse(&buf);
        assert_eq!(table.get_str(3), Some("wlan0"));
    }
}
