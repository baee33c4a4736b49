// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Interface and address enumeration.

use std::net::Ipv6Addr;

use crate::error::Error;
use crate::libc_extra::*;
use crate::rtnetlink::{
    AttrTable, DumpKind, IfAddrMsgRef, IfInfoMsgRef, NlmsgList, NlmsgPayloadRef, RtNetlink,
};

/// The scope of an IPv6 address, as determined from its leading bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrScope {
    /// `fe80::/16`
    LinkLocal,
    /// `ff00::/8`
    Multicast,
    /// Anything else (including loopback and unique-local addresses).
    Global,
}

impl AddrScope {
    #[inline]
    pub fn classify(addr: &Ipv6Addr) -> Self {
        match addr.octets() {
            [0xfe, 0x80, ..] => AddrScope::LinkLocal,
            [0xff, ..] => AddrScope::Multicast,
            _ => AddrScope::Global,
        }
    }
}

/// A snapshot of one network interface and its IPv6 addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub index: u32,
    /// The ARP hardware type (`ARPHRD_*`).
    pub hardware_type: u16,
    /// The link-layer address; empty for interfaces that have none.
    pub link_addr: Vec<u8>,
    /// Interface flags (`IFF_*`).
    pub flags: u32,
    /// The Managed bit from the last router advertisement received on this interface.
    pub managed: bool,
    /// The OtherConfig bit from the last router advertisement received on this interface.
    pub other_config: bool,
    pub link_local: Vec<Ipv6Addr>,
    pub global: Vec<Ipv6Addr>,
}

impl InterfaceRecord {
    /// Builds a record from an `RTM_NEWLINK` message. Returns `None` if the message carries no
    /// interface name.
    fn from_link(link: &IfInfoMsgRef<'_>) -> Option<Self> {
        let attrs = link.attrs();
        let name = attrs.get_str(IFLA_IFNAME)?;

        let ra_flags = attrs
            .get(IFLA_PROTINFO)
            .and_then(|protinfo| {
                AttrTable::<'_, { IFLA_INET6_MAX + 1 }>::parse(protinfo).get_u32(IFLA_INET6_FLAGS)
            })
            .unwrap_or(0);

        Some(Self {
            name: name.to_owned(),
            index: link.index(),
            hardware_type: link.if_type(),
            link_addr: attrs.get(IFLA_ADDRESS).unwrap_or(&[]).to_vec(),
            flags: link.flags(),
            managed: ra_flags & IF_RA_MANAGED != 0,
            other_config: ra_flags & IF_RA_OTHERCONF != 0,
            link_local: Vec::new(),
            global: Vec::new(),
        })
    }

    fn push_addr(&mut self, addr: Ipv6Addr) {
        match AddrScope::classify(&addr) {
            AddrScope::LinkLocal => self.link_local.push(addr),
            AddrScope::Global => self.global.push(addr),
            AddrScope::Multicast => (),
        }
    }

    #[inline]
    pub fn link_addr_len(&self) -> usize {
        self.link_addr.len()
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.flags & libc::IFF_UP as u32 != 0
    }

    #[inline]
    pub fn is_loopback(&self) -> bool {
        self.flags & libc::IFF_LOOPBACK as u32 != 0
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.flags & libc::IFF_RUNNING as u32 != 0
    }

    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.flags & libc::IFF_MULTICAST as u32 != 0
    }
}

/// Lists every network interface on the system along with its link-local and global IPv6
/// addresses.
pub fn enumerate_interfaces() -> Result<Vec<InterfaceRecord>, Error> {
    let mut nl = RtNetlink::open()?;
    enumerate_with(&mut nl)
}

/// Like [`enumerate_interfaces()`], but reuses an already-open netlink handle.
pub fn enumerate_with(nl: &mut RtNetlink) -> Result<Vec<InterfaceRecord>, Error> {
    // Links are requested as AF_INET6 so that the kernel includes IPv6 protocol info
    let links = nl.dump(crate::DEFAULT_FAMILY as u8, DumpKind::Link)?;
    let addrs = nl.dump(libc::AF_UNSPEC as u8, DumpKind::Address)?;

    let records = collect_records(&links, &addrs)?;
    tracing::debug!(count = records.len(), "enumerated interfaces");
    Ok(records)
}

/// Joins link and address dumps into interface records, in link dump order.
pub(crate) fn collect_records(
    links: &NlmsgList,
    addrs: &NlmsgList,
) -> Result<Vec<InterfaceRecord>, Error> {
    let mut v6_addrs = Vec::new();
    for msg in addrs.iter() {
        if let NlmsgPayloadRef::Address(addr) = msg?.payload() {
            if let Some(entry) = ipv6_entry(&addr) {
                v6_addrs.push(entry);
            }
        }
    }

    let mut records = Vec::new();
    for msg in links.iter() {
        let msg = msg?;
        let NlmsgPayloadRef::Link(link) = msg.payload() else {
            tracing::trace!(nlmsg_type = msg.nlmsg_type(), "skipping non-link message");
            continue;
        };

        let Some(mut record) = InterfaceRecord::from_link(&link) else {
            tracing::debug!(index = link.index(), "skipping link message without a name");
            continue;
        };

        let index = record.index;
        for (_, addr) in v6_addrs.iter().filter(|(idx, _)| *idx == index) {
            record.push_addr(*addr);
        }

        records.push(record);
    }

    Ok(records)
}

fn ipv6_entry(addr: &IfAddrMsgRef<'_>) -> Option<(u32, Ipv6Addr)> {
    if addr.family() != libc::AF_INET6 as u8 {
        return None;
    }

    match addr.address() {
        Some(ip) => Some((addr.index(), ip)),
        None => {
            tracing::trace!(index = addr.index(), "skipping address message without IPv6 address");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtnetlink::testutil::*;
    use crate::rtnetlink::NlmsgWriter;

    const MAC: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30];

    fn v6(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn classify_by_leading_bytes() {
        assert_eq!(AddrScope::classify(&v6("fe80::1")), AddrScope::LinkLocal);
        assert_eq!(AddrScope::classify(&v6("ff02::1:2")), AddrScope::Multicast);
        assert_eq!(AddrScope::classify(&v6("2001:db8::1")), AddrScope::Global);
        assert_eq!(AddrScope::classify(&v6("::1")), AddrScope::Global);
        // Only the exact fe80 prefix counts as link-local
        assert_eq!(AddrScope::classify(&v6("fe90::1")), AddrScope::Global);
    }

    #[test]
    fn records_from_synthetic_dumps() {
        let mut links = NlmsgList::new();
        links.push(link_message(1, 0, 1, "lo", None, None));
        links.push(link_message(1, 0, 2, "eth0", Some(&MAC), Some(IF_RA_MANAGED | IF_RA_OTHERCONF)));
        links.push(link_message(1, 0, 3, "eth1", Some(&MAC), Some(IF_RA_OTHERCONF)));

        let inet6 = libc::AF_INET6 as u8;
        let mut addrs = NlmsgList::new();
        addrs.push(addr_message(2, 0, inet6, 1, v6("::1"), 0));
        addrs.push(addr_message(2, 0, inet6, 2, v6("fe80::200:5eff:fe10:2030"), 0));
        addrs.push(addr_message(2, 0, inet6, 2, v6("2001:db8::10"), 0));
        addrs.push(addr_message(2, 0, inet6, 2, v6("ff02::1"), 0));
        addrs.push(addr_message(2, 0, inet6, 2, v6("2001:db8::11"), 0));
        addrs.push(addr_message(2, 0, libc::AF_INET as u8, 3, v6("::ffff:10.0.0.1"), 0));

        let records = collect_records(&links, &addrs).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["lo", "eth0", "eth1"]);

        let lo = &records[0];
        assert_eq!(lo.index, 1);
        assert_eq!(lo.link_addr_len(), 0);
        assert_eq!(lo.hardware_type, libc::ARPHRD_LOOPBACK);
        assert_eq!(lo.global, vec![v6("::1")]);
        assert!(lo.link_local.is_empty());
        assert!(!lo.managed && !lo.other_config);

        let eth0 = &records[1];
        assert_eq!(eth0.link_addr, MAC.to_vec());
        assert!(eth0.managed && eth0.other_config);
        assert!(eth0.is_up() && eth0.is_running());
        assert!(!eth0.is_loopback());
        assert_eq!(eth0.link_local, vec![v6("fe80::200:5eff:fe10:2030")]);
        assert_eq!(eth0.global, vec![v6("2001:db8::10"), v6("2001:db8::11")]);

        // The IPv4 message is ignored
        let eth1 = &records[2];
        assert!(!eth1.managed && eth1.other_config);
        assert!(eth1.link_local.is_empty() && eth1.global.is_empty());
    }

    #[test]
    fn nameless_link_is_skipped() {
        let mut w = NlmsgWriter::new(libc::RTM_NEWLINK, 0, 1, 0);
        w.push_struct(&ifinfomsg {
            ifi_family: libc::AF_INET6 as u8,
            ifi_pad: 0,
            ifi_type: libc::ARPHRD_ETHER,
            ifi_index: 4,
            ifi_flags: 0,
            ifi_change: 0,
        });
        w.push_attr(IFLA_ADDRESS, &MAC);

        let mut links = NlmsgList::new();
        links.push(w.finish());
        links.push(link_message(1, 0, 5, "eth5", Some(&MAC), None));

        let records = collect_records(&links, &NlmsgList::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 5);
    }

    #[test]
    fn malformed_message_is_an_error() {
        let mut msg = link_message(1, 0, 1, "lo", None, None);
        msg.truncate(msg.len() - 4);

        let mut links = NlmsgList::new();
        links.push(msg);
        let err = collect_records(&links, &NlmsgList::new()).unwrap_err();
        assert!(err.detail().starts_with("malformed netlink reply"));
    }

    #[test]
    fn enumerate_finds_loopback() {
        let records = enumerate_interfaces().unwrap();
        let lo = records.iter().find(|r| r.is_loopback()).unwrap();
        assert_eq!(lo.name, "lo");
        assert_ne!(lo.index, 0);
        assert!(lo.link_local.iter().all(|a| a.octets()[..2] == [0xfe, 0x80]));
        assert!(records
            .iter()
            .flat_map(|r| r.global.iter())
            .all(|a| AddrScope::classify(a) == AddrScope::Global));
    }
}
