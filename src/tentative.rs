// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Duplicate address detection status.

use std::net::Ipv6Addr;

use crate::error::Error;
use crate::rtnetlink::{DumpKind, NlmsgList, NlmsgPayloadRef, RtNetlink};

/// The duplicate address detection state of an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tentative {
    /// The address is not assigned to the interface.
    NotFound,
    /// The address is assigned but duplicate address detection hasn't completed.
    Tentative,
    /// The address is assigned and usable.
    NotTentative,
}

/// Checks whether `addr` on the interface `if_index` is still undergoing duplicate address
/// detection. `if_name` is only used in diagnostics.
pub fn probe_tentative(if_name: &str, if_index: u32, addr: Ipv6Addr) -> Result<Tentative, Error> {
    let mut nl = RtNetlink::open()?;
    let addrs = nl.dump(crate::DEFAULT_FAMILY as u8, DumpKind::Address)?;
    let state = tentative_state(&addrs, if_index, addr)?;

    tracing::debug!(iface = %if_name, %addr, ?state, "probed address state");
    Ok(state)
}

fn tentative_state(addrs: &NlmsgList, if_index: u32, addr: Ipv6Addr) -> Result<Tentative, Error> {
    let mut state = Tentative::NotFound;
    for msg in addrs.iter() {
        let NlmsgPayloadRef::Address(ifa) = msg?.payload() else {
            continue;
        };

        if ifa.index() != if_index || ifa.local() != Some(addr) {
            continue;
        }

        // Later matches override earlier ones
        state = if ifa.effective_flags() & libc::IFA_F_TENTATIVE != 0 {
            Tentative::Tentative
        } else {
            Tentative::NotTentative
        };
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libc_extra::*;
    use crate::rtnetlink::testutil::*;
    use crate::rtnetlink::NlmsgWriter;

    fn v6(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    fn list(msgs: Vec<Vec<u8>>) -> NlmsgList {
        let mut list = NlmsgList::new();
        for msg in msgs {
            list.push(msg);
        }
        list
    }

    const INET6: u8 = libc::AF_INET6 as u8;
    const TENTATIVE: u8 = libc::IFA_F_TENTATIVE as u8;

    #[test]
    fn header_flags() {
        let addrs = list(vec![
            addr_message(1, 0, INET6, 2, v6("2001:db8::1"), TENTATIVE),
            addr_message(1, 0, INET6, 2, v6("2001:db8::2"), 0),
        ]);

        assert_eq!(
            tentative_state(&addrs, 2, v6("2001:db8::1")).unwrap(),
            Tentative::Tentative
        );
        assert_eq!(
            tentative_state(&addrs, 2, v6("2001:db8::2")).unwrap(),
            Tentative::NotTentative
        );
        assert_eq!(
            tentative_state(&addrs, 2, v6("2001:db8::3")).unwrap(),
            Tentative::NotFound
        );
        // Same address on a different interface
        assert_eq!(
            tentative_state(&addrs, 3, v6("2001:db8::1")).unwrap(),
            Tentative::NotFound
        );
    }

    #[test]
    fn flags_attribute_overrides_header() {
        let addr = v6("2001:db8::7");
        let mut w = NlmsgWriter::new(libc::RTM_NEWADDR, 0, 1, 0);
        w.push_struct(&ifaddrmsg {
            ifa_family: INET6,
            ifa_prefixlen: 64,
            ifa_flags: 0,
            ifa_scope: 0,
            ifa_index: 2,
        });
        w.push_attr(libc::IFA_LOCAL, &addr.octets());
        w.push_attr(IFA_FLAGS, &libc::IFA_F_TENTATIVE.to_ne_bytes());

        let addrs = list(vec![w.finish()]);
        assert_eq!(tentative_state(&addrs, 2, addr).unwrap(), Tentative::Tentative);
    }

    #[test]
    fn last_match_wins() {
        let addr = v6("fe80::99");
        let addrs = list(vec![
            addr_message(1, 0, INET6, 2, addr, TENTATIVE),
            addr_message(1, 0, INET6, 2, addr, 0),
        ]);
        assert_eq!(tentative_state(&addrs, 2, addr).unwrap(), Tentative::NotTentative);
    }

    #[test]
    fn absent_address_not_found() {
        let index = crate::Interface::new("lo").unwrap().index().unwrap();
        let state = probe_tentative("lo", index, v6("2001:db8:dead::beef")).unwrap();
        assert_eq!(state, Tentative::NotFound);
    }
}
