// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Neighbor cache lookups.

use std::net::Ipv6Addr;

use crate::error::{Error, ErrorCode};
use crate::rtnetlink::{DumpKind, NlmsgList, NlmsgPayloadRef, RtNetlink};

/// Looks up the link-layer address of the IPv6 neighbor `addr` on interface `if_index` in the
/// kernel's neighbor cache.
///
/// # Errors
///
/// Returns [`ErrorCode::Unspecified`] if the cache has no entry for `addr` on that interface, or
/// the entry has no link-layer address (e.g. it is still incomplete).
pub fn neighbor_link_addr(if_name: &str, if_index: u32, addr: Ipv6Addr) -> Result<Vec<u8>, Error> {
    let mut nl = RtNetlink::open()?;
    let neighbors = nl.dump(crate::DEFAULT_FAMILY as u8, DumpKind::Neighbor)?;

    match find_link_addr(&neighbors, if_index, addr)? {
        Some(lladdr) => {
            tracing::debug!(iface = %if_name, %addr, len = lladdr.len(), "found neighbor");
            Ok(lladdr)
        }
        None => Err(Error::new(
            ErrorCode::Unspecified,
            format!("no neighbor entry for {addr} on {if_name}"),
        )),
    }
}

fn find_link_addr(
    neighbors: &NlmsgList,
    if_index: u32,
    addr: Ipv6Addr,
) -> Result<Option<Vec<u8>>, Error> {
    for msg in neighbors.iter() {
        let NlmsgPayloadRef::Neighbor(nd) = msg?.payload() else {
            continue;
        };

        if nd.family() != libc::AF_INET6 as u8 || nd.index() != if_index {
            continue;
        }

        let attrs = nd.attrs();
        if attrs.get_ipv6(libc::NDA_DST) != Some(addr) {
            continue;
        }

        match attrs.get(libc::NDA_LLADDR) {
            Some(lladdr) if !lladdr.is_empty() => return Ok(Some(lladdr.to_vec())),
            _ => tracing::trace!(%addr, state = nd.state(), "neighbor entry has no link-layer address"),
        }
    }

    Ok(None)
}
