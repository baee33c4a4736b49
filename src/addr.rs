// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Adding, replacing and deleting interface addresses.

use std::fmt;
use std::net::Ipv6Addr;

use crate::error::{Error, ErrorCode};
use crate::libc_extra::*;
use crate::rtnetlink::{AddressAttr, NetlinkRequest, NlmsgAddress, NlmsgPayload, RtNetlink};
use crate::Interface;

/// The kind of change an [`AddressRequest`] makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrOp {
    /// Add the address, failing if it is already assigned.
    Add,
    /// Add the address, or update its parameters if it is already assigned.
    Replace,
    /// Remove the address.
    Delete,
}

impl AddrOp {
    fn nlmsg_flags(self) -> u16 {
        let flags = match self {
            AddrOp::Add => libc::NLM_F_REQUEST | libc::NLM_F_CREATE | libc::NLM_F_EXCL,
            AddrOp::Replace => libc::NLM_F_REQUEST | libc::NLM_F_REPLACE,
            AddrOp::Delete => libc::NLM_F_REQUEST,
        };
        flags as u16
    }
}

impl fmt::Display for AddrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddrOp::Add => "add",
            AddrOp::Replace => "replace",
            AddrOp::Delete => "delete",
        })
    }
}

/// A single address change to be applied to a named interface.
///
/// ```no_run
/// # fn main() -> Result<(), ifconf6::Error> {
/// use std::net::Ipv6Addr;
/// use ifconf6::{mutate_address, AddrOp, AddressRequest};
///
/// let addr: Ipv6Addr = "2001:db8::10".parse().unwrap();
/// let req = AddressRequest::new("eth0", addr, AddrOp::Replace)
///     .prefix_len(64)
///     .lifetimes(Some(3600), Some(7200));
/// mutate_address(&req)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRequest {
    interface: String,
    addr: Ipv6Addr,
    prefix_len: u8,
    preferred: Option<u32>,
    valid: Option<u32>,
    op: AddrOp,
}

impl AddressRequest {
    /// Creates a request for a host (`/128`) address with unbounded lifetimes.
    pub fn new(interface: impl Into<String>, addr: Ipv6Addr, op: AddrOp) -> Self {
        Self {
            interface: interface.into(),
            addr,
            prefix_len: 0,
            preferred: None,
            valid: None,
            op,
        }
    }

    /// Sets the prefix length. A length of 0 is treated as 128.
    #[inline]
    pub fn prefix_len(mut self, prefix_len: u8) -> Self {
        self.prefix_len = prefix_len;
        self
    }

    /// Sets the preferred and valid lifetimes (in seconds); `None` means infinite.
    #[inline]
    pub fn lifetimes(mut self, preferred: Option<u32>, valid: Option<u32>) -> Self {
        self.preferred = preferred;
        self.valid = valid;
        self
    }

    #[inline]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[inline]
    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    #[inline]
    pub fn op(&self) -> AddrOp {
        self.op
    }

    /// The prefix length that will be sent to the kernel.
    #[inline]
    pub fn effective_prefix_len(&self) -> u8 {
        match self.prefix_len {
            0 => 128,
            n => n,
        }
    }

    fn to_netlink(&self, iface_idx: u32) -> Result<NetlinkRequest, Error> {
        let prefix_length = self.effective_prefix_len();
        if prefix_length > 128 {
            return Err(Error::new(
                ErrorCode::Unspecified,
                format!("invalid prefix length: {}", self.prefix_len),
            ));
        }

        let mut attrs = vec![AddressAttr::Local(self.addr), AddressAttr::Address(self.addr)];
        if self.op != AddrOp::Delete && (self.preferred.is_some() || self.valid.is_some()) {
            attrs.push(AddressAttr::CacheInfo(ifa_cacheinfo {
                ifa_prefered: self.preferred.unwrap_or(INFINITY_LIFE_TIME),
                ifa_valid: self.valid.unwrap_or(INFINITY_LIFE_TIME),
                cstamp: 0,
                tstamp: 0,
            }));
        }

        let body = NlmsgAddress {
            family: libc::AF_INET6 as u8,
            prefix_length,
            flags: 0,
            scope: default_scope(&self.addr),
            iface_idx,
            attrs,
        };

        let payload = match self.op {
            AddrOp::Add | AddrOp::Replace => NlmsgPayload::NewAddress(body),
            AddrOp::Delete => NlmsgPayload::DeleteAddress(body),
        };

        Ok(NetlinkRequest::new(self.op.nlmsg_flags(), payload))
    }
}

/// The route scope assigned to an address. Every address is currently configured with global
/// (`RT_SCOPE_UNIVERSE`) scope, link-local ones included.
#[inline]
pub fn default_scope(_addr: &Ipv6Addr) -> u8 {
    libc::RT_SCOPE_UNIVERSE
}

/// Applies `req` to its interface and waits for the kernel to acknowledge it.
///
/// # Errors
///
/// [`ErrorCode::UnknownInterface`] if the interface can't be found (nothing is sent to the kernel
/// in that case). A rejection by the kernel is reported as [`ErrorCode::Unspecified`], with the
/// kernel's errno available through [`Error::os_error()`].
pub fn mutate_address(req: &AddressRequest) -> Result<(), Error> {
    let iface_idx = Interface::new(&req.interface)?.index()?;
    let msg = req.to_netlink(iface_idx)?;

    let mut nl = RtNetlink::open()?;
    nl.talk(msg)?;

    tracing::info!(
        iface = %req.interface,
        addr = %req.addr,
        prefix_len = req.effective_prefix_len(),
        op = %req.op,
        "address updated"
    );
    Ok(())
}

/// Adds `addr` to `interface`; fails if the address is already assigned.
pub fn add_address(interface: &str, addr: Ipv6Addr, prefix_len: u8) -> Result<(), Error> {
    mutate_address(&AddressRequest::new(interface, addr, AddrOp::Add).prefix_len(prefix_len))
}

/// Adds `addr` to `interface`, or refreshes its lifetimes if it is already assigned.
pub fn replace_address(
    interface: &str,
    addr: Ipv6Addr,
    prefix_len: u8,
    preferred: Option<u32>,
    valid: Option<u32>,
) -> Result<(), Error> {
    mutate_address(
        &AddressRequest::new(interface, addr, AddrOp::Replace)
            .prefix_len(prefix_len)
            .lifetimes(preferred, valid),
    )
}

/// Removes `addr` from `interface`.
pub fn delete_address(interface: &str, addr: Ipv6Addr, prefix_len: u8) -> Result<(), Error> {
    mutate_address(&AddressRequest::new(interface, addr, AddrOp::Delete).prefix_len(prefix_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtnetlink::{NlmsgPayloadRef, NlmsgRef};

    fn addr() -> Ipv6Addr {
        "2001:db8:ffff::42".parse().unwrap()
    }

    fn parse_request(req: &AddressRequest) -> (u16, u16, Vec<u8>) {
        let bytes = req.to_netlink(3).unwrap().serialize();
        let msg = NlmsgRef::parse(&bytes).unwrap();
        (msg.nlmsg_type(), msg.flags_raw(), bytes)
    }

    #[test]
    fn op_flags_and_types() {
        let (ty, flags, _) = parse_request(&AddressRequest::new("eth0", addr(), AddrOp::Add));
        assert_eq!(ty, libc::RTM_NEWADDR);
        assert_eq!(
            flags,
            (libc::NLM_F_REQUEST | libc::NLM_F_CREATE | libc::NLM_F_EXCL) as u16
        );

        let (ty, flags, _) = parse_request(&AddressRequest::new("eth0", addr(), AddrOp::Replace));
        assert_eq!(ty, libc::RTM_NEWADDR);
        assert_eq!(flags, (libc::NLM_F_REQUEST | libc::NLM_F_REPLACE) as u16);

        let (ty, flags, _) = parse_request(&AddressRequest::new("eth0", addr(), AddrOp::Delete));
        assert_eq!(ty, libc::RTM_DELADDR);
        assert_eq!(flags, libc::NLM_F_REQUEST as u16);
    }

    #[test]
    fn body_and_attributes() {
        let req = AddressRequest::new("eth0", addr(), AddrOp::Add);
        let bytes = req.to_netlink(3).unwrap().serialize();
        let msg = NlmsgRef::parse(&bytes).unwrap();

        let NlmsgPayloadRef::Address(a) = msg.payload() else {
            panic!("expected address payload");
        };
        assert_eq!(a.family(), libc::AF_INET6 as u8);
        assert_eq!(a.prefix_len(), 128);
        assert_eq!(a.scope(), libc::RT_SCOPE_UNIVERSE);
        assert_eq!(a.index(), 3);
        assert_eq!(a.flags(), 0);
        assert_eq!(a.local(), Some(addr()));
        assert_eq!(a.address(), Some(addr()));
        assert!(!a.attrs().contains(libc::IFA_CACHEINFO));
    }

    #[test]
    fn lifetimes_add_cache_info() {
        let req = AddressRequest::new("eth0", addr(), AddrOp::Replace)
            .prefix_len(64)
            .lifetimes(Some(1800), None);
        let bytes = req.to_netlink(3).unwrap().serialize();
        let NlmsgPayloadRef::Address(a) = NlmsgRef::parse(&bytes).unwrap().payload() else {
            panic!("expected address payload");
        };
        assert_eq!(a.prefix_len(), 64);

        let ci = a.attrs().get(libc::IFA_CACHEINFO).unwrap();
        assert_eq!(&ci[..4], &1800u32.to_ne_bytes());
        assert_eq!(&ci[4..8], &INFINITY_LIFE_TIME.to_ne_bytes());
    }

    #[test]
    fn delete_never_sends_lifetimes() {
        let req = AddressRequest::new("eth0", addr(), AddrOp::Delete).lifetimes(Some(1), Some(2));
        let plain = AddressRequest::new("eth0", addr(), AddrOp::Delete);
        let (_, _, with_lifetimes) = parse_request(&req);
        let (_, _, without) = parse_request(&plain);
        assert_eq!(with_lifetimes, without);
    }

    #[test]
    fn invalid_prefix_rejected() {
        let req = AddressRequest::new("eth0", addr(), AddrOp::Add).prefix_len(129);
        let err = req.to_netlink(3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unspecified);
        assert!(err.detail().contains("invalid prefix length"));
    }

    #[test]
    fn unknown_interface() {
        let err = add_address("nosuchif0", addr(), 64).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownInterface);
        assert_eq!(err.detail(), "Cannot find device: nosuchif0");
    }

    #[test]
    fn overlong_interface_name() {
        let err = delete_address("an-interface-name-too-long", addr(), 64).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownInterface);
    }

    // Requires CAP_NET_ADMIN
    #[test]
    #[ignore]
    fn add_replace_delete_on_loopback() {
        let before = crate::enumerate_interfaces().unwrap();
        let lo_before = before.iter().find(|r| r.name == "lo").unwrap().global.clone();

        add_address("lo", addr(), 128).unwrap();
        let err = add_address("lo", addr(), 128).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unspecified);
        assert_eq!(err.os_error(), Some(libc::EEXIST));

        replace_address("lo", addr(), 128, Some(600), Some(1200)).unwrap();
        delete_address("lo", addr(), 128).unwrap();

        let after = crate::enumerate_interfaces().unwrap();
        let lo_after = after.iter().find(|r| r.name == "lo").unwrap().global.clone();
        assert_eq!(lo_before, lo_after);
    }
}
