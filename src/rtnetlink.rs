// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! rtnetlink wire format: request serialization and zero-copy views over kernel replies.

mod attr;
mod socket;

pub use attr::{AttrTable, RtAttrIter};
pub use socket::{NlmsgList, RtNetlink};

use std::fmt;
use std::mem;
use std::net::Ipv6Addr;
use std::ptr;

use crate::error::{Error, ErrorCode};
use crate::libc_extra::*;

#[derive(Clone, Copy, Debug)]
pub struct NlParseError {
    error: &'static str,
}

impl NlParseError {
    fn new(error: &'static str) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &'static str {
        self.error
    }
}

impl From<NlParseError> for Error {
    #[inline]
    fn from(value: NlParseError) -> Self {
        Error::new(
            ErrorCode::Unspecified,
            format!("malformed netlink reply: {}", value.error()),
        )
    }
}

/// The kind of object a wildcard dump request asks the kernel for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpKind {
    /// `RTM_GETLINK` - network interfaces.
    Link,
    /// `RTM_GETADDR` - interface addresses.
    Address,
    /// `RTM_GETNEIGH` - neighbor cache entries.
    Neighbor,
}

impl DumpKind {
    #[inline]
    pub fn request_type(self) -> u16 {
        match self {
            DumpKind::Link => libc::RTM_GETLINK,
            DumpKind::Address => libc::RTM_GETADDR,
            DumpKind::Neighbor => libc::RTM_GETNEIGH,
        }
    }

    /// Length of the family-specific header that leads the request body.
    #[inline]
    fn header_len(self) -> usize {
        match self {
            DumpKind::Link => mem::size_of::<ifinfomsg>(),
            DumpKind::Address => mem::size_of::<ifaddrmsg>(),
            DumpKind::Neighbor => mem::size_of::<ndmsg>(),
        }
    }
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DumpKind::Link => "RTM_GETLINK",
            DumpKind::Address => "RTM_GETADDR",
            DumpKind::Neighbor => "RTM_GETNEIGH",
        })
    }
}

// =============================================================================
//                          Netlink Request Messages
// =============================================================================

/// Incrementally builds a single netlink message: header, fixed body, then attributes.
pub(crate) struct NlmsgWriter {
    buf: Vec<u8>,
    nlmsg_type: u16,
    flags: u16,
    seq: u32,
    pid: u32,
}

impl NlmsgWriter {
    pub fn new(nlmsg_type: u16, flags: u16, seq: u32, pid: u32) -> Self {
        // Space for the header is reserved up front and filled in by `finish()`
        Self {
            buf: vec![0; NLMSG_HDRLEN],
            nlmsg_type,
            flags,
            seq,
            pid,
        }
    }

    /// Appends the raw bytes of a `#[repr(C)]` kernel structure, padded to alignment.
    pub fn push_struct<T: Copy>(&mut self, value: &T) {
        let bytes = unsafe {
            std::slice::from_raw_parts(ptr::addr_of!(*value) as *const u8, mem::size_of::<T>())
        };
        self.push_padded(bytes);
    }

    #[cfg(test)]
    pub fn push_zeroed(&mut self, len: usize) {
        self.buf.resize(self.buf.len() + NLMSG_ALIGN(len), 0);
    }

    pub fn push_attr(&mut self, rta_type: u16, data: &[u8]) {
        let rta_len = (RTA_HDRLEN + data.len()) as u16;
        self.buf.extend(rta_len.to_ne_bytes());
        self.buf.extend(rta_type.to_ne_bytes());
        self.push_padded(data);
    }

    /// Opens a nested attribute; the returned offset must be passed to `end_nested()`.
    #[cfg(test)]
    pub fn begin_nested(&mut self, rta_type: u16) -> usize {
        let start = self.buf.len();
        self.buf.extend(0u16.to_ne_bytes());
        self.buf.extend((rta_type | NLA_F_NESTED).to_ne_bytes());
        start
    }

    #[cfg(test)]
    pub fn end_nested(&mut self, start: usize) {
        let rta_len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&rta_len.to_ne_bytes());
    }

    fn push_padded(&mut self, data: &[u8]) {
        self.buf.extend(data);
        let padding = RTA_ALIGN(data.len()) - data.len();
        self.buf.resize(self.buf.len() + padding, 0);
    }

    pub fn finish(mut self) -> Vec<u8> {
        let header = libc::nlmsghdr {
            nlmsg_len: self.buf.len() as u32,
            nlmsg_type: self.nlmsg_type,
            nlmsg_flags: self.flags,
            nlmsg_seq: self.seq,
            nlmsg_pid: self.pid,
        };

        unsafe {
            ptr::copy_nonoverlapping(
                ptr::addr_of!(header) as *const u8,
                self.buf.as_mut_ptr(),
                mem::size_of_val(&header),
            );
        }

        self.buf
    }
}

#[derive(Clone, Debug)]
pub struct NetlinkRequest {
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
    pub payload: NlmsgPayload,
}

impl NetlinkRequest {
    /// Creates a request with the given flags; the sequence number is assigned when sent.
    #[inline]
    pub fn new(flags: u16, payload: NlmsgPayload) -> Self {
        Self {
            flags,
            seq: 0,
            pid: 0,
            payload,
        }
    }

    pub fn message_type(&self) -> u16 {
        match &self.payload {
            NlmsgPayload::Dump(dump) => dump.kind.request_type(),
            NlmsgPayload::NewAddress(_) => libc::RTM_NEWADDR,
            NlmsgPayload::DeleteAddress(_) => libc::RTM_DELADDR,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = NlmsgWriter::new(self.message_type(), self.flags, self.seq, self.pid);
        match &self.payload {
            NlmsgPayload::Dump(dump) => dump.serialize(&mut w),
            NlmsgPayload::NewAddress(addr) | NlmsgPayload::DeleteAddress(addr) => {
                addr.serialize(&mut w)
            }
        }
        w.finish()
    }
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum NlmsgPayload {
    /// A wildcard `RTM_GET*` request (sent with `NLM_F_DUMP`).
    Dump(NlmsgDump),
    /// An `RTM_NEWADDR` request.
    NewAddress(NlmsgAddress),
    /// An `RTM_DELADDR` request.
    DeleteAddress(NlmsgAddress),
}

#[derive(Clone, Copy, Debug)]
pub struct NlmsgDump {
    pub kind: DumpKind,
    pub family: u8,
}

impl NlmsgDump {
    fn serialize(&self, w: &mut NlmsgWriter) {
        // The family byte leads every rtnetlink body; the rest of the header stays zeroed so that
        // kernels with strict checking enabled accept the request.
        let mut body = vec![0u8; self.kind.header_len()];
        body[0] = self.family;
        w.push_padded(&body);
    }
}

#[derive(Clone, Debug)]
pub struct NlmsgAddress {
    pub family: u8,
    pub prefix_length: u8,
    pub flags: u8,
    pub scope: u8,
    pub iface_idx: u32,
    pub attrs: Vec<AddressAttr>,
}

impl NlmsgAddress {
    fn serialize(&self, w: &mut NlmsgWriter) {
        w.push_struct(&ifaddrmsg {
            ifa_family: self.family,
            ifa_prefixlen: self.prefix_length,
            ifa_flags: self.flags,
            ifa_scope: self.scope,
            ifa_index: self.iface_idx,
        });

        for attr in self.attrs.iter() {
            attr.serialize(w);
        }
    }
}

#[derive(Clone, Debug)]
pub enum AddressAttr {
    /// IFA_ADDRESS - the prefix address (or peer address for point-to-point links)
    Address(Ipv6Addr),
    /// IFA_LOCAL - the address of the interface
    Local(Ipv6Addr),
    /// IFA_CACHEINFO - preferred and valid lifetimes
    CacheInfo(ifa_cacheinfo),
}

impl AddressAttr {
    fn serialize(&self, w: &mut NlmsgWriter) {
        match self {
            AddressAttr::Address(addr) => w.push_attr(libc::IFA_ADDRESS, &addr.octets()),
            AddressAttr::Local(addr) => w.push_attr(libc::IFA_LOCAL, &addr.octets()),
            AddressAttr::CacheInfo(cache_info) => {
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        ptr::addr_of!(*cache_info) as *const u8,
                        mem::size_of::<ifa_cacheinfo>(),
                    )
                };
                w.push_attr(libc::IFA_CACHEINFO, bytes);
            }
        }
    }
}

// =============================================================================
//                          Netlink Response Messages
// =============================================================================

pub struct NlmsgIter<'a> {
    data: &'a [u8],
}

impl<'a> NlmsgIter<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for NlmsgIter<'a> {
    type Item = Result<NlmsgRef<'a>, NlParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let Some(header) = read_header(self.data) else {
            self.data = &[];
            return Some(Err(NlParseError::new(
                "netlink response had truncated nlmsg header",
            )));
        };

        let msg_len = header.nlmsg_len as usize;
        let Some(nlmsg) = self.data.get(..msg_len).filter(|_| msg_len >= NLMSG_HDRLEN) else {
            self.data = &[];
            return Some(Err(NlParseError::new(
                "netlink response had truncated nlmsg payload",
            )));
        };

        // Truncated padding is fine
        self.data = self.data.get(NLMSG_ALIGN(msg_len)..).unwrap_or(&[]);

        Some(NlmsgRef::parse(nlmsg))
    }
}

fn read_header(data: &[u8]) -> Option<libc::nlmsghdr> {
    let hdr_slice = data.get(..mem::size_of::<libc::nlmsghdr>())?;
    Some(unsafe { ptr::read_unaligned(hdr_slice.as_ptr() as *const libc::nlmsghdr) })
}

/// Reads a fixed kernel header from the start of `data`, returning it with the bytes that follow
/// its aligned end.
fn read_body<T: Copy>(data: &[u8]) -> Option<(T, &[u8])> {
    let bytes = data.get(..mem::size_of::<T>())?;
    let value = unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) };
    let rem = data.get(NLMSG_ALIGN(mem::size_of::<T>())..).unwrap_or(&[]);
    Some((value, rem))
}

#[derive(Clone, Copy)]
pub struct NlmsgRef<'a> {
    nlmsg_type: u16,
    flags: u16,
    seq: u32,
    pid: u32,
    bytes: &'a [u8],
    payload: NlmsgPayloadRef<'a>,
}

impl<'a> NlmsgRef<'a> {
    /// Parses one complete message (header included) of exactly `nlmsg_len` bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, NlParseError> {
        let Some(header) = read_header(data) else {
            return Err(NlParseError::new(
                "netlink response had truncated nlmsg header",
            ));
        };

        let Some(data) = data.get(..header.nlmsg_len as usize) else {
            return Err(NlParseError::new(
                "netlink response had truncated nlmsg payload",
            ));
        };
        let body = data.get(NLMSG_HDRLEN..).unwrap_or(&[]);

        const NLMSG_NOOP: u16 = libc::NLMSG_NOOP as u16;
        const NLMSG_OVERRUN: u16 = libc::NLMSG_OVERRUN as u16;
        const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
        const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;
        Ok(NlmsgRef {
            nlmsg_type: header.nlmsg_type,
            flags: header.nlmsg_flags,
            seq: header.nlmsg_seq,
            pid: header.nlmsg_pid,
            bytes: data,
            payload: match header.nlmsg_type {
                NLMSG_NOOP => NlmsgPayloadRef::Noop,
                NLMSG_OVERRUN => NlmsgPayloadRef::Overrun,
                NLMSG_DONE => NlmsgPayloadRef::Done,
                NLMSG_ERROR => NlmsgPayloadRef::Error(NlmsgError::parse(body)?),
                libc::RTM_NEWLINK => NlmsgPayloadRef::Link(IfInfoMsgRef::parse(body)?),
                libc::RTM_NEWADDR => NlmsgPayloadRef::Address(IfAddrMsgRef::parse(body)?),
                libc::RTM_NEWNEIGH => NlmsgPayloadRef::Neighbor(NdMsgRef::parse(body)?),
                other => NlmsgPayloadRef::Unknown(other),
            },
        })
    }

    #[inline]
    pub fn nlmsg_type(&self) -> u16 {
        self.nlmsg_type
    }

    #[inline]
    pub fn flags_raw(&self) -> u16 {
        self.flags
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The complete message, header included.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub fn payload(&self) -> NlmsgPayloadRef<'a> {
        self.payload
    }
}

#[derive(Clone, Copy)]
pub enum NlmsgPayloadRef<'a> {
    /// Indicates the message should be ignored; not often used in practice.
    Noop,
    /// Marks the end of a dump request.
    Done,
    /// Indicates that the socket buffer has overflown (not used to date).
    Overrun,
    /// Acknowledgement (errno 0) or failure of a request.
    Error(NlmsgError),
    /// An interface, as returned by an `RTM_GETLINK` dump.
    Link(IfInfoMsgRef<'a>),
    /// An interface address, as returned by an `RTM_GETADDR` dump.
    Address(IfAddrMsgRef<'a>),
    /// A neighbor cache entry, as returned by an `RTM_GETNEIGH` dump.
    Neighbor(NdMsgRef<'a>),
    /// Some other RTNetlink message
    Unknown(u16),
}

#[derive(Clone, Copy, Debug)]
pub struct NlmsgError {
    errno: i32,
}

impl NlmsgError {
    fn parse(data: &[u8]) -> Result<Self, NlParseError> {
        let Some(&[b0, b1, b2, b3]) = data.get(..4) else {
            return Err(NlParseError::new(
                "netlink Error response had truncated errno value",
            ));
        };

        Ok(Self {
            // This is meant to be negated--errno values from netlink come as negative.
            errno: -i32::from_ne_bytes([b0, b1, b2, b3]),
        })
    }

    /// The (positive) errno carried by the message; 0 for an acknowledgement.
    #[inline]
    pub fn errno(&self) -> i32 {
        self.errno
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IfInfoMsgRef<'a> {
    family: u8,
    if_type: u16,
    index: i32,
    flags: u32,
    attr_data: &'a [u8],
}

impl<'a> IfInfoMsgRef<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, NlParseError> {
        let Some((msg, rem)) = read_body::<ifinfomsg>(data) else {
            return Err(NlParseError::new(
                "netlink RTM_NEWLINK message was truncated",
            ));
        };

        Ok(Self {
            family: msg.ifi_family,
            if_type: msg.ifi_type,
            index: msg.ifi_index,
            flags: msg.ifi_flags,
            attr_data: rem,
        })
    }

    #[inline]
    pub fn family(&self) -> u8 {
        self.family
    }

    /// The ARP hardware type (`ARPHRD_*`).
    #[inline]
    pub fn if_type(&self) -> u16 {
        self.if_type
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index as u32
    }

    /// Interface flags (`IFF_*`).
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn attrs(&self) -> AttrTable<'a, { IFLA_MAX + 1 }> {
        AttrTable::parse(self.attr_data)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IfAddrMsgRef<'a> {
    family: u8,
    prefix_length: u8,
    flags: u8,
    scope: u8,
    iface_idx: u32,
    attr_data: &'a [u8],
}

impl<'a> IfAddrMsgRef<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, NlParseError> {
        let Some((addrmsg, rem)) = read_body::<ifaddrmsg>(data) else {
            return Err(NlParseError::new(
                "netlink RTM_NEWADDR message was truncated",
            ));
        };

        Ok(Self {
            family: addrmsg.ifa_family,
            prefix_length: addrmsg.ifa_prefixlen,
            flags: addrmsg.ifa_flags,
            scope: addrmsg.ifa_scope,
            iface_idx: addrmsg.ifa_index,
            attr_data: rem,
        })
    }

    #[inline]
    pub fn family(&self) -> u8 {
        self.family
    }

    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_length
    }

    /// The legacy 8-bit flags field; see [`effective_flags()`](Self::effective_flags).
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[inline]
    pub fn scope(&self) -> u8 {
        self.scope
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.iface_idx
    }

    #[inline]
    pub fn attrs(&self) -> AttrTable<'a, { IFA_MAX + 1 }> {
        AttrTable::parse(self.attr_data)
    }

    /// The full `IFA_F_*` flag set. Newer kernels carry flags above bit 7 in a separate
    /// `IFA_FLAGS` attribute, which supersedes the header field when present.
    pub fn effective_flags(&self) -> u32 {
        self.attrs()
            .get_u32(IFA_FLAGS)
            .unwrap_or(self.flags as u32)
    }

    /// The `IFA_ADDRESS` attribute, falling back to `IFA_LOCAL` when absent.
    pub fn address(&self) -> Option<Ipv6Addr> {
        let attrs = self.attrs();
        attrs
            .get_ipv6(libc::IFA_ADDRESS)
            .or_else(|| attrs.get_ipv6(libc::IFA_LOCAL))
    }

    /// The `IFA_LOCAL` attribute, falling back to `IFA_ADDRESS` when absent.
    pub fn local(&self) -> Option<Ipv6Addr> {
        let attrs = self.attrs();
        attrs
            .get_ipv6(libc::IFA_LOCAL)
            .or_else(|| attrs.get_ipv6(libc::IFA_ADDRESS))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NdMsgRef<'a> {
    family: u8,
    iface_idx: i32,
    state: u16,
    flags: u8,
    nd_type: u8,
    attr_data: &'a [u8],
}

impl<'a> NdMsgRef<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, NlParseError> {
        let Some((msg, rem)) = read_body::<ndmsg>(data) else {
            return Err(NlParseError::new(
                "netlink RTM_NEWNEIGH message was truncated",
            ));
        };

        Ok(Self {
            family: msg.ndm_family,
            iface_idx: msg.ndm_ifindex,
            state: msg.ndm_state,
            flags: msg.ndm_flags,
            nd_type: msg.ndm_type,
            attr_data: rem,
        })
    }

    pub fn family(&self) -> u8 {
        self.family
    }

    pub fn index(&self) -> u32 {
        self.iface_idx as u32
    }

    /// Neighbor state (`NUD_*`).
    pub fn state(&self) -> u16 {
        self.state
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn nd_type(&self) -> u8 {
        self.nd_type
    }

    pub fn attrs(&self) -> AttrTable<'a, { NDA_MAX + 1 }> {
        AttrTable::parse(self.attr_data)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Builds an `RTM_NEWLINK` reply as the kernel would send it.
    pub fn link_message(
        seq: u32,
        pid: u32,
        index: i32,
        name: &str,
        lladdr: Option<&[u8]>,
        ra_flags: Option<u32>,
    ) -> Vec<u8> {
        let mut w = NlmsgWriter::new(libc::RTM_NEWLINK, libc::NLM_F_MULTI as u16, seq, pid);
        w.push_struct(&ifinfomsg {
            ifi_family: libc::AF_INET6 as u8,
            ifi_pad: 0,
            ifi_type: if lladdr.is_some() {
                libc::ARPHRD_ETHER
            } else {
                libc::ARPHRD_LOOPBACK
            },
            ifi_index: index,
            ifi_flags: (libc::IFF_UP | libc::IFF_RUNNING) as u32,
            ifi_change: 0,
        });

        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        w.push_attr(IFLA_IFNAME, &name_bytes);
        if let Some(lladdr) = lladdr {
            w.push_attr(IFLA_ADDRESS, lladdr);
        }

        if let Some(flags) = ra_flags {
            let nested = w.begin_nested(IFLA_PROTINFO);
            w.push_attr(IFLA_INET6_FLAGS, &flags.to_ne_bytes());
            w.end_nested(nested);
        }

        w.finish()
    }

    /// Builds an `RTM_NEWADDR` reply carrying `addr` as both `IFA_LOCAL` and `IFA_ADDRESS`.
    pub fn addr_message(seq: u32, pid: u32, family: u8, index: u32, addr: Ipv6Addr, flags: u8) -> Vec<u8> {
        NetlinkRequest {
            flags: libc::NLM_F_MULTI as u16,
            seq,
            pid,
            payload: NlmsgPayload::NewAddress(NlmsgAddress {
                family,
                prefix_length: 64,
                flags,
                scope: 0,
                iface_idx: index,
                attrs: vec![AddressAttr::Local(addr), AddressAttr::Address(addr)],
            }),
        }
        .serialize()
    }

    pub fn done_message(seq: u32, pid: u32) -> Vec<u8> {
        let mut w = NlmsgWriter::new(libc::NLMSG_DONE as u16, libc::NLM_F_MULTI as u16, seq, pid);
        w.push_zeroed(4);
        w.finish()
    }

    pub fn error_message(seq: u32, pid: u32, errno: i32) -> Vec<u8> {
        let mut w = NlmsgWriter::new(libc::NLMSG_ERROR as u16, 0, seq, pid);
        w.push_padded(&(-errno).to_ne_bytes());
        w.push_zeroed(NLMSG_HDRLEN);
        w.finish()
    }
}
