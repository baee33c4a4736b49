// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Kernel structures and constants for rtnetlink that are missing from (or private in) `libc`.

#![allow(non_camel_case_types)]

use std::mem;

#[allow(non_snake_case)]
pub const fn NLMSG_ALIGN(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

#[allow(non_snake_case)]
pub const fn RTA_ALIGN(len: usize) -> usize {
    (len + RTA_ALIGNTO - 1) & !(RTA_ALIGNTO - 1)
}

pub const NLMSG_ALIGNTO: usize = 4;
pub const RTA_ALIGNTO: usize = 4;

pub const NLMSG_HDRLEN: usize = NLMSG_ALIGN(mem::size_of::<libc::nlmsghdr>());
pub const RTA_HDRLEN: usize = 4;

// Upper two bits of `rta_type` are flags, not part of the type
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// linux/if_link.h
pub const IFLA_ADDRESS: u16 = 1;
pub const IFLA_IFNAME: u16 = 3;
pub const IFLA_PROTINFO: u16 = 12;
pub const IFLA_MAX: usize = 64;

pub const IFLA_INET6_FLAGS: u16 = 1;
pub const IFLA_INET6_MAX: usize = 10;

// linux/if_addr.h
pub const IFA_FLAGS: u16 = 8;
pub const IFA_MAX: usize = 11;

// linux/neighbour.h
pub const NDA_MAX: usize = 16;

// include/net/if_inet6.h
pub const IF_RA_MANAGED: u32 = 0x40;
pub const IF_RA_OTHERCONF: u32 = 0x80;

pub const INFINITY_LIFE_TIME: u32 = 0xFFFF_FFFF;

// `libc::sockaddr_nl` keeps `nl_pad` private, so it cannot be built with a struct literal.
#[repr(C)]
pub struct sockaddr_nl {
    pub nl_family: libc::sa_family_t,
    pub nl_pad: libc::c_ushort,
    pub nl_pid: u32,
    pub nl_groups: u32,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ifaddrmsg {
    pub ifa_family: libc::c_uchar,
    pub ifa_prefixlen: libc::c_uchar,
    pub ifa_flags: libc::c_uchar,
    pub ifa_scope: libc::c_uchar,
    pub ifa_index: libc::c_uint,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ifinfomsg {
    pub ifi_family: libc::c_uchar,
    pub ifi_pad: libc::c_uchar,
    pub ifi_type: libc::c_ushort,
    pub ifi_index: libc::c_int,
    pub ifi_flags: libc::c_uint,
    pub ifi_change: libc::c_uint,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ndmsg {
    pub ndm_family: u8,
    pub ndm_pad1: u8,
    pub ndm_pad2: u16,
    pub ndm_ifindex: libc::c_int,
    pub ndm_state: u16,
    pub ndm_flags: u8,
    pub ndm_type: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ifa_cacheinfo {
    pub ifa_prefered: u32,
    pub ifa_valid: u32,
    pub cstamp: u32,
    pub tstamp: u32,
}
