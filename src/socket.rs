// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! UDP/IPv6 sockets bound to a specific interface.
//!
//! A [`Socket6`] is bound to a local address and port with the interface index as its scope.
//! Multicast local addresses are joined on that interface, and every received datagram reports
//! the destination address it arrived on (via `IPV6_PKTINFO`).

use std::ffi::{CStr, CString};
use std::mem;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use crate::error::{Error, ErrorCode};

/// Parameters for opening a [`Socket6`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    interface_name: String,
    interface_index: u32,
    local_address: String,
    port: u16,
    bind_exclusive: bool,
    allow_reuse: bool,
}

impl SocketConfig {
    /// Creates a configuration for a socket on `local_address`:`port`, scoped to the given
    /// interface. `local_address` may be any string `getaddrinfo()` accepts for IPv6.
    pub fn new(
        interface_name: impl Into<String>,
        interface_index: u32,
        local_address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            interface_index,
            local_address: local_address.into(),
            port,
            bind_exclusive: false,
            allow_reuse: false,
        }
    }

    /// Restricts the socket to traffic on its interface (`SO_BINDTODEVICE`).
    ///
    /// This requires root privileges; without them the option is skipped with a warning.
    #[inline]
    pub fn bind_exclusive(mut self, bind_exclusive: bool) -> Self {
        self.bind_exclusive = bind_exclusive;
        self
    }

    /// Allows other sockets to bind the same address and port (`SO_REUSEADDR`).
    #[inline]
    pub fn allow_reuse(mut self, allow_reuse: bool) -> Self {
        self.allow_reuse = allow_reuse;
        self
    }

    #[inline]
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    #[inline]
    pub fn interface_index(&self) -> u32 {
        self.interface_index
    }

    #[inline]
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// A datagram received on a [`Socket6`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    /// The number of bytes written into the receive buffer.
    pub len: usize,
    /// The sender's address.
    pub peer: SocketAddrV6,
    /// The destination address the datagram was sent to, if the kernel reported it.
    pub local: Option<Ipv6Addr>,
    /// The index of the interface the datagram arrived on, if the kernel reported it.
    pub interface_index: Option<u32>,
}

/// An IPv6 UDP socket.
#[derive(Debug)]
pub struct Socket6 {
    fd: OwnedFd,
    interface_index: u32,
}

impl Socket6 {
    /// Opens a socket as described by `config`.
    ///
    /// # Errors
    ///
    /// Each setup step reports its own [`ErrorCode`]: [`GetAddrInfo`](ErrorCode::GetAddrInfo)
    /// when the local address can't be resolved, [`Socket`](ErrorCode::Socket),
    /// [`SocketOption`](ErrorCode::SocketOption), [`BindToInterface`](ErrorCode::BindToInterface),
    /// [`ReuseAddr`](ErrorCode::ReuseAddr), [`Bind`](ErrorCode::Bind) and
    /// [`MulticastJoin`](ErrorCode::MulticastJoin). The socket is closed on any failure.
    pub fn open(config: &SocketConfig) -> Result<Self, Error> {
        let local = resolve(&config.local_address, config.port, true)?;

        let fd = unsafe {
            libc::socket(libc::AF_INET6, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0)
        };
        if fd < 0 {
            return Err(Error::os(ErrorCode::Socket, "Unable to create socket"));
        }
        // SAFETY: `fd` was just returned by socket() and is owned by nothing else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        set_int_opt(&fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)
            .map_err(|e| Error::from_io(ErrorCode::SocketOption, "Unable to set IPV6_RECVPKTINFO", e))?;

        if config.bind_exclusive {
            if unsafe { libc::geteuid() } == 0 {
                bind_to_device(&fd, &config.interface_name)?;
            } else {
                tracing::warn!(
                    iface = %config.interface_name,
                    "not running as root, socket will not be bound to its interface"
                );
            }
        }

        if config.allow_reuse {
            set_int_opt(&fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
                .map_err(|e| Error::from_io(ErrorCode::ReuseAddr, "Unable to set SO_REUSEADDR", e))?;
        }

        let bind_addr = SocketAddrV6::new(*local.ip(), config.port, 0, config.interface_index);
        let sin6 = to_sockaddr(&bind_addr);
        let res = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                ptr::addr_of!(sin6) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(Error::os(
                ErrorCode::Bind,
                format!("Unable to bind socket to [{}]:{}", bind_addr.ip(), config.port),
            ));
        }

        if local.ip().octets()[0] == 0xff {
            let mut mreq: libc::ipv6_mreq = unsafe { mem::zeroed() };
            mreq.ipv6mr_multiaddr.s6_addr = local.ip().octets();
            mreq.ipv6mr_interface = config.interface_index;

            let res = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::IPPROTO_IPV6,
                    libc::IPV6_ADD_MEMBERSHIP,
                    ptr::addr_of!(mreq) as *const libc::c_void,
                    mem::size_of::<libc::ipv6_mreq>() as libc::socklen_t,
                )
            };
            if res < 0 {
                return Err(Error::os(
                    ErrorCode::MulticastJoin,
                    format!(
                        "Unable to join multicast group {} on interface {}",
                        local.ip(),
                        config.interface_name
                    ),
                ));
            }
        }

        tracing::info!(
            iface = %config.interface_name,
            addr = %local.ip(),
            port = config.port,
            fd = fd.as_raw_fd(),
            "opened socket"
        );

        Ok(Self {
            fd,
            interface_index: config.interface_index,
        })
    }

    /// Closes the socket. Dropping it has the same effect.
    #[inline]
    pub fn close(self) {}

    /// Sends `payload` to `dest`:`port`, where `dest` is resolved with `getaddrinfo()`.
    ///
    /// Link-local destinations without an explicit scope are sent out of the socket's interface.
    pub fn send(&self, dest: &str, payload: &[u8], port: u16) -> Result<usize, Error> {
        if payload.is_empty() {
            return Err(empty_payload());
        }

        let mut addr = resolve(dest, port, false)?;
        if addr.scope_id() == 0 && addr.ip().segments()[0] & 0xffc0 == 0xfe80 {
            addr.set_scope_id(self.interface_index);
        }

        self.send_to(&addr, payload)
    }

    /// Sends `payload` to an already-resolved destination.
    pub fn send_to(&self, dest: &SocketAddrV6, payload: &[u8]) -> Result<usize, Error> {
        if payload.is_empty() {
            return Err(empty_payload());
        }

        let sin6 = to_sockaddr(dest);
        let res = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                payload.as_ptr() as *const libc::c_void,
                payload.len(),
                0,
                ptr::addr_of!(sin6) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };

        if res < 0 {
            return Err(Error::os(
                ErrorCode::Socket,
                format!("Unable to send data (dst addr: {})", dest.ip()),
            ));
        }

        Ok(res as usize)
    }

    /// Receives a single datagram into `buf`.
    ///
    /// Datagrams longer than `buf` are truncated. An interrupted call is reported as an error
    /// rather than retried.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Received, Error> {
        let mut peer: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // Room for one in6_pktinfo message, with u64 elements for cmsghdr alignment
        let mut control = [0u64; 8];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = ptr::addr_of_mut!(peer) as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = ptr::addr_of_mut!(iov);
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let res = unsafe { libc::recvmsg(self.fd.as_raw_fd(), ptr::addr_of_mut!(msg), 0) };
        if res < 0 {
            return Err(Error::os(ErrorCode::Unspecified, "Unable to receive data"));
        }

        let mut local = None;
        let mut interface_index = None;

        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(ptr::addr_of!(msg)) };
        while !cmsg.is_null() {
            let (level, ty) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type) };
            if level == libc::IPPROTO_IPV6 && ty == libc::IPV6_PKTINFO {
                let info = unsafe {
                    ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo)
                };
                local = Some(Ipv6Addr::from(info.ipi6_addr.s6_addr));
                interface_index = Some(info.ipi6_ifindex as u32);
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(ptr::addr_of!(msg), cmsg) };
        }

        Ok(Received {
            len: res as usize,
            peer: from_sockaddr(&peer),
            local,
            interface_index,
        })
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddrV6, Error> {
        let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockname(
                self.fd.as_raw_fd(),
                ptr::addr_of_mut!(sin6) as *mut libc::sockaddr,
                ptr::addr_of_mut!(len),
            )
        };
        if res < 0 {
            return Err(Error::os(ErrorCode::Socket, "Unable to get socket address"));
        }

        Ok(from_sockaddr(&sin6))
    }

    /// Indicates whether nonblocking mode is enabled for the socket.
    pub fn nonblocking(&self) -> Result<bool, Error> {
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(Error::os(ErrorCode::SocketOption, "Unable to get socket flags"));
        }

        Ok(flags & libc::O_NONBLOCK > 0)
    }

    /// Sets nonblocking mode for `send` and `recv` operations on the socket.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), Error> {
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(Error::os(ErrorCode::SocketOption, "Unable to get socket flags"));
        }

        let flags = match nonblocking {
            true => flags | libc::O_NONBLOCK,
            false => flags & !libc::O_NONBLOCK,
        };

        if unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFL, flags) } < 0 {
            Err(Error::os(ErrorCode::SocketOption, "Unable to set socket flags"))
        } else {
            Ok(())
        }
    }
}

impl AsRawFd for Socket6 {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Socket6 {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn empty_payload() -> Error {
    Error::new(ErrorCode::Unspecified, "refusing to send empty datagram")
}

fn set_int_opt(
    fd: &OwnedFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    let res = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            level,
            name,
            ptr::addr_of!(value) as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if res < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn bind_to_device(fd: &OwnedFd, if_name: &str) -> Result<(), Error> {
    let bind_err = || format!("Unable to bind socket to interface {if_name}.");

    let c_name = CString::new(if_name).map_err(|_| Error::new(ErrorCode::BindToInterface, bind_err()))?;
    let res = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            c_name.as_ptr() as *const libc::c_void,
            c_name.as_bytes_with_nul().len() as libc::socklen_t,
        )
    };

    if res < 0 {
        Err(Error::os(ErrorCode::BindToInterface, bind_err()))
    } else {
        Ok(())
    }
}

/// Resolves `host` to its first IPv6 address using `getaddrinfo()`.
fn resolve(host: &str, port: u16, passive: bool) -> Result<SocketAddrV6, Error> {
    let c_host = CString::new(host).map_err(|_| {
        Error::new(ErrorCode::GetAddrInfo, format!("Unable to resolve {host:?}: embedded NUL"))
    })?;

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_INET6;
    hints.ai_socktype = libc::SOCK_DGRAM;
    hints.ai_protocol = libc::IPPROTO_UDP;
    if passive {
        hints.ai_flags = libc::AI_PASSIVE;
    }

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(
            c_host.as_ptr(),
            ptr::null(),
            ptr::addr_of!(hints),
            ptr::addr_of_mut!(res),
        )
    };
    if rc != 0 {
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(Error::new(
            ErrorCode::GetAddrInfo,
            format!("Unable to resolve {host}: {}", reason.to_string_lossy()),
        ));
    }

    let mut found = None;
    let mut cur = res;
    while !cur.is_null() {
        // SAFETY: `cur` is a node of the list returned by getaddrinfo(), freed only below
        let ai = unsafe { &*cur };
        if ai.ai_family == libc::AF_INET6
            && !ai.ai_addr.is_null()
            && ai.ai_addrlen as usize >= mem::size_of::<libc::sockaddr_in6>()
        {
            let sin6 = unsafe { ptr::read_unaligned(ai.ai_addr as *const libc::sockaddr_in6) };
            found = Some(from_sockaddr(&sin6));
            break;
        }
        cur = ai.ai_next;
    }
    unsafe { libc::freeaddrinfo(res) };

    match found {
        Some(addr) => Ok(SocketAddrV6::new(*addr.ip(), port, addr.flowinfo(), addr.scope_id())),
        None => Err(Error::new(
            ErrorCode::GetAddrInfo,
            format!("Unable to resolve {host}: no IPv6 address"),
        )),
    }
}

fn to_sockaddr(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sin6.sin6_port = addr.port().to_be();
    sin6.sin6_flowinfo = addr.flowinfo();
    sin6.sin6_addr.s6_addr = addr.ip().octets();
    sin6.sin6_scope_id = addr.scope_id();
    sin6
}

fn from_sockaddr(sin6: &libc::sockaddr_in6) -> SocketAddrV6 {
    SocketAddrV6::new(
        Ipv6Addr::from(sin6.sin6_addr.s6_addr),
        u16::from_be(sin6.sin6_port),
        sin6.sin6_flowinfo,
        sin6.sin6_scope_id,
    )
}
