// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, ErrorCode};
use crate::libc_extra::*;
use crate::{NETLINK_MAX_RECV, NETLINK_RCVBUF};

use super::{DumpKind, NetlinkRequest, NlParseError, NlmsgDump, NlmsgIter, NlmsgPayload};
use super::{NlmsgPayloadRef, NlmsgRef};

/// An ordered list of complete netlink messages collected from a dump.
#[derive(Clone, Debug, Default)]
pub struct NlmsgList {
    msgs: Vec<Vec<u8>>,
}

impl NlmsgList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one complete message (header included).
    #[inline]
    pub fn push(&mut self, msg: Vec<u8>) {
        self.msgs.push(msg);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Parses each stored message in the order it was received.
    pub fn iter(&self) -> impl Iterator<Item = Result<NlmsgRef<'_>, NlParseError>> + '_ {
        self.msgs.iter().map(|msg| NlmsgRef::parse(msg))
    }
}

/// A `NETLINK_ROUTE` socket bound to a kernel-assigned port id.
///
/// Each request is stamped with a fresh sequence number; replies whose sequence number or port
/// id don't match the outstanding request are skipped.
pub struct RtNetlink {
    fd: OwnedFd,
    port_id: u32,
    seq: u32,
    buf: Vec<u8>,
}

impl RtNetlink {
    /// Opens and binds a new rtnetlink socket.
    pub fn open() -> Result<Self, Error> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_ROUTE,
            )
        };
        if fd < 0 {
            return Err(Error::os(ErrorCode::Socket, "Cannot open rtnetlink socket"));
        }
        // SAFETY: `fd` was just returned by socket() and is owned by nothing else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let rcvbuf = NETLINK_RCVBUF as libc::c_int;
        let res = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                ptr::addr_of!(rcvbuf) as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(Error::os(ErrorCode::Socket, "Cannot set rtnetlink receive buffer"));
        }

        let mut local = sockaddr_nl {
            nl_family: libc::AF_NETLINK as libc::sa_family_t,
            nl_pad: 0,
            nl_pid: 0,
            nl_groups: 0,
        };
        let mut addrlen = mem::size_of::<sockaddr_nl>() as libc::socklen_t;

        let res = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                ptr::addr_of!(local) as *const libc::sockaddr,
                addrlen,
            )
        };
        if res < 0 {
            return Err(Error::os(ErrorCode::Socket, "Cannot bind rtnetlink socket"));
        }

        let res = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                ptr::addr_of_mut!(local) as *mut libc::sockaddr,
                ptr::addr_of_mut!(addrlen),
            )
        };
        if res < 0 {
            return Err(Error::os(ErrorCode::Socket, "Cannot getsockname on rtnetlink socket"));
        }
        if addrlen as usize != mem::size_of::<sockaddr_nl>()
            || local.nl_family != libc::AF_NETLINK as libc::sa_family_t
        {
            return Err(Error::new(
                ErrorCode::Socket,
                "Wrong address on rtnetlink socket",
            ));
        }

        let seq = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        tracing::trace!(port_id = local.nl_pid, "opened rtnetlink socket");

        Ok(Self {
            fd,
            port_id: local.nl_pid,
            seq,
            buf: vec![0; NETLINK_MAX_RECV],
        })
    }

    /// Closes the socket. Dropping the handle has the same effect.
    #[inline]
    pub fn close(self) {}

    /// The port id the kernel assigned to this socket.
    #[inline]
    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    #[inline]
    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Dumps every object of `kind` for address family `family`, returning the collected
    /// messages in kernel order (`NLMSG_DONE` excluded).
    pub fn dump(&mut self, family: u8, kind: DumpKind) -> Result<NlmsgList, Error> {
        let mut list = NlmsgList::new();
        self.dump_with(family, kind, |msg| {
            list.push(msg.bytes().to_vec());
            Ok(())
        })?;
        Ok(list)
    }

    /// Dumps every object of `kind` for address family `family`, handing each reply message to
    /// `sink` as it is received. Returns the number of messages delivered.
    ///
    /// An error returned from `sink` aborts the dump: no further messages are delivered, and the
    /// rest of the kernel's reply is read and discarded before that error is returned, so the
    /// handle remains usable for later requests.
    pub fn dump_with<F>(&mut self, family: u8, kind: DumpKind, mut sink: F) -> Result<usize, Error>
    where
        F: FnMut(NlmsgRef<'_>) -> Result<(), Error>,
    {
        let seq = self.next_seq();
        let req = NetlinkRequest {
            flags: (libc::NLM_F_REQUEST | libc::NLM_F_DUMP) as u16,
            seq,
            pid: 0,
            payload: NlmsgPayload::Dump(NlmsgDump { kind, family }),
        };

        self.send(&req.serialize()).map_err(|e| {
            Error::from_io(ErrorCode::Socket, format!("Cannot send {kind} dump request"), e)
        })?;
        tracing::debug!(%kind, family, seq, "sent rtnetlink dump request");

        let port_id = self.port_id;
        let mut count = 0;
        // Once set, the remainder of the dump is read and discarded. The kernel refuses a new
        // dump on this socket with EBUSY until the running one has been fully consumed.
        let mut failure: Option<Error> = None;
        loop {
            let len = match self.recv() {
                Ok(len) => len,
                Err(e) => return Err(failure.unwrap_or(e)),
            };

            for msg in NlmsgIter::new(&self.buf[..len]) {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        failure.get_or_insert(Error::from(e));
                        break;
                    }
                };

                if msg.seq() != seq || msg.pid() != port_id {
                    tracing::trace!(
                        seq = msg.seq(),
                        pid = msg.pid(),
                        "skipping unrelated netlink message"
                    );
                    continue;
                }

                match msg.payload() {
                    NlmsgPayloadRef::Done => {
                        if let Some(err) = failure {
                            tracing::debug!(%kind, "discarded remainder of aborted dump");
                            return Err(err);
                        }
                        tracing::debug!(%kind, count, "rtnetlink dump complete");
                        return Ok(count);
                    }
                    NlmsgPayloadRef::Error(err) => {
                        return Err(failure.unwrap_or_else(|| {
                            Error::from_errno(
                                ErrorCode::Unspecified,
                                format!("{kind} dump request failed"),
                                err.errno(),
                            )
                        }));
                    }
                    NlmsgPayloadRef::Overrun => {
                        failure.get_or_insert_with(|| {
                            Error::new(
                                ErrorCode::Unspecified,
                                format!("{kind} dump overran socket buffer"),
                            )
                        });
                    }
                    NlmsgPayloadRef::Noop => continue,
                    _ if failure.is_some() => continue,
                    _ => {
                        count += 1;
                        if let Err(e) = sink(msg) {
                            failure = Some(e);
                        }
                    }
                }
            }
        }
    }

    /// Sends `req` with `NLM_F_ACK` set and waits for the kernel's acknowledgement.
    ///
    /// A non-zero errno in the acknowledgement is returned as an [`ErrorCode::Unspecified`]
    /// error carrying that errno.
    pub fn talk(&mut self, mut req: NetlinkRequest) -> Result<(), Error> {
        let seq = self.next_seq();
        req.seq = seq;
        req.pid = 0;
        req.flags |= libc::NLM_F_ACK as u16;
        let msg_type = req.message_type();

        self.send(&req.serialize()).map_err(|e| {
            Error::from_io(ErrorCode::Socket, "Cannot talk to rtnetlink", e)
        })?;
        tracing::debug!(msg_type, seq, "sent rtnetlink request");

        let port_id = self.port_id;
        loop {
            let len = self.recv()?;
            for msg in NlmsgIter::new(&self.buf[..len]) {
                let msg = msg?;
                if msg.seq() != seq || msg.pid() != port_id {
                    tracing::trace!(
                        seq = msg.seq(),
                        pid = msg.pid(),
                        "skipping unrelated netlink message"
                    );
                    continue;
                }

                match msg.payload() {
                    NlmsgPayloadRef::Error(err) if err.errno() == 0 => return Ok(()),
                    NlmsgPayloadRef::Error(err) => {
                        return Err(Error::from_errno(
                            ErrorCode::Unspecified,
                            "RTNETLINK answers",
                            err.errno(),
                        ))
                    }
                    _ => tracing::trace!(
                        nlmsg_type = msg.nlmsg_type(),
                        "ignoring non-ack reply"
                    ),
                }
            }
        }
    }

    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let kernel = sockaddr_nl {
            nl_family: libc::AF_NETLINK as libc::sa_family_t,
            nl_pad: 0,
            nl_pid: 0,
            nl_groups: 0,
        };

        let res = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
                ptr::addr_of!(kernel) as *const libc::sockaddr,
                mem::size_of::<sockaddr_nl>() as libc::socklen_t,
            )
        };

        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Receives one datagram into the internal buffer, returning its length.
    fn recv(&mut self) -> Result<usize, Error> {
        loop {
            // MSG_TRUNC makes the kernel report the full datagram length even when it didn't fit
            let res = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.buf.as_mut_ptr() as *mut libc::c_void,
                    self.buf.len(),
                    libc::MSG_TRUNC,
                )
            };

            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::from_io(ErrorCode::Socket, "netlink receive error", err));
            }

            let len = res as usize;
            if len == 0 {
                return Err(Error::new(ErrorCode::Socket, "EOF on netlink"));
            }
            if len > self.buf.len() {
                return Err(Error::new(
                    ErrorCode::Unspecified,
                    "malformed netlink reply: message truncated",
                ));
            }

            return Ok(len);
        }
    }
}

impl AsRawFd for RtNetlink {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for RtNetlink {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn list_preserves_order() {
        let mut list = NlmsgList::new();
        assert!(list.is_empty());
        list.push(link_message(1, 0, 1, "lo", None, None));
        list.push(link_message(1, 0, 2, "eth0", Some(&[2, 0, 0, 0, 0, 1]), None));
        assert_eq!(list.len(), 2);

        let indices: Vec<u32> = list
            .iter()
            .map(|m| match m.unwrap().payload() {
                NlmsgPayloadRef::Link(link) => link.index(),
                _ => panic!("expected link payload"),
            })
            .collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn open_and_dump_links() {
        let mut nl = RtNetlink::open().unwrap();
        assert_ne!(nl.port_id(), 0);
        let links = nl.dump(libc::AF_INET6 as u8, DumpKind::Link).unwrap();

        // Every network namespace has a loopback interface
        let has_lo = links.iter().any(|m| match m.unwrap().payload() {
            NlmsgPayloadRef::Link(link) => link.attrs().get_str(IFLA_IFNAME) == Some("lo"),
            _ => false,
        });
        assert!(has_lo);
        nl.close();
    }

    #[test]
    fn dump_with_sink_error_aborts() {
        let mut nl = RtNetlink::open().unwrap();
        let res = nl.dump_with(libc::AF_UNSPEC as u8, DumpKind::Link, |_| {
            Err(Error::new(ErrorCode::Unspecified, "stop"))
        });
        assert_eq!(res.unwrap_err().detail(), "stop");
    }

    #[test]
    fn aborted_dump_leaves_handle_usable() {
        let mut nl = RtNetlink::open().unwrap();
        let mut delivered = 0;
        let res = nl.dump_with(libc::AF_UNSPEC as u8, DumpKind::Link, |_| {
            delivered += 1;
            Err(Error::new(ErrorCode::Unspecified, "stop"))
        });
        assert_eq!(res.unwrap_err().detail(), "stop");
        assert_eq!(delivered, 1);

        // A second dump on the same socket must not be refused with EBUSY
        let links = nl.dump(libc::AF_UNSPEC as u8, DumpKind::Link).unwrap();
        let has_lo = links.iter().any(|m| match m.unwrap().payload() {
            NlmsgPayloadRef::Link(link) => link.attrs().get_str(IFLA_IFNAME) == Some("lo"),
            _ => false,
        });
        assert!(has_lo);

        let addrs = nl.dump(libc::AF_UNSPEC as u8, DumpKind::Address).unwrap();
        assert!(!addrs.is_empty());
    }

    #[test]
    fn sequence_numbers_advance() {
        let mut nl = RtNetlink::open().unwrap();
        let first = nl.next_seq();
        let second = nl.next_seq();
        assert_eq!(second, first.wrapping_add(1));
    }
}
