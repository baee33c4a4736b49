// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ifconf6 is the Linux network configuration layer of a DHCPv6 agent. It talks to the kernel
//! over rtnetlink to list interfaces and their IPv6 addresses, assign and remove addresses, check
//! duplicate address detection state and look up neighbors, and it manages the UDP/IPv6 sockets
//! the agent exchanges messages on.
//!
//! ## Examples
//!
//! To list interfaces along with their IPv6 addresses:
//!
//! ```no_run
//! # fn list() -> Result<(), ifconf6::Error> {
//! for iface in ifconf6::enumerate_interfaces()? {
//!     println!("{} (index {}): managed={}", iface.name, iface.index, iface.managed);
//!     for addr in iface.link_local.iter().chain(iface.global.iter()) {
//!         println!("    {}", addr);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! To listen for DHCPv6 messages on an interface and answer from the address a message arrived
//! on:
//!
//! ```no_run
//! # fn listen() -> Result<(), ifconf6::Error> {
//! use ifconf6::{Interface, Socket6, SocketConfig};
//!
//! let index = Interface::new("eth0")?.index()?;
//! let config = SocketConfig::new("eth0", index, "ff02::1:2", 547)
//!     .bind_exclusive(true)
//!     .allow_reuse(true);
//! let sock = Socket6::open(&config)?;
//!
//! let mut buf = [0; 1500];
//! let received = sock.recv(&mut buf)?;
//! println!(
//!     "{} bytes from {} (sent to {:?})",
//!     received.len, received.peer, received.local
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Failures are reported as an [`Error`], which carries an [`ErrorCode`] and a detail message.
//! The crate emits diagnostics through [`tracing`](https://docs.rs/tracing) but never installs a
//! subscriber.

// Show required OS/features on docs.rs.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(target_os = "linux")]
mod addr;
mod error;
#[cfg(target_os = "linux")]
mod iface;
mod keyfile;
#[cfg(target_os = "linux")]
mod libc_extra;
#[cfg(target_os = "linux")]
mod neighbor;
#[cfg(target_os = "linux")]
pub mod rtnetlink;
#[cfg(target_os = "linux")]
mod socket;
#[cfg(target_os = "linux")]
mod tentative;

#[cfg(target_os = "linux")]
pub use addr::{
    add_address, default_scope, delete_address, mutate_address, replace_address, AddrOp,
    AddressRequest,
};
pub use error::{last_error_message, Error, ErrorCode};
#[cfg(target_os = "linux")]
pub use iface::{enumerate_interfaces, enumerate_with, AddrScope, InterfaceRecord};
pub use keyfile::KeyStore;
#[cfg(target_os = "linux")]
pub use neighbor::neighbor_link_addr;
#[cfg(target_os = "linux")]
pub use socket::{Received, Socket6, SocketConfig};
#[cfg(target_os = "linux")]
pub use tentative::{probe_tentative, Tentative};

#[cfg(target_os = "linux")]
use std::ffi::{CStr, OsStr, OsString};
#[cfg(target_os = "linux")]
use std::fmt;
#[cfg(target_os = "linux")]
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// The address family used for interface and address dumps.
#[cfg(target_os = "linux")]
pub const DEFAULT_FAMILY: libc::c_int = libc::AF_INET6;

/// The size of the buffer each netlink datagram is received into.
pub const NETLINK_MAX_RECV: usize = 32 * 1024;

/// The kernel receive buffer size requested for netlink sockets.
pub const NETLINK_RCVBUF: usize = 1024 * 1024;

/// The directory [`KeyStore::default()`] reads AAA keys from.
pub const DEFAULT_KEY_DIR: &str = "/var/lib/dibbler/AAA/";

/// The name of a network interface.
///
/// Interfaces are not guaranteed to be static; network devices can be added and removed, so the
/// index returned by [`index()`](Interface::index) may change between calls, and
/// [`from_index()`](Interface::from_index) may not always return the same interface.
#[cfg(target_os = "linux")]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    name: [u8; Self::MAX_INTERFACE_NAME_LEN + 1],
}

#[cfg(target_os = "linux")]
impl Interface {
    /// The maximum length (in bytes) that an interface name can be.
    pub const MAX_INTERFACE_NAME_LEN: usize = libc::IF_NAMESIZE - 1;

    /// Constructs an `Interface` from the given interface name.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::UnknownInterface`] if `if_name` is longer than
    /// [`MAX_INTERFACE_NAME_LEN`](Self::MAX_INTERFACE_NAME_LEN) bytes or contains a null
    /// character, since no such interface can exist.
    #[inline]
    pub fn new(if_name: impl AsRef<OsStr>) -> Result<Self, Error> {
        Self::from_bytes(if_name.as_ref().as_bytes())
    }

    /// Constructs an `Interface` from the given C string.
    #[inline]
    pub fn from_cstr(if_name: &CStr) -> Result<Self, Error> {
        Self::from_bytes(if_name.to_bytes())
    }

    fn from_bytes(if_name: &[u8]) -> Result<Self, Error> {
        if if_name.is_empty() || if_name.len() > Self::MAX_INTERFACE_NAME_LEN || if_name.contains(&0x00)
        {
            return Err(Error::new(
                ErrorCode::UnknownInterface,
                format!("malformed interface name: {}", String::from_utf8_lossy(if_name)),
            ));
        }

        let mut name = [0u8; Self::MAX_INTERFACE_NAME_LEN + 1];
        name[..if_name.len()].copy_from_slice(if_name);
        Ok(Self { name })
    }

    /// Returns the `Interface` corresponding to the given interface index.
    pub fn from_index(if_index: u32) -> Result<Self, Error> {
        let mut name = [0u8; Self::MAX_INTERFACE_NAME_LEN + 1];
        match unsafe { libc::if_indextoname(if_index, name.as_mut_ptr() as *mut libc::c_char) } {
            ptr if ptr.is_null() => Err(Error::os(
                ErrorCode::UnknownInterface,
                format!("Cannot find device with index {if_index}"),
            )),
            _ => Ok(Self { name }),
        }
    }

    /// Indicates whether the interface can currently be found on the system.
    #[inline]
    pub fn exists(&self) -> bool {
        unsafe { libc::if_nametoindex(self.name.as_ptr() as *const libc::c_char) != 0 }
    }

    /// Retrieves the associated interface index of the network interface.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::UnknownInterface`] if no interface by this name exists.
    pub fn index(&self) -> Result<u32, Error> {
        match unsafe { libc::if_nametoindex(self.name.as_ptr() as *const libc::c_char) } {
            0 => Err(Error::new(
                ErrorCode::UnknownInterface,
                format!("Cannot find device: {}", self.name().to_string_lossy()),
            )),
            i => Ok(i),
        }
    }

    /// Retrieves the name of the interface.
    pub fn name(&self) -> OsString {
        OsString::from_vec(self.name_cstr().to_bytes().to_vec())
    }

    /// Retrieves the name of the interface as a C string.
    pub fn name_cstr(&self) -> &CStr {
        // `from_bytes` and if_indextoname() always leave at least the last byte zeroed
        CStr::from_bytes_until_nul(&self.name).unwrap_or_default()
    }
}

#[cfg(target_os = "linux")]
impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(target_os = "linux")]
impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_string_lossy())
    }
}
