// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared keys for DHCPv6 AAA authentication, stored one file per SPI.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::DEFAULT_KEY_DIR;

/// A directory of AAA key files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyStore {
    dir: PathBuf,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_DIR)
    }
}

impl KeyStore {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file holding the key for `spi`: `AAA-key` for SPI 0, `AAA-key-<spi as 8 hex digits>`
    /// otherwise.
    pub fn key_path(&self, spi: u32) -> PathBuf {
        match spi {
            0 => self.dir.join("AAA-key"),
            spi => self.dir.join(format!("AAA-key-{spi:08x}")),
        }
    }

    /// Reads the whole key for `spi`.
    ///
    /// Returns `None` if the file is missing or unreadable, or if fewer bytes could be read than
    /// the file's reported size.
    pub fn read_key(&self, spi: u32) -> Option<Vec<u8>> {
        let path = self.key_path(spi);

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "unable to open AAA key file");
                return None;
            }
        };

        let expected = match file.metadata() {
            Ok(meta) => meta.len() as usize,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "unable to stat AAA key file");
                return None;
            }
        };

        let mut key = Vec::with_capacity(expected);
        if let Err(e) = file.read_to_end(&mut key) {
            tracing::debug!(path = %path.display(), error = %e, "unable to read AAA key file");
            return None;
        }

        if key.len() < expected {
            tracing::debug!(
                path = %path.display(),
                expected,
                read = key.len(),
                "short read on AAA key file"
            );
            return None;
        }

        Some(key)
    }
}
