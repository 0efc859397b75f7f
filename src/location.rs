//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Endpoint addresses in `scheme://authority[/path]` form.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a location string cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid location `{0}`: expected `scheme://authority`")]
pub struct LocationError(String);

/// A parsed endpoint address.
///
/// The scheme selects the transport factory (`socket`, `pubsubchannel`, ...);
/// the authority is handed to the transport (for the built-in socket
/// transport it is a `host:port` pair).
///
/// # Example
///
/// ```rust
/// use svclink::location::Location;
///
/// let location: Location = "socket://127.0.0.1:8080".parse().unwrap();
/// assert_eq!(location.scheme(), "socket");
/// assert_eq!(location.authority(), "127.0.0.1:8080");
/// assert_eq!(location.host(), "127.0.0.1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    raw: String,
    scheme_len: usize,
}

impl Location {
    /// Parses a location of the form `scheme://authority[/path]`.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError`] if the string has no `://` separator or an
    /// empty scheme.
    pub fn parse(s: impl Into<String>) -> Result<Self, LocationError> {
        let raw = s.into();
        match raw.find("://") {
            Some(scheme_len) if scheme_len > 0 => Ok(Self { raw, scheme_len }),
            _ => Err(LocationError(raw)),
        }
    }

    /// Returns the scheme (the part before `://`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    /// Returns the authority (the part after `://`, up to the first `/`).
    #[must_use]
    pub fn authority(&self) -> &str {
        let rest = &self.raw[self.scheme_len + 3..];
        match rest.find('/') {
            Some(end) => &rest[..end],
            None => rest,
        }
    }

    /// Returns the host portion of the authority (without a trailing port).
    #[must_use]
    pub fn host(&self) -> &str {
        let authority = self.authority();
        match authority.rfind(':') {
            Some(idx) => &authority[..idx],
            None => authority,
        }
    }

    /// Returns the full location string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
