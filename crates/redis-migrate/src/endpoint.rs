//! Store endpoints and the `[auth@]host[:port][/db]` address format.
//!
//! An address resolves into a [`StoreEndpoint`]: one reachable Redis
//! instance plus the logical database selected on it. Two endpoints are the
//! same target when host, port and database match; credentials and TLS
//! settings do not take part in the comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{Error, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Host used when an address leaves it empty.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// TLS settings for an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Skip certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

/// One Redis instance plus logical database.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "EndpointRepr")]
pub struct StoreEndpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Password sent with `AUTH`, if any.
    #[serde(skip_serializing)]
    pub auth: Option<String>,
    /// Logical database index selected after connecting.
    pub db: i64,
    /// TLS settings; `None` means plain TCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
}

impl StoreEndpoint {
    /// Creates a plain-TCP endpoint without credentials.
    pub fn new(host: impl Into<String>, port: u16, db: i64) -> Self {
        Self {
            host: host.into(),
            port,
            auth: None,
            db,
            tls: None,
        }
    }

    /// Returns a copy with the given password.
    #[must_use]
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        let auth = auth.into();
        self.auth = if auth.is_empty() { None } else { Some(auth) };
        self
    }

    /// Returns a copy with TLS enabled.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Builds the connection URL understood by the `redis` crate.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or credential cannot be encoded.
    pub fn connection_url(&self) -> Result<String> {
        let scheme = if self.tls.is_some() { "rediss" } else { "redis" };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut url = Url::parse(&format!("{scheme}://{host}:{}/{}", self.port, self.db))
            .map_err(|e| self.invalid(e.to_string()))?;

        if let Some(auth) = &self.auth {
            url.set_password(Some(auth))
                .map_err(|()| self.invalid("credential cannot be encoded"))?;
        }

        if self.tls.is_some_and(|tls| tls.insecure) {
            url.set_fragment(Some("insecure"));
        }

        Ok(url.into())
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidAddress {
            address: self.to_string(),
            reason: reason.into(),
        }
    }
}

impl PartialEq for StoreEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.db == other.db
    }
}

impl Eq for StoreEndpoint {}

impl fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (DB: {})", self.host, self.port, self.db)
    }
}

impl fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .finish()
    }
}

impl FromStr for StoreEndpoint {
    type Err = Error;

    /// Parses `[redis[s]://][auth@]<hostname>[:port][/db]`.
    fn from_str(address: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (mut rest, tls) = if let Some(stripped) = address.strip_prefix("rediss://") {
            (stripped, Some(TlsOptions::default()))
        } else if let Some(stripped) = address.strip_prefix("redis://") {
            (stripped, None)
        } else {
            (address, None)
        };

        let mut db = 0;
        if let Some(slash) = rest.rfind('/') {
            let segment = &rest[slash + 1..];
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("database must be a non-negative number"));
            }
            db = segment
                .parse()
                .map_err(|_| invalid("database index out of range"))?;
            rest = &rest[..slash];
        }

        let mut auth = None;
        if let Some(at) = rest.rfind('@') {
            if at > 0 {
                auth = Some(rest[..at].to_string());
                rest = &rest[at + 1..];
            }
        }

        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (host, parse_port(port).map_err(invalid)?),
            None => (rest, DEFAULT_PORT),
        };

        if host.contains('/') {
            return Err(invalid("unexpected '/' in hostname"));
        }

        let host = if host.is_empty() { DEFAULT_HOST } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
            auth: auth.filter(|a| !a.is_empty()),
            db,
            tls,
        })
    }
}

/// Non-numeric ports fall back to the default; numeric ports must fit.
fn parse_port(port: &str) -> std::result::Result<u16, &'static str> {
    let port = port.split(':').next().unwrap_or_default();
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(DEFAULT_PORT);
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err("port out of range"),
        Ok(p) => Ok(p),
    }
}

/// Accepted shapes of an endpoint in a YAML config.
#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointRepr {
    Address(String),
    Structured {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        auth: Option<String>,
        #[serde(default)]
        db: i64,
        #[serde(default)]
        tls: Option<TlsOptions>,
    },
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TryFrom<EndpointRepr> for StoreEndpoint {
    type Error = Error;

    fn try_from(repr: EndpointRepr) -> Result<Self> {
        match repr {
            EndpointRepr::Address(address) => address.parse(),
            EndpointRepr::Structured {
                host,
                port,
                auth,
                db,
                tls,
            } => {
                if db < 0 {
                    return Err(Error::Config(format!(
                        "database index must not be negative (got {db})"
                    )));
                }
                Ok(Self {
                    host,
                    port,
                    auth: auth.filter(|a| !a.is_empty()),
                    db,
                    tls,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
