//! Git credential helper wire format.
//!
//! Git writes `key=value` lines to the helper's stdin, ending with a blank
//! line or EOF, and reads the same format back from stdout. A `url=` line is
//! decomposed into `protocol`, `host` and `path`; later lines override
//! earlier ones, as in git itself.

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::matcher::LookupKey;
use crate::store::Secret;

/// Error type for protocol decoding and encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown credential operation '{0}' (expected get, store or erase)")]
    UnknownOperation(String),

    #[error("malformed credential line {line}: expected key=value")]
    MalformedLine { line: usize },

    #[error("invalid url in credential request: {message}")]
    InvalidUrl { message: String },

    #[error("credential request has no host")]
    MissingHost,

    #[error("I/O error on credential stream")]
    Io(#[from] std::io::Error),
}

/// Helper operation named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Store,
    Erase,
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "store" => Ok(Self::Store),
            "erase" => Ok(Self::Erase),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Store => "store",
            Self::Erase => "erase",
        };
        f.write_str(name)
    }
}

/// Decoded credential request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub username: Option<String>,
}

impl CredentialRequest {
    /// Read a request from `reader`, stopping at the first blank line.
    ///
    /// Unknown keys (including `password`) are ignored.
    pub fn read_from(reader: impl BufRead) -> Result<Self, ProtocolError> {
        let mut request = Self::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(ProtocolError::MalformedLine { line: index + 1 })?;

            match key {
                "protocol" => request.protocol = Some(value.to_string()),
                "host" => request.host = Some(value.to_string()),
                "path" => request.path = Some(value.to_string()),
                "username" => request.username = Some(value.to_string()),
                "url" => request.apply_url(value)?,
                other => tracing::trace!(key = other, "ignoring credential attribute"),
            }
        }

        Ok(request)
    }

    fn apply_url(&mut self, raw: &str) -> Result<(), ProtocolError> {
        let url = Url::parse(raw).map_err(|e| ProtocolError::InvalidUrl {
            message: e.to_string(),
        })?;

        self.protocol = Some(url.scheme().to_string());
        self.host = url.host_str().map(|host| match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        });
        let path = url.path().trim_matches('/');
        self.path = (!path.is_empty()).then(|| path.to_string());
        if !url.username().is_empty() {
            self.username = Some(url.username().to_string());
        }
        Ok(())
    }

    /// Whether the request is for a plaintext transport.
    pub fn is_insecure(&self) -> bool {
        matches!(self.protocol.as_deref(), Some(p) if !p.eq_ignore_ascii_case("https"))
    }

    /// Build the matcher key, or use `override_pattern` when set.
    pub fn lookup_key(&self, override_pattern: Option<&str>) -> Result<LookupKey, ProtocolError> {
        if let Some(pattern) = override_pattern {
            return Ok(LookupKey::parse(pattern));
        }
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(ProtocolError::MissingHost)?;
        Ok(LookupKey::new(host, self.path.as_deref()))
    }
}

/// Credentials returned for a `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialResponse {
    pub username: String,
    pub password: Secret,
}

impl CredentialResponse {
    /// Write exactly the `username` and `password` lines.
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), ProtocolError> {
        writeln!(writer, "username={}", self.username)?;
        writeln!(writer, "password={}", self.password.expose())?;
        writer.flush()?;
        Ok(())
    }
}
