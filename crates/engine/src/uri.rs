//! Engine URI parsing
//!
//! Supported forms:
//!
//! - `normlite:///:memory:` for an in-memory store
//! - `normlite:///path/to/file.db` for a file-backed store
//! - `normlite+auth://internal?token=<t>&version=<v>`
//! - `normlite+auth://external?client_id=<c>&client_secret=<s>&auth_url=<u>`

use std::collections::BTreeMap;
use std::path::PathBuf;

use notiondb_common::{Error, Result};

/// A parsed engine URI.
#[derive(Debug, Clone, PartialEq)]
pub enum NotionUri {
    /// Simulated in-memory integration
    Memory,
    /// Simulated file-backed integration
    File { path: PathBuf },
    /// Internal integration with a bearer token
    Internal {
        token: Option<String>,
        version: Option<String>,
    },
    /// External OAuth integration
    External {
        client_id: Option<String>,
        client_secret: Option<String>,
        auth_url: Option<String>,
    },
}

impl NotionUri {
    pub fn parse(uri: &str) -> Result<NotionUri> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid(uri, "missing scheme"))?;

        match scheme {
            "normlite" => parse_simulated(uri, rest),
            "normlite+auth" => parse_auth(uri, rest),
            other => Err(invalid(uri, &format!("unsupported scheme {other}"))),
        }
    }
}

fn parse_simulated(uri: &str, rest: &str) -> Result<NotionUri> {
    // simulated URIs have no host: normlite:///<path>
    let Some(path) = rest.strip_prefix('/') else {
        return Err(invalid(uri, "simulated integrations have no host"));
    };
    if path == ":memory:" {
        return Ok(NotionUri::Memory);
    }
    if path.is_empty() {
        return Err(invalid(uri, "empty database path"));
    }
    Ok(NotionUri::File {
        path: PathBuf::from(path),
    })
}

fn parse_auth(uri: &str, rest: &str) -> Result<NotionUri> {
    let (host, query) = match rest.split_once('?') {
        Some((host, query)) => (host, query),
        None => (rest, ""),
    };
    let params: BTreeMap<&str, &str> = query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .filter_map(|kv| kv.split_once('='))
        .collect();
    let get = |name: &str| params.get(name).map(|v| (*v).to_owned());

    match host {
        "internal" => Ok(NotionUri::Internal {
            token: get("token"),
            version: get("version"),
        }),
        "external" => Ok(NotionUri::External {
            client_id: get("client_id"),
            client_secret: get("client_secret"),
            auth_url: get("auth_url"),
        }),
        other => Err(invalid(uri, &format!("unsupported integration type {other}"))),
    }
}

fn invalid(uri: &str, reason: &str) -> Error {
    Error::InvalidRequest(format!("cannot parse engine URI {uri}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_uri() {
        assert_eq!(
            NotionUri::parse("normlite:///:memory:").unwrap(),
            NotionUri::Memory
        );
    }

    #[test]
    fn test_file_uri() {
        let uri = NotionUri::parse("normlite:///path/to/file.db").unwrap();
        assert_eq!(
            uri,
            NotionUri::File {
                path: PathBuf::from("path/to/file.db")
            }
        );
    }

    #[test]
    fn test_internal_auth_uri() {
        let uri =
            NotionUri::parse("normlite+auth://internal?token=secret&version=2022-06-28").unwrap();
        assert_eq!(
            uri,
            NotionUri::Internal {
                token: Some("secret".into()),
                version: Some("2022-06-28".into()),
            }
        );
    }

    #[test]
    fn test_external_auth_uri() {
        let uri = NotionUri::parse(
            "normlite+auth://external?client_id=c&client_secret=s&auth_url=https://x",
        )
        .unwrap();
        let NotionUri::External {
            client_id,
            client_secret,
            ..
        } = uri
        else {
            panic!("expected External");
        };
        assert_eq!(client_id.as_deref(), Some("c"));
        assert_eq!(client_secret.as_deref(), Some("s"));
    }

    #[test]
    fn test_bad_uris_fail() {
        assert!(NotionUri::parse("postgres://x").is_err());
        assert!(NotionUri::parse("normlite").is_err());
        assert!(NotionUri::parse("normlite+auth://cloud?token=x").is_err());
    }
}
