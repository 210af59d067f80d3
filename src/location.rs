//! Parsing of opaque location strings.
//!
//! A location is either a plain filesystem path (`data/events.csv`) or a
//! URL-shaped string `<scheme>://[<authority>]/<path>`. Parsing is purely
//! syntactic; which account or container the authority denotes is decided by
//! the storage backend for that scheme.

use std::fmt;

use crate::error::{Result, TabError};

/// The scheme families tabkit knows how to route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    Local,
    S3,
    Gcs,
    /// `az://` and `azure://`: blob storage with a configurable authority.
    Azure,
    /// `abfs://` and `abfss://`: `container@account.dfs.core.windows.net`.
    Abfs,
    Other(String),
}

impl Scheme {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "" | "file" => Scheme::Local,
            "s3" | "s3a" => Scheme::S3,
            "gs" | "gcs" => Scheme::Gcs,
            "az" | "azure" => Scheme::Azure,
            "abfs" | "abfss" => Scheme::Abfs,
            other => Scheme::Other(other.to_string()),
        }
    }

    /// Whether a location of this scheme is meaningless without an authority.
    fn requires_authority(&self) -> bool {
        matches!(self, Scheme::S3 | Scheme::Gcs | Scheme::Abfs)
    }
}

/// A parsed location: `{scheme, authority, path}`.
///
/// `scheme` is empty for scheme-less local paths. `path` never has a leading
/// `/` for URL-shaped locations; for local paths it is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

impl Location {
    pub fn parse(location: &str) -> Result<Self> {
        // a single trailing slash would otherwise produce an empty last segment
        let trimmed = match location.strip_suffix('/') {
            Some(rest) if !rest.is_empty() && !location.ends_with("://") => rest,
            _ => location,
        };

        let Some((scheme, rest)) = trimmed.split_once("://") else {
            return Ok(Self {
                scheme: String::new(),
                authority: String::new(),
                path: trimmed.to_string(),
            });
        };

        if scheme.is_empty() {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: "empty scheme before '://'".to_string(),
            });
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let kind = Scheme::from_token(scheme);
        if kind.requires_authority() && authority.is_empty() {
            return Err(TabError::MalformedLocation {
                location: location.to_string(),
                reason: format!("{scheme}:// locations need a bucket or container after '://'"),
            });
        }

        let path = if kind == Scheme::Local {
            format!("/{path}")
        } else {
            path.to_string()
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            path,
        })
    }

    pub fn kind(&self) -> Scheme {
        Scheme::from_token(&self.scheme)
    }

    pub fn is_local(&self) -> bool {
        self.kind() == Scheme::Local
    }

    /// Filesystem path for local locations, `scheme://authority/path` otherwise.
    pub fn to_url(&self) -> String {
        if self.is_local() {
            return self.path.clone();
        }
        if self.path.is_empty() {
            format!("{}://{}", self.scheme, self.authority)
        } else {
            format!("{}://{}/{}", self.scheme, self.authority, self.path)
        }
    }

    /// Location of `child` under this one.
    pub fn join(&self, child: &str) -> Self {
        let child = child.trim_start_matches('/');
        let path = if self.path.is_empty() {
            child.to_string()
        } else if self.path.ends_with('/') || self.path.ends_with(std::path::MAIN_SEPARATOR) {
            format!("{}{child}", self.path)
        } else {
            format!("{}/{child}", self.path)
        };
        Self {
            path,
            ..self.clone()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Last path segment of a location or URL, ignoring a trailing slash.
pub fn file_name(location: &str) -> &str {
    let path = location
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(location);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Lower-cased extension of the last path segment, without the dot.
pub fn extension_of(location: &str) -> String {
    let name = file_name(location);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// False for hidden (`.crc`, `.DS_Store`) and marker (`_SUCCESS`, `_metadata`) files.
pub fn is_data_file(location: &str) -> bool {
    let name = file_name(location);
    !(name.starts_with('.') || name.starts_with('_'))
}
