//! Catalog record types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a catalog record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A stored file under the storage root
    File,
    /// A short-code redirect; has no backing file
    UrlShortener,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::UrlShortener => "url-shortener",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "url-shortener" => Ok(Self::UrlShortener),
            other => Err(format!("unknown resource kind: {}", other)),
        }
    }
}

/// A persisted resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRecord {
    /// Public ID; for files also the path relative to the storage root
    pub id: String,

    /// Bearer capability for management operations
    #[serde(skip_serializing)]
    pub management_token: String,

    pub original_name: String,
    pub upload_date: DateTime<Utc>,
    pub size: u64,
    pub content_type: String,

    /// Hex SHA-256 of the content; empty when hashing failed
    pub content_hash: String,

    /// Explicit expiry. `None` means retention is computed from the size.
    pub expires_at: Option<DateTime<Utc>>,

    pub one_time_view: bool,
    pub kind: ResourceKind,

    pub access_count: i64,
    pub uploader_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// A fresh `file` record stamped with the current time
    pub fn new_file(
        id: String,
        management_token: String,
        original_name: String,
        size: u64,
        content_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            management_token,
            original_name,
            upload_date: now,
            size,
            content_type,
            content_hash: String::new(),
            expires_at: None,
            one_time_view: false,
            kind: ResourceKind::File,
            access_count: 0,
            uploader_ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record governs a file under the storage root
    pub fn has_backing_file(&self) -> bool {
        self.kind == ResourceKind::File
    }
}

/// Aggregate counters over catalog records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub count: u64,
    pub total_size: u64,
}
