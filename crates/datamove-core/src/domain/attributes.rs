//! Source/destination metadata bag

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::ETag;

/// SMB/NTFS properties carried between file-share endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmbProperties {
    /// NTFS attribute names, e.g. `ReadOnly`, `Archive`
    pub file_attributes: Vec<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub last_write_time: Option<DateTime<Utc>>,
}

/// Attributes of a remote or local object
///
/// `length`, `etag` and `last_modified` are observed values. The remaining
/// fields are settable properties and are what [`Attributes::settable_eq`]
/// compares when deciding whether a commit must re-send metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub length: u64,
    pub etag: Option<ETag>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub content_md5: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub smb: Option<SmbProperties>,
    /// Key under which the file service stores the object's security descriptor
    pub permission_key: Option<String>,
    /// Security descriptor in SDDL form, when resolved
    pub sddl: Option<String>,
}

impl Attributes {
    /// Attributes with only a length, as reported for a fresh object
    pub fn with_length(length: u64) -> Self {
        Self {
            length,
            ..Self::default()
        }
    }

    /// Compare the properties a commit would write
    pub fn settable_eq(&self, other: &Attributes) -> bool {
        self.content_type == other.content_type
            && self.content_md5 == other.content_md5
            && self.content_encoding == other.content_encoding
            && self.cache_control == other.cache_control
            && self.metadata == other.metadata
            && self.smb == other.smb
            && self.sddl == other.sddl
    }

    /// Copy settable properties from `source`, leaving observed fields alone
    pub fn apply_settable_from(&mut self, source: &Attributes) {
        self.content_type = source.content_type.clone();
        self.content_md5 = source.content_md5.clone();
        self.content_encoding = source.content_encoding.clone();
        self.cache_control = source.cache_control.clone();
        self.metadata = source.metadata.clone();
        self.smb = source.smb.clone();
        self.sddl = source.sddl.clone();
    }
}
