//! Transfer endpoint descriptors
//!
//! A [`TransferLocation`] names one end of a transfer (a local file, a blob,
//! a file-share entry, a caller-provided stream, or an arbitrary URI) and
//! carries the per-endpoint state the engine threads through a job: the
//! caller's access condition, request options, the ETag pinned on first
//! attribute fetch, and whether the access condition has been validated.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::ETag;

// ============================================================================
// BlobType / EndpointKind
// ============================================================================

/// Sub-kind of an object-store blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobType {
    /// Staged blocks committed as a list
    Block,
    /// 512-byte aligned random-access pages, sparse
    Page,
    /// Append-only
    Append,
}

/// Flat discriminator used to select handlers for a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Local,
    Stream,
    Uri,
    BlockBlob,
    PageBlob,
    AppendBlob,
    File,
}

impl EndpointKind {
    /// Returns true for blob and file-share endpoints
    pub fn is_remote_object(&self) -> bool {
        matches!(
            self,
            EndpointKind::BlockBlob
                | EndpointKind::PageBlob
                | EndpointKind::AppendBlob
                | EndpointKind::File
        )
    }

    /// Returns true for kinds that expose per-range allocation info
    pub fn is_range_addressable(&self) -> bool {
        matches!(self, EndpointKind::PageBlob | EndpointKind::File)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointKind::Local => "local",
            EndpointKind::Stream => "stream",
            EndpointKind::Uri => "uri",
            EndpointKind::BlockBlob => "block_blob",
            EndpointKind::PageBlob => "page_blob",
            EndpointKind::AppendBlob => "append_blob",
            EndpointKind::File => "file",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// LocationKind
// ============================================================================

/// Addressing data for each endpoint variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationKind {
    /// A path on the local filesystem
    Local { path: PathBuf },
    /// A caller-provided byte stream, resolved by name by the storage client
    Stream { name: String },
    /// An arbitrary readable URI
    Uri { uri: String },
    /// An object-store blob
    Blob {
        container: String,
        name: String,
        blob_type: BlobType,
    },
    /// An entry on a network file share
    File { share: String, path: String },
}

// ============================================================================
// AccessCondition / RequestOptions
// ============================================================================

/// Conditional-request precondition passed to the storage client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessCondition {
    /// Succeeds only while the object still has this ETag
    IfMatch(ETag),
    /// Succeeds only if the object does not have this ETag
    IfNoneMatch(ETag),
    /// Succeeds only if the object does not exist
    IfNotExists,
}

/// Options forwarded untouched to the storage client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Per-request server timeout in seconds
    pub server_timeout_secs: Option<u64>,
    /// Retry budget for transient failures (the client owns retry policy)
    pub max_retries: Option<u32>,
}

// ============================================================================
// TransferLocation
// ============================================================================

/// One endpoint of a transfer plus its per-job state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLocation {
    kind: LocationKind,
    access_condition: Option<AccessCondition>,
    #[serde(default)]
    request_options: RequestOptions,
    etag: Option<ETag>,
    #[serde(default)]
    condition_checked: bool,
}

impl TransferLocation {
    /// Create a location with no condition and no cached state
    pub fn new(kind: LocationKind) -> Self {
        Self {
            kind,
            access_condition: None,
            request_options: RequestOptions::default(),
            etag: None,
            condition_checked: false,
        }
    }

    /// Local filesystem path
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(LocationKind::Local { path: path.into() })
    }

    /// Named caller stream
    pub fn stream(name: impl Into<String>) -> Self {
        Self::new(LocationKind::Stream { name: name.into() })
    }

    /// Arbitrary URI
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::new(LocationKind::Uri { uri: uri.into() })
    }

    /// Blob in a container
    pub fn blob(container: impl Into<String>, name: impl Into<String>, blob_type: BlobType) -> Self {
        Self::new(LocationKind::Blob {
            container: container.into(),
            name: name.into(),
            blob_type,
        })
    }

    /// Entry on a file share
    pub fn file(share: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(LocationKind::File {
            share: share.into(),
            path: path.into(),
        })
    }

    /// Attach an access condition
    #[must_use]
    pub fn with_access_condition(mut self, condition: AccessCondition) -> Self {
        self.access_condition = Some(condition);
        self
    }

    /// Attach request options
    #[must_use]
    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    pub fn kind(&self) -> &LocationKind {
        &self.kind
    }

    /// Flat discriminator for handler selection
    pub fn endpoint_kind(&self) -> EndpointKind {
        match &self.kind {
            LocationKind::Local { .. } => EndpointKind::Local,
            LocationKind::Stream { .. } => EndpointKind::Stream,
            LocationKind::Uri { .. } => EndpointKind::Uri,
            LocationKind::Blob { blob_type, .. } => match blob_type {
                BlobType::Block => EndpointKind::BlockBlob,
                BlobType::Page => EndpointKind::PageBlob,
                BlobType::Append => EndpointKind::AppendBlob,
            },
            LocationKind::File { .. } => EndpointKind::File,
        }
    }

    pub fn access_condition(&self) -> Option<&AccessCondition> {
        self.access_condition.as_ref()
    }

    pub fn request_options(&self) -> &RequestOptions {
        &self.request_options
    }

    /// ETag pinned by the first attribute fetch, if any
    pub fn etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    /// Pin the ETag observed on the first attribute fetch
    pub fn pin_etag(&mut self, etag: Option<ETag>) {
        self.etag = etag;
    }

    /// Whether the caller's access condition has already been validated
    pub fn is_condition_checked(&self) -> bool {
        self.condition_checked
    }

    pub fn mark_condition_checked(&mut self) {
        self.condition_checked = true;
    }

    /// Condition to attach to every read of a source once its ETag is pinned
    pub fn read_condition(&self) -> Option<AccessCondition> {
        self.etag.clone().map(AccessCondition::IfMatch)
    }

    /// Stable identity string recorded in checkpoints
    pub fn id(&self) -> String {
        match &self.kind {
            LocationKind::Local { path } => format!("local:{}", path.display()),
            LocationKind::Stream { name } => format!("stream:{name}"),
            LocationKind::Uri { uri } => format!("uri:{uri}"),
            LocationKind::Blob {
                container, name, ..
            } => format!("blob:{container}/{name}"),
            LocationKind::File { share, path } => format!("file:{share}/{path}"),
        }
    }

    /// Location of `relative` underneath this directory-like location
    ///
    /// The child inherits request options but not the access condition or
    /// any cached state. Streams and URIs have no children.
    pub fn child(&self, relative: &str) -> Result<Self, DomainError> {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
            return Err(DomainError::InvalidLocation(format!(
                "invalid relative name: {relative:?}"
            )));
        }

        let kind = match &self.kind {
            LocationKind::Local { path } => {
                let mut child = path.clone();
                for segment in relative.split('/').filter(|s| !s.is_empty()) {
                    child.push(segment);
                }
                LocationKind::Local { path: child }
            }
            LocationKind::Blob {
                container,
                name,
                blob_type,
            } => LocationKind::Blob {
                container: container.clone(),
                name: join_virtual(name, relative),
                blob_type: *blob_type,
            },
            LocationKind::File { share, path } => LocationKind::File {
                share: share.clone(),
                path: join_virtual(path, relative),
            },
            LocationKind::Stream { .. } | LocationKind::Uri { .. } => {
                return Err(DomainError::InvalidLocation(format!(
                    "{} has no children",
                    self.id()
                )))
            }
        };

        Ok(Self::new(kind).with_request_options(self.request_options.clone()))
    }
}

fn join_virtual(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

impl fmt::Display for TransferLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
