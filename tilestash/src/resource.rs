//! Fetchable resources and the file source abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::OfflineError;

/// Kind of a fetchable resource.
///
/// The kind partitions the cache: two resources with the same url but
/// different kinds are distinct cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Style JSON document.
    Style,
    /// Tile source manifest (TileJSON).
    Source,
    /// A single map tile.
    Tile,
    /// A glyph range for one font stack.
    Glyphs,
    /// Sprite atlas image.
    SpriteImage,
    /// Sprite atlas JSON descriptor.
    SpriteJson,
}

impl ResourceKind {
    /// Whether resources of this kind count towards tile counters and limits.
    pub fn is_tile(self) -> bool {
        self == ResourceKind::Tile
    }

    pub(crate) fn to_db(self) -> i64 {
        match self {
            ResourceKind::Style => 0,
            ResourceKind::Source => 1,
            ResourceKind::Tile => 2,
            ResourceKind::Glyphs => 3,
            ResourceKind::SpriteImage => 4,
            ResourceKind::SpriteJson => 5,
        }
    }

    pub(crate) fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(ResourceKind::Style),
            1 => Some(ResourceKind::Source),
            2 => Some(ResourceKind::Tile),
            3 => Some(ResourceKind::Glyphs),
            4 => Some(ResourceKind::SpriteImage),
            5 => Some(ResourceKind::SpriteJson),
            _ => None,
        }
    }
}

/// A fetchable artifact, identified by its url and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    kind: ResourceKind,
    url: String,
}

impl Resource {
    /// Creates a new resource identifier.
    pub fn new(kind: ResourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    /// Kind of the resource.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Url the resource is fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}", self.kind, self.url)
    }
}

/// Successfully fetched resource data.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Raw resource bytes.
    pub data: Bytes,
    /// Expiration timestamp (unix seconds), if the origin reported one.
    pub expires: Option<i64>,
}

impl FetchResult {
    /// Creates a result with no expiration information.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            expires: None,
        }
    }
}

/// Source of raw resource data.
///
/// This is the seam between the offline subsystem and the resource-fetching
/// layer. The default implementation is [`HttpFileSource`](crate::HttpFileSource);
/// tests substitute an in-memory source.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Fetches the raw bytes of the given resource.
    async fn fetch(&self, resource: &Resource) -> Result<FetchResult, OfflineError>;
}
