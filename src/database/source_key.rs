use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use std::str::FromStr;

/// Kind of source entity whose content is embedded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum SourceType {
    Document,
    Link,
}

impl SourceType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::Link => "link",
        }
    }
}

impl fmt::Display for SourceType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "doc" => Ok(SourceType::Document),
            "link" => Ok(SourceType::Link),
            other => Err(format!(
                "Invalid source type '{}'. Must be 'document' or 'link'",
                other
            )),
        }
    }
}

/// Identifies the chunk set of one source entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub tenant_id: i64,
    pub source_type: SourceType,
    pub source_id: i64,
}

impl SourceKey {
    #[inline]
    pub fn new(tenant_id: i64, source_type: SourceType, source_id: i64) -> Self {
        Self {
            tenant_id,
            source_type,
            source_id,
        }
    }

    #[inline]
    pub fn document(tenant_id: i64, source_id: i64) -> Self {
        Self::new(tenant_id, SourceType::Document, source_id)
    }

    #[inline]
    pub fn link(tenant_id: i64, source_id: i64) -> Self {
        Self::new(tenant_id, SourceType::Link, source_id)
    }

    /// Stable identifier of one chunk within this key's chunk set
    #[inline]
    pub fn chunk_id(&self, chunk_index: u32) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id, self.source_type, self.source_id, chunk_index
        )
    }
}

impl fmt::Display for SourceKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id, self.source_type, self.source_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_chunk_id() {
        let key = SourceKey::document(1, 42);
        assert_eq!(key.to_string(), "1/document/42");
        assert_eq!(key.chunk_id(3), "1:document:42:3");
        assert_eq!(SourceKey::link(7, 2).to_string(), "7/link/2");
    }

    #[test]
    fn parse_source_type() {
        assert_eq!("Document".parse::<SourceType>(), Ok(SourceType::Document));
        assert_eq!(" link ".parse::<SourceType>(), Ok(SourceType::Link));
        assert!("page".parse::<SourceType>().is_err());
    }
}
