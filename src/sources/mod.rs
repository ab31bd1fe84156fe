//! URL Source abstraction: a pluggable source that, given a task URL,
//! yields candidate `(url, archive_id, metadata)` tuples for the scheduler
//! to diff against an archive file and the extractor cache to enrich.
//! Sources are matched in *registration order*, so the registry holds a
//! `Vec` rather than a name-keyed map.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreResult;

/// One item discoverable from a URL source: a concrete download URL plus
/// the archive-id used for dedup and whatever metadata the source already
/// knows (merged into the extractor info mapping later).
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub url: String,
    pub archive_id: String,
    pub metadata: Value,
}

#[async_trait]
pub trait UrlSource: Send + Sync {
    /// Stable identifier used in `extras.source_handler`.
    fn name(&self) -> &str;

    /// Whether this source claims the URL. Registry tries sources in
    /// registration order and dispatches to the first match.
    fn can_handle(&self, url: &str) -> bool;

    /// Whether a manual "preview"/inspect call is supported without
    /// enumerating the full candidate list.
    fn supports_manual_inspection(&self) -> bool {
        true
    }

    /// Enumerates candidates for a task's URL (one for a single video, many
    /// for a playlist/channel).
    async fn enumerate(&self, url: &str) -> CoreResult<Vec<Candidate>>;
}

/// Trivial built-in source: treats the URL itself as the only candidate and
/// never rejects a URL. Registered last so specific sources get first
/// refusal; guarantees tasks/items always have a dispatchable source.
pub struct DirectUrlSource;

#[async_trait]
impl UrlSource for DirectUrlSource {
    fn name(&self) -> &str {
        "direct"
    }

    fn can_handle(&self, _url: &str) -> bool {
        true
    }

    fn supports_manual_inspection(&self) -> bool {
        false
    }

    async fn enumerate(&self, url: &str) -> CoreResult<Vec<Candidate>> {
        Ok(vec![Candidate {
            url: url.to_string(),
            archive_id: url.to_string(),
            metadata: Value::Null,
        }])
    }
}

pub struct SourceRegistry {
    sources: Vec<Box<dyn UrlSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn register(&mut self, source: Box<dyn UrlSource>) {
        self.sources.push(source);
    }

    /// First-match-wins over registration order.
    pub fn resolve(&self, url: &str) -> Option<&dyn UrlSource> {
        self.sources.iter().find(|s| s.can_handle(url)).map(|s| s.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn UrlSource> {
        self.sources.iter().find(|s| s.name() == name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DirectUrlSource));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFirst;
    #[async_trait]
    impl UrlSource for AlwaysFirst {
        fn name(&self) -> &str {
            "always-first"
        }
        fn can_handle(&self, url: &str) -> bool {
            url.contains("special")
        }
        async fn enumerate(&self, url: &str) -> CoreResult<Vec<Candidate>> {
            Ok(vec![Candidate { url: url.to_string(), archive_id: "special-id".into(), metadata: Value::Null }])
        }
    }

    #[test]
    fn registration_order_wins_over_the_fallback() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(AlwaysFirst));
        registry.register(Box::new(DirectUrlSource));
        assert_eq!(registry.resolve("https://special.example").unwrap().name(), "always-first");
        assert_eq!(registry.resolve("https://plain.example").unwrap().name(), "direct");
    }

    #[tokio::test]
    async fn direct_source_always_yields_one_candidate() {
        let source = DirectUrlSource;
        let candidates = source.enumerate("https://example.com/x").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].archive_id, "https://example.com/x");
    }

    #[test]
    fn default_registry_always_resolves() {
        let registry = SourceRegistry::default();
        assert!(registry.resolve("literally anything").is_some());
    }
}
