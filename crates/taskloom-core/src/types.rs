//! Shared types for the knowledge graph and the visit pipeline.

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch, as handed out by the engine clock.
pub type Timestamp = f64;

/// Id prefix for page nodes.
pub const PAGE_PREFIX: &str = "page:";
/// Id prefix for keyword nodes.
pub const KEYWORD_PREFIX: &str = "kw:";

/// External identifier of a page node.
pub fn page_id(url: &str) -> String {
    format!("{}{}", PAGE_PREFIX, url)
}

/// External identifier of a keyword node.
pub fn keyword_id(term: &str) -> String {
    format!("{}{}", KEYWORD_PREFIX, term)
}

/// Lowercase a term and collapse internal Unicode whitespace to single spaces.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Attributes of a visited page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    pub title: String,
    /// Generated or caller-provided summary, at most 1500 chars.
    pub summary: String,
    /// Leading slice of the page body, at most 3000 chars.
    pub content_snippet: String,
    pub visit_count: u64,
    pub first_visited: Timestamp,
    pub last_visited: Timestamp,
}

/// Maximum number of referring URLs kept per keyword, newest first.
pub const MAX_PAGE_REFS: usize = 10;

/// Attributes of a topic keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordData {
    /// Lowercase, whitespace-collapsed term.
    pub label: String,
    pub frequency: u64,
    /// The most recent referring URLs, newest first, unique, at most
    /// [`MAX_PAGE_REFS`] entries.
    pub page_refs: Vec<String>,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

impl KeywordData {
    /// Record a referring URL, deduplicating by exact match and keeping
    /// the newest [`MAX_PAGE_REFS`] entries.
    pub fn push_page_ref(&mut self, url: &str) {
        self.page_refs.retain(|existing| existing != url);
        self.page_refs.insert(0, url.to_string());
        self.page_refs.truncate(MAX_PAGE_REFS);
    }
}

/// The two node variants of the heterogeneous graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Page(PageData),
    Keyword(KeywordData),
}

/// A node record: prefixed string id plus kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub kind: NodeKind,
}

impl NodeRecord {
    pub fn is_page(&self) -> bool {
        matches!(self.kind, NodeKind::Page(_))
    }

    pub fn is_keyword(&self) -> bool {
        matches!(self.kind, NodeKind::Keyword(_))
    }

    pub fn as_page(&self) -> Option<&PageData> {
        match &self.kind {
            NodeKind::Page(p) => Some(p),
            NodeKind::Keyword(_) => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&KeywordData> {
        match &self.kind {
            NodeKind::Keyword(k) => Some(k),
            NodeKind::Page(_) => None,
        }
    }

    /// The last moment this node was touched by a visit: `last_visited`
    /// for pages, `last_seen` for keywords.
    pub fn last_touch(&self) -> Timestamp {
        match &self.kind {
            NodeKind::Page(p) => p.last_visited,
            NodeKind::Keyword(k) => k.last_seen,
        }
    }

    /// Display label: keyword term or page title.
    pub fn display_label(&self) -> &str {
        match &self.kind {
            NodeKind::Page(p) => &p.title,
            NodeKind::Keyword(k) => &k.label,
        }
    }
}

/// An undirected edge between two distinct nodes.
///
/// `base_weight` is the raw reinforcement counter and only increases;
/// `weight` is the exponentially decayed effective value and never
/// exceeds `base_weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub base_weight: f64,
    pub weight: f64,
    pub created: Timestamp,
    pub last_active: Timestamp,
}

impl EdgeRecord {
    pub fn new(now: Timestamp) -> Self {
        Self {
            base_weight: 1.0,
            weight: 1.0,
            created: now,
            last_active: now,
        }
    }

    /// Reinforce on co-occurrence: bump the counter and refresh activity.
    pub fn reinforce(&mut self, now: Timestamp) {
        self.base_weight += 1.0;
        self.weight = self.base_weight;
        self.last_active = now;
    }
}

/// A raw page-visit event as received from the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVisit {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Caller-provided summary; used as-is when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Keywords from an external extractor; preferred over the heuristic
    /// extractor when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    pub timestamp: Timestamp,
}

/// Page attributes handed to the graph store after extraction.
#[derive(Debug, Clone)]
pub struct PageIngest {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub content_snippet: String,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_term("  Rust\t Async\n Runtime "), "rust async runtime");
        assert_eq!(normalize_term("HOOKS"), "hooks");
        assert_eq!(normalize_term(""), "");
    }

    #[test]
    fn page_refs_dedupe_and_cap() {
        let mut kw = KeywordData {
            label: "rust".into(),
            frequency: 1,
            page_refs: Vec::new(),
            first_seen: 0.0,
            last_seen: 0.0,
        };
        for i in 0..15 {
            kw.push_page_ref(&format!("https://example.com/{}", i));
        }
        assert_eq!(kw.page_refs.len(), MAX_PAGE_REFS);
        assert_eq!(kw.page_refs[0], "https://example.com/14");

        // Revisiting an old URL moves it to the front without duplicating.
        kw.push_page_ref("https://example.com/10");
        assert_eq!(kw.page_refs[0], "https://example.com/10");
        let unique: std::collections::HashSet<_> = kw.page_refs.iter().collect();
        assert_eq!(unique.len(), kw.page_refs.len());
    }

    #[test]
    fn ids_are_prefixed() {
        assert_eq!(page_id("https://a"), "page:https://a");
        assert_eq!(keyword_id("rust"), "kw:rust");
    }
}
