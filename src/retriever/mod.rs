//! The retrieval interface and its three back-ends: keyword, semantic, regex.
//!
//! The interceptor depends only on [`ToolSearcher`]; it never knows which
//! back-end is wired in. Capturing `index_tool`/`find_tools`/`clear_index`/
//! `search_type` as one capability set is what lets `gatemini`-style
//! registries (single global index) become per-session ones here without
//! touching the interceptor at all.

pub mod keyword;
pub mod regex;
pub mod semantic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{SessionId, ToolReference};

/// Advisory tag identifying a back-end's retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchType {
    Keyword,
    Semantic,
    Regex,
}

/// A tool offered up for indexing. `category` backs the `categoryFilter`
/// query parameter — an optional exact-match tag, not part of the original
/// distilled spec's data model but implemented uniformly across all three
/// back-ends (see SPEC_FULL.md §11).
#[derive(Debug, Clone)]
pub struct IndexedTool {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
}

impl IndexedTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Default results returned by a search when the caller doesn't specify.
pub const DEFAULT_MAX_RESULTS: u32 = 5;
/// Hard ceiling on results per search, regardless of what the caller asks for.
pub const MAX_RESULTS_CEILING: u32 = 10;

/// Clamp a caller-supplied `maxResults` to `[1, MAX_RESULTS_CEILING]`,
/// defaulting to `DEFAULT_MAX_RESULTS` when absent. Zero or negative values
/// are clamped up to 1 rather than rejected (the spec leaves this
/// implementation-defined but requires it be fixed and consistent).
pub fn clamp_max_results(requested: Option<u32>) -> usize {
    let value = requested.unwrap_or(DEFAULT_MAX_RESULTS);
    value.clamp(1, MAX_RESULTS_CEILING) as usize
}

/// A scored-search request.
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub session_id: SessionId,
    pub query: String,
    pub max_results: Option<u32>,
    pub category_filter: Option<String>,
}

impl FindRequest {
    pub fn new(session_id: impl Into<SessionId>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            max_results: None,
            category_filter: None,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_category_filter(mut self, category: impl Into<String>) -> Self {
        self.category_filter = Some(category.into());
        self
    }
}

/// Metadata describing how a search was carried out, for diagnostics.
#[derive(Debug, Clone)]
pub struct SearchMetadata {
    pub search_type: SearchType,
    pub query: String,
    /// Set when a back-end degraded (e.g. `BackendUnavailable`, an invalid
    /// regex) rather than erroring — `find_tools` never fails outright.
    pub warning: Option<String>,
}

/// The result of a scored search.
#[derive(Debug, Clone)]
pub struct FindResponse {
    pub tool_references: Vec<ToolReference>,
    /// Count of matches above `min_score`, before truncation to
    /// `maxResults`. Always `>= tool_references.len()`.
    pub total_matches: usize,
    pub metadata: SearchMetadata,
}

impl FindResponse {
    fn empty(search_type: SearchType, query: &str, warning: Option<String>) -> Self {
        Self {
            tool_references: Vec::new(),
            total_matches: 0,
            metadata: SearchMetadata {
                search_type,
                query: query.to_string(),
                warning,
            },
        }
    }
}

/// Per-session indexing and scored search over tool descriptions.
///
/// Implementations must restrict every `find_tools` result to the given
/// `session_id` — cross-session leakage is forbidden regardless of shared
/// internal storage. `index_tool` tolerates duplicate names by replacing the
/// prior entry. `clear_index` is idempotent.
#[async_trait]
pub trait ToolSearcher: Send + Sync {
    /// Add `tool` to `session_id`'s index. Fails only on back-end I/O —
    /// never on a domain condition (duplicate names are a silent replace).
    async fn index_tool(&self, session_id: &SessionId, tool: IndexedTool) -> anyhow::Result<()>;

    /// Scored lookup restricted to `req.session_id`. Never returns `Err`;
    /// degraded back-ends report through `metadata.warning` with an empty
    /// result instead.
    async fn find_tools(&self, req: FindRequest) -> FindResponse;

    /// Remove all entries for `session_id`. Idempotent.
    async fn clear_index(&self, session_id: &SessionId);

    fn search_type(&self) -> SearchType;
}
