//! Regex back-end: the caller's query is itself a pattern matched against
//! each indexed tool's `"{name} {description}"` text, case-insensitively.
//!
//! Grounded on the teacher's `tools/register.rs`, which compiles a
//! `regex::Regex` once via `LazyLock` and treats a bad pattern as a recoverable
//! validation failure rather than a panic. Here an invalid pattern degrades
//! `find_tools` to an empty result carrying a warning, per `ToolSearcher`'s
//! contract that search never fails outright.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::RegexBuilder;

use crate::model::{SessionId, ToolReference};
use crate::retriever::{
    clamp_max_results, FindRequest, FindResponse, IndexedTool, SearchMetadata, SearchType,
    ToolSearcher,
};

struct RegexDoc {
    description: String,
    category: Option<String>,
    haystack: String,
}

/// Per-session regex-match searcher. Matches are unscored: every match
/// carries `relevance_score: 1.0`, ordered by tool name for determinism.
pub struct RegexSearcher {
    sessions: DashMap<SessionId, DashMap<String, RegexDoc>>,
}

impl RegexSearcher {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }
}

impl Default for RegexSearcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSearcher for RegexSearcher {
    async fn index_tool(&self, session_id: &SessionId, tool: IndexedTool) -> anyhow::Result<()> {
        let haystack = format!("{} {}", tool.name, tool.description);
        self.sessions.entry(session_id.clone()).or_default().insert(
            tool.name,
            RegexDoc {
                description: tool.description,
                category: tool.category,
                haystack,
            },
        );
        Ok(())
    }

    async fn find_tools(&self, req: FindRequest) -> FindResponse {
        if req.query.trim().is_empty() {
            return FindResponse::empty(SearchType::Regex, &req.query, None);
        }

        let pattern = match RegexBuilder::new(&req.query).case_insensitive(true).build() {
            Ok(pattern) => pattern,
            Err(e) => {
                return FindResponse::empty(
                    SearchType::Regex,
                    &req.query,
                    Some(format!("invalid regex pattern: {e}")),
                );
            }
        };

        let Some(docs) = self.sessions.get(&req.session_id) else {
            return FindResponse::empty(SearchType::Regex, &req.query, None);
        };

        let mut matches: Vec<(String, String)> = docs
            .iter()
            .filter(|entry| match (&req.category_filter, &entry.value().category) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .filter(|entry| pattern.is_match(&entry.value().haystack))
            .map(|entry| (entry.key().clone(), entry.value().description.clone()))
            .collect();
        drop(docs);

        matches.sort_by(|a, b| a.0.cmp(&b.0));

        let total_matches = matches.len();
        let limit = clamp_max_results(req.max_results);

        let tool_references = matches
            .into_iter()
            .take(limit)
            .map(|(name, description)| ToolReference {
                tool_name: name,
                summary: description,
                relevance_score: 1.0,
            })
            .collect();

        FindResponse {
            tool_references,
            total_matches,
            metadata: SearchMetadata {
                search_type: SearchType::Regex,
                query: req.query,
                warning: None,
            },
        }
    }

    async fn clear_index(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }

    fn search_type(&self) -> SearchType {
        SearchType::Regex
    }
}
