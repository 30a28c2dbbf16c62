//! Process-wide interceptor configuration.
//!
//! Mirrors the teacher's `Config` shape: a serde-deserializable struct with
//! `#[serde(default = "fn")]` per field so a caller can supply a partial TOML
//! / JSON document, plus an explicit `validate()` pass run once at build time
//! (teacher: `Config::load` followed by `resolve_secrets_async`) rather than
//! scattering range checks through the hot path.

use serde::{Deserialize, Serialize};

use crate::session::DiscoveryMode;

/// `HIGH_PRIORITY + 300` in the source system's advisor-ordering scale.
/// Kept only as a default value for `advisor_order`; this crate has no
/// competing advisors to order against.
pub const HIGHEST_PRECEDENCE: i32 = -2_147_483_648;
const DEFAULT_ADVISOR_ORDER: i32 = HIGHEST_PRECEDENCE + 300;

const DEFAULT_SYSTEM_MESSAGE_SUFFIX: &str = "\
When you need a capability that isn't in your current tool list, call \
toolSearchTool with a short natural-language query describing what you \
need. It accepts an optional maxResults (default 5, max 10) and an \
optional categoryFilter. It returns only the names of matching tools — \
not their schemas. Matched tools become directly callable on your next \
turn.";

fn default_true() -> bool {
    true
}

fn default_max_results() -> u32 {
    crate::retriever::DEFAULT_MAX_RESULTS
}

fn default_max_turns() -> usize {
    10
}

fn default_search_tool_name() -> String {
    crate::search_tool::DEFAULT_SEARCH_TOOL_NAME.to_string()
}

fn default_advisor_order() -> i32 {
    DEFAULT_ADVISOR_ORDER
}

fn default_system_message_suffix() -> String {
    DEFAULT_SYSTEM_MESSAGE_SUFFIX.to_string()
}

/// Everything the interceptor needs beyond the retriever implementation
/// itself, which is supplied separately since it is a trait object, not
/// data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Relative ordering against other advisors in a chat framework's
    /// pipeline. This crate runs standalone, so it only needs to exist as a
    /// configurable value a host can read back.
    #[serde(default = "default_advisor_order")]
    pub advisor_order: i32,

    /// Appended to the system message during `initialize_loop`.
    #[serde(default = "default_system_message_suffix")]
    pub system_message_suffix: String,

    /// `true`: discovered tool names accumulate across turns within a loop.
    /// `false`: each turn's discoveries replace the previous turn's.
    #[serde(default = "default_true")]
    pub accumulate_discovered: bool,

    /// The value `ToolSearchCallback` substitutes when a search-tool call
    /// omits `maxResults`; still clamped to `[1, MAX_RESULTS_CEILING]` by
    /// `retriever::clamp_max_results` once it reaches a back-end.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Loop bound: LLM turns per top-level request before `LoopBudgetExceeded`.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Reserved name for the bootstrapping search tool.
    #[serde(default = "default_search_tool_name")]
    pub search_tool_name: String,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            advisor_order: default_advisor_order(),
            system_message_suffix: default_system_message_suffix(),
            accumulate_discovered: true,
            max_results: default_max_results(),
            max_turns: default_max_turns(),
            search_tool_name: default_search_tool_name(),
        }
    }
}

impl InterceptorConfig {
    pub fn builder() -> InterceptorConfigBuilder {
        InterceptorConfigBuilder::default()
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        if self.accumulate_discovered {
            DiscoveryMode::Accumulate
        } else {
            DiscoveryMode::Replace
        }
    }

    /// Range-checks fields that `serde` can't express. Called once when the
    /// interceptor is built; never re-checked per request.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=crate::retriever::MAX_RESULTS_CEILING).contains(&self.max_results) {
            anyhow::bail!(
                "maxResults must be within [1, {}], got {}",
                crate::retriever::MAX_RESULTS_CEILING,
                self.max_results
            );
        }
        if self.max_turns < 1 {
            anyhow::bail!("maxTurns must be at least 1, got {}", self.max_turns);
        }
        if self.search_tool_name.trim().is_empty() {
            anyhow::bail!("searchToolName must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterceptorConfigBuilder {
    config: InterceptorConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct InterceptorConfigOverrides {
    advisor_order: Option<i32>,
    system_message_suffix: Option<String>,
    accumulate_discovered: Option<bool>,
    max_results: Option<u32>,
    max_turns: Option<usize>,
    search_tool_name: Option<String>,
}

impl InterceptorConfigBuilder {
    pub fn advisor_order(mut self, value: i32) -> Self {
        self.config.advisor_order = Some(value);
        self
    }

    pub fn system_message_suffix(mut self, value: impl Into<String>) -> Self {
        self.config.system_message_suffix = Some(value.into());
        self
    }

    pub fn accumulate_discovered(mut self, value: bool) -> Self {
        self.config.accumulate_discovered = Some(value);
        self
    }

    pub fn max_results(mut self, value: u32) -> Self {
        self.config.max_results = Some(value);
        self
    }

    pub fn max_turns(mut self, value: usize) -> Self {
        self.config.max_turns = Some(value);
        self
    }

    pub fn search_tool_name(mut self, value: impl Into<String>) -> Self {
        self.config.search_tool_name = Some(value.into());
        self
    }

    pub fn build(self) -> anyhow::Result<InterceptorConfig> {
        let defaults = InterceptorConfig::default();
        let config = InterceptorConfig {
            advisor_order: self.config.advisor_order.unwrap_or(defaults.advisor_order),
            system_message_suffix: self.config.system_message_suffix.unwrap_or(defaults.system_message_suffix),
            accumulate_discovered: self.config.accumulate_discovered.unwrap_or(defaults.accumulate_discovered),
            max_results: self.config.max_results.unwrap_or(defaults.max_results),
            max_turns: self.config.max_turns.unwrap_or(defaults.max_turns),
            search_tool_name: self.config.search_tool_name.unwrap_or(defaults.search_tool_name),
        };
        config.validate()?;
        Ok(config)
    }
}
