//! Vector/embedding back-end.
//!
//! Grounded on the teacher's `embeddings.rs`: encode `"{name} {description}"`,
//! L2-normalize, score by dot product (cosine similarity once normalized).
//! The teacher embeds with a single process-wide `model2vec_rs::StaticModel`
//! against a single global `HashMap`; here the embedding function is behind
//! an [`EmbeddingFn`] trait so the back-end is testable without downloading a
//! model, and storage is per-session like the other two back-ends.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{SessionId, ToolReference};
use crate::retriever::{
    clamp_max_results, FindRequest, FindResponse, IndexedTool, SearchMetadata, SearchType,
    ToolSearcher,
};

const DEFAULT_MIN_SCORE: f32 = 0.3;

/// Turns text into an L2-normalized embedding vector. Implemented by the
/// optional `model2vec` back-end below, and by test doubles.
pub trait EmbeddingFn: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct EmbeddedDoc {
    description: String,
    category: Option<String>,
    vector: Vec<f32>,
}

/// Per-session brute-force vector searcher. Brute force is deliberate: the
/// teacher's own comment notes HNSW only pays off past 10K+ vectors, and a
/// session's tool catalog is orders of magnitude smaller than that.
pub struct SemanticSearcher<E: EmbeddingFn> {
    embedder: E,
    sessions: DashMap<SessionId, DashMap<String, EmbeddedDoc>>,
    min_score: f32,
}

impl<E: EmbeddingFn> SemanticSearcher<E> {
    pub fn new(embedder: E) -> Self {
        Self::with_min_score(embedder, DEFAULT_MIN_SCORE)
    }

    pub fn with_min_score(embedder: E, min_score: f32) -> Self {
        Self {
            embedder,
            sessions: DashMap::new(),
            min_score,
        }
    }
}

#[async_trait]
impl<E: EmbeddingFn> ToolSearcher for SemanticSearcher<E> {
    async fn index_tool(&self, session_id: &SessionId, tool: IndexedTool) -> anyhow::Result<()> {
        let mut vector = self.embedder.embed(&format!("{} {}", tool.name, tool.description));
        l2_normalize(&mut vector);
        self.sessions.entry(session_id.clone()).or_default().insert(
            tool.name,
            EmbeddedDoc {
                description: tool.description,
                category: tool.category,
                vector,
            },
        );
        Ok(())
    }

    async fn find_tools(&self, req: FindRequest) -> FindResponse {
        if req.query.trim().is_empty() {
            return FindResponse::empty(SearchType::Semantic, &req.query, None);
        }

        let Some(docs) = self.sessions.get(&req.session_id) else {
            return FindResponse::empty(SearchType::Semantic, &req.query, None);
        };

        let mut query_vec = self.embedder.embed(&req.query);
        l2_normalize(&mut query_vec);

        let mut scored: Vec<(String, String, f32)> = docs
            .iter()
            .filter(|entry| match (&req.category_filter, &entry.value().category) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|entry| {
                let doc = entry.value();
                (entry.key().clone(), doc.description.clone(), dot_product(&query_vec, &doc.vector))
            })
            .collect();
        drop(docs);

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));

        let qualifying: Vec<(String, String, f32)> =
            scored.into_iter().filter(|(_, _, score)| *score >= self.min_score).collect();
        let total_matches = qualifying.len();
        let limit = clamp_max_results(req.max_results);

        let tool_references = qualifying
            .into_iter()
            .take(limit)
            .map(|(name, description, score)| ToolReference {
                tool_name: name,
                summary: description,
                relevance_score: score as f64,
            })
            .collect();

        FindResponse {
            tool_references,
            total_matches,
            metadata: SearchMetadata {
                search_type: SearchType::Semantic,
                query: req.query,
                warning: None,
            },
        }
    }

    async fn clear_index(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }

    fn search_type(&self) -> SearchType {
        SearchType::Semantic
    }
}

/// Loads a real `model2vec_rs` static model, same as the teacher's
/// `EmbeddingIndex::new`. Behind the `semantic` feature since it pulls in
/// `hf-hub` for the download path.
#[cfg(feature = "semantic")]
pub mod model2vec_embedder {
    use model2vec_rs::model::StaticModel;

    use super::EmbeddingFn;

    pub struct Model2VecEmbedder {
        model: StaticModel,
    }

    impl Model2VecEmbedder {
        pub fn load(model_path: &str) -> anyhow::Result<Self> {
            tracing::info!(model = model_path, "loading embedding model");
            let model = StaticModel::from_pretrained(model_path, None, Some(true), None)
                .map_err(|e| anyhow::anyhow!("failed to load embedding model: {e}"))?;
            tracing::info!(model = model_path, "embedding model loaded");
            Ok(Self { model })
        }
    }

    impl EmbeddingFn for Model2VecEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            self.model.encode_single(text)
        }
    }
}
