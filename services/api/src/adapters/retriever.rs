//! services/api/src/adapters/retriever.rs
//!
//! This module contains the retrieval adapter: an in-process vector index
//! over the knowledge base, embedded via the OpenAI embeddings API. It
//! implements the `Retriever` port from the `core` crate and additionally
//! exposes the ingestion entry point used at startup and by the ingest
//! endpoint.

use std::path::{Path, PathBuf};

use async_openai::{config::OpenAIConfig, types::embeddings::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use rag_agent_core::domain::RetrievedDocument;
use rag_agent_core::ports::{ChatError, ChatResult, Retriever};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Character budget per chunk and overlap between consecutive chunks.
const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;

/// Passages embedded per embeddings API call.
const EMBED_BATCH_SIZE: usize = 64;

struct IndexedChunk {
    embedding: Vec<f32>,
    document: RetrievedDocument,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An embedding-backed retriever over markdown documents.
pub struct EmbeddingRetriever {
    client: Client<OpenAIConfig>,
    model: String,
    top_k: usize,
    index: RwLock<Vec<IndexedChunk>>,
}

impl EmbeddingRetriever {
    /// Creates a new `EmbeddingRetriever` with an empty index.
    pub fn new(client: Client<OpenAIConfig>, model: String, top_k: usize) -> Self {
        Self {
            client,
            model,
            top_k,
            index: RwLock::new(Vec::new()),
        }
    }

    /// (Re)populates the index from all `*.md` files under `root`.
    /// Returns the number of chunks ingested. A missing directory is not an
    /// error; it just leaves the index empty.
    pub async fn ingest_directory(&self, root: &Path) -> ChatResult<usize> {
        if !root.exists() {
            warn!(path = %root.display(), "knowledge base path does not exist");
            return Ok(0);
        }

        let mut files = Vec::new();
        collect_markdown_files(root, &mut files)
            .map_err(|e| ChatError::Initialization(format!("knowledge base scan failed: {e}")))?;
        info!(count = files.len(), "found markdown files to ingest");

        let mut documents = Vec::new();
        for file in &files {
            let content = match std::fs::read_to_string(file) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "failed to read file, skipping");
                    continue;
                }
            };

            let source = file
                .strip_prefix(root)
                .unwrap_or(file)
                .to_string_lossy()
                .to_string();
            let chunks = chunk_text(&content, CHUNK_SIZE, CHUNK_OVERLAP);
            debug!(file = %file.display(), chunks = chunks.len(), "chunked file");

            for chunk in chunks {
                let mut metadata = serde_json::Map::new();
                metadata.insert("source".to_string(), source.clone().into());
                metadata.insert(
                    "file_path".to_string(),
                    file.to_string_lossy().to_string().into(),
                );
                documents.push(RetrievedDocument {
                    source: Some(source.clone()),
                    content: chunk,
                    metadata,
                    similarity_score: None,
                });
            }
        }

        let mut indexed = Vec::with_capacity(documents.len());
        for batch in documents.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embed(texts).await?;
            for (document, embedding) in batch.iter().cloned().zip(embeddings) {
                indexed.push(IndexedChunk {
                    embedding,
                    document,
                });
            }
        }

        let count = indexed.len();
        *self.index.write().await = indexed;
        info!(chunks = count, "knowledge base ingested");
        Ok(count)
    }

    async fn embed(&self, inputs: Vec<String>) -> ChatResult<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(inputs)
            .build()
            .map_err(|e| ChatError::Retrieval(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| ChatError::Retrieval(e.to_string()))?;

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

//=========================================================================================
// `Retriever` Trait Implementation
//=========================================================================================

#[async_trait]
impl Retriever for EmbeddingRetriever {
    async fn search(&self, query: &str) -> ChatResult<Vec<RetrievedDocument>> {
        if self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embed(vec![query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ChatError::Retrieval("no embedding returned for query".to_string()))?;

        let index = self.index.read().await;
        let mut scored: Vec<(f32, RetrievedDocument)> = index
            .iter()
            .map(|chunk| {
                (
                    cosine_similarity(&query_embedding, &chunk.embedding),
                    chunk.document.clone(),
                )
            })
            .collect();

        // Stable sort: ties keep candidate (insertion) order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);

        Ok(scored
            .into_iter()
            .map(|(score, mut document)| {
                document.similarity_score = Some(score);
                document
            })
            .collect())
    }
}

//=========================================================================================
// Pure helpers
//=========================================================================================

fn collect_markdown_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    Ok(())
}

/// Splits text into overlapping character windows.
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_yields_a_single_chunk() {
        let chunks = chunk_text("hello world", 1000, 200);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn chunks_overlap_by_the_configured_amount() {
        let text: String = ('a'..='z').cycle().take(25).collect();
        let chunks = chunk_text(&text, 10, 4);

        assert_eq!(chunks[0].chars().count(), 10);
        // Each chunk starts (size - overlap) characters after the previous.
        assert_eq!(&chunks[1][..4], &chunks[0][6..]);
        let total: String = chunks.concat();
        assert!(total.contains(&text[..10]));
        assert!(chunks.last().unwrap().ends_with(text.chars().last().unwrap()));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
    }

    #[test]
    fn cosine_similarity_handles_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
