//! Reranking with fallback to retrieval order.

use std::collections::HashSet;

use crate::pipeline::messages::Document;
use crate::providers::{ProviderError, Reranker};

/// How the final document order was decided.
#[derive(Debug, Clone, PartialEq)]
pub enum RankOutcome {
    /// The reranker's order was applied.
    Reranked,
    /// Reranking was not attempted (no reranker, or at most one candidate).
    Skipped,
    /// The reranker failed or returned an unusable permutation.
    Fallback(String),
}

/// Ranked documents plus how they were ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocuments {
    pub documents: Vec<Document>,
    pub outcome: RankOutcome,
}

/// Check that `indices` is a duplicate-free selection from `0..len`.
pub fn validate_permutation(indices: &[usize], len: usize) -> Result<(), ProviderError> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &index in indices {
        if index >= len {
            return Err(ProviderError::Decode(format!(
                "rerank index {index} out of range for {len} documents"
            )));
        }
        if !seen.insert(index) {
            return Err(ProviderError::Decode(format!("rerank index {index} repeated")));
        }
    }
    Ok(())
}

/// Keep the first `top_n` documents in retrieval order.
pub fn fallback_order(mut documents: Vec<Document>, top_n: usize) -> Vec<Document> {
    documents.truncate(top_n);
    documents
}

/// Select documents by reranker indices. Indices must already be validated.
fn apply_permutation(documents: Vec<Document>, indices: &[usize]) -> Vec<Document> {
    let mut slots: Vec<Option<Document>> = documents.into_iter().map(Some).collect();
    indices
        .iter()
        .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
        .collect()
}

/// Rerank `documents` for `query`, keeping at most `top_n`.
///
/// Never fails: a reranker error, an out-of-range or repeated index, or an
/// empty answer for a non-empty candidate set falls back to the first
/// `top_n` candidates in retrieval order.
///
/// A non-empty answer shorter than `min(documents.len(), top_n)` is accepted
/// as-is: candidates the reranker left out are dropped, not padded back in.
pub async fn rerank_or_fallback(
    reranker: Option<&dyn Reranker>,
    query: &str,
    documents: Vec<Document>,
    top_n: usize,
    timeout: std::time::Duration,
) -> RankedDocuments {
    let Some(reranker) = reranker else {
        return RankedDocuments {
            documents: fallback_order(documents, top_n),
            outcome: RankOutcome::Skipped,
        };
    };
    if documents.len() <= 1 {
        return RankedDocuments {
            documents: fallback_order(documents, top_n),
            outcome: RankOutcome::Skipped,
        };
    }

    let texts: Vec<String> = documents.iter().map(|d| d.rerank_text().to_string()).collect();
    let wanted = top_n.min(documents.len());
    let result = crate::pipeline::retry::with_timeout(
        timeout,
        "rerank",
        reranker.rerank(query, &texts, wanted),
    )
    .await
    .and_then(|indices| {
        validate_permutation(&indices, documents.len())?;
        if indices.is_empty() {
            return Err(ProviderError::Decode("rerank returned no results".into()));
        }
        Ok(indices)
    });

    match result {
        Ok(mut indices) => {
            indices.truncate(wanted);
            RankedDocuments {
                documents: apply_permutation(documents, &indices),
                outcome: RankOutcome::Reranked,
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, candidates = documents.len(), "rerank failed, keeping retrieval order");
            RankedDocuments {
                documents: fallback_order(documents, top_n),
                outcome: RankOutcome::Fallback(error.to_string()),
            }
        }
    }
}
