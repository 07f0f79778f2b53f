//! Similarity ranking over the conversation log.
//!
//! A brute-force scan: the log is bounded by `max_stored_conversations`, so
//! every query is O(n·d) over at most a few hundred vectors.

use std::cmp::Ordering;

use super::types::{ConversationRecord, ScoredConversation};

/// Cosine similarity of two vectors.
/// Zero-norm or length-mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank `records` (oldest first) against `query`.
///
/// Records without a vector are skipped, as are records scoring below
/// `threshold` and, when `channel_id` is set, records from other channels.
/// Output is sorted by similarity descending; equal scores put the more
/// recent record first. At most `k` results are returned.
pub fn rank(
    records: &[ConversationRecord],
    query: &[f32],
    threshold: f32,
    k: usize,
    channel_id: Option<&str>,
) -> Vec<ScoredConversation> {
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| channel_id.map_or(true, |c| record.channel_id == c))
        .filter_map(|(position, record)| {
            let vector = record.embedding_vector.as_deref()?;
            let similarity = cosine_similarity(query, vector);
            (similarity >= threshold).then_some((position, similarity))
        })
        .collect();

    scored.sort_by(|(pos_a, sim_a), (pos_b, sim_b)| {
        sim_b
            .partial_cmp(sim_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| pos_b.cmp(pos_a))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(position, similarity)| ScoredConversation {
            record: records[position].clone(),
            similarity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, channel: &str, vector: Option<Vec<f32>>) -> ConversationRecord {
        let mut record = ConversationRecord::new(
            channel.to_string(),
            "author".to_string(),
            format!("prompt {}", id),
            format!("response {}", id),
        );
        record.id = id.to_string();
        record.embedding_vector = vector;
        record
    }

    /// Unit vector in the xy-plane whose cosine with [1, 0] is `cos`
    fn at_cos(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_top_one_of_close_scores() {
        let records = vec![
            record("low", "c", Some(at_cos(0.91))),
            record("high", "c", Some(at_cos(0.92))),
        ];

        let results = rank(&records, &[1.0, 0.0], 0.3, 1, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "high");
        assert!((results[0].similarity - 0.92).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_and_ordering() {
        let records = vec![
            record("a", "c", Some(at_cos(0.5))),
            record("b", "c", Some(at_cos(0.2))),
            record("c", "c", Some(at_cos(0.9))),
            record("d", "c", Some(at_cos(0.7))),
        ];

        let results = rank(&records, &[1.0, 0.0], 0.3, 10, None);
        let ids: Vec<_> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "a"]);
        assert!(results.iter().all(|r| r.similarity >= 0.3));
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_ties_prefer_recent() {
        let records = vec![
            record("oldest", "c", Some(vec![1.0, 0.0])),
            record("middle", "c", Some(vec![2.0, 0.0])),
            record("newest", "c", Some(vec![3.0, 0.0])),
        ];

        let results = rank(&records, &[1.0, 0.0], 0.3, 2, None);
        let ids: Vec<_> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "middle"]);
    }

    #[test]
    fn test_records_without_vectors_are_skipped() {
        let records = vec![
            record("missing", "c", None),
            record("present", "c", Some(vec![1.0, 0.0])),
        ];

        let results = rank(&records, &[1.0, 0.0], 0.0, 10, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "present");
    }

    #[test]
    fn test_channel_filter() {
        let records = vec![
            record("here", "general", Some(vec![1.0, 0.0])),
            record("there", "random", Some(vec![1.0, 0.0])),
        ];

        let results = rank(&records, &[1.0, 0.0], 0.3, 10, Some("general"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, "here");
    }

    #[test]
    fn test_zero_k() {
        let records = vec![record("a", "c", Some(vec![1.0, 0.0]))];
        assert!(rank(&records, &[1.0, 0.0], 0.3, 0, None).is_empty());
    }
}
