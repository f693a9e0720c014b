//! Similarity measures over signatures and token sequences.

use std::collections::BTreeSet;

use crate::config::ClusterConfig;
use crate::signature::StructuralSignature;

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Levenshtein distance over token sequences.
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(x != y);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`; two empty sequences are identical.
pub fn edit_similarity<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

/// Jaccard overlap of two sets; two empty sets are identical.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Weighted structural similarity of two pages, in [0, 1].
pub fn signature_similarity(
    a: &StructuralSignature,
    b: &StructuralSignature,
    config: &ClusterConfig,
) -> f64 {
    let total = config.dom_weight + config.selector_weight + config.geometry_weight;
    if total <= 0.0 {
        return 0.0;
    }
    let dom = edit_similarity(&a.dom_shape, &b.dom_shape);
    let sel = jaccard(&a.selectors, &b.selectors);
    let geo = cosine_similarity(&a.geometry, &b.geometry).max(0.0);

    ((config.dom_weight * dom + config.selector_weight * sel + config.geometry_weight * geo)
        / total)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_edit_distance() {
        let a = ["a", "b", "c"];
        let b = ["a", "x", "c", "d"];
        assert_eq!(edit_distance(&a, &b), 2);
        assert!((edit_similarity(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(edit_similarity::<&str>(&[], &[]), 1.0);
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<&str> = ["a", "b", "c"].into_iter().collect();
        let b: BTreeSet<&str> = ["b", "c", "d"].into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_signature_similarity_self_is_one() {
        let sig = StructuralSignature {
            dom_shape: vec!["1:header".into(), "1:main".into()],
            selectors: [".a".to_string()].into_iter().collect(),
            geometry: vec![0.5; 8],
        };
        let sim = signature_similarity(&sig, &sig, &ClusterConfig::default());
        assert!((sim - 1.0).abs() < 1e-9);
    }
}
