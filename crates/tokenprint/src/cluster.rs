//! Template clustering: group pages that share a structural layout.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::config::ClusterConfig;
use crate::similarity::signature_similarity;
use crate::types::{Cluster, ClusterId, Page, PageId, PageStatus};

/// Similarities closer than this are treated as ties.
const TIE_EPSILON: f64 = 1e-9;

/// A hard partition of the non-excluded pages.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    clusters: Vec<Cluster>,
    hints: BTreeMap<ClusterId, String>,
}

impl ClusterSet {
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn clusters_mut(&mut self) -> &mut [Cluster] {
        &mut self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    /// Cluster containing `page`, if any.
    pub fn cluster_of(&self, page: &PageId) -> Option<ClusterId> {
        self.clusters
            .iter()
            .find(|c| c.members.contains(page))
            .map(|c| c.id)
    }

    /// Add a page to a cluster, removing it from any other so the set stays
    /// a partition. Members are kept sorted.
    pub fn add_member(&mut self, id: ClusterId, page: PageId) -> bool {
        if !self.clusters.iter().any(|c| c.id == id) {
            return false;
        }
        self.remove_member(&page);
        if let Some(cluster) = self.clusters.iter_mut().find(|c| c.id == id) {
            let pos = cluster.members.binary_search(&page).unwrap_or_else(|p| p);
            cluster.members.insert(pos, page);
        }
        true
    }

    /// Remove a page from whichever cluster holds it. Emptied clusters are
    /// dropped.
    pub fn remove_member(&mut self, page: &PageId) -> Option<ClusterId> {
        let mut removed = None;
        for cluster in &mut self.clusters {
            if let Some(pos) = cluster.members.iter().position(|m| m == page) {
                cluster.members.remove(pos);
                removed = Some(cluster.id);
            }
        }
        let hints = &mut self.hints;
        self.clusters.retain(|c| {
            if c.members.is_empty() {
                hints.remove(&c.id);
                false
            } else {
                true
            }
        });
        removed
    }

    fn seed(&mut self, page: PageId, hint: Option<&str>) -> ClusterId {
        let id = ClusterId(self.clusters.iter().map(|c| c.id.0 + 1).max().unwrap_or(0));
        self.clusters.push(Cluster {
            id,
            template: String::new(),
            members: vec![page],
            cluster_weight: 0.0,
        });
        if let Some(h) = hint {
            self.hints.insert(id, h.to_string());
        }
        id
    }
}

/// Cluster all non-excluded pages. Deterministic for a given page set.
pub fn cluster_pages(pages: &[Page], config: &ClusterConfig) -> ClusterSet {
    let mut eligible: Vec<&Page> = pages
        .iter()
        .filter(|p| p.status != PageStatus::Excluded)
        .collect();
    eligible.sort_by(|a, b| a.id.cmp(&b.id));

    let n = eligible.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let scores: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| signature_similarity(&eligible[i].signature, &eligible[j].signature, config))
        .collect();
    let mut matrix = vec![vec![1.0f64; n]; n];
    for (&(i, j), s) in pairs.iter().zip(scores) {
        matrix[i][j] = s;
        matrix[j][i] = s;
    }

    let index: BTreeMap<&PageId, usize> = eligible.iter().enumerate().map(|(i, p)| (&p.id, i)).collect();
    let mut set = ClusterSet::default();

    for (i, page) in eligible.iter().enumerate() {
        let hint = page.cluster_hint.as_deref().filter(|h| !h.trim().is_empty());

        if let Some(h) = hint {
            let existing = set
                .hints
                .iter()
                .find(|(_, v)| v.as_str() == h)
                .map(|(id, _)| *id);
            if let Some(id) = existing {
                set.add_member(id, page.id.clone());
                continue;
            }
        }

        // Hinted pages only group with their own hint. Unhinted pages take
        // the average-linkage similarity to every cluster.
        let linkage: Vec<(ClusterId, f64)> = if hint.is_some() {
            Vec::new()
        } else {
            set.clusters
                .iter()
                .map(|c| {
                    let total: f64 = c
                        .members
                        .iter()
                        .filter_map(|m| index.get(m))
                        .map(|&j| matrix[i][j])
                        .sum();
                    (c.id, total / c.members.len().max(1) as f64)
                })
                .collect()
        };

        match best_cluster(&linkage, config.similarity_threshold) {
            Some(id) => {
                set.add_member(id, page.id.clone());
            }
            None => {
                set.seed(page.id.clone(), hint);
            }
        }
    }

    let by_id: BTreeMap<&PageId, &Page> = eligible.iter().map(|p| (&p.id, *p)).collect();
    let hints = set.hints.clone();
    for cluster in &mut set.clusters {
        cluster.template = match hints.get(&cluster.id) {
            Some(h) => h.clone(),
            None => majority_label(
                cluster
                    .members
                    .iter()
                    .filter_map(|m| by_id.get(m))
                    .map(|p| template_label_for_url(&p.url)),
            ),
        };
    }

    tracing::info!("Clustered {} pages into {} template clusters", n, set.len());
    set
}

/// Pick the most similar cluster at or above `threshold`. Ties go to the
/// lower cluster id.
fn best_cluster(linkage: &[(ClusterId, f64)], threshold: f64) -> Option<ClusterId> {
    let mut best: Option<(ClusterId, f64)> = None;
    for &(id, sim) in linkage {
        if sim + TIE_EPSILON < threshold {
            continue;
        }
        best = match best {
            None => Some((id, sim)),
            Some((bid, bsim)) => {
                if sim > bsim + TIE_EPSILON || ((sim - bsim).abs() <= TIE_EPSILON && id < bid) {
                    Some((id, sim))
                } else {
                    Some((bid, bsim))
                }
            }
        };
    }
    best.map(|(id, _)| id)
}

fn majority_label(labels: impl Iterator<Item = String>) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    // BTreeMap iterates in key order, so the first maximum is the
    // lexicographically smallest label.
    let mut best: Option<(&String, usize)> = None;
    for (label, count) in &counts {
        if best.map(|(_, c)| *count > c).unwrap_or(true) {
            best = Some((label, *count));
        }
    }
    best.map(|(l, _)| l.clone()).unwrap_or_else(|| "unknown".to_string())
}

/// Guess a template label from a page URL.
pub fn template_label_for_url(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw) else {
        return "unknown".to_string();
    };
    let first = parsed
        .path_segments()
        .and_then(|mut segs| segs.find(|s| !s.is_empty()))
        .map(|s| s.to_ascii_lowercase());

    let Some(segment) = first else {
        return "home".to_string();
    };
    let has = |words: &[&str]| words.iter().any(|w| segment.contains(w));
    if has(&["pricing", "plans"]) {
        "pricing".to_string()
    } else if has(&["docs", "documentation", "guide", "help"]) {
        "docs".to_string()
    } else if has(&["blog", "news", "articles", "posts"]) {
        "blog".to_string()
    } else if has(&["about", "company", "team"]) {
        "about".to_string()
    } else if has(&["contact", "support"]) {
        "contact".to_string()
    } else if has(&["product", "features", "solutions"]) {
        "product".to_string()
    } else {
        segment
    }
}
