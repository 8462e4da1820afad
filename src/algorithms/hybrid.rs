use crate::config::HybridConfig;
use crate::models::{ItemId, RecommendationSource, ScoredItem};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub collaborative: f32,
    pub content: f32,
    pub personalized: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.40,
            content: 0.30,
            personalized: 0.30,
        }
    }
}

impl From<&HybridConfig> for HybridWeights {
    fn from(config: &HybridConfig) -> Self {
        Self {
            collaborative: config.collaborative_weight,
            content: config.content_weight,
            personalized: config.personalized_weight,
        }
    }
}

/// Scales a source's scores by its own maximum. A zero maximum divides by 1, so an all-zero
/// source stays all-zero. Repeated items keep their best score.
pub fn normalize_scores(items: &[ScoredItem]) -> HashMap<ItemId, f32> {
    let mut best: HashMap<ItemId, f32> = HashMap::with_capacity(items.len());
    for item in items {
        best.entry(item.item_id)
            .and_modify(|score| *score = score.max(item.score))
            .or_insert(item.score);
    }

    let max_score = best.values().copied().fold(f32::NEG_INFINITY, f32::max);
    let divisor = if max_score == 0.0 { 1.0 } else { max_score };

    best.into_iter()
        .map(|(item_id, score)| (item_id, score / divisor))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCombiner {
    weights: HybridWeights,
}

impl HybridCombiner {
    pub fn new(weights: HybridWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> HybridWeights {
        self.weights
    }

    /// Weighted sum of per-source normalized scores over the union of candidates. A source
    /// that does not mention an item contributes 0 for it.
    pub fn combine(
        &self,
        collaborative: &[ScoredItem],
        content: &[ScoredItem],
        personalized: &[ScoredItem],
        limit: usize,
    ) -> Vec<ScoredItem> {
        self.combine_attributed(collaborative, content, personalized, DEFAULT_LABELS, limit)
            .into_iter()
            .map(|attributed| attributed.item)
            .collect()
    }

    /// Same ranking as [`combine`](Self::combine), with each item credited to the source
    /// that contributed most to its blended score. `labels` names the three inputs in order;
    /// ties go to the earlier input.
    pub fn combine_attributed(
        &self,
        collaborative: &[ScoredItem],
        content: &[ScoredItem],
        personalized: &[ScoredItem],
        labels: [RecommendationSource; 3],
        limit: usize,
    ) -> Vec<AttributedItem> {
        let sources = [
            (normalize_scores(collaborative), self.weights.collaborative),
            (normalize_scores(content), self.weights.content),
            (normalize_scores(personalized), self.weights.personalized),
        ];

        let candidates: HashSet<ItemId> = sources
            .iter()
            .flat_map(|(scores, _)| scores.keys().copied())
            .collect();

        let mut combined: Vec<AttributedItem> = candidates
            .into_iter()
            .map(|item_id| {
                let mut score = 0.0;
                let mut dominant = (labels[0], f32::NEG_INFINITY);
                for ((scores, weight), label) in sources.iter().zip(labels) {
                    let Some(normalized) = scores.get(&item_id) else {
                        continue;
                    };
                    let contribution = weight * normalized;
                    score += contribution;
                    if contribution > dominant.1 {
                        dominant = (label, contribution);
                    }
                }
                AttributedItem {
                    item: ScoredItem::new(item_id, score),
                    source: dominant.0,
                }
            })
            .collect();

        combined.sort_by(|a, b| {
            b.item
                .score
                .partial_cmp(&a.item.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.item_id.cmp(&b.item.item_id))
        });
        combined.truncate(limit);
        combined
    }
}

const DEFAULT_LABELS: [RecommendationSource; 3] = [
    RecommendationSource::Collaborative,
    RecommendationSource::Content,
    RecommendationSource::Personalized,
];

/// A blended item and the source credited with it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributedItem {
    pub item: ScoredItem,
    pub source: RecommendationSource,
}

/// Item lists for the three display sections of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSections {
    pub content_based: Vec<ItemId>,
    pub personalized: Vec<ItemId>,
    pub collaborative: Vec<ItemId>,
}

impl RecommendationSections {
    /// Content-based keeps everything; personalized drops items already shown as
    /// content-based; collaborative drops items shown in either earlier section.
    pub fn deduplicate(self) -> Self {
        let content_ids: HashSet<ItemId> = self.content_based.iter().copied().collect();

        let personalized: Vec<ItemId> = self
            .personalized
            .into_iter()
            .filter(|id| !content_ids.contains(id))
            .collect();

        let mut shown = content_ids;
        shown.extend(personalized.iter().copied());

        let collaborative = self
            .collaborative
            .into_iter()
            .filter(|id| !shown.contains(id))
            .collect();

        Self {
            content_based: self.content_based,
            personalized,
            collaborative,
        }
    }

    pub fn all_item_ids(&self) -> HashSet<ItemId> {
        self.content_based
            .iter()
            .chain(self.personalized.iter())
            .chain(self.collaborative.iter())
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(pairs: &[(ItemId, f32)]) -> Vec<ScoredItem> {
        pairs.iter().map(|&(id, s)| ScoredItem::new(id, s)).collect()
    }

    #[test]
    fn test_normalize_by_source_max() {
        let normalized = normalize_scores(&scored(&[(1, 5.0), (2, 2.5)]));
        assert_eq!(normalized[&1], 1.0);
        assert_eq!(normalized[&2], 0.5);

        let zeros = normalize_scores(&scored(&[(1, 0.0), (2, 0.0)]));
        assert!(zeros.values().all(|v| *v == 0.0));

        let negative = normalize_scores(&scored(&[(1, -2.0), (2, -4.0)]));
        assert_eq!(negative[&1], 1.0);
        assert_eq!(negative[&2], 2.0);

        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_saturated_item_scores_one() {
        let combiner = HybridCombiner::default();
        let result = combiner.combine(
            &scored(&[(7, 4.8), (3, 4.0)]),
            &scored(&[(7, 3.0), (4, 1.0)]),
            &scored(&[(7, 12.0), (5, 6.0)]),
            10,
        );

        assert_eq!(result[0].item_id, 7);
        assert!((result[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_collaborative_only_scales_by_weight() {
        let combiner = HybridCombiner::default();
        let result = combiner.combine(&scored(&[(1, 4.0), (2, 5.0)]), &[], &[], 10);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].item_id, 2);
        assert!((result[0].score - 0.40).abs() < 1e-6);
        assert!((result[1].score - 0.40 * 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_union_ties_and_limit() {
        let combiner = HybridCombiner::default();
        let result = combiner.combine(&[], &scored(&[(9, 2.0)]), &scored(&[(3, 1.0)]), 10);
        let ids: Vec<ItemId> = result.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![3, 9]);

        let truncated = combiner.combine(&[], &scored(&[(9, 2.0)]), &scored(&[(3, 1.0)]), 1);
        assert_eq!(truncated.len(), 1);
        assert!(combiner.combine(&[], &[], &[], 5).is_empty());
    }

    #[test]
    fn test_items_credited_to_dominant_source() {
        let combiner = HybridCombiner::default();
        let result = combiner.combine_attributed(
            &scored(&[(1, 5.0), (2, 1.0)]),
            &scored(&[(2, 4.0), (3, 2.0)]),
            &scored(&[(3, 6.0)]),
            DEFAULT_LABELS,
            10,
        );

        let credited: Vec<(ItemId, RecommendationSource)> =
            result.iter().map(|a| (a.item.item_id, a.source)).collect();
        assert_eq!(
            credited,
            vec![
                (3, RecommendationSource::Personalized),
                (1, RecommendationSource::Collaborative),
                (2, RecommendationSource::Content),
            ]
        );

        let plain = combiner.combine(&scored(&[(1, 5.0), (2, 1.0)]), &scored(&[(2, 4.0), (3, 2.0)]), &scored(&[(3, 6.0)]), 10);
        assert_eq!(plain, result.iter().map(|a| a.item).collect::<Vec<_>>());
    }

    #[test]
    fn test_sections_deduplicate_in_priority_order() {
        let sections = RecommendationSections {
            content_based: vec![1, 2, 3],
            personalized: vec![1, 4, 5],
            collaborative: vec![2, 4, 6, 7],
        };

        let deduped = sections.deduplicate();
        assert_eq!(deduped.content_based, vec![1, 2, 3]);
        assert_eq!(deduped.personalized, vec![4, 5]);
        assert_eq!(deduped.collaborative, vec![6, 7]);
        assert_eq!(deduped.all_item_ids().len(), 7);
    }
}
