use crate::algorithms::{CollaborativeFiltering, RankingOptions};
use crate::error::RecResult;
use crate::models::{ItemId, RaterId, Rating};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub f1_score: f64,
    pub ndcg_at_k: f64,
    pub map_score: f64,
    pub coverage: f64,
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    k: usize,
}

impl MetricsCalculator {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn calculate_precision_at_k(&self, recommended: &[ItemId], relevant: &[ItemId]) -> f64 {
        if recommended.is_empty() || self.k == 0 {
            return 0.0;
        }

        let relevant_set: HashSet<_> = relevant.iter().collect();
        let relevant_recommended = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant_set.contains(item))
            .count();

        relevant_recommended as f64 / self.k.min(recommended.len()) as f64
    }

    pub fn calculate_recall_at_k(&self, recommended: &[ItemId], relevant: &[ItemId]) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let relevant_set: HashSet<_> = relevant.iter().collect();
        let relevant_recommended = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant_set.contains(item))
            .count();

        relevant_recommended as f64 / relevant.len() as f64
    }

    pub fn calculate_f1_score(&self, precision: f64, recall: f64) -> f64 {
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }

    pub fn calculate_ndcg_at_k(&self, recommended: &[ItemId], relevant_scores: &HashMap<ItemId, f64>) -> f64 {
        let dcg = self.calculate_dcg(recommended, relevant_scores);
        let idcg = self.calculate_ideal_dcg(relevant_scores);

        if idcg == 0.0 {
            0.0
        } else {
            dcg / idcg
        }
    }

    fn calculate_dcg(&self, recommended: &[ItemId], relevant_scores: &HashMap<ItemId, f64>) -> f64 {
        recommended
            .iter()
            .take(self.k)
            .enumerate()
            .map(|(i, item_id)| {
                let relevance = relevant_scores.get(item_id).unwrap_or(&0.0);
                relevance / ((i + 2) as f64).log2()
            })
            .sum()
    }

    fn calculate_ideal_dcg(&self, relevant_scores: &HashMap<ItemId, f64>) -> f64 {
        let mut scores: Vec<f64> = relevant_scores.values().cloned().collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        scores
            .iter()
            .take(self.k)
            .enumerate()
            .map(|(i, &score)| score / ((i + 2) as f64).log2())
            .sum()
    }

    pub fn calculate_average_precision(&self, recommended: &[ItemId], relevant: &[ItemId]) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let relevant_set: HashSet<_> = relevant.iter().collect();
        let mut relevant_found = 0;
        let mut precision_sum = 0.0;

        for (i, item) in recommended.iter().take(self.k).enumerate() {
            if relevant_set.contains(item) {
                relevant_found += 1;
                precision_sum += relevant_found as f64 / (i + 1) as f64;
            }
        }

        precision_sum / relevant.len().min(self.k).max(1) as f64
    }

    pub fn calculate_coverage(&self, recommended_items: &[ItemId], all_items: &[ItemId]) -> f64 {
        if all_items.is_empty() {
            return 0.0;
        }

        let recommended_set: HashSet<_> = recommended_items.iter().collect();
        let covered_items = all_items
            .iter()
            .filter(|item| recommended_set.contains(item))
            .count();

        covered_items as f64 / all_items.len() as f64
    }
}

/// Click-through and conversion over surfaced recommendations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnlineMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub purchases: u64,
    pub click_through_rate: f64,
    pub conversion_rate: f64,
}

impl OnlineMetrics {
    pub fn from_counts(impressions: u64, clicks: u64, purchases: u64) -> Self {
        Self {
            impressions,
            clicks,
            purchases,
            click_through_rate: if impressions > 0 {
                clicks as f64 / impressions as f64
            } else {
                0.0
            },
            conversion_rate: if clicks > 0 {
                purchases as f64 / clicks as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub raters_evaluated: usize,
    pub held_out: usize,
    pub metrics: RecommendationMetrics,
}

#[derive(Debug, Clone, Copy)]
pub struct HoldoutOptions {
    pub k_neighbors: usize,
    pub min_co_rated: usize,
    pub top_n: usize,
    pub min_score: f32,
    /// Held-out ratings at or above this score count as relevant.
    pub relevance_threshold: u8,
}

impl Default for HoldoutOptions {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            min_co_rated: 1,
            top_n: 5,
            min_score: 3.5,
            relevance_threshold: 4,
        }
    }
}

/// Leave-latest-out evaluation: each rater with at least two qualifying ratings has their
/// most recent one hidden, the engine is built from the rest, and the hidden item is
/// looked for in that rater's recommendations.
pub fn evaluate_holdout(ratings: &[Rating], options: HoldoutOptions) -> RecResult<EvaluationReport> {
    let mut by_rater: BTreeMap<RaterId, Vec<&Rating>> = BTreeMap::new();
    for rating in ratings.iter().filter(|r| r.enters_matrix()) {
        if let Some(rater) = rating.rater_id {
            by_rater.entry(rater).or_default().push(rating);
        }
    }

    let mut train: Vec<Rating> = Vec::with_capacity(ratings.len());
    let mut held_out: HashMap<RaterId, Rating> = HashMap::new();
    for (rater, mut rated) in by_rater {
        rated.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.item_id.cmp(&b.item_id)));
        if rated.len() >= 2 {
            if let Some(latest) = rated.pop() {
                held_out.insert(rater, latest.clone());
            }
        }
        train.extend(rated.into_iter().cloned());
    }

    let all_items: Vec<ItemId> = ratings
        .iter()
        .map(|r| r.item_id)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let engine = CollaborativeFiltering::build(&train, options.k_neighbors, options.min_co_rated, 0)?;
    let calculator = MetricsCalculator::new(options.top_n);
    let ranking = RankingOptions {
        min_score: options.min_score,
        limit: options.top_n,
    };

    let mut totals = RecommendationMetrics::default();
    let mut evaluated = 0usize;
    let mut surfaced: HashSet<ItemId> = HashSet::new();

    for (rater, hidden) in &held_out {
        if hidden.score < options.relevance_threshold {
            continue;
        }

        let seen: HashSet<ItemId> = engine.matrix().rated_items(*rater).into_iter().collect();
        let recommended: Vec<ItemId> = engine
            .recommend(*rater, &all_items, &seen, ranking)
            .into_iter()
            .map(|r| r.item_id)
            .collect();
        surfaced.extend(recommended.iter().copied());

        let relevant = vec![hidden.item_id];
        let relevance: HashMap<ItemId, f64> = [(hidden.item_id, 1.0)].into_iter().collect();

        let precision = calculator.calculate_precision_at_k(&recommended, &relevant);
        let recall = calculator.calculate_recall_at_k(&recommended, &relevant);
        totals.precision_at_k += precision;
        totals.recall_at_k += recall;
        totals.ndcg_at_k += calculator.calculate_ndcg_at_k(&recommended, &relevance);
        totals.map_score += calculator.calculate_average_precision(&recommended, &relevant);
        evaluated += 1;
    }

    if evaluated > 0 {
        let n = evaluated as f64;
        totals.precision_at_k /= n;
        totals.recall_at_k /= n;
        totals.ndcg_at_k /= n;
        totals.map_score /= n;
        totals.f1_score = calculator.calculate_f1_score(totals.precision_at_k, totals.recall_at_k);
    }
    let surfaced: Vec<ItemId> = surfaced.into_iter().collect();
    totals.coverage = calculator.calculate_coverage(&surfaced, &all_items);

    Ok(EvaluationReport {
        raters_evaluated: evaluated,
        held_out: held_out.len(),
        metrics: totals,
    })
}
