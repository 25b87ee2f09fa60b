use std::collections::HashMap;

/// Score assumed for an id that was never initialized
pub const DEFAULT_HEALTH: f64 = 0.5;
/// Score given to a freshly inserted beacon
pub const INITIAL_HEALTH: f64 = 1.0;
/// Each `touch` moves the score by `delta * TOUCH_SCALE`
pub const TOUCH_SCALE: f64 = 0.1;

/// Per-beacon health scores in [0, 1]
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    scores: HashMap<String, f64>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the monitor from a persisted `id -> score` map
    pub fn from_scores(scores: HashMap<String, f64>) -> Self {
        let scores = scores
            .into_iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(id, score)| (id, score.clamp(0.0, 1.0)))
            .collect();
        Self { scores }
    }

    pub fn initialize(&mut self, id: &str, score: f64) {
        self.scores.insert(id.to_string(), score.clamp(0.0, 1.0));
    }

    pub fn remove(&mut self, id: &str) -> Option<f64> {
        self.scores.remove(id)
    }

    pub fn score(&self, id: &str) -> f64 {
        self.scores.get(id).copied().unwrap_or(DEFAULT_HEALTH)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scores.contains_key(id)
    }

    /// Nudges a score; the result always stays in [0, 1]
    pub fn touch(&mut self, id: &str, delta: f64) -> f64 {
        let current = self.score(id);
        let next = if delta.is_finite() {
            (current + delta * TOUCH_SCALE).clamp(0.0, 1.0)
        } else {
            current
        };
        self.scores.insert(id.to_string(), next);
        next
    }

    /// Normalized entropy `-Σ h·ln(h) / ln(n)` over the tracked scores.
    ///
    /// `cache_size` is accepted for callers that pass the cache length, but the
    /// normalization uses the number of tracked scores.
    pub fn entropy(&self, _cache_size: usize) -> f64 {
        let count = self.scores.len();
        if count <= 1 {
            return 0.0;
        }
        let raw: f64 = self
            .scores
            .values()
            .filter(|&&h| h > 0.0)
            .map(|&h| -h * h.ln())
            .sum();
        raw / (count as f64).ln()
    }

    /// Ids scoring strictly below `threshold`, in no particular order
    pub fn low_health(&self, threshold: f64) -> Vec<String> {
        self.scores
            .iter()
            .filter(|(_, &score)| score < threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn decay_all(&mut self, rate: f64) {
        for score in self.scores.values_mut() {
            *score = (*score * rate).clamp(0.0, 1.0);
        }
    }

    pub fn average(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.values().sum::<f64>() / self.scores.len() as f64
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn export(&self) -> HashMap<String, f64> {
        self.scores.clone()
    }
}
