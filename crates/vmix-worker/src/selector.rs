//! Greedy clip selection.
//!
//! Candidates are ranked once, then accepted in rank order by up to three
//! passes that loosen the rules step by step:
//!
//! 1. qualifying candidates, diversity enforced;
//! 2. qualifying candidates, diversity relaxed;
//! 3. fallback: any remaining candidate within the hard limits.
//!
//! Later passes only run while the total is still below `target − tolerance`.
//! Each pass walks the whole ranking and takes every candidate that still fits
//! under `target + tolerance`. Acceptance order is the output order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use vmix_models::{ScoredSegment, SelectionConstraints, SourceId, TextHandlingMode, DURATION_EPSILON};

/// Outcome of a selection.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Accepted segments in play order
    pub segments: Vec<ScoredSegment>,
    pub total_duration: f64,
    /// The second pass placed at least one segment
    pub diversity_relaxed: bool,
    /// The fallback pass placed at least one segment
    pub fallback_used: bool,
    /// Total is below `target − tolerance`
    pub insufficient_content: bool,
}

impl Selection {
    /// Number of neighbouring segments sharing a source.
    pub fn adjacent_repeats(&self) -> usize {
        self.segments
            .windows(2)
            .filter(|w| w[0].source() == w[1].source())
            .count()
    }

    /// Accepted segments per source.
    pub fn accepted_per_source(&self) -> HashMap<SourceId, usize> {
        let mut counts = HashMap::new();
        for s in &self.segments {
            *counts.entry(s.source()).or_insert(0) += 1;
        }
        counts
    }
}

/// Rules of one pass.
#[derive(Debug, Clone, Copy)]
struct PassRules {
    diversity: bool,
    qualifying_only: bool,
}

/// Ranking order: score descending, then shorter, then earlier, then lower source id.
pub fn rank_order(a: &ScoredSegment, b: &ScoredSegment) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.duration().total_cmp(&b.duration()))
        .then_with(|| a.segment.start().total_cmp(&b.segment.start()))
        .then_with(|| a.source().cmp(&b.source()))
}

/// Picks and orders segments under [`SelectionConstraints`].
#[derive(Debug, Clone)]
pub struct ClipSelector {
    constraints: SelectionConstraints,
}

struct SelectionState<'a> {
    ranked: &'a [ScoredSegment],
    taken: Vec<bool>,
    order: Vec<usize>,
    total: f64,
    per_source: HashMap<SourceId, usize>,
}

impl<'a> SelectionState<'a> {
    fn new(ranked: &'a [ScoredSegment]) -> Self {
        Self {
            ranked,
            taken: vec![false; ranked.len()],
            order: Vec::new(),
            total: 0.0,
            per_source: HashMap::new(),
        }
    }

    fn last_source(&self) -> Option<SourceId> {
        self.order.last().map(|&i| self.ranked[i].source())
    }

    fn overlaps_accepted(&self, candidate: &ScoredSegment) -> bool {
        self.order
            .iter()
            .any(|&i| self.ranked[i].segment.overlaps(&candidate.segment))
    }

    fn accept(&mut self, index: usize) {
        let candidate = &self.ranked[index];
        self.taken[index] = true;
        self.order.push(index);
        self.total += candidate.duration();
        *self.per_source.entry(candidate.source()).or_insert(0) += 1;
    }
}

impl ClipSelector {
    pub fn new(constraints: SelectionConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &SelectionConstraints {
        &self.constraints
    }

    /// Whether a candidate may be placed by the first two passes.
    fn qualifies(&self, candidate: &ScoredSegment) -> bool {
        let c = &self.constraints;
        let text_ok = c.text_handling != TextHandlingMode::Avoid
            || candidate.score.text_penalty <= c.text_ceiling + DURATION_EPSILON;
        text_ok && candidate.score() + DURATION_EPSILON >= c.min_score
    }

    fn feasible(&self, state: &SelectionState<'_>, index: usize, rules: PassRules) -> bool {
        let c = &self.constraints;
        let candidate = &state.ranked[index];

        if state.total + candidate.duration() > c.upper_bound() + DURATION_EPSILON {
            return false;
        }
        if rules.diversity && state.last_source() == Some(candidate.source()) {
            return false;
        }
        if rules.qualifying_only {
            if !self.qualifies(candidate) {
                return false;
            }
            if let Some(cap) = c.max_clips_per_source {
                if state.per_source.get(&candidate.source()).copied().unwrap_or(0) >= cap {
                    return false;
                }
            }
        }
        !state.overlaps_accepted(candidate)
    }

    /// Accept the best feasible candidate until none fits or the count cap is hit.
    /// Returns how many were accepted.
    fn run_pass(&self, state: &mut SelectionState<'_>, rules: PassRules) -> usize {
        let c = &self.constraints;
        let mut accepted = 0;

        while state.order.len() < c.max_clip_count {
            let view: &SelectionState<'_> = state;
            let next = (0..view.ranked.len()).find(|&i| !view.taken[i] && self.feasible(view, i, rules));
            match next {
                Some(index) => {
                    state.accept(index);
                    accepted += 1;
                }
                None => break,
            }
        }
        accepted
    }

    fn is_short(&self, state: &SelectionState<'_>) -> bool {
        state.total + DURATION_EPSILON < self.constraints.lower_bound()
    }

    /// Select and order segments from every source's candidates.
    ///
    /// Deterministic: the result depends only on the candidate set, not on
    /// the order it is given in.
    pub fn select(&self, candidates: Vec<ScoredSegment>) -> Selection {
        let c = &self.constraints;

        let mut ranked: Vec<ScoredSegment> = candidates
            .into_iter()
            .filter(|s| c.accepts_clip_length(s.duration()))
            .collect();
        ranked.sort_by(rank_order);

        let sources: BTreeSet<SourceId> = ranked.iter().map(|s| s.source()).collect();
        let diversity = c.diversity && sources.len() >= 2;

        let mut state = SelectionState::new(&ranked);
        let first = self.run_pass(
            &mut state,
            PassRules {
                diversity,
                qualifying_only: true,
            },
        );

        let mut relaxed = 0;
        if diversity && self.is_short(&state) {
            relaxed = self.run_pass(
                &mut state,
                PassRules {
                    diversity: false,
                    qualifying_only: true,
                },
            );
        }

        let mut fallback = 0;
        if self.is_short(&state) {
            fallback = self.run_pass(
                &mut state,
                PassRules {
                    diversity: false,
                    qualifying_only: false,
                },
            );
        }

        debug!(
            candidates = ranked.len(),
            sources = sources.len(),
            first,
            relaxed,
            fallback,
            total = state.total,
            "Selection passes finished"
        );

        let insufficient_content = self.is_short(&state);
        let total_duration = state.total;
        let segments = state.order.iter().map(|&i| ranked[i].clone()).collect();

        Selection {
            segments,
            total_duration,
            diversity_relaxed: relaxed > 0,
            fallback_used: fallback > 0,
            insufficient_content,
        }
    }
}
