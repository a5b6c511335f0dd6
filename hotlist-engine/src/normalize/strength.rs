//! Comparable strength scores.
//!
//! Every platform ranks by something different (seal order size, heat score,
//! pct change), so raw metrics are not comparable. Strength rescales each
//! snapshot's metric linearly so the top entity scores 1.0 and the bottom
//! entity 0.0.

/// One input to [`assign`]: the entity's rank and optional metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthInput {
    pub rank_position: u32,
    pub rank_metric: Option<f64>,
}

/// How a batch of strengths was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrengthBasis {
    /// Linear in the source metric
    Metric,
    /// Linear in rank order
    Rank,
}

/// Compute strengths for entities already sorted by rank ascending.
///
/// Falls back to rank order when any metric is missing or the top metric
/// does not exceed the bottom one.
pub fn assign(inputs: &[StrengthInput]) -> (Vec<f64>, StrengthBasis) {
    let (Some(first), Some(last)) = (inputs.first(), inputs.last()) else {
        return (Vec::new(), StrengthBasis::Metric);
    };
    if inputs.len() == 1 {
        return (vec![1.0], StrengthBasis::Metric);
    }

    let metrics: Option<Vec<f64>> = inputs.iter().map(|i| i.rank_metric).collect();
    if let Some(metrics) = metrics {
        let (top, bottom) = (metrics[0], metrics[metrics.len() - 1]);
        if top > bottom {
            let span = top - bottom;
            let scores = metrics
                .iter()
                .map(|m| ((m - bottom) / span).clamp(0.0, 1.0))
                .collect();
            return (scores, StrengthBasis::Metric);
        }
    }

    let (r0, rn) = (f64::from(first.rank_position), f64::from(last.rank_position));
    let scores = inputs
        .iter()
        .map(|i| {
            if rn > r0 {
                (1.0 - (f64::from(i.rank_position) - r0) / (rn - r0)).clamp(0.0, 1.0)
            } else {
                1.0
            }
        })
        .collect();
    (scores, StrengthBasis::Rank)
}
