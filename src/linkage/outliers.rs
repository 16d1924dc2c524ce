use super::matcher::MatchTally;
use std::collections::HashSet;

/// Z-score threshold above which a term counts as predominant rather than
/// incidental.
const OUTLIER_Z_SCORE: f64 = 2.0;

/// Selects the statistical outliers from a match tally: terms whose count
/// sits more than two population standard deviations above the mean.
///
/// A zero-variance tally (all counts equal, including a single-term tally)
/// has no defined z-score; it is treated as having no outliers rather than
/// dividing by zero.
pub fn outlier_terms(tally: &MatchTally) -> HashSet<String> {
    if tally.is_empty() {
        return HashSet::new();
    }

    let n = tally.len() as f64;
    let mean = tally.values().map(|&c| c as f64).sum::<f64>() / n;
    let variance = tally
        .values()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return HashSet::new();
    }

    tally
        .iter()
        .filter(|(_, &count)| (count as f64 - mean) / std_dev > OUTLIER_Z_SCORE)
        .map(|(term, _)| term.clone())
        .collect()
}
