use crate::models::Grade;

/// Share of `max` held by `score`, in percent. Division happens in floating
/// point so that totals below the maximum never collapse to zero.
pub fn percentage(score: i64, max: i64) -> f64 {
    score as f64 / max as f64 * 100.0
}

pub fn grade(percentage: f64) -> Grade {
    match percentage {
        p if p > 69.0 => Grade::Excellent,
        p if p > 59.0 => Grade::Good,
        p if p > 49.0 => Grade::Fair,
        p if p > 40.0 => Grade::Pass,
        _ => Grade::Fail,
    }
}

/// Orders entries by score, highest first, and hands out positions `1..=n`.
///
/// Equal scores never share a position: the sort is stable, so whichever
/// entry came first in `entries` takes the better place.
pub fn rank_descending<K, S: Ord>(mut entries: Vec<(K, S)>) -> Vec<(K, S, usize)> {
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
        .into_iter()
        .enumerate()
        .map(|(index, (key, score))| (key, score, index + 1))
        .collect()
}
