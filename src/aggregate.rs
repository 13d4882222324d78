use std::cmp::Ordering;

use indexmap::IndexMap;

/// One accumulated measure per aggregation key (user login, repository name).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: String,
    pub value: f64,
}

/// Count records per key. Output holds exactly one row per distinct key,
/// sorted by count descending.
pub fn count_by<R>(records: &[R], key_fn: impl Fn(&R) -> &str) -> Vec<AggregateRow> {
    sum_by(records, key_fn, |_| 1.0)
}

/// Sum a measure per key. Output holds exactly one row per distinct key,
/// sorted by total descending. Ties keep first-seen order (stable sort over
/// an insertion-ordered map).
pub fn sum_by<R>(
    records: &[R],
    key_fn: impl Fn(&R) -> &str,
    measure_fn: impl Fn(&R) -> f64,
) -> Vec<AggregateRow> {
    let mut totals: IndexMap<String, f64> = IndexMap::new();
    for record in records {
        *totals.entry(key_fn(record).to_string()).or_insert(0.0) += measure_fn(record);
    }

    sorted_rows(totals)
}

/// Average a measure per key, for metrics like time-to-close where the
/// stored value is the mean over that key's records rather than the total.
pub fn mean_by<R>(
    records: &[R],
    key_fn: impl Fn(&R) -> &str,
    measure_fn: impl Fn(&R) -> f64,
) -> Vec<AggregateRow> {
    let mut totals: IndexMap<String, (f64, u64)> = IndexMap::new();
    for record in records {
        let entry = totals.entry(key_fn(record).to_string()).or_insert((0.0, 0));
        entry.0 += measure_fn(record);
        entry.1 += 1;
    }

    let means = totals
        .into_iter()
        .map(|(key, (total, count))| (key, total / count as f64))
        .collect();

    sorted_rows(means)
}

fn sorted_rows(totals: IndexMap<String, f64>) -> Vec<AggregateRow> {
    let mut rows: Vec<AggregateRow> = totals
        .into_iter()
        .map(|(key, value)| AggregateRow { key, value })
        .collect();

    rows.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal));
    rows
}
