use std::path::Path;

use anyhow::{bail, Context};

use crate::models::DailyObservation;

/// Days in one seasonal cycle; also the "recent" window for trend comparisons.
pub const WEEK: usize = 7;

// A day with no row counts as zero contamination events.
pub fn fill_missing_days(observations: &[DailyObservation]) -> Vec<f64> {
    let (Some(first), Some(last)) = (observations.first(), observations.last()) else {
        return Vec::new();
    };

    let span = (last.date - first.date).num_days().max(0) as usize + 1;
    let mut values = vec![0.0; span];

    for observation in observations {
        let offset = (observation.date - first.date).num_days();
        if offset >= 0 && (offset as usize) < span {
            values[offset as usize] = observation.count as f64;
        }
    }

    values
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn recent_mean(values: &[f64], window: usize) -> f64 {
    let start = values.len().saturating_sub(window);
    mean(&values[start..])
}

pub fn recent_total(values: &[f64], window: usize) -> f64 {
    let start = values.len().saturating_sub(window);
    values[start..].iter().sum()
}

/// Average of a per-day reported figure over the last `window` rows, skipping
/// days that recorded no events.
pub fn recent_reported_mean<F>(observations: &[DailyObservation], window: usize, field: F) -> f64
where
    F: Fn(&DailyObservation) -> Option<f64>,
{
    let start = observations.len().saturating_sub(window);
    let reported: Vec<f64> = observations[start..].iter().filter_map(field).collect();
    mean(&reported)
}

pub fn load_csv(csv_path: &Path) -> anyhow::Result<Vec<DailyObservation>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut observations = Vec::new();

    for result in reader.deserialize::<DailyObservation>() {
        let row = result.with_context(|| format!("malformed row in {}", csv_path.display()))?;
        if row.count < 0 {
            bail!("negative count {} on {}", row.count, row.date);
        }
        observations.push(row);
    }

    observations.sort_by_key(|observation| observation.date);
    if let Some(pair) = observations.windows(2).find(|pair| pair[0].date == pair[1].date) {
        bail!("duplicate observation for {}", pair[0].date);
    }

    Ok(observations)
}
