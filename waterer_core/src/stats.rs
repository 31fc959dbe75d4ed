//! Batch statistics for repeated multi-channel scale reads.

/// Multiplier on the interquartile range used for outlier fences.
pub const IQR_FENCE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutlierFilter {
    /// Keep samples inside `[Q1 − k·IQR, Q3 + k·IQR]`.
    Iqr { k: f64 },
    /// Keep every sample.
    Disabled,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::Iqr { k: IQR_FENCE }
    }
}

/// Summary of one channel's series after filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub mean: f64,
    pub stdev: f64,
    pub n_dropped: usize,
    pub n_kept: usize,
}

/// Turn `rows[sample][channel]` into `series[channel][sample]`.
///
/// Every row must have `n_channels` entries; callers discard short rows
/// before transposing.
pub fn transpose(rows: &[Vec<f64>], n_channels: usize) -> Vec<Vec<f64>> {
    let mut out = vec![Vec::with_capacity(rows.len()); n_channels];
    for row in rows {
        for (series, v) in out.iter_mut().zip(row) {
            series.push(*v);
        }
    }
    out
}

/// Mean and sample standard deviation (n − 1). A single sample has stdev 0.
pub fn mean_stdev(xs: &[f64]) -> Option<(f64, f64)> {
    if xs.is_empty() {
        return None;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    if xs.len() == 1 {
        return Some((mean, 0.0));
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

/// First and third quartile of an ascending slice, by nearest lower rank
/// (`sorted[n/4]`, `sorted[3n/4]`).
pub fn quartiles(sorted: &[f64]) -> Option<(f64, f64)> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    Some((sorted[n / 4], sorted[(3 * n / 4).min(n - 1)]))
}

/// Filter one channel's series and summarize what survives.
///
/// If the fences would reject every sample the whole series is kept instead.
pub fn filter_series(series: &[f64], filter: OutlierFilter) -> Option<SeriesStats> {
    let kept: Vec<f64> = match filter {
        OutlierFilter::Disabled => series.to_vec(),
        OutlierFilter::Iqr { k } => {
            let mut sorted = series.to_vec();
            sorted.sort_by(f64::total_cmp);
            let (q1, q3) = quartiles(&sorted)?;
            let iqr = q3 - q1;
            let (lo, hi) = (q1 - k * iqr, q3 + k * iqr);
            let inside: Vec<f64> = series
                .iter()
                .copied()
                .filter(|v| (lo..=hi).contains(v))
                .collect();
            if inside.is_empty() {
                series.to_vec()
            } else {
                inside
            }
        }
    };
    let (mean, stdev) = mean_stdev(&kept)?;
    Some(SeriesStats {
        mean,
        stdev,
        n_dropped: series.len() - kept.len(),
        n_kept: kept.len(),
    })
}
