//! Multi-channel calibrated weight acquisition.
//!
//! Raw load-cell counts come from `hx <n>`; a batch of such reads is
//! transposed per channel, IQR-filtered and reduced to mean ± stdev. Physical
//! weight is `(raw − offset) / slope`, with all three terms carrying
//! uncertainty (see [`crate::uncertain`]).

use std::path::Path;

use serde::{Deserialize, Serialize};
use waterer_traits::Transport;

use crate::error::{Result, WatererError};
use crate::link::SerialLink;
use crate::stats::{OutlierFilter, filter_series, transpose};
use crate::uncertain::Uncertain;

#[derive(Debug, Clone, Copy)]
pub struct ScaleSettings {
    pub n_channels: usize,
    pub n_statistics: usize,
    pub n_arduino_samples: u32,
    pub err_limit: f64,
}

/// Per-channel statistics of raw counts.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStats {
    pub means: Vec<f64>,
    pub stdevs: Vec<f64>,
    pub n_filtered: Vec<usize>,
    pub n_unsuccessful: usize,
}

/// Per-channel physical weights.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightReading {
    pub weights: Vec<Uncertain>,
    pub n_filtered: Vec<usize>,
    pub n_unsuccessful: usize,
}

impl WeightReading {
    pub fn values(&self) -> Vec<f64> {
        self.weights.iter().map(|w| w.value).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub offsets: Vec<Uncertain>,
    pub slopes: Vec<Uncertain>,
}

/// On-disk calibration record.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    offsets: Vec<f64>,
    slopes: Vec<f64>,
    offsets_error: Vec<f64>,
    slopes_error: Vec<f64>,
}

/// Offsets cached between the two calibration phases.
#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetCache {
    pub offsets: Vec<f64>,
    pub offsets_error: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct CalibratedScale {
    cfg: ScaleSettings,
    offsets: Option<Vec<Uncertain>>,
    slopes: Option<Vec<Uncertain>>,
}

fn zip_uncertain(values: &[f64], errors: &[f64]) -> Vec<Uncertain> {
    values
        .iter()
        .zip(errors)
        .map(|(v, e)| Uncertain::new(*v, *e))
        .collect()
}

fn split_uncertain(xs: &[Uncertain]) -> (Vec<f64>, Vec<f64>) {
    xs.iter().map(|u| (u.value, u.stderr)).unzip()
}

impl CalibratedScale {
    pub fn new(cfg: ScaleSettings) -> Self {
        Self {
            cfg,
            offsets: None,
            slopes: None,
        }
    }

    pub fn settings(&self) -> &ScaleSettings {
        &self.cfg
    }

    pub fn n_channels(&self) -> usize {
        self.cfg.n_channels
    }

    pub fn is_calibrated(&self) -> bool {
        self.offsets.is_some() && self.slopes.is_some()
    }

    pub fn offsets(&self) -> Option<&[Uncertain]> {
        self.offsets.as_deref()
    }

    pub fn calibration(&self) -> Option<Calibration> {
        Some(Calibration {
            offsets: self.offsets.clone()?,
            slopes: self.slopes.clone()?,
        })
    }

    /// Install a calibration. Lengths must match the channel count and no
    /// slope may be zero.
    pub fn set_calibration(&mut self, cal: Calibration) -> Result<()> {
        let n = self.cfg.n_channels;
        if cal.offsets.len() != n || cal.slopes.len() != n {
            return Err(eyre::Report::new(WatererError::ChannelMismatch {
                expected: n,
                actual: cal.offsets.len().min(cal.slopes.len()),
            }));
        }
        if let Some(i) = cal.slopes.iter().position(|s| s.value == 0.0 || !s.is_finite()) {
            return Err(eyre::Report::new(WatererError::CalibrationRejected(format!(
                "slope of channel {i} is zero or not finite"
            ))));
        }
        self.offsets = Some(cal.offsets);
        self.slopes = Some(cal.slopes);
        Ok(())
    }

    /// Install offsets only (resuming a two-phase calibration).
    pub fn set_offsets(&mut self, offsets: Vec<Uncertain>) -> Result<()> {
        if offsets.len() != self.cfg.n_channels {
            return Err(eyre::Report::new(WatererError::ChannelMismatch {
                expected: self.cfg.n_channels,
                actual: offsets.len(),
            }));
        }
        self.offsets = Some(offsets);
        Ok(())
    }

    /// One `hx` read. `None` on transport failure or a wrong-length reply.
    pub fn read_raw<T: Transport>(&self, link: &mut SerialLink<T>) -> Option<Vec<f64>> {
        match link.cmd_hx(self.cfg.n_arduino_samples) {
            Ok(raw) if raw.len() == self.cfg.n_channels => Some(raw),
            Ok(raw) => {
                tracing::error!(
                    expected = self.cfg.n_channels,
                    got = raw.len(),
                    "scale returned wrong number of channels"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "scale read failed");
                None
            }
        }
    }

    /// `n` raw reads reduced to per-channel statistics.
    ///
    /// Failed reads are skipped and counted. `None` when no read succeeded.
    pub fn read_stats_raw<T: Transport>(
        &self,
        link: &mut SerialLink<T>,
        n: usize,
        filter: OutlierFilter,
    ) -> Option<RawStats> {
        let rows: Vec<Vec<f64>> = (0..n).filter_map(|_| self.read_raw(link)).collect();
        let n_unsuccessful = n - rows.len();
        if rows.is_empty() {
            tracing::error!(attempts = n, "no scale read succeeded");
            return None;
        }

        let series = transpose(&rows, self.cfg.n_channels);
        let mut out = RawStats {
            means: Vec::with_capacity(series.len()),
            stdevs: Vec::with_capacity(series.len()),
            n_filtered: Vec::with_capacity(series.len()),
            n_unsuccessful,
        };
        for s in &series {
            let st = filter_series(s, filter)?;
            out.means.push(st.mean);
            out.stdevs.push(st.stdev);
            out.n_filtered.push(st.n_dropped);
        }
        tracing::debug!(
            n_unsuccessful,
            n_filtered = ?out.n_filtered,
            "scale statistics"
        );
        Some(out)
    }

    /// Measure the unloaded scale and store it as the offset.
    ///
    /// Outlier filtering is off for this batch. Rejected, leaving the current
    /// calibration untouched, if any channel's error exceeds `err_limit`.
    pub fn calibrate_offset<T: Transport>(
        &mut self,
        link: &mut SerialLink<T>,
        n: usize,
        err_limit: f64,
    ) -> Result<()> {
        let stats = self
            .read_stats_raw(link, n, OutlierFilter::Disabled)
            .ok_or_else(|| eyre::Report::new(WatererError::NoSamples))?;
        if let Some((i, e)) = stats
            .stdevs
            .iter()
            .enumerate()
            .find(|(_, e)| **e > err_limit)
        {
            return Err(eyre::Report::new(WatererError::CalibrationRejected(format!(
                "offset error {e:.3} on channel {i} exceeds limit {err_limit}"
            ))));
        }
        self.offsets = Some(zip_uncertain(&stats.means, &stats.stdevs));
        tracing::info!(offsets = ?stats.means, errors = ?stats.stdevs, "offset calibrated");
        Ok(())
    }

    /// Measure the scale under `known` loads and derive the slope
    /// `(raw − offset) / known` per channel.
    pub fn calibrate_slope<T: Transport>(
        &mut self,
        link: &mut SerialLink<T>,
        known: &[Uncertain],
        n: usize,
        err_limit: f64,
    ) -> Result<()> {
        let offsets = self
            .offsets
            .clone()
            .ok_or_else(|| eyre::Report::new(WatererError::NotCalibrated))?;
        if known.len() != self.cfg.n_channels {
            return Err(eyre::Report::new(WatererError::ChannelMismatch {
                expected: self.cfg.n_channels,
                actual: known.len(),
            }));
        }
        if let Some(i) = known.iter().position(|k| k.value == 0.0) {
            return Err(eyre::Report::new(WatererError::CalibrationRejected(format!(
                "known weight of channel {i} is zero"
            ))));
        }
        let stats = self
            .read_stats_raw(link, n, OutlierFilter::default())
            .ok_or_else(|| eyre::Report::new(WatererError::NoSamples))?;

        let slopes: Vec<Uncertain> = zip_uncertain(&stats.means, &stats.stdevs)
            .into_iter()
            .zip(offsets.iter().zip(known))
            .map(|(raw, (off, k))| (raw - *off) / *k)
            .collect();
        if let Some((i, s)) = slopes
            .iter()
            .enumerate()
            .find(|(_, s)| s.stderr.is_nan() || s.stderr > err_limit || s.value == 0.0)
        {
            return Err(eyre::Report::new(WatererError::CalibrationRejected(format!(
                "slope {s:.4} on channel {i} is zero or its error exceeds limit {err_limit}"
            ))));
        }
        tracing::info!(slopes = ?slopes.iter().map(|s| s.value).collect::<Vec<_>>(), "slope calibrated");
        self.slopes = Some(slopes);
        Ok(())
    }

    /// Convert raw statistics to weights using the current calibration.
    pub fn convert(&self, raw: &RawStats) -> Result<WeightReading> {
        let (Some(offsets), Some(slopes)) = (&self.offsets, &self.slopes) else {
            return Err(eyre::Report::new(WatererError::NotCalibrated));
        };
        let weights = zip_uncertain(&raw.means, &raw.stdevs)
            .into_iter()
            .zip(offsets.iter().zip(slopes))
            .map(|(r, (o, s))| (r - *o) / *s)
            .collect();
        Ok(WeightReading {
            weights,
            n_filtered: raw.n_filtered.clone(),
            n_unsuccessful: raw.n_unsuccessful,
        })
    }

    /// Filtered weights from `n` reads.
    ///
    /// `Err(NotCalibrated)` before calibration; `Ok(None)` when the batch
    /// produced no usable samples.
    pub fn read_stats<T: Transport>(
        &self,
        link: &mut SerialLink<T>,
        n: usize,
    ) -> Result<Option<WeightReading>> {
        if !self.is_calibrated() {
            return Err(eyre::Report::new(WatererError::NotCalibrated));
        }
        match self.read_stats_raw(link, n, OutlierFilter::default()) {
            Some(raw) => self.convert(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Load calibration from `path`. A missing file or a record for a
    /// different channel count is treated as "no calibration".
    pub fn load(&mut self, path: &Path) -> Result<bool> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no saved calibration");
                return Ok(false);
            }
            Err(e) => return Err(eyre::Report::new(WatererError::Io(e.to_string()))),
        };
        let file: CalibrationFile = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable calibration ignored");
                return Ok(false);
            }
        };
        let n = self.cfg.n_channels;
        if [
            file.offsets.len(),
            file.slopes.len(),
            file.offsets_error.len(),
            file.slopes_error.len(),
        ]
        .iter()
        .any(|l| *l != n)
        {
            tracing::warn!(path = %path.display(), expected = n, "calibration is for a different channel count, ignored");
            return Ok(false);
        }
        self.set_calibration(Calibration {
            offsets: zip_uncertain(&file.offsets, &file.offsets_error),
            slopes: zip_uncertain(&file.slopes, &file.slopes_error),
        })?;
        tracing::info!(path = %path.display(), "calibration loaded");
        Ok(true)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let cal = self
            .calibration()
            .ok_or_else(|| eyre::Report::new(WatererError::NotCalibrated))?;
        let (offsets, offsets_error) = split_uncertain(&cal.offsets);
        let (slopes, slopes_error) = split_uncertain(&cal.slopes);
        let file = CalibrationFile {
            offsets,
            slopes,
            offsets_error,
            slopes_error,
        };
        crate::store::write_json(path, &file)
    }

    pub fn offset_cache(&self) -> Option<OffsetCache> {
        let (offsets, offsets_error) = split_uncertain(self.offsets.as_deref()?);
        Some(OffsetCache {
            offsets,
            offsets_error,
        })
    }

    pub fn apply_offset_cache(&mut self, cache: &OffsetCache) -> Result<()> {
        self.set_offsets(zip_uncertain(&cache.offsets, &cache.offsets_error))
    }
}

/// Parse operator input of known loads: `(w1, w2, ...)-err`, one weight per
/// channel and a shared absolute error.
pub fn parse_known_weights(input: &str, n_channels: usize) -> Result<Vec<Uncertain>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    // The error may itself carry a '-' in exponent form, e.g. `1e-3`.
    let Some((weights, err)) = cleaned
        .strip_prefix('(')
        .and_then(|rest| rest.rsplit_once(")-"))
    else {
        eyre::bail!("expected '(w1,w2,...)-err', got '{input}'");
    };
    let err: f64 = err
        .parse()
        .map_err(|_| eyre::eyre!("weight error '{err}' is not a number"))?;
    let weights = weights
        .split(',')
        .map(|w| {
            w.parse::<f64>()
                .map_err(|_| eyre::eyre!("weight '{w}' is not a number"))
        })
        .collect::<Result<Vec<f64>>>()?;
    if weights.len() != n_channels {
        return Err(eyre::Report::new(WatererError::ChannelMismatch {
            expected: n_channels,
            actual: weights.len(),
        }));
    }
    Ok(weights.into_iter().map(|w| Uncertain::new(w, err)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkCfg;
    use crate::mocks::ScriptedTransport;
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::Duration;
    use waterer_traits::clock::test_clock::TestClock;

    fn settings(n: usize) -> ScaleSettings {
        ScaleSettings {
            n_channels: n,
            n_statistics: 4,
            n_arduino_samples: 10,
            err_limit: 1.0,
        }
    }

    fn link(t: ScriptedTransport) -> SerialLink<ScriptedTransport> {
        let cfg = LinkCfg {
            delay: Duration::ZERO,
            long_timeout: Duration::from_millis(50),
            n_retries: 1,
            hx_n_ttl: Duration::from_secs(1),
        };
        SerialLink::new(t, cfg, Arc::new(TestClock::new()))
    }

    #[test]
    fn weight_conversion_matches_reference() {
        let mut sc = CalibratedScale::new(settings(1));
        sc.set_calibration(Calibration {
            offsets: vec![Uncertain::new(10.0, 0.1)],
            slopes: vec![Uncertain::new(2.0, 0.01)],
        })
        .unwrap();
        let raw = RawStats {
            means: vec![30.0],
            stdevs: vec![0.2],
            n_filtered: vec![0],
            n_unsuccessful: 0,
        };
        let w = sc.convert(&raw).unwrap().weights[0];
        // d = raw − offset = 20 ± √(0.2² + 0.1²); w = d / slope
        let d_err = (0.2f64.powi(2) + 0.1f64.powi(2)).sqrt();
        let reference = ((d_err / 2.0).powi(2) + (20.0f64 * 0.01 / 4.0).powi(2)).sqrt();
        assert!((w.value - 10.0).abs() < 1e-12);
        assert!((w.stderr - reference).abs() < 1e-12);
        assert!((w.stderr - 0.015f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn read_stats_requires_calibration() {
        let sc = CalibratedScale::new(settings(2));
        let mut l = link(ScriptedTransport::new());
        let err = sc.read_stats(&mut l, 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatererError>(),
            Some(WatererError::NotCalibrated)
        ));
    }

    #[test]
    fn wrong_length_reads_count_as_unsuccessful() {
        let t = ScriptedTransport::new()
            .reply("hx 10", &["rcv", "[1.0, 2.0]"])
            .reply("hx 10", &["rcv", "[1.0]"])
            .reply("hx 10", &["rcv", "[3.0, 4.0]"]);
        let sc = CalibratedScale::new(settings(2));
        let mut l = link(t);
        let st = sc.read_stats_raw(&mut l, 4, OutlierFilter::default()).unwrap();
        assert_eq!(st.n_unsuccessful, 2);
        assert_eq!(st.means, vec![2.0, 3.0]);
    }

    #[test]
    fn no_successful_read_fails() {
        let sc = CalibratedScale::new(settings(1));
        let mut l = link(ScriptedTransport::new());
        assert!(sc.read_stats_raw(&mut l, 3, OutlierFilter::default()).is_none());
    }

    #[test]
    fn offset_rejected_when_noisy_keeps_previous() {
        let t = ScriptedTransport::new()
            .reply("hx 10", &["rcv", "[100.0]"])
            .reply("hx 10", &["rcv", "[110.0]"]);
        let mut sc = CalibratedScale::new(settings(1));
        sc.set_offsets(vec![Uncertain::new(1.0, 0.0)]).unwrap();
        let mut l = link(t);
        let err = sc.calibrate_offset(&mut l, 2, 1.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatererError>(),
            Some(WatererError::CalibrationRejected(_))
        ));
        assert_eq!(sc.offsets().unwrap()[0], Uncertain::new(1.0, 0.0));
    }

    #[test]
    fn slope_needs_offset_first() {
        let mut sc = CalibratedScale::new(settings(1));
        let mut l = link(ScriptedTransport::new());
        assert!(sc.calibrate_slope(&mut l, &[Uncertain::exact(100.0)], 2, 1.0).is_err());
        assert!(l.transport().sent().is_empty());
    }

    #[test]
    fn two_phase_calibration() {
        let t = ScriptedTransport::new()
            .reply("hx 10", &["rcv", "[1000.0]"])
            .reply("hx 10", &["rcv", "[1000.0]"])
            .always("hx 10", &["rcv", "[3000.0]"]);
        let mut sc = CalibratedScale::new(settings(1));
        let mut l = link(t);
        sc.calibrate_offset(&mut l, 2, 1.0).unwrap();
        sc.calibrate_slope(&mut l, &[Uncertain::new(100.0, 0.1)], 4, 1.0)
            .unwrap();
        let cal = sc.calibration().unwrap();
        assert_eq!(cal.offsets[0].value, 1000.0);
        assert!((cal.slopes[0].value - 20.0).abs() < 1e-12);
        // only the known-weight error contributes: 2000·0.1/100²
        assert!((cal.slopes[0].stderr - 0.02).abs() < 1e-12);
    }

    #[test]
    fn save_and_load_round_trip_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        let mut sc = CalibratedScale::new(settings(2));
        let cal = Calibration {
            offsets: vec![Uncertain::new(1.0, 0.1), Uncertain::new(2.0, 0.2)],
            slopes: vec![Uncertain::new(3.0, 0.3), Uncertain::new(4.0, 0.4)],
        };
        sc.set_calibration(cal.clone()).unwrap();
        sc.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["offsets_error"][1], 0.2);

        let mut again = CalibratedScale::new(settings(2));
        assert!(again.load(&path).unwrap());
        assert_eq!(again.calibration().unwrap(), cal);

        let mut other = CalibratedScale::new(settings(3));
        assert!(!other.load(&path).unwrap());
        assert!(!other.is_calibrated());
    }

    #[rstest]
    #[case("(100, 250.5)-0.5", &[100.0, 250.5], 0.5)]
    #[case("(100,200)-1e-3", &[100.0, 200.0], 1e-3)]
    #[case(" ( 50 , 2.5e2 ) - 2 ", &[50.0, 250.0], 2.0)]
    fn parses_operator_weights(#[case] input: &str, #[case] values: &[f64], #[case] err: f64) {
        let w = parse_known_weights(input, values.len()).unwrap();
        let expected: Vec<Uncertain> = values.iter().map(|&v| Uncertain::new(v, err)).collect();
        assert_eq!(w, expected);
    }

    #[rstest]
    #[case("(100)-0.5")]
    #[case("100,200")]
    #[case("100,200-0.5")]
    #[case("(100,200)")]
    #[case("(100,x)-0.5")]
    fn rejects_malformed_operator_weights(#[case] input: &str) {
        assert!(parse_known_weights(input, 2).is_err());
    }
}
