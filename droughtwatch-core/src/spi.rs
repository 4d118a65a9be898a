//! Standardized Precipitation Index (SPI)
//!
//! Fits a two-parameter gamma distribution to historical 6-month precipitation
//! totals and scores the current window through the inverse standard normal CDF.
//!
//! Global invariants enforced:
//! - A successful result is always finite
//! - Zero-precipitation windows are handled by a mixed discrete/continuous model
//! - The same series always yields the same fit and the same SPI

use crate::error::{CoreError, Result};
use crate::precipitation::PrecipitationSeries;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Aggregation window (months) for the SPI
pub const SPI_WINDOW_MONTHS: usize = 6;

/// Historical windows (excluding the current one) required for a stable fit
pub const MIN_HISTORICAL_WINDOWS: usize = 24;

/// Calendar months of data required for a fit
pub const MIN_HISTORY_MONTHS: usize = SPI_WINDOW_MONTHS + MIN_HISTORICAL_WINDOWS;

/// Positive historical totals required to estimate the gamma shape
const MIN_POSITIVE_WINDOWS: usize = 6;

/// Probability clamp keeping the inverse normal finite
const PROBABILITY_FLOOR: f64 = 1e-6;

const MAX_ITERATIONS: usize = 500;
const CONVERGENCE_EPSILON: f64 = 1e-14;
const TINY: f64 = 1e-300;

/// Fitted mixed gamma distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GammaFit {
    /// Shape parameter
    pub alpha: f64,
    /// Scale parameter
    pub beta: f64,
    /// Share of historical windows with zero precipitation
    pub zero_probability: f64,
    pub sample_size: usize,
}

impl GammaFit {
    /// Mixed CDF: `q + (1 - q) * G(x)`
    pub fn cdf(&self, total: f64) -> f64 {
        if total <= 0.0 {
            return self.zero_probability;
        }
        let g = regularized_lower_gamma(self.alpha, total / self.beta);
        self.zero_probability + (1.0 - self.zero_probability) * g
    }

    /// SPI for a window total under this fit
    pub fn spi(&self, total: f64) -> f64 {
        let p = self.cdf(total).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
        inverse_standard_normal(p)
    }
}

/// SPI for the current window of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpiResult {
    pub spi: f64,
    /// First day of the last month in the current window
    pub window_end: NaiveDate,
    pub window_total_mm: f64,
    pub cumulative_probability: f64,
    pub fit: GammaFit,
}

/// SPI value at a window end month
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpiPoint {
    pub date: NaiveDate,
    pub spi: f64,
}

/// Compute the SPI for the most recent window of the series
pub fn calculate_spi(series: &PrecipitationSeries) -> Result<SpiResult> {
    let windows = window_totals(series)?;
    let fit = fit_history(&series.zone_id, &windows)?;
    let (window_end, total) = windows[windows.len() - 1];
    let result = SpiResult {
        spi: fit.spi(total),
        window_end,
        window_total_mm: total,
        cumulative_probability: fit.cdf(total),
        fit,
    };
    debug!(
        zone = %series.zone_id,
        spi = result.spi,
        alpha = fit.alpha,
        beta = fit.beta,
        q = fit.zero_probability,
        "computed SPI"
    );
    Ok(result)
}

/// SPI for each of the last `points` window end-months, oldest first
///
/// All points are scored against a single fit so the history is comparable.
pub fn spi_history(series: &PrecipitationSeries, points: usize) -> Result<Vec<SpiPoint>> {
    let windows = window_totals(series)?;
    let fit = fit_history(&series.zone_id, &windows)?;
    let skip = windows.len().saturating_sub(points);
    Ok(windows[skip..]
        .iter()
        .map(|&(date, total)| SpiPoint {
            date,
            spi: fit.spi(total),
        })
        .collect())
}

/// Fit on every window except the current (last) one
fn fit_history(zone_id: &str, windows: &[(NaiveDate, f64)]) -> Result<GammaFit> {
    let historical_count = windows.len().saturating_sub(1);
    if historical_count < MIN_HISTORICAL_WINDOWS {
        return Err(CoreError::InsufficientData {
            zone_id: zone_id.to_string(),
            reason: "precipitation history shorter than minimum".to_string(),
            available: windows.len() + SPI_WINDOW_MONTHS.saturating_sub(1),
            required: MIN_HISTORY_MONTHS,
        });
    }
    let historical: Vec<f64> = windows[..historical_count].iter().map(|w| w.1).collect();
    fit_gamma(&historical).ok_or_else(|| CoreError::InsufficientData {
        zone_id: zone_id.to_string(),
        reason: "historical totals have too few wet windows or no variability".to_string(),
        available: historical.iter().filter(|&&t| t > 0.0).count(),
        required: MIN_POSITIVE_WINDOWS,
    })
}

/// Fit a mixed gamma distribution (Thom's maximum likelihood approximation)
///
/// Returns None when the positive totals cannot support a fit.
pub fn fit_gamma(totals: &[f64]) -> Option<GammaFit> {
    let positive: Vec<f64> = totals.iter().copied().filter(|&t| t > 0.0).collect();
    if positive.len() < MIN_POSITIVE_WINDOWS {
        return None;
    }
    let n = positive.len() as f64;
    let mean = positive.iter().sum::<f64>() / n;
    let mean_ln = positive.iter().map(|t| t.ln()).sum::<f64>() / n;
    let a = mean.ln() - mean_ln;
    if !a.is_finite() || a <= 1e-12 {
        return None;
    }
    let alpha = (1.0 + (1.0 + 4.0 * a / 3.0).sqrt()) / (4.0 * a);
    let beta = mean / alpha;
    Some(GammaFit {
        alpha,
        beta,
        zero_probability: (totals.len() - positive.len()) as f64 / totals.len() as f64,
        sample_size: totals.len(),
    })
}

/// Rolling window totals, each tagged with the window's last month
fn window_totals(series: &PrecipitationSeries) -> Result<Vec<(NaiveDate, f64)>> {
    let months = monthly_totals(series)?;
    if months.len() < SPI_WINDOW_MONTHS {
        return Err(CoreError::InsufficientData {
            zone_id: series.zone_id.clone(),
            reason: "series shorter than the aggregation window".to_string(),
            available: months.len(),
            required: MIN_HISTORY_MONTHS,
        });
    }
    Ok(months
        .windows(SPI_WINDOW_MONTHS)
        .map(|w| (w[w.len() - 1].0, w.iter().map(|m| m.1).sum()))
        .collect())
}

/// Calendar-month totals across the series span; empty months count as zero
pub fn monthly_totals(series: &PrecipitationSeries) -> Result<Vec<(NaiveDate, f64)>> {
    for obs in &series.observations {
        if !obs.amount_mm.is_finite() || obs.amount_mm < 0.0 {
            return Err(CoreError::MalformedSeries {
                zone_id: series.zone_id.clone(),
                reason: format!("invalid amount {} on {}", obs.amount_mm, obs.date),
            });
        }
    }
    // series built without `new` may be unsorted
    let mut ordered: Vec<_> = series.observations.iter().collect();
    ordered.sort_by_key(|o| o.date);
    let (first, last) = match (ordered.first(), ordered.last()) {
        (Some(f), Some(l)) => (month_start(f.date), month_start(l.date)),
        _ => return Ok(Vec::new()),
    };

    let mut totals = Vec::new();
    let mut cursor = first;
    let mut observations = ordered.into_iter().peekable();
    let mut empty_months = 0usize;
    while cursor <= last {
        let mut total = 0.0;
        let mut seen = false;
        while let Some(obs) = observations.peek() {
            if month_start(obs.date) != cursor {
                break;
            }
            total += obs.amount_mm;
            seen = true;
            observations.next();
        }
        if !seen {
            empty_months += 1;
        }
        totals.push((cursor, total));
        cursor = match cursor.checked_add_months(chrono::Months::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    if empty_months > 0 {
        warn!(
            zone = %series.zone_id,
            empty_months,
            "months without observations counted as zero precipitation"
        );
    }
    Ok(totals)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Natural log of the gamma function (Lanczos approximation, g = 7)
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized lower incomplete gamma function P(a, x)
pub fn regularized_lower_gamma(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_series(a, x)
    } else {
        1.0 - gamma_continued_fraction(a, x)
    }
}

fn gamma_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut delta = 1.0 / a;
    let mut sum = delta;
    for _ in 0..MAX_ITERATIONS {
        ap += 1.0;
        delta *= x / ap;
        sum += delta;
        if delta.abs() < sum.abs() * CONVERGENCE_EPSILON {
            break;
        }
    }
    (sum * (-x + a * x.ln() - ln_gamma(a)).exp()).clamp(0.0, 1.0)
}

/// Upper regularized gamma Q(a, x) via Lentz's continued fraction
fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < CONVERGENCE_EPSILON {
            break;
        }
    }
    ((-x + a * x.ln() - ln_gamma(a)).exp() * h).clamp(0.0, 1.0)
}

/// Inverse of the standard normal CDF (Acklam's rational approximation)
///
/// `p` must lie strictly inside (0, 1).
pub fn inverse_standard_normal(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
    }

    /// Seasonal monthly totals with deterministic year-to-year variation
    fn seasonal_totals(months: usize) -> Vec<f64> {
        (0..months)
            .map(|i| {
                let season = 60.0 + 40.0 * ((i % 12) as f64 / 12.0 * std::f64::consts::TAU).sin();
                let jitter = ((i * 37) % 11) as f64 * 3.0;
                season + jitter
            })
            .collect()
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn test_incomplete_gamma_matches_exponential() {
        // P(1, x) = 1 - e^-x
        for x in [0.1, 0.5, 1.0, 2.5, 7.0] {
            let expected = 1.0 - (-x as f64).exp();
            assert!((regularized_lower_gamma(1.0, x) - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn test_inverse_normal_known_quantiles() {
        assert!(inverse_standard_normal(0.5).abs() < 1e-9);
        assert!((inverse_standard_normal(0.975) - 1.959_963_985).abs() < 1e-6);
        assert!((inverse_standard_normal(0.01) + 2.326_347_874).abs() < 1e-6);
    }

    #[test]
    fn test_fit_gamma_requires_variability() {
        assert!(fit_gamma(&[10.0; 30]).is_none());
        assert!(fit_gamma(&[0.0; 30]).is_none());
        let fit = fit_gamma(&seasonal_totals(30)).expect("should fit");
        assert!(fit.alpha > 0.0 && fit.beta > 0.0);
        assert_eq!(fit.zero_probability, 0.0);
    }

    #[test]
    fn test_zero_windows_raise_zero_probability() {
        let mut totals = seasonal_totals(30);
        totals[0] = 0.0;
        totals[1] = 0.0;
        let fit = fit_gamma(&totals).unwrap();
        assert!((fit.zero_probability - 2.0 / 30.0).abs() < 1e-12);
        assert_eq!(fit.cdf(0.0), fit.zero_probability);
    }

    #[test]
    fn test_spi_finite_at_minimum_history() {
        let series = PrecipitationSeries::from_monthly_totals(
            "z",
            start(),
            &seasonal_totals(MIN_HISTORY_MONTHS),
        );
        let result = calculate_spi(&series).expect("minimum history should fit");
        assert!(result.spi.is_finite());
    }

    #[test]
    fn test_spi_insufficient_below_minimum() {
        let series = PrecipitationSeries::from_monthly_totals(
            "z",
            start(),
            &seasonal_totals(MIN_HISTORY_MONTHS - 1),
        );
        match calculate_spi(&series) {
            Err(CoreError::InsufficientData { required, .. }) => {
                assert_eq!(required, MIN_HISTORY_MONTHS)
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_dry_current_window_is_negative() {
        let mut totals = seasonal_totals(60);
        let n = totals.len();
        for t in &mut totals[n - 6..] {
            *t *= 0.2;
        }
        let series = PrecipitationSeries::from_monthly_totals("z", start(), &totals);
        let result = calculate_spi(&series).unwrap();
        assert!(result.spi < -1.5, "expected severe dryness, got {}", result.spi);
    }

    #[test]
    fn test_completely_dry_window_is_finite() {
        let mut totals = seasonal_totals(60);
        let n = totals.len();
        for t in &mut totals[n - 6..] {
            *t = 0.0;
        }
        let series = PrecipitationSeries::from_monthly_totals("z", start(), &totals);
        let result = calculate_spi(&series).unwrap();
        assert!(result.spi.is_finite());
        assert!(result.spi < -3.0);
    }

    #[test]
    fn test_negative_amount_is_malformed() {
        let mut totals = seasonal_totals(40);
        totals[3] = -1.0;
        let series = PrecipitationSeries::from_monthly_totals("z", start(), &totals);
        assert!(matches!(
            calculate_spi(&series),
            Err(CoreError::MalformedSeries { .. })
        ));
    }

    #[test]
    fn test_history_is_oldest_first_and_ends_at_current() {
        let series = PrecipitationSeries::from_monthly_totals("z", start(), &seasonal_totals(48));
        let history = spi_history(&series, 12).unwrap();
        let current = calculate_spi(&series).unwrap();
        assert_eq!(history.len(), 12);
        assert!(history.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(history[11].spi, current.spi);
        assert_eq!(history[11].date, current.window_end);
    }

    #[test]
    fn test_monthly_totals_fill_gaps() {
        use crate::precipitation::PrecipitationObservation;
        let series = PrecipitationSeries::new(
            "z",
            vec![
                PrecipitationObservation {
                    date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    amount_mm: 4.0,
                },
                PrecipitationObservation {
                    date: NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
                    amount_mm: 6.0,
                },
                PrecipitationObservation {
                    date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                    amount_mm: 1.5,
                },
            ],
        );
        let months = monthly_totals(&series).unwrap();
        assert_eq!(months.len(), 3);
        assert_eq!(months[0].1, 10.0);
        assert_eq!(months[1].1, 0.0);
        assert_eq!(months[2].1, 1.5);
    }

    #[test]
    fn test_unsorted_series_matches_sorted() {
        let sorted = PrecipitationSeries::from_monthly_totals("z", start(), &seasonal_totals(40));
        let mut reversed = sorted.clone();
        reversed.observations.reverse();

        assert_eq!(monthly_totals(&reversed).unwrap(), monthly_totals(&sorted).unwrap());
        assert_eq!(
            calculate_spi(&reversed).unwrap().spi,
            calculate_spi(&sorted).unwrap().spi
        );
    }
}
