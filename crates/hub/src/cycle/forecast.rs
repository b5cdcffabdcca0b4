//! Short-horizon moisture forecast from an autoregressive model.
//!
//! An AR(p) model with intercept is fitted by ordinary least squares over
//! the current cycle, then iterated forward until the prediction drops
//! below the target or the horizon runs out.

use std::fmt;

use serde::Serialize;
use time::{Duration, PrimitiveDateTime};

use super::{log_timestamp, CalibratedReading, CycleError};

/// Relative pivot size below which the normal equations count as singular.
const SINGULAR_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Prediction {
    /// Latest reading is already below the target.
    WaterNow,
    /// First forecast step below the target, as a calendar time.
    WaterOn(#[serde(with = "log_timestamp")] PrimitiveDateTime),
    /// The forecast stays above the target for the whole horizon.
    NotWithinHorizon,
    /// Too few observations, or the fit failed numerically.
    InsufficientData,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaterNow => write!(f, "Water now"),
            Self::WaterOn(at) => write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}",
                at.year(),
                at.month() as u8,
                at.day(),
                at.hour(),
                at.minute()
            ),
            Self::NotWithinHorizon => write!(f, "Not within forecast horizon"),
            Self::InsufficientData => write!(f, "Insufficient data for a forecast"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastConfig {
    /// Number of past observations each prediction conditions on.
    pub lag_order: usize,
    /// Steps to forecast before giving up.
    pub horizon_steps: usize,
    /// Native sampling cadence of the log.
    pub sample_interval_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lag_order: 500,
            horizon_steps: 2000,
            sample_interval_secs: 300,
        }
    }
}

impl ForecastConfig {
    /// Shortest series the fit will accept.  The design matrix has
    /// `n - lag` rows and `lag + 1` columns, so it needs `n >= 2 * lag + 1`.
    pub fn min_observations(&self) -> usize {
        2 * self.lag_order + 1
    }
}

// ---------------------------------------------------------------------------
// Forecast entry point
// ---------------------------------------------------------------------------

/// Estimate when `cycle` will fall below `target_pct`.
///
/// `now` anchors step 1 one sampling interval in the future.  Never fails:
/// fit problems come back as `InsufficientData`.
pub fn forecast(
    cycle: &[CalibratedReading],
    target_pct: f64,
    config: &ForecastConfig,
    now: PrimitiveDateTime,
) -> Prediction {
    let Some(latest) = cycle.last() else {
        return Prediction::InsufficientData;
    };
    if latest.moisture_pct < target_pct {
        return Prediction::WaterNow;
    }

    let values: Vec<f64> = cycle.iter().map(|r| r.moisture_pct).collect();
    let model = match AutoRegressive::fit(&values, config.lag_order) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(observations = values.len(), lag_order = config.lag_order, "forecast: {e}");
            return Prediction::InsufficientData;
        }
    };

    let path = model.forecast(&values, config.horizon_steps);
    match first_below(&path, target_pct) {
        Some(step) => step_to_time(now, step, config.sample_interval_secs)
            .map_or(Prediction::NotWithinHorizon, Prediction::WaterOn),
        None => Prediction::NotWithinHorizon,
    }
}

/// 1-based step of the first value below `target`.
fn first_below(path: &[f64], target: f64) -> Option<usize> {
    path.iter()
        .take_while(|v| v.is_finite())
        .position(|&v| v < target)
        .map(|i| i + 1)
}

fn step_to_time(
    now: PrimitiveDateTime,
    step: usize,
    interval_secs: u64,
) -> Option<PrimitiveDateTime> {
    let secs = i64::try_from(step)
        .ok()?
        .checked_mul(i64::try_from(interval_secs).ok()?)?;
    now.checked_add(Duration::seconds(secs))
}

// ---------------------------------------------------------------------------
// AR(p) model
// ---------------------------------------------------------------------------

/// `x[t] = c + Σ coef[k] · x[t-1-k]` on the mean-centred series.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoRegressive {
    mean: f64,
    intercept: f64,
    coefficients: Vec<f64>,
}

impl AutoRegressive {
    /// Fit by least squares via the normal equations.
    pub fn fit(values: &[f64], lag: usize) -> Result<Self, CycleError> {
        let n = values.len();
        let needed = 2 * lag + 1;
        if lag == 0 || n < needed {
            return Err(CycleError::InsufficientData {
                needed,
                available: n,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CycleError::SingularFit);
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let x: Vec<f64> = values.iter().map(|v| v - mean).collect();

        let (mut gram, mut rhs) = normal_equations(&x, lag);
        solve_in_place(&mut gram, &mut rhs, lag + 1)?;

        if rhs.iter().any(|c| !c.is_finite()) {
            return Err(CycleError::SingularFit);
        }

        Ok(Self {
            mean,
            intercept: rhs[0],
            coefficients: rhs[1..].to_vec(),
        })
    }

    pub fn lag(&self) -> usize {
        self.coefficients.len()
    }

    /// Iterate the model `steps` times past the end of `history`.
    ///
    /// `history` must hold at least `lag()` values.
    pub fn forecast(&self, history: &[f64], steps: usize) -> Vec<f64> {
        let lag = self.lag();
        let mut buf: Vec<f64> = history[history.len() - lag..]
            .iter()
            .map(|v| v - self.mean)
            .collect();
        buf.reserve(steps);

        for _ in 0..steps {
            let end = buf.len();
            let next = self.intercept
                + self
                    .coefficients
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * buf[end - 1 - k])
                    .sum::<f64>();
            buf.push(next);
        }

        buf[lag..].iter().map(|v| v + self.mean).collect()
    }
}

/// Build `XᵀX` and `Xᵀy` for regressors `[1, x[t-1], …, x[t-p]]`,
/// `t = p..n`.  Returned row-major with dimension `p + 1`.
///
/// The lag block uses `S(i+1, j+1) = S(i, j) + x[p-1-i]·x[p-1-j]
/// - x[n-1-i]·x[n-1-j]`, which avoids an O(n·p²) pass.
fn normal_equations(x: &[f64], p: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len();
    let d = p + 1;
    let rows = n - p;
    let mut gram = vec![0.0; d * d];
    let mut rhs = vec![0.0; d];

    // Intercept row/column: counts and plain sums.
    gram[0] = rows as f64;
    for k in 1..=p {
        let s: f64 = x[p - k..n - k].iter().sum();
        gram[k] = s;
        gram[k * d] = s;
    }

    rhs[0] = x[p..].iter().sum();
    for k in 1..=p {
        rhs[k] = (p..n).map(|t| x[t] * x[t - k]).sum();
    }

    // First lag row, S(1, j), computed directly.
    for j in 1..=p {
        let s: f64 = (p..n).map(|t| x[t - 1] * x[t - j]).sum();
        gram[d + j] = s;
        gram[j * d + 1] = s;
    }

    // Walk the diagonals down from row 1.
    for i in 1..p {
        for j in i..p {
            let s = gram[i * d + j] + x[p - 1 - i] * x[p - 1 - j] - x[n - 1 - i] * x[n - 1 - j];
            gram[(i + 1) * d + (j + 1)] = s;
            gram[(j + 1) * d + (i + 1)] = s;
        }
    }

    (gram, rhs)
}

/// Gaussian elimination with partial pivoting.  The solution replaces `b`.
fn solve_in_place(a: &mut [f64], b: &mut [f64], d: usize) -> Result<(), CycleError> {
    let scale = (0..d)
        .map(|i| a[i * d + i].abs())
        .fold(0.0_f64, f64::max);
    if scale == 0.0 || !scale.is_finite() {
        return Err(CycleError::SingularFit);
    }
    let tol = scale * SINGULAR_TOLERANCE;

    for col in 0..d {
        let pivot_row = (col..d)
            .max_by(|&r1, &r2| a[r1 * d + col].abs().total_cmp(&a[r2 * d + col].abs()))
            .unwrap_or(col);
        if a[pivot_row * d + col].abs() <= tol {
            return Err(CycleError::SingularFit);
        }
        if pivot_row != col {
            for k in 0..d {
                a.swap(col * d + k, pivot_row * d + k);
            }
            b.swap(col, pivot_row);
        }

        let pivot = a[col * d + col];
        for row in col + 1..d {
            let factor = a[row * d + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..d {
                a[row * d + k] -= factor * a[col * d + k];
            }
            b[row] -= factor * b[col];
        }
    }

    for col in (0..d).rev() {
        let tail: f64 = (col + 1..d).map(|k| a[col * d + k] * b[k]).sum();
        b[col] = (b[col] - tail) / a[col * d + col];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::testutil::{series, T0};

    fn cfg(lag_order: usize, horizon_steps: usize) -> ForecastConfig {
        ForecastConfig {
            lag_order,
            horizon_steps,
            sample_interval_secs: 300,
        }
    }

    /// Noisy linear drying curve; the noise keeps the lag matrix regular.
    fn drying(n: usize, start: f64, slope: f64, seed: u64) -> Vec<f64> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..n)
            .map(|i| start + slope * i as f64 + (rng.f64() - 0.5) * 0.4)
            .collect()
    }

    /// Simulate x[t] = c + φ·x[t-1] + small noise.
    fn ar1(n: usize, c: f64, phi: f64, x0: f64, seed: u64) -> Vec<f64> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut out = Vec::with_capacity(n);
        let mut x = x0;
        for _ in 0..n {
            out.push(x);
            x = c + phi * x + (rng.f64() - 0.5) * 0.01;
        }
        out
    }

    // -- Short-circuit paths ---------------------------------------------

    #[test]
    fn below_target_is_water_now_without_fit() {
        // Five points against a 500-lag model would be InsufficientData if
        // the fit ran at all.
        let s = series(&[40.0, 30.0, 20.0, 10.0, 5.0]);
        assert_eq!(forecast(&s, 71.0, &cfg(500, 2000), T0), Prediction::WaterNow);
    }

    #[test]
    fn too_short_is_insufficient_data() {
        let s = series(&[90.0; 10]);
        assert_eq!(
            forecast(&s, 71.0, &cfg(500, 2000), T0),
            Prediction::InsufficientData
        );
    }

    #[test]
    fn empty_cycle_is_insufficient_data() {
        assert_eq!(
            forecast(&[], 71.0, &cfg(5, 10), T0),
            Prediction::InsufficientData
        );
    }

    #[test]
    fn constant_series_is_insufficient_data() {
        let s = series(&[80.0; 200]);
        assert_eq!(
            forecast(&s, 71.0, &cfg(5, 100), T0),
            Prediction::InsufficientData
        );
    }

    #[test]
    fn exactly_min_observations_fits() {
        let values = drying(11, 90.0, -0.1, 7);
        assert!(AutoRegressive::fit(&values, 5).is_ok());
        assert!(matches!(
            AutoRegressive::fit(&values[..10], 5),
            Err(CycleError::InsufficientData {
                needed: 11,
                available: 10
            })
        ));
    }

    #[test]
    fn zero_lag_rejected() {
        assert!(AutoRegressive::fit(&[1.0, 2.0, 3.0], 0).is_err());
    }

    #[test]
    fn non_finite_input_rejected() {
        let mut values = drying(50, 90.0, -0.1, 3);
        values[20] = f64::NAN;
        assert_eq!(AutoRegressive::fit(&values, 3), Err(CycleError::SingularFit));
    }

    // -- Model quality ---------------------------------------------------

    #[test]
    fn recovers_ar1_coefficient() {
        // Converges toward c / (1 - φ) = 60.
        let values = ar1(400, 12.0, 0.8, 90.0, 11);
        let model = AutoRegressive::fit(&values, 1).unwrap();
        assert!(
            (model.coefficients[0] - 0.8).abs() < 0.05,
            "phi = {}",
            model.coefficients[0]
        );
    }

    #[test]
    fn normal_equations_match_brute_force() {
        let x = drying(40, 1.0, 0.05, 5);
        let p = 4;
        let (gram, rhs) = normal_equations(&x, p);
        let d = p + 1;

        let regressor = |t: usize, k: usize| if k == 0 { 1.0 } else { x[t - k] };
        for i in 0..d {
            for j in 0..d {
                let brute: f64 = (p..x.len()).map(|t| regressor(t, i) * regressor(t, j)).sum();
                assert!(
                    (gram[i * d + j] - brute).abs() < 1e-9,
                    "gram[{i}][{j}] = {} vs {brute}",
                    gram[i * d + j]
                );
            }
            let brute: f64 = (p..x.len()).map(|t| regressor(t, i) * x[t]).sum();
            assert!((rhs[i] - brute).abs() < 1e-9);
        }
    }

    #[test]
    fn solve_small_system() {
        // 2x + y = 5, x + 3y = 10  =>  x = 1, y = 3
        let mut a = vec![2.0, 1.0, 1.0, 3.0];
        let mut b = vec![5.0, 10.0];
        solve_in_place(&mut a, &mut b, 2).unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn solve_singular_system_fails() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        let mut b = vec![1.0, 2.0];
        assert_eq!(solve_in_place(&mut a, &mut b, 2), Err(CycleError::SingularFit));
    }

    #[test]
    fn forecast_continues_drying_trend() {
        let values = drying(300, 90.0, -0.05, 21);
        let model = AutoRegressive::fit(&values, 3).unwrap();
        let path = model.forecast(&values, 200);
        assert_eq!(path.len(), 200);
        let last = *values.last().unwrap();
        assert!(
            path[199] < last,
            "expected continued drying: last={last} forecast_end={}",
            path[199]
        );
    }

    // -- Full forecast ---------------------------------------------------

    #[test]
    fn drying_cycle_crosses_target_within_horizon() {
        // Starts at 90 %, loses 0.05 points per step, target 71 % is about
        // 80 steps past the end of 300 samples (90 - 15 = 75).
        let s = series(&drying(300, 90.0, -0.05, 42));
        let now = T0 + Duration::days(2);
        match forecast(&s, 71.0, &cfg(3, 2000), now) {
            Prediction::WaterOn(at) => {
                assert!(at > now);
                assert!(at <= now + Duration::seconds(2000 * 300));
                // Lands on the sampling grid relative to `now`.
                assert_eq!((at - now).whole_seconds() % 300, 0);
            }
            other => panic!("expected WaterOn, got {other:?}"),
        }
    }

    #[test]
    fn short_horizon_is_not_within_horizon() {
        let s = series(&drying(300, 90.0, -0.05, 42));
        assert_eq!(
            forecast(&s, 71.0, &cfg(3, 5), T0),
            Prediction::NotWithinHorizon
        );
    }

    #[test]
    fn first_below_is_one_based() {
        assert_eq!(first_below(&[80.0, 75.0, 70.0], 71.0), Some(3));
        assert_eq!(first_below(&[70.0], 71.0), Some(1));
        assert_eq!(first_below(&[80.0, 90.0], 71.0), None);
        assert_eq!(first_below(&[80.0, f64::NAN, 10.0], 71.0), None);
    }

    #[test]
    fn step_to_time_multiplies_interval() {
        assert_eq!(
            step_to_time(T0, 12, 300),
            Some(T0 + Duration::hours(1))
        );
    }

    #[test]
    fn min_observations_default() {
        assert_eq!(ForecastConfig::default().min_observations(), 1001);
    }

    // -- Presentation ----------------------------------------------------

    #[test]
    fn prediction_display() {
        assert_eq!(Prediction::WaterNow.to_string(), "Water now");
        assert_eq!(
            Prediction::WaterOn(time::macros::datetime!(2024-05-03 07:05:00)).to_string(),
            "2024-05-03 07:05"
        );
        assert_eq!(
            Prediction::NotWithinHorizon.to_string(),
            "Not within forecast horizon"
        );
    }

    #[test]
    fn prediction_serializes_tagged() {
        let json = serde_json::to_value(Prediction::WaterOn(
            time::macros::datetime!(2024-05-03 07:05:00),
        ))
        .unwrap();
        assert_eq!(json["kind"], "water_on");
        assert_eq!(json["at"], "2024-05-03 07:05:00");

        let json = serde_json::to_value(Prediction::InsufficientData).unwrap();
        assert_eq!(json["kind"], "insufficient_data");
    }
}
