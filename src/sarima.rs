//! Seasonal ARIMA fitted by conditional sum of squares.
//!
//! The series is differenced with `(1 - B)^d (1 - B^s)^D`, then an ARMA model
//! with multiplicative seasonal polynomials is fitted to the result. Shocks
//! and values before the start of the differenced series are taken as zero.
//! Coefficients are unconstrained, so explosive or non-invertible fits are
//! allowed; the optimizer budget is what keeps fitting bounded.

use std::f64::consts::PI;
use std::fmt;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;
use tracing::trace;

use crate::optimize::{nelder_mead, NelderMeadConfig};

pub const WEEKLY_PERIOD: usize = 7;
pub const MAX_FIT_ITERATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeasonalOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub order: ModelOrder,
    pub seasonal: SeasonalOrder,
}

impl ModelConfig {
    pub const fn new(order: (usize, usize, usize), seasonal: (usize, usize, usize, usize)) -> Self {
        Self {
            order: ModelOrder {
                p: order.0,
                d: order.1,
                q: order.2,
            },
            seasonal: SeasonalOrder {
                p: seasonal.0,
                d: seasonal.1,
                q: seasonal.2,
                period: seasonal.3,
            },
        }
    }

    /// Number of estimated ARMA coefficients (excludes the innovation variance).
    pub fn coefficient_count(&self) -> usize {
        self.order.p + self.order.q + self.seasonal.p + self.seasonal.q
    }

    fn seasonal_stride(&self) -> usize {
        self.seasonal.period.max(1)
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{})({},{},{},{})",
            self.order.p,
            self.order.d,
            self.order.q,
            self.seasonal.p,
            self.seasonal.d,
            self.seasonal.q,
            self.seasonal.period
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("insufficient data: need at least {needed} differenced values, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("differenced series is constant")]
    ConstantSeries,
    #[error("residual variance collapsed to zero")]
    ZeroVariance,
    #[error("non-finite {0}")]
    NonFinite(&'static str),
    #[error("interval level {0} must lie strictly between 0 and 1")]
    InvalidLevel(f64),
    #[error("normal distribution: {0}")]
    Distribution(String),
}

#[derive(Debug, Clone)]
pub struct ModelForecast {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FittedSarima {
    config: ModelConfig,
    coefficients: Vec<f64>,
    values: Vec<f64>,
    differenced: Vec<f64>,
    residuals: Vec<f64>,
    /// `(1 - B)^d (1 - B^s)^D`
    difference_poly: Vec<f64>,
    /// `phi(B) * Phi(B^s)`, leading 1.
    ar_poly: Vec<f64>,
    /// `theta(B) * Theta(B^s)`, leading 1.
    ma_poly: Vec<f64>,
    sigma2: f64,
    aic: f64,
}

impl FittedSarima {
    pub fn fit(config: ModelConfig, values: &[f64]) -> Result<Self, FitError> {
        let difference_poly = difference_polynomial(&config);
        let differenced = apply_difference(values, &difference_poly);

        let needed = config.coefficient_count() + 2;
        if differenced.len() < needed {
            return Err(FitError::InsufficientData {
                needed,
                got: differenced.len(),
            });
        }
        if differenced.iter().any(|value| !value.is_finite()) {
            return Err(FitError::NonFinite("observation"));
        }

        let (low, high) = differenced
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if high - low < 1e-12 {
            return Err(FitError::ConstantSeries);
        }

        let optimizer = NelderMeadConfig {
            max_iter: MAX_FIT_ITERATIONS,
            ..Default::default()
        };
        let initial = initial_coefficients(&config, &differenced);
        let result = nelder_mead(
            |params| {
                let (ar_poly, ma_poly) = expand_polynomials(&config, params);
                conditional_sum_of_squares(&differenced, &ar_poly, &ma_poly)
            },
            &initial,
            &optimizer,
        );

        trace!(
            %config,
            iterations = result.iterations,
            converged = result.converged,
            css = result.value,
            "optimizer finished"
        );
        if !result.value.is_finite() || result.value >= f64::MAX {
            return Err(FitError::NonFinite("objective"));
        }

        let (ar_poly, ma_poly) = expand_polynomials(&config, &result.point);
        let residuals = residual_series(&differenced, &ar_poly, &ma_poly);
        let n = differenced.len() as f64;
        let sigma2 = residuals.iter().map(|e| e * e).sum::<f64>() / n;
        if !sigma2.is_finite() {
            return Err(FitError::NonFinite("residual variance"));
        }
        if sigma2 <= f64::EPSILON {
            return Err(FitError::ZeroVariance);
        }

        let log_likelihood = -0.5 * n * ((2.0 * PI * sigma2).ln() + 1.0);
        let parameters = (config.coefficient_count() + 1) as f64;
        let aic = -2.0 * log_likelihood + 2.0 * parameters;

        Ok(Self {
            config,
            coefficients: result.point,
            values: values.to_vec(),
            differenced,
            residuals,
            difference_poly,
            ar_poly,
            ma_poly,
            sigma2,
            aic,
        })
    }

    pub fn config(&self) -> ModelConfig {
        self.config
    }

    /// Estimated coefficients in `[ar, seasonal ar, ma, seasonal ma]` order.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn forecast(&self, horizon: usize, level: f64) -> Result<ModelForecast, FitError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(FitError::InvalidLevel(level));
        }
        let normal =
            Normal::new(0.0, 1.0).map_err(|err| FitError::Distribution(err.to_string()))?;
        let z = normal.inverse_cdf((1.0 + level) / 2.0);

        let m = self.differenced.len();
        let mut differenced = self.differenced.clone();

        for h in 1..=horizon {
            let t = m + h - 1;
            let mut prediction = 0.0;
            for (lag, coefficient) in self.ar_poly.iter().enumerate().skip(1) {
                if t >= lag {
                    prediction -= coefficient * differenced[t - lag];
                }
            }
            for (lag, coefficient) in self.ma_poly.iter().enumerate().skip(h) {
                if t >= lag && t - lag < m {
                    prediction += coefficient * self.residuals[t - lag];
                }
            }
            differenced.push(prediction);
        }

        let offset = self.difference_poly.len() - 1;
        let n = self.values.len();
        let mut levels = self.values.clone();
        for h in 1..=horizon {
            let t = n + h - 1;
            let mut value = differenced[t - offset];
            for (lag, coefficient) in self.difference_poly.iter().enumerate().skip(1) {
                value -= coefficient * levels[t - lag];
            }
            levels.push(value);
        }
        let mean = levels.split_off(n);

        let psi = psi_weights(&poly_mul(&self.ar_poly, &self.difference_poly), &self.ma_poly, horizon);
        let sigma = self.sigma2.sqrt();

        let mut lower = Vec::with_capacity(horizon);
        let mut upper = Vec::with_capacity(horizon);
        let mut cumulative = 0.0;
        for (point, weight) in mean.iter().zip(&psi) {
            cumulative += weight * weight;
            let half_width = z * sigma * cumulative.sqrt();
            lower.push(point - half_width);
            upper.push(point + half_width);
        }

        let all_finite = mean
            .iter()
            .chain(&lower)
            .chain(&upper)
            .all(|value| value.is_finite());
        if !all_finite {
            return Err(FitError::NonFinite("forecast"));
        }

        Ok(ModelForecast { mean, lower, upper })
    }
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut product = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            product[i + j] += x * y;
        }
    }
    product
}

/// `1 + sign * (c_1 B^stride + c_2 B^{2 stride} + ...)`
fn lag_polynomial(coefficients: &[f64], stride: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * stride + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * stride] = sign * c;
    }
    poly
}

fn difference_polynomial(config: &ModelConfig) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..config.order.d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..config.seasonal.d {
        poly = poly_mul(&poly, &lag_polynomial(&[1.0], config.seasonal_stride(), -1.0));
    }
    poly
}

fn apply_difference(values: &[f64], poly: &[f64]) -> Vec<f64> {
    let offset = poly.len() - 1;
    if values.len() <= offset {
        return Vec::new();
    }
    (offset..values.len())
        .map(|t| {
            poly.iter()
                .enumerate()
                .map(|(lag, c)| c * values[t - lag])
                .sum()
        })
        .collect()
}

fn expand_polynomials(config: &ModelConfig, params: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let stride = config.seasonal_stride();
    let (ar, rest) = params.split_at(config.order.p);
    let (seasonal_ar, rest) = rest.split_at(config.seasonal.p);
    let (ma, seasonal_ma) = rest.split_at(config.order.q);

    let ar_poly = poly_mul(
        &lag_polynomial(ar, 1, -1.0),
        &lag_polynomial(seasonal_ar, stride, -1.0),
    );
    let ma_poly = poly_mul(
        &lag_polynomial(ma, 1, 1.0),
        &lag_polynomial(seasonal_ma, stride, 1.0),
    );
    (ar_poly, ma_poly)
}

fn residual_series(series: &[f64], ar_poly: &[f64], ma_poly: &[f64]) -> Vec<f64> {
    let mut residuals = vec![0.0; series.len()];
    for t in 0..series.len() {
        let mut error = 0.0;
        for (lag, c) in ar_poly.iter().enumerate() {
            if t >= lag {
                error += c * series[t - lag];
            }
        }
        for (lag, c) in ma_poly.iter().enumerate().skip(1) {
            if t >= lag {
                error -= c * residuals[t - lag];
            }
        }
        residuals[t] = error;
    }
    residuals
}

fn conditional_sum_of_squares(series: &[f64], ar_poly: &[f64], ma_poly: &[f64]) -> f64 {
    let css: f64 = residual_series(series, ar_poly, ma_poly)
        .iter()
        .map(|e| e * e)
        .sum();
    if css.is_finite() {
        css
    } else {
        f64::MAX
    }
}

/// AR starts at the uncentered autocorrelation of the matching lag, MA at zero.
fn initial_coefficients(config: &ModelConfig, series: &[f64]) -> Vec<f64> {
    let stride = config.seasonal_stride();
    let energy: f64 = series.iter().map(|v| v * v).sum();
    let autocorrelation = |lag: usize| -> f64 {
        if energy <= 0.0 || lag >= series.len() {
            return 0.0;
        }
        let cross: f64 = series[lag..]
            .iter()
            .zip(series)
            .map(|(a, b)| a * b)
            .sum();
        (cross / energy).clamp(-0.9, 0.9)
    };

    let mut initial = Vec::with_capacity(config.coefficient_count());
    initial.extend((1..=config.order.p).map(|i| if i == 1 { autocorrelation(1) } else { 0.0 }));
    initial.extend((1..=config.seasonal.p).map(|i| if i == 1 { autocorrelation(stride) } else { 0.0 }));
    initial.extend(std::iter::repeat(0.0).take(config.order.q + config.seasonal.q));
    initial
}

/// MA(infinity) weights of `ma(B) / ar(B)`, first `count` terms.
fn psi_weights(ar_poly: &[f64], ma_poly: &[f64], count: usize) -> Vec<f64> {
    let mut psi = Vec::with_capacity(count);
    for j in 0..count {
        let mut weight = ma_poly.get(j).copied().unwrap_or(0.0);
        for lag in 1..ar_poly.len().min(j + 1) {
            weight -= ar_poly[lag] * psi[j - lag];
        }
        psi.push(weight);
    }
    psi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::jitter;
    use approx::assert_relative_eq;

    #[test]
    fn config_renders_orders() {
        let config = ModelConfig::new((1, 1, 0), (1, 1, 0, WEEKLY_PERIOD));
        assert_eq!(config.to_string(), "(1,1,0)(1,1,0,7)");
        assert_eq!(config.coefficient_count(), 2);
    }

    #[test]
    fn weekly_difference_polynomial() {
        let config = ModelConfig::new((0, 1, 0), (0, 1, 0, WEEKLY_PERIOD));
        let poly = difference_polynomial(&config);
        let mut expected = vec![0.0; 9];
        expected[0] = 1.0;
        expected[1] = -1.0;
        expected[7] = -1.0;
        expected[8] = 1.0;
        assert_eq!(poly, expected);

        let values: Vec<f64> = (0..10).map(|i| (i * i) as f64).collect();
        // second difference of i^2 over lags 1 and 7 is constant: 2 * 7
        assert!(apply_difference(&values, &poly)
            .iter()
            .all(|w| (w - 14.0).abs() < 1e-9));
    }

    #[test]
    fn multiplicative_ar_polynomial() {
        let config = ModelConfig::new((1, 0, 0), (1, 0, 0, 7));
        let (ar_poly, ma_poly) = expand_polynomials(&config, &[0.5, 0.4]);
        assert_eq!(ar_poly.len(), 9);
        assert_relative_eq!(ar_poly[1], -0.5);
        assert_relative_eq!(ar_poly[7], -0.4);
        assert_relative_eq!(ar_poly[8], 0.2);
        assert_eq!(ma_poly, vec![1.0]);
    }

    #[test]
    fn psi_weights_of_random_walk_are_ones() {
        let psi = psi_weights(&[1.0, -1.0], &[1.0], 5);
        assert_eq!(psi, vec![1.0; 5]);
    }

    #[test]
    fn short_series_is_rejected() {
        let config = ModelConfig::new((1, 1, 1), (1, 1, 1, WEEKLY_PERIOD));
        let values: Vec<f64> = (0..10).map(|i| i as f64 + jitter(i)).collect();
        assert_eq!(
            FittedSarima::fit(config, &values).unwrap_err(),
            FitError::InsufficientData { needed: 6, got: 2 }
        );
    }

    #[test]
    fn constant_series_is_degenerate() {
        let values = vec![5.0; 30];
        for config in [
            ModelConfig::new((1, 1, 1), (1, 1, 1, WEEKLY_PERIOD)),
            ModelConfig::new((1, 0, 1), (1, 0, 1, WEEKLY_PERIOD)),
        ] {
            assert_eq!(
                FittedSarima::fit(config, &values).unwrap_err(),
                FitError::ConstantSeries
            );
        }
    }

    #[test]
    fn recovers_ar_coefficient() {
        let mut values = vec![0.0];
        for i in 1..300 {
            values.push(0.6 * values[i - 1] + jitter(i));
        }
        let config = ModelConfig::new((1, 0, 0), (0, 0, 0, WEEKLY_PERIOD));
        let model = FittedSarima::fit(config, &values).unwrap();

        assert!((model.coefficients()[0] - 0.6).abs() < 0.15);
        assert!(model.aic().is_finite());
        assert!(model.sigma2() > 0.0);
    }

    #[test]
    fn bands_contain_forecast_and_widen() {
        let values: Vec<f64> = (0..60)
            .map(|i| 10.0 + [0.0, 2.0, 3.0, 1.0, -1.0, -2.0, 4.0][i % 7] + jitter(i))
            .collect();
        let config = ModelConfig::new((0, 1, 1), (0, 1, 1, WEEKLY_PERIOD));
        let model = FittedSarima::fit(config, &values).unwrap();
        let forecast = model.forecast(21, 0.95).unwrap();

        assert_eq!(forecast.mean.len(), 21);
        let mut previous_width = 0.0;
        for i in 0..21 {
            assert!(forecast.lower[i] <= forecast.mean[i]);
            assert!(forecast.mean[i] <= forecast.upper[i]);
            let width = forecast.upper[i] - forecast.lower[i];
            assert!(width >= previous_width);
            previous_width = width;
        }
    }

    #[test]
    fn zero_horizon_forecast_is_empty() {
        let values: Vec<f64> = (0..30).map(|i| i as f64 + jitter(i)).collect();
        let config = ModelConfig::new((1, 1, 0), (1, 1, 0, WEEKLY_PERIOD));
        let forecast = FittedSarima::fit(config, &values)
            .unwrap()
            .forecast(0, 0.95)
            .unwrap();
        assert!(forecast.mean.is_empty());
        assert!(forecast.upper.is_empty());
    }

    #[test]
    fn first_step_band_is_normal_quantile_times_sigma() {
        let values: Vec<f64> = (0..40).map(|i| i as f64 + jitter(i)).collect();
        let config = ModelConfig::new((1, 1, 0), (0, 0, 0, WEEKLY_PERIOD));
        let model = FittedSarima::fit(config, &values).unwrap();
        let forecast = model.forecast(3, 0.95).unwrap();

        let half_width = forecast.upper[0] - forecast.mean[0];
        assert_relative_eq!(
            half_width,
            1.959964 * model.sigma2().sqrt(),
            max_relative = 1e-5
        );
        assert_relative_eq!(forecast.mean[0] - forecast.lower[0], half_width, epsilon = 1e-9);
    }

    #[test]
    fn interval_level_outside_unit_range_is_rejected() {
        let values: Vec<f64> = (0..30).map(|i| i as f64 + jitter(i)).collect();
        let config = ModelConfig::new((1, 1, 0), (0, 0, 0, WEEKLY_PERIOD));
        let model = FittedSarima::fit(config, &values).unwrap();

        assert_eq!(model.forecast(5, 1.0).unwrap_err(), FitError::InvalidLevel(1.0));
        assert_eq!(model.forecast(5, 0.0).unwrap_err(), FitError::InvalidLevel(0.0));
    }
}
