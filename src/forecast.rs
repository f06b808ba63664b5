use serde::Serialize;
use tracing::{debug, info};

use crate::models::DailyObservation;
use crate::sarima::{FitError, FittedSarima, ModelConfig, WEEKLY_PERIOD};
use crate::series::{self, WEEK};

/// Fewer observed days than this and no forecast is attempted.
pub const MIN_HISTORY_DAYS: usize = 14;
pub const CONFIDENCE_LEVEL: f64 = 0.95;

/// Tried in order; on equal AIC the earlier entry wins.
pub const CANDIDATE_CONFIGS: [ModelConfig; 4] = [
    ModelConfig::new((1, 1, 1), (1, 1, 1, WEEKLY_PERIOD)),
    ModelConfig::new((1, 1, 0), (1, 1, 0, WEEKLY_PERIOD)),
    ModelConfig::new((0, 1, 1), (0, 1, 1, WEEKLY_PERIOD)),
    ModelConfig::new((1, 0, 1), (1, 0, 1, WEEKLY_PERIOD)),
];

/// Used when no candidate fits; its own failure is not caught here.
pub const DEFAULT_CONFIG: ModelConfig = ModelConfig::new((1, 1, 1), (0, 0, 0, WEEKLY_PERIOD));

const HEURISTIC_THRESHOLD_PCT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ForecastMethod {
    Sarima { config: ModelConfig, aic: f64 },
    Heuristic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub forecast: Vec<f64>,
    pub lower_bound: Vec<f64>,
    pub upper_bound: Vec<f64>,
    pub trend: Trend,
    pub expected_change: f64,
    pub method: ForecastMethod,
}

impl ForecastResult {
    pub fn horizon(&self) -> usize {
        self.forecast.len()
    }

    pub fn final_value(&self) -> f64 {
        self.forecast.last().copied().unwrap_or(0.0)
    }
}

pub fn forecast_observations(
    observations: &[DailyObservation],
    horizon: usize,
) -> Option<ForecastResult> {
    if observations.len() < MIN_HISTORY_DAYS {
        return None;
    }
    forecast_series(&series::fill_missing_days(observations), horizon)
}

/// Model failures degrade to the moving-average heuristic instead of surfacing.
pub fn forecast_series(values: &[f64], horizon: usize) -> Option<ForecastResult> {
    if values.len() < MIN_HISTORY_DAYS {
        return None;
    }

    let modeled = select_model(values).and_then(|model| {
        let forecast = model.forecast(horizon, CONFIDENCE_LEVEL)?;
        Ok((model, forecast))
    });

    match modeled {
        Ok((model, forecast)) => {
            let recent_mean = series::recent_mean(values, WEEK);
            let final_value = forecast.mean.last().copied().unwrap_or(recent_mean);
            let trend = if final_value > recent_mean {
                Trend::Increasing
            } else {
                Trend::Decreasing
            };
            let expected_change = (final_value - recent_mean) / recent_mean.max(1.0) * 100.0;

            Some(ForecastResult {
                forecast: forecast.mean,
                lower_bound: forecast.lower,
                upper_bound: forecast.upper,
                trend,
                expected_change,
                method: ForecastMethod::Sarima {
                    config: model.config(),
                    aic: model.aic(),
                },
            })
        }
        Err(err) => {
            info!(error = %err, "seasonal model unavailable, using moving-average trend");
            Some(heuristic_forecast(values, horizon))
        }
    }
}

/// Fits every candidate and keeps the lowest AIC, falling back to
/// [`DEFAULT_CONFIG`] when none of them fit.
pub fn select_model(values: &[f64]) -> Result<FittedSarima, FitError> {
    let mut best: Option<FittedSarima> = None;

    for config in CANDIDATE_CONFIGS {
        match FittedSarima::fit(config, values) {
            Ok(model) => {
                debug!(
                    %config,
                    aic = model.aic(),
                    sigma2 = model.sigma2(),
                    coefficients = ?model.coefficients(),
                    "candidate fitted"
                );
                if best.as_ref().map_or(true, |current| model.aic() < current.aic()) {
                    best = Some(model);
                }
            }
            Err(err) => debug!(%config, error = %err, "candidate skipped"),
        }
    }

    match best {
        Some(model) => {
            debug!(config = %model.config(), aic = model.aic(), "selected model");
            Ok(model)
        }
        None => {
            debug!(config = %DEFAULT_CONFIG, "no candidate fitted, trying default");
            FittedSarima::fit(DEFAULT_CONFIG, values)
        }
    }
}

/// Week-over-week comparison with a flat forecast and a +/-20% band.
pub fn heuristic_forecast(values: &[f64], horizon: usize) -> ForecastResult {
    let recent_avg = series::recent_mean(values, WEEK);
    let older_avg = if values.len() >= 2 * WEEK {
        let end = values.len() - WEEK;
        series::mean(&values[end - WEEK..end])
    } else {
        recent_avg
    };

    let (change_pct, trend) = if older_avg > 0.0 {
        let change_pct = (recent_avg - older_avg) / older_avg * 100.0;
        let trend = if change_pct > HEURISTIC_THRESHOLD_PCT {
            Trend::Increasing
        } else if change_pct < -HEURISTIC_THRESHOLD_PCT {
            Trend::Decreasing
        } else {
            Trend::Stable
        };
        (change_pct, trend)
    } else {
        (0.0, Trend::Stable)
    };

    ForecastResult {
        forecast: vec![recent_avg; horizon],
        lower_bound: vec![recent_avg * 0.8; horizon],
        upper_bound: vec![recent_avg * 1.2; horizon],
        trend,
        expected_change: change_pct,
        method: ForecastMethod::Heuristic,
    }
}
