use std::collections::BTreeMap;
use std::future::Future;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tracing::{debug, debug_span, info};

use crate::db;
use crate::forecast::{self, ForecastMethod, ForecastResult, Trend};
use crate::models::{
    CategoryCount, DailyObservation, QueryParams, QueryType, Route, SeverityRoute, Suggestion,
};
use crate::series::{self, WEEK};

pub const ROUTE_HORIZON_DAYS: usize = 30;
pub const SYSTEM_HORIZON_DAYS: usize = 14;
pub const ROUTE_HISTORY_DAYS: i32 = 365;
pub const SYSTEM_HISTORY_DAYS: i32 = 90;
pub const AGGREGATE_WINDOW_DAYS: i32 = 30;
pub const HIGH_SEVERITY_THRESHOLD: f64 = 4.0;
pub const MAX_SUGGESTIONS: usize = 5;

const MAX_ROUTE_SUGGESTIONS: usize = 3;
const CATEGORY_CONFIDENCE: f64 = 0.85;
const SEVERITY_CONFIDENCE: f64 = 0.90;

#[derive(Debug, Clone, Serialize)]
pub struct RouteForecast {
    pub route_id: i32,
    pub route_code: String,
    pub trend: Trend,
    pub expected_change_pct: f64,
    pub recent_events: i64,
    pub avg_severity: f64,
    pub avg_contamination_pct: f64,
    pub forecast_next_week: i64,
    pub method: ForecastMethod,
}

impl RouteForecast {
    pub fn summarize(
        route: &Route,
        observations: &[DailyObservation],
        result: &ForecastResult,
    ) -> Self {
        let filled = series::fill_missing_days(observations);
        let recent_events = series::recent_total(&filled, WEEK) as i64;
        let forecast_next_week = match result.forecast.get(WEEK) {
            Some(value) => *value as i64,
            None => recent_events,
        };

        Self {
            route_id: route.route_id,
            route_code: route.route_code.clone(),
            trend: result.trend,
            expected_change_pct: result.expected_change,
            recent_events,
            avg_severity: series::recent_reported_mean(observations, WEEK, |o| o.avg_severity),
            avg_contamination_pct: series::recent_reported_mean(observations, WEEK, |o| {
                o.avg_contamination_pct
            }),
            forecast_next_week,
            method: result.method.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemForecast {
    pub result: ForecastResult,
    pub recent_daily_mean: f64,
}

impl SystemForecast {
    pub fn from_observations(observations: &[DailyObservation], horizon: usize) -> Option<Self> {
        let result = forecast::forecast_observations(observations, horizon)?;
        let filled = series::fill_missing_days(observations);
        Some(Self {
            result,
            recent_daily_mean: series::recent_mean(&filled, WEEK),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsightInputs {
    /// Ordered by route id.
    pub routes: Vec<RouteForecast>,
    pub top_category: Option<CategoryCount>,
    pub high_severity: Option<SeverityRoute>,
    pub system: Option<SystemForecast>,
}

#[derive(Debug, Clone)]
pub struct PredictiveReport {
    pub inputs: InsightInputs,
    pub suggestions: Vec<Suggestion>,
}

pub async fn generate(pool: &PgPool) -> anyhow::Result<PredictiveReport> {
    let routes = forecast_routes(pool).await?;
    let top_category = db::fetch_top_category(pool, AGGREGATE_WINDOW_DAYS).await?;
    let high_severity =
        db::fetch_high_severity_route(pool, AGGREGATE_WINDOW_DAYS, HIGH_SEVERITY_THRESHOLD).await?;

    let overall = db::fetch_daily_series(pool, None, SYSTEM_HISTORY_DAYS).await?;
    let system = tokio::task::spawn_blocking(move || {
        SystemForecast::from_observations(&overall, SYSTEM_HORIZON_DAYS)
    })
    .await
    .context("system-wide forecast task failed")?;

    let inputs = InsightInputs {
        routes,
        top_category,
        high_severity,
        system,
    };
    let suggestions = rank_suggestions(&inputs, Utc::now());
    info!(
        routes = inputs.routes.len(),
        suggestions = suggestions.len(),
        "predictive searches ready"
    );

    Ok(PredictiveReport {
        inputs,
        suggestions,
    })
}

pub async fn forecast_routes(pool: &PgPool) -> anyhow::Result<Vec<RouteForecast>> {
    let routes = db::fetch_active_routes(pool).await?;
    let pool = pool.clone();
    collect_route_forecasts(routes, move |route_id| {
        let pool = pool.clone();
        async move { db::fetch_daily_series(&pool, Some(route_id), ROUTE_HISTORY_DAYS).await }
    })
    .await
}

/// Loads and forecasts every route concurrently.
///
/// Routes with too little history are left out. The result is ordered by
/// route id regardless of completion order.
pub async fn collect_route_forecasts<L, F>(
    routes: Vec<Route>,
    load: L,
) -> anyhow::Result<Vec<RouteForecast>>
where
    L: Fn(i32) -> F,
    F: Future<Output = anyhow::Result<Vec<DailyObservation>>> + Send + 'static,
{
    let route_count = routes.len();
    let mut tasks = JoinSet::new();

    for route in routes {
        let pending = load(route.route_id);
        tasks.spawn(async move {
            let observations = pending
                .await
                .with_context(|| format!("failed to load route {}", route.route_id))?;
            let summary = tokio::task::spawn_blocking(move || {
                let span = debug_span!("route", route_id = route.route_id);
                let _guard = span.enter();
                let Some(result) =
                    forecast::forecast_observations(&observations, ROUTE_HORIZON_DAYS)
                else {
                    debug!(days = observations.len(), "not enough history, skipping");
                    return None;
                };
                Some(RouteForecast::summarize(&route, &observations, &result))
            })
            .await
            .context("route forecast task failed")?;
            anyhow::Ok(summary)
        });
    }

    let mut by_route = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        if let Some(summary) = joined.context("route task failed")?? {
            by_route.insert(summary.route_id, summary);
        }
    }

    info!(
        active = route_count,
        forecast = by_route.len(),
        "route forecasts complete"
    );
    Ok(by_route.into_values().collect())
}

/// Builds every applicable suggestion and keeps the most confident ones.
///
/// Ties keep emission order: routes, category, severity, system trend.
pub fn rank_suggestions(inputs: &InsightInputs, now: DateTime<Utc>) -> Vec<Suggestion> {
    let mut suggestions = route_suggestions(&inputs.routes);
    suggestions.extend(inputs.top_category.as_ref().map(category_suggestion));
    suggestions.extend(inputs.high_severity.as_ref().map(severity_suggestion));
    suggestions.extend(
        inputs
            .system
            .as_ref()
            .and_then(|system| system_suggestion(system, now)),
    );

    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

fn route_suggestions(routes: &[RouteForecast]) -> Vec<Suggestion> {
    let mut increasing: Vec<&RouteForecast> = routes
        .iter()
        .filter(|route| route.trend == Trend::Increasing)
        .collect();
    increasing.sort_by(|a, b| b.expected_change_pct.total_cmp(&a.expected_change_pct));

    increasing
        .into_iter()
        .take(MAX_ROUTE_SUGGESTIONS)
        .map(|route| Suggestion {
            title: format!("Route {} - Rising Contamination", route.route_code),
            description: format!(
                "Forecast predicts a {:.1}% increase. Expected {} events next week.",
                route.expected_change_pct, route.forecast_next_week
            ),
            query_type: QueryType::Route,
            query_params: QueryParams::Route {
                route_id: route.route_id,
            },
            confidence: (0.6 + route.expected_change_pct.abs() / 100.0).min(0.95),
            insight: format!(
                "Contamination on Route {} is forecast to keep rising. {} events were recorded \
                 over the last 7 days. Consider proactive education campaigns.",
                route.route_code, route.recent_events
            ),
        })
        .collect()
}

fn category_suggestion(category: &CategoryCount) -> Suggestion {
    Suggestion {
        title: format!("Focus on {}", category.description),
        description: format!(
            "{} events in the last {} days",
            category.count, AGGREGATE_WINDOW_DAYS
        ),
        query_type: QueryType::Category,
        query_params: QueryParams::Category {
            category_id: category.category_id,
        },
        confidence: CATEGORY_CONFIDENCE,
        insight: format!(
            "{} ({}) is the most common contamination type ({} events, avg severity {:.1}). \
             The pattern is likely to continue; consider targeted public education campaigns.",
            category.description, category.code, category.count, category.avg_severity
        ),
    }
}

fn severity_suggestion(route: &SeverityRoute) -> Suggestion {
    Suggestion {
        title: format!("High Severity Alert - Route {}", route.route_code),
        description: format!("Average severity: {:.1}/5", route.avg_severity),
        query_type: QueryType::Severity,
        query_params: QueryParams::Severity {
            route_id: route.route_id,
            min_severity: HIGH_SEVERITY_THRESHOLD as i32,
        },
        confidence: SEVERITY_CONFIDENCE,
        insight: format!(
            "Route {} has consistently high severity contamination (avg {:.1}/5 across {} events). \
             Immediate action is recommended.",
            route.route_code, route.avg_severity, route.event_count
        ),
    }
}

fn system_suggestion(system: &SystemForecast, now: DateTime<Utc>) -> Option<Suggestion> {
    let result = &system.result;
    if result.trend != Trend::Increasing {
        return None;
    }

    let horizon_days = result.horizon() as i64;
    Some(Suggestion {
        title: "Overall Contamination Trend Alert".to_string(),
        description: format!(
            "Forecast predicts a {:.1}% increase over the next {} days",
            result.expected_change, horizon_days
        ),
        query_type: QueryType::Trend,
        query_params: QueryParams::Trend {
            start_date: now.to_rfc3339(),
            end_date: (now + Duration::days(horizon_days)).to_rfc3339(),
        },
        confidence: (0.7 + result.expected_change.abs() / 200.0).min(0.9),
        insight: format!(
            "Contamination is forecast to rise system-wide: {} events per day expected in {} days \
             (currently {} per day). Consider a system-wide education campaign.",
            result.final_value() as i64,
            horizon_days,
            system.recent_daily_mean as i64
        ),
    })
}
