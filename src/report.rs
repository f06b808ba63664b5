use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::forecast::{ForecastMethod, Trend};
use crate::insights::{PredictiveReport, RouteForecast};

pub fn summarize_by_trend(routes: &[RouteForecast]) -> Vec<(Trend, usize)> {
    [Trend::Increasing, Trend::Stable, Trend::Decreasing]
        .into_iter()
        .map(|trend| (trend, routes.iter().filter(|r| r.trend == trend).count()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

fn method_label(method: &ForecastMethod) -> String {
    match method {
        ForecastMethod::Sarima { config, aic } => format!("SARIMA {config}, AIC {aic:.1}"),
        ForecastMethod::Heuristic => "moving-average fallback".to_string(),
    }
}

pub fn build_report(report: &PredictiveReport, generated_at: DateTime<Utc>) -> String {
    let inputs = &report.inputs;
    let mut output = String::new();

    let _ = writeln!(output, "# Contamination Forecast Report");
    let _ = writeln!(output, "Generated {}", generated_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Predictive Searches");

    if report.suggestions.is_empty() {
        let _ = writeln!(output, "No suggestions for this snapshot.");
    } else {
        for suggestion in report.suggestions.iter() {
            let _ = writeln!(
                output,
                "- [{:.2}] {}: {}",
                suggestion.confidence, suggestion.title, suggestion.description
            );
            let _ = writeln!(output, "  {}", suggestion.insight);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trend Mix");

    let mix = summarize_by_trend(&inputs.routes);
    if mix.is_empty() {
        let _ = writeln!(output, "No routes had enough history to forecast.");
    } else {
        for (trend, count) in mix {
            let _ = writeln!(output, "- {}: {} routes", trend.as_str(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Route Outlook");

    let mut routes: Vec<&RouteForecast> = inputs.routes.iter().collect();
    routes.sort_by(|a, b| b.expected_change_pct.total_cmp(&a.expected_change_pct));
    if routes.is_empty() {
        let _ = writeln!(output, "No route forecasts available.");
    } else {
        for route in routes {
            let _ = writeln!(
                output,
                "- Route {}: {} ({:+.1}%), {} events last 7 days, avg severity {:.1}, avg contamination {:.1}%, {} expected next week [{}]",
                route.route_code,
                route.trend.as_str(),
                route.expected_change_pct,
                route.recent_events,
                route.avg_severity,
                route.avg_contamination_pct,
                route.forecast_next_week,
                method_label(&route.method)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## System-wide Outlook");

    match &inputs.system {
        Some(system) => {
            let result = &system.result;
            let lower = result.lower_bound.last().copied().unwrap_or(0.0);
            let upper = result.upper_bound.last().copied().unwrap_or(0.0);
            let _ = writeln!(
                output,
                "- {} ({:+.1}%): {:.1} events per day in {} days (95% band {:.1} to {:.1}), currently {:.1} [{}]",
                result.trend.as_str(),
                result.expected_change,
                result.final_value(),
                result.horizon(),
                lower,
                upper,
                system.recent_daily_mean,
                method_label(&result.method)
            );
        }
        None => {
            let _ = writeln!(output, "Not enough system-wide history to forecast.");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::forecast::ForecastResult;
    use crate::insights::{InsightInputs, SystemForecast};
    use crate::sarima::ModelConfig;

    fn route(route_id: i32, trend: Trend, change: f64, method: ForecastMethod) -> RouteForecast {
        RouteForecast {
            route_id,
            route_code: format!("R-{route_id:03}"),
            trend,
            expected_change_pct: change,
            recent_events: 14,
            avg_severity: 3.0,
            avg_contamination_pct: 22.0,
            forecast_next_week: 3,
            method,
        }
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn trend_mix_counts_routes() {
        let routes = vec![
            route(1, Trend::Increasing, 12.0, ForecastMethod::Heuristic),
            route(2, Trend::Increasing, 20.0, ForecastMethod::Heuristic),
            route(3, Trend::Decreasing, -8.0, ForecastMethod::Heuristic),
        ];
        assert_eq!(
            summarize_by_trend(&routes),
            vec![(Trend::Increasing, 2), (Trend::Decreasing, 1)]
        );
    }

    #[test]
    fn empty_report_explains_itself() {
        let report = PredictiveReport {
            inputs: InsightInputs::default(),
            suggestions: Vec::new(),
        };
        let output = build_report(&report, generated_at());

        assert!(output.starts_with("# Contamination Forecast Report"));
        assert!(output.contains("Generated 2025-06-01 08:30 UTC"));
        assert!(output.contains("No suggestions for this snapshot."));
        assert!(output.contains("Not enough system-wide history to forecast."));
    }

    #[test]
    fn routes_listed_by_expected_change() {
        let config = ModelConfig::new((0, 1, 1), (0, 1, 1, 7));
        let inputs = InsightInputs {
            routes: vec![
                route(1, Trend::Decreasing, -4.0, ForecastMethod::Heuristic),
                route(2, Trend::Increasing, 31.0, ForecastMethod::Sarima { config, aic: 120.31 }),
            ],
            system: Some(SystemForecast {
                result: ForecastResult {
                    forecast: vec![11.0; 14],
                    lower_bound: vec![8.0; 14],
                    upper_bound: vec![14.0; 14],
                    trend: Trend::Increasing,
                    expected_change: 10.0,
                    method: ForecastMethod::Heuristic,
                },
                recent_daily_mean: 10.0,
            }),
            ..Default::default()
        };
        let report = PredictiveReport {
            suggestions: crate::insights::rank_suggestions(&inputs, generated_at()),
            inputs,
        };
        let output = build_report(&report, generated_at());

        let rising = output.find("Route R-002: increasing (+31.0%)").unwrap();
        let falling = output.find("Route R-001: decreasing (-4.0%)").unwrap();
        assert!(rising < falling);
        assert!(output.contains("SARIMA (0,1,1)(0,1,1,7), AIC 120.3"));
        assert!(output.contains("11.0 events per day in 14 days (95% band 8.0 to 14.0)"));
        assert!(output.contains("[0.91] Route R-002 - Rising Contamination"));
    }
}
