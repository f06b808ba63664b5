use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DailyObservation {
    pub date: NaiveDate,
    pub count: i64,
    #[serde(default)]
    pub avg_severity: Option<f64>,
    #[serde(default)]
    pub avg_contamination_pct: Option<f64>,
}

#[cfg(test)]
impl DailyObservation {
    pub fn new(date: NaiveDate, count: i64) -> Self {
        Self {
            date,
            count,
            avg_severity: None,
            avg_contamination_pct: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub route_id: i32,
    pub route_code: String,
}

#[derive(Debug, Clone)]
pub struct CategoryCount {
    pub category_id: i32,
    pub code: String,
    pub description: String,
    pub count: i64,
    pub avg_severity: f64,
}

#[derive(Debug, Clone)]
pub struct SeverityRoute {
    pub route_id: i32,
    pub route_code: String,
    pub event_count: i64,
    pub avg_severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Route,
    Category,
    Severity,
    Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum QueryParams {
    Route {
        route_id: i32,
    },
    Category {
        category_id: i32,
    },
    Severity {
        route_id: i32,
        min_severity: i32,
    },
    Trend {
        start_date: String,
        end_date: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub title: String,
    pub description: String,
    pub query_type: QueryType,
    pub query_params: QueryParams,
    pub confidence: f64,
    pub insight: String,
}
