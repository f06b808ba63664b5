use anyhow::Context;
use sqlx::{PgPool, Row};

use crate::models::{CategoryCount, DailyObservation, Route, SeverityRoute};

pub async fn fetch_active_routes(pool: &PgPool) -> anyhow::Result<Vec<Route>> {
    let rows = sqlx::query(
        "SELECT route_id, route_code FROM routes WHERE active = TRUE ORDER BY route_id",
    )
    .fetch_all(pool)
    .await
    .context("failed to load active routes")?;

    Ok(rows
        .into_iter()
        .map(|row| Route {
            route_id: row.get("route_id"),
            route_code: row.get("route_code"),
        })
        .collect())
}

// Pickup days without contamination come back with a zero count.
pub async fn fetch_daily_series(
    pool: &PgPool,
    route_id: Option<i32>,
    days: i32,
) -> anyhow::Result<Vec<DailyObservation>> {
    let mut query = String::from(
        "SELECT p.pickup_time::date AS day, \
         COUNT(ce.contamination_id) AS contamination_count, \
         AVG(ce.severity)::float8 AS avg_severity, \
         AVG(ce.estimated_contamination_pct)::float8 AS avg_contamination_pct \
         FROM pickups p \
         LEFT JOIN contamination_events ce ON p.pickup_id = ce.pickup_id \
         WHERE p.pickup_time >= CURRENT_DATE - make_interval(days => $1)",
    );

    if route_id.is_some() {
        query.push_str(" AND p.route_id = $2");
    }
    query.push_str(" GROUP BY p.pickup_time::date ORDER BY day");

    let mut rows = sqlx::query(&query).bind(days);
    if let Some(value) = route_id {
        rows = rows.bind(value);
    }

    let records = rows
        .fetch_all(pool)
        .await
        .with_context(|| match route_id {
            Some(id) => format!("failed to load daily series for route {id}"),
            None => "failed to load system-wide daily series".to_string(),
        })?;

    let mut observations = Vec::with_capacity(records.len());
    for row in records {
        observations.push(DailyObservation {
            date: row.get("day"),
            count: row.get("contamination_count"),
            avg_severity: row.get("avg_severity"),
            avg_contamination_pct: row.get("avg_contamination_pct"),
        });
    }

    Ok(observations)
}

pub async fn fetch_top_category(pool: &PgPool, days: i32) -> anyhow::Result<Option<CategoryCount>> {
    let row = sqlx::query(
        r#"
        SELECT cc.category_id, cc.code, cc.description,
               COUNT(ce.contamination_id) AS event_count,
               AVG(ce.severity)::float8 AS avg_severity
        FROM contamination_events ce
        INNER JOIN contamination_categories cc ON ce.category_id = cc.category_id
        INNER JOIN pickups p ON ce.pickup_id = p.pickup_id
        WHERE p.pickup_time >= CURRENT_DATE - make_interval(days => $1)
        GROUP BY cc.category_id, cc.code, cc.description
        ORDER BY event_count DESC, cc.category_id
        LIMIT 1
        "#,
    )
    .bind(days)
    .fetch_optional(pool)
    .await
    .context("failed to load top contamination category")?;

    Ok(row.map(|row| CategoryCount {
        category_id: row.get("category_id"),
        code: row.get("code"),
        description: row.get("description"),
        count: row.get("event_count"),
        avg_severity: row.get("avg_severity"),
    }))
}

pub async fn fetch_high_severity_route(
    pool: &PgPool,
    days: i32,
    min_avg_severity: f64,
) -> anyhow::Result<Option<SeverityRoute>> {
    let row = sqlx::query(
        r#"
        SELECT r.route_id, r.route_code,
               COUNT(ce.contamination_id) AS event_count,
               AVG(ce.severity)::float8 AS avg_severity
        FROM contamination_events ce
        INNER JOIN pickups p ON ce.pickup_id = p.pickup_id
        INNER JOIN routes r ON p.route_id = r.route_id
        WHERE p.pickup_time >= CURRENT_DATE - make_interval(days => $1)
        GROUP BY r.route_id, r.route_code
        HAVING AVG(ce.severity)::float8 >= $2
        ORDER BY avg_severity DESC, r.route_id
        LIMIT 1
        "#,
    )
    .bind(days)
    .bind(min_avg_severity)
    .fetch_optional(pool)
    .await
    .context("failed to load high severity route")?;

    Ok(row.map(|row| SeverityRoute {
        route_id: row.get("route_id"),
        route_code: row.get("route_code"),
        event_count: row.get("event_count"),
        avg_severity: row.get("avg_severity"),
    }))
}
