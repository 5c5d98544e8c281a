//! ==============================================================================
//! render.rs - server-side html for the dashboard page
//! ==============================================================================
//!
//! renders one dashboard view:
//!     - range selector (GET /?hours=N) and a manual refresh button (POST /refresh)
//!     - metric tiles (current + mean, min/max)
//!     - per-metric time-series charts and a combined chart, as inline svg
//!     - the recent-measurements table and the latest comments
//!
//! everything user-supplied goes through html_escape.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};

use crate::dashboard::DashboardView;
use crate::domain::{Comment, SensorReading, RANGE_OPTIONS};
use crate::stats::MetricStats;

const CHART_WIDTH: f64 = 600.0;
const CHART_HEIGHT: f64 = 200.0;
const CHART_PAD: f64 = 24.0;

pub struct PageOptions {
    /// seconds; None disables the meta refresh
    pub auto_refresh: Option<u64>,
}

/// one line on a chart
struct Trace {
    name: &'static str,
    color: &'static str,
    points: Vec<(DateTime<Utc>, f64)>,
}

impl Trace {
    fn of(name: &'static str, color: &'static str, rows: &[SensorReading], metric: fn(&SensorReading) -> Option<f64>) -> Self {
        // rows are newest first; charts run left to right in time
        let points = rows.iter().rev().filter_map(|r| metric(r).map(|v| (r.recorded_at, v))).collect();
        Self { name, color, points }
    }
}

pub fn dashboard_page(view: &DashboardView, comments: &[Comment], options: &PageOptions) -> String {
    let mut body = String::new();

    body.push_str("<h1>Environment monitoring</h1>\n");
    body.push_str(&controls(view.hours));

    if let Some(error) = &view.error {
        body.push_str(&format!(
            "<p class=\"error\">sensor data could not be loaded: {}</p>\n",
            html_escape(error)
        ));
    }
    if view.truncated {
        body.push_str(&format!(
            "<p class=\"warning\">only the latest {} rows are shown; pick a shorter range for the full window</p>\n",
            view.row_limit
        ));
    }

    match &view.stats {
        None => body.push_str("<p class=\"empty\">No sensor data. Check that the device is sending readings.</p>\n"),
        Some(stats) => {
            body.push_str("<section class=\"tiles\">\n");
            body.push_str(&tile("Temperature", stats.temperature.as_ref(), "°C", 1));
            body.push_str(&tile("Humidity", stats.humidity.as_ref(), "%", 1));
            body.push_str(&tile("Light", stats.light.as_ref(), "", 0));
            body.push_str(&format!(
                "<div class=\"tile\"><h3>Rows</h3><p>{}</p><small>last update {}</small></div>\n",
                stats.count,
                stats.latest_at.format("%H:%M:%S")
            ));
            body.push_str("</section>\n");

            let temperature = Trace::of("Temperature (°C)", "red", &view.readings, |r| r.temperature);
            let humidity = Trace::of("Humidity (%)", "blue", &view.readings, |r| r.humidity);
            let light = Trace::of("Light", "orange", &view.readings, |r| r.light);

            body.push_str("<section class=\"charts\">\n");
            body.push_str(&line_chart("Temperature over time", std::slice::from_ref(&temperature)));
            body.push_str(&line_chart("Humidity over time", std::slice::from_ref(&humidity)));
            body.push_str(&line_chart("Light over time", std::slice::from_ref(&light)));
            body.push_str(&line_chart("All measurements", &[temperature, humidity, light]));
            body.push_str("</section>\n");

            body.push_str(&recent_table(&view.recent));
        }
    }

    if !comments.is_empty() {
        body.push_str("<section class=\"comments\">\n<h2>Recent comments</h2>\n");
        for c in comments {
            body.push_str(&format!(
                "<article><strong>{}</strong> <em>{}</em> <small>{}</small><p>{}</p></article>\n",
                html_escape(&c.username),
                c.category.label(),
                c.created_at.format("%Y-%m-%d %H:%M"),
                html_escape(&c.content)
            ));
        }
        body.push_str("</section>\n");
    }

    let refresh = options
        .auto_refresh
        .map(|secs| format!("<meta http-equiv=\"refresh\" content=\"{secs};url=/?hours={}\">", view.hours))
        .unwrap_or_default();

    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Environment monitoring</title>{refresh}</head>
<body style="font-family: system-ui; padding: 2rem;">
{body}</body>
</html>"#
    )
}

/// range selector plus the manual refresh button
fn controls(hours: u32) -> String {
    let options: String = RANGE_OPTIONS
        .iter()
        .map(|h| {
            let selected = if *h == hours { " selected" } else { "" };
            format!("<option value=\"{h}\"{selected}>last {h} hours</option>")
        })
        .collect();
    format!(
        r#"<nav class="controls">
<form method="get" action="/"><select name="hours">{options}</select> <button type="submit">Show</button></form>
<form method="post" action="/refresh"><input type="hidden" name="hours" value="{hours}"><button type="submit">Refresh</button></form>
</nav>
"#
    )
}

fn tile(name: &str, stats: Option<&MetricStats>, unit: &str, precision: usize) -> String {
    match stats {
        Some(s) => format!(
            "<div class=\"tile\"><h3>{name}</h3><p>{:.p$}{unit}</p><small>mean {:.p$}{unit} · min {:.p$} · max {:.p$}</small></div>\n",
            s.current,
            s.mean,
            s.min,
            s.max,
            p = precision
        ),
        None => format!("<div class=\"tile\"><h3>{name}</h3><p>-</p></div>\n"),
    }
}

fn recent_table(rows: &[SensorReading]) -> String {
    let mut table = String::from(
        "<table class=\"recent\">\n<tr><th>Time</th><th>Temperature (°C)</th><th>Humidity (%)</th><th>Light</th></tr>\n",
    );
    for r in rows {
        table.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            cell(r.temperature, 1),
            cell(r.humidity, 1),
            cell(r.light, 0)
        ));
    }
    table.push_str("</table>\n");
    table
}

/// svg line chart; all traces share the time axis and the value axis
fn line_chart(title: &str, traces: &[Trace]) -> String {
    let all = || traces.iter().flat_map(|t| t.points.iter());
    let (Some(t0), Some(t1)) = (all().map(|p| p.0).min(), all().map(|p| p.0).max()) else {
        return format!("<figure class=\"chart\"><figcaption>{title}</figcaption><p>-</p></figure>\n");
    };
    let lo = all().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let hi = all().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    // flat series still get a visible band
    let (lo, hi) = if hi - lo < f64::EPSILON { (lo - 1.0, hi + 1.0) } else { (lo, hi) };
    let span_ms = (t1 - t0).num_milliseconds().max(1) as f64;

    let x = |t: DateTime<Utc>| CHART_PAD + (t - t0).num_milliseconds() as f64 / span_ms * (CHART_WIDTH - 2.0 * CHART_PAD);
    let y = |v: f64| CHART_HEIGHT - CHART_PAD - (v - lo) / (hi - lo) * (CHART_HEIGHT - 2.0 * CHART_PAD);

    let mut svg = format!(
        "<figure class=\"chart\"><figcaption>{title}</figcaption>\n<svg viewBox=\"0 0 {CHART_WIDTH} {CHART_HEIGHT}\" width=\"{CHART_WIDTH}\" height=\"{CHART_HEIGHT}\" role=\"img\">\n"
    );
    svg.push_str(&format!(
        "<text x=\"2\" y=\"{:.1}\" font-size=\"10\">{hi:.1}</text><text x=\"2\" y=\"{:.1}\" font-size=\"10\">{lo:.1}</text>\n",
        CHART_PAD - 6.0,
        CHART_HEIGHT - CHART_PAD + 12.0
    ));
    for trace in traces {
        let points = trace
            .points
            .iter()
            .map(|(t, v)| format!("{:.1},{:.1}", x(*t), y(*v)))
            .collect::<Vec<_>>()
            .join(" ");
        svg.push_str(&format!(
            "<polyline fill=\"none\" stroke=\"{}\" stroke-width=\"2\" points=\"{points}\"><title>{}</title></polyline>\n",
            trace.color, trace.name
        ));
    }
    svg.push_str(&format!(
        "<text x=\"{CHART_PAD}\" y=\"{CHART_HEIGHT}\" font-size=\"10\">{}</text><text x=\"{:.1}\" y=\"{CHART_HEIGHT}\" font-size=\"10\" text-anchor=\"end\">{}</text>\n",
        t0.format("%m-%d %H:%M"),
        CHART_WIDTH - CHART_PAD,
        t1.format("%m-%d %H:%M")
    ));
    svg.push_str("</svg></figure>\n");
    svg
}

fn cell(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommentCategory;
    use crate::stats::compute_stats;
    use crate::testing::reading;
    use chrono::Duration;

    fn view_of(rows: Vec<SensorReading>) -> DashboardView {
        DashboardView {
            hours: 24,
            stats: compute_stats(&rows),
            recent: rows.clone(),
            readings: rows,
            row_limit: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn empty_view_shows_no_data() {
        let html = dashboard_page(&DashboardView::default(), &[], &PageOptions { auto_refresh: None });
        assert!(html.contains("No sensor data"));
        assert!(!html.contains("http-equiv"));
        assert!(!html.contains("<svg"));
    }

    #[test]
    fn tiles_and_warning() {
        let mut view = view_of(vec![reading(1, Utc::now(), 23.46, 51.0, 700.0)]);
        view.truncated = true;
        view.row_limit = 1;
        let html = dashboard_page(&view, &[], &PageOptions { auto_refresh: Some(30) });
        assert!(html.contains("23.5°C"));
        assert!(html.contains("only the latest 1 rows"));
        assert!(html.contains("content=\"30;url=/?hours=24\""));
    }

    #[test]
    fn charts_plot_each_metric_oldest_to_newest() {
        let now = Utc::now();
        // newest first, as the pipeline delivers them
        let view = view_of(vec![
            reading(3, now, 30.0, 60.0, 300.0),
            reading(2, now - Duration::hours(1), 25.0, 55.0, 200.0),
            reading(1, now - Duration::hours(2), 20.0, 50.0, 100.0),
        ]);
        let html = dashboard_page(&view, &[], &PageOptions { auto_refresh: None });

        assert_eq!(html.matches("<svg").count(), 4);
        assert_eq!(html.matches("<polyline").count(), 6);
        assert!(html.contains("Temperature over time"));
        assert!(html.contains("All measurements"));

        // single-metric chart: oldest point at the left/bottom, newest at the right/top
        let x_left = CHART_PAD;
        let x_right = CHART_WIDTH - CHART_PAD;
        let expected = format!(
            "points=\"{x_left:.1},{:.1} {:.1},{:.1} {x_right:.1},{CHART_PAD:.1}\"",
            CHART_HEIGHT - CHART_PAD,
            CHART_WIDTH / 2.0,
            CHART_HEIGHT / 2.0
        );
        assert!(html.contains(&expected), "{html}");
    }

    #[test]
    fn missing_metric_values_are_skipped() {
        let now = Utc::now();
        let mut gap = reading(2, now, 22.0, 40.0, 10.0);
        gap.light = None;
        let view = view_of(vec![gap, reading(1, now - Duration::hours(1), 21.0, 41.0, 12.0)]);
        let html = dashboard_page(&view, &[], &PageOptions { auto_refresh: None });
        let light_chart = html.split("Light over time").nth(1).unwrap();
        let points = light_chart.split("points=\"").nth(1).unwrap().split('"').next().unwrap();
        assert_eq!(points.split(' ').count(), 1);
    }

    #[test]
    fn range_selector_marks_current_range() {
        let view = DashboardView { hours: 6, ..Default::default() };
        let html = dashboard_page(&view, &[], &PageOptions { auto_refresh: None });
        assert!(html.contains("<option value=\"6\" selected>"));
        assert!(html.contains("<option value=\"72\">"));
        assert!(html.contains("action=\"/refresh\""));
        assert!(html.contains("name=\"hours\" value=\"6\""));
    }

    #[test]
    fn comments_are_escaped() {
        let comment = Comment {
            id: 1,
            user_id: None,
            username: "<b>x</b>".to_string(),
            content: "a & b".to_string(),
            category: CommentCategory::Question,
            created_at: Utc::now(),
        };
        let html = dashboard_page(&DashboardView::default(), &[comment], &PageOptions { auto_refresh: None });
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(html.contains("a &amp; b"));
    }
}
