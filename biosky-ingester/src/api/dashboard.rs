//! Dashboard page

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;

use crate::stats::RecentEvent;
use crate::subscription::SubscriptionState;
use crate::AppState;

/// GET /
///
/// Connection state, cursor, counts and recent events, reloaded every 2 s
pub async fn dashboard_page(State(state): State<AppState>) -> impl IntoResponse {
    let subscription = &state.subscription;
    let counters = subscription.counters();
    let connection = subscription.state();

    let guard = state.stats.read().await;
    let stats = guard.stats.clone();
    let errors = stats.errors + counters.decode_errors + counters.handler_errors;
    let events = render_events(&guard.recent_events());
    let uptime = format_duration(guard.uptime_secs());
    drop(guard);

    let cursor = subscription
        .cursor()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    let last_commit = subscription
        .last_commit()
        .map(|c| format!("{} at {}", c.seq, escape_html(&c.time)))
        .unwrap_or_else(|| "-".to_string());
    let status_class = if connection == SubscriptionState::Connected {
        "connected"
    } else {
        "disconnected"
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta http-equiv="refresh" content="2">
    <title>BioSky Ingester</title>
    <style>
        body {{ font-family: monospace; padding: 1rem; }}
        table {{ border-collapse: collapse; margin-bottom: 1rem; }}
        td, th {{ text-align: left; padding: 0.25rem 1rem 0.25rem 0; }}
        .connected {{ color: green; }}
        .disconnected {{ color: red; }}
        .build {{ color: #888; }}
    </style>
</head>
<body>
    <h1>BioSky Ingester</h1>
    <div class="build">v{version} ({git_hash})</div>

    <table>
        <tr><td>Status</td><td class="{status_class}">{status}</td></tr>
        <tr><td>Cursor</td><td>{cursor}</td></tr>
        <tr><td>Last commit</td><td>{last_commit}</td></tr>
        <tr><td>Uptime</td><td>{uptime}</td></tr>
        <tr><td>Reconnects</td><td>{reconnects}</td></tr>
    </table>

    <h2>Stats</h2>
    <table>
        <tr><td>Occurrences</td><td>{occurrences}</td></tr>
        <tr><td>Identifications</td><td>{identifications}</td></tr>
        <tr><td>Comments</td><td>{comments}</td></tr>
        <tr><td>Errors</td><td>{errors}</td></tr>
    </table>

    <h2>Recent Events</h2>
    {events}
</body>
</html>"#,
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        status_class = status_class,
        status = state_label(connection),
        cursor = cursor,
        last_commit = last_commit,
        uptime = uptime,
        reconnects = counters.reconnects,
        occurrences = stats.occurrences,
        identifications = stats.identifications,
        comments = stats.comments,
        errors = errors,
        events = events,
    ))
}

fn state_label(state: SubscriptionState) -> &'static str {
    match state {
        SubscriptionState::Disconnected => "Disconnected",
        SubscriptionState::Connecting => "Connecting",
        SubscriptionState::Connected => "Connected",
        SubscriptionState::Reconnecting => "Reconnecting",
        SubscriptionState::Stopped => "Stopped",
    }
}

fn render_events(events: &[RecentEvent]) -> String {
    if events.is_empty() {
        return "<div>No events yet...</div>".to_string();
    }
    events
        .iter()
        .map(|e| {
            format!(
                "<div class=\"event\">{} [{}] {} {}</div>",
                escape_html(&e.time),
                e.kind,
                e.action,
                escape_html(&e.uri)
            )
        })
        .collect::<Vec<_>>()
        .join("\n    ")
}

fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Record URIs and relay timestamps come from the network
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/", get(dashboard_page))
}
