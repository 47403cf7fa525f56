//! Web panel for MinePanel.
//! Serves the dashboard/console/settings page, the JSON API behind it and the
//! live console event stream.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatcher::CommandDispatcher;
use crate::message_log::LogEvent;
use crate::server_sim::{GameServer, LifecycleAction};
use crate::session::ConsoleSession;

pub struct PanelState {
    pub title: String,
    pub dispatcher: CommandDispatcher,
    pub game: GameServer,
    /// Ends open event streams so graceful shutdown is not held up by them.
    pub closing: CancellationToken,
}

impl PanelState {
    pub fn new(
        title: impl Into<String>,
        dispatcher: CommandDispatcher,
        game: GameServer,
        closing: CancellationToken,
    ) -> Self {
        Self {
            title: title.into(),
            dispatcher,
            game,
            closing,
        }
    }

    fn session(&self) -> &Arc<ConsoleSession> {
        self.dispatcher.session()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Dashboard,
    Console,
    Settings,
}

impl Tab {
    fn as_str(self) -> &'static str {
        match self {
            Tab::Dashboard => "dashboard",
            Tab::Console => "console",
            Tab::Settings => "settings",
        }
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    tab: Tab,
}

#[derive(Deserialize)]
struct CommandRequest {
    command: String,
}

/// Create the panel router
pub fn panel_router(state: Arc<PanelState>) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/api/status", get(api_status))
        .route("/api/history", get(api_history))
        .route("/api/start", post(api_start))
        .route("/api/stop", post(api_stop))
        .route("/api/restart", post(api_restart))
        .route("/api/console", get(api_console))
        .route("/api/console/command", post(api_command))
        .route("/api/console/clear", post(api_clear))
        .route("/api/console/reconnect", post(api_reconnect))
        .route("/api/console/events", get(api_events))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn page_handler(
    State(state): State<Arc<PanelState>>,
    Query(query): Query<PageQuery>,
) -> Html<String> {
    Html(render_page(&state.title, query.tab))
}

async fn api_status(State(state): State<Arc<PanelState>>) -> Json<serde_json::Value> {
    Json(json!(state.game.info()))
}

async fn api_history(State(state): State<Arc<PanelState>>) -> Json<serde_json::Value> {
    Json(json!(state.game.history()))
}

async fn api_start(State(state): State<Arc<PanelState>>) -> Response {
    run_action(&state, LifecycleAction::Start)
}

async fn api_stop(State(state): State<Arc<PanelState>>) -> Response {
    run_action(&state, LifecycleAction::Stop)
}

async fn api_restart(State(state): State<Arc<PanelState>>) -> Response {
    run_action(&state, LifecycleAction::Restart)
}

fn run_action(state: &PanelState, action: LifecycleAction) -> Response {
    info!(action = action.as_str(), "lifecycle action requested");
    match state.game.apply(action) {
        Ok(server) => {
            let status = if action == LifecycleAction::Restart {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (status, Json(json!(server))).into_response()
        }
        Err(e) => (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn api_console(State(state): State<Arc<PanelState>>) -> Json<serde_json::Value> {
    let session = state.session();
    let entries = session.log().snapshot();
    Json(json!({
        "session": session.id(),
        "connection": session.state(),
        "capacity": session.log().capacity(),
        "transitions": session.connection().history(),
        "entries": &entries[..],
    }))
}

async fn api_command(
    State(state): State<Arc<PanelState>>,
    Json(request): Json<CommandRequest>,
) -> Response {
    let submission = state.dispatcher.submit(&request.command);
    Json(json!(submission)).into_response()
}

async fn api_clear(State(state): State<Arc<PanelState>>) -> StatusCode {
    state.session().clear();
    StatusCode::NO_CONTENT
}

async fn api_reconnect(State(state): State<Arc<PanelState>>) -> Json<serde_json::Value> {
    let connected = state.session().reconnect_now().await;
    Json(json!({ "connected": connected, "connection": state.session().state() }))
}

async fn api_events(
    State(state): State<Arc<PanelState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.session();
    let entries = BroadcastStream::new(session.log().subscribe()).filter_map(|event| match event {
        Ok(LogEvent::Appended(entry)) => Event::default().event("entry").json_data(entry).ok(),
        Ok(LogEvent::Cleared) => Some(Event::default().event("clear").data("")),
        // The client refetches the snapshot when it fell behind.
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            Some(Event::default().event("resync").data(missed.to_string()))
        }
    });
    let connection = WatchStream::new(session.connection().subscribe())
        .map(|state| Event::default().event("connection").data(state.to_string()));

    let events = futures_util::StreamExt::take_until(
        entries.merge(connection),
        state.closing.clone().cancelled_owned(),
    );
    Sse::new(events.map(Ok)).keep_alive(KeepAlive::default())
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_page(title: &str, tab: Tab) -> String {
    let mut html = PANEL_HTML
        .replace("{{TITLE}}", &escape_html(title))
        .replace("{{ACTIVE_TAB}}", tab.as_str());
    for other in [Tab::Dashboard, Tab::Console, Tab::Settings] {
        let marker = format!("{{{{{}_CLASS}}}}", other.as_str().to_uppercase());
        let class = if other == tab { "active" } else { "" };
        html = html.replace(&marker, class);
    }
    html
}

const PANEL_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>MinePanel - {{TITLE}}</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #0f0f1a;
            color: #fff;
            min-height: 100vh;
            display: flex;
        }
        nav {
            width: 220px;
            background: linear-gradient(180deg, #1a1a2e 0%, #16213e 100%);
            border-right: 1px solid rgba(255,255,255,0.1);
            padding: 24px 12px;
        }
        nav h1 { font-size: 20px; margin: 0 12px 24px; }
        nav a {
            display: block;
            color: #888;
            text-decoration: none;
            padding: 10px 12px;
            border-radius: 8px;
            margin-bottom: 4px;
        }
        nav a.active, nav a:hover { background: rgba(79,172,254,0.15); color: #4facfe; }
        main { flex: 1; padding: 30px; max-width: 1400px; }
        section { display: none; }
        section.active { display: block; }
        h2 { font-size: 26px; margin-bottom: 20px; }
        .actions { display: flex; gap: 10px; margin-bottom: 24px; }
        .actions button, .console-form button, .settings button {
            padding: 10px 18px;
            border-radius: 8px;
            border: 1px solid rgba(255,255,255,0.2);
            background: rgba(255,255,255,0.05);
            color: #fff;
            font-weight: 600;
            cursor: pointer;
        }
        .actions .start { color: #4caf50; border-color: #4caf50; }
        .actions .stop { color: #ff5252; border-color: #ff5252; }
        .actions .restart { color: #ff9800; border-color: #ff9800; }
        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
        }
        .stat-card {
            background: linear-gradient(135deg, rgba(255,255,255,0.1) 0%, rgba(255,255,255,0.05) 100%);
            padding: 25px;
            border-radius: 12px;
            border: 1px solid rgba(255,255,255,0.1);
        }
        .stat-card h3 {
            color: #888;
            font-size: 12px;
            text-transform: uppercase;
            letter-spacing: 1px;
            margin-bottom: 10px;
        }
        .stat-card .value { font-size: 30px; font-weight: 700; color: #4facfe; }
        .badge {
            display: inline-block;
            padding: 3px 10px;
            border-radius: 999px;
            font-size: 11px;
            font-weight: 700;
            text-transform: uppercase;
            letter-spacing: 1px;
            margin-left: 10px;
            vertical-align: middle;
        }
        .badge.online, .badge.connected { background: rgba(76,175,80,0.2); color: #4caf50; }
        .badge.offline, .badge.disconnected { background: rgba(255,82,82,0.2); color: #ff5252; }
        .badge.starting, .badge.connecting { background: rgba(255,152,0,0.2); color: #ff9800; }
        .console-log {
            height: calc(100vh - 260px);
            overflow-y: auto;
            background: rgba(0,0,0,0.4);
            border: 1px solid rgba(255,255,255,0.1);
            border-radius: 12px;
            padding: 20px;
            font-family: 'SFMono-Regular', Consolas, monospace;
            font-size: 13px;
        }
        .line { display: flex; gap: 14px; margin-bottom: 4px; }
        .line .ts { color: #555; flex-shrink: 0; }
        .line.info .text { color: #ccc; }
        .line.success .text { color: #4caf50; }
        .line.warn .text { color: #ffc107; }
        .line.error .text { color: #ff5252; font-weight: 700; }
        .empty { color: #555; text-align: center; margin-top: 40px; }
        .console-form { display: flex; gap: 10px; margin-top: 14px; }
        .console-form input, .settings input {
            flex: 1;
            padding: 12px 16px;
            border: 1px solid rgba(255,255,255,0.2);
            border-radius: 8px;
            background: rgba(255,255,255,0.05);
            color: #fff;
            font-family: monospace;
        }
        .panels { display: grid; grid-template-columns: 2fr 1fr; gap: 20px; margin-top: 24px; }
        .panel-card {
            background: rgba(255,255,255,0.05);
            border: 1px solid rgba(255,255,255,0.1);
            border-radius: 12px;
            padding: 20px;
        }
        .panel-card h3 { font-size: 16px; margin-bottom: 16px; }
        .chart { height: 200px; display: flex; align-items: flex-end; gap: 6px; }
        .chart .bar {
            flex: 1;
            background: rgba(79,172,254,0.2);
            border-top: 2px solid #4facfe;
            border-radius: 2px 2px 0 0;
        }
        .chart-times { display: flex; justify-content: space-between; margin-top: 10px; color: #555; font-family: monospace; font-size: 11px; }
        .event { display: flex; gap: 12px; font-size: 13px; margin-bottom: 10px; }
        .event .ts { color: #555; font-family: monospace; flex-shrink: 0; }
        .event.join .text { color: #4caf50; }
        .event.leave .text { color: #ff9800; }
        .settings { max-width: 520px; }
        .settings label { display: block; color: #aaa; font-size: 14px; margin: 16px 0 6px; }
        .settings input { width: 100%; }
        .settings button { margin-top: 20px; }
    </style>
</head>
<body data-tab="{{ACTIVE_TAB}}">
    <nav>
        <h1>⛏️ MinePanel</h1>
        <a href="/?tab=dashboard" class="{{DASHBOARD_CLASS}}">Dashboard</a>
        <a href="/?tab=console" class="{{CONSOLE_CLASS}}">Console</a>
        <a href="/?tab=settings" class="{{SETTINGS_CLASS}}">Settings</a>
    </nav>
    <main>
        <section id="dashboard" class="{{DASHBOARD_CLASS}}">
            <h2>Server Dashboard <span id="server-status" class="badge">...</span></h2>
            <div class="actions">
                <button class="start" onclick="lifecycle('start')">Start</button>
                <button class="stop" onclick="lifecycle('stop')">Stop</button>
                <button class="restart" onclick="lifecycle('restart')">Restart</button>
            </div>
            <div class="stats-grid">
                <div class="stat-card"><h3>CPU Usage</h3><div class="value" id="cpu">-</div></div>
                <div class="stat-card"><h3>Memory</h3><div class="value" id="memory">-</div></div>
                <div class="stat-card"><h3>Players</h3><div class="value" id="players">-</div></div>
                <div class="stat-card"><h3>Uptime</h3><div class="value" id="uptime">-</div></div>
            </div>
            <div class="panels">
                <div class="panel-card">
                    <h3>Resource Usage</h3>
                    <div class="chart" id="chart"></div>
                    <div class="chart-times" id="chart-times"></div>
                </div>
                <div class="panel-card">
                    <h3>Recent Events</h3>
                    <div id="events"></div>
                </div>
            </div>
        </section>

        <section id="console" class="{{CONSOLE_CLASS}}">
            <h2>Live Console <span id="connection" class="badge">...</span>
                <button onclick="clearConsole()" style="float:right">Clear</button></h2>
            <div class="console-log" id="log"></div>
            <form class="console-form" onsubmit="return sendCommand(event)">
                <input id="command" type="text" autocomplete="off" placeholder="Type a command (e.g. /stop, /list)...">
                <button type="submit">Send</button>
            </form>
        </section>

        <section id="settings" class="{{SETTINGS_CLASS}}">
            <h2>Settings</h2>
            <form class="settings" onsubmit="return false">
                <label>Server Name</label><input type="text" value="{{TITLE}}">
                <label>Server Version</label><input type="text" value="1.20.4">
                <label>Max Players</label><input type="number" value="20">
                <label>Memory Allocation (GB)</label><input type="number" value="4">
                <button type="submit">Save Changes</button>
            </form>
        </section>
    </main>
    <script>
        const log = document.getElementById('log');

        function setBadge(el, value) {
            el.textContent = value;
            el.className = 'badge ' + value;
        }

        function renderEntry(entry) {
            const empty = log.querySelector('.empty');
            if (empty) empty.remove();
            const line = document.createElement('div');
            line.className = 'line ' + entry.kind;
            const ts = document.createElement('span');
            ts.className = 'ts';
            ts.textContent = '[' + entry.timestamp + ']';
            const text = document.createElement('span');
            text.className = 'text';
            text.textContent = entry.text;
            line.append(ts, text);
            log.appendChild(line);
            log.scrollTop = log.scrollHeight;
        }

        function renderEmpty() {
            log.innerHTML = '<p class="empty">Console is empty. Waiting for logs...</p>';
        }

        async function loadConsole() {
            const res = await fetch('/api/console');
            const data = await res.json();
            renderEmpty();
            data.entries.forEach(renderEntry);
            setBadge(document.getElementById('connection'), data.connection);
        }

        async function sendCommand(e) {
            e.preventDefault();
            const input = document.getElementById('command');
            const command = input.value;
            input.value = '';
            await fetch('/api/console/command', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ command }),
            });
            return false;
        }

        async function clearConsole() {
            await fetch('/api/console/clear', { method: 'POST' });
        }

        async function refreshStatus() {
            const res = await fetch('/api/status');
            const info = await res.json();
            setBadge(document.getElementById('server-status'), info.status);
            document.getElementById('cpu').textContent = info.cpu + '%';
            document.getElementById('memory').textContent = info.memory + '%';
            document.getElementById('players').textContent = info.players + '/' + info.maxPlayers;
            document.getElementById('uptime').textContent = info.uptime;
        }

        async function refreshHistory() {
            const res = await fetch('/api/history');
            const history = await res.json();
            const chart = document.getElementById('chart');
            chart.innerHTML = '';
            history.samples.forEach((sample) => {
                const bar = document.createElement('div');
                bar.className = 'bar';
                bar.style.height = Math.max(sample.cpu, sample.memory) + '%';
                bar.title = sample.time + ' cpu ' + sample.cpu + '% mem ' + sample.memory + '%';
                chart.appendChild(bar);
            });
            const times = document.getElementById('chart-times');
            times.innerHTML = '';
            const samples = history.samples;
            [samples[0], samples[Math.floor(samples.length / 2)], samples[samples.length - 1]]
                .filter((s, i, all) => s && all.indexOf(s) === i)
                .forEach((s) => {
                    const label = document.createElement('span');
                    label.textContent = s.time;
                    times.appendChild(label);
                });
            const list = document.getElementById('events');
            list.innerHTML = '';
            history.events.forEach((event) => {
                const row = document.createElement('div');
                row.className = 'event ' + event.type;
                const ts = document.createElement('span');
                ts.className = 'ts';
                ts.textContent = event.time;
                const text = document.createElement('span');
                text.className = 'text';
                text.textContent = event.message;
                row.append(ts, text);
                list.appendChild(row);
            });
        }

        async function lifecycle(action) {
            await fetch('/api/' + action, { method: 'POST' });
            refreshStatus();
            refreshHistory();
        }

        const events = new EventSource('/api/console/events');
        events.addEventListener('entry', (e) => renderEntry(JSON.parse(e.data)));
        events.addEventListener('clear', renderEmpty);
        events.addEventListener('resync', loadConsole);
        events.addEventListener('connection', (e) => setBadge(document.getElementById('connection'), e.data));

        loadConsole();
        refreshStatus();
        refreshHistory();
        setInterval(() => { refreshStatus(); refreshHistory(); }, 5000);
    </script>
</body>
</html>"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsoleConfig, GameConfig, ReconnectConfig};
    use crate::transport::MockTransport;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn panel(connect: bool) -> (Router, Arc<PanelState>) {
        let transport = Arc::new(MockTransport::new(Duration::from_millis(10)));
        let console = ConsoleConfig::default();
        let reconnect = ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        };
        let session = ConsoleSession::new(transport, &console, reconnect);
        if connect {
            assert!(session.start().await);
        }
        let dispatcher = CommandDispatcher::new(session.clone(), &console);
        let game = GameServer::new(&GameConfig::default()).with_console(session);
        let state = Arc::new(PanelState::new(
            "Survival_World",
            dispatcher,
            game,
            CancellationToken::new(),
        ));
        (panel_router(state.clone()), state)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn parse(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn page_marks_requested_tab_active() {
        let (router, _) = panel(false).await;
        let (status, body) = call(&router, "GET", "/?tab=console", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"<body data-tab="console">"#));
        assert!(body.contains(r#"<section id="console" class="active">"#));
        assert!(body.contains(r#"<section id="dashboard" class="">"#));
        assert!(!body.contains("{{"));
    }

    #[tokio::test]
    async fn page_defaults_to_dashboard() {
        let (router, _) = panel(false).await;
        let (_, body) = call(&router, "GET", "/", None).await;
        assert!(body.contains(r#"<section id="dashboard" class="active">"#));
    }

    #[test]
    fn title_is_escaped() {
        let html = render_page("<script>", Tab::Settings);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("MinePanel - <script>"));
    }

    #[tokio::test]
    async fn command_round_trip_through_api() {
        let (router, state) = panel(true).await;
        let (status, body) = call(
            &router,
            "POST",
            "/api/console/command",
            Some(r#"{"command":"/list"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body)["outcome"], "dispatched");

        state.dispatcher.drain().await;
        let (_, body) = call(&router, "GET", "/api/console", None).await;
        let console = parse(&body);
        assert_eq!(console["connection"], "connected");
        let entries = console["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["text"], "> /list");
        assert_eq!(entries[0]["kind"], "info");
        assert_eq!(entries[1]["kind"], "success");
    }

    #[tokio::test]
    async fn blank_command_is_ignored() {
        let (router, state) = panel(true).await;
        let (_, body) = call(&router, "POST", "/api/console/command", Some(r#"{"command":"  "}"#)).await;
        assert_eq!(parse(&body)["outcome"], "ignored");
        assert!(state.dispatcher.session().log().is_empty());
    }

    #[tokio::test]
    async fn disconnected_command_is_rejected() {
        let (router, _) = panel(false).await;
        let (_, body) = call(&router, "POST", "/api/console/command", Some(r#"{"command":"/list"}"#)).await;
        assert_eq!(parse(&body)["outcome"], "rejected");

        let (_, body) = call(&router, "GET", "/api/console", None).await;
        let kinds: Vec<String> = parse(&body)["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["info", "warn"]);
    }

    #[tokio::test]
    async fn clear_empties_console() {
        let (router, state) = panel(false).await;
        state.dispatcher.submit("/list");
        let (status, _) = call(&router, "POST", "/api/console/clear", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.dispatcher.session().log().is_empty());
    }

    #[tokio::test]
    async fn reconnect_endpoint_connects_idle_session() {
        let (router, _) = panel(false).await;
        let (_, body) = call(&router, "POST", "/api/console/reconnect", None).await;
        let body = parse(&body);
        assert_eq!(body["connected"], true);
        assert_eq!(body["connection"], "connected");
    }

    #[tokio::test]
    async fn lifecycle_endpoints() {
        let (router, state) = panel(false).await;

        let (status, body) = call(&router, "POST", "/api/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse(&body)["error"], "server is already online");

        let (status, body) = call(&router, "POST", "/api/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body)["status"], "offline");

        let (status, body) = call(&router, "POST", "/api/restart", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(parse(&body)["status"], "starting");

        let (_, body) = call(&router, "GET", "/api/status", None).await;
        assert_eq!(parse(&body)["status"], "starting");

        let texts: Vec<String> = state
            .dispatcher
            .session()
            .log()
            .snapshot()
            .iter()
            .map(|e| e.text().to_string())
            .collect();
        assert_eq!(texts, vec!["Server stopped", "Restarting server..."]);
    }

    #[tokio::test]
    async fn event_stream_pushes_connection_and_new_entries() {
        let (router, state) = panel(true).await;
        let request = Request::builder()
            .uri("/api/console/events")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        let mut body = response.into_body();

        state.dispatcher.submit("/list");

        let mut seen = String::new();
        let read = async {
            while !(seen.contains("event: connection\ndata: connected")
                && seen.contains("event: entry\n"))
            {
                let frame = body.frame().await.unwrap().unwrap();
                if let Ok(data) = frame.into_data() {
                    seen.push_str(&String::from_utf8_lossy(&data));
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read).await.unwrap();
        assert!(seen.contains(r#""text":"> /list""#));
        assert!(seen.contains(r#""kind":"info""#));
    }

    #[tokio::test]
    async fn history_endpoint_reports_events_and_samples() {
        let (router, state) = panel(false).await;
        state.game.record_sample();
        call(&router, "POST", "/api/stop", None).await;

        let (status, body) = call(&router, "GET", "/api/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let history = parse(&body);
        assert_eq!(history["events"][0]["message"], "Server stopped");
        assert_eq!(history["events"][0]["type"], "system");
        assert_eq!(history["samples"].as_array().unwrap().len(), 1);
    }
}
