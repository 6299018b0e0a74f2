// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP routes: the SSR page and the websocket upgrade for live sessions.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{Extensions, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use vireo_app_core::prefs::ServerPrefs;
use vireo_proto::{wire::encode_server, ClientConfig, Location, ServerMessage};
use vireo_session::{BufferedTransport, Registry, RequestInfo, Session, SessionConfig};
use vireo_tree::to_html;

use crate::demo::DemoView;
use crate::socket::{serve_connection, LiveRequest};

/// Request headers copied into [`RequestInfo`].
const FORWARDED_HEADERS: [&str; 4] = ["host", "user-agent", "accept-language", "referer"];

/// Per-connection limits taken from [`ServerPrefs`].
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) ssr_buffer_limit: usize,
    pub(crate) live_channel_capacity: usize,
    pub(crate) live_pending_limit: usize,
    pub(crate) max_frame_bytes: usize,
    pub(crate) debug: bool,
}

impl From<&ServerPrefs> for Settings {
    fn from(prefs: &ServerPrefs) -> Self {
        Self {
            ssr_buffer_limit: prefs.ssr_buffer_limit,
            live_channel_capacity: prefs.live_channel_capacity,
            live_pending_limit: prefs.live_pending_limit,
            max_frame_bytes: prefs.max_frame_bytes,
            debug: prefs.debug,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) settings: Arc<Settings>,
}

impl AppState {
    pub(crate) fn new(registry: Arc<Registry>, prefs: &ServerPrefs) -> Self {
        Self {
            registry,
            settings: Arc::new(Settings::from(prefs)),
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            debug: Some(self.settings.debug),
        }
    }
}

/// Handler error rendered as a bare 500.
#[derive(Debug)]
pub(crate) struct AppError(anyhow::Error);

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ssr))
        .route("/live", get(live))
        .with_state(state)
}

async fn ssr(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Html<String>, AppError> {
    let info = request_info(&uri, &headers, &extensions);
    Ok(Html(render_page(&state, info)?))
}

/// Query of the live route.
#[derive(Debug, Deserialize)]
pub(crate) struct LiveParams {
    sid: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    hash: String,
}

async fn live(
    State(state): State<AppState>,
    Query(params): Query<LiveParams>,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    let info = request_info(&uri, &headers, &extensions);
    let location = live_location(&params, &info.query);
    let request = LiveRequest {
        sid: params.sid,
        location,
        info,
    };
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_connection(state, request, stream, sink).await;
    })
}

/// Query parameters of the live route itself, never part of the page query.
const LIVE_PARAMS: [&str; 3] = ["sid", "path", "hash"];

/// Page location for a live upgrade: the page's own query parameters ride
/// along on the upgrade URL next to the live route's parameters.
fn live_location(params: &LiveParams, raw_query: &str) -> Location {
    let query = raw_query
        .split('&')
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            !pair.is_empty() && !LIVE_PARAMS.contains(&name)
        })
        .collect::<Vec<_>>()
        .join("&");
    Location {
        path: params.path.clone().unwrap_or_else(|| "/".to_string()),
        query,
        hash: params.hash.clone(),
    }
}

pub(crate) fn request_info(uri: &Uri, headers: &HeaderMap, extensions: &Extensions) -> RequestInfo {
    let headers: BTreeMap<String, String> = FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some(((*name).to_string(), value.to_string()))
        })
        .collect();
    RequestInfo {
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers,
        remote_addr: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string()),
    }
}

/// Create a demo session, render it through a buffered transport and build
/// the boot page. The session stays registered for the live upgrade.
pub(crate) fn render_page(state: &AppState, info: RequestInfo) -> Result<String, AppError> {
    let settings = &state.settings;
    let sid = Session::generate_id();
    let session = Session::new(sid.clone(), DemoView::default(), SessionConfig::default());
    state.registry.put(Arc::clone(&session));

    let location = Location {
        path: info.path.clone(),
        query: info.query.clone(),
        hash: String::new(),
    };
    let transport = Arc::new(BufferedTransport::new(settings.ssr_buffer_limit, info));
    let conn_id = Session::generate_id();
    state
        .registry
        .attach(&sid, &conn_id, transport.clone())?;

    let page = build_page(state, &session, location, &transport);
    state.registry.detach(&conn_id)?;
    debug!(sid = %sid, ok = page.is_ok(), "ssr render");
    page
}

fn build_page(
    state: &AppState,
    session: &Session,
    location: Location,
    transport: &BufferedTransport,
) -> Result<String, AppError> {
    let max = state.settings.max_frame_bytes;
    let boot = session.boot(location, Some(state.client_config()))?;
    let tree = session.render_initial()?;
    let boot = encode_server(&ServerMessage::Boot(boot), max)?;
    let buffered: Vec<Value> = transport
        .drain()
        .into_iter()
        .map(|m| json!({ "seq": m.seq, "topic": m.topic, "event": m.event, "data": m.data }))
        .collect();
    let buffered = serde_json::to_string(&buffered)?;
    Ok(page_html(&to_html(&tree), &boot, &buffered))
}

fn script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

fn page_html(body: &str, boot: &str, buffered: &str) -> String {
    format!(
        concat!(
            "<!doctype html>",
            "<html><head><meta charset=\"utf-8\"><title>Vireo</title></head>",
            "<body><div id=\"vireo-root\">{body}</div>",
            "<script type=\"application/json\" id=\"vireo-boot\">{boot}</script>",
            "<script type=\"application/json\" id=\"vireo-buffer\">{buffered}</script>",
            "</body></html>"
        ),
        body = body,
        boot = script_json(boot),
        buffered = script_json(buffered),
    )
}
