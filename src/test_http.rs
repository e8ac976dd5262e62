//! Local HTTP stand-ins for the external APIs used in unit tests.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

type Rows = Vec<Vec<Value>>;

#[derive(Default)]
struct FakeSheetsState {
    ranges: HashMap<String, Rows>,
    appended: Vec<(String, Rows)>,
    failing_cell: Option<String>,
    last_query: Option<String>,
    last_auth: Option<String>,
}

/// In-memory spreadsheet values API keyed by A1 range.
#[derive(Clone, Default)]
pub struct FakeSheets {
    state: Arc<Mutex<FakeSheetsState>>,
}

impl FakeSheets {
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/spreadsheets/{id}/values/{range}",
                get(get_values).post(append_values).put(update_values),
            )
            .with_state(self.clone())
    }

    pub fn set_range(&self, range: &str, rows: Rows) {
        self.state
            .lock()
            .unwrap()
            .ranges
            .insert(range.to_string(), rows);
    }

    /// Appends whose rows contain this cell text answer 500.
    pub fn fail_appends_for(&self, cell: &str) {
        self.state.lock().unwrap().failing_cell = Some(cell.to_string());
    }

    pub fn appended(&self) -> Vec<(String, Rows)> {
        self.state.lock().unwrap().appended.clone()
    }

    pub fn range(&self, range: &str) -> Option<Rows> {
        self.state.lock().unwrap().ranges.get(range).cloned()
    }

    pub fn last_query(&self) -> Option<String> {
        self.state.lock().unwrap().last_query.clone()
    }

    pub fn last_auth(&self) -> Option<String> {
        self.state.lock().unwrap().last_auth.clone()
    }

    fn record(&self, headers: &HeaderMap, query: Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.last_query = query;
        state.last_auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
    }
}

async fn get_values(
    State(sheets): State<FakeSheets>,
    Path((_id, range)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Json<Value> {
    sheets.record(&headers, query);
    match sheets.range(&range) {
        Some(rows) => Json(json!({ "range": range, "majorDimension": "ROWS", "values": rows })),
        None => Json(json!({ "range": range, "majorDimension": "ROWS" })),
    }
}

async fn append_values(
    State(sheets): State<FakeSheets>,
    Path((_id, range)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    sheets.record(&headers, query);
    let range = range.trim_end_matches(":append").to_string();
    let rows: Rows = serde_json::from_value(body["values"].clone()).unwrap_or_default();
    let mut state = sheets.state.lock().unwrap();
    if let Some(failing) = &state.failing_cell {
        if rows.iter().flatten().any(|cell| cell.as_str() == Some(failing.as_str())) {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    state.appended.push((range, rows));
    StatusCode::OK
}

async fn update_values(
    State(sheets): State<FakeSheets>,
    Path((_id, range)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    sheets.record(&headers, query);
    let rows: Rows = serde_json::from_value(body["values"].clone()).unwrap_or_default();
    sheets.set_range(&range, rows);
    StatusCode::OK
}
