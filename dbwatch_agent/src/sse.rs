//! Server-sent events endpoint: `event: db-status` / `event: db-log`.

use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};

use crate::state::AppState;
use crate::types::MonitorEvent;

pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub fn to_sse_event(ev: &MonitorEvent) -> Result<Event, axum::Error> {
    let ev_out = Event::default().event(ev.name());
    match ev {
        MonitorEvent::Status(s) => ev_out.json_data(s),
        MonitorEvent::Log(line) => ev_out.json_data(line),
    }
}

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .hub
        .register()
        .into_stream()
        .map(|ev| to_sse_event(&ev));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive"))
}
