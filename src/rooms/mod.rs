pub mod index;
pub mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::upgrade))
}
