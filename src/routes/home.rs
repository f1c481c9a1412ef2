use axum::{response::Html, routing::get, Router};
use tracing::instrument;

use crate::state::AppState;
use crate::templates::{self, PageUser};

pub fn home_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/index", get(index))
}

#[instrument]
pub async fn index() -> Html<String> {
    let user = PageUser {
        username: "José A.".to_string(),
    };
    Html(templates::home("Home", &user))
}
