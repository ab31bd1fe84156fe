//! Thin axum binding over the orchestration core's external interface.
//! Every handler here is a direct pass-through to a core component; no
//! business logic lives in this module. One `Router<AppState>` per concern,
//! nested under a prefix in `main.rs`.

pub mod archive;
pub mod conditions;
pub mod health;
pub mod info;
pub mod notifications;
pub mod presets;
pub mod queue;
pub mod tasks;
pub mod workers;

use axum::Router;

use crate::AppState;

/// Clamp applied to `per_page` across every paged listing: values above
/// this are clamped rather than rejected.
pub const MAX_PER_PAGE: u32 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/queue", queue::router())
        .nest("/presets", presets::router())
        .nest("/conditions", conditions::router())
        .nest("/tasks", tasks::router())
        .nest("/notifications", notifications::router())
        .nest("/archive", archive::router())
        .nest("/info", info::router())
        .nest("/workers", workers::router())
        .nest("/health", health::router())
}
