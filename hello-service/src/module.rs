use std::sync::Arc;

use appcore::circuit_breaker::CircuitBreakerRegistry;
use appcore::error::BreakerError;
use appcore::module::ServiceModule;
use appcore::pagination::Pagination;
use appcore::resources::redis::RedisResource;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

const VISITS_KEY: &str = "hello:visits";

const GREETINGS: &[&str] = &[
    "hello", "hola", "bonjour", "hallo", "ciao", "olá", "namaste", "salaam", "merhaba", "ahoj",
    "hej", "szia", "sawubona", "konnichiwa", "annyeong",
];

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("cache connection is closed")]
    CacheClosed,
    #[error("cache command failed: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("{0}")]
    Unavailable(String),
}

impl From<BreakerError<ApiError>> for ApiError {
    fn from(e: BreakerError<ApiError>) -> Self {
        match e {
            BreakerError::Call(inner) => inner,
            rejected => ApiError::Unavailable(rejected.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("request failed: {}", self);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Greeting {
    pub id: u64,
    pub text: &'static str,
}

#[derive(Clone)]
struct AppState {
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Option<Arc<RedisResource>>,
}

/// Greets callers and counts visits in the cache when one is configured.
pub struct HelloModule {
    state: AppState,
}

impl HelloModule {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, cache: Option<Arc<RedisResource>>) -> Self {
        Self {
            state: AppState { breakers, cache },
        }
    }
}

impl ServiceModule for HelloModule {
    fn register_routes(&self, router: Router) -> Router {
        router.merge(
            Router::new()
                .route("/api/hello", get(hello))
                .route("/api/greetings", get(greetings))
                .with_state(self.state.clone()),
        )
    }
}

async fn hello(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let visits = match &state.cache {
        None => None,
        Some(cache) => {
            let breaker = state.breakers.breaker("cache-visits");
            let visits = breaker
                .call(|| async {
                    let mut connection = cache.connection().ok_or(ApiError::CacheClosed)?;
                    let visits = redis::cmd("INCR")
                        .arg(VISITS_KEY)
                        .query_async::<u64>(&mut connection)
                        .await?;
                    Ok::<_, ApiError>(visits)
                })
                .await?;
            Some(visits)
        }
    };

    Ok(Json(json!({ "message": "hello", "visits": visits })))
}

async fn greetings(Query(request): Query<Pagination<()>>) -> Json<Pagination<Greeting>> {
    let mut all: Vec<Greeting> = GREETINGS
        .iter()
        .copied()
        .zip(1u64..)
        .map(|(text, id)| Greeting { id, text })
        .collect();
    if request.sort().eq_ignore_ascii_case("id desc") {
        all.reverse();
    }

    let total_rows = all.len() as u64;
    let rows = all
        .into_iter()
        .skip(usize::try_from(request.offset()).unwrap_or(usize::MAX))
        .take(request.limit() as usize)
        .collect();

    Json(request.with_rows(total_rows, rows))
}
