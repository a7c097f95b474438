use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use replier_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub channels: i64,
    pub indexed_sources: i64,
    pub failed_sources: i64,
    pub chunks: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub knowledge: Option<KnowledgeStats>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Ready when the knowledge store answers queries.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, knowledge) = match knowledge_stats(&state.db_pool).await {
        Ok(stats) => (
            HealthCheck { status: "ready", detail: "knowledge store reachable".to_owned() },
            Some(stats),
        ),
        Err(error) => (
            HealthCheck { status: "degraded", detail: format!("knowledge store query failed: {error}") },
            None,
        ),
    };
    let ready = knowledge.is_some();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        knowledge,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn knowledge_stats(pool: &DbPool) -> Result<KnowledgeStats, sqlx::Error> {
    let (channels, indexed_sources, failed_sources, chunks): (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT \
           (SELECT COUNT(*) FROM monitored_channels WHERE is_active = 1), \
           (SELECT COUNT(*) FROM knowledge_sources WHERE status = 'indexed'), \
           (SELECT COUNT(*) FROM knowledge_sources WHERE status = 'failed'), \
           (SELECT COUNT(*) FROM knowledge_chunks)",
    )
    .fetch_one(pool)
    .await?;
    Ok(KnowledgeStats { channels, indexed_sources, failed_sources, chunks })
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use replier_db::{connect_with_settings, migrations};

    use crate::health::{health, HealthState, KnowledgeStats};

    #[tokio::test]
    async fn health_reports_knowledge_counts_when_store_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.knowledge, Some(KnowledgeStats::default()));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_before_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.knowledge, None);
    }
}
