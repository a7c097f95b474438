use std::sync::Arc;

use replier_agent::{
    build_llm_client, LlmError, PipelineSettings, PromptBuilder, PromptError, QueryPipeline,
};
use replier_core::config::{AppConfig, ConfigError, LoadOptions};
use replier_db::repositories::{
    SqlChannelRepository, SqlChunkRepository, SqlConversationRepository, SqlSourceRepository,
};
use replier_db::{connect_with_config, migrations, DbPool};
use replier_ingest::{
    build_embedder, DefaultSourceFetcher, EmbeddingError, FetchError, Indexer, TextChunker,
};
use replier_slack::events::build_dispatcher;
use replier_slack::socket::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
use replier_slack::transport::WebSocketTransport;
use replier_slack::web::{SlackApiError, SlackWebApi, SlackWebClient};
use thiserror::Error;
use tracing::info;

use crate::services::ReplierServices;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Arc<ReplierServices>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack setup failed: {0}")]
    Slack(#[from] SlackApiError),
    #[error("slack transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let web: Arc<dyn SlackWebApi> = Arc::new(SlackWebClient::new(config.slack.bot_token.clone())?);
    let transport: Arc<dyn SocketTransport> =
        Arc::new(WebSocketTransport::new(config.slack.app_token.clone())?);
    assemble(config, db_pool, web, transport).await
}

/// Wires repositories, pipeline, indexer and handlers on top of an open pool.
pub async fn assemble(
    config: AppConfig,
    db_pool: DbPool,
    web: Arc<dyn SlackWebApi>,
    transport: Arc<dyn SocketTransport>,
) -> Result<Application, BootstrapError> {
    let identity = web.auth_test().await?;
    info!(
        event_name = "system.bootstrap.slack_identity",
        correlation_id = "bootstrap",
        bot_user_id = %identity.user_id,
        team_id = %identity.team_id,
        "slack bot identity resolved"
    );

    let channels = Arc::new(SqlChannelRepository::new(db_pool.clone()));
    let sources = Arc::new(SqlSourceRepository::new(db_pool.clone()));
    let chunks = Arc::new(SqlChunkRepository::new(db_pool.clone()));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));

    let embedder = build_embedder(&config.embedding)?;
    let llm = build_llm_client(&config.llm)?;
    let fetcher = Arc::new(DefaultSourceFetcher::new(&config.crawler, &config.github, web.clone())?);

    let indexer = Arc::new(
        Indexer::new(sources.clone(), chunks.clone(), fetcher, embedder.clone(), web.clone())
            .with_chunker(TextChunker::from_config(&config.retrieval))
            .with_batch_size(config.embedding.batch_size),
    );
    let pipeline = Arc::new(QueryPipeline::new(
        chunks,
        conversations.clone(),
        embedder.clone(),
        llm.clone(),
        PromptBuilder::new(config.retrieval.max_context_chars)?,
        PipelineSettings::from_config(&config.retrieval, &config.llm),
    ));
    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        embedding_model = embedder.model_name(),
        embedding_dims = embedder.dims(),
        llm_model = llm.model(),
        "query pipeline ready"
    );

    let services = Arc::new(ReplierServices::new(
        web.clone(),
        channels,
        sources,
        conversations,
        pipeline,
        indexer,
    ));
    let dispatcher = build_dispatcher(
        identity.user_id,
        web.clone(),
        services.clone(),
        services.clone(),
        services.clone(),
    );
    let slack_runner =
        SocketModeRunner::new(transport, dispatcher, ReconnectPolicy::default()).with_web_api(web);

    Ok(Application { config, db_pool, services, slack_runner })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use replier_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
    use replier_db::repositories::{SqlChannelRepository, SqlConversationRepository};
    use replier_db::{connect_with_settings, ChannelRepository, ConversationRepository};
    use replier_slack::commands::ConfigSubmission;
    use replier_slack::events::{
        ConfigurationService, EventContext, MessageEvent, ReactionAddedEvent, SlackEnvelope,
        SlackEvent,
    };
    use replier_slack::socket::{NoopSocketTransport, SocketTransport, TransportError};
    use replier_slack::web::RecordingSlackWebApi;

    use crate::bootstrap::{assemble, bootstrap};

    /// Replays a fixed list of envelopes, then ends the stream.
    struct ScriptedTransport {
        envelopes: Mutex<VecDeque<SlackEnvelope>>,
        acknowledged: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(envelopes: Vec<SlackEnvelope>) -> Self {
            Self { envelopes: Mutex::new(envelopes.into()), acknowledged: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            Ok(self.envelopes.lock().await.pop_front())
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            self.acknowledged.lock().await.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_owned()),
                slack_app_token: Some("xapp-test".to_owned()),
                slack_bot_token: Some("xoxb-test".to_owned()),
                llm_provider: Some(LlmProvider::Anthropic),
                llm_api_key: Some("sk-ant-test".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_required_slack_tokens() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_owned()),
                slack_app_token: Some("invalid-token".to_owned()),
                slack_bot_token: Some("xoxb-valid".to_owned()),
                llm_provider: Some(LlmProvider::Anthropic),
                llm_api_key: Some("sk-ant-test".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("slack.app_token"));
    }

    #[tokio::test]
    async fn assemble_migrates_and_wires_services() {
        let config = AppConfig::load(valid_overrides("sqlite::memory:")).expect("config");
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        replier_db::migrations::run_pending(&pool).await.expect("migrate");

        let app = assemble(
            config,
            pool,
            Arc::new(RecordingSlackWebApi::default()),
            Arc::new(NoopSocketTransport),
        )
        .await
        .expect("assemble");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('workspaces', 'monitored_channels', \
             'knowledge_sources', 'knowledge_chunks', 'conversation_turns')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema");
        assert_eq!(table_count, 5);

        app.slack_runner.start().await.expect("noop transport ends cleanly");
    }

    #[tokio::test]
    async fn configured_channel_answers_mentions_and_counts_reactions() {
        let docs = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><head><title>Widget Operator</title></head><body><main>\
                 <h1>Installing</h1>\
                 <p>Install the widget operator with helm install widget-operator.</p>\
                 <p>The widget operator install needs cluster admin rights.</p>\
                 </main></body></html>",
                "text/html",
            ))
            .mount(&docs)
            .await;

        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Run `helm install widget-operator`. [CONFIDENCE:HIGH]"}]
            })))
            .mount(&llm)
            .await;

        let mut options = valid_overrides("sqlite::memory:");
        options.overrides.llm_base_url = Some(llm.uri());
        let config = AppConfig::load(options).expect("config");
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        replier_db::migrations::run_pending(&pool).await.expect("migrate");

        let web = Arc::new(RecordingSlackWebApi::default());
        let transport = Arc::new(ScriptedTransport::new(vec![
            SlackEnvelope::new(
                "env-mention",
                SlackEvent::AppMention(MessageEvent {
                    channel_id: "C0FORUM".to_owned(),
                    user_id: Some("U0ASKER".to_owned()),
                    text: "<@U0BOT> How do I install the widget operator?".to_owned(),
                    ts: "1700000050.000100".to_owned(),
                    ..MessageEvent::default()
                }),
            ),
            SlackEnvelope::new(
                "env-reaction",
                SlackEvent::ReactionAdded(ReactionAddedEvent {
                    user_id: "U0ASKER".to_owned(),
                    reaction: "+1".to_owned(),
                    item_type: "message".to_owned(),
                    channel_id: "C0FORUM".to_owned(),
                    message_ts: "1700000100.000002".to_owned(),
                    item_user: Some("U0BOT".to_owned()),
                }),
            ),
        ]));
        let app = assemble(config, pool.clone(), web.clone(), transport.clone()).await.expect("assemble");

        let submission = ConfigSubmission {
            channel_id: "C0FORUM".to_owned(),
            user_id: "U0ADMIN".to_owned(),
            docs_urls: vec![format!("{}/", docs.uri())],
            operator_repo: None,
            operand_repo: None,
            include_issues: false,
            history_days: 0,
        };
        let queued = app
            .services
            .apply_configuration(&submission, submission.descriptors().expect("descriptors"), &EventContext::default())
            .await
            .expect("configure");
        assert_eq!(queued, 1);

        let mut indexed = false;
        for _ in 0..300 {
            if !web.posted().await.is_empty() {
                indexed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(indexed, "indexing summary should be posted");

        app.slack_runner.start().await.expect("runner");

        let posted = web.posted().await;
        assert_eq!(posted.len(), 2);
        assert!(posted[0].message.fallback_text.contains("Indexed 1 knowledge source(s)"));
        assert_eq!(posted[1].thread_ts.as_deref(), Some("1700000050.000100"));
        assert!(posted[1].message.fallback_text.contains("helm install widget-operator"));
        assert_eq!(*transport.acknowledged.lock().await, vec!["env-mention", "env-reaction"]);

        let channel = SqlChannelRepository::new(pool.clone())
            .find_channel_by_slack_id("C0FORUM")
            .await
            .expect("lookup")
            .expect("channel");
        let turn = SqlConversationRepository::new(pool)
            .find_by_message(&channel.id, "1700000100.000002")
            .await
            .expect("find")
            .expect("turn recorded");
        assert_eq!(turn.question, "How do I install the widget operator?");
        assert_eq!(turn.feedback.up, 1);
    }
}
