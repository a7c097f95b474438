//! The services the Slack handlers call, backed by the knowledge store, the
//! query pipeline and the indexer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use replier_agent::{PipelineError, QueryPipeline};
use replier_core::{
    ApplicationError, ChannelId, ConversationTurn, FeedbackTally, KnowledgeSource, SourceDescriptor,
};
use replier_db::{ChannelRepository, ConversationRepository, SourceRepository};
use replier_ingest::Indexer;
use replier_slack::commands::ConfigSubmission;
use replier_slack::events::{
    AnswerDraft, ConfigurationService, EventContext, EventHandlerError, FeedbackRequest,
    FeedbackService, QuestionOutcome, QuestionRequest, QuestionService,
};
use replier_slack::web::SlackWebApi;

pub struct ReplierServices {
    web: Arc<dyn SlackWebApi>,
    channels: Arc<dyn ChannelRepository>,
    sources: Arc<dyn SourceRepository>,
    conversations: Arc<dyn ConversationRepository>,
    pipeline: Arc<QueryPipeline>,
    indexer: Arc<Indexer>,
}

impl ReplierServices {
    pub fn new(
        web: Arc<dyn SlackWebApi>,
        channels: Arc<dyn ChannelRepository>,
        sources: Arc<dyn SourceRepository>,
        conversations: Arc<dyn ConversationRepository>,
        pipeline: Arc<QueryPipeline>,
        indexer: Arc<Indexer>,
    ) -> Self {
        Self { web, channels, sources, conversations, pipeline, indexer }
    }

    async fn channel_id(&self, slack_channel_id: &str) -> Result<Option<ChannelId>, String> {
        let channel = self
            .channels
            .find_channel_by_slack_id(slack_channel_id)
            .await
            .map_err(|error| error.to_string())?;
        Ok(channel.filter(|channel| channel.is_active).map(|channel| channel.id))
    }
}

fn application_error(error: PipelineError) -> ApplicationError {
    match error {
        PipelineError::Repository(error) => ApplicationError::Persistence(error.to_string()),
        PipelineError::Embedding(error) => ApplicationError::Integration(error.to_string()),
        PipelineError::Llm(error) => ApplicationError::Integration(error.to_string()),
        PipelineError::Prompt(error) => ApplicationError::Configuration(error.to_string()),
    }
}

#[async_trait]
impl QuestionService for ReplierServices {
    async fn answer_question(
        &self,
        request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<QuestionOutcome, EventHandlerError> {
        let Some(channel_id) =
            self.channel_id(&request.channel_id).await.map_err(EventHandlerError::Question)?
        else {
            return Ok(QuestionOutcome::NotConfigured);
        };
        let sources = self
            .sources
            .list_for_channel(&channel_id)
            .await
            .map_err(|error| EventHandlerError::Question(error.to_string()))?;
        if sources.is_empty() {
            return Ok(QuestionOutcome::NotConfigured);
        }

        match self.pipeline.answer(&channel_id, &request.question).await {
            Ok(answer) => Ok(QuestionOutcome::Answered(AnswerDraft {
                answer: answer.text,
                sources: answer.sources,
                confidence: answer.confidence,
            })),
            Err(error) => {
                warn!(
                    event_name = "query.answer.failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %request.channel_id,
                    thread_ts = %request.thread_ts,
                    error = %error,
                    "question could not be answered"
                );
                let interface = application_error(error).into_interface(ctx.correlation_id.as_str());
                Ok(QuestionOutcome::Failed { reason: interface.user_message().to_owned() })
            }
        }
    }

    async fn record_answer(
        &self,
        request: &QuestionRequest,
        draft: &AnswerDraft,
        reply_ts: &str,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        let Some(channel_id) =
            self.channel_id(&request.channel_id).await.map_err(EventHandlerError::Question)?
        else {
            return Ok(());
        };
        let turn = ConversationTurn::new(
            channel_id,
            reply_ts,
            request.question_ts.as_str(),
            request.user_id.as_str(),
            request.question.as_str(),
            draft.answer.as_str(),
            draft.sources.clone(),
            draft.confidence,
        );
        self.conversations
            .record(turn)
            .await
            .map_err(|error| EventHandlerError::Question(error.to_string()))?;
        info!(
            event_name = "query.answer.recorded",
            correlation_id = %ctx.correlation_id,
            channel_id = %request.channel_id,
            reply_ts,
            confidence = draft.confidence.as_str(),
            "answer recorded"
        );
        Ok(())
    }
}

#[async_trait]
impl FeedbackService for ReplierServices {
    async fn record_feedback(
        &self,
        request: &FeedbackRequest,
        _ctx: &EventContext,
    ) -> Result<Option<FeedbackTally>, EventHandlerError> {
        let Some(channel_id) =
            self.channel_id(&request.channel_id).await.map_err(EventHandlerError::Feedback)?
        else {
            return Ok(None);
        };
        self.conversations
            .record_feedback(&channel_id, &request.message_ts, request.kind)
            .await
            .map_err(|error| EventHandlerError::Feedback(error.to_string()))
    }
}

#[async_trait]
impl ConfigurationService for ReplierServices {
    async fn is_configured(&self, channel_id: &str) -> Result<bool, EventHandlerError> {
        let Some(channel_id) =
            self.channel_id(channel_id).await.map_err(EventHandlerError::Configuration)?
        else {
            return Ok(false);
        };
        let sources = self
            .sources
            .list_for_channel(&channel_id)
            .await
            .map_err(|error| EventHandlerError::Configuration(error.to_string()))?;
        Ok(!sources.is_empty())
    }

    async fn apply_configuration(
        &self,
        submission: &ConfigSubmission,
        descriptors: Vec<SourceDescriptor>,
        ctx: &EventContext,
    ) -> Result<usize, EventHandlerError> {
        let identity = self.web.auth_test().await?;
        let workspace = self
            .channels
            .ensure_workspace(&identity.team_id, identity.team_name.as_deref())
            .await
            .map_err(|error| EventHandlerError::Configuration(error.to_string()))?;

        let channel_name = match self.web.conversation_info(&submission.channel_id).await {
            Ok(info) => info.name,
            Err(error) => {
                warn!(
                    event_name = "config.channel_info_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %submission.channel_id,
                    error = %error,
                    "channel name unavailable"
                );
                None
            }
        };
        let channel = self
            .channels
            .ensure_channel(&workspace.id, &submission.channel_id, channel_name.as_deref())
            .await
            .map_err(|error| EventHandlerError::Configuration(error.to_string()))?;

        let sources: Vec<KnowledgeSource> = descriptors
            .iter()
            .map(|descriptor| KnowledgeSource::pending(channel.id.clone(), descriptor))
            .collect();
        let queued = sources.len();
        self.sources
            .replace_for_channel(&channel.id, sources)
            .await
            .map_err(|error| EventHandlerError::Configuration(error.to_string()))?;

        info!(
            event_name = "config.applied",
            correlation_id = %ctx.correlation_id,
            channel_id = %submission.channel_id,
            user_id = %submission.user_id,
            sources = queued,
            "channel configuration saved; indexing started"
        );
        self.indexer.clone().spawn(channel);
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use replier_agent::{
        CompletionRequest, LlmClient, LlmError, PipelineSettings, PromptBuilder, QueryPipeline,
    };
    use replier_core::{Confidence, FeedbackKind, SourceDescriptor, SourceStatus};
    use replier_db::repositories::{
        InMemoryChannelRepository, InMemoryChunkRepository, InMemoryConversationRepository,
        InMemorySourceRepository,
    };
    use replier_db::{ChannelRepository, ConversationRepository, SourceRepository};
    use replier_ingest::{FetchError, HashingEmbedder, Indexer, SourceDocument, SourceFetcher};
    use replier_slack::commands::ConfigSubmission;
    use replier_slack::events::{
        ConfigurationService, EventContext, FeedbackRequest, FeedbackService, QuestionOutcome,
        QuestionRequest, QuestionService,
    };
    use replier_slack::web::RecordingSlackWebApi;

    use super::ReplierServices;

    struct CannedFetcher;

    #[async_trait]
    impl SourceFetcher for CannedFetcher {
        async fn fetch(&self, descriptor: &SourceDescriptor) -> Result<Vec<SourceDocument>, FetchError> {
            Ok(vec![SourceDocument {
                url: descriptor.locator(),
                title: Some("Install".to_owned()),
                path: None,
                file_type: None,
                content: "Install the widget operator with helm install widget.".to_owned(),
            }])
        }
    }

    struct FixedLlm(Result<String, LlmError>);

    #[async_trait]
    impl LlmClient for FixedLlm {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.0.clone()
        }
    }

    struct Fixture {
        services: ReplierServices,
        web: Arc<RecordingSlackWebApi>,
        channels: Arc<InMemoryChannelRepository>,
        sources: Arc<InMemorySourceRepository>,
        conversations: Arc<InMemoryConversationRepository>,
    }

    fn fixture(llm: FixedLlm) -> Fixture {
        let web = Arc::new(RecordingSlackWebApi::default());
        let channels = Arc::new(InMemoryChannelRepository::default());
        let sources = Arc::new(InMemorySourceRepository::default());
        let chunks = Arc::new(InMemoryChunkRepository::default());
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let embedder = Arc::new(HashingEmbedder::new(1024));

        let pipeline = Arc::new(QueryPipeline::new(
            chunks.clone(),
            conversations.clone(),
            embedder.clone(),
            Arc::new(llm),
            PromptBuilder::new(4_000).expect("prompts"),
            PipelineSettings { top_k: 5, min_score: 0.2, recent_turns: 0, max_tokens: 128 },
        ));
        let indexer = Arc::new(Indexer::new(
            sources.clone(),
            chunks,
            Arc::new(CannedFetcher),
            embedder,
            web.clone(),
        ));
        let services = ReplierServices::new(
            web.clone(),
            channels.clone(),
            sources.clone(),
            conversations.clone(),
            pipeline,
            indexer,
        );
        Fixture { services, web, channels, sources, conversations }
    }

    fn submission() -> ConfigSubmission {
        ConfigSubmission {
            channel_id: "C0FORUM".to_owned(),
            user_id: "U0ADMIN".to_owned(),
            docs_urls: vec!["https://docs.example.com".to_owned()],
            operator_repo: None,
            operand_repo: None,
            include_issues: false,
            history_days: 0,
        }
    }

    fn question(text: &str) -> QuestionRequest {
        QuestionRequest {
            channel_id: "C0FORUM".to_owned(),
            user_id: "U0ASKER".to_owned(),
            question: text.to_owned(),
            question_ts: "1700000000.000100".to_owned(),
            thread_ts: "1700000000.000100".to_owned(),
        }
    }

    async fn wait_for_indexing(fixture: &Fixture) {
        for _ in 0..200 {
            if !fixture.web.posted().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("indexing summary was never posted");
    }

    #[tokio::test]
    async fn unknown_channel_is_not_configured() {
        let fixture = fixture(FixedLlm(Ok("unused".to_owned())));
        let ctx = EventContext::default();

        assert!(!fixture.services.is_configured("C0FORUM").await.expect("configured"));
        let outcome =
            fixture.services.answer_question(&question("How do I install?"), &ctx).await.expect("outcome");
        assert_eq!(outcome, QuestionOutcome::NotConfigured);
    }

    #[tokio::test]
    async fn configuration_creates_channel_sources_and_indexes_them() {
        let fixture = fixture(FixedLlm(Ok("unused".to_owned())));
        let submission = submission();
        let descriptors = submission.descriptors().expect("descriptors");

        let queued = fixture
            .services
            .apply_configuration(&submission, descriptors, &EventContext::default())
            .await
            .expect("apply");
        assert_eq!(queued, 1);
        wait_for_indexing(&fixture).await;

        let channel = fixture
            .channels
            .find_channel_by_slack_id("C0FORUM")
            .await
            .expect("lookup")
            .expect("channel stored");
        let sources = fixture.sources.list_for_channel(&channel.id).await.expect("sources");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].status, SourceStatus::Indexed);
        assert!(fixture.services.is_configured("C0FORUM").await.expect("configured"));
    }

    #[tokio::test]
    async fn answers_are_recorded_and_collect_feedback() {
        let fixture = fixture(FixedLlm(Ok("Run helm install widget. [CONFIDENCE:HIGH]".to_owned())));
        let ctx = EventContext::default();
        let submission = submission();
        fixture
            .services
            .apply_configuration(&submission, submission.descriptors().expect("descriptors"), &ctx)
            .await
            .expect("apply");
        wait_for_indexing(&fixture).await;

        let request = question("How do I install the widget operator?");
        let QuestionOutcome::Answered(draft) =
            fixture.services.answer_question(&request, &ctx).await.expect("outcome")
        else {
            panic!("expected an answer");
        };
        assert_eq!(draft.answer, "Run helm install widget.");
        assert_eq!(draft.confidence, Confidence::High);

        fixture.services.record_answer(&request, &draft, "1700000100.000001", &ctx).await.expect("record");
        let channel = fixture
            .channels
            .find_channel_by_slack_id("C0FORUM")
            .await
            .expect("lookup")
            .expect("channel");
        let turn = fixture
            .conversations
            .find_by_message(&channel.id, "1700000100.000001")
            .await
            .expect("find")
            .expect("turn");
        assert_eq!(turn.question_ts, "1700000000.000100");

        let feedback = FeedbackRequest {
            channel_id: "C0FORUM".to_owned(),
            message_ts: "1700000100.000001".to_owned(),
            user_id: "U0ASKER".to_owned(),
            kind: FeedbackKind::Up,
        };
        let tally = fixture.services.record_feedback(&feedback, &ctx).await.expect("feedback");
        assert_eq!(tally.map(|tally| tally.up), Some(1));

        let stray = FeedbackRequest { message_ts: "1.0".to_owned(), ..feedback };
        assert_eq!(fixture.services.record_feedback(&stray, &ctx).await.expect("feedback"), None);
    }

    #[tokio::test]
    async fn model_failure_becomes_failed_outcome() {
        let fixture = fixture(FixedLlm(Err(LlmError::Status { status: 500, body: "boom".to_owned() })));
        let ctx = EventContext::default();
        let submission = submission();
        fixture
            .services
            .apply_configuration(&submission, submission.descriptors().expect("descriptors"), &ctx)
            .await
            .expect("apply");
        wait_for_indexing(&fixture).await;

        let outcome = fixture
            .services
            .answer_question(&question("How do I install the widget operator?"), &ctx)
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            QuestionOutcome::Failed {
                reason: "A service I depend on is temporarily unavailable. Please retry shortly."
                    .to_owned()
            }
        );
    }
}
