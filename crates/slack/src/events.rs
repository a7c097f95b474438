use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use replier_core::domain::conversation::{Confidence, FeedbackKind, FeedbackTally};
use replier_core::domain::source::SourceDescriptor;

use crate::blocks::{
    self, OutboundMessage, View, CONFIG_MODAL_CALLBACK_ID, OPEN_CONFIG_ACTION_ID,
};
use crate::commands::{mentions_user, parse_mention, ConfigSubmission, MentionCommand, ViewState};
use crate::web::{NoopSlackWebApi, SlackApiError, SlackWebApi};

const CONFIGURE_INTRO: &str = "Click the button below to configure my knowledge sources:";
const UNCONFIGURED_INTRO: &str =
    "👋 I need to be configured before I can help answer questions in this channel.";
const RECENT_MENTION_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub team_id: Option<String>,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    pub fn new(envelope_id: impl Into<String>, event: SlackEvent) -> Self {
        Self { envelope_id: envelope_id.into(), team_id: None, event }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MessageEvent),
    ChannelMessage(MessageEvent),
    ReactionAdded(ReactionAddedEvent),
    AppHomeOpened(AppHomeOpenedEvent),
    MemberJoinedChannel(MemberJoinedEvent),
    BlockAction(BlockActionEvent),
    ViewSubmission(ViewSubmissionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::ChannelMessage(_) => SlackEventType::ChannelMessage,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::AppHomeOpened(_) => SlackEventType::AppHomeOpened,
            Self::MemberJoinedChannel(_) => SlackEventType::MemberJoinedChannel,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::ViewSubmission(_) => SlackEventType::ViewSubmission,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    ChannelMessage,
    ReactionAdded,
    AppHomeOpened,
    MemberJoinedChannel,
    BlockAction,
    ViewSubmission,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: Option<String>,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub subtype: Option<String>,
    pub bot_id: Option<String>,
}

impl MessageEvent {
    /// Replies go into the existing thread, or start one under the message.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Edits, joins and bot posts all carry a subtype or a bot id.
    pub fn is_from_human(&self) -> bool {
        self.subtype.is_none() && self.bot_id.is_none() && self.user_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub user_id: String,
    pub reaction: String,
    pub item_type: String,
    pub channel_id: String,
    pub message_ts: String,
    pub item_user: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppHomeOpenedEvent {
    pub user_id: String,
    pub tab: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberJoinedEvent {
    pub channel_id: String,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub trigger_id: String,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub action_id: String,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewSubmissionEvent {
    pub user_id: String,
    pub callback_id: String,
    pub private_metadata: String,
    pub state: ViewState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Reply(OutboundMessage),
    OpenView { trigger_id: String, view: View },
    PublishView { user_id: String, view: View },
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("question handler failure: {0}")]
    Question(String),
    #[error("feedback handler failure: {0}")]
    Feedback(String),
    #[error("configuration handler failure: {0}")]
    Configuration(String),
    #[error(transparent)]
    Delivery(#[from] SlackApiError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Wires every handler to the given services.
pub fn build_dispatcher<Q, F, C>(
    bot_user_id: impl Into<String>,
    web: Arc<dyn SlackWebApi>,
    questions: Arc<Q>,
    feedback: Arc<F>,
    configuration: Arc<C>,
) -> EventDispatcher
where
    Q: QuestionService + 'static,
    F: FeedbackService + 'static,
    C: ConfigurationService + 'static,
{
    let bot_user_id = bot_user_id.into();
    let responder = Arc::new(MentionResponder::new(questions, web, bot_user_id.clone()));

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MentionHandler::new(SlackEventType::AppMention, responder.clone()));
    dispatcher.register(MentionHandler::new(SlackEventType::ChannelMessage, responder));
    dispatcher.register(ReactionAddedHandler::new(feedback));
    dispatcher.register(AppHomeHandler);
    dispatcher.register(MemberJoinedHandler::new(configuration.clone(), bot_user_id));
    dispatcher.register(BlockActionHandler);
    dispatcher.register(ViewSubmissionHandler::new(configuration));
    dispatcher
}

pub fn default_dispatcher() -> EventDispatcher {
    build_dispatcher(
        "",
        Arc::new(NoopSlackWebApi),
        Arc::new(NoopQuestionService),
        Arc::new(NoopFeedbackService),
        Arc::new(NoopConfigurationService),
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionRequest {
    pub channel_id: String,
    pub user_id: String,
    pub question: String,
    pub question_ts: String,
    pub thread_ts: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnswerDraft {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: Confidence,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QuestionOutcome {
    NotConfigured,
    Answered(AnswerDraft),
    Failed { reason: String },
}

/// Answering is split in two so the reply's `ts` can be recorded with the turn.
#[async_trait]
pub trait QuestionService: Send + Sync {
    async fn answer_question(
        &self,
        request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<QuestionOutcome, EventHandlerError>;

    async fn record_answer(
        &self,
        request: &QuestionRequest,
        draft: &AnswerDraft,
        reply_ts: &str,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;
}

#[derive(Default)]
pub struct NoopQuestionService;

#[async_trait]
impl QuestionService for NoopQuestionService {
    async fn answer_question(
        &self,
        _request: &QuestionRequest,
        _ctx: &EventContext,
    ) -> Result<QuestionOutcome, EventHandlerError> {
        Ok(QuestionOutcome::NotConfigured)
    }

    async fn record_answer(
        &self,
        _request: &QuestionRequest,
        _draft: &AnswerDraft,
        _reply_ts: &str,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        Ok(())
    }
}

/// Shared by the `app_mention` and `message` handlers so a mention delivered
/// through both subscriptions is answered once.
pub struct MentionResponder<Q> {
    service: Arc<Q>,
    web: Arc<dyn SlackWebApi>,
    bot_user_id: String,
    recent: Mutex<VecDeque<(String, String)>>,
}

impl<Q> MentionResponder<Q>
where
    Q: QuestionService,
{
    pub fn new(service: Arc<Q>, web: Arc<dyn SlackWebApi>, bot_user_id: String) -> Self {
        Self { service, web, bot_user_id, recent: Mutex::new(VecDeque::new()) }
    }

    fn claim(&self, event: &MessageEvent) -> bool {
        let key = (event.channel_id.clone(), event.ts.clone());
        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if recent.contains(&key) {
            return false;
        }
        if recent.len() >= RECENT_MENTION_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(key);
        true
    }

    async fn respond(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if !self.claim(event) {
            debug!(
                event_name = "ingress.slack.mention_duplicate",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                ts = %event.ts,
                "mention already handled"
            );
            return Ok(HandlerResult::Ignored);
        }

        let thread_ts = event.reply_thread().to_owned();
        let question = match parse_mention(&event.text) {
            MentionCommand::Configure => {
                return Ok(HandlerResult::Reply(OutboundMessage::to_channel(
                    &event.channel_id,
                    blocks::configure_prompt(&event.channel_id, CONFIGURE_INTRO),
                )));
            }
            MentionCommand::Empty => {
                return Ok(HandlerResult::Reply(OutboundMessage::in_thread(
                    &event.channel_id,
                    thread_ts,
                    blocks::usage_message(),
                )));
            }
            MentionCommand::Question(question) => question,
        };

        let request = QuestionRequest {
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone().unwrap_or_default(),
            question,
            question_ts: event.ts.clone(),
            thread_ts: thread_ts.clone(),
        };
        info!(
            event_name = "ingress.slack.question_received",
            correlation_id = %ctx.correlation_id,
            channel_id = %request.channel_id,
            thread_ts = %request.thread_ts,
            chars = request.question.chars().count(),
            "question received"
        );

        let outcome = match self.service.answer_question(&request, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => QuestionOutcome::Failed { reason: error.to_string() },
        };

        let draft = match outcome {
            QuestionOutcome::NotConfigured => {
                return Ok(HandlerResult::Reply(OutboundMessage::in_thread(
                    &request.channel_id,
                    thread_ts,
                    blocks::not_configured_message(),
                )));
            }
            QuestionOutcome::Failed { reason } => {
                warn!(
                    event_name = "query.answer.failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %request.channel_id,
                    reason = %reason,
                    "could not answer question"
                );
                return Ok(HandlerResult::Reply(OutboundMessage::in_thread(
                    &request.channel_id,
                    thread_ts,
                    blocks::could_not_answer_message(&reason),
                )));
            }
            QuestionOutcome::Answered(draft) => draft,
        };

        let reply = OutboundMessage::in_thread(
            &request.channel_id,
            &thread_ts,
            blocks::answer_message(&draft.answer, &draft.sources),
        );
        let reply_ts = self.web.post_message(&reply).await?;
        self.service.record_answer(&request, &draft, &reply_ts, ctx).await?;

        info!(
            event_name = "egress.slack.answer_posted",
            correlation_id = %ctx.correlation_id,
            channel_id = %request.channel_id,
            thread_ts = %thread_ts,
            reply_ts = %reply_ts,
            confidence = draft.confidence.as_str(),
            "answer posted"
        );
        Ok(HandlerResult::Processed)
    }
}

pub struct MentionHandler<Q> {
    event_type: SlackEventType,
    responder: Arc<MentionResponder<Q>>,
}

impl<Q> MentionHandler<Q>
where
    Q: QuestionService,
{
    pub fn new(event_type: SlackEventType, responder: Arc<MentionResponder<Q>>) -> Self {
        Self { event_type, responder }
    }
}

#[async_trait]
impl<Q> EventHandler for MentionHandler<Q>
where
    Q: QuestionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        self.event_type
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let event = match &envelope.event {
            SlackEvent::AppMention(event) => {
                if event.bot_id.is_some() {
                    return Ok(HandlerResult::Ignored);
                }
                event
            }
            SlackEvent::ChannelMessage(event) => {
                if !event.is_from_human()
                    || !mentions_user(&event.text, &self.responder.bot_user_id)
                {
                    return Ok(HandlerResult::Ignored);
                }
                event
            }
            _ => return Ok(HandlerResult::Ignored),
        };

        self.responder.respond(event, ctx).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackRequest {
    pub channel_id: String,
    pub message_ts: String,
    pub user_id: String,
    pub kind: FeedbackKind,
}

#[async_trait]
pub trait FeedbackService: Send + Sync {
    /// Returns the updated tally, or `None` when the message is not a recorded answer.
    async fn record_feedback(
        &self,
        request: &FeedbackRequest,
        ctx: &EventContext,
    ) -> Result<Option<FeedbackTally>, EventHandlerError>;
}

#[derive(Default)]
pub struct NoopFeedbackService;

#[async_trait]
impl FeedbackService for NoopFeedbackService {
    async fn record_feedback(
        &self,
        _request: &FeedbackRequest,
        _ctx: &EventContext,
    ) -> Result<Option<FeedbackTally>, EventHandlerError> {
        Ok(None)
    }
}

pub struct ReactionAddedHandler<F> {
    service: Arc<F>,
}

impl<F> ReactionAddedHandler<F>
where
    F: FeedbackService,
{
    pub fn new(service: Arc<F>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<F> EventHandler for ReactionAddedHandler<F>
where
    F: FeedbackService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ReactionAdded
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ReactionAdded(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.item_type != "message" {
            return Ok(HandlerResult::Ignored);
        }
        let Some(kind) = FeedbackKind::from_reaction(&event.reaction) else {
            return Ok(HandlerResult::Ignored);
        };

        let request = FeedbackRequest {
            channel_id: event.channel_id.clone(),
            message_ts: event.message_ts.clone(),
            user_id: event.user_id.clone(),
            kind,
        };
        match self.service.record_feedback(&request, ctx).await? {
            Some(tally) => {
                info!(
                    event_name = "feedback.reaction.recorded",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %request.channel_id,
                    message_ts = %request.message_ts,
                    up = tally.up,
                    down = tally.down,
                    "feedback recorded"
                );
                Ok(HandlerResult::Processed)
            }
            None => Ok(HandlerResult::Ignored),
        }
    }
}

pub struct AppHomeHandler;

#[async_trait]
impl EventHandler for AppHomeHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppHomeOpened
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppHomeOpened(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.tab.as_deref().is_some_and(|tab| tab != "home") {
            return Ok(HandlerResult::Ignored);
        }

        Ok(HandlerResult::PublishView { user_id: event.user_id.clone(), view: blocks::home_view() })
    }
}

#[async_trait]
pub trait ConfigurationService: Send + Sync {
    async fn is_configured(&self, channel_id: &str) -> Result<bool, EventHandlerError>;

    /// Persists the channel's new source set and starts indexing it.
    /// Returns the number of sources queued.
    async fn apply_configuration(
        &self,
        submission: &ConfigSubmission,
        descriptors: Vec<SourceDescriptor>,
        ctx: &EventContext,
    ) -> Result<usize, EventHandlerError>;
}

#[derive(Default)]
pub struct NoopConfigurationService;

#[async_trait]
impl ConfigurationService for NoopConfigurationService {
    async fn is_configured(&self, _channel_id: &str) -> Result<bool, EventHandlerError> {
        Ok(false)
    }

    async fn apply_configuration(
        &self,
        _submission: &ConfigSubmission,
        descriptors: Vec<SourceDescriptor>,
        _ctx: &EventContext,
    ) -> Result<usize, EventHandlerError> {
        Ok(descriptors.len())
    }
}

pub struct MemberJoinedHandler<C> {
    service: Arc<C>,
    bot_user_id: String,
}

impl<C> MemberJoinedHandler<C>
where
    C: ConfigurationService,
{
    pub fn new(service: Arc<C>, bot_user_id: impl Into<String>) -> Self {
        Self { service, bot_user_id: bot_user_id.into() }
    }
}

#[async_trait]
impl<C> EventHandler for MemberJoinedHandler<C>
where
    C: ConfigurationService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::MemberJoinedChannel
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::MemberJoinedChannel(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if self.bot_user_id.is_empty() || event.user_id != self.bot_user_id {
            return Ok(HandlerResult::Ignored);
        }
        if self.service.is_configured(&event.channel_id).await? {
            return Ok(HandlerResult::Processed);
        }

        Ok(HandlerResult::Reply(OutboundMessage::to_channel(
            &event.channel_id,
            blocks::configure_prompt(&event.channel_id, UNCONFIGURED_INTRO),
        )))
    }
}

/// Opens the configuration modal. Other block actions come from modal inputs and
/// only need the acknowledgement the socket loop already sent.
pub struct BlockActionHandler;

#[async_trait]
impl EventHandler for BlockActionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.action_id != OPEN_CONFIG_ACTION_ID {
            return Ok(HandlerResult::Processed);
        }

        let Some(channel_id) = event.value.as_deref().or(event.channel_id.as_deref()) else {
            return Err(EventHandlerError::Configuration(
                "configure button carried no channel".to_owned(),
            ));
        };
        Ok(HandlerResult::OpenView {
            trigger_id: event.trigger_id.clone(),
            view: blocks::config_modal(channel_id),
        })
    }
}

pub struct ViewSubmissionHandler<C> {
    service: Arc<C>,
}

impl<C> ViewSubmissionHandler<C>
where
    C: ConfigurationService,
{
    pub fn new(service: Arc<C>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<C> EventHandler for ViewSubmissionHandler<C>
where
    C: ConfigurationService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ViewSubmission
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ViewSubmission(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.callback_id != CONFIG_MODAL_CALLBACK_ID {
            return Ok(HandlerResult::Ignored);
        }

        let submission = ConfigSubmission::from_view_state(
            &event.private_metadata,
            &event.user_id,
            &event.state,
        )
        .map_err(|error| EventHandlerError::Configuration(error.to_string()))?;
        let channel_id = submission.channel_id.clone();

        let saved = match submission.descriptors() {
            Ok(descriptors) => self
                .service
                .apply_configuration(&submission, descriptors, ctx)
                .await
                .map(blocks::configuration_saved_message),
            Err(error) => Err(EventHandlerError::Configuration(error.to_string())),
        };

        let message = match saved {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    event_name = "config.submission.rejected",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %channel_id,
                    error = %error,
                    "configuration not saved"
                );
                blocks::configuration_failed_message(&error.to_string())
            }
        };
        Ok(HandlerResult::Reply(OutboundMessage::to_channel(channel_id, message)))
    }
}
