use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{
    default_dispatcher, DispatchError, EventContext, EventDispatcher, HandlerResult,
    SlackEnvelope, SlackEvent,
};
use crate::web::{NoopSlackWebApi, SlackApiError, SlackWebApi};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Delivery(#[from] SlackApiError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the stream ended cleanly and the runner should stop.
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct PumpFailure {
    error: TransportError,
    connected: bool,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
    web: Arc<dyn SlackWebApi>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for SocketModeRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopSocketTransport),
            dispatcher: default_dispatcher(),
            web: Arc::new(NoopSlackWebApi),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, web: Arc::new(NoopSlackWebApi), reconnect_policy }
    }

    /// Handler results (replies, modals, home tabs) are delivered through `web`.
    pub fn with_web_api(mut self, web: Arc<dyn SlackWebApi>) -> Self {
        self.web = web;
        self
    }

    /// Runs until the transport ends cleanly or connecting fails more than
    /// `max_retries` times in a row. A connection that was established and then
    /// dropped resets the retry budget, since Slack rotates sockets routinely.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0_u32;
        loop {
            let failure = match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };

            warn!(
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                connected = failure.connected,
                error = %failure.error,
                "socket mode transport failed"
            );

            if failure.connected {
                attempt = 0;
            } else if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "socket mode retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !failure.connected {
                attempt += 1;
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        info!(attempt, "opening socket mode transport connection");
        self.transport
            .connect()
            .await
            .map_err(|error| PumpFailure { error, connected: false })?;
        info!(attempt, "socket mode transport connected");

        loop {
            let next = self.transport.next_envelope().await;
            let Some(envelope) = next.map_err(|error| PumpFailure { error, connected: true })?
            else {
                info!(attempt, "socket mode transport stream closed");
                return self
                    .transport
                    .disconnect()
                    .await
                    .map_err(|error| PumpFailure { error, connected: true });
            };
            self.handle_envelope(&envelope).await;
        }
    }

    async fn handle_envelope(&self, envelope: &SlackEnvelope) {
        let (channel_id, thread_ts) = correlation_fields(envelope);
        let channel_id = channel_id.unwrap_or("unknown");
        let thread_ts = thread_ts.unwrap_or("unknown");

        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            channel_id,
            thread_ts,
            "received slack envelope"
        );

        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                channel_id,
                thread_ts,
                error = %error,
                "failed to acknowledge slack envelope"
            );
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                channel_id,
                thread_ts,
                "acknowledged slack envelope"
            );
        }

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        let outcome = match self.dispatcher.dispatch(envelope, &context).await {
            Ok(result) => self.deliver(result).await,
            Err(error) => Err(SocketError::from(error)),
        };
        if let Err(error) = outcome {
            warn!(
                event_name = "ingress.slack.dispatch_failed",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                channel_id,
                thread_ts,
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
        }
    }

    async fn deliver(&self, result: HandlerResult) -> Result<(), SocketError> {
        match result {
            HandlerResult::Reply(message) => {
                self.web.post_message(&message).await?;
            }
            HandlerResult::OpenView { trigger_id, view } => {
                self.web.open_view(&trigger_id, &view).await?;
            }
            HandlerResult::PublishView { user_id, view } => {
                self.web.publish_view(&user_id, &view).await?;
            }
            HandlerResult::Processed | HandlerResult::Ignored => {}
        }
        Ok(())
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<&str>, Option<&str>) {
    match &envelope.event {
        SlackEvent::AppMention(event) | SlackEvent::ChannelMessage(event) => {
            (Some(event.channel_id.as_str()), Some(event.reply_thread()))
        }
        SlackEvent::ReactionAdded(event) => {
            (Some(event.channel_id.as_str()), Some(event.message_ts.as_str()))
        }
        SlackEvent::MemberJoinedChannel(event) => (Some(event.channel_id.as_str()), None),
        SlackEvent::BlockAction(event) => (event.channel_id.as_deref(), None),
        SlackEvent::ViewSubmission(event) => (Some(event.private_metadata.as_str()), None),
        SlackEvent::AppHomeOpened(_) | SlackEvent::Unsupported { .. } => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::events::{
        default_dispatcher, AppHomeOpenedEvent, BlockActionEvent, EventDispatcher, MessageEvent,
        SlackEnvelope, SlackEvent,
    };
    use crate::web::RecordingSlackWebApi;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        disconnect_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
            disconnect_results: Vec<Result<(), TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    disconnect_results: disconnect_results.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            state.disconnect_results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn unsupported(envelope_id: &str) -> SlackEnvelope {
        SlackEnvelope::new(envelope_id, SlackEvent::Unsupported { event_type: "test".to_owned() })
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(unsupported("env-1"))), Ok(None)],
            vec![Ok(())],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), no_delay(2));

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), no_delay(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn dropped_connection_reconnects_without_spending_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Ok(Some(unsupported("env-1"))),
                Err(TransportError::Receive("refresh_requested".to_owned())),
                Ok(Some(unsupported("env-2"))),
                Ok(None),
            ],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), no_delay(0));

        runner.start().await.expect("runner should reconnect");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1", "env-2"]);
    }

    #[tokio::test]
    async fn handler_results_are_delivered_through_web_api() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope::new(
                    "env-home",
                    SlackEvent::AppHomeOpened(AppHomeOpenedEvent {
                        user_id: "U9".to_owned(),
                        tab: None,
                    }),
                ))),
                Ok(Some(SlackEnvelope::new(
                    "env-button",
                    SlackEvent::BlockAction(BlockActionEvent {
                        trigger_id: "trig-9".to_owned(),
                        user_id: "U9".to_owned(),
                        channel_id: Some("C1".to_owned()),
                        action_id: "open_config_modal".to_owned(),
                        value: None,
                    }),
                ))),
                Ok(Some(SlackEnvelope::new(
                    "env-mention",
                    SlackEvent::AppMention(MessageEvent {
                        channel_id: "C1".to_owned(),
                        user_id: Some("U1".to_owned()),
                        text: "<@U0BOT> where are the docs?".to_owned(),
                        ts: "1700000000.000100".to_owned(),
                        ..MessageEvent::default()
                    }),
                ))),
                Ok(None),
            ],
            vec![],
        ));
        let web = Arc::new(RecordingSlackWebApi::default());

        let runner = SocketModeRunner::new(transport.clone(), default_dispatcher(), no_delay(0))
            .with_web_api(web.clone());
        runner.start().await.expect("runner");

        let published = web.published_views().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "U9");

        let opened = web.opened_views().await;
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].0, "trig-9");

        let posted = web.posted().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].thread_ts.as_deref(), Some("1700000000.000100"));
        assert!(posted[0].message.fallback_text.contains("not configured"));
    }

    #[test]
    fn extracts_channel_and_thread_correlation_fields() {
        let envelope = SlackEnvelope::new(
            "env-2",
            SlackEvent::ChannelMessage(MessageEvent {
                channel_id: "C1".to_owned(),
                text: "follow-up".to_owned(),
                ts: "1730000000.2000".to_owned(),
                thread_ts: Some("1730000000.1000".to_owned()),
                ..MessageEvent::default()
            }),
        );

        let (channel_id, thread_ts) = super::correlation_fields(&envelope);
        assert_eq!(channel_id, Some("C1"));
        assert_eq!(thread_ts, Some("1730000000.1000"));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(10).as_millis(), 5_000);
    }
}
