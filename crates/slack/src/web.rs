use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::blocks::{OutboundMessage, View};

pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack request `{method}` failed: {reason}")]
    Request { method: String, reason: String },
    #[error("slack method `{method}` returned error `{error}`")]
    Api { method: String, error: String },
    #[error("slack method `{method}` returned an unreadable body: {reason}")]
    Decode { method: String, reason: String },
}

/// Who the bot token belongs to, from `auth.test`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    pub team_id: String,
    #[serde(default, rename = "team")]
    pub team_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    pub next_cursor: Option<String>,
}

/// The subset of the Slack Web API the bot talks to.
#[async_trait]
pub trait SlackWebApi: Send + Sync {
    async fn auth_test(&self) -> Result<BotIdentity, SlackApiError>;
    /// Returns the `ts` of the posted message.
    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError>;
    async fn open_view(&self, trigger_id: &str, view: &View) -> Result<(), SlackApiError>;
    async fn publish_view(&self, user_id: &str, view: &View) -> Result<(), SlackApiError>;
    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelInfo, SlackApiError>;
    async fn conversation_history(
        &self,
        channel_id: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError>;
    async fn conversation_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError>;
}

/// Accepts everything and posts nowhere.
#[derive(Default)]
pub struct NoopSlackWebApi;

#[async_trait]
impl SlackWebApi for NoopSlackWebApi {
    async fn auth_test(&self) -> Result<BotIdentity, SlackApiError> {
        Ok(BotIdentity { user_id: String::new(), team_id: String::new(), team_name: None })
    }

    async fn post_message(&self, _message: &OutboundMessage) -> Result<String, SlackApiError> {
        Ok("0000000000.000000".to_owned())
    }

    async fn open_view(&self, _trigger_id: &str, _view: &View) -> Result<(), SlackApiError> {
        Ok(())
    }

    async fn publish_view(&self, _user_id: &str, _view: &View) -> Result<(), SlackApiError> {
        Ok(())
    }

    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelInfo, SlackApiError> {
        Ok(ChannelInfo { id: channel_id.to_owned(), name: None })
    }

    async fn conversation_history(
        &self,
        _channel_id: &str,
        _oldest: &str,
        _cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        Ok(HistoryPage::default())
    }

    async fn conversation_replies(
        &self,
        _channel_id: &str,
        _thread_ts: &str,
        _cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        Ok(HistoryPage::default())
    }
}

/// Keeps every outbound call in memory and serves scripted history pages.
#[derive(Default)]
pub struct RecordingSlackWebApi {
    posted: Mutex<Vec<OutboundMessage>>,
    opened: Mutex<Vec<(String, View)>>,
    published: Mutex<Vec<(String, View)>>,
    history: Mutex<Vec<HistoryMessage>>,
    replies: Mutex<HashMap<String, Vec<HistoryMessage>>>,
}

impl RecordingSlackWebApi {
    pub async fn set_history(&self, messages: Vec<HistoryMessage>) {
        *self.history.lock().await = messages;
    }

    pub async fn set_replies(&self, thread_ts: &str, messages: Vec<HistoryMessage>) {
        self.replies.lock().await.insert(thread_ts.to_owned(), messages);
    }

    pub async fn posted(&self) -> Vec<OutboundMessage> {
        self.posted.lock().await.clone()
    }

    pub async fn opened_views(&self) -> Vec<(String, View)> {
        self.opened.lock().await.clone()
    }

    pub async fn published_views(&self) -> Vec<(String, View)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl SlackWebApi for RecordingSlackWebApi {
    async fn auth_test(&self) -> Result<BotIdentity, SlackApiError> {
        Ok(BotIdentity {
            user_id: "U0BOT".to_owned(),
            team_id: "T0TEAM".to_owned(),
            team_name: None,
        })
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError> {
        let mut posted = self.posted.lock().await;
        posted.push(message.clone());
        Ok(format!("1700000100.{:06}", posted.len()))
    }

    async fn open_view(&self, trigger_id: &str, view: &View) -> Result<(), SlackApiError> {
        self.opened.lock().await.push((trigger_id.to_owned(), view.clone()));
        Ok(())
    }

    async fn publish_view(&self, user_id: &str, view: &View) -> Result<(), SlackApiError> {
        self.published.lock().await.push((user_id.to_owned(), view.clone()));
        Ok(())
    }

    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelInfo, SlackApiError> {
        Ok(ChannelInfo { id: channel_id.to_owned(), name: Some(format!("channel-{channel_id}")) })
    }

    async fn conversation_history(
        &self,
        _channel_id: &str,
        _oldest: &str,
        _cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        Ok(HistoryPage { messages: self.history.lock().await.clone(), next_cursor: None })
    }

    async fn conversation_replies(
        &self,
        _channel_id: &str,
        thread_ts: &str,
        _cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        let messages = self.replies.lock().await.get(thread_ts).cloned().unwrap_or_default();
        Ok(HistoryPage { messages, next_cursor: None })
    }
}

const HISTORY_PAGE_LIMIT: u32 = 200;

pub struct SlackWebClient {
    http: reqwest::Client,
    bot_token: SecretString,
    base_url: String,
}

impl SlackWebClient {
    pub fn new(bot_token: SecretString) -> Result<Self, SlackApiError> {
        Self::with_base_url(bot_token, DEFAULT_API_BASE_URL)
    }

    pub fn with_base_url(
        bot_token: SecretString,
        base_url: impl Into<String>,
    ) -> Result<Self, SlackApiError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().map_err(
            |error| SlackApiError::Request { method: "client".to_owned(), reason: error.to_string() },
        )?;
        Ok(Self { http, bot_token, base_url: base_url.into().trim_end_matches('/').to_owned() })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    fn post_json(&self, method: &str, body: &Value) -> RequestBuilder {
        self.http.post(self.url(method)).bearer_auth(self.bot_token.expose_secret()).json(body)
    }

    fn get(&self, method: &str, query: &[(&str, String)]) -> RequestBuilder {
        self.http.get(self.url(method)).bearer_auth(self.bot_token.expose_secret()).query(query)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: RequestBuilder,
    ) -> Result<T, SlackApiError> {
        let body = call_raw(method, request).await?;
        serde_json::from_value(body)
            .map_err(|error| SlackApiError::Decode { method: method.to_owned(), reason: error.to_string() })
    }

    async fn history(
        &self,
        method: &str,
        query: Vec<(&str, String)>,
    ) -> Result<HistoryPage, SlackApiError> {
        let page: RawHistoryPage = self.call(method, self.get(method, &query)).await?;
        Ok(HistoryPage {
            messages: page.messages,
            next_cursor: page
                .response_metadata
                .and_then(|metadata| metadata.next_cursor)
                .filter(|cursor| !cursor.is_empty()),
        })
    }
}

/// Sends a request and unwraps Slack's `{ok, error}` envelope.
pub(crate) async fn call_raw(method: &str, request: RequestBuilder) -> Result<Value, SlackApiError> {
    let response = request
        .send()
        .await
        .map_err(|error| SlackApiError::Request { method: method.to_owned(), reason: error.to_string() })?;
    let status = response.status();
    let body: Value = response.json().await.map_err(|error| SlackApiError::Decode {
        method: method.to_owned(),
        reason: format!("status {status}: {error}"),
    })?;

    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        return Err(SlackApiError::Api { method: method.to_owned(), error: error.to_owned() });
    }

    debug!(event_name = "egress.slack.api_call", method, "slack api call succeeded");
    Ok(body)
}

#[derive(Deserialize)]
struct RawHistoryPage {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct PostedMessage {
    ts: String,
}

#[derive(Deserialize)]
struct ChannelEnvelope {
    channel: ChannelInfo,
}

#[async_trait]
impl SlackWebApi for SlackWebClient {
    async fn auth_test(&self) -> Result<BotIdentity, SlackApiError> {
        self.call("auth.test", self.post_json("auth.test", &json!({}))).await
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError> {
        let mut body = json!({
            "channel": message.channel_id,
            "text": message.message.fallback_text,
            "unfurl_links": false,
        });
        if !message.message.blocks.is_empty() {
            body["blocks"] = serde_json::to_value(&message.message.blocks).map_err(|error| {
                SlackApiError::Decode { method: "chat.postMessage".to_owned(), reason: error.to_string() }
            })?;
        }
        if let Some(thread_ts) = &message.thread_ts {
            body["thread_ts"] = Value::String(thread_ts.clone());
        }

        let posted: PostedMessage =
            self.call("chat.postMessage", self.post_json("chat.postMessage", &body)).await?;
        Ok(posted.ts)
    }

    async fn open_view(&self, trigger_id: &str, view: &View) -> Result<(), SlackApiError> {
        let body = json!({ "trigger_id": trigger_id, "view": view });
        call_raw("views.open", self.post_json("views.open", &body)).await.map(|_| ())
    }

    async fn publish_view(&self, user_id: &str, view: &View) -> Result<(), SlackApiError> {
        let body = json!({ "user_id": user_id, "view": view });
        call_raw("views.publish", self.post_json("views.publish", &body)).await.map(|_| ())
    }

    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelInfo, SlackApiError> {
        let query = [("channel", channel_id.to_owned())];
        let envelope: ChannelEnvelope =
            self.call("conversations.info", self.get("conversations.info", &query)).await?;
        Ok(envelope.channel)
    }

    async fn conversation_history(
        &self,
        channel_id: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        let mut query = vec![
            ("channel", channel_id.to_owned()),
            ("oldest", oldest.to_owned()),
            ("limit", HISTORY_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_owned()));
        }
        self.history("conversations.history", query).await
    }

    async fn conversation_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, SlackApiError> {
        let mut query = vec![
            ("channel", channel_id.to_owned()),
            ("ts", thread_ts.to_owned()),
            ("limit", HISTORY_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_owned()));
        }
        self.history("conversations.replies", query).await
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{SlackApiError, SlackWebApi, SlackWebClient};
    use crate::blocks::{answer_message, home_view, MessageTemplate, OutboundMessage};

    fn client(server: &MockServer) -> SlackWebClient {
        SlackWebClient::with_base_url(SecretString::from("xoxb-test".to_owned()), server.uri())
            .expect("client")
    }

    #[tokio::test]
    async fn auth_test_reads_bot_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "user_id": "U0BOT", "team_id": "T1", "team": "Acme"
            })))
            .mount(&server)
            .await;

        let identity = client(&server).auth_test().await.expect("auth");
        assert_eq!(identity.user_id, "U0BOT");
        assert_eq!(identity.team_name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn post_message_threads_reply_and_returns_ts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(json!({"channel": "C1", "thread_ts": "1.0"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "ts": "2.0"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundMessage::in_thread("C1", "1.0", answer_message("hello", &[]));
        let ts = client(&server).post_message(&message).await.expect("post");
        assert_eq!(ts, "2.0");
    }

    #[tokio::test]
    async fn api_errors_surface_the_slack_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "not_in_channel"})),
            )
            .mount(&server)
            .await;

        let error = client(&server)
            .post_message(&OutboundMessage::to_channel("C1", MessageTemplate::text("hi")))
            .await
            .expect_err("should fail");
        assert_eq!(
            error,
            SlackApiError::Api {
                method: "chat.postMessage".to_owned(),
                error: "not_in_channel".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn publish_view_sends_home_tab() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/views.publish"))
            .and(body_partial_json(json!({"user_id": "U1", "view": {"type": "home"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).publish_view("U1", &home_view()).await.expect("publish");
    }

    #[tokio::test]
    async fn history_pages_follow_cursor_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("channel", "C1"))
            .and(query_param("oldest", "1700000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"ts": "1700000100.000100", "user": "U1", "text": "How do I upgrade?", "reply_count": 2},
                    {"ts": "1700000050.000100", "subtype": "channel_join", "text": "joined"}
                ],
                "response_metadata": {"next_cursor": "abc"}
            })))
            .mount(&server)
            .await;

        let page = client(&server)
            .conversation_history("C1", "1700000000", None)
            .await
            .expect("history");
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].reply_count, 2);
        assert_eq!(page.messages[1].subtype.as_deref(), Some("channel_join"));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn empty_cursor_means_last_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"ts": "1.0", "user": "U1", "text": "parent"}],
                "response_metadata": {"next_cursor": ""}
            })))
            .mount(&server)
            .await;

        let page =
            client(&server).conversation_replies("C1", "1.0", None).await.expect("replies");
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn conversation_info_reads_channel_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.info"))
            .and(query_param("channel", "C1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true, "channel": {"id": "C1", "name": "operator-help"}
            })))
            .mount(&server)
            .await;

        let info = client(&server).conversation_info("C1").await.expect("info");
        assert_eq!(info.name.as_deref(), Some("operator-help"));
    }
}
