//! Decoding of Socket Mode frames into [`SlackEnvelope`]s.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::commands::ViewState;
use crate::events::{
    AppHomeOpenedEvent, BlockActionEvent, MemberJoinedEvent, MessageEvent, ReactionAddedEvent,
    SlackEnvelope, SlackEvent, ViewSubmissionEvent,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed socket frame: {0}")]
    Malformed(String),
    #[error("socket frame `{frame_type}` is missing `{field}`")]
    MissingField { frame_type: String, field: &'static str },
}

/// One text frame received over the Socket Mode WebSocket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    /// Slack asks the client to reconnect, usually with `refresh_requested`.
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct EventsApiPayload {
    #[serde(default)]
    team_id: Option<String>,
    event: Value,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

impl From<RawMessage> for MessageEvent {
    fn from(raw: RawMessage) -> Self {
        Self {
            channel_id: raw.channel,
            user_id: raw.user,
            text: raw.text.unwrap_or_default(),
            ts: raw.ts,
            thread_ts: raw.thread_ts,
            subtype: raw.subtype,
            bot_id: raw.bot_id,
        }
    }
}

#[derive(Deserialize)]
struct RawReaction {
    user: String,
    reaction: String,
    #[serde(default)]
    item_user: Option<String>,
    item: RawReactionItem,
}

#[derive(Deserialize)]
struct RawReactionItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
}

#[derive(Deserialize)]
struct RawAppHome {
    user: String,
    #[serde(default)]
    tab: Option<String>,
}

#[derive(Deserialize)]
struct RawMemberJoined {
    user: String,
    channel: String,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Deserialize)]
struct RawBlockActions {
    #[serde(default)]
    trigger_id: String,
    user: IdRef,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Deserialize)]
struct RawAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RawViewSubmission {
    user: IdRef,
    view: RawView,
}

#[derive(Deserialize)]
struct RawView {
    #[serde(default)]
    callback_id: String,
    #[serde(default)]
    private_metadata: String,
    #[serde(default)]
    state: RawViewState,
}

#[derive(Default, Deserialize)]
struct RawViewState {
    #[serde(default)]
    values: ViewState,
}

pub fn parse_frame(raw: &str) -> Result<SocketFrame, EnvelopeError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|error| EnvelopeError::Malformed(error.to_string()))?;

    match frame.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
            })
        }
        _ => {}
    }

    let envelope_id = frame.envelope_id.ok_or_else(|| EnvelopeError::MissingField {
        frame_type: frame.frame_type.clone(),
        field: "envelope_id",
    })?;
    let payload = frame.payload.unwrap_or(Value::Null);

    let (team_id, event) = match frame.frame_type.as_str() {
        "events_api" => {
            let payload: EventsApiPayload = decode(payload)?;
            (payload.team_id, parse_event(payload.event)?)
        }
        "interactive" => (team_from_interactive(&payload), parse_interactive(payload)?),
        other => (None, SlackEvent::Unsupported { event_type: other.to_owned() }),
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, team_id, event }))
}

fn parse_event(event: Value) -> Result<SlackEvent, EnvelopeError> {
    let event_type = type_of(&event);
    let parsed = match event_type.as_str() {
        "app_mention" => SlackEvent::AppMention(decode::<RawMessage>(event)?.into()),
        "message" => SlackEvent::ChannelMessage(decode::<RawMessage>(event)?.into()),
        "reaction_added" => {
            let raw: RawReaction = decode(event)?;
            SlackEvent::ReactionAdded(ReactionAddedEvent {
                user_id: raw.user,
                reaction: raw.reaction,
                item_type: raw.item.item_type,
                channel_id: raw.item.channel,
                message_ts: raw.item.ts,
                item_user: raw.item_user,
            })
        }
        "app_home_opened" => {
            let raw: RawAppHome = decode(event)?;
            SlackEvent::AppHomeOpened(AppHomeOpenedEvent { user_id: raw.user, tab: raw.tab })
        }
        "member_joined_channel" => {
            let raw: RawMemberJoined = decode(event)?;
            SlackEvent::MemberJoinedChannel(MemberJoinedEvent {
                channel_id: raw.channel,
                user_id: raw.user,
            })
        }
        _ => SlackEvent::Unsupported { event_type },
    };
    Ok(parsed)
}

fn parse_interactive(payload: Value) -> Result<SlackEvent, EnvelopeError> {
    let payload_type = type_of(&payload);
    match payload_type.as_str() {
        "block_actions" => {
            let raw: RawBlockActions = decode(payload)?;
            let Some(action) = raw.actions.into_iter().next() else {
                return Err(EnvelopeError::MissingField {
                    frame_type: "block_actions".to_owned(),
                    field: "actions",
                });
            };
            Ok(SlackEvent::BlockAction(BlockActionEvent {
                trigger_id: raw.trigger_id,
                user_id: raw.user.id,
                channel_id: raw.channel.map(|channel| channel.id),
                action_id: action.action_id,
                value: action.value,
            }))
        }
        "view_submission" => {
            let raw: RawViewSubmission = decode(payload)?;
            Ok(SlackEvent::ViewSubmission(ViewSubmissionEvent {
                user_id: raw.user.id,
                callback_id: raw.view.callback_id,
                private_metadata: raw.view.private_metadata,
                state: raw.view.state.values,
            }))
        }
        _ => Ok(SlackEvent::Unsupported { event_type: payload_type }),
    }
}

fn team_from_interactive(payload: &Value) -> Option<String> {
    payload.pointer("/team/id").and_then(Value::as_str).map(str::to_owned)
}

fn type_of(value: &Value) -> String {
    value.get("type").and_then(Value::as_str).unwrap_or("unknown").to_owned()
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, EnvelopeError> {
    serde_json::from_value(value).map_err(|error| EnvelopeError::Malformed(error.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_frame, EnvelopeError, SocketFrame};
    use crate::events::{SlackEvent, SlackEventType};

    fn envelope_event(raw: serde_json::Value) -> SlackEvent {
        match parse_frame(&raw.to_string()).expect("frame") {
            SocketFrame::Envelope(envelope) => envelope.event,
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn hello_and_disconnect_frames_are_control_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"hello","num_connections":1}"#).expect("hello"),
            SocketFrame::Hello
        );
        assert_eq!(
            parse_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#).expect("disconnect"),
            SocketFrame::Disconnect { reason: "refresh_requested".to_owned() }
        );
    }

    #[test]
    fn parses_app_mention_with_team() {
        let frame = parse_frame(
            &json!({
                "envelope_id": "env-1",
                "type": "events_api",
                "payload": {
                    "team_id": "T1",
                    "event": {
                        "type": "app_mention",
                        "user": "U1",
                        "text": "<@U0BOT> how do I install?",
                        "ts": "1700000000.000100",
                        "channel": "C1"
                    }
                }
            })
            .to_string(),
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.envelope_id, "env-1");
        assert_eq!(envelope.team_id.as_deref(), Some("T1"));
        let SlackEvent::AppMention(event) = envelope.event else {
            panic!("expected mention");
        };
        assert_eq!(event.channel_id, "C1");
        assert_eq!(event.reply_thread(), "1700000000.000100");
    }

    #[test]
    fn message_edits_keep_subtype() {
        let event = envelope_event(json!({
            "envelope_id": "env-2",
            "type": "events_api",
            "payload": {"event": {
                "type": "message", "subtype": "message_changed", "channel": "C1", "ts": "1.0"
            }}
        }));

        let SlackEvent::ChannelMessage(message) = event else {
            panic!("expected message");
        };
        assert_eq!(message.subtype.as_deref(), Some("message_changed"));
        assert!(!message.is_from_human());
    }

    #[test]
    fn parses_reaction_item() {
        let event = envelope_event(json!({
            "envelope_id": "env-3",
            "type": "events_api",
            "payload": {"event": {
                "type": "reaction_added",
                "user": "U2",
                "reaction": "+1",
                "item_user": "U0BOT",
                "item": {"type": "message", "channel": "C1", "ts": "1700000100.000001"}
            }}
        }));

        let SlackEvent::ReactionAdded(reaction) = event else {
            panic!("expected reaction");
        };
        assert_eq!(reaction.message_ts, "1700000100.000001");
        assert_eq!(reaction.item_type, "message");
    }

    #[test]
    fn parses_block_action_and_view_submission() {
        let action = envelope_event(json!({
            "envelope_id": "env-4",
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "trigger_id": "trig-1",
                "user": {"id": "U1"},
                "channel": {"id": "C1"},
                "team": {"id": "T1"},
                "actions": [{"action_id": "open_config_modal", "value": "C1"}]
            }
        }));
        assert_eq!(action.event_type(), SlackEventType::BlockAction);

        let submission = envelope_event(json!({
            "envelope_id": "env-5",
            "type": "interactive",
            "payload": {
                "type": "view_submission",
                "user": {"id": "U1"},
                "view": {
                    "callback_id": "config_modal",
                    "private_metadata": "C1",
                    "state": {"values": {
                        "docs_urls": {"docs_urls_input": {"type": "plain_text_input", "value": "https://docs.example.com"}}
                    }}
                }
            }
        }));
        let SlackEvent::ViewSubmission(view) = submission else {
            panic!("expected submission");
        };
        assert_eq!(view.private_metadata, "C1");
        assert!(view.state.contains_key("docs_urls"));
    }

    #[test]
    fn unknown_payloads_are_unsupported_not_errors() {
        let event = envelope_event(json!({
            "envelope_id": "env-6",
            "type": "slash_commands",
            "payload": {"command": "/replier"}
        }));
        assert_eq!(event, SlackEvent::Unsupported { event_type: "slash_commands".to_owned() });

        let event = envelope_event(json!({
            "envelope_id": "env-7",
            "type": "events_api",
            "payload": {"event": {"type": "channel_rename"}}
        }));
        assert_eq!(event, SlackEvent::Unsupported { event_type: "channel_rename".to_owned() });
    }

    #[test]
    fn envelope_without_id_is_rejected() {
        assert_eq!(
            parse_frame(r#"{"type":"events_api","payload":{}}"#),
            Err(EnvelopeError::MissingField {
                frame_type: "events_api".to_owned(),
                field: "envelope_id"
            })
        );
        assert!(matches!(parse_frame("not json"), Err(EnvelopeError::Malformed(_))));
    }
}
