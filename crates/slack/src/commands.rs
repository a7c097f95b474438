use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use replier_core::domain::source::{RepoRole, SourceDescriptor, DEFAULT_HISTORY_DAYS};
use replier_core::errors::DomainError;

use crate::blocks::{
    DOCS_ACTION_ID, DOCS_BLOCK_ID, HISTORY_ACTION_ID, HISTORY_BLOCK_ID, ISSUES_ACTION_ID,
    ISSUES_BLOCK_ID, OPERAND_ACTION_ID, OPERAND_BLOCK_ID, OPERATOR_ACTION_ID, OPERATOR_BLOCK_ID,
};

const CONFIGURE_KEYWORDS: [&str; 3] = ["configure", "config", "setup"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MentionCommand {
    Configure,
    Question(String),
    Empty,
}

/// Removes every `<@U…>` user mention and collapses the remaining whitespace.
pub fn strip_mentions(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        cleaned.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                cleaned.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    cleaned.push_str(rest);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn mentions_user(text: &str, user_id: &str) -> bool {
    !user_id.is_empty() && text.contains(&format!("<@{user_id}>"))
}

pub fn parse_mention(text: &str) -> MentionCommand {
    let cleaned = strip_mentions(text);
    if cleaned.is_empty() {
        return MentionCommand::Empty;
    }
    let lowered = cleaned.to_lowercase();
    if CONFIGURE_KEYWORDS.contains(&lowered.as_str()) {
        return MentionCommand::Configure;
    }
    MentionCommand::Question(cleaned)
}

/// One `state.values[block_id][action_id]` entry of a submitted view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct StateValue {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub selected_option: Option<SelectedOption>,
    #[serde(default)]
    pub selected_options: Vec<SelectedOption>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SelectedOption {
    pub value: String,
}

pub type ViewState = HashMap<String, HashMap<String, StateValue>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("configuration modal is missing the target channel")]
    MissingChannel,
    #[error("invalid history window `{0}`")]
    InvalidHistoryWindow(String),
    #[error(transparent)]
    InvalidSource(#[from] DomainError),
}

/// What the configuration modal asked for, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigSubmission {
    pub channel_id: String,
    pub user_id: String,
    pub docs_urls: Vec<String>,
    pub operator_repo: Option<String>,
    pub operand_repo: Option<String>,
    pub include_issues: bool,
    pub history_days: u32,
}

impl ConfigSubmission {
    pub fn from_view_state(
        private_metadata: &str,
        user_id: &str,
        state: &ViewState,
    ) -> Result<Self, SubmissionError> {
        let channel_id = private_metadata.trim();
        if channel_id.is_empty() {
            return Err(SubmissionError::MissingChannel);
        }

        let docs_urls = text_value(state, DOCS_BLOCK_ID, DOCS_ACTION_ID)
            .map(|raw| {
                raw.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_owned).collect()
            })
            .unwrap_or_default();

        let include_issues = state_value(state, ISSUES_BLOCK_ID, ISSUES_ACTION_ID)
            .map(|value| !value.selected_options.is_empty())
            .unwrap_or(false);

        let history_days = match state_value(state, HISTORY_BLOCK_ID, HISTORY_ACTION_ID)
            .and_then(|value| value.selected_option.as_ref())
        {
            Some(option) => option
                .value
                .parse::<u32>()
                .map_err(|_| SubmissionError::InvalidHistoryWindow(option.value.clone()))?,
            None => DEFAULT_HISTORY_DAYS,
        };

        Ok(Self {
            channel_id: channel_id.to_owned(),
            user_id: user_id.to_owned(),
            docs_urls,
            operator_repo: text_value(state, OPERATOR_BLOCK_ID, OPERATOR_ACTION_ID),
            operand_repo: text_value(state, OPERAND_BLOCK_ID, OPERAND_ACTION_ID),
            include_issues,
            history_days,
        })
    }

    /// Validates every field and expands the submission into source descriptors.
    /// Issues piggyback on the operator repository; a zero history window means
    /// the channel's own history is not indexed.
    pub fn descriptors(&self) -> Result<Vec<SourceDescriptor>, SubmissionError> {
        let mut descriptors = Vec::new();

        for url in &self.docs_urls {
            descriptors.push(SourceDescriptor::documentation(url)?);
        }

        if let Some(operator) = &self.operator_repo {
            descriptors.push(SourceDescriptor::github_repository(operator, RepoRole::Operator)?);
            if self.include_issues {
                descriptors.push(SourceDescriptor::github_issues(operator)?);
            }
        }

        if let Some(operand) = &self.operand_repo {
            descriptors.push(SourceDescriptor::github_repository(operand, RepoRole::Operand)?);
        }

        if self.history_days > 0 {
            descriptors.push(SourceDescriptor::slack_history(&self.channel_id, self.history_days)?);
        }

        Ok(descriptors)
    }
}

fn state_value<'a>(state: &'a ViewState, block_id: &str, action_id: &str) -> Option<&'a StateValue> {
    state.get(block_id).and_then(|actions| actions.get(action_id))
}

fn text_value(state: &ViewState, block_id: &str, action_id: &str) -> Option<String> {
    state_value(state, block_id, action_id)
        .and_then(|value| value.value.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use replier_core::domain::source::{SourceDescriptor, SourceType};

    use super::{
        mentions_user, parse_mention, strip_mentions, ConfigSubmission, MentionCommand,
        SubmissionError, ViewState,
    };

    fn state(value: serde_json::Value) -> ViewState {
        serde_json::from_value(value).expect("view state")
    }

    #[test]
    fn strips_bot_mentions_anywhere_in_text() {
        assert_eq!(strip_mentions("<@U0BOT> how do I   install?"), "how do I install?");
        assert_eq!(strip_mentions("hey <@U0BOT|replier> there"), "hey there");
        assert_eq!(strip_mentions("broken <@U0BOT"), "broken <@U0BOT");
    }

    #[test]
    fn configure_keywords_are_case_insensitive() {
        assert_eq!(parse_mention("<@U0BOT> Configure"), MentionCommand::Configure);
        assert_eq!(parse_mention("<@U0BOT> setup"), MentionCommand::Configure);
        assert_eq!(parse_mention("<@U0BOT>   CONFIG "), MentionCommand::Configure);
    }

    #[test]
    fn configure_inside_a_sentence_is_a_question() {
        assert_eq!(
            parse_mention("<@U0BOT> how do I configure the webhook?"),
            MentionCommand::Question("how do I configure the webhook?".to_owned())
        );
    }

    #[test]
    fn bare_mention_is_empty() {
        assert_eq!(parse_mention("<@U0BOT>"), MentionCommand::Empty);
    }

    #[test]
    fn mention_detection_requires_exact_user() {
        assert!(mentions_user("hi <@U0BOT>", "U0BOT"));
        assert!(!mentions_user("hi <@U0OTHER>", "U0BOT"));
        assert!(!mentions_user("hi <@>", ""));
    }

    #[test]
    fn parses_full_modal_submission() {
        let values = state(json!({
            "docs_urls": {"docs_urls_input": {"type": "plain_text_input",
                "value": "https://docs.example.com/guide\n\n  https://docs.example.com/api  "}},
            "github_operator": {"github_operator_input": {"value": "https://github.com/acme/operator"}},
            "github_operand": {"github_operand_input": {"value": null}},
            "github_issues": {"github_issues_checkbox": {"selected_options": [{"value": "include_issues"}]}},
            "slack_history_days": {"slack_history_select": {"selected_option": {"value": "90"}}}
        }));

        let submission = ConfigSubmission::from_view_state("C42", "U1", &values).expect("parse");

        assert_eq!(submission.docs_urls.len(), 2);
        assert_eq!(submission.operand_repo, None);
        assert!(submission.include_issues);
        assert_eq!(submission.history_days, 90);

        let types: Vec<SourceType> = submission
            .descriptors()
            .expect("descriptors")
            .iter()
            .map(SourceDescriptor::source_type)
            .collect();
        assert_eq!(
            types,
            vec![
                SourceType::Documentation,
                SourceType::Documentation,
                SourceType::GithubOperator,
                SourceType::GithubIssues,
                SourceType::SlackHistory,
            ]
        );
    }

    #[test]
    fn empty_modal_defaults_to_thirty_days_of_history() {
        let submission =
            ConfigSubmission::from_view_state("C42", "U1", &ViewState::new()).expect("parse");
        assert_eq!(submission.history_days, 30);

        let descriptors = submission.descriptors().expect("descriptors");
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].locator(), "slack://C42?days=30");
    }

    #[test]
    fn issues_without_operator_repo_add_nothing() {
        let values = state(json!({
            "github_issues": {"github_issues_checkbox": {"selected_options": [{"value": "include_issues"}]}},
            "slack_history_days": {"slack_history_select": {"selected_option": {"value": "0"}}}
        }));

        let submission = ConfigSubmission::from_view_state("C42", "U1", &values).expect("parse");
        assert!(submission.descriptors().expect("descriptors").is_empty());
    }

    #[test]
    fn invalid_repository_url_is_rejected() {
        let values = state(json!({
            "github_operand": {"github_operand_input": {"value": "not a url"}}
        }));

        let submission = ConfigSubmission::from_view_state("C42", "U1", &values).expect("parse");
        assert!(matches!(submission.descriptors(), Err(SubmissionError::InvalidSource(_))));
    }

    #[test]
    fn missing_channel_metadata_is_rejected() {
        assert_eq!(
            ConfigSubmission::from_view_state(" ", "U1", &ViewState::new()),
            Err(SubmissionError::MissingChannel)
        );
    }
}
