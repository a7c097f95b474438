use serde::Serialize;

pub const OPEN_CONFIG_ACTION_ID: &str = "open_config_modal";
pub const CONFIG_MODAL_CALLBACK_ID: &str = "config_modal";

pub const DOCS_BLOCK_ID: &str = "docs_urls";
pub const DOCS_ACTION_ID: &str = "docs_urls_input";
pub const OPERATOR_BLOCK_ID: &str = "github_operator";
pub const OPERATOR_ACTION_ID: &str = "github_operator_input";
pub const OPERAND_BLOCK_ID: &str = "github_operand";
pub const OPERAND_ACTION_ID: &str = "github_operand_input";
pub const ISSUES_BLOCK_ID: &str = "github_issues";
pub const ISSUES_ACTION_ID: &str = "github_issues_checkbox";
pub const ISSUES_OPTION_VALUE: &str = "include_issues";
pub const HISTORY_BLOCK_ID: &str = "slack_history_days";
pub const HISTORY_ACTION_ID: &str = "slack_history_select";

/// Slack rejects section text longer than this.
const SECTION_TEXT_LIMIT: usize = 3_000;
const MAX_LISTED_SOURCES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionObject {
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<TextObject>,
    pub value: String,
}

impl OptionObject {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { text: TextObject::plain(label), description: None, value: value.into() }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(TextObject::plain(description));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputElement {
    PlainTextInput {
        action_id: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        multiline: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<TextObject>,
    },
    Checkboxes {
        action_id: String,
        options: Vec<OptionObject>,
    },
    StaticSelect {
        action_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder: Option<TextObject>,
        options: Vec<OptionObject>,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_option: Option<OptionObject>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        block_id: String,
        text: TextObject,
    },
    Header {
        block_id: String,
        text: TextObject,
    },
    Divider,
    Actions {
        block_id: String,
        elements: Vec<ButtonElement>,
    },
    Context {
        block_id: String,
        elements: Vec<TextObject>,
    },
    Input {
        block_id: String,
        label: TextObject,
        element: InputElement,
        optional: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<TextObject>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    /// A message with no blocks; Slack renders `fallback_text` as mrkdwn.
    pub fn text(text: impl Into<String>) -> Self {
        Self { fallback_text: text.into(), blocks: Vec::new() }
    }
}

/// A message addressed to a channel, optionally inside a thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub message: MessageTemplate,
}

impl OutboundMessage {
    pub fn to_channel(channel_id: impl Into<String>, message: MessageTemplate) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: None, message }
    }

    pub fn in_thread(
        channel_id: impl Into<String>,
        thread_ts: impl Into<String>,
        message: MessageTemplate,
    ) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: Some(thread_ts.into()), message }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Modal,
    Home,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct View {
    #[serde(rename = "type")]
    pub kind: ViewKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<TextObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit: Option<TextObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<TextObject>,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn header(mut self, block_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Header { block_id: block_id.into(), text: TextObject::plain(text) });
        self
    }

    pub fn divider(mut self) -> Self {
        self.blocks.push(Block::Divider);
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn input(
        mut self,
        block_id: impl Into<String>,
        label: impl Into<String>,
        element: InputElement,
    ) -> Self {
        self.blocks.push(Block::Input {
            block_id: block_id.into(),
            label: TextObject::plain(label),
            element,
            optional: true,
            hint: None,
        });
        self
    }

    /// Attaches a hint to the most recently added input block.
    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        if let Some(Block::Input { hint: slot, .. }) = self.blocks.last_mut() {
            *slot = Some(TextObject::plain(hint));
        }
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Posted when someone mentions the bot with `configure`, or when the bot joins
/// a channel that has no sources yet.
pub fn configure_prompt(channel_id: &str, intro: &str) -> MessageTemplate {
    MessageBuilder::new(intro.to_owned())
        .section("replier.configure.intro.v1", |section| {
            section.mrkdwn(intro);
        })
        .actions("replier.configure.actions.v1", |actions| {
            actions.button(
                ButtonElement::new(OPEN_CONFIG_ACTION_ID, "⚙️ Configure")
                    .style(ButtonStyle::Primary)
                    .value(channel_id),
            );
        })
        .build()
}

pub fn not_configured_message() -> MessageTemplate {
    MessageTemplate::text(
        "Hi! I'm not configured for this channel yet.\n\
         Mention me with `configure` to set up my knowledge sources!",
    )
}

pub fn usage_message() -> MessageTemplate {
    MessageTemplate::text(
        "Ask me a question after the mention, or mention me with `configure` to change my knowledge sources.",
    )
}

pub fn could_not_answer_message(reason: &str) -> MessageTemplate {
    let reason: String = reason.chars().take(100).collect();
    MessageTemplate::text(format!(
        "😅 Sorry, I couldn't find a good answer. Something went wrong: {reason}\n\n\
         A human should take a look at this!"
    ))
}

pub fn configuration_saved_message(source_count: usize) -> MessageTemplate {
    MessageTemplate::text(format!(
        "✅ Configuration saved! Indexing {source_count} knowledge source(s)...\n\
         This may take a few minutes. I'll let you know when I'm ready!"
    ))
}

pub fn configuration_failed_message(reason: &str) -> MessageTemplate {
    let reason: String = reason.chars().take(100).collect();
    MessageTemplate::text(format!("❌ Error saving configuration: {reason}"))
}

/// The threaded reply to a question: the answer plus up to three source links.
pub fn answer_message(answer: &str, sources: &[String]) -> MessageTemplate {
    let mut text = answer.trim().to_owned();
    let listed: Vec<&String> = sources.iter().take(MAX_LISTED_SOURCES).collect();
    if !listed.is_empty() {
        let lines: Vec<String> = listed.iter().map(|source| format!("• {source}")).collect();
        text.push_str("\n\n_Sources:_\n");
        text.push_str(&lines.join("\n"));
    }

    let section_text = truncate_chars(&text, SECTION_TEXT_LIMIT);
    MessageBuilder::new(text)
        .section("replier.answer.body.v1", |section| {
            section.mrkdwn(section_text);
        })
        .context("replier.answer.feedback.v1", |context| {
            context.mrkdwn("React with 👍 or 👎 to tell me how I did.");
        })
        .build()
}

/// Posted when an indexing run for the channel finishes.
pub fn indexing_summary_message(indexed: usize, failures: &[(String, String)]) -> MessageTemplate {
    if failures.is_empty() {
        return MessageTemplate::text(format!(
            "✅ Ready! Indexed {indexed} knowledge source(s). Ask me anything!"
        ));
    }

    let mut text = format!(
        "⚠️ Indexing done. {indexed} succeeded, {} failed. I'll do my best with what I have!",
        failures.len()
    );
    for (source, reason) in failures {
        let reason: String = reason.chars().take(200).collect();
        text.push_str(&format!("\n• {source}: {reason}"));
    }
    MessageTemplate::text(text)
}

fn history_option(days: u32) -> OptionObject {
    match days {
        0 => OptionObject::new("Don't index", "0"),
        days => OptionObject::new(format!("Last {days} days"), days.to_string()),
    }
}

/// The channel configuration modal. `private_metadata` carries the channel id
/// back on submission.
pub fn config_modal(channel_id: &str) -> View {
    let form = MessageBuilder::new("Configure Forum Replier")
        .section("replier.config.intro.v1", |section| {
            section.mrkdwn(
                "Set up knowledge sources for this channel. I'll use these to answer questions.",
            );
        })
        .divider()
        .header("replier.config.docs.header.v1", "📚 Documentation")
        .input(
            DOCS_BLOCK_ID,
            "Documentation URLs (one per line)",
            InputElement::PlainTextInput {
                action_id: DOCS_ACTION_ID.to_owned(),
                multiline: true,
                placeholder: Some(TextObject::plain(
                    "https://docs.example.com/guide\nhttps://docs.example.com/api",
                )),
            },
        )
        .hint("Each URL will be crawled with prefix-scoping (stays within that path)")
        .divider()
        .header("replier.config.github.header.v1", "🐙 GitHub Repositories")
        .input(
            OPERATOR_BLOCK_ID,
            "Operator Repository URL",
            InputElement::PlainTextInput {
                action_id: OPERATOR_ACTION_ID.to_owned(),
                multiline: false,
                placeholder: Some(TextObject::plain("https://github.com/org/operator-repo")),
            },
        )
        .input(
            OPERAND_BLOCK_ID,
            "Operand Repository URL (optional)",
            InputElement::PlainTextInput {
                action_id: OPERAND_ACTION_ID.to_owned(),
                multiline: false,
                placeholder: Some(TextObject::plain("https://github.com/org/operand-repo")),
            },
        )
        .input(
            ISSUES_BLOCK_ID,
            "🎫 GitHub Issues",
            InputElement::Checkboxes {
                action_id: ISSUES_ACTION_ID.to_owned(),
                options: vec![OptionObject::new("Index GitHub Issues", ISSUES_OPTION_VALUE)
                    .description("Include open & closed issues from operator repo")],
            },
        )
        .divider()
        .header("replier.config.history.header.v1", "💬 Slack History")
        .input(
            HISTORY_BLOCK_ID,
            "Index conversation history",
            InputElement::StaticSelect {
                action_id: HISTORY_ACTION_ID.to_owned(),
                placeholder: Some(TextObject::plain("Select days")),
                options: [7, 30, 90, 0].into_iter().map(history_option).collect(),
                initial_option: Some(history_option(30)),
            },
        )
        .build();

    View {
        kind: ViewKind::Modal,
        callback_id: Some(CONFIG_MODAL_CALLBACK_ID.to_owned()),
        private_metadata: Some(channel_id.to_owned()),
        title: Some(TextObject::plain("Configure Forum Replier")),
        submit: Some(TextObject::plain("Save & Index")),
        close: Some(TextObject::plain("Cancel")),
        blocks: form.blocks,
    }
}

pub fn home_view() -> View {
    let home = MessageBuilder::new("Forum Replier")
        .header("replier.home.header.v1", "👋 Welcome to Forum Replier!")
        .section("replier.home.about.v1", |section| {
            section.mrkdwn(
                "I help answer questions in your forums by referencing:\n\
                 • 📚 Documentation sites\n\
                 • 🐙 GitHub repositories\n\
                 • 💬 Channel conversation history\n\n\
                 *To get started:*\n\
                 1. Invite me to a channel: `/invite @Forum Replier`\n\
                 2. Mention me with `configure` to set up knowledge sources\n\
                 3. Ask questions and I'll help answer them!",
            );
        })
        .divider()
        .context("replier.home.tip.v1", |context| {
            context.mrkdwn("💡 Tip: React with 👍 or 👎 to help me learn!");
        })
        .build();

    View {
        kind: ViewKind::Home,
        callback_id: None,
        private_metadata: None,
        title: None,
        submit: None,
        close: None,
        blocks: home.blocks,
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let mut truncated: String = text.chars().take(limit.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
