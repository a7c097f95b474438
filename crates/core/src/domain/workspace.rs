use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

/// A Slack team the bot is installed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub slack_team_id: String,
    pub slack_team_name: Option<String>,
    pub installed_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(slack_team_id: impl Into<String>, slack_team_name: Option<String>) -> Self {
        Self {
            id: WorkspaceId(Uuid::new_v4().to_string()),
            slack_team_id: slack_team_id.into(),
            slack_team_name,
            installed_at: Utc::now(),
        }
    }
}
