use chrono::Utc;

use replier_core::domain::channel::{ChannelId, MonitoredChannel};
use replier_core::domain::workspace::{Workspace, WorkspaceId};

use super::{decode_timestamp, encode_timestamp, get, ChannelRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChannelRepository {
    pool: DbPool,
}

impl SqlChannelRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CHANNEL_COLUMNS: &str = "id, workspace_id, slack_channel_id, slack_channel_name, is_active,
                               created_at, updated_at";

fn row_to_workspace(row: &sqlx::sqlite::SqliteRow) -> Result<Workspace, RepositoryError> {
    let installed_at: String = get(row, "installed_at")?;
    Ok(Workspace {
        id: WorkspaceId(get(row, "id")?),
        slack_team_id: get(row, "slack_team_id")?,
        slack_team_name: get(row, "slack_team_name")?,
        installed_at: decode_timestamp("installed_at", &installed_at)?,
    })
}

fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> Result<MonitoredChannel, RepositoryError> {
    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;
    Ok(MonitoredChannel {
        id: ChannelId(get(row, "id")?),
        workspace_id: WorkspaceId(get(row, "workspace_id")?),
        slack_channel_id: get(row, "slack_channel_id")?,
        slack_channel_name: get(row, "slack_channel_name")?,
        is_active: get::<i64>(row, "is_active")? != 0,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ChannelRepository for SqlChannelRepository {
    async fn ensure_workspace(
        &self,
        slack_team_id: &str,
        slack_team_name: Option<&str>,
    ) -> Result<Workspace, RepositoryError> {
        let candidate = Workspace::new(slack_team_id, slack_team_name.map(str::to_owned));
        sqlx::query(
            "INSERT INTO workspaces (id, slack_team_id, slack_team_name, installed_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(slack_team_id) DO UPDATE SET
                 slack_team_name = COALESCE(excluded.slack_team_name, workspaces.slack_team_name)",
        )
        .bind(&candidate.id.0)
        .bind(&candidate.slack_team_id)
        .bind(&candidate.slack_team_name)
        .bind(encode_timestamp(&candidate.installed_at))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, slack_team_id, slack_team_name, installed_at
             FROM workspaces WHERE slack_team_id = ?",
        )
        .bind(slack_team_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_workspace(&row)
    }

    async fn ensure_channel(
        &self,
        workspace_id: &WorkspaceId,
        slack_channel_id: &str,
        slack_channel_name: Option<&str>,
    ) -> Result<MonitoredChannel, RepositoryError> {
        let candidate = MonitoredChannel::new(
            workspace_id.clone(),
            slack_channel_id,
            slack_channel_name.map(str::to_owned),
        );
        sqlx::query(
            "INSERT INTO monitored_channels (id, workspace_id, slack_channel_id, slack_channel_name,
                                             is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(workspace_id, slack_channel_id) DO UPDATE SET
                 slack_channel_name = COALESCE(excluded.slack_channel_name,
                                               monitored_channels.slack_channel_name),
                 is_active = 1,
                 updated_at = excluded.updated_at",
        )
        .bind(&candidate.id.0)
        .bind(&workspace_id.0)
        .bind(&candidate.slack_channel_id)
        .bind(&candidate.slack_channel_name)
        .bind(encode_timestamp(&candidate.created_at))
        .bind(encode_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM monitored_channels
             WHERE workspace_id = ? AND slack_channel_id = ?"
        ))
        .bind(&workspace_id.0)
        .bind(slack_channel_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_channel(&row)
    }

    async fn find_channel_by_slack_id(
        &self,
        slack_channel_id: &str,
    ) -> Result<Option<MonitoredChannel>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM monitored_channels
             WHERE slack_channel_id = ? AND is_active = 1
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(slack_channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_channel).transpose()
    }

    async fn list_channels(&self) -> Result<Vec<MonitoredChannel>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM monitored_channels ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_channel).collect()
    }
}
