use crate::commands::{open_store, run_with_config, CommandResult};

pub fn run() -> CommandResult {
    run_with_config("migrate", |config| async move {
        let pool = open_store(&config).await?;
        pool.close().await;
        Ok(format!("knowledge store at `{}` is up to date", config.database.url))
    })
}
