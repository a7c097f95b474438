use std::env;
use std::sync::{Mutex, OnceLock};

use replier_cli::commands::{ask, doctor, migrate, reindex, sources};
use replier_core::{KnowledgeSource, SourceDescriptor};
use replier_db::repositories::{SqlChannelRepository, SqlSourceRepository};
use replier_db::{connect_with_settings, migrations, ChannelRepository, SourceRepository};
use serde_json::Value;
use tempfile::TempDir;

const CHANNEL: &str = "C0FORUM";

fn valid_env(database_url: &str) -> Vec<(&'static str, String)> {
    vec![
        ("REPLIER_SLACK_APP_TOKEN", "xapp-test".to_owned()),
        ("REPLIER_SLACK_BOT_TOKEN", "xoxb-test".to_owned()),
        ("REPLIER_LLM_PROVIDER", "anthropic".to_owned()),
        ("REPLIER_LLM_API_KEY", "sk-ant-test".to_owned()),
        ("REPLIER_DATABASE_URL", database_url.to_owned()),
    ]
}

fn temp_database() -> (TempDir, String) {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("replier.db").display());
    (dir, url)
}

/// Stores a channel with one documentation source pointing at `docs_url`.
fn seed_channel(database_url: &str, docs_url: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(database_url, 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let channels = SqlChannelRepository::new(pool.clone());
        let workspace = channels.ensure_workspace("T0TEAM", Some("Acme")).await.expect("workspace");
        let channel =
            channels.ensure_channel(&workspace.id, CHANNEL, Some("operator-help")).await.expect("channel");
        let descriptor = SourceDescriptor::documentation(docs_url).expect("descriptor");
        SqlSourceRepository::new(pool.clone())
            .replace_for_channel(&channel.id, vec![KnowledgeSource::pending(channel.id.clone(), &descriptor)])
            .await
            .expect("sources");
        pool.close().await;
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    let (_dir, url) = temp_database();
    with_env(&valid_env(&url), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_tokens() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn sources_reports_unknown_channel() {
    let (_dir, url) = temp_database();
    with_env(&valid_env(&url), || {
        let result = sources::run("C0MISSING");
        assert_eq!(result.exit_code, 7);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "sources");
        assert_eq!(payload["error_class"], "channel_not_found");
    });
}

#[test]
fn sources_lists_pending_source_of_configured_channel() {
    let (_dir, url) = temp_database();
    seed_channel(&url, "https://docs.example.com/operator");
    with_env(&valid_env(&url), || {
        let result = sources::run(CHANNEL);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().expect("message");
        assert!(message.starts_with("1 source(s) for operator-help, 0 indexed, indexing pending"));
        assert!(message.contains("pending documentation https://docs.example.com/operator chunks=0"));
    });
}

#[test]
fn reindex_marks_unreachable_docs_as_failed() {
    let (_dir, url) = temp_database();
    seed_channel(&url, "http://127.0.0.1:9/docs");
    with_env(&valid_env(&url), || {
        let result = reindex::run(CHANNEL);
        assert_eq!(result.exit_code, 0);
        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().expect("message");
        assert!(message.starts_with("reindexed 0/1 source(s)"));
        assert!(message.contains("failed http://127.0.0.1:9/docs"));

        let listed = parse_payload(&sources::run(CHANNEL).output);
        assert!(listed["message"].as_str().expect("message").contains("failed documentation"));
    });
}

#[test]
fn ask_without_indexed_knowledge_returns_low_confidence_hint() {
    let (_dir, url) = temp_database();
    seed_channel(&url, "https://docs.example.com/operator");
    with_env(&valid_env(&url), || {
        let result = ask::run(CHANNEL, "How do I install the operator?");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        let message = payload["message"].as_str().expect("message");
        assert!(message.starts_with("[low] I don't have any knowledge indexed yet"));
    });
}

#[test]
fn doctor_json_passes_after_migration() {
    let (_dir, url) = temp_database();
    with_env(&valid_env(&url), || {
        assert_eq!(migrate::run().exit_code, 0);

        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(report["overall_status"], "pass");
        let names: Vec<&str> =
            report["checks"].as_array().expect("checks").iter().filter_map(|check| check["name"].as_str()).collect();
        assert!(names.contains(&"knowledge_store"));
    });
}

#[test]
fn doctor_reports_discovered_vertex_credentials() {
    let (dir, url) = temp_database();
    let credentials = dir.path().join("adc.json");
    std::fs::write(
        &credentials,
        r#"{"type":"authorized_user","client_id":"c","client_secret":"s","refresh_token":"r"}"#,
    )
    .expect("credentials file");

    let mut vars = valid_env(&url);
    vars.retain(|(key, _)| !key.starts_with("REPLIER_LLM_"));
    vars.push(("REPLIER_LLM_PROVIDER", "vertex".to_owned()));
    vars.push(("REPLIER_LLM_PROJECT", "acme-project".to_owned()));
    vars.push(("REPLIER_LLM_REGION", "us-east5".to_owned()));
    vars.push(("GOOGLE_APPLICATION_CREDENTIALS", credentials.display().to_string()));

    with_env(&vars, || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        let llm = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .find(|check| check["name"] == "llm_credentials")
            .expect("llm check");
        assert_eq!(llm["status"], "pass");
        assert!(llm["details"].as_str().expect("details").ends_with("authorized_user credentials"));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["name"], "config_validation");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be JSON")
}

fn with_env(vars: &[(&str, String)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "REPLIER_DATABASE_URL",
        "REPLIER_SLACK_APP_TOKEN",
        "REPLIER_SLACK_BOT_TOKEN",
        "REPLIER_LLM_PROVIDER",
        "REPLIER_LLM_API_KEY",
        "REPLIER_LLM_PROJECT",
        "REPLIER_LLM_REGION",
        "REPLIER_LLM_ACCESS_TOKEN",
        "REPLIER_LLM_CREDENTIALS_FILE",
        "GOOGLE_APPLICATION_CREDENTIALS",
        "REPLIER_EMBEDDING_PROVIDER",
        "REPLIER_LOGGING_LEVEL",
        "REPLIER_LOG_LEVEL",
        "GOOGLE_CLOUD_PROJECT",
        "GOOGLE_CLOUD_REGION",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(test_fn));

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}
