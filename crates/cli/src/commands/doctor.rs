use replier_agent::GoogleCredentials;
use replier_core::config::{AppConfig, EmbeddingProvider, LlmProvider, LoadOptions};
use replier_db::{connect_with_config, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks = vec![
                DoctorCheck::pass("config_validation", "configuration loaded and validated"),
                DoctorCheck::pass(
                    "slack_token_readiness",
                    "app token (xapp-) and bot token (xoxb-) present",
                ),
                check_llm(&config),
                check_embedding(&config),
            ];
            checks.extend(check_store(&config));
            checks
        }
        Err(error) => vec![
            DoctorCheck::fail("config_validation", error.to_string()),
            DoctorCheck::skipped("slack_token_readiness"),
            DoctorCheck::skipped("llm_credentials"),
            DoctorCheck::skipped("embedding_provider"),
            DoctorCheck::skipped("database_connectivity"),
            DoctorCheck::skipped("knowledge_store"),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    DoctorReport {
        overall_status: if all_pass { CheckStatus::Pass } else { CheckStatus::Fail },
        summary: if all_pass {
            "doctor: all readiness checks passed".to_owned()
        } else {
            "doctor: one or more readiness checks failed".to_owned()
        },
        checks,
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match config.llm.provider {
        LlmProvider::Anthropic => DoctorCheck::pass(
            "llm_credentials",
            format!("anthropic api key set, model `{}`", config.llm.model),
        ),
        LlmProvider::Vertex => {
            let credentials = if config.llm.access_token.is_some() {
                "fixed access token".to_owned()
            } else {
                match GoogleCredentials::discover(config.llm.credentials_file.as_deref()) {
                    Ok(credentials) => format!("{} credentials", credentials.kind()),
                    Err(error) => return DoctorCheck::fail("llm_credentials", error.to_string()),
                }
            };
            DoctorCheck::pass(
                "llm_credentials",
                format!(
                    "vertex project `{}` in `{}`, model `{}`, {credentials}",
                    config.llm.project.as_deref().unwrap_or("?"),
                    config.llm.region.as_deref().unwrap_or("?"),
                    config.llm.model
                ),
            )
        }
    }
}

fn check_embedding(config: &AppConfig) -> DoctorCheck {
    match config.embedding.provider {
        EmbeddingProvider::Hashing => DoctorCheck::pass(
            "embedding_provider",
            format!("local hashing embedder, {} dims", config.embedding.dims),
        ),
        EmbeddingProvider::OpenAi if config.embedding.api_key.is_none() => {
            DoctorCheck::fail("embedding_provider", "openai embeddings need embedding.api_key")
        }
        EmbeddingProvider::OpenAi => DoctorCheck::pass(
            "embedding_provider",
            format!("openai `{}`, {} dims", config.embedding.model, config.embedding.dims),
        ),
    }
}

fn check_store(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            )];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::fail("knowledge_store", "database unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            check_schema(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let counts: Result<(i64, i64), sqlx::Error> = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM monitored_channels), (SELECT COUNT(*) FROM knowledge_chunks)",
    )
    .fetch_one(pool)
    .await;
    match counts {
        Ok((channels, chunks)) => DoctorCheck::pass(
            "knowledge_store",
            format!("{channels} channel(s), {chunks} chunk(s) indexed"),
        ),
        Err(_) => DoctorCheck::fail("knowledge_store", "schema missing; run `replier migrate`"),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
