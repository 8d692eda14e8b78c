use std::sync::Arc;

use sched_assist::calendar::{CalendarService, InMemoryCalendar};
use sched_assist::config::AssistantConfig;
use sched_assist::llm::{ClassifierConfig, create_provider};
use sched_assist::router::MessageRouter;
use sched_assist::routes::{ApiState, api_routes};
use sched_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let http_port: u16 = std::env::var("SCHED_ASSIST_HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let mut config = AssistantConfig::default();
    if let Ok(tz) = std::env::var("SCHED_ASSIST_DEFAULT_TZ") {
        if tz.parse::<chrono_tz::Tz>().is_ok() {
            config.default_timezone = tz;
        } else {
            eprintln!("Warning: SCHED_ASSIST_DEFAULT_TZ is not a valid IANA name, using UTC");
        }
    }

    eprintln!("📅 Sched Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Message API: http://0.0.0.0:{http_port}/api/messages");

    // ── Database ────────────────────────────────────────────────────
    let db_path = std::env::var("SCHED_ASSIST_DB_PATH")
        .unwrap_or_else(|_| "./data/sched-assist.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    // ── Classifier (optional) ───────────────────────────────────────
    // Without a key, free-text classification runs on heuristics alone.
    let classifier = match std::env::var("SCHED_ASSIST_LLM_API_KEY") {
        Ok(api_key) if !api_key.is_empty() => {
            let classifier_config = ClassifierConfig {
                base_url: std::env::var("SCHED_ASSIST_LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                api_key: secrecy::SecretString::from(api_key),
                model: std::env::var("SCHED_ASSIST_LLM_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            };
            Some(create_provider(&classifier_config)?)
        }
        _ => {
            tracing::warn!("SCHED_ASSIST_LLM_API_KEY not set, classifier runs heuristic-only");
            None
        }
    };

    // ── Calendar collaborator ───────────────────────────────────────
    // In-memory until a real calendar account is connected.
    let calendar: Arc<dyn CalendarService> = Arc::new(InMemoryCalendar::new());

    let router = Arc::new(MessageRouter::new(db, calendar, classifier, config));

    let app = api_routes(ApiState { router });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    tracing::info!(port = http_port, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
