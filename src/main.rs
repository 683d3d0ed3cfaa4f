use std::sync::Arc;

use inbox_triage::classifier::{Classifier, OnnxClassifier};
use inbox_triage::config::TriageConfig;
use inbox_triage::llm::{Generator, OllamaClient};
use inbox_triage::loader::load_messages_csv;
use inbox_triage::pipeline::drafts::DraftOrchestrator;
use inbox_triage::pipeline::triage::TriagePipeline;
use inbox_triage::routes::triage_routes;
use inbox_triage::store::MessageStore;

#[tokio::main]
async fn main() -> inbox_triage::error::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = TriageConfig::from_env()?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Messages: {}", config.messages_path.display());
    eprintln!("   Classifier: {}", config.model_dir.display());
    eprintln!("   Drafts: {} @ {}", config.ollama.model, config.ollama.host);
    eprintln!(
        "   Actionable: {}",
        config
            .actionable
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!("   API: http://0.0.0.0:{}\n", config.port);

    // ── Classifier ──────────────────────────────────────────────────────
    let model_dir = config.model_dir.clone();
    let classifier: Arc<dyn Classifier> =
        Arc::new(tokio::task::spawn_blocking(move || OnnxClassifier::load(&model_dir)).await??);

    // ── Message Store ───────────────────────────────────────────────────
    let records = load_messages_csv(&config.messages_path)?;
    let store = Arc::new(MessageStore::load(records, config.actionable.clone())?);

    // ── Triage ──────────────────────────────────────────────────────────
    // A classifier failure here halts startup; no partially classified store is served.
    let report = TriagePipeline::new(Arc::clone(&classifier), Arc::clone(&store))
        .triage_all()
        .await?;
    eprintln!("   Classified {} messages", report.classified);

    // ── Drafts ──────────────────────────────────────────────────────────
    let generator: Arc<dyn Generator> = Arc::new(OllamaClient::new(&config.ollama)?);
    let drafts = Arc::new(DraftOrchestrator::new(
        Arc::clone(&store),
        generator,
        config.drafts.clone(),
    ));

    // Bulk pre-generation runs in the background; queries are served meanwhile.
    let bulk_handle = {
        let drafts = Arc::clone(&drafts);
        tokio::spawn(async move { drafts.pregenerate_all().await })
    };

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = triage_routes(Arc::clone(&drafts));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "Triage API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // ── Teardown ────────────────────────────────────────────────────────
    bulk_handle.abort();
    drop(classifier);
    tracing::info!(counts = ?store.counts(), "Classifier released, exiting");

    Ok(())
}
