//! salon-assist - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use salon_assist::cli::{Args, Commands};
use salon_assist::email::{EmailSender, HttpEmailClient, NoopEmailSender};
use salon_assist::embedding::{EmbeddingProvider, HttpEmbeddingClient};
use salon_assist::escalation::{FileLedger, LedgerStore};
use salon_assist::knowledge::{KnowledgeStore, MemoryKnowledgeStore, QdrantKnowledgeStore};
use salon_assist::llm::HttpLlmClient;
use salon_assist::pipeline::{PipelineConfig, QueryPipeline};
use salon_assist::session::SessionStore;
use salon_assist::supervisor::SupervisorService;
use salon_assist::telemetry::AssistCollector;
use salon_assist::types::HelpRequestStatus;
use salon_assist::Config;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct SeedEntry {
    question: String,
    answer: String,
}

struct App {
    pipeline: QueryPipeline,
    supervisor: SupervisorService,
    ledger: Arc<dyn LedgerStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    sessions: Arc<SessionStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    telemetry: AssistCollector,
    config: Config,
}

async fn build_app(config: Config) -> Result<App> {
    let timeout = Duration::from_secs(config.providers.request_timeout_secs);

    let llm = Arc::new(HttpLlmClient::new(
        &config.providers.llm_url,
        &config.providers.llm_model,
        timeout,
    )?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        HttpEmbeddingClient::new(
            &config.providers.llm_url,
            &config.providers.embedding_model,
            timeout,
        )?
        .with_retry_policy(config.retrieval.embed_retries, config.retrieval.embed_backoff_ms),
    );

    let knowledge: Arc<dyn KnowledgeStore> = match &config.providers.qdrant_url {
        Some(url) => Arc::new(
            QdrantKnowledgeStore::connect(
                url,
                "knowledge_base",
                salon_assist::knowledge::DEFAULT_EMBEDDING_DIM,
            )
            .await
            .context("Failed to connect to Qdrant")?,
        ),
        None => Arc::new(MemoryKnowledgeStore::new()),
    };

    let ledger: Arc<dyn LedgerStore> =
        Arc::new(FileLedger::open(config.ledger_dir()?).context("Failed to open ledger")?);

    let email: Arc<dyn EmailSender> = match (
        &config.email.endpoint,
        &config.email.api_key,
        &config.email.from_address,
    ) {
        (Some(endpoint), Some(key), Some(from)) => {
            Arc::new(HttpEmailClient::new(endpoint, key, from))
        }
        _ => Arc::new(NoopEmailSender),
    };

    let sessions = Arc::new(SessionStore::new(
        config.sessions.max_turns,
        config.sessions.ttl_mins,
    ));
    let telemetry = AssistCollector::new();

    let pipeline = QueryPipeline::new(
        llm,
        Arc::clone(&embedder),
        Arc::clone(&knowledge),
        Arc::clone(&ledger),
        Arc::clone(&sessions),
        telemetry.clone(),
        PipelineConfig {
            similarity_threshold: config.retrieval.similarity_threshold,
            top_k: config.retrieval.top_k,
        },
    );

    let supervisor = SupervisorService::new(
        Arc::clone(&ledger),
        Arc::clone(&knowledge),
        Arc::clone(&embedder),
        email,
        telemetry.clone(),
    );

    Ok(App {
        pipeline,
        supervisor,
        ledger,
        knowledge,
        sessions,
        embedder,
        telemetry,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    let app = build_app(config).await?;

    match args.command {
        Commands::Ask {
            text,
            participant,
            room,
        } => {
            let result = app.pipeline.resolve_query(&text, &participant, &room).await;
            println!("{}", result.answer.cyan());
            if let Some(id) = result.help_request_id {
                println!("{} {}", "help request:".dimmed(), id);
            }
        }

        Commands::Seed { file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let entries: Vec<SeedEntry> =
                serde_json::from_str(&json).context("Seed file must be a JSON array")?;

            let mut loaded = 0;
            let mut skipped = 0;
            for entry in &entries {
                let embedding = match app.embedder.embed(&entry.question).await {
                    Ok(vector) => vector,
                    Err(e) => {
                        eprintln!(
                            "{} skipping {:?}: {}",
                            "warning:".yellow(),
                            entry.question,
                            e
                        );
                        skipped += 1;
                        continue;
                    }
                };
                app.knowledge
                    .insert(&entry.question, &entry.answer, embedding, None)
                    .await?;
                loaded += 1;
            }
            println!("{} {} entries loaded, {} skipped", "✓".green(), loaded, skipped);
        }

        Commands::Pending => {
            let pending = app.ledger.list_by_status(HelpRequestStatus::Pending).await?;
            if pending.is_empty() {
                println!("{}", "No pending help requests".dimmed());
            }
            for request in pending {
                println!(
                    "{}  {}  {}",
                    request.id.to_string().yellow(),
                    request.created_at.format("%Y-%m-%d %H:%M"),
                    request.question
                );
            }
        }

        Commands::Answer { id, answer } => {
            let resolved = app.supervisor.answer_help_request(id, &answer).await?;
            println!(
                "{} request {} is now {}",
                "✓".green(),
                resolved.id,
                resolved.status.as_str().bold()
            );
        }

        Commands::Trail { id } => {
            let trail = app.ledger.audit_trail(id).await?;
            if trail.is_empty() {
                println!("{}", "No supervisor responses recorded".dimmed());
            }
            for response in trail {
                println!(
                    "{}  {}",
                    response
                        .recorded_at
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                        .dimmed(),
                    response.answer
                );
            }
        }

        Commands::Sweep => {
            // Sessions that went idle mid-escalation close their request first
            let mut closed = 0;
            for session in app.sessions.evict_expired().await {
                if let Some(request_id) = session.awaiting_email_for {
                    match app.ledger.close_conversation(request_id).await {
                        Ok(_) => closed += 1,
                        Err(e) => tracing::warn!(id = %request_id, error = %e, "close skipped"),
                    }
                }
            }

            let window = chrono::Duration::minutes(app.config.escalation.pending_timeout_mins);
            let expired = app.ledger.sweep_timeouts(window).await?;
            println!(
                "{} {} requests expired, {} closed with their conversation",
                "✓".green(),
                expired.len(),
                closed
            );
        }

        Commands::Stats => {
            let stats = app.telemetry.get_stats();
            println!("Queries received:   {}", stats.queries_received);
            println!("Out of scope:       {}", stats.out_of_scope);
            println!("Booking intents:    {}", stats.booking_detected);
            println!("Knowledge hits:     {}", stats.knowledge_hits);
            println!("Knowledge misses:   {}", stats.knowledge_misses);
            println!("Escalations:        {}", stats.escalations);
            println!("Supervisor answers: {}", stats.supervisor_answers);
            println!("Entries learned:    {}", stats.entries_learned);
            println!(
                "Emails sent:        {}/{}",
                stats.emails_sent, stats.emails_attempted
            );
        }
    }

    Ok(())
}
