use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datachat::db::{init_pool, load_schema_context};
use datachat::{
    AppConfig, AskStatus, AssistantDeps, BoundedCompletionClient, DataAssistant,
    HttpCompletionClient, InMemoryMemoryStore, PgQueryExecutor, SchemaContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "datachat")]
#[command(about = "Ask questions about a PostgreSQL database in natural language")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Override AGENT_MAX_ATTEMPTS
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Plan a chart for every answer
    #[arg(long, global = true)]
    always_chart: bool,

    /// Override SCHEMA_CONTEXT_PATH
    #[arg(long, global = true)]
    schema_context: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question with SQL
    Ask {
        question: String,

        /// Session id (a new one is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Extract order fields from a free-text order
    Extract {
        text: Option<String>,

        /// Read the order text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show the schema context, or one table of it
    Schema { table: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(max_attempts) = args.max_attempts {
        config.agent.max_attempts = max_attempts;
    }
    config.agent.always_chart |= args.always_chart;
    if args.schema_context.is_some() {
        config.schema_context_path = args.schema_context.clone();
    }
    config.agent.validate()?;

    info!("datachat starting ({} via {})", config.llm.model, config.llm.provider);

    let pool = init_pool(&config.database_url, 10)
        .await
        .context("connecting to PostgreSQL")?;

    let mut schema = load_schema_context(&pool, config.agent.prompt_sample_rows).await?;
    if let Some(path) = &config.schema_context_path {
        let overlay = SchemaContext::load(path)
            .with_context(|| format!("loading schema context {}", path.display()))?;
        schema.merge_descriptions(overlay);
    }
    let schema = Arc::new(schema);

    if let Command::Schema { table } = &args.command {
        match table {
            Some(name) => match schema.describe(name) {
                Some(context) => println!("{}", serde_json::to_string_pretty(context)?),
                None => anyhow::bail!(
                    "table '{}' not found (known tables: {})",
                    name,
                    schema.table_names().join(", ")
                ),
            },
            None => println!("{}", schema.render_for_prompt(config.agent.prompt_sample_rows)),
        }
        return Ok(());
    }

    let http = HttpCompletionClient::from_config(&config.llm, config.agent.completion_timeout)?;
    let completion = Arc::new(BoundedCompletionClient::new(
        Arc::new(http),
        config.agent.max_concurrent_completions,
    ));
    let executor = Arc::new(PgQueryExecutor::new(
        pool,
        config.agent.query_timeout,
        config.agent.row_limit,
    ));

    let assistant = DataAssistant::new(
        AssistantDeps {
            schema,
            completion,
            executor,
            memory: Arc::new(InMemoryMemoryStore::new()),
            completion_config: config.llm.completion_config(),
        },
        config.agent.clone(),
    );

    match args.command {
        Command::Ask { question, session } => {
            let session = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            let response = assistant.ask(&question, &session).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.status == AskStatus::Failed {
                error!("Question failed after {} attempt(s)", response.attempts);
                std::process::exit(1);
            }
        }
        Command::Extract { text, file } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("give the order text or --file"),
            };
            let session = Uuid::new_v4().to_string();
            let draft = assistant.extract(&text, &session).await?;
            println!("{}", serde_json::to_string_pretty(&draft)?);
            if let Some(question) = &draft.follow_up {
                info!("{}", question);
            }
        }
        Command::Schema { .. } => {}
    }

    Ok(())
}
