// ============================================================================
// kronk-mem — inspect and drive Kronk's long-term memory
// ============================================================================
// Usage:
//   kronk-mem stats                                  Show memory statistics
//   kronk-mem conversations [--limit N] [--channel]  List stored exchanges
//   kronk-mem summary <USER>                         Print a user's summary
//   kronk-mem recall <QUERY> [-k N] [--channel]      Run a similarity query
//   kronk-mem export                                 Dump everything as JSON
//   kronk-mem ask --user U --channel C <MESSAGE>     One full message cycle
// ============================================================================

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use kronk_core::{ChatMessage, MemoryConfig, MemoryManager, OllamaChat, UpdateOutcome};
use tracing::info;

const SYSTEM_PROMPT: &str = "You are a helpful yet bitchy Discord bot assistant. \
Your name is Kronk, so you should introduce yourself as such. \
Be concise, useful and not biased in your responses.";

/// Kronk memory inspection tool
#[derive(Parser)]
#[command(name = "kronk-mem", version, about = "Inspect and drive Kronk's long-term memory")]
struct Cli {
    /// Memory directory (default: KRONK_MEMORY_DIR or ~/.kronk/memory)
    #[arg(long, global = true)]
    memory_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show counts, embedding dimension and the resolved directory
    Stats,

    /// List stored conversations, newest first
    Conversations {
        /// Maximum number of rows to print
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only show this channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Print the stored summary for a user
    Summary {
        user: String,
    },

    /// Rank stored conversations against a query
    Recall {
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "3")]
        k: usize,

        /// Restrict to one channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Export summaries and conversations as JSON
    Export,

    /// Answer a message with memory context, then record it
    Ask {
        #[arg(long)]
        user: String,

        #[arg(long, default_value = "cli")]
        channel: String,

        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kronk_core=info".parse()?)
                .add_directive("kronk_mem=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = MemoryConfig::from_env();
    if let Some(dir) = cli.memory_dir {
        config.memory_dir = dir.into();
    }

    let memory = MemoryManager::from_config(config.clone()).await?;

    let result = match cli.command {
        Commands::Stats => cmd_stats(&memory).await,
        Commands::Conversations { limit, channel } => {
            cmd_conversations(&memory, limit, channel.as_deref()).await
        }
        Commands::Summary { user } => cmd_summary(&memory, &user).await,
        Commands::Recall { query, k, channel } => {
            cmd_recall(&memory, &query, k, channel.as_deref()).await
        }
        Commands::Export => cmd_export(&memory).await,
        Commands::Ask {
            user,
            channel,
            message,
        } => cmd_ask(&memory, &config, &user, &channel, &message).await,
    };

    memory.shutdown().await;
    result
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut short: String = flat.chars().take(max.saturating_sub(1)).collect();
    short.push('…');
    short
}

async fn cmd_stats(memory: &MemoryManager) -> Result<()> {
    let stats = memory.stats().await;

    println!("=== Kronk Memory Stats ===");
    if !stats.enabled {
        println!("Memory is disabled (do_memory = false)");
        return Ok(());
    }
    if let Some(dir) = &stats.memory_dir {
        println!("Directory: {}", dir.display());
    }
    println!();
    println!("User summaries: {}", stats.user_summaries);
    println!(
        "Conversations:  {} / {} ({} with embeddings)",
        stats.conversations, stats.max_stored_conversations, stats.embedded_conversations
    );
    match stats.embedding_dim {
        Some(dim) => println!("Embedding dim:  {}", dim),
        None => println!("Embedding dim:  -"),
    }

    Ok(())
}

async fn cmd_conversations(memory: &MemoryManager, limit: usize, channel: Option<&str>) -> Result<()> {
    let records: Vec<_> = memory
        .conversations()
        .await
        .into_iter()
        .rev()
        .filter(|r| channel.map_or(true, |c| r.channel_id == c))
        .take(limit)
        .collect();

    if records.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    println!(
        "{:<23}  {:<18}  {:<18}  {:<3}  {}",
        "TIMESTAMP", "CHANNEL", "AUTHOR", "VEC", "PROMPT"
    );
    println!("{}", "-".repeat(100));

    for record in &records {
        println!(
            "{:<23}  {:<18}  {:<18}  {:<3}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            truncate(&record.channel_id, 18),
            truncate(&record.author_id, 18),
            if record.has_embedding() { "yes" } else { "no" },
            truncate(&record.prompt_text, 40)
        );
    }

    println!("\nShown: {} conversations", records.len());
    Ok(())
}

async fn cmd_summary(memory: &MemoryManager, user: &str) -> Result<()> {
    match memory.user_summary(user).await {
        Some(summary) => println!("{}", summary),
        None => println!("No summary stored for {}", user),
    }
    Ok(())
}

async fn cmd_recall(memory: &MemoryManager, query: &str, k: usize, channel: Option<&str>) -> Result<()> {
    let results = memory.recall_scored(query, k, channel).await;

    if results.is_empty() {
        println!("Nothing relevant remembered.");
        return Ok(());
    }

    for (rank, scored) in results.iter().enumerate() {
        println!(
            "#{} similarity {:.3}  [{}] {}",
            rank + 1,
            scored.similarity,
            scored.record.channel_id,
            scored.record.timestamp.format("%Y-%m-%d %H:%M")
        );
        println!("{}", scored.record.document());
        println!();
    }
    Ok(())
}

async fn cmd_export(memory: &MemoryManager) -> Result<()> {
    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": memory.stats().await,
        "user_summaries": memory.summaries().await,
        "conversations": memory.conversations().await,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

async fn cmd_ask(
    memory: &MemoryManager,
    config: &MemoryConfig,
    user: &str,
    channel: &str,
    message: &str,
) -> Result<()> {
    let chat = OllamaChat::from_config(config);

    let mut system = SYSTEM_PROMPT.to_string();
    if let Some(context) = memory.build_context(user, message, Some(channel)).await {
        info!("Adding {} chars of memory context", context.len());
        system.push_str("\n\n");
        system.push_str(&context);
    }

    let messages = [
        ChatMessage::system(system),
        ChatMessage::user(format!("{}: {}", user, message)),
    ];
    let reply = chat.chat(&messages).await?;
    println!("{}", reply);

    memory.record_exchange(channel, user, message, &reply).await;
    if let UpdateOutcome::Updated(summary) = memory.maybe_update_summary(user, message).await {
        info!("Updated summary for {}: {}", user, summary.summary_text);
    }

    Ok(())
}
