use aictl_core::{BrainEntry, MemoryMessage, Store, brain, traits::Brain};
use anyhow::Result;
use clap::Subcommand;
use console::style;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum BrainCommands {
    /// Create a new brain
    Create {
        name: String,
        /// Backend: "local" (file index) or "remote" (memory service)
        #[arg(short, long, default_value = "local")]
        backend: String,
        /// Default session id (defaults to the brain name)
        #[arg(long)]
        session: Option<String>,
    },
    /// List brains
    List,
    /// Select the brain later commands default to
    Use { name: String },
    /// Delete a brain from the registry
    Delete { name: String },
    /// Session memory operations
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Collection operations
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Document operations
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Remember one conversation turn
    Add {
        content: String,
        #[arg(short, long, default_value = "user")]
        role: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    /// Print the remembered turns for a session
    Get {
        #[arg(long)]
        session: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    /// Semantic search over session memory
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        session: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    /// Forget everything in a session
    Clear {
        #[arg(long)]
        session: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CollectionCommands {
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    List {
        #[arg(short, long)]
        brain: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DocCommands {
    Add {
        collection: String,
        text: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    Search {
        collection: String,
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(short, long)]
        brain: Option<String>,
    },
    Delete {
        collection: String,
        id: String,
        #[arg(short, long)]
        brain: Option<String>,
    },
}

fn open_brain(store: &Store, name: Option<&str>) -> Result<Arc<dyn Brain>> {
    let name = store.resolve_brain(name)?;
    let entry = store.brain(&name)?.clone();
    brain::create_brain(&name, &entry, &brain::default_index_dir())
}

fn print_hits(hits: &[aictl_core::SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for hit in hits {
        let score = hit
            .score
            .map(|s| format!(" (score: {s:.2})"))
            .unwrap_or_default();
        let id = hit
            .document_id
            .as_deref()
            .map(|i| format!("[{i}] "))
            .unwrap_or_default();
        println!("- {id}{}{}", hit.text, style(score).dim());
    }
}

pub async fn run(command: BrainCommands) -> Result<()> {
    let mut store = Store::open()?;

    match command {
        BrainCommands::Create {
            name,
            backend,
            session,
        } => {
            if backend != "local" && backend != "remote" {
                anyhow::bail!("unknown brain backend '{backend}'; available: remote, local");
            }
            store.create_brain(
                &name,
                BrainEntry {
                    backend: backend.clone(),
                    default_session: session,
                },
            )?;
            println!("Brain '{name}' created ({backend})");
        }

        BrainCommands::List => {
            let current = store.current_brain().map(str::to_string);
            for name in store.brain_names() {
                let entry = store.brain(&name)?;
                let marker = if current.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} ({})", style(&name).cyan(), entry.backend);
            }
        }

        BrainCommands::Use { name } => {
            store.use_brain(&name)?;
            println!("Using brain '{name}'");
        }

        BrainCommands::Delete { name } => {
            store.delete_brain(&name)?;
            println!("Brain '{name}' deleted");
        }

        BrainCommands::Memory { command } => match command {
            MemoryCommands::Add {
                content,
                role,
                session,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                brain
                    .memory_add(session.as_deref(), &[MemoryMessage::new(role, content)])
                    .await?;
                println!("Remembered.");
            }
            MemoryCommands::Get { session, brain } => {
                let brain = open_brain(&store, brain.as_deref())?;
                let messages = brain.memory_get(session.as_deref()).await?;
                if messages.is_empty() {
                    println!("No memory for this session.");
                }
                for m in &messages {
                    println!("{} {}", style(format!("[{}]", m.role)).dim(), m.content);
                }
            }
            MemoryCommands::Search {
                query,
                limit,
                min_score,
                session,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                let hits = brain
                    .memory_search(session.as_deref(), &query, limit, min_score)
                    .await?;
                print_hits(&hits);
            }
            MemoryCommands::Clear { session, brain } => {
                let brain = open_brain(&store, brain.as_deref())?;
                brain.memory_clear(session.as_deref()).await?;
                println!("Memory cleared.");
            }
        },

        BrainCommands::Collection { command } => match command {
            CollectionCommands::Create {
                name,
                description,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                brain
                    .collection_create(&name, description.as_deref())
                    .await?;
                println!("Collection '{name}' created");
            }
            CollectionCommands::List { brain } => {
                let brain = open_brain(&store, brain.as_deref())?;
                let collections = brain.collection_list().await?;
                if collections.is_empty() {
                    println!("No collections.");
                }
                for name in collections {
                    println!("- {name}");
                }
            }
        },

        BrainCommands::Doc { command } => match command {
            DocCommands::Add {
                collection,
                text,
                id,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                brain
                    .document_add(&collection, id.as_deref(), &text)
                    .await?;
                println!("Document added to '{collection}'");
            }
            DocCommands::Search {
                collection,
                query,
                limit,
                min_score,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                let hits = brain
                    .document_search(&collection, &query, limit, min_score)
                    .await?;
                print_hits(&hits);
            }
            DocCommands::Delete {
                collection,
                id,
                brain,
            } => {
                let brain = open_brain(&store, brain.as_deref())?;
                if brain.document_delete(&collection, &id).await? {
                    println!("Document '{id}' deleted");
                } else {
                    println!("Document '{id}' not found");
                }
            }
        },
    }

    Ok(())
}
