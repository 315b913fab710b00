use aictl_core::{
    ActionContext, ActionRegistry, AgentEntry, AgentRunner, GenerateOptions, Store, UsageLog,
    agent::StoreTranscript, brain, providers,
};
use anyhow::Result;
use clap::Subcommand;
use console::style;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Create a new agent
    Create {
        name: String,
        #[arg(short, long, default_value = "openai")]
        provider: String,
        /// Model for this agent; defaults to the provider's default
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long, default_value = "")]
        instructions: String,
        /// Brain to attach (must already exist)
        #[arg(short, long)]
        brain: Option<String>,
    },
    /// List agents
    List,
    /// Select the agent later commands default to
    Use { name: String },
    /// Show an agent's configuration
    Show { name: Option<String> },
    /// Delete an agent and all its threads
    Delete { name: String },
    /// Manage agent properties
    Prop {
        #[command(subcommand)]
        command: PropCommands,
    },
    /// Enable or disable actions for an agent
    Action {
        #[command(subcommand)]
        command: ActionCommands,
    },
    /// Manage an agent's conversation threads
    Thread {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// Run the agent on a prompt through its action-calling loop
    Run {
        prompt: String,
        #[arg(short, long)]
        agent: Option<String>,
        /// Image attachments (URLs or local paths)
        #[arg(long = "image")]
        images: Vec<String>,
        #[arg(short, long)]
        temperature: Option<f64>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
}

#[derive(Subcommand)]
pub enum PropCommands {
    Set {
        key: String,
        value: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    Unset {
        key: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ActionCommands {
    Enable {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    Disable {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// List available actions and which are enabled
    List {
        #[arg(short, long)]
        agent: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ThreadCommands {
    /// Create a thread and make it active
    New {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    List {
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Make a thread the active one
    Use {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Print a thread's messages (active thread when omitted)
    Show {
        name: Option<String>,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Remove all messages from a thread
    Clear {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
    Delete {
        name: String,
        #[arg(short, long)]
        agent: Option<String>,
    },
}

fn default_model_for(provider: &str, store: &Store) -> String {
    if let Some(model) = store.default_model(provider) {
        return model.to_string();
    }
    match provider {
        "anthropic" => "claude-3-5-sonnet-20241022".to_string(),
        "ollama" => "llama3.2".to_string(),
        _ => "gpt-4o".to_string(),
    }
}

pub async fn run(command: AgentCommands) -> Result<()> {
    let mut store = Store::open()?;

    match command {
        AgentCommands::Create {
            name,
            provider,
            model,
            instructions,
            brain,
        } => {
            if !providers::AVAILABLE_PROVIDERS
                .iter()
                .any(|(p, _)| *p == provider)
            {
                anyhow::bail!("unknown provider '{provider}'");
            }
            if let Some(brain_name) = &brain {
                store.brain(brain_name)?;
            }
            let model = model.unwrap_or_else(|| default_model_for(&provider, &store));
            store.create_agent(
                &name,
                AgentEntry {
                    provider,
                    model,
                    instructions,
                    brain,
                    properties: Default::default(),
                    actions: Default::default(),
                    threads: Default::default(),
                    current_thread: None,
                },
            )?;
            println!("Agent '{name}' created");
        }

        AgentCommands::List => {
            let current = store.current_agent().map(str::to_string);
            for name in store.agent_names() {
                let entry = store.agent(&name)?;
                let marker = if current.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {} ({}, {})",
                    style(&name).cyan(),
                    entry.provider,
                    entry.model
                );
            }
        }

        AgentCommands::Use { name } => {
            store.use_agent(&name)?;
            println!("Using agent '{name}'");
        }

        AgentCommands::Show { name } => {
            let name = store.resolve_agent(name.as_deref())?;
            let entry = store.agent(&name)?;
            let summary = serde_json::json!({
                "name": name,
                "provider": entry.provider,
                "model": entry.model,
                "instructions": entry.instructions,
                "brain": entry.brain,
                "properties": entry.properties,
                "actions": entry.actions,
                "threads": entry.threads.keys().collect::<Vec<_>>(),
                "current_thread": entry.current_thread,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        AgentCommands::Delete { name } => {
            store.delete_agent(&name)?;
            println!("Agent '{name}' deleted");
        }

        AgentCommands::Prop { command } => match command {
            PropCommands::Set { key, value, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.set_agent_property(&agent, &key, &value)?;
                println!("{agent}: {key} = {value}");
            }
            PropCommands::Unset { key, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.unset_agent_property(&agent, &key)?;
                println!("{agent}: {key} unset");
            }
        },

        AgentCommands::Action { command } => match command {
            ActionCommands::Enable { name, agent } => {
                let registry = ActionRegistry::with_builtins();
                if !registry.contains(&name) {
                    anyhow::bail!(
                        "unknown action '{name}'; available: {}",
                        registry.names().join(", ")
                    );
                }
                let agent = store.resolve_agent(agent.as_deref())?;
                store.enable_action(&agent, &name)?;
                println!("Action '{name}' enabled on '{agent}'");
            }
            ActionCommands::Disable { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.disable_action(&agent, &name)?;
                println!("Action '{name}' disabled on '{agent}'");
            }
            ActionCommands::List { agent } => {
                let registry = ActionRegistry::with_builtins();
                let enabled = store
                    .resolve_agent(agent.as_deref())
                    .ok()
                    .and_then(|a| store.agent(&a).ok().map(|e| e.actions.clone()))
                    .unwrap_or_default();
                for spec in registry.specs() {
                    let marker = if enabled.contains(&spec.name) { "*" } else { " " };
                    println!("{marker} {:<24} {}", style(&spec.name).cyan(), spec.description);
                }
            }
        },

        AgentCommands::Thread { command } => match command {
            ThreadCommands::New { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.create_thread(&agent, &name)?;
                println!("Thread '{name}' created and active on '{agent}'");
            }
            ThreadCommands::List { agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                let current = store.current_thread(&agent)?.map(str::to_string);
                for name in store.thread_names(&agent)? {
                    let thread = store.thread(&agent, &name)?;
                    let marker = if current.as_deref() == Some(name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{marker} {} ({} messages, created {})",
                        style(&name).cyan(),
                        thread.messages.len(),
                        thread.created_at
                    );
                }
            }
            ThreadCommands::Use { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.use_thread(&agent, &name)?;
                println!("Using thread '{name}' on '{agent}'");
            }
            ThreadCommands::Show { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                let name = match name {
                    Some(n) => n,
                    None => store
                        .current_thread(&agent)?
                        .map(str::to_string)
                        .ok_or_else(|| anyhow::anyhow!("no active thread on '{agent}'"))?,
                };
                let thread = store.thread(&agent, &name)?;
                for m in &thread.messages {
                    println!("{} {}", style(format!("[{}]", m.role)).dim(), m.content);
                }
            }
            ThreadCommands::Clear { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.clear_thread(&agent, &name)?;
                println!("Thread '{name}' cleared");
            }
            ThreadCommands::Delete { name, agent } => {
                let agent = store.resolve_agent(agent.as_deref())?;
                store.delete_thread(&agent, &name)?;
                println!("Thread '{name}' deleted");
            }
        },

        AgentCommands::Run {
            prompt,
            agent,
            images,
            temperature,
            max_tokens,
        } => {
            let agent = store.resolve_agent(agent.as_deref())?;
            let entry = store.agent(&agent)?.clone();

            let usage = Arc::new(UsageLog::open()?);
            let provider = providers::create_provider(&entry.provider, &store, Some(usage))?;

            let mut ctx = ActionContext::new(provider, agent.clone());
            if let Some(brain_name) = &entry.brain {
                let brain_entry = store.brain(brain_name)?.clone();
                ctx = ctx.with_brain(brain::create_brain(
                    brain_name,
                    &brain_entry,
                    &brain::default_index_dir(),
                )?);
            }

            // Properties ride along as extra persona context.
            let mut instructions = entry.instructions.clone();
            if !entry.properties.is_empty() {
                instructions.push_str("\n\nPersona properties:\n");
                for (key, value) in &entry.properties {
                    instructions.push_str(&format!("- {key}: {value}\n"));
                }
            }

            let thread = store.ensure_active_thread(&agent)?;
            let history = store.thread(&agent, &thread)?.messages.clone();

            let registry = Arc::new(ActionRegistry::with_builtins());
            let runner = AgentRunner::new(registry, ctx)
                .with_enabled_actions(entry.actions.clone());
            let opts = GenerateOptions {
                model: Some(entry.model.clone()),
                temperature,
                max_tokens,
            };

            let mut sink = StoreTranscript::new(&mut store, agent.as_str(), thread.as_str());
            let answer = runner
                .run(&mut sink, &instructions, &history, &prompt, &images, &opts)
                .await?;
            println!("{answer}");
        }
    }

    Ok(())
}
