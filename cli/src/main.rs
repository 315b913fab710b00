use aictl_core::{
    EmbeddingOptions, GenerateOptions, ImageRequest, Provider, SpeechOptions, Store,
    TranscribeOptions, UsageLog, providers,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

mod agent_cmd;
mod brain_cmd;

#[derive(Parser)]
#[command(name = "aictl", version)]
#[command(about = "Command-line access to hosted AI services, agents and brains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate text from a prompt (argument, --input file, or stdin)
    Generate {
        prompt: Option<String>,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        temperature: Option<f64>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Stream the response chunk by chunk
        #[arg(short, long)]
        stream: bool,
        /// Read the prompt from a file
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Also write the output to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// One-shot chat with an optional system message
    Chat {
        prompt: String,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        system: Option<String>,
    },
    /// List available providers
    Providers,
    /// Configure an API key or default model for a provider
    Config {
        #[arg(short, long)]
        provider: String,
        /// API key to store; prompted interactively when omitted with --set
        #[arg(short, long)]
        key: Option<String>,
        /// Prompt for the key without echoing it
        #[arg(long)]
        set: bool,
        /// Default model for this provider
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Analyze images with a vision-capable model
    Vision {
        prompt: String,
        #[arg(required = true)]
        images: Vec<String>,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        temperature: Option<f64>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate an image from a prompt
    Image {
        prompt: String,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long, default_value = "1024x1024")]
        size: String,
        #[arg(long, default_value = "standard")]
        quality: String,
        #[arg(long, default_value = "vivid")]
        style: String,
        /// Save the image URL to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Transcribe audio to text
    Transcribe {
        audio: PathBuf,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        language: Option<String>,
        /// Prompt to guide transcription
        #[arg(short, long)]
        prompt: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output the full JSON result
        #[arg(long)]
        json: bool,
    },
    /// Translate audio to English
    Translate {
        audio: PathBuf,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        prompt: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Convert text to speech
    Tts {
        text: String,
        output_file: PathBuf,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long, default_value = "alloy")]
        voice: String,
        #[arg(short, long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Create embeddings for text
    Embed {
        text: String,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        dimensions: Option<u32>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output the full JSON result instead of just the vector
        #[arg(long)]
        json: bool,
    },
    /// Show the token usage log
    Usage {
        /// Restrict to one UTC date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Manage agents: personas with a provider, instructions and actions
    Agent {
        #[command(subcommand)]
        command: agent_cmd::AgentCommands,
    },
    /// Manage brains: memory and document-store contexts
    Brain {
        #[command(subcommand)]
        command: brain_cmd::BrainCommands,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("{} {e:#}", style("error:").red().bold());
        std::process::exit(1);
    }
}

/// Resolve a provider by flag, stored default, or "openai", wired with
/// the usage log.
fn open_provider(store: &Store, name: Option<&str>) -> Result<Arc<dyn Provider>> {
    let name = name
        .map(str::to_string)
        .or_else(|| store.default_provider().map(str::to_string))
        .unwrap_or_else(|| "openai".to_string());
    let usage = Arc::new(UsageLog::open()?);
    providers::create_provider(&name, store, Some(usage))
}

fn read_prompt(prompt: Option<String>, input: Option<PathBuf>) -> Result<String> {
    let text = if let Some(path) = input {
        std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?
    } else if let Some(p) = prompt {
        p
    } else {
        std::io::read_to_string(std::io::stdin())?
    };
    if text.trim().is_empty() {
        anyhow::bail!("no prompt provided");
    }
    Ok(text)
}

fn write_output(output: Option<&PathBuf>, text: &str) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, text)
            .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", path.display()))?;
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    if key.len() > 8 {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "***".to_string()
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            prompt,
            provider,
            model,
            temperature,
            max_tokens,
            stream,
            input,
            output,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, provider.as_deref())?;
            let prompt = read_prompt(prompt, input)?;
            let opts = GenerateOptions {
                model,
                temperature,
                max_tokens,
            };

            if stream {
                use futures_util::StreamExt as _;
                let mut chunks = backend.generate_stream(&prompt, &opts).await?;
                let mut full = String::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    print!("{chunk}");
                    std::io::stdout().flush()?;
                    full.push_str(&chunk);
                }
                println!();
                write_output(output.as_ref(), &full)?;
            } else {
                let result = backend.generate(&prompt, &opts).await?;
                println!("{result}");
                write_output(output.as_ref(), &result)?;
            }
        }

        Commands::Chat {
            prompt,
            provider,
            model,
            system,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, provider.as_deref())?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(aictl_core::ChatMessage::system(system));
            }
            messages.push(aictl_core::ChatMessage::user(prompt));
            let opts = GenerateOptions {
                model,
                ..GenerateOptions::default()
            };
            println!("{}", backend.chat(&messages, &opts).await?);
        }

        Commands::Providers => {
            println!("Available providers:");
            for (name, description) in providers::AVAILABLE_PROVIDERS {
                println!("  {} {description}", style(format!("{name:<10}")).cyan());
            }
        }

        Commands::Config {
            provider,
            key,
            set,
            model,
        } => {
            let mut store = Store::open()?;
            let mut changed = false;

            let key = match key {
                Some(k) => Some(k),
                None if set => Some(
                    dialoguer::Password::new()
                        .with_prompt(format!("API key for {provider}"))
                        .interact()?,
                ),
                None => None,
            };
            if let Some(key) = key {
                store.set_api_key(&provider, &key)?;
                println!("API key configured for {provider}");
                changed = true;
            }
            if let Some(model) = model {
                store.set_default_model(&provider, &model)?;
                println!("Default model for {provider} set to {model}");
                changed = true;
            }

            if !changed {
                match store.stored_api_key(&provider) {
                    Some(key) => println!("{provider}: {}", mask_key(key)),
                    None => println!("No API key configured for {provider}"),
                }
                if let Some(model) = store.default_model(&provider) {
                    println!("default model: {model}");
                }
            }
        }

        Commands::Vision {
            prompt,
            images,
            provider,
            model,
            temperature,
            max_tokens,
            output,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, provider.as_deref())?;
            let opts = GenerateOptions {
                model,
                temperature,
                max_tokens,
            };
            let result = backend.vision(&prompt, &images, &opts).await?;
            println!("{result}");
            write_output(output.as_ref(), &result)?;
        }

        Commands::Image {
            prompt,
            model,
            size,
            quality,
            style: image_style,
            output,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, None)?;
            let request = ImageRequest {
                prompt,
                model,
                size: Some(size),
                quality: Some(quality),
                style: Some(image_style),
            };
            let image = backend.generate_image(&request).await?;
            if let Some(url) = &image.url {
                println!("Image URL: {url}");
                write_output(output.as_ref(), url)?;
            } else if image.b64.is_some() {
                println!("Image returned as base64 payload");
            }
            if let Some(revised) = &image.revised_prompt {
                println!("Revised prompt: {revised}");
            }
        }

        Commands::Transcribe {
            audio,
            model,
            language,
            prompt,
            output,
            json,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, None)?;
            let opts = TranscribeOptions {
                model,
                language,
                prompt,
            };
            let transcript = backend.transcribe(&audio, &opts).await?;
            let text = if json {
                serde_json::to_string_pretty(&transcript)?
            } else {
                transcript.text
            };
            println!("{text}");
            write_output(output.as_ref(), &text)?;
        }

        Commands::Translate {
            audio,
            model,
            prompt,
            output,
            json,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, None)?;
            let opts = TranscribeOptions {
                model,
                language: None,
                prompt,
            };
            let transcript = backend.translate(&audio, &opts).await?;
            let text = if json {
                serde_json::to_string_pretty(&transcript)?
            } else {
                transcript.text
            };
            println!("{text}");
            write_output(output.as_ref(), &text)?;
        }

        Commands::Tts {
            text,
            output_file,
            model,
            voice,
            speed,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, None)?;
            let opts = SpeechOptions {
                model,
                voice: Some(voice),
                speed: Some(speed),
            };
            backend.text_to_speech(&text, &output_file, &opts).await?;
            println!("Audio saved to: {}", output_file.display());
        }

        Commands::Embed {
            text,
            provider,
            model,
            dimensions,
            output,
            json,
        } => {
            let store = Store::open()?;
            let backend = open_provider(&store, provider.as_deref())?;
            let opts = EmbeddingOptions { model, dimensions };
            let vectors = backend.embeddings(&[text], &opts).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&serde_json::json!({
                    "count": vectors.len(),
                    "dimensions": vectors.first().map(Vec::len).unwrap_or(0),
                    "embeddings": vectors,
                }))?
            } else {
                serde_json::to_string(vectors.first().map(Vec::as_slice).unwrap_or(&[]))?
            };
            println!("{rendered}");
            write_output(output.as_ref(), &rendered)?;
        }

        Commands::Usage { date } => {
            let usage = UsageLog::open()?;
            let table = usage.snapshot();
            let dates: Vec<&String> = match &date {
                Some(d) => table.keys().filter(|k| *k == d).collect(),
                None => table.keys().collect(),
            };
            if dates.is_empty() {
                println!("No token usage recorded.");
            }
            for d in dates {
                println!("{}", style(d).bold());
                for (provider, tokens) in &table[d] {
                    println!("  {provider:<12} {tokens} tokens");
                }
            }
        }

        Commands::Agent { command } => agent_cmd::run(command).await?,
        Commands::Brain { command } => brain_cmd::run(command).await?,
    }

    Ok(())
}
