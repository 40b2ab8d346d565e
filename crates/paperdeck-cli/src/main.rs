use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use paperdeck_local::arxiv::ArxivClient;
use paperdeck_local::chat::{available_models, ChatClient, ChatConfig, ChatMessage, Provider};
use paperdeck_local::context::{prepare_context_prompt, ContextBuilder};
use paperdeck_local::html::HtmlProcessor;
use paperdeck_local::keys::ApiKeyStore;
use paperdeck_local::prefs::PrefsStore;
use paperdeck_local::threads::ThreadStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "paperdeck")]
#[command(about = "Personal research-paper reader: arXiv search, readable HTML, paper chat", long_about = None)]
struct Cli {
    /// Data directory for preferences, chat history and key material.
    #[arg(long, env = "PAPERDECK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search arXiv (falls back to the saved preference keywords).
    Search(SearchCmd),
    /// Show one paper's repository record.
    Paper(PaperCmd),
    /// Fetch a paper's HTML and process it into readable form.
    Read(ReadCmd),
    /// Assemble the grounded chat prompt for a question (no provider call).
    Prompt(PromptCmd),
    /// Ask the chat assistant a question about a paper.
    Ask(AskCmd),
    /// Show or update preferences and saved papers.
    Prefs(PrefsCmd),
    /// Manage encrypted provider API keys.
    Keys(KeysCmd),
    /// List chat threads (or one thread's history) for a paper.
    Threads(ThreadsCmd),
}

#[derive(Args, Debug)]
struct SearchCmd {
    /// Search keywords; empty means "use preference keywords".
    keywords: Vec<String>,
    /// Maximum results (default: preference max_results).
    #[arg(long)]
    limit: Option<usize>,
    /// Result offset for paging.
    #[arg(long, default_value_t = 0)]
    start: usize,
}

#[derive(Args, Debug)]
struct PaperCmd {
    id: String,
}

#[derive(Args, Debug)]
struct ReadCmd {
    id: String,
    /// Print the full processed document (content markup included).
    #[arg(long)]
    full: bool,
}

#[derive(Args, Debug)]
struct PromptCmd {
    id: String,
    question: String,
}

#[derive(Args, Debug)]
struct AskCmd {
    id: String,
    question: String,
    /// Chat provider: openai or anthropic.
    #[arg(long, default_value = "openai")]
    provider: String,
    /// Model override (default: the provider's first known model).
    #[arg(long)]
    model: Option<String>,
    /// Continue an existing thread instead of starting a new one.
    #[arg(long)]
    thread: Option<String>,
}

#[derive(Args, Debug)]
struct PrefsCmd {
    #[command(subcommand)]
    action: PrefsAction,
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    /// Print the current preferences.
    Show,
    /// Replace the preference keywords and/or result limit.
    Set {
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Add a paper to the saved list.
    Save { id: String },
    /// Remove a paper from the saved list.
    Remove { id: String },
}

#[derive(Args, Debug)]
struct KeysCmd {
    #[command(subcommand)]
    action: KeysAction,
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// Encrypt and store a provider API key.
    Set { provider: String, key: String },
    /// List the models a provider is known to serve.
    Models { provider: String },
}

#[derive(Args, Debug)]
struct ThreadsCmd {
    paper_id: String,
    /// Print one thread's message history instead of the thread list.
    #[arg(long)]
    history: Option<String>,
}

/// Encrypted API keys, one slot per provider.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SealedKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    openai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anthropic: Option<String>,
}

impl SealedKeys {
    fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
        }
    }

    fn set(&mut self, provider: Provider, sealed: String) {
        match provider {
            Provider::OpenAi => self.openai = Some(sealed),
            Provider::Anthropic => self.anthropic = Some(sealed),
        }
    }
}

struct Paths {
    prefs: PathBuf,
    chat_history: PathBuf,
    master_key: PathBuf,
    sealed_keys: PathBuf,
}

fn data_paths(override_dir: Option<PathBuf>) -> Result<Paths> {
    let root = match override_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow!("no data directory available; pass --data-dir"))?
            .join("paperdeck"),
    };
    Ok(Paths {
        prefs: root.join("preferences.json"),
        chat_history: root.join("chat_history"),
        master_key: root.join("chatbot.key"),
        sealed_keys: root.join("keys.json"),
    })
}

fn load_sealed_keys(path: &PathBuf) -> Result<SealedKeys> {
    if !path.exists() {
        return Ok(SealedKeys::default());
    }
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = data_paths(cli.data_dir.clone())?;
    let http = reqwest::Client::new();
    let client = ArxivClient::new(http.clone())?;

    match cli.command {
        Commands::Search(cmd) => {
            let prefs = PrefsStore::new(&paths.prefs).load()?;
            let keywords = if cmd.keywords.is_empty() {
                prefs.keywords.clone()
            } else {
                cmd.keywords
            };
            if keywords.is_empty() {
                return Err(anyhow!(
                    "no keywords given and none saved; run `paperdeck prefs set --keyword ...`"
                ));
            }
            let limit = cmd.limit.unwrap_or(prefs.max_results);
            let resp = client.search(&keywords, limit, cmd.start).await?;
            print_json(&resp)
        }
        Commands::Paper(cmd) => {
            let record = client.paper_details(&cmd.id).await?;
            let html_available = client.html_available(&cmd.id).await;
            print_json(&serde_json::json!({
                "paper": record,
                "html_available": html_available,
            }))
        }
        Commands::Read(cmd) => {
            let html = client.fetch_html(&cmd.id).await?;
            let processor = HtmlProcessor::default();
            let processed = processor.process(&cmd.id, &html);
            if cmd.full {
                print_json(&processed?)
            } else {
                print_json(&processor.create_paper_summary(processed)?)
            }
        }
        Commands::Prompt(cmd) => {
            let builder = ContextBuilder::new(client);
            let context = builder.extract_paper_context(&cmd.id).await?;
            println!("{}", prepare_context_prompt(&context, &cmd.question));
            Ok(())
        }
        Commands::Ask(cmd) => {
            let provider: Provider = cmd.provider.parse()?;
            let model = cmd.model.unwrap_or_else(|| {
                available_models(provider)[0].to_string()
            });

            let key_store = ApiKeyStore::init(&paths.master_key)?;
            let sealed = load_sealed_keys(&paths.sealed_keys)?;
            let sealed_key = sealed.get(provider).ok_or_else(|| {
                anyhow!(
                    "no {} key stored; run `paperdeck keys set {} <key>`",
                    provider.as_str(),
                    provider.as_str()
                )
            })?;
            let api_key = key_store.decrypt(sealed_key)?;

            let builder = ContextBuilder::new(client);
            let context = builder.extract_paper_context(&cmd.id).await?;

            let store = ThreadStore::new(&paths.chat_history);
            let thread_id = match cmd.thread {
                Some(id) => id,
                None => {
                    let title: String = cmd.question.chars().take(60).collect();
                    store.create_thread(&cmd.id, &title)?.id
                }
            };
            let history = store.thread_history(&thread_id)?;

            let chat = ChatClient::new(http, ChatConfig::new(provider, model), api_key);
            let reply = chat.send(&cmd.question, &context, &history).await?;

            let mut user = ChatMessage::user(&thread_id, &cmd.question);
            user.metadata
                .insert("paper_id".to_string(), cmd.id.clone());
            store.save_message(&user)?;
            let reply = ChatMessage {
                thread_id: thread_id.clone(),
                ..reply
            };
            store.save_message(&reply)?;

            println!("{}", reply.content);
            eprintln!("(thread: {thread_id})");
            Ok(())
        }
        Commands::Prefs(cmd) => {
            let store = PrefsStore::new(&paths.prefs);
            match cmd.action {
                PrefsAction::Show => print_json(&store.load()?),
                PrefsAction::Set {
                    keywords,
                    max_results,
                } => {
                    let mut prefs = store.load()?;
                    if !keywords.is_empty() {
                        prefs.keywords = keywords;
                    }
                    if let Some(n) = max_results {
                        prefs.max_results = n;
                    }
                    store.save(&prefs)?;
                    print_json(&prefs)
                }
                PrefsAction::Save { id } => print_json(&store.save_paper(&id)?),
                PrefsAction::Remove { id } => print_json(&store.remove_paper(&id)?),
            }
        }
        Commands::Keys(cmd) => match cmd.action {
            KeysAction::Set { provider, key } => {
                let provider: Provider = provider.parse()?;
                let key_store = ApiKeyStore::init(&paths.master_key)?;
                let mut sealed = load_sealed_keys(&paths.sealed_keys)?;
                sealed.set(provider, key_store.encrypt(&key)?);
                std::fs::write(&paths.sealed_keys, serde_json::to_vec_pretty(&sealed)?)
                    .with_context(|| format!("writing {}", paths.sealed_keys.display()))?;
                eprintln!("stored {} key (encrypted at rest)", provider.as_str());
                Ok(())
            }
            KeysAction::Models { provider } => {
                let provider: Provider = provider.parse()?;
                print_json(&available_models(provider))
            }
        },
        Commands::Threads(cmd) => {
            let store = ThreadStore::new(&paths.chat_history);
            match cmd.history {
                Some(thread_id) => print_json(&store.thread_history(&thread_id)?),
                None => print_json(&store.paper_threads(&cmd.paper_id)?),
            }
        }
    }
}
