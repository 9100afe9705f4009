use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use council_core::{LogEntry, Session};
use db::{EventRepository, SessionLog, SessionStore, SnapshotRepository};
use orchestrator::builtin_personas;
use server::config::{ServerConfig, CONFIG_FILE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "council")]
#[command(about = "Multi-agent debate sessions with human checkpoints", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to council.toml
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Base URL of the inference runtime
        #[arg(long)]
        gateway_url: Option<String>,
    },
    /// Write a starter config and create the data directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print a session's log
    Export {
        session_id: Uuid,

        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rebuild a session from its log and compare it with the stored snapshot
    Replay { session_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Jsonl,
}

#[derive(Debug, Default)]
struct ServeOverrides {
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    gateway_url: Option<String>,
}

impl ServeOverrides {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(data_dir) = self.data_dir {
            config.storage.data_dir = Some(data_dir);
        }
        if let Some(url) = self.gateway_url {
            config.gateway.base_url = url;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { force }) => init(&cli.config, force).await,
        Some(Commands::Serve {
            host,
            port,
            data_dir,
            gateway_url,
        }) => {
            let overrides = ServeOverrides {
                host,
                port,
                data_dir,
                gateway_url,
            };
            serve(&cli.config, overrides).await
        }
        Some(Commands::Export {
            session_id,
            format,
            output,
        }) => export(&cli.config, session_id, format, output.as_deref()).await,
        Some(Commands::Replay { session_id }) => replay(&cli.config, session_id).await,
        None => serve(&cli.config, ServeOverrides::default()).await,
    }
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    ServerConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let config = ServerConfig {
        personas: builtin_personas(),
        ..Default::default()
    };
    config.save(path)?;

    let data_dir = config.data_dir();
    tokio::fs::create_dir_all(&data_dir).await?;
    db::connect(&config.database_url())
        .await
        .context("Failed to initialize database")?;

    println!();
    println!("{}", "Initialized AI Council".green().bold());
    println!();
    println!("  Config:    {}", path.display());
    println!("  Data dir:  {}", data_dir.display());
    println!("  Database:  {}", config.database_url());
    println!("  Personas:  {}", config.personas.len());
    println!();
    println!("Next steps:");
    println!("  1. Point [gateway] base_url at your inference runtime");
    println!("  2. Run 'council serve'");

    Ok(())
}

async fn serve(path: &Path, overrides: ServeOverrides) -> Result<()> {
    let mut config = load_config(path)?;
    overrides.apply(&mut config);
    config.validate()?;

    init_tracing();

    println!();
    println!("{}", "AI Council".bold());
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://{}", config.listen_addr());
    println!("  Swagger UI:  http://{}/swagger-ui", config.listen_addr());
    println!("  Gateway:     {}", config.gateway.base_url);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    server::serve(config).await
}

async fn export(
    path: &Path,
    session_id: Uuid,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let config = load_config(path)?;
    let entries = SessionLog::new(config.data_dir())
        .read_all(session_id)
        .await
        .with_context(|| format!("Failed to read log of session {}", session_id))?;
    if entries.is_empty() {
        bail!("session {} has no log entries", session_id);
    }

    let rendered = render_log(&entries, format)?;
    match output {
        Some(file) => {
            tokio::fs::write(file, rendered).await?;
            eprintln!("Wrote {} entries to {}", entries.len(), file.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn render_log(entries: &[LogEntry], format: ExportFormat) -> Result<String> {
    Ok(match format {
        ExportFormat::Json => {
            let mut text = serde_json::to_string_pretty(entries)?;
            text.push('\n');
            text
        }
        ExportFormat::Jsonl => {
            let mut text = String::new();
            for entry in entries {
                text.push_str(&serde_json::to_string(entry)?);
                text.push('\n');
            }
            text
        }
    })
}

async fn replay(path: &Path, session_id: Uuid) -> Result<()> {
    let config = load_config(path)?;
    let pool = db::connect(&config.database_url())
        .await
        .context("Failed to open database")?;
    let store = SessionStore::new(
        SessionLog::new(config.data_dir()),
        SnapshotRepository::new(pool.clone()),
        EventRepository::new(pool),
    );

    let replayed = store.replay(session_id).await?;
    let stored = store.load(session_id).await?;

    print_summary(&replayed);
    if replayed == stored {
        println!("{}", "Replay matches the stored state".green());
        Ok(())
    } else {
        println!(
            "{} stored state is at {} / {} (seq {})",
            "Mismatch:".red().bold(),
            stored.current_stage,
            stored.status.as_str(),
            stored.last_seq
        );
        bail!("replay of session {} disagrees with its snapshot", session_id)
    }
}

fn print_summary(session: &Session) {
    println!();
    println!("Session:  {}", session.id);
    println!("Prompt:   {}", session.prompt);
    println!("Entries:  {}", session.last_seq);
    println!("Stage:    {} (round {})", session.current_stage, session.round);
    println!("Status:   {}", session.status.as_str());
    println!("Tokens:   {}", session.tokens.total());
    for slot in &session.slots {
        println!(
            "  {} [{}] {} outputs",
            slot.id,
            slot.persona.name,
            slot.visible_outputs().count()
        );
    }
    if let Some(ref error) = session.last_error {
        println!("Last error: {} ({})", error.message, error.code);
    }
    println!();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "council=info,server=info,orchestrator=info,tower_http=info".into()
            }),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_core::{LogDraft, LogRecord, Persona, SessionConfig};

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let mut config = ServerConfig::default();
        ServeOverrides {
            port: Some(9000),
            gateway_url: Some("http://gpu-box:11434".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.gateway.base_url, "http://gpu-box:11434");
        assert!(config.storage.data_dir.is_none());
    }

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = ServerConfig::default();
        config.storage.data_dir = Some(dir.path().join("data"));
        config.save(&path).unwrap();

        // An existing file is left alone without --force.
        init(&path, false).await.unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_jsonl_export_is_one_entry_per_line() {
        let session_id = Uuid::new_v4();
        let entries = vec![
            LogDraft::engine(LogRecord::SessionStarted {
                prompt: "Cache or queue?".to_string(),
                config: SessionConfig {
                    worker_count: 2,
                    ..Default::default()
                },
                bindings: vec![
                    Persona::new("a", "A", "Be bold."),
                    Persona::new("b", "B", "Be careful."),
                ],
            })
            .into_entry(session_id, 1),
            LogDraft::engine(LogRecord::SessionCompleted).into_entry(session_id, 2),
        ];

        let text = render_log(&entries, ExportFormat::Jsonl).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, entries[1]);

        let pretty = render_log(&entries, ExportFormat::Json).unwrap();
        let parsed: Vec<LogEntry> = serde_json::from_str(&pretty).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
