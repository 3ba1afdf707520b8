use clap::{Parser, Subcommand};
use ragsync::Result;
use ragsync::commands::{
    add_chatbot, add_document, add_link, check_consistency, delete_chatbot, delete_document,
    delete_link, list_chatbots, open_service, reconcile, retry_source, search, show_status,
    update_document, update_link,
};
use ragsync::config::{Config, run_interactive_config, show_config};
use ragsync::database::SourceType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragsync")]
#[command(about = "Keeps chatbot documents and links in sync with their vector embeddings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and sync settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage chatbots
    Chatbot {
        #[command(subcommand)]
        action: ChatbotAction,
    },
    /// Manage documents of a chatbot
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },
    /// Manage links of a chatbot
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// Show connectivity and sync status
    Status,
    /// Retry syncing one source
    Retry {
        /// Source type: document or link
        source_type: SourceType,
        /// Source ID
        id: i64,
        /// Tenant owning the source
        #[arg(long, default_value_t = 1)]
        tenant: i64,
    },
    /// Sync every pending or failed source
    Reconcile {
        /// Only reconcile sources of this chatbot
        #[arg(long)]
        chatbot: Option<i64>,
    },
    /// Compare SQLite with the vector store
    Check {
        /// Delete orphaned chunks and re-sync sources missing chunks
        #[arg(long)]
        repair: bool,
    },
    /// Search a chatbot's chunks
    Search {
        /// Chatbot ID
        chatbot: i64,
        /// Search query
        query: String,
        /// Number of results
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ChatbotAction {
    /// Create a chatbot
    Add {
        /// Tenant owning the chatbot
        tenant: i64,
        /// Chatbot name, unique per tenant
        name: String,
    },
    /// Delete a chatbot with its sources, chunks and sessions
    Delete {
        /// Chatbot ID
        id: i64,
    },
    /// List all chatbots
    List,
}

#[derive(Subcommand)]
enum DocumentAction {
    /// Add a document from a text file
    Add {
        /// Chatbot ID
        chatbot: i64,
        /// File with the document's text
        path: PathBuf,
        /// Display name, defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Replace a document's content or name
    Update {
        /// Document ID
        id: i64,
        /// File with the new text
        #[arg(long)]
        path: Option<PathBuf>,
        /// New display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a document and its chunks
    Delete {
        /// Document ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Add a link with its extracted page text
    Add {
        /// Chatbot ID
        chatbot: i64,
        /// Page URL
        url: String,
        /// File with the page text
        #[arg(long)]
        content: PathBuf,
        /// Page title
        #[arg(long)]
        title: Option<String>,
    },
    /// Replace a link's URL, title or content
    Update {
        /// Link ID
        id: i64,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// File with the new page text
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// Delete a link and its chunks
    Delete {
        /// Link ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                run_interactive_config(config)?;
            }
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        command => {
            let service = open_service(&config).await?;
            match command {
                Commands::Chatbot { action } => match action {
                    ChatbotAction::Add { tenant, name } => {
                        add_chatbot(&service, tenant, &name).await?;
                    }
                    ChatbotAction::Delete { id } => delete_chatbot(&service, id).await?,
                    ChatbotAction::List => list_chatbots(&service).await?,
                },
                Commands::Document { action } => match action {
                    DocumentAction::Add {
                        chatbot,
                        path,
                        name,
                    } => add_document(&service, chatbot, &path, name).await?,
                    DocumentAction::Update { id, path, name } => {
                        update_document(&service, id, path.as_deref(), name).await?;
                    }
                    DocumentAction::Delete { id } => delete_document(&service, id).await?,
                },
                Commands::Link { action } => match action {
                    LinkAction::Add {
                        chatbot,
                        url,
                        content,
                        title,
                    } => add_link(&service, chatbot, url, title, &content).await?,
                    LinkAction::Update {
                        id,
                        url,
                        title,
                        content,
                    } => update_link(&service, id, url, title, content.as_deref()).await?,
                    LinkAction::Delete { id } => delete_link(&service, id).await?,
                },
                Commands::Retry {
                    source_type,
                    id,
                    tenant,
                } => retry_source(&service, tenant, source_type, id).await?,
                Commands::Reconcile { chatbot } => reconcile(&service, chatbot).await?,
                Commands::Check { repair } => check_consistency(&service, repair).await?,
                Commands::Search {
                    chatbot,
                    query,
                    limit,
                } => search(&service, chatbot, &query, limit).await?,
                Commands::Config { .. } | Commands::Status => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn chatbot_list_parsing() {
        let cli = Cli::try_parse_from(["ragsync", "chatbot", "list"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(
                parsed.command,
                Commands::Chatbot {
                    action: ChatbotAction::List
                }
            ));
        }
    }

    #[test]
    fn document_add_with_name() {
        let cli = Cli::try_parse_from([
            "ragsync", "document", "add", "5", "notes.md", "--name", "Release notes",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Document {
                action: DocumentAction::Add {
                    chatbot,
                    path,
                    name,
                },
            } = parsed.command
            {
                assert_eq!(chatbot, 5);
                assert_eq!(path, PathBuf::from("notes.md"));
                assert_eq!(name, Some("Release notes".to_string()));
            }
        }
    }

    #[test]
    fn link_add_requires_content() {
        let cli = Cli::try_parse_from(["ragsync", "link", "add", "5", "https://example.com"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn retry_parses_source_type() {
        let cli = Cli::try_parse_from(["ragsync", "retry", "link", "9", "--tenant", "3"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Retry {
                source_type,
                id,
                tenant,
            } = parsed.command
            {
                assert_eq!(source_type, SourceType::Link);
                assert_eq!(id, 9);
                assert_eq!(tenant, 3);
            }
        }

        assert!(Cli::try_parse_from(["ragsync", "retry", "page", "9"]).is_err());
    }

    #[test]
    fn reconcile_and_check_flags() {
        let cli = Cli::try_parse_from(["ragsync", "reconcile", "--chatbot", "2"]);
        if let Ok(parsed) = cli {
            assert!(matches!(
                parsed.command,
                Commands::Reconcile { chatbot: Some(2) }
            ));
        }

        let cli = Cli::try_parse_from(["ragsync", "check", "--repair"]);
        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Check { repair: true }));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["ragsync", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragsync", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragsync", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
