//! Main module for the Hindsight CLI application.
//!
//! Parses the command line, loads configuration, opens the memory engine and
//! runs the requested subcommand.
//!
//! # Examples
//!
//! ```sh
//! hindsight init
//! SESSION=$(hindsight start)
//! hindsight remember --session "$SESSION" --turn 1 "My name is Wang" "Hello, Wang"
//! hindsight recall --session "$SESSION" "What is my name?"
//! ```

use clap::Parser;
use hindsight::{
    commands::{Cli, Commands},
    config::{self, MemoryConfig},
    embeddings,
    memory::MemoryEngine,
    retriever::RetrievalParams,
};
use once_cell::sync::OnceCell;
use std::{error::Error, path::Path};
use tracing::{debug, info, warn};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    });

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => hindsight::default_config_path()?,
    };

    if let Commands::Init = cli.command {
        return init(&config_path);
    }

    let memory_config = load_or_default(&config_path)?;
    debug!("Config loaded: {:?}", memory_config);
    let embedder = embeddings::provider_from_config(&memory_config.embedding)?;
    let mut engine = MemoryEngine::open_with_progress(memory_config, embedder, true)?;

    match cli.command {
        Commands::Init => {}
        Commands::Start => {
            let session_id = engine.start_session()?;
            println!("{session_id}");
        }
        Commands::Sessions { json } => {
            let sessions = engine.sessions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                for session in sessions {
                    println!(
                        "{}\t{}\t{} turns",
                        session.session_id, session.start_time_str, session.total_turns
                    );
                }
            }
        }
        Commands::History { session, json } => {
            let turns = engine.history(&session)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&turns)?);
            } else {
                for turn in turns {
                    println!(
                        "[turn {} | {} | {}] {}",
                        turn.turn_number, turn.role, turn.created_at, turn.content
                    );
                }
            }
        }
        Commands::Remember {
            session,
            turn,
            user,
            assistant,
        } => {
            engine.save_turn(&session, turn, &user, &assistant)?;
            info!("Saved turn {} of session {}", turn, session);
        }
        Commands::Close { session, turns } => {
            if !engine.close_session(&session, turns)? {
                return Err(format!("Unknown session {session}").into());
            }
        }
        Commands::Recall {
            session,
            query,
            top_k,
            threshold,
            recent_n,
            json,
        } => {
            let retrieval = &engine.config().retrieval;
            let max_chars = retrieval.max_evidence_chars;
            let mut params = RetrievalParams::from(retrieval);
            params.top_k = top_k.unwrap_or(params.top_k);
            params.similarity_threshold = threshold.unwrap_or(params.similarity_threshold);
            params.recent_n = recent_n.unwrap_or(params.recent_n);

            let turns = engine.recall_with(&session, &query, &params);
            if json {
                println!("{}", serde_json::to_string_pretty(&turns)?);
            } else {
                println!("{}", hindsight::evidence::assemble(&turns, max_chars));
            }
        }
        Commands::Rebuild { force } => {
            let report = engine.rebuild(force)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Writes a default configuration file, leaving an existing one untouched.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        warn!("Config file already exists: {}", config_path.display());
        return Ok(());
    }
    config::write_config(config_path, &default_config()?)?;
    println!("{}", config_path.display());
    Ok(())
}

/// Default configuration with storage under the config directory.
fn default_config() -> Result<MemoryConfig, Box<dyn Error>> {
    let data_dir = hindsight::config_dir()?;
    let mut config = MemoryConfig::default();
    config.storage.history_db_path = data_dir.join("conversation_history.db");
    config.storage.index_dir = data_dir.join("index");
    Ok(config)
}

fn load_or_default(config_path: &Path) -> Result<MemoryConfig, Box<dyn Error>> {
    if config_path.exists() {
        return Ok(config::load_config(config_path)?);
    }
    warn!(
        "No config at {}, using defaults (run `hindsight init` to create one)",
        config_path.display()
    );
    default_config()
}
