use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_engine::{ConversationId, Feedback};

/// Parley: a streaming chat client for the terminal.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// API root override, e.g. http://localhost:8000.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Bearer token; defaults to the variable named by `api.token_env`.
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List conversations.
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Start a new conversation.
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// Print a conversation's messages.
    Show { id: ConversationId },
    /// Send a prompt and stream the reply.
    Chat {
        id: ConversationId,
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Re-send the last prompt of a conversation.
    Retry { id: ConversationId },
    /// Vote on an assistant message.
    Feedback {
        session: ConversationId,
        message: i64,
        /// up or down
        vote: Feedback,
    },
    Rename {
        id: ConversationId,
        #[arg(required = true, trailing_var_arg = true)]
        title: Vec<String>,
    },
    Delete { id: ConversationId },
    /// Print token and latency totals for a conversation.
    Metrics { id: ConversationId },
    /// Print the effective configuration as JSON.
    Config,
}

pub fn parse() -> Args {
    Args::parse()
}
