//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// salon-assist - KB-backed customer assistant with human escalation
#[derive(Parser, Debug)]
#[command(name = "salon-assist")]
#[command(version = "0.3.0")]
#[command(about = "Answer salon customer questions from a learned knowledge base", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve one customer message through the pipeline
    Ask {
        /// The customer's message
        #[arg(value_name = "TEXT")]
        text: String,

        /// Customer session identifier
        #[arg(short, long, default_value = "cli-customer")]
        participant: String,

        /// Room or channel name
        #[arg(short, long, default_value = "salon")]
        room: String,
    },

    /// Load knowledge entries from a JSON file of {question, answer} pairs
    Seed {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List help requests waiting on a supervisor
    Pending,

    /// Record a supervisor's answer to a help request
    Answer {
        #[arg(value_name = "REQUEST_ID")]
        id: Uuid,

        #[arg(value_name = "ANSWER")]
        answer: String,
    },

    /// Show the full audit trail for a help request
    Trail {
        #[arg(value_name = "REQUEST_ID")]
        id: Uuid,
    },

    /// Expire pending requests older than the configured window
    Sweep,

    /// Display pipeline counters for this process
    Stats,
}
