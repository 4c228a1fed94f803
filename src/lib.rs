//! salon-assist - Customer query resolution with a human escalation loop
//!
//! A salon front-desk assistant core: customer messages are classified for
//! scope and booking intent, decomposed into standalone questions, answered
//! from an embedding-indexed knowledge base, and escalated to a human
//! supervisor whenever confidence falls short. Supervisor answers flow back
//! to the customer by email and are taught back into the knowledge base.
//!
//! # Architecture
//!
//! - [`pipeline`]: the five-stage resolution pipeline
//! - [`knowledge`]: vector-searched knowledge base (in-memory or Qdrant)
//! - [`escalation`]: help-request ledger and status machine
//! - [`supervisor`]: answer handling and the teach-back loop
//! - [`embedding`] / [`llm`]: HTTP provider clients
//! - [`session`]: per-customer conversation state

pub mod cli;
pub mod config;
pub mod email;
pub mod embedding;
pub mod errors;
pub mod escalation;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use errors::{AssistError, Result};
pub use pipeline::{PipelineConfig, QueryPipeline};
pub use supervisor::SupervisorService;
pub use types::{HelpRequest, HelpRequestStatus, KnowledgeEntry, PipelineResult};
