use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "swarm-field")]
#[command(version)]
#[command(about = "Field-based task coordination for autonomous worker agents")]
#[command(long_about = "Swarm Field keeps a shared field of work nodes. Agents sense the hottest \
                       nodes matching their affinities, claim one exclusively, and resolve or release \
                       it. Stale agents are swept and their work reopened. Start with \
                       'swarm-field deposit --file plan.json' to seed the field.")]
pub struct Cli {
    /// Configuration file (defaults to ./swarm-field.toml when present)
    #[arg(long, global = true, help = "Path to a swarm-field.toml configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply schema migrations
    Migrate,
    /// Register, inspect and retire agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// List the best open nodes for an agent without claiming anything
    Sense {
        agent_id: String,
        /// Maximum number of candidates
        #[arg(long, help = "Maximum number of candidates to show")]
        limit: Option<usize>,
    },
    /// Take exclusive ownership of an open node
    Claim { agent_id: String, node_id: String },
    /// Finish a claimed node
    Resolve {
        agent_id: String,
        node_id: String,
        /// Record the attempt as failed; the node reopens hotter
        #[arg(long, value_name = "REASON", help = "Resolve as a failure with this reason")]
        failed: Option<String>,
    },
    /// Give a claimed node back to the field
    Release {
        agent_id: String,
        node_id: String,
        #[arg(long, default_value = "released by operator", help = "Why the node is being released")]
        reason: String,
    },
    /// Make a node wait on other nodes
    Block {
        node_id: String,
        /// Nodes that must be resolved first
        #[arg(long = "on", required = true, num_args = 1.., help = "Ids of the blocking nodes")]
        blockers: Vec<String>,
    },
    /// Raise a node's temperature so it ranks higher
    Boost {
        node_id: String,
        #[arg(long, default_value = "1.0", help = "Temperature to add")]
        delta: f64,
    },
    /// Approve a resolved node as a reviewer
    Approve { reviewer_id: String, node_id: String },
    /// Add a tree of nodes from a JSON file in one transaction
    Deposit {
        #[arg(long, help = "JSON file describing the node tree")]
        file: PathBuf,
        /// Recorded as the creator of every node
        #[arg(long, help = "Creator recorded on the nodes (defaults to operator@<hostname>)")]
        created_by: Option<String>,
    },
    /// Manage context bundles
    Bundle {
        #[command(subcommand)]
        action: BundleAction,
    },
    /// Link a context bundle to a node
    Attach {
        node_id: String,
        /// Bundle slug
        bundle: String,
        #[arg(long, default_value = "1.0", help = "Match score between the bundle and the node")]
        score: f64,
        #[arg(long, help = "Who attached the bundle (defaults to operator@<hostname>)")]
        by: Option<String>,
    },
    /// Reclaim work from agents that stopped heartbeating
    Sweep {
        /// Run a single sweep and exit instead of sweeping until Ctrl-C
        #[arg(long, help = "Sweep once and exit")]
        once: bool,
    },
    /// Show one node with its blockers and bundles
    Show { node_id: String },
    /// Display field and agent overview
    Status,
}

#[derive(Subcommand)]
pub enum AgentAction {
    /// Register a new agent
    Register {
        agent_type: String,
        /// Capability tags; '*' matches every node
        #[arg(long, value_delimiter = ',', help = "Comma-separated affinity tags")]
        affinity: Vec<String>,
        #[arg(long, help = "Explicit agent id (generated when omitted)")]
        id: Option<String>,
        #[arg(long, help = "Turn budget for the session")]
        max_turns: Option<u32>,
        #[arg(long, help = "Turn count that triggers a checkpoint")]
        checkpoint_at: Option<u32>,
    },
    /// List agents
    List {
        /// Include finished, terminated and handed-off agents
        #[arg(long, help = "Include agents in terminal states")]
        all: bool,
    },
    /// Record a heartbeat for an agent
    Heartbeat {
        agent_id: String,
        #[arg(long, help = "Node the agent is working on")]
        task: Option<String>,
        #[arg(long, default_value = "0.0", help = "Progress in [0, 1]")]
        progress: f64,
        #[arg(long, default_value = "", help = "Free-form status message")]
        message: String,
    },
    /// Stop an agent taking new work
    WindDown { agent_id: String },
    /// End an agent session that holds no claim
    Finish { agent_id: String },
}

#[derive(Subcommand)]
pub enum BundleAction {
    /// Create or replace a bundle from a JSON file
    Add {
        #[arg(long, help = "JSON file describing the bundle")]
        file: PathBuf,
    },
    /// List active bundles
    List {
        #[arg(long, help = "Only bundles in this domain")]
        domain: Option<String>,
    },
    /// Hide a bundle from listings
    Deactivate { slug: String },
}
