pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::store::DEFAULT_PAGE_SIZE;

#[derive(Parser)]
#[command(name = "localbooks")]
#[command(about = "Read web novels through user-defined extraction rules", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of ~/.config/localbooks/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage extraction rules
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// Search one source for a keyword
    Search {
        rule_id: i64,
        keyword: String,
    },
    /// Show a novel's details
    Novel {
        rule_id: i64,
        /// URL of the novel's page on the source site
        url: String,
        /// Skip the cache and fetch from the source
        #[arg(long)]
        network: bool,
    },
    /// List a novel's chapters
    Chapters {
        rule_id: i64,
        url: String,
        #[arg(long)]
        network: bool,
    },
    /// Print a chapter
    Read {
        rule_id: i64,
        url: String,
        chapter_id: String,
        #[arg(long)]
        network: bool,
    },
    /// Download every chapter of a novel into the cache
    Download {
        rule_id: i64,
        url: String,
    },
    /// Inspect or manage the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or change runtime settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
pub enum RuleAction {
    /// Add a rule from a TOML file
    Add {
        path: PathBuf,
    },
    /// List rules
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
        /// updated_at, created_at or name
        #[arg(long, default_value = "updated_at")]
        sort_by: String,
    },
    /// Show one rule
    Show {
        id: i64,
    },
    /// Update a rule with the fields present in a TOML file
    Update {
        id: i64,
        path: PathBuf,
    },
    /// Delete a rule
    Remove {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Entry count, size and location
    Info,
    /// Move the cache to another directory
    SetDir {
        path: PathBuf,
    },
    /// Delete every cached novel and chapter
    Clear,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show effective settings
    Show,
    /// Store a setting (cache_enabled, cache_expiration, cache_directory)
    Set {
        key: String,
        value: String,
    },
}
