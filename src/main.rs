use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use localbooks::app::{AppContext, Result};
use localbooks::cli::{commands, CacheAction, Cli, Commands, RuleAction, SettingsAction};
use localbooks::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("localbooks={}", default_level)));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let outcome = match AppContext::new(config) {
        Ok(ctx) => run(&ctx, cli.command).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{}: {}", e.kind(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(ctx: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Rule { action } => match action {
            RuleAction::Add { path } => commands::add_rule(ctx, &path),
            RuleAction::List {
                page,
                page_size,
                sort_by,
            } => commands::list_rules(ctx, page, page_size, &sort_by),
            RuleAction::Show { id } => commands::show_rule(ctx, id),
            RuleAction::Update { id, path } => commands::update_rule(ctx, id, &path),
            RuleAction::Remove { id } => commands::remove_rule(ctx, id),
        },
        Commands::Search { rule_id, keyword } => commands::search(ctx, rule_id, &keyword).await,
        Commands::Novel {
            rule_id,
            url,
            network,
        } => commands::show_novel(ctx, rule_id, &url, network).await,
        Commands::Chapters {
            rule_id,
            url,
            network,
        } => commands::list_chapters(ctx, rule_id, &url, network).await,
        Commands::Read {
            rule_id,
            url,
            chapter_id,
            network,
        } => commands::read_chapter(ctx, rule_id, &url, &chapter_id, network).await,
        Commands::Download { rule_id, url } => commands::download(ctx, rule_id, &url).await,
        Commands::Cache { action } => match action {
            CacheAction::Info => commands::cache_info(ctx),
            CacheAction::SetDir { path } => commands::set_cache_dir(ctx, &path),
            CacheAction::Clear => commands::clear_cache(ctx),
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::show_settings(ctx),
            SettingsAction::Set { key, value } => commands::set_setting(ctx, &key, &value),
        },
    }
}
