//! query-store CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use query_store::application::{ApiClient, UsersApi};
use query_store::cli::{Cli, Commands};
use query_store::infrastructure::config::ConfigLoader;
use query_store::infrastructure::http::HttpBaseQuery;
use query_store::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        query_store::cli::handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
        ConfigLoader::validate(&config)?;
    }

    let _logger = LoggerImpl::init(&config.logging).context("Failed to initialize logging")?;

    let base_query = HttpBaseQuery::new(&config.api)?;
    let client = ApiClient::new(Arc::new(base_query), &config.cache);
    let users = UsersApi::new(client);

    match cli.command {
        Commands::Users(args) => query_store::cli::commands::users::execute(args, &users, cli.json).await,
    }
}
