mod adapters;
mod config;
mod core;
mod review;
mod server;

use crate::adapters::host::SourceControl;
use crate::adapters::llm::{create_adapter, LLMAdapter};
use crate::adapters::{GitHubClient, GitLabClient};
use crate::config::{Config, ReviewMode};
use crate::core::diff_parser::DiffParser;
use crate::core::reconciler::{FilePositionMaps, Reconciler};
use crate::core::review_parser::ReviewParser;
use crate::review::{ReviewEvent, ReviewOrchestrator};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pr-reviewer")]
#[command(about = "Reviews pull requests with an LLM and posts line-anchored feedback", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Model id (overrides MODEL_ID)")]
    model: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<usize>,

    #[arg(long, global = true, value_enum)]
    mode: Option<ReviewMode>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the webhook server")]
    Serve {
        #[arg(long, help = "Listen address (overrides BIND_ADDRESS)")]
        bind: Option<String>,
    },
    #[command(about = "Review one pull request")]
    Pr {
        #[arg(long, help = "owner/name on GitHub, project path or id on GitLab")]
        repo: String,

        #[arg(long)]
        number: u64,

        #[arg(long, value_enum, default_value = "github")]
        host: HostKind,

        #[arg(long, help = "Post the review instead of printing it")]
        post: bool,
    },
    #[command(about = "Print the line-to-position map of a patch")]
    Positions {
        #[arg(long, help = "Patch file (reads from stdin if not provided)")]
        patch: Option<PathBuf>,
    },
    #[command(about = "Parse review text into findings")]
    Parse {
        #[arg(long, help = "Review text file (reads from stdin if not provided)")]
        review: Option<PathBuf>,

        #[arg(
            long = "patch",
            value_name = "PATH=PATCH_FILE",
            help = "Reconcile findings against this file's patch (repeatable)"
        )]
        patches: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum HostKind {
    Github,
    Gitlab,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load()?;
    config.merge_with_cli(cli.model, cli.temperature, cli.max_tokens);
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }

    match cli.command {
        Commands::Serve { bind } => serve_command(config, bind).await,
        Commands::Pr {
            repo,
            number,
            host,
            post,
        } => pr_command(config, host, repo, number, post).await,
        Commands::Positions { patch } => positions_command(patch).await,
        Commands::Parse { review, patches } => parse_command(review, patches).await,
    }
}

async fn serve_command(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    let missing = config.validate();
    if !missing.is_empty() {
        error!("Missing required environment variables: {}", missing.join(", "));
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let llm: Arc<dyn LLMAdapter> = Arc::from(create_adapter(&config.model_config())?);

    let github = match &config.github.token {
        Some(token) => {
            let client = GitHubClient::new(config.github_api_url(), token.as_str())?;
            Some(Arc::new(ReviewOrchestrator::new(
                Arc::new(client),
                llm.clone(),
                config.clone(),
            )))
        }
        None => None,
    };
    let gitlab = match &config.gitlab.token {
        Some(token) => {
            let client = GitLabClient::new(config.gitlab_api_url(), token.as_str())?;
            Some(Arc::new(ReviewOrchestrator::new(
                Arc::new(client),
                llm.clone(),
                config.clone(),
            )))
        }
        None => None,
    };

    info!("Starting AI Code Review Agent");
    info!("Model: {}", config.model);
    if let Some(url) = &config.base_url {
        info!("LLM endpoint: {}", url);
    }

    server::serve(server::AppState {
        config,
        llm,
        github,
        gitlab,
    })
    .await
}

fn build_host(config: &Config, kind: HostKind) -> Result<Arc<dyn SourceControl>> {
    let host: Arc<dyn SourceControl> = match kind {
        HostKind::Github => {
            let token = config.github.token.as_deref().context("GITHUB_TOKEN is not set")?;
            Arc::new(GitHubClient::new(config.github_api_url(), token)?)
        }
        HostKind::Gitlab => {
            let token = config.gitlab.token.as_deref().context("GITLAB_TOKEN is not set")?;
            Arc::new(GitLabClient::new(config.gitlab_api_url(), token)?)
        }
    };
    Ok(host)
}

async fn pr_command(
    config: Config,
    kind: HostKind,
    repo: String,
    number: u64,
    post: bool,
) -> Result<()> {
    let config = Arc::new(config);
    let llm: Arc<dyn LLMAdapter> = Arc::from(create_adapter(&config.model_config())?);
    let reviewer = ReviewOrchestrator::new(build_host(&config, kind)?, llm, config.clone());

    info!("Reviewing {}#{} with model {}", repo, number, config.model);

    if post {
        let pr = reviewer
            .host()
            .fetch_pull_request(&repo, number)
            .await
            .context("Failed to fetch pull request metadata")?;
        let event = ReviewEvent {
            repository: repo,
            pr_number: number,
            head_sha: Some(pr.head_sha),
            head_branch: pr.head_branch,
            base_branch: pr.base_branch,
            title: pr.title,
            description: pr.description,
            clone_url: pr.clone_url,
        };
        let run = reviewer.run(&event).await?;
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    match reviewer.analyze(&repo, number).await? {
        Some(analysis) => println!("{}", serde_json::to_string_pretty(&analysis)?),
        None => println!("{}", json!({ "outcome": "no_changes" })),
    }
    Ok(())
}

async fn positions_command(patch: Option<PathBuf>) -> Result<()> {
    let patch = read_input(patch).await?;
    let map = DiffParser::build_position_map(&patch);
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

async fn parse_command(review: Option<PathBuf>, patches: Vec<String>) -> Result<()> {
    let review = read_input(review).await?;
    let findings = ReviewParser::parse(&review);

    if patches.is_empty() {
        println!("{}", serde_json::to_string_pretty(&findings)?);
        return Ok(());
    }

    let mut maps = FilePositionMaps::new();
    for spec in patches {
        let (path, patch_file) = spec
            .split_once('=')
            .with_context(|| format!("Expected PATH=PATCH_FILE, got {spec}"))?;
        let patch = tokio::fs::read_to_string(patch_file)
            .await
            .with_context(|| format!("Failed to read {patch_file}"))?;
        maps.insert(path.to_string(), DiffParser::build_position_map(&patch));
    }

    let reconciliation = Reconciler::reconcile(&findings, &maps);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "findings": findings,
            "reconciliation": reconciliation,
        }))?
    );
    Ok(())
}

async fn read_input(path: Option<PathBuf>) -> Result<String> {
    if let Some(path) = path {
        return tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("No input file given and stdin is a terminal");
    }
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}
