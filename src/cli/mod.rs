use std::io::IsTerminal;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::controller::session::SearchSession;
use crate::controller::{ControllerConfig, DEFAULT_MIN_DISEASES, Event, Phase, SearchController};
use crate::entities::QueryMode;
use crate::error::DrugBaseError;
use crate::render;
use crate::render::markdown::PaginationFooterMode;
use crate::sources::drugbase::DrugBaseClient;

pub mod health;
pub mod shell;

#[derive(Parser, Debug)]
#[command(
    name = "drugbase",
    version,
    about = "Search drugs, diseases, and multi-disease treatments on a DrugBase backend"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Backend base URL (overrides DRUGBASE_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one page of results and exit
    Search {
        #[command(subcommand)]
        entity: SearchEntity,
    },
    /// Interactive search with debounced input and paging
    Shell {
        /// Starting query mode
        #[arg(long, value_enum, default_value_t = QueryMode::Drug)]
        mode: QueryMode,

        /// Starting minimum disease count for multi mode
        #[arg(long, default_value_t = DEFAULT_MIN_DISEASES)]
        min_diseases: u32,
    },
    /// Check backend connectivity
    Health,
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum SearchEntity {
    /// Search drugs by brand name
    Drug {
        /// Search term (multiple words are joined)
        #[arg(required = true, num_args = 1..)]
        term: Vec<String>,

        #[command(flatten)]
        page: PageArgs,
    },
    /// Search drugs by the disease they treat
    Disease {
        /// Disease name (multiple words are joined)
        #[arg(required = true, num_args = 1..)]
        term: Vec<String>,

        #[command(flatten)]
        page: PageArgs,
    },
    /// List drugs treating at least N diseases
    Multi {
        /// Minimum number of diseases treated
        #[arg(long, default_value_t = DEFAULT_MIN_DISEASES)]
        min_diseases: u32,

        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// 1-based page to fetch
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Show the full record for result N on the page
    #[arg(long, value_name = "N")]
    pub show: Option<usize>,
}

fn client(base_url: Option<&str>) -> Result<DrugBaseClient, DrugBaseError> {
    match base_url {
        Some(base) => DrugBaseClient::with_base(base),
        None => DrugBaseClient::new(),
    }
}

/// Drives a session to the requested page and renders it.
async fn search_page(
    client: DrugBaseClient,
    mode: QueryMode,
    term: Option<String>,
    min_diseases: u32,
    page: PageArgs,
    json: bool,
) -> anyhow::Result<String> {
    if page.page == 0 {
        return Err(DrugBaseError::InvalidArgument("--page must be at least 1".into()).into());
    }
    if min_diseases == 0 {
        return Err(
            DrugBaseError::InvalidArgument("--min-diseases must be at least 1".into()).into(),
        );
    }

    let config = ControllerConfig {
        debounce: Duration::ZERO,
        initial_mode: mode,
        min_diseases,
        ..ControllerConfig::from_env()
    };
    let mut session = SearchSession::new(SearchController::new(config), client);
    session.start();
    if let Some(term) = term {
        session.dispatch(Event::SearchTermChanged(term));
    }
    session.settle().await;

    for _ in 1..page.page {
        let ctl = session.controller();
        if ctl.phase() == Phase::Error || !ctl.can_go_next() {
            break;
        }
        session.run(Event::NextPageRequested).await;
    }

    let ctl = session.controller();
    if ctl.phase() == Phase::Error {
        return Err(DrugBaseError::Api {
            api: "drugbase".into(),
            message: ctl.notice().unwrap_or("Request failed").to_string(),
        }
        .into());
    }
    let reached = ctl.state().page_number();
    if reached < page.page {
        return Err(DrugBaseError::InvalidArgument(format!(
            "Page {} is past the last page ({reached})",
            page.page
        ))
        .into());
    }

    if let Some(n) = page.show {
        let results = ctl.normalized();
        let drug = n
            .checked_sub(1)
            .and_then(|idx| results.get(idx))
            .ok_or_else(|| {
                DrugBaseError::InvalidArgument(format!(
                    "--show {n} is out of range; page has {} results",
                    results.len()
                ))
            })?;
        return Ok(if json {
            render::json::to_pretty(drug)?
        } else {
            render::markdown::drug_detail_markdown(drug)?
        });
    }

    Ok(if json {
        render::json::search_page_json(ctl)?
    } else {
        render::markdown::search_page_markdown(ctl, PaginationFooterMode::Cli)?
    })
}

/// Runs a parsed CLI command and returns the text to print.
///
/// # Errors
///
/// Returns an error when arguments are invalid or the backend request fails.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let Cli {
        command,
        json,
        base_url,
    } = cli;

    match command {
        Commands::Search { entity } => {
            let client = client(base_url.as_deref())?;
            match entity {
                SearchEntity::Drug { term, page } => {
                    search_page(
                        client,
                        QueryMode::Drug,
                        Some(term.join(" ")),
                        DEFAULT_MIN_DISEASES,
                        page,
                        json,
                    )
                    .await
                }
                SearchEntity::Disease { term, page } => {
                    search_page(
                        client,
                        QueryMode::Disease,
                        Some(term.join(" ")),
                        DEFAULT_MIN_DISEASES,
                        page,
                        json,
                    )
                    .await
                }
                SearchEntity::Multi { min_diseases, page } => {
                    search_page(client, QueryMode::Multi, None, min_diseases, page, json).await
                }
            }
        }
        Commands::Shell { mode, min_diseases } => {
            let config = ControllerConfig {
                initial_mode: mode,
                min_diseases,
                ..ControllerConfig::from_env()
            };
            let session =
                SearchSession::new(SearchController::new(config), client(base_url.as_deref())?);
            let options = shell::ShellOptions {
                json,
                batch: !std::io::stdin().is_terminal(),
            };
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            shell::run(session, input, tokio::io::stdout(), options).await?;
            Ok(String::new())
        }
        Commands::Health => {
            let report = health::check(&client(base_url.as_deref())?).await;
            if json {
                Ok(render::json::to_pretty(&report)?)
            } else {
                Ok(report.to_markdown())
            }
        }
        Commands::Version => Ok(format!("drugbase {}", env!("CARGO_PKG_VERSION"))),
    }
}
