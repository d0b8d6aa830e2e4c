use std::{io, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    endpoints, AlwaysConfirm, ConfirmGate, HttpTransport, ResourceSynchronizer, Session,
    SessionContext, SyncError, Transport,
};
use shared::{
    domain::ProviderId,
    protocol::{
        Category, GalleryImage, Job, Product, Provider, Review, StatusMedia, Subcategory,
        Subscription, SubscriptionPlan, User,
    },
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::PromptGate;
use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Admin back office console")]
struct Cli {
    /// Config file (defaults to ./admin.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured API base url.
    #[arg(long)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists a collection, optionally narrowed by `--filter name=value`.
    List {
        resource: ResourceKind,
        #[arg(long)]
        provider: Option<i64>,
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,
        #[arg(long)]
        json: bool,
        /// Print the selectable values of each filter after the listing.
        #[arg(long)]
        domains: bool,
    },
    /// Creates a record from a JSON payload.
    Create {
        resource: ResourceKind,
        #[arg(long)]
        data: String,
    },
    Update {
        resource: ResourceKind,
        id: i64,
        #[arg(long)]
        data: String,
    },
    /// Deletes a record after confirmation.
    Delete {
        resource: ResourceKind,
        id: i64,
        #[arg(long)]
        provider: Option<i64>,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    Dashboard {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResourceKind {
    Users,
    Providers,
    Jobs,
    Categories,
    Subcategories,
    Reviews,
    Plans,
    Subscriptions,
    Gallery,
    StatusMedia,
    Products,
}

fn require_provider(kind: ResourceKind, provider: Option<i64>) -> Result<ProviderId> {
    provider
        .map(ProviderId)
        .with_context(|| format!("{kind:?} is scoped to a provider; pass --provider <id>"))
}

/// Binds `$sync` to a synchronizer of the record type behind `$kind` and
/// evaluates `$body` with it.
macro_rules! with_resource {
    ($kind:expr, $provider:expr, $transport:expr, |$sync:ident| $body:expr) => {
        match $kind {
            ResourceKind::Users => {
                let $sync = ResourceSynchronizer::<User>::new($transport, endpoints::users());
                $body
            }
            ResourceKind::Providers => {
                let $sync =
                    ResourceSynchronizer::<Provider>::new($transport, endpoints::providers());
                $body
            }
            ResourceKind::Jobs => {
                let $sync = ResourceSynchronizer::<Job>::new($transport, endpoints::jobs());
                $body
            }
            ResourceKind::Categories => {
                let $sync =
                    ResourceSynchronizer::<Category>::new($transport, endpoints::categories());
                $body
            }
            ResourceKind::Subcategories => {
                let $sync = ResourceSynchronizer::<Subcategory>::new(
                    $transport,
                    endpoints::subcategories(),
                );
                $body
            }
            ResourceKind::Reviews => {
                let $sync = ResourceSynchronizer::<Review>::new($transport, endpoints::reviews());
                $body
            }
            ResourceKind::Plans => {
                let $sync =
                    ResourceSynchronizer::<SubscriptionPlan>::new($transport, endpoints::plans());
                $body
            }
            ResourceKind::Subscriptions => {
                let $sync = ResourceSynchronizer::<Subscription>::new(
                    $transport,
                    endpoints::subscriptions(),
                );
                $body
            }
            ResourceKind::Gallery => {
                let provider = require_provider($kind, $provider)?;
                let $sync = ResourceSynchronizer::<GalleryImage>::new(
                    $transport,
                    endpoints::provider_gallery(provider),
                );
                $body
            }
            ResourceKind::StatusMedia => {
                let provider = require_provider($kind, $provider)?;
                let $sync = ResourceSynchronizer::<StatusMedia>::new(
                    $transport,
                    endpoints::provider_status_media(provider),
                );
                $body
            }
            ResourceKind::Products => {
                let provider = require_provider($kind, $provider)?;
                let $sync = ResourceSynchronizer::<Product>::new(
                    $transport,
                    endpoints::provider_products(provider),
                );
                $body
            }
        }
    };
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn connect(cli: &Cli) -> Result<Arc<dyn Transport>> {
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        settings.api_base_url = base_url.clone();
    }
    let token = settings
        .token
        .clone()
        .ok_or(SyncError::Unauthenticated)
        .context("no admin token configured; set ADMIN_TOKEN or `token` in admin.toml")?;

    let session = Session::new(&settings.api_base_url, token)?;
    let context = SessionContext::new();
    context.establish(session).await;
    let transport = HttpTransport::with_timeout(context, settings.request_timeout())?;
    Ok(Arc::new(transport))
}

async fn run(cli: Cli) -> Result<()> {
    let transport = connect(&cli).await?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::List {
            resource,
            provider,
            filters,
            json,
            domains,
        } => {
            let filters = filters
                .iter()
                .map(|raw| commands::parse_filter(raw))
                .collect::<Result<Vec<_>>>()?;
            let options = commands::ListOptions { json, domains };
            with_resource!(resource, provider, transport.clone(), |sync| {
                commands::log_events(sync.subscribe());
                let result = commands::list(&sync, &filters, options, &mut out).await;
                sync.detach().await;
                result
            })
        }
        Command::Create { resource, data } => {
            with_resource!(resource, None, transport.clone(), |sync| {
                commands::log_events(sync.subscribe());
                let result = commands::create(&sync, &data, &mut out).await;
                sync.detach().await;
                result
            })
        }
        Command::Update { resource, id, data } => {
            with_resource!(resource, None, transport.clone(), |sync| {
                commands::log_events(sync.subscribe());
                let result = commands::update(&sync, id, &data, &mut out).await;
                sync.detach().await;
                result
            })
        }
        Command::Delete {
            resource,
            id,
            provider,
            yes,
        } => {
            let gate: &dyn ConfirmGate = if yes { &AlwaysConfirm } else { &PromptGate };
            with_resource!(resource, provider, transport.clone(), |sync| {
                commands::log_events(sync.subscribe());
                let result = commands::delete(&sync, id, gate, &mut out).await;
                sync.detach().await;
                result
            })
        }
        Command::Dashboard { json } => commands::dashboard(transport.as_ref(), json, &mut out).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    info!(command = ?cli.command, "console: starting");

    let result = run(cli).await;
    if let Err(err) = &result {
        if let Some(sync_err) = err.downcast_ref::<SyncError>() {
            eprintln!("{}", sync_err.user_message());
        }
    }
    result
}
