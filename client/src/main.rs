use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use client::admin::parse_fields;
use client::{AdminConsole, ApiClient, LiveView, SseBridge, screens};
use shared::config::load_client_config;
use shared::realtime::{RefreshPolicy, UpdateHub};
use shared::types::{
    ClientConfig, ContentFields, EntityKind, FeaturedFields, HighlightFields, LeagueFields,
    MatchFields, VideoFields,
};

/// Sports content client: watch a live screen or perform admin writes.
#[derive(Parser, Debug)]
#[command(name = "client", version, about)]
struct Args {
    /// Path to the client TOML config file
    #[arg(short, long, default_value = "client.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a screen's data every time it refreshes
    Watch {
        #[arg(short, long, value_enum, default_value_t = Screen::Home)]
        screen: Screen,
    },
    /// Mutate content through the admin surface
    Admin {
        /// match, league, video, highlight or featured
        kind: EntityKind,
        #[command(subcommand)]
        op: AdminOp,
    },
}

#[derive(Subcommand, Debug)]
enum AdminOp {
    Create {
        /// Entity fields as a JSON object
        #[arg(long)]
        data: String,
    },
    Update {
        /// Not needed for the featured video
        id: Option<i64>,
        #[arg(long)]
        data: String,
    },
    Delete {
        id: Option<i64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Screen {
    Home,
    Matches,
    Leagues,
    Videos,
    Highlights,
    Featured,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_client_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let hub = UpdateHub::new();
    let api = ApiClient::new(&config.api);

    match args.command {
        Command::Watch { screen } => watch(&config, &hub, &api, screen).await,
        Command::Admin { kind, op } => {
            let console = AdminConsole::new(api, hub.emitter.clone());
            let result = admin(&console, kind, op).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn watch(config: &ClientConfig, hub: &UpdateHub, api: &ApiClient, screen: Screen) -> Result<()> {
    let bridge = SseBridge::new(api.clone(), config.refresh.reconnect_delay());
    bridge.attach(&hub.channel);

    let policy = RefreshPolicy::from(&config.refresh);
    let result = match screen {
        Screen::Home => run_view(screens::home(hub, api, policy)).await,
        Screen::Matches => run_view(screens::matches(hub, api, policy)).await,
        Screen::Leagues => run_view(screens::leagues(hub, api, policy)).await,
        Screen::Videos => run_view(screens::videos(hub, api, policy)).await,
        Screen::Highlights => run_view(screens::highlights(hub, api, policy)).await,
        Screen::Featured => run_view(screens::featured(hub, api, policy)).await,
    };

    bridge.detach(&hub.channel);
    result
}

async fn run_view<T>(view: LiveView<T>) -> Result<()>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    view.mount().await?;
    let mut rx = view.watch();
    let current = rx.borrow_and_update().clone();
    print_snapshot(view.name(), &current)?;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = rx.borrow_and_update().clone();
                print_snapshot(view.name(), &current)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, unmounting {}", view.name());
                break;
            }
        }
    }

    view.unmount();
    let stats = view.stats();
    info!(
        "{}: {} reloads completed, {} failed, {} timed out, {} events dropped",
        view.name(),
        stats.completed,
        stats.failed,
        stats.timed_out,
        stats.dropped
    );
    Ok(())
}

fn print_snapshot<T: Serialize>(name: &str, snapshot: &Option<T>) -> Result<()> {
    match snapshot {
        Some(data) => println!("── {} ──\n{}", name, serde_json::to_string_pretty(data)?),
        None => println!("── {} ── (not loaded)", name),
    }
    Ok(())
}

async fn admin(console: &AdminConsole, kind: EntityKind, op: AdminOp) -> Result<serde_json::Value> {
    match kind {
        EntityKind::Match => write::<MatchFields>(console, op).await,
        EntityKind::League => write::<LeagueFields>(console, op).await,
        EntityKind::Video => write::<VideoFields>(console, op).await,
        EntityKind::Highlight => write::<HighlightFields>(console, op).await,
        EntityKind::Featured => match op {
            AdminOp::Create { data } | AdminOp::Update { data, .. } => {
                let fields: FeaturedFields = parse_fields(&data)?;
                Ok(serde_json::to_value(console.set_featured(&fields).await?)?)
            }
            AdminOp::Delete { .. } => Ok(serde_json::to_value(console.clear_featured().await?)?),
        },
    }
}

async fn write<F: ContentFields>(console: &AdminConsole, op: AdminOp) -> Result<serde_json::Value> {
    let value = match op {
        AdminOp::Create { data } => {
            serde_json::to_value(console.create(&parse_fields::<F>(&data)?).await?)?
        }
        AdminOp::Update { id, data } => {
            let Some(id) = id else {
                bail!("update {} needs an id", F::KIND);
            };
            serde_json::to_value(console.update(id, &parse_fields::<F>(&data)?).await?)?
        }
        AdminOp::Delete { id } => {
            let Some(id) = id else {
                bail!("delete {} needs an id", F::KIND);
            };
            serde_json::to_value(console.delete(F::KIND, id).await?)?
        }
    };
    Ok(value)
}
