// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # smap-relay server
//!
//! HTTP front end for the sMAP relay, plus the administrative command that
//! adds credentials to a running server.
//!
//! ## Usage
//!
//! ```bash
//! # Republish as stored identities: POST /add/<vk>/uri/<base>
//! smap-relay-server serve --store relay.db --broker-url http://broker:9000
//!
//! # Route through the ontology: POST /add/<base>
//! smap-relay-server serve --mode ontology --entity relay.ent \
//!     --ontology-url http://ontology:8081
//!
//! # Add a credential to a running server
//! smap-relay-server add-entity --store relay.db --file new.ent \
//!     --pid-file relay.pid
//! smap-relay-server add-entity --store relay.db --file new.ent \
//!     --server http://localhost:8080
//! ```

mod app;
mod backend;
mod error;
mod metrics;
mod signals;

use app::{router, AppState, Mode, Routed};
use backend::{Broker, Ed25519IdentityFactory, HttpOntology};
use clap::{Args as ClapArgs, Parser, Subcommand};
use error::ServerError;
use serde::Deserialize;
use smap_relay::{
    write_credential, ClassResolver, CredentialStore, IdentityFactory, IngestStats, Ontology,
    RawCredential, RelayConfig, RelayError, UnitOfTime,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// sMAP to pub/sub relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Store a credential, reloading a running server around the write
    AddEntity(AddEntityArgs),
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Credential store file
    #[arg(short, long, default_value = "relay.db")]
    store: PathBuf,

    /// Write the process id here
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Ingest route to expose
    #[arg(short, long, value_enum, default_value = "identity")]
    mode: Mode,

    /// Credential the ontology route publishes as
    #[arg(short, long)]
    entity: Option<PathBuf>,

    /// Broker endpoint; without it publishes are only logged
    #[arg(long)]
    broker_url: Option<String>,

    /// Ontology query endpoint (ontology mode)
    #[arg(long)]
    ontology_url: Option<String>,

    /// Unit for published timestamps (s, ms, us, ns) or `raw`
    #[arg(long, default_value = "ns")]
    publish_unit: String,

    /// Seconds between ingest statistics log lines
    #[arg(long, default_value = "10")]
    stats_interval: u64,
}

#[derive(ClapArgs, Debug)]
struct AddEntityArgs {
    /// Credential store file
    #[arg(short, long, default_value = "relay.db")]
    store: PathBuf,

    /// Credential file (type byte followed by payload)
    #[arg(short, long)]
    file: PathBuf,

    /// Pid file of the running server; it is sent SIGUSR1 around the write
    #[arg(long, conflicts_with = "server")]
    pid_file: Option<PathBuf>,

    /// Base URL of the running server to reload over HTTP
    #[arg(long)]
    server: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.command {
        Command::Serve(serve_args) => serve(serve_args),
        Command::AddEntity(add_args) => add_entity(add_args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn parse_publish_unit(raw: &str) -> Result<Option<UnitOfTime>, ServerError> {
    if raw == "raw" {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e: smap_relay::ParseError| ServerError::Config(e.to_string()))
}

fn read_credential(path: &Path) -> Result<Vec<u8>, ServerError> {
    std::fs::read(path).map_err(|e| ServerError::io(path.display().to_string(), e))
}

/// Ontology routing: resolver plus the identity named by `--entity`
fn routed(
    args: &ServeArgs,
    factory: &Ed25519IdentityFactory,
) -> Result<Routed<backend::BrokerIdentity>, ServerError> {
    let entity = args
        .entity
        .as_deref()
        .ok_or_else(|| ServerError::Config("ontology mode needs --entity".to_string()))?;
    let url = args
        .ontology_url
        .as_deref()
        .ok_or_else(|| ServerError::Config("ontology mode needs --ontology-url".to_string()))?;

    let raw = RawCredential::parse(&read_credential(entity)?).map_err(RelayError::from)?;
    let (identity, _) = factory
        .create(raw.type_tag, &raw.payload)
        .map_err(RelayError::from)?;
    info!("Ontology route publishes as {}", identity.vk());

    let ontology: Arc<dyn Ontology> = Arc::new(HttpOntology::new(url)?);
    Ok(Routed {
        resolver: ClassResolver::new(ontology),
        identity: Arc::new(identity),
    })
}

fn serve(args: ServeArgs) -> Result<(), ServerError> {
    info!("smap-relay server v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::default().with_publish_unit(parse_publish_unit(&args.publish_unit)?);
    let factory = match &args.broker_url {
        Some(url) => Ed25519IdentityFactory::new(Broker::new(url)?),
        None => {
            warn!("No --broker-url given, publishes are only logged");
            Ed25519IdentityFactory::dry_run()
        }
    };
    let routed = match args.mode {
        Mode::Ontology => Some(routed(&args, &factory)?),
        Mode::Identity => None,
    };
    let store = Arc::new(CredentialStore::open(&args.store, factory)?);
    metrics::IDENTITIES_LOADED.set(store.identity_count() as i64);

    if let Some(pid_file) = &args.pid_file {
        std::fs::write(pid_file, std::process::id().to_string())
            .map_err(|e| ServerError::io(pid_file.display().to_string(), e))?;
    }

    let state = Arc::new(AppState {
        mode: args.mode,
        store,
        routed,
        config,
        stats: Arc::new(IngestStats::new()),
        started: Instant::now(),
    });

    // Blocking HTTP clients live in `state`; it must outlive the runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ServerError::io("runtime", e))?;
    let result = runtime.block_on(run(Arc::clone(&state), args.listen, args.stats_interval));
    drop(runtime);

    if let Some(pid_file) = &args.pid_file {
        if let Err(err) = std::fs::remove_file(pid_file) {
            warn!("Could not remove {}: {}", pid_file.display(), err);
        }
    }
    result
}

async fn run<F: IdentityFactory + 'static>(
    state: Arc<AppState<F>>,
    listen: SocketAddr,
    stats_interval: u64,
) -> Result<(), ServerError> {
    let stats = Arc::clone(&state.stats);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = stats.take();
            info!(
                received = snapshot.received,
                metadata = snapshot.metadata,
                readings = snapshot.readings,
                "ingest stats"
            );
        }
    });

    let store = Arc::clone(&state.store);
    tokio::spawn(async move {
        if let Err(err) = signals::reload_on_sigusr1(store).await {
            error!("Signal handler failed: {}", err);
        }
    });

    let app = router(state);
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| ServerError::io(format!("bind {}", listen), e))?;
    info!("Listening on http://{}", listen);
    info!("Metrics endpoint: http://{}/metrics", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(signals::shutdown())
        .await
        .map_err(|e| ServerError::io("serve", e))
}

#[derive(Deserialize)]
struct ReloadResponse {
    state: String,
}

/// Time a signalled server gets to finish one reload step
const SIGNAL_SETTLE: Duration = Duration::from_millis(250);

/// How `add-entity` reaches the running server
enum Reloader {
    /// No running server
    Offline,
    /// SIGUSR1 to the process recorded in the pid file
    Signal(i32),
    /// `POST /admin/reload`
    Http {
        client: reqwest::blocking::Client,
        server: String,
    },
}

impl Reloader {
    fn from_args(args: &AddEntityArgs) -> Result<Self, ServerError> {
        if let Some(pid_file) = &args.pid_file {
            return Ok(Reloader::Signal(signals::read_pid(pid_file)?));
        }
        Ok(match &args.server {
            Some(server) => Reloader::Http {
                client: reqwest::blocking::Client::new(),
                server: server.clone(),
            },
            None => Reloader::Offline,
        })
    }

    /// Take one reload step; the server should then be in `expected`
    fn step(&self, expected: &str) -> Result<(), ServerError> {
        match self {
            Reloader::Offline => Ok(()),
            Reloader::Signal(pid) => {
                signals::send_reload_signal(*pid)?;
                std::thread::sleep(SIGNAL_SETTLE);
                Ok(())
            }
            Reloader::Http { client, server } => remote_reload(client, server, expected),
        }
    }
}

/// Step a running server's reload and check the state it reports
fn remote_reload(
    client: &reqwest::blocking::Client,
    server: &str,
    expected: &str,
) -> Result<(), ServerError> {
    let response: ReloadResponse = client
        .post(format!("{}/admin/reload", server.trim_end_matches('/')))
        .send()?
        .error_for_status()?
        .json()?;
    if response.state != expected {
        return Err(ServerError::Http(format!(
            "server reached {} instead of {}",
            response.state, expected
        )));
    }
    info!("Server store {}", response.state);
    Ok(())
}

fn add_entity(args: AddEntityArgs) -> Result<(), ServerError> {
    let credential = read_credential(&args.file)?;
    let factory = Ed25519IdentityFactory::dry_run();
    // fail before touching the server if the file is unusable
    let raw = RawCredential::parse(&credential).map_err(RelayError::from)?;
    factory
        .verifying_key(raw.type_tag, &raw.payload)
        .map_err(RelayError::from)?;

    let reloader = Reloader::from_args(&args)?;
    reloader.step("closed")?;
    let written = write_credential(&args.store, &factory, &credential);
    reloader.step("open")?;

    let vk = written?;
    info!("Stored entity {}", vk);
    println!("{}", vk);
    Ok(())
}
