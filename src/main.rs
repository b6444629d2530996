//! FleetStor command-line coordinator
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           fleetstor                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Registry   │───▶│ Coordinator  │───▶│  S3 nodes    │       │
//! │  │  (jsonl log) │    │  (fan-out)   │    │  (HTTP/SigV4)│       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One-shot commands print JSON on stdout. `serve` keeps probing the fleet
//! and exposes `/metrics` and `/healthz`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetstor::adapters::{FileRegistryStore, S3NodeTransport, S3TransportConfig};
use fleetstor::domain::NodeSpec;
use fleetstor::error::{Error, Result};
use fleetstor::fleet::DEFAULT_CAPACITY_METRIC;
use fleetstor::telemetry::FleetMetrics;
use fleetstor::{Coordinator, FleetConfig, NodeId, PlacementPolicy, Upload};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FleetStor - one logical object store over many S3 nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node registry file
    #[arg(long, env = "FLEETSTOR_REGISTRY", default_value = "registry.jsonl")]
    registry: PathBuf,

    /// Bucket holding objects on every node
    #[arg(long, env = "FLEETSTOR_BUCKET", default_value = "dataspace")]
    bucket: String,

    /// Signing region
    #[arg(long, env = "FLEETSTOR_REGION", default_value = "us-east-1")]
    region: String,

    /// Maximum concurrent per-node calls in one fan-out
    #[arg(long, env = "MAX_CONCURRENT_PROBES", default_value = "10")]
    max_concurrent_probes: usize,

    /// Ping timeout in milliseconds
    #[arg(long, env = "PING_TIMEOUT_MS", default_value = "2000")]
    ping_timeout_ms: u64,

    /// Timeout of every other node request in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value = "30")]
    request_timeout_seconds: u64,

    /// Deadline for a whole fan-out round in milliseconds
    #[arg(long, env = "FANOUT_DEADLINE_MS")]
    fanout_deadline_ms: Option<u64>,

    /// Place objects even when no node has room (least negative wins)
    #[arg(long, env = "ALLOW_OVERCOMMIT")]
    allow_overcommit: bool,

    /// Prometheus gauge holding a node's free bytes
    #[arg(long, env = "CAPACITY_METRIC", default_value = DEFAULT_CAPACITY_METRIC)]
    capacity_metric: String,

    /// Lifetime of download links in seconds
    #[arg(long, env = "LINK_EXPIRY_SECONDS", default_value = "3600")]
    link_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register nodes from a JSON file or a single set of flags
    AddNodes {
        /// JSON array of {url, token, access_key, secret_key}
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        #[arg(long, requires_all = ["token", "access_key", "secret_key"])]
        url: Option<String>,

        /// Metrics bearer token
        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        access_key: Option<String>,

        #[arg(long)]
        secret_key: Option<String>,
    },

    /// Probe every node and print the healthy ones
    Health,

    /// Search the fleet
    Search {
        /// Tag filter `key=value`, repeatable; all must match
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,

        /// File extension, e.g. `csv`
        #[arg(long, conflicts_with = "tags")]
        extension: Option<String>,

        /// Content type, e.g. `text/csv`
        #[arg(long, conflicts_with_all = ["tags", "extension"])]
        content_type: Option<String>,
    },

    /// List every object in the fleet
    List {
        /// Include metadata and tags for each object
        #[arg(long)]
        details: bool,

        /// Only keys containing this substring (with --details)
        #[arg(long, requires = "details")]
        filter: Option<String>,
    },

    /// Upload a file to the node with the most free capacity
    Put {
        /// Local file to upload
        path: PathBuf,

        /// Object key (defaults to the file name)
        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        content_type: Option<String>,

        /// Tag `key=value`, repeatable
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
    },

    /// Show metadata and tags of an object
    Describe {
        #[arg(long)]
        node: String,

        #[arg(long)]
        key: String,
    },

    /// Print a time-limited download link for an object
    Link {
        #[arg(long)]
        node: String,

        #[arg(long)]
        key: String,
    },

    /// Rewrite the registry file with one line per node
    Compact,

    /// Probe the fleet periodically and serve metrics and health endpoints
    Serve {
        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        metrics_addr: String,

        /// Health server bind address
        #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
        health_addr: String,

        /// Seconds between health probes
        #[arg(long, env = "PROBE_INTERVAL_SECONDS", default_value = "30")]
        probe_interval_seconds: u64,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty tag key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn fleet_config(args: &Args) -> FleetConfig {
    FleetConfig {
        max_concurrency: args.max_concurrent_probes,
        ping_timeout: Duration::from_millis(args.ping_timeout_ms),
        fanout_deadline: args.fanout_deadline_ms.map(Duration::from_millis),
        capacity_metric: args.capacity_metric.clone(),
        link_expiry: Duration::from_secs(args.link_expiry_seconds),
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let fleet_config = fleet_config(&args);
    let policy = PlacementPolicy {
        allow_overcommit: args.allow_overcommit,
    };
    let transport = Arc::new(S3NodeTransport::new(S3TransportConfig {
        bucket: args.bucket.clone(),
        region: args.region.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_seconds),
        ..Default::default()
    })?);
    let store = Arc::new(FileRegistryStore::new(&args.registry));

    info!(registry = %args.registry.display(), bucket = %args.bucket, "Starting FleetStor");

    let coordinator = Arc::new(Coordinator::bootstrap(fleet_config, policy, transport, store).await?);

    match args.command {
        Command::AddNodes {
            file,
            url,
            token,
            access_key,
            secret_key,
        } => {
            let specs = match (file, url) {
                (Some(path), _) => {
                    let contents = tokio::fs::read_to_string(&path).await?;
                    serde_json::from_str::<Vec<NodeSpec>>(&contents)?
                }
                (None, Some(url)) => vec![NodeSpec {
                    url,
                    token: token.unwrap_or_default(),
                    access_key: access_key.unwrap_or_default(),
                    secret_key: secret_key.unwrap_or_default(),
                }],
                (None, None) => {
                    return Err(Error::Config("add-nodes needs --file or --url".into()))
                }
            };
            let failed = coordinator.add_nodes(specs).await?;
            print_json(&serde_json::json!({ "failed": failed }))?;
        }
        Command::Health => {
            let healthy = coordinator.fleet_health().await;
            print_json(&healthy.aliases())?;
        }
        Command::Search {
            tags,
            extension,
            content_type,
        } => {
            let result = match (extension, content_type) {
                (Some(ext), _) => coordinator.search_by_extension(&ext).await,
                (None, Some(ct)) => coordinator.search_by_content_type(&ct).await,
                (None, None) if !tags.is_empty() => {
                    coordinator
                        .search_by_tags(tags.into_iter().collect())
                        .await
                }
                (None, None) => coordinator.list_all().await,
            };
            print_json(&result)?;
        }
        Command::List { details, filter } => {
            if details {
                let objects = coordinator.list_all_with_details(filter.as_deref()).await;
                print_json(&objects)?;
            } else {
                print_json(&coordinator.list_all().await)?;
            }
        }
        Command::Put {
            path,
            key,
            content_type,
            tags,
        } => {
            let key = match key {
                Some(key) => key,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::Config(format!("{} has no file name", path.display())))?,
            };
            let body = tokio::fs::read(&path).await?;
            let upload = Upload {
                key,
                body: body.into(),
                content_type,
                tags: tags.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let stored = coordinator.place_and_store(upload).await?;
            print_json(&stored)?;
        }
        Command::Describe { node, key } => {
            let details = coordinator.describe(&NodeId::from(node), &key).await?;
            print_json(&details)?;
        }
        Command::Link { node, key } => {
            let link = coordinator.dataset_link(&NodeId::from(node), &key).await?;
            println!("{link}");
        }
        Command::Compact => {
            let records = coordinator.registry().compact().await?;
            print_json(&serde_json::json!({ "records": records }))?;
        }
        Command::Serve {
            metrics_addr,
            health_addr,
            probe_interval_seconds,
        } => {
            serve(
                coordinator,
                metrics_addr,
                health_addr,
                Duration::from_secs(probe_interval_seconds.max(1)),
            )
            .await?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => args.log_level.to_lowercase(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn")));

    // Logs go to stderr so command output on stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Serve Mode
// =============================================================================

async fn serve(
    coordinator: Arc<Coordinator>,
    metrics_addr: String,
    health_addr: String,
    probe_interval: Duration,
) -> Result<()> {
    let token = CancellationToken::new();

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                token.cancel();
            }
        });
    }

    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics = coordinator.metrics().clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!(interval_secs = probe_interval.as_secs(), "Starting probe loop");
    let mut ticker = tokio::time::interval(probe_interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let healthy = coordinator.fleet_health().await;
                let registered = coordinator.registry().len();
                if healthy.len() < registered {
                    warn!(healthy = healthy.len(), registered, "Some nodes are unreachable");
                } else {
                    info!(healthy = healthy.len(), "Fleet healthy");
                }
            }
        }
    }

    info!("FleetStor shutdown complete");
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<
        hyper::Response<http_body_util::Full<hyper::body::Bytes>>,
        std::convert::Infallible,
    > {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: FleetMetrics) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let metrics = metrics.clone();
            async move {
                let response = match req.uri().path() {
                    "/metrics" => match metrics.encode() {
                        Ok(buffer) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = metrics.content_type().parse() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                        }
                    },
                    _ => text_response(StatusCode::NOT_FOUND, "not found"),
                };
                Ok::<_, std::convert::Infallible>(response)
            }
        });

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
