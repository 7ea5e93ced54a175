//! Machine Pool Operator
//!
//! Reconciles Cluster API `GCPMachinePool` resources into Compute Engine
//! instance templates and managed instance groups.

use clap::Parser;
use kube::{Client, CustomResourceExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use machine_pool_operator::controller::{self, Context};
use machine_pool_operator::domain::ports::ComputeProviderRef;
use machine_pool_operator::{
    Error, GceCompute, GceConfig, GcpMachinePool, InMemoryCompute, InstrumentedCompute, Metrics,
    Result, TokenSource,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Machine Pool Operator - GCPMachinePool to managed instance groups
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Only watch this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// GCP project owning the instance templates and groups
    #[arg(long, env = "GCP_PROJECT", default_value = "")]
    project: String,

    /// Compute API endpoint
    #[arg(long, env = "GCE_ENDPOINT", default_value = machine_pool_operator::cloud::gce::DEFAULT_ENDPOINT)]
    gce_endpoint: String,

    /// Static access token (defaults to the metadata server)
    #[arg(long, env = "GCE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// File holding an access token, re-read periodically
    #[arg(long, env = "GCE_TOKEN_FILE", conflicts_with = "access_token")]
    token_file: Option<PathBuf>,

    /// Upper bound on waiting for a Compute operation, in seconds
    #[arg(long, env = "OPERATION_TIMEOUT", default_value = "300")]
    operation_timeout_secs: u64,

    /// Keep provider resources in memory instead of calling Compute Engine
    #[arg(long, env = "IN_MEMORY_PROVIDER")]
    in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the GCPMachinePool CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        let crd = serde_yaml::to_string(&GcpMachinePool::crd())
            .map_err(|e| Error::Internal(format!("Serializing CRD: {}", e)))?;
        print!("{}", crd);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);

    info!("Starting Machine Pool Operator");
    info!("  Version: {}", machine_pool_operator::VERSION);
    info!("  Namespace: {}", args.namespace.as_deref().unwrap_or("*"));
    info!("  Provider: {}", if args.in_memory { "memory" } else { "gce" });

    let metrics = Arc::new(Metrics::new()?);
    let compute: ComputeProviderRef = Arc::new(InstrumentedCompute::new(
        build_provider(&args)?,
        metrics.clone(),
    ));

    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Abort in-flight provider calls on Ctrl-C
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_token.cancel();
        }
    });

    let ctx = Arc::new(Context::new(client.clone(), compute, metrics, shutdown.clone()));
    controller::run(client, ctx, args.namespace.as_deref()).await;

    shutdown.cancel();
    info!("Operator shutdown complete");
    Ok(())
}

fn build_provider(args: &Args) -> Result<ComputeProviderRef> {
    if args.in_memory {
        return Ok(Arc::new(InMemoryCompute::new(args.project.clone())));
    }

    let token_source = match (&args.access_token, &args.token_file) {
        (Some(token), _) => TokenSource::Static(token.clone()),
        (None, Some(path)) => TokenSource::File(path.clone()),
        (None, None) => TokenSource::MetadataServer,
    };

    let gce = GceCompute::new(GceConfig {
        endpoint: args.gce_endpoint.trim_end_matches('/').to_string(),
        project: args.project.clone(),
        operation_timeout: Duration::from_secs(args.operation_timeout_secs),
        token_source,
        ..Default::default()
    })?;
    Ok(Arc::new(gce))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => Response::new(Body::from("ok")),
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<Metrics>) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = if req.uri().path() != "/metrics" {
                        let mut response = Response::new(Body::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = content_type.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
