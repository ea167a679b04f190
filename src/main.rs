//! fcgi-engine: FastCGI application server
//!
//! Accepts connections from a front-end web server (nginx, Apache, ...),
//! serves the built-in echo responder and allow-list authorizer, and keeps
//! every connection isolated from the others.
//!
//! Usage:
//!   fcgi-engine                                  # 127.0.0.1:9000, 8 workers
//!   fcgi-engine --listen 0.0.0.0:9001 --workers 32
//!   fcgi-engine --authorized-user alice --authorized-user bob
//!   fcgi-engine --no-authorizer --log-file /var/log/fcgi-engine.log

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fcgi_protocol::RoleKind;
use fcgi_roles::ServiceRegistry;
use fcgi_roles::authorizer::{AUTHORIZED_USERS_SERVICE, AuthorizedUsers};
use fcgi_roles::responder::{GREETING_SERVICE, Greeting};
use fcgi_server::{FcgiServer, RequestLimits, RoleRegistry, ServerInfo};
use fcgi_transport::{Service, ServiceConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fcgi-engine", about = "FastCGI application server")]
struct Cli {
    /// Address to listen on (port 0 for OS-assigned)
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: String,

    /// Connections served concurrently
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Pending connections the kernel may queue
    #[arg(long, default_value = "128")]
    backlog: u32,

    /// Per read/write timeout on a connection
    #[arg(long, default_value = "30")]
    io_timeout_secs: u64,

    /// Largest PARAMS stream accepted per request
    #[arg(long, default_value = "1048576")]
    max_params_bytes: usize,

    /// Largest STDIN body accepted per request
    #[arg(long, default_value = "67108864")]
    max_body_bytes: usize,

    /// Greeting printed by the echo responder
    #[arg(long)]
    greeting: Option<String>,

    /// User allowed by the authorizer (repeatable)
    #[arg(long = "authorized-user")]
    authorized_users: Vec<String>,

    /// Request parameter the authorizer checks
    #[arg(long, default_value = "REMOTE_USER")]
    auth_param: String,

    /// Do not serve the AUTHORIZER role
    #[arg(long)]
    no_authorizer: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_services(cli: &Cli) -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    if let Some(ref greeting) = cli.greeting {
        services.register(GREETING_SERVICE, Greeting(greeting.clone()));
    }
    if !cli.no_authorizer {
        let users = AuthorizedUsers::new(cli.authorized_users.iter().cloned())
            .with_param(cli.auth_param.clone());
        services.register(AUTHORIZED_USERS_SERVICE, users);
    }
    services
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = ServiceConfig {
        listen_address: cli.listen.clone(),
        worker_count: cli.workers.max(1),
        accept_queue_depth: cli.backlog,
        io_timeout: Duration::from_secs(cli.io_timeout_secs.max(1)),
    };
    let limits = RequestLimits {
        max_params_bytes: cli.max_params_bytes,
        max_body_bytes: cli.max_body_bytes,
    };

    let mut roles = RoleRegistry::builtin();
    if cli.no_authorizer {
        roles.unregister(RoleKind::Authorizer);
    }
    let services = Arc::new(build_services(&cli));

    let server = FcgiServer::new(roles, services)
        .with_limits(limits)
        .with_server_info(ServerInfo::from_config(&config));
    let service = Service::new(server);

    let addr = match service.run(config.clone()).await {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to start service: {e}");
            std::process::exit(1);
        }
    };

    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  FastCGI server running!");
    println!();
    println!("  Listening on:");
    println!("    {addr}");
    println!();
    println!("  Workers: {}   Backlog: {}", config.worker_count, config.accept_queue_depth);
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    info!(
        "Shutdown requested with {} active connections",
        service.active_connections()
    );
    service.shutdown().await;
    println!("  Server stopped.");
}
