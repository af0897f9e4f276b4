use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::Request,
    response::Response,
    routing::any,
    serve::Listener,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use crossbar::{
    adapters::{HttpForwarder, tls},
    config::{self, ServerConfigValidator},
    core::{Dispatcher, build_dispatcher},
    ports::forwarder::ForwardingEngine,
    tracing_setup,
    utils::GracefulShutdown,
};
use futures_util::StreamExt;
use tls_listener::TlsListener;
use tokio::io::{AsyncRead, AsyncWrite};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the load balancer (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

struct ServeListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for ServeListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!("Accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // Determine the command to run
    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => {
            return validate_config_command(&config_path);
        }
        "init" => {
            return init_config_command(&config_path).await;
        }
        "serve" => {
            // Continue with normal server startup
        }
        _ => unreachable!(),
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            This can happen if a provider was already installed. \
            The application will proceed; ensure a crypto provider is effectively available.",
            e
        );
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");

    let server_config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    ServerConfigValidator::validate(&server_config)
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    let engine: Arc<dyn ForwardingEngine> =
        Arc::new(HttpForwarder::new().context("Failed to create forwarding engine")?);

    // Startup registration: all groups are registered before the listener
    // binds, so the routing table is immutable once serving starts
    let dispatcher = Arc::new(
        build_dispatcher(&server_config, engine).context("Failed to register backend groups")?,
    );

    {
        let table = dispatcher.routing_table();
        for (prefix, group) in table.prefixes() {
            tracing::info!("Configured path prefix: {} -> {}", prefix, group.target());
        }
        for (name, value, group) in table.header_rules() {
            tracing::info!("Configured header rule: {}: {} -> {}", name, value, group.target());
        }
    }

    // Create graceful shutdown manager
    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    // Start signal handler for graceful shutdown
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let make_request_route = |dispatcher: Arc<Dispatcher>| {
        any(move |req: Request| {
            let dispatcher = dispatcher.clone();
            async move {
                Ok::<Response<Body>, std::convert::Infallible>(dispatcher.dispatch(req).await)
            }
        })
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(dispatcher.clone()))
        .route("/", make_request_route(dispatcher.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    let addr: SocketAddr = server_config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        "Crossbar listening on {} (TLS: {}, {} backend groups)",
        addr,
        server_config.tls.is_some(),
        server_config.groups.len()
    );

    let server_result = if let Some(tls_config) = &server_config.tls {
        tracing::info!("Starting listener with TLS");
        let rustls_config = tls::load_server_config(&tls_config.cert_path, &tls_config.key_path)
            .context("Failed to load TLS materials")?;

        let local_addr = listener.local_addr().context("Failed to get local addr")?;
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(rustls_config));
        let tls_listener = ServeListener {
            stream: TlsListener::new(acceptor, listener),
            local_addr,
        };

        tokio::select! {
            result = axum::serve(tls_listener, app.into_make_service()) => {
                result.context("Server error")
            },
            shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
                tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
                Ok(())
            }
        }
    } else {
        tokio::select! {
            result = axum::serve(listener, app.into_make_service()) => {
                result.context("Server error")
            },
            shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
                tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
                Ok(())
            }
        }
    };

    server_result?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let server_config = match config::load_config(config_path) {
        Ok(server_config) => {
            println!("Configuration parsing: OK");
            server_config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&server_config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!();
            println!("Configuration summary:");
            println!("   - Listen Address: {}", server_config.listen_addr);
            println!("   - Backend Groups: {}", server_config.groups.len());
            println!("   - TLS Enabled: {}", server_config.tls.is_some());
            for group in &server_config.groups {
                println!(
                    "   - Group '{}': {}:{} (max {} backends, {} prefixes, {} header rules)",
                    group.name,
                    group.host,
                    group.port,
                    group.max_backends,
                    group.path_prefixes.len(),
                    group.headers.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("Common fixes:");
            println!("   - Verify listen address format (e.g., '0.0.0.0:8443')");
            println!("   - Ensure every path prefix starts with '/'");
            println!("   - Give every group at least one path prefix or header rule");
            println!("   - Check that TLS certificate and key paths exist");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Crossbar configuration

# The address the listener binds to
listen_addr = "127.0.0.1:8443"

# TLS material for the listener; remove this section for plain HTTP
# [tls]
# cert_path = "localhost.crt"
# key_path = "localhost.key"

# One [[groups]] block per backend group. A request is routed to the group
# whose path prefix is the longest match for the request path.
[[groups]]
name = "api"
host = "127.0.0.1"
port = 3000
path_prefixes = ["/api"]
max_backends = 4

# Header rules route on an exact header value
# [groups.headers]
# "x-service" = "api"

[[groups]]
name = "web"
host = "127.0.0.1"
port = 3001
path_prefixes = ["/"]
max_backends = 8
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'crossbar serve --config {config_path}' to start the load balancer");
    Ok(())
}
