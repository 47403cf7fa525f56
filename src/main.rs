use anyhow::Context;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod connection;
mod dispatcher;
mod message_log;
mod panel;
mod server_sim;
mod session;
mod transport;

use config::{Config, TransportKind, CONFIG_FILE, DEFAULT_CONFIG};
use dispatcher::CommandDispatcher;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use panel::{panel_router, PanelState};
use server_sim::GameServer;
use session::ConsoleSession;
use transport::{MockTransport, RemoteTransport, Transport};

fn load_tls_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_file = &mut BufReader::new(File::open(cert_path)?);
    let key_file = &mut BufReader::new(File::open(key_path)?);

    let cert_chain = rustls_pemfile::certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(key_file)?
        .ok_or_else(|| anyhow::anyhow!("No private keys found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(config)
}

fn is_common_connection_error(err: &dyn std::error::Error) -> bool {
    let s = format!("{:?}", err);
    s.contains("BrokenPipe")
        || s.contains("ConnectionReset")
        || s.contains("UnexpectedEof")
        || s.contains("ConnectionAborted")
        || s.contains("NotConnected")
        || s.contains("TimedOut")
        || s.contains("IncompleteMessage")
}

async fn load_config() -> anyhow::Result<Config> {
    let raw = match fs::read_to_string(CONFIG_FILE).await {
        Ok(s) => s,
        Err(_) => {
            warn!("Configuration file '{}' not found. Creating default.", CONFIG_FILE);
            fs::write(CONFIG_FILE, DEFAULT_CONFIG)
                .await
                .with_context(|| format!("writing default {}", CONFIG_FILE))?;
            DEFAULT_CONFIG.to_string()
        }
    };
    Config::parse(&raw).with_context(|| format!("parsing {}", CONFIG_FILE))
}

fn build_transport(config: &Config) -> Arc<dyn Transport> {
    match config.transport.kind {
        TransportKind::Mock => Arc::new(
            MockTransport::new(Duration::from_millis(config.transport.mock_delay_ms))
                .with_jitter(Duration::from_millis(config.transport.mock_jitter_ms))
                .with_boot_banner(&config.game.name),
        ),
        TransportKind::Remote => {
            let remote = RemoteTransport::new(config.transport.remote_url.clone());
            info!(url = remote.url(), "using remote console transport");
            Arc::new(remote)
        }
    }
}

async fn serve_https(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    app: axum::Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("MinePanel HTTPS listening on {}", addr);

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => continue,
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = TokioIo::new(tls_stream);
                    let service = TowerToHyperService::new(app);
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        if !is_common_connection_error(err.as_ref()) {
                            error!("Error serving connection: {:?}", err);
                        }
                    }
                }
                Err(e) => {
                    if !is_common_connection_error(&e) {
                        error!("TLS Accept Error: {}", e);
                    }
                }
            }
        });
    }
}

async fn run(config: &Config, state: Arc<PanelState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = panel_router(state);
    let host = &config.server.host;
    let mut tasks = Vec::new();

    let addr: SocketAddr = format!("{}:{}", host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("MinePanel HTTP listening on {}", addr);
    let http_app = app.clone();
    let http_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        axum::serve(listener, http_app)
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
            .map_err(anyhow::Error::from)
    }));

    if let (Some(cert), Some(key)) = (&config.server.tls_cert, &config.server.tls_key) {
        let tls = Arc::new(load_tls_config(cert, key)?);
        let addr: SocketAddr = format!("{}:{}", host, config.server.tls_port).parse()?;
        tasks.push(tokio::spawn(serve_https(addr, tls, app, shutdown.clone())));
    }

    let mut result = Ok(());
    for task in futures_util::future::join_all(tasks).await {
        match task {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("listener failed: {:#}", e);
                shutdown.cancel();
                result = Err(e);
            }
            Err(e) => {
                shutdown.cancel();
                result = Err(e.into());
            }
        }
    }
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!(r#"
  __  __ _            ____                  _
 |  \/  (_)_ __   ___|  _ \ __ _ _ __   ___| |
 | |\/| | | '_ \ / _ \ |_) / _` | '_ \ / _ \ |
 | |  | | | | | |  __/  __/ (_| | | | |  __/ |
 |_|  |_|_|_| |_|\___|_|   \__,_|_| |_|\___|_|
"#);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("minepanel=info,tower_http=info")),
        )
        .init();

    let config = load_config().await?;

    let transport = build_transport(&config);
    let session = ConsoleSession::new(transport, &config.console, config.reconnect.clone());
    if !session.start().await {
        warn!("console transport unavailable at startup, reconnect policy applies");
    }

    let dispatcher = CommandDispatcher::new(session.clone(), &config.console);
    info!(policy = ?dispatcher.policy(), "console dispatcher ready");
    let game = GameServer::new(&config.game).with_console(session.clone());
    let shutdown = CancellationToken::new();
    tokio::spawn(
        game.clone()
            .run_sampler(config.game.sample_interval(), shutdown.clone()),
    );
    let state = Arc::new(PanelState::new(
        config.game.name.clone(),
        dispatcher,
        game,
        shutdown.clone(),
    ));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal.cancel();
            }
            Err(e) => error!("unable to listen for shutdown signal: {}", e),
        }
    });

    let result = run(&config, state.clone(), shutdown).await;

    // The session is released on every exit path, including listener failures.
    info!(in_flight = state.dispatcher.in_flight(), "releasing console session");
    session.shutdown().await;
    result
}
