use axum::{
    BoxError, Router,
    handler::HandlerWithoutStateExt,
    http::{StatusCode, Uri, uri::Authority},
    response::Redirect,
    routing::{get, post},
};
use axum_extra::extract::Host;
use axum_server::tls_rustls::RustlsConfig;
use local_ip_address::local_ip;
use server::{
    broadcast::{self, EVENT_CHANNEL_CAPACITY},
    config::Config,
    engine::{TrackingEngine, monitor::StalenessMonitor},
    notify::{HttpNotifier, spawn_retry_worker},
    roster::HttpRosterClient,
    routes,
    server_state::ServerState,
};
use std::{fs::OpenOptions, net::SocketAddr, sync::Arc};
use tokio::sync::broadcast as tokio_broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trip_safety_data_management::SessionStore;

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::fs::create_dir_all("server/log")?;
    let log_file = "server/log/server.log";

    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting tracking server...");

    let config = Config::from_env();
    let store = SessionStore::open().await?;

    let (events, _rx) = tokio_broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let notifier = Arc::new(HttpNotifier::new(config.notify_url.clone()));
    let retry_queue = spawn_retry_worker(
        store.clone(),
        notifier.clone(),
        events.clone(),
        config.notify_retry_limit,
        config.notify_retry_base_delay,
    );

    let engine = Arc::new(TrackingEngine::new(
        store,
        HttpRosterClient::new(config.roster_url.clone()),
        notifier,
        events,
        retry_queue,
        config.notify_timeout,
    ));

    let monitor = StalenessMonitor::new(
        engine.clone(),
        config.sweep_interval,
        config.stale_threshold,
        config.sweep_timeout,
    );
    tokio::spawn(monitor.run());

    let server_state = Arc::new(ServerState { engine });

    let app = Router::new()
        .route("/session/{trip_id}", get(routes::session_snapshot))
        .route("/session/{trip_id}/initialize", post(routes::initialize))
        .route("/session/{trip_id}/start", post(routes::start))
        .route("/session/{trip_id}/pause", post(routes::pause))
        .route("/session/{trip_id}/resume", post(routes::resume))
        .route("/session/{trip_id}/location", post(routes::submit_location))
        .route("/session/{trip_id}/complete", post(routes::complete))
        .route("/session/{trip_id}/sos", post(routes::sos))
        .route("/session/{trip_id}/resolve/{alert_id}", post(routes::resolve_alert))
        .route("/session/{trip_id}/live", get(broadcast::live_updates))
        .with_state(server_state);

    let addr = match config.bind_addr {
        Some(addr) => addr,
        None => SocketAddr::from((local_ip()?, DEFAULT_PORT)),
    };

    match config.tls {
        Some(tls) => {
            tokio::spawn(redirect_http_to_https(addr, config.http_redirect_port));

            let rustls = RustlsConfig::from_pem_file(tls.cert_path, tls.key_path).await?;
            tracing::info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!("Listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

async fn redirect_http_to_https(https_addr: SocketAddr, http_port: u16) {
    fn make_https(host: &str, uri: Uri, https_port: u16) -> Result<Uri, BoxError> {
        let mut parts = uri.into_parts();

        parts.scheme = Some(axum::http::uri::Scheme::HTTPS);
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse()?);
        }

        let authority: Authority = host.parse()?;
        parts.authority = Some(format!("{}:{}", authority.host(), https_port).parse()?);

        Ok(Uri::from_parts(parts)?)
    }

    let https_port = https_addr.port();
    let redirect = move |Host(host): Host, uri: Uri| async move {
        match make_https(&host, uri, https_port) {
            Ok(uri) => Ok(Redirect::permanent(&uri.to_string())),
            Err(error) => {
                tracing::warn!(%error, "failed to convert URI to HTTPS");
                Err(StatusCode::BAD_REQUEST)
            }
        }
    };

    let addr = SocketAddr::from((https_addr.ip(), http_port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Could not bind HTTP redirect listener on {}: {}", addr, err);
            return;
        }
    };

    tracing::info!("Redirecting http://{} to https", addr);
    if let Err(err) = axum::serve(listener, redirect.into_make_service()).await {
        tracing::error!("HTTP redirect listener failed: {}", err);
    }
}
