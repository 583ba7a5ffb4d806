#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use tasklane::config::Configuration;
use tasklane::{app, initialize_state, session, telemetry};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    dotenvy::dotenv().ok();

    let config = Configuration::default()
        .path(PathBuf::from(
            std::env::var("CONFIG_PATH").unwrap_or_default(),
        ))
        .read();

    let endpoint = config.telemetry.otlp_endpoint.as_deref();
    let (tracer_provider, logger) = match endpoint {
        Some(endpoint) => (
            telemetry::setup_tracer(endpoint)
                .inspect_err(|err| eprintln!("cannot create OTLP tracer: {err}"))
                .ok(),
            telemetry::setup_logging(endpoint)
                .inspect_err(|err| eprintln!("cannot create OTLP logger: {err}"))
                .ok(),
        ),
        None => (None, None),
    };
    let (logger_provider, bridge) = logger.unzip();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("tasklane=info,tower_http=info,sqlx=warn")
        }))
        .with(fmt::layer())
        .with(bridge)
        .init();

    if let Some(provider) = &tracer_provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    let state = match initialize_state(Arc::clone(&config)).await {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "cannot initialize application state");
            std::process::exit(1);
        },
    };

    if let Some(period) = config.session.sweep_interval.filter(|n| *n > 0) {
        session::spawn_sweeper(
            Arc::clone(&state.sessions),
            Duration::from_secs(period),
        );
    }

    let limiter = Arc::clone(&state.limiter);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP);
        loop {
            interval.tick().await;
            limiter.sweep();
        }
    });

    let mut router = app(state);
    if config.telemetry.prometheus {
        match telemetry::setup_metrics_recorder() {
            Ok(handle) => {
                router = router
                    .route("/metrics", get(move || std::future::ready(handle.render())));
            },
            Err(error) => tracing::warn!(%error, "cannot install Prometheus recorder"),
        }
    }

    let listener = match TcpListener::bind(&config.address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, address = %config.address, "cannot bind listener");
            std::process::exit(1);
        },
    };
    tracing::info!(address = %config.address, "server listening");

    if let Err(error) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(%error, "server stopped unexpectedly");
    }

    if let Some(provider) = tracer_provider {
        let _ = provider.shutdown();
    }
    if let Some(provider) = logger_provider {
        let _ = provider.shutdown();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "cannot listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
