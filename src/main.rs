use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use shopsans::{
    application::{
        analytics::AnalyticsService, error::AppError, repos::HealthRepo, search::SearchService,
    },
    cache::{SharedStore, StoreConfig, StoreHealth},
    config::{self, CachePurgeArgs},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState, RateLimitPolicy, RateLimiter},
        telemetry,
    },
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cache(args) => match args.command {
            config::CacheCommand::Purge(purge) => run_cache_purge(settings, purge).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings)?;
    let store = SharedStore::from_config(&StoreConfig::from(&settings.cache))?;
    info!(
        target: "shopsans::serve",
        store = store.health().as_str(),
        "shared cache store configured"
    );

    let search_limiter = Arc::new(RateLimiter::new(
        RateLimitPolicy::from_settings("rl:search", &settings.search_rate_limit),
        store.clone(),
    ));
    let analytics_limiter = Arc::new(RateLimiter::new(
        RateLimitPolicy::from_settings("rl:analytics", &settings.analytics_rate_limit),
        store.clone(),
    ));

    let state = HttpState {
        search: Arc::new(SearchService::new(repositories.clone())),
        analytics: Arc::new(AnalyticsService::new(repositories.clone(), store.clone())),
        store: store.clone(),
        readiness: repositories as Arc<dyn HealthRepo>,
        started_at: std::time::Instant::now(),
        search_limiter: search_limiter.clone(),
        analytics_limiter: analytics_limiter.clone(),
        search_ttl: settings.cache.search_ttl,
        analytics_ttl: settings.cache.analytics_ttl,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = [
        spawn_store_supervisor(
            store.clone(),
            settings.cache.reconnect_interval,
            shutdown_rx.clone(),
        ),
        spawn_window_sweeper(
            vec![search_limiter, analytics_limiter],
            shortest_window(&settings),
            shutdown_rx.clone(),
        ),
    ];

    let result = serve_http(&settings, state, shutdown_tx, shutdown_rx).await;

    for handle in background {
        if let Err(err) = handle.await {
            warn!(target: "shopsans::serve", error = %err, "background task ended abnormally");
        }
    }

    result
}

fn init_repositories(settings: &config::Settings) -> Result<Arc<PostgresRepositories>, AppError> {
    let url = settings.database.url.as_deref().ok_or_else(|| {
        InfraError::configuration("database.url must be set (SHOPSANS__DATABASE__URL)")
    })?;
    let pool =
        PostgresRepositories::connect_lazy(url, settings.database.max_connections.get())
            .map_err(|err| InfraError::database(err.to_string()))?;
    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn serve_http(
    settings: &config::Settings,
    state: HttpState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))?;
    info!(target: "shopsans::serve", %addr, "listening");

    let router = http::build_router(state);
    let mut drain = shutdown_rx;
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if drain.wait_for(|stop| *stop).await.is_err() {
            warn!(target: "shopsans::serve", "shutdown channel closed");
        }
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => {
            // Stop background tasks before surfacing the outcome.
            shutdown_tx.send_replace(true);
            return flatten_server_result(joined);
        }
        () = shutdown_signal() => {}
    }

    info!(
        target: "shopsans::serve",
        grace_seconds = settings.server.graceful_shutdown.as_secs(),
        "shutdown signal received; draining connections"
    );
    shutdown_tx.send_replace(true);

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => flatten_server_result(joined),
        Err(_) => {
            warn!(
                target: "shopsans::serve",
                "graceful shutdown window elapsed; aborting open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn flatten_server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::from(InfraError::from(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "shopsans::serve", error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "shopsans::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Periodically retry a degraded shared store so hits resume once it recovers.
fn spawn_store_supervisor(
    store: SharedStore,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if store.health() == StoreHealth::Disabled {
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if store.health() != StoreHealth::Degraded {
                        continue;
                    }
                    match store.reconnect().await {
                        StoreHealth::Connected => info!(
                            target: "shopsans::cache::store",
                            "shared cache store reconnected"
                        ),
                        health => warn!(
                            target: "shopsans::cache::store",
                            health = health.as_str(),
                            "shared cache store still unavailable"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Sweep finished in-process rate-limit windows.
fn spawn_window_sweeper(
    limiters: Vec<Arc<RateLimiter>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for limiter in &limiters {
                        let pruned = limiter.prune_expired();
                        if pruned > 0 {
                            info!(
                                target: "shopsans::rate_limit",
                                scope = %limiter.policy().key_prefix,
                                pruned,
                                "pruned expired fallback windows"
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn shortest_window(settings: &config::Settings) -> Duration {
    let secs = settings
        .search_rate_limit
        .window_seconds
        .min(settings.analytics_rate_limit.window_seconds);
    Duration::from_secs(u64::from(secs.get()))
}

async fn run_cache_purge(
    settings: config::Settings,
    args: CachePurgeArgs,
) -> Result<(), AppError> {
    let Some(prefix) = args.key_prefix() else {
        return Err(AppError::validation("--prefix or --namespace must not be blank"));
    };

    let store = SharedStore::from_config(&StoreConfig::from(&settings.cache))?;
    if store.health() == StoreHealth::Disabled {
        return Err(AppError::validation(
            "no shared cache store configured; set cache.url or pass --cache-url",
        ));
    }

    let removed = store
        .invalidate_prefix(&prefix)
        .await
        .map_err(|_| AppError::unexpected("shared cache store unavailable"))?;

    info!(
        target: "shopsans::cache::purge",
        prefix = %prefix,
        removed,
        "purged shared cache entries"
    );
    Ok(())
}
