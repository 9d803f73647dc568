use casdoor_sso_relying_party::{
    AccountResolver, AccountStore, AuthFlowController, RedirectValidator, SessionManager,
    SessionStore, TokenClient,
};
use casdoor_sso_server::{
    app,
    auth::{
        AppState,
        db::{PgAccountStore, PgSessionStore},
    },
    config::ServerConfig,
    error::StartupError,
};
use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(
        active = config.casdoor.is_active(),
        backend = %config.casdoor.backend(),
        "Loaded configuration"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let session_store = PgSessionStore::new(db_pool.clone());
    match session_store.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    let cleanup_store = session_store.clone();
    let cleanup_interval = config.session.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match cleanup_store.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });

    let provider = Arc::new(config.casdoor);
    let site = config.site;
    let tokens = TokenClient::new(&provider, &site).map_err(|e| StartupError::TokenClient {
        details: e.to_string(),
    })?;

    let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(db_pool));
    let sessions: Arc<dyn SessionStore> = Arc::new(session_store);
    let session_manager = SessionManager::new(
        sessions,
        RedirectValidator::for_provider(site.clone(), &provider),
        provider.clone(),
    )
    .with_session_ttl(config.session.duration());

    let mut logins = session_manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = logins.recv().await {
            tracing::info!(
                account_id = %event.account_id,
                username = %event.username,
                created = event.created,
                "User signed in"
            );
        }
    });

    let controller = AuthFlowController::new(
        provider.clone(),
        RedirectValidator::for_provider(site, &provider),
        Arc::new(tokens),
        AccountResolver::new(accounts.clone()),
        session_manager,
    );
    let app_state = Arc::new(AppState::new(controller, accounts));
    let router = app::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.clone(),
            details: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", &config.listen_addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
