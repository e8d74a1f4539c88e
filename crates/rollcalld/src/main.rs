use anyhow::{Context, Result};
use rollcall_core::AttendanceMarker;
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod roster;
mod server;

use config::Config;
use roster::Roster;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        bind = %config.bind,
        db = %config.db_path.display(),
        metric = %config.matching.metric,
        threshold = config.matching.threshold,
        duplicate_policy = %config.matching.duplicate_policy,
        session_scope = %config.session_scope,
        max_encodings_per_student = config.max_encodings_per_student,
        "configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .context("opening attendance database")?,
    );

    let roster = match &config.roster_path {
        Some(path) => Roster::load(path)?,
        None => {
            tracing::warn!("ROLLCALL_ROSTER_PATH not set; teacher lookups disabled");
            Roster::default()
        }
    };
    seed_roster(&store, &roster).await?;

    let state = server::AppState {
        marker: AttendanceMarker::with_backend(store.clone(), config.matching),
        store,
        roster: Arc::new(roster),
        session_scope: config.session_scope,
        max_encodings_per_student: config.max_encodings_per_student,
    };

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "rollcalld ready");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

/// Create the roster's subjects and check every teacher's subject resolves.
async fn seed_roster(store: &SqliteStore, roster: &Roster) -> Result<()> {
    for seed in &roster.subjects {
        let subject = store
            .upsert_subject(&seed.code, &seed.name)
            .await
            .with_context(|| format!("seeding subject {}", seed.code))?;
        tracing::debug!(code = %subject.code, id = %subject.id, "subject seeded");
    }

    for (username, code) in roster.assignments() {
        if store.subject_by_code(code).await?.is_none() {
            tracing::warn!(username, subject = code, "roster teacher bound to unknown subject");
        }
    }

    tracing::info!(
        subjects = roster.subjects.len(),
        teachers = roster.teacher_count(),
        "roster loaded"
    );
    Ok(())
}
