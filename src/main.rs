use std::net::SocketAddr;
use std::sync::Arc;
use tierline::db::repo::PlanRegistration;
use tierline::{api, config::Config, db::init_db, CompensationEngine, Repository};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    match repo.register_plan(&config.plan).await {
        Ok(PlanRegistration::Registered) => {
            tracing::info!(version = %config.plan.version, "Compensation plan registered");
        }
        Ok(PlanRegistration::AlreadyRegistered) => {
            tracing::info!(version = %config.plan.version, "Compensation plan unchanged");
        }
        Ok(PlanRegistration::Conflict { .. }) => {
            eprintln!(
                "Plan version {} is already registered with different terms; publish a new PLAN_VERSION",
                config.plan.version
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to register compensation plan: {}", e);
            std::process::exit(1);
        }
    }

    let engine = Arc::new(CompensationEngine::new(
        repo,
        config.plan.clone(),
        config.max_event_attempts,
    ));

    // Create router
    let app = api::create_router(api::AppState::new(engine));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
