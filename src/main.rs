// MBTA departure board server
// Red Line (Central Sq), Green Line B (BU Central) & 47 bus, served as JSON and a small HTML board

use actix_web::{web, App, HttpServer, HttpResponse, middleware};
use actix_cors::Cors;
use actix_files as fs;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time;

mod arrivals;
mod board;
mod config;
mod mbta_api_models;

use arrivals::{Aggregator, Arrival, CycleReport};
use board::{BoardState, minutes_label};
use config::Config;
use mbta_api_models::{MbtaClient, MbtaError};

#[derive(Clone)]
struct AppState {
    board: Arc<Mutex<BoardState>>,
    aggregator: Arc<Aggregator>,
    config: Arc<Config>,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: mbta_api_models::get_current_timestamp(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: mbta_api_models::get_current_timestamp(),
        }
    }
}

// ============================================================================
// Aggregation cycle
// ============================================================================

/// Runs one full cycle against the MBTA API and publishes it.
fn refresh_board(state: &AppState) -> mbta_api_models::Result<usize> {
    match MbtaClient::new(&state.config.api_url, state.config.api_key.as_deref()) {
        Ok(client) => publish_cycle(state, |aggregator| aggregator.fetch_arrivals(&client)),
        Err(e) => {
            log::error!("❌ {}", e);
            publish_cycle(state, |aggregator| aggregator.unavailable(&e.to_string()))
        }
    }
}

/// Cycles are serialized on `cycle_lock`, so boards are published in the order
/// their cycles started. Blocks on network I/O; the board lock is only taken
/// once the cycle is complete. Must not be called from an async context.
fn publish_cycle(
    state: &AppState,
    run: impl FnOnce(&Aggregator) -> CycleReport,
) -> mbta_api_models::Result<usize> {
    let _cycle = state.cycle_lock.blocking_lock();
    let report = run(state.aggregator.as_ref());

    let count = report.arrivals.len();
    let failed = report.failures.len();

    let mut board = state
        .board
        .lock()
        .map_err(|e| MbtaError::StateError(format!("Failed to lock board: {}", e)))?;
    board.replace(report);

    if failed > 0 {
        log::warn!("⚠️  Board refreshed with {} arrivals, {} fetches failed", count, failed);
    } else {
        log::info!("✓ Board refreshed: {} arrivals", count);
    }

    Ok(count)
}

// ============================================================================
// Frontend Routes
// ============================================================================

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_board_html(page: &[Arrival], degraded: bool, refresh_secs: u64) -> String {
    let rows = if page.is_empty() {
        "<p class=\"empty\">No upcoming departures</p>".to_string()
    } else {
        page.iter()
            .map(|arrival| {
                format!(
                    "<div class=\"row\"><img src=\"/{}\" alt=\"{}\" width=\"30\" height=\"30\">\
                     <span class=\"dest\">{}</span><span class=\"mins\">{}</span></div>",
                    arrival.symbol.asset_path(),
                    arrival.symbol.tag(),
                    escape_html(&arrival.destination),
                    minutes_label(arrival.minutes)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let notice = if degraded {
        "<p class=\"notice\">Some predictions are unavailable</p>"
    } else {
        ""
    };

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"{}\">\
         <title>MBTA Tracker – Central Sq, BU Central, Bus 47</title>\
         <style>body{{background:black;color:white;font-family:Helvetica}}\
         .row{{display:flex;align-items:center;gap:12px;font-size:20px;margin:4px 0}}\
         .mins{{margin-left:auto;padding-right:10px}}</style></head>\
         <body><h1>Red Line, Green B, &amp; 47 Bus Tracker</h1>\
         <h2>Next Departures</h2>\n{}\n{}</body></html>",
        refresh_secs, rows, notice
    )
}

async fn serve_index(state: web::Data<AppState>) -> HttpResponse {
    match state.board.lock() {
        Ok(board) => {
            let html = render_board_html(
                board.current_page(state.config.page_size),
                board.is_degraded(),
                state.config.rotate_interval.as_secs(),
            );
            HttpResponse::Ok()
                .content_type("text/html; charset=utf-8")
                .body(html)
        }
        Err(e) => {
            log::error!("❌ Failed to lock board: {}", e);
            HttpResponse::InternalServerError().body("Board unavailable")
        }
    }
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_arrivals(state: web::Data<AppState>) -> HttpResponse {
    match state.board.lock() {
        Ok(board) => {
            log::debug!("🚆 Arrivals requested: {} total", board.arrivals().len());
            HttpResponse::Ok().json(ApiResponse::success(board.arrivals()))
        }
        Err(e) => {
            log::error!("❌ Failed to lock board: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<Vec<Arrival>>::error(
                    "Failed to retrieve arrivals".to_string()
                ))
        }
    }
}

async fn get_board_page(state: web::Data<AppState>) -> HttpResponse {
    match state.board.lock() {
        Ok(board) => {
            HttpResponse::Ok().json(ApiResponse::success(board.current_page(state.config.page_size)))
        }
        Err(e) => {
            log::error!("❌ Failed to lock board: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<Vec<Arrival>>::error(
                    "Failed to retrieve board".to_string()
                ))
        }
    }
}

async fn get_status(state: web::Data<AppState>) -> HttpResponse {
    match state.board.lock() {
        Ok(board) => HttpResponse::Ok().json(ApiResponse::success(board.stats())),
        Err(e) => {
            log::error!("❌ Failed to lock board: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<String>::error(
                    "Failed to retrieve status".to_string()
                ))
        }
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "MBTA Departure Board",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": mbta_api_models::get_current_timestamp(),
    }))
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    log::info!("🔄 Manual refresh requested...");

    let state = state.get_ref().clone();
    match tokio::task::spawn_blocking(move || {
        refresh_board(&state)
    }).await {
        Ok(Ok(count)) => {
            HttpResponse::Ok().json(ApiResponse::success(format!("Board refreshed: {} arrivals", count)))
        }
        Ok(Err(e)) => {
            log::warn!("⚠️  Manual refresh failed: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<String>::error(
                    format!("Refresh failed: {}", e)
                ))
        }
        Err(e) => {
            log::error!("❌ Manual refresh task panicked: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<String>::error(
                    "Refresh task panicked".to_string()
                ))
        }
    }
}

fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(serve_index))
        .route("/health", web::get().to(health_check))
        .service(
            web::scope("/api")
                .route("/arrivals", web::get().to(get_arrivals))
                .route("/board", web::get().to(get_board_page))
                .route("/status", web::get().to(get_status))
                .route("/refresh", web::post().to(force_refresh))
        );
}

// ============================================================================
// Background Tasks
// ============================================================================

async fn data_refresh_task(state: AppState) {
    let mut interval = time::interval(state.config.refresh_interval);
    // The first tick completes immediately; the initial cycle already ran at startup.
    interval.tick().await;

    loop {
        interval.tick().await;

        log::info!("🔄 Auto-refreshing arrivals...");

        let state_clone = state.clone();
        match tokio::task::spawn_blocking(move || {
            refresh_board(&state_clone)
        }).await {
            Ok(Ok(_)) => {
                log::debug!("Auto-refresh completed at {}",
                            mbta_api_models::format_timestamp_full(mbta_api_models::get_current_timestamp()));
            }
            Ok(Err(e)) => {
                log::warn!("⚠️  Auto-refresh failed: {}", e);
            }
            Err(e) => {
                log::error!("❌ Auto-refresh task panicked: {}", e);
            }
        }
    }
}

async fn rotation_task(state: AppState) {
    let mut interval = time::interval(state.config.rotate_interval);
    interval.tick().await;

    loop {
        interval.tick().await;

        match state.board.lock() {
            Ok(mut board) => board.advance(state.config.page_size),
            Err(e) => log::error!("❌ Failed to lock board: {}", e),
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(state: AppState) -> std::io::Result<()> {
    tokio::spawn(data_refresh_task(state.clone()));
    tokio::spawn(rotation_task(state.clone()));

    let bind = (state.config.bind_address.clone(), state.config.port);
    log::info!("🌐 Board running on: http://{}:{}", bind.0, bind.1);
    log::info!("🔄 Auto-refresh: every {}s, page rotation: every {}s",
               state.config.refresh_interval.as_secs(),
               state.config.rotate_interval.as_secs());

    HttpServer::new(move || {
        let cors = Cors::permissive();
        let media_dir = state.config.media_dir.clone();

        let app = App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure_routes);

        if Path::new(&media_dir).is_dir() {
            app.service(fs::Files::new("/media", media_dir))
        } else {
            app
        }
    })
        .bind(bind)?
        .run()
        .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    if config.api_key.is_none() {
        log::warn!("⚠️  {} is not set, requests will be rate limited", config::API_KEY_VAR);
    }

    let aggregator = Aggregator::new(config.route_groups.clone(), config.window_secs);
    log::info!("📡 Tracking {} route groups", aggregator.groups().len());

    let state = AppState {
        board: Arc::new(Mutex::new(BoardState::new())),
        aggregator: Arc::new(aggregator),
        config: Arc::new(config),
        cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
    };

    // Still on a plain thread here, so the blocking client is safe to use.
    if let Err(e) = refresh_board(&state) {
        log::warn!("⚠️  Initial refresh failed: {}", e);
    }

    actix_web::rt::System::new().block_on(run_server(state))
}
