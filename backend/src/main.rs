mod codec;
mod config;
mod pipeline;
mod predict;
mod presentation;
mod routes;
mod session;

use std::env;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use config::AppConfig;
use pipeline::ReactionPipeline;
use predict::client::PredictionClient;
use predict::http::ReqwestHttp;
use presentation::DisplayOptions;
use routes::configure_routes;
use session::SessionStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let frontend_dir = if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        format!("{}/../client/dist", manifest_dir)
    } else {
        "/usr/src/app/client/dist".to_string()
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Startup configuration error: {e}");
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("configuration error: {e}"),
            ));
        }
    };

    let http = match ReqwestHttp::new() {
        Ok(http) => http,
        Err(e) => {
            log::error!("Failed to initialize HTTP client: {e}");
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP client error: {e}"),
            ));
        }
    };

    let client = PredictionClient::new(
        http,
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.poll_interval,
        config.prediction_timeout,
    );
    let pipeline = web::Data::new(ReactionPipeline::new(
        client,
        config.crop_deployment.clone(),
        config.explain_deployment.clone(),
    ));
    let sessions = web::Data::new(SessionStore::new());
    let display = web::Data::new(DisplayOptions {
        height: config.display_height,
    });

    log::info!("Crop deployment: {}", config.crop_deployment);
    log::info!("Explain deployment: {}", config.explain_deployment);
    match config.prediction_timeout {
        Some(timeout) => log::info!("Prediction timeout: {}s", timeout.as_secs()),
        None => log::info!("Prediction timeout: none (remote jobs may block indefinitely)"),
    }

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(sessions.clone())
            .app_data(display.clone())
            .configure(|cfg| configure_routes(cfg, frontend_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
