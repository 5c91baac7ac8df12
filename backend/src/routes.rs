use std::io::Write;
use std::path::Path;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse, web};
use futures::TryStreamExt;
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::UploadResponse;
use uuid::Uuid;

use crate::pipeline::ReactionPipeline;
use crate::predict::http::ReqwestHttp;
use crate::presentation::{ChannelAdapter, DisplayOptions};
use crate::session::{self, SessionError, SessionStore, UploadedImage};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, frontend_dir: String) {
    cfg.service(web::resource("/api/upload").route(web::post().to(handle_upload)))
        .service(web::resource("/api/analyze/{session_id}").route(web::post().to(handle_analyze)))
        .service(web::resource("/api/health").route(web::get().to(health)));

    if Path::new(&frontend_dir).is_dir() {
        cfg.service(Files::new("/static", frontend_dir));
    } else {
        warn!("static client directory {frontend_dir} not found, /static disabled");
    }
}

#[derive(Deserialize)]
struct UploadQuery {
    session: Option<Uuid>,
}

async fn handle_upload(
    store: web::Data<SessionStore>,
    query: web::Query<UploadQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let mut file_name: Option<String> = None;
    let mut image_data = Vec::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        if file_name.is_none() {
            file_name = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(str::to_string);
        }
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            image_data.write_all(&data)?;
        }
        if file_name.is_some() && !image_data.is_empty() {
            break;
        }
    }

    let Some(file_name) = file_name else {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "upload carries no file".into(),
        }));
    };
    if image_data.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "uploaded file is empty".into(),
        }));
    }
    let Some(mime_type) = session::mime_for_file_name(&file_name) else {
        return Ok(HttpResponse::UnsupportedMediaType().json(ErrorResponse {
            error: format!(
                "unsupported file type {file_name:?}; accepted extensions: {}",
                session::ALLOWED_EXTENSIONS.join(", ")
            ),
        }));
    };

    let image = match UploadedImage::from_upload(file_name, mime_type.to_string(), image_data) {
        Ok(image) => image,
        Err(e) => {
            error!("upload decode failed: {e}");
            return Ok(HttpResponse::UnprocessableEntity().json(ErrorResponse {
                error: format!("could not decode image: {e}"),
            }));
        }
    };

    let (width, height) = (image.width(), image.height());
    let file_name = image.file_name.clone();
    let (session_id, replaced) = store.put_image(query.session, image);
    info!("session {session_id}: stored {file_name} ({width}x{height}, replaced: {replaced})");

    Ok(HttpResponse::Ok().json(UploadResponse {
        session_id,
        file_name,
        width,
        height,
        replaced,
    }))
}

/// Starts one analysis run and streams its events as NDJSON, one
/// `AnalysisEvent` per line, in emission order.
async fn handle_analyze(
    store: web::Data<SessionStore>,
    pipeline: web::Data<ReactionPipeline<ReqwestHttp>>,
    options: web::Data<DisplayOptions>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let session_id = path.into_inner();
    let image = match store.begin_run(session_id) {
        Ok(image) => image,
        Err(e @ SessionError::NotFound) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                error: e.to_string(),
            });
        }
        Err(e @ SessionError::NoImage) => {
            return HttpResponse::UnprocessableEntity().json(ErrorResponse {
                error: e.to_string(),
            });
        }
        Err(e @ SessionError::RunInProgress) => {
            return HttpResponse::Conflict().json(ErrorResponse {
                error: e.to_string(),
            });
        }
    };

    let (tx, rx) = futures::channel::mpsc::unbounded();
    let adapter_options = **options;
    let run_store = store.clone();
    let run_pipeline = pipeline.clone();

    actix_web::rt::spawn(async move {
        let mut adapter = ChannelAdapter::new(tx, adapter_options);
        match run_pipeline.run(&image, &mut adapter).await {
            Ok(result) => info!("session {session_id}: analysis complete ({})", result.label),
            Err(e) => error!("session {session_id}: analysis aborted: {e}"),
        }
        run_store.finish_run(session_id);
    });

    let body = rx.map(|event| {
        serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        })
    });

    HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .streaming(body)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}
