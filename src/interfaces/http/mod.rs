use crate::application::use_cases::embedding_service::EncoderStatus;
use crate::domain::error::AppError;
use crate::interfaces::state::AppContext;
use actix_cors::Cors;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, trace};

pub struct HttpState {
    pub ctx: Arc<AppContext>,
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub generator_available: bool,
    pub encoder: EncoderStatus,
    pub indexed_tables: usize,
    pub indexed_columns: usize,
    pub databases: Vec<String>,
    pub refresh_running: bool,
}

#[derive(Serialize)]
struct ToggleResponse {
    changed: bool,
    running: bool,
}

fn error_response(err: &AppError) -> HttpResponse {
    match err {
        AppError::ValidationError(_) => HttpResponse::BadRequest().json(err),
        AppError::NotFound(_) => HttpResponse::NotFound().json(err),
        _ => HttpResponse::InternalServerError().json(err),
    }
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    let ctx = &data.ctx;
    let (indexed_tables, indexed_columns) = ctx.semantic_index.record_counts();
    HttpResponse::Ok().json(HealthResponse {
        generator_available: ctx.generator.is_available().await,
        encoder: ctx.semantic_index.encoder_status(),
        indexed_tables,
        indexed_columns,
        databases: ctx.connectors.names().await,
        refresh_running: ctx.refresh_task.is_running(),
    })
}

#[post("/query")]
async fn query(data: web::Data<HttpState>, req: web::Json<QueryRequest>) -> impl Responder {
    info!(question = %req.question, "Answering question");

    let mut sink = |text: &str| trace!(chars = text.len(), "Generated text");
    match data.ctx.query_service.answer(&req.question, Some(&mut sink)).await {
        Ok(answer) => HttpResponse::Ok().json(answer),
        Err(e) => {
            error!(error = %e, "Query failed");
            error_response(&e)
        }
    }
}

#[get("/catalog")]
async fn catalog(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(&*data.ctx.catalog.snapshot())
}

#[get("/tables")]
async fn tables(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(data.ctx.catalog.all_tables())
}

#[post("/sync")]
async fn sync(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(data.ctx.schema_sync.discover_and_sync().await)
}

#[post("/refresh/start")]
async fn refresh_start(data: web::Data<HttpState>) -> impl Responder {
    let changed = data.ctx.start_refresh();
    HttpResponse::Ok().json(ToggleResponse {
        changed,
        running: data.ctx.refresh_task.is_running(),
    })
}

#[post("/refresh/stop")]
async fn refresh_stop(data: web::Data<HttpState>) -> impl Responder {
    let changed = data.ctx.stop_refresh();
    HttpResponse::Ok().json(ToggleResponse {
        changed,
        running: data.ctx.refresh_task.is_running(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(query)
        .service(catalog)
        .service(tables)
        .service(sync)
        .service(refresh_start)
        .service(refresh_stop);
}

pub fn start_server(ctx: Arc<AppContext>) -> std::io::Result<Server> {
    let host = ctx.config.http.host.clone();
    let port = ctx.config.http.port;
    let state = web::Data::new(HttpState { ctx });

    let server = HttpServer::new(move || {
        let cors = Cors::permissive(); // Local tool, any origin

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((host.as_str(), port))?
    .run();

    info!(host = %host, port = port, "HTTP API listening");
    Ok(server)
}
