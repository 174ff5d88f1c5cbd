use crate::error::Error;
use crate::service::{DocumentService, IndexService};
use crate::utils::parse_select;
use log::error;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

#[derive(Clone)]
pub struct AppServices {
    pub indexes: IndexService,
    pub docs: DocumentService,
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "$select")]
    select: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: String,
}

#[derive(Deserialize)]
struct BatchRequest {
    value: Vec<Map<String, Value>>,
}

pub fn routes(
    app: AppServices,
    api_key: Option<String>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let app_filter = warp::any().map(move || app.clone());

    let health = warp::path::end().and(warp::get()).map(|| "ok");

    let create_index = warp::path!("indexes")
        .and(warp::post())
        .and(warp::body::json())
        .and(app_filter.clone())
        .and_then(create_index);

    let list_indexes = warp::path!("indexes")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(app_filter.clone())
        .and_then(list_indexes);

    let get_index = warp::path!("indexes" / String)
        .and(warp::get())
        .and(app_filter.clone())
        .and_then(get_index);

    let update_index = warp::path!("indexes" / String)
        .and(warp::put())
        .and(warp::body::json())
        .and(app_filter.clone())
        .and_then(update_index);

    let delete_index = warp::path!("indexes" / String)
        .and(warp::delete())
        .and(app_filter.clone())
        .and_then(delete_index);

    let index_stats = warp::path!("indexes" / String / "stats")
        .and(warp::get())
        .and(app_filter.clone())
        .and_then(index_stats);

    let add_document = warp::path!("indexes" / String / "docs")
        .and(warp::post())
        .and(warp::body::json())
        .and(app_filter.clone())
        .and_then(add_document);

    let search = warp::path!("indexes" / String / "docs")
        .and(warp::get())
        .and(warp::query::<SearchQuery>())
        .and(app_filter.clone())
        .and_then(search_documents);

    let batch = warp::path!("indexes" / String / "docs" / "index")
        .and(warp::post())
        .and(warp::body::json())
        .and(app_filter.clone())
        .and_then(batch_documents);

    let search_post = warp::path!("indexes" / String / "docs" / "search")
        .and(warp::post())
        .and(warp::body::json())
        .and(app_filter.clone())
        .and_then(search_documents);

    // Must precede `get_document`, which would take `$count` as a key.
    let count = warp::path!("indexes" / String / "docs" / "$count")
        .and(warp::get())
        .and(app_filter.clone())
        .and_then(count_documents);

    let get_document = warp::path!("indexes" / String / "docs" / String)
        .and(warp::get())
        .and(app_filter)
        .and_then(get_document);

    let api = with_api_key(api_key).and(
        create_index
            .or(list_indexes)
            .or(get_index)
            .or(update_index)
            .or(delete_index)
            .or(index_stats)
            .or(add_document)
            .or(search)
            .or(batch)
            .or(search_post)
            .or(count)
            .or(get_document),
    );

    health
        .or(api)
        .recover(handle_rejection)
        .with(warp::log("searchbox::api"))
}

/// Passes only requests whose `accept-encoding` allows gzip.
pub fn accepts_gzip() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("accept-encoding")
        .and_then(|encoding: Option<String>| async move {
            match encoding {
                Some(value) if gzip_allowed(&value) => Ok(()),
                _ => Err(warp::reject::not_found()),
            }
        })
        .untuple_one()
}

/// True when `gzip` (or `*`) is listed with a non-zero quality.
fn gzip_allowed(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|entry| {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        if !coding.eq_ignore_ascii_case("gzip") && coding != "*" {
            return false;
        }
        let quality = parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        quality > 0.0
    })
}

fn with_api_key(expected: Option<String>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    let expected: Option<Arc<str>> = expected.map(Arc::from);
    warp::header::optional::<String>("api-key")
        .and_then(move |provided: Option<String>| {
            let expected = expected.clone();
            async move {
                match expected {
                    None => Ok(()),
                    Some(key) if provided.as_deref() == Some(&*key) => Ok(()),
                    Some(_) => Err(warp::reject::custom(Unauthorized)),
                }
            }
        })
        .untuple_one()
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::AlreadyExists => StatusCode::CONFLICT,
        Error::IndexNotFound | Error::DocumentNotFound => StatusCode::NOT_FOUND,
        Error::InvalidSchema(_) | Error::MissingKeyField | Error::KeyTypeError => {
            StatusCode::BAD_REQUEST
        }
        Error::SchemaParseError(_) | Error::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("request failed: {err}");
    }
    json_reply(&json!({ "error": err.to_string() }), status)
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn respond<T>(outcome: Result<T, Error>, ok: impl FnOnce(T) -> Response) -> Result<Response, Rejection> {
    Ok(match outcome {
        Ok(value) => ok(value),
        Err(e) => error_reply(e),
    })
}

async fn create_index(body: Value, app: AppServices) -> Result<Response, Rejection> {
    let Some(name) = body.get("name").and_then(Value::as_str).map(str::to_owned) else {
        return Ok(json_reply(
            &json!({ "error": "Invalid request body: name required" }),
            StatusCode::BAD_REQUEST,
        ));
    };
    respond(app.indexes.create_index(&name, body).await, |index| {
        json_reply(&index.raw, StatusCode::CREATED)
    })
}

async fn list_indexes(query: ListQuery, app: AppServices) -> Result<Response, Rejection> {
    let select = query.select.as_deref().map(parse_select);
    respond(app.indexes.list_indexes(select.as_deref()).await, |value| {
        json_reply(&json!({ "value": value }), StatusCode::OK)
    })
}

async fn get_index(name: String, app: AppServices) -> Result<Response, Rejection> {
    respond(app.indexes.get_index(&name).await, |schema| {
        json_reply(&schema, StatusCode::OK)
    })
}

async fn update_index(name: String, body: Value, app: AppServices) -> Result<Response, Rejection> {
    respond(app.indexes.update_index(&name, body).await, |index| {
        json_reply(&index.raw, StatusCode::OK)
    })
}

async fn delete_index(name: String, app: AppServices) -> Result<Response, Rejection> {
    respond(app.indexes.delete_index(&name).await, |()| {
        StatusCode::NO_CONTENT.into_response()
    })
}

async fn index_stats(name: String, app: AppServices) -> Result<Response, Rejection> {
    respond(app.indexes.stats(&name).await, |stats| {
        json_reply(&stats, StatusCode::OK)
    })
}

async fn add_document(
    index: String,
    doc: Map<String, Value>,
    app: AppServices,
) -> Result<Response, Rejection> {
    let outcome = app.docs.add_or_update(&index, &doc).await;
    respond(outcome, |()| json_reply(&doc, StatusCode::CREATED))
}

async fn batch_documents(
    index: String,
    request: BatchRequest,
    app: AppServices,
) -> Result<Response, Rejection> {
    respond(app.docs.batch(&index, &request.value).await, |results| {
        json_reply(&json!({ "value": results }), StatusCode::OK)
    })
}

async fn search_documents(
    index: String,
    query: SearchQuery,
    app: AppServices,
) -> Result<Response, Rejection> {
    respond(app.docs.search(&index, &query.search).await, |hits| {
        json_reply(&json!({ "value": hits }), StatusCode::OK)
    })
}

async fn count_documents(index: String, app: AppServices) -> Result<Response, Rejection> {
    respond(app.docs.count(&index).await, |count| {
        warp::reply::with_status(count.to_string(), StatusCode::OK).into_response()
    })
}

async fn get_document(index: String, key: String, app: AppServices) -> Result<Response, Rejection> {
    let Ok(key) = percent_decode_str(&key).decode_utf8() else {
        return Ok(json_reply(
            &json!({ "error": "document key is not valid UTF-8" }),
            StatusCode::BAD_REQUEST,
        ));
    };
    respond(app.docs.get_document(&index, &key).await, |doc| {
        json_reply(&doc, StatusCode::OK)
    })
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if err.find::<Unauthorized>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "API key required or invalid".to_string(),
        )
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected application/json".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };
    Ok(json_reply(&json!({ "error": message }), status))
}
