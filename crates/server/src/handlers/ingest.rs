//! Ingestion: `POST /` and `PUT /`.
//!
//! The payload arrives in one of three transports, checked in this order:
//! a `multipart/form-data` body with a `file` field, a form-encoded body
//! with a `content` field (`?input=form`), or the raw request body. It is
//! streamed into a freshly inserted record while the byte count is checked
//! against `upload.max_size`.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{BYTES_INGESTED, RECORDS_CREATED};
use crate::ratelimit::client_address;
use crate::reply::{self, ReplyFormat};
use crate::state::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Form;
use bytes::Bytes;
use futures::StreamExt;
use pasta_core::record::unix_now;
use pasta_core::{Record, mime_for_filename};
use pasta_storage::RecordWriter;
use serde::Deserialize;

/// Slack allowed on top of `max_size` for form and multipart framing.
pub const FORM_OVERHEAD: u64 = 64 * 1024;

/// Query parameters of an ingestion request.
#[derive(Debug, Default, Deserialize)]
pub struct IngestQuery {
    pub ret: Option<String>,
    pub input: Option<String>,
    #[serde(flatten)]
    pub options: IngestOptions,
}

/// Per-request options. Each may come from the query string, a request
/// header or a form field.
#[derive(Debug, Default, Deserialize)]
pub struct IngestOptions {
    /// Seconds until expiry; 0 never expires, negative means server default.
    pub expire: Option<String>,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub public: Option<String>,
}

impl IngestOptions {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            expire: get("expire"),
            filename: get("filename"),
            mime: get("mime"),
            public: get("public"),
        }
    }

    /// Fill options still unset from `other`.
    fn or(self, other: Self) -> Self {
        Self {
            expire: self.expire.or(other.expire),
            filename: self.filename.or(other.filename),
            mime: self.mime.or(other.mime),
            public: self.public.or(other.public),
        }
    }

    /// Record a form field if it names an option. Returns false otherwise.
    fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "expire" => &mut self.expire,
            "filename" => &mut self.filename,
            "mime" => &mut self.mime,
            "public" => &mut self.public,
            _ => return false,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
        true
    }
}

/// Form-encoded ingestion body.
#[derive(Debug, Deserialize)]
pub struct FormInput {
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub options: IngestOptions,
}

/// Parse a boolean option. `None` for anything unrecognised.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Longest filename or mime value kept, in bytes.
pub const MAX_OPTION_LEN: usize = 255;

/// Strip control characters and surrounding whitespace, and cut the value
/// down to [`MAX_OPTION_LEN`] bytes on a character boundary.
pub fn sanitize(value: &str) -> Option<String> {
    let cleaned: String = value.chars().filter(|c| !c.is_control()).collect();
    let mut cleaned = cleaned.trim();
    if cleaned.len() > MAX_OPTION_LEN {
        let mut end = MAX_OPTION_LEN;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned = cleaned[..end].trim_end();
    }
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Sanitize a client filename down to its final path component.
pub fn sanitize_filename(value: &str) -> Option<String> {
    let base = value.rsplit(['/', '\\']).next().unwrap_or(value);
    sanitize(base).filter(|name| name != "." && name != "..")
}

/// Content types that describe the transport, not the payload.
fn is_transport_type(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    content_type.starts_with("application/x-www-form-urlencoded")
        || content_type.starts_with("multipart/")
}

/// Build the record for a new payload.
///
/// `content_type` is the type the transport declared for the payload
/// itself, if any.
fn build_record(state: &AppState, options: &IngestOptions, content_type: Option<&str>) -> Record {
    let upload = &state.config.upload;
    let filename = options.filename.as_deref().and_then(sanitize_filename);

    let mime = options
        .mime
        .as_deref()
        .and_then(sanitize)
        .or_else(|| {
            content_type
                .filter(|ct| !is_transport_type(ct))
                .and_then(sanitize)
        })
        .or_else(|| {
            filename
                .as_deref()
                .and_then(|name| mime_for_filename(state.mime.as_ref(), name))
        })
        .unwrap_or_else(|| upload.default_mime.clone());

    let ttl = options
        .expire
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| u64::try_from(secs).ok())
        .unwrap_or(upload.default_expire_secs);

    let public = options
        .public
        .as_deref()
        .and_then(parse_bool)
        .unwrap_or(false);

    Record {
        filename,
        mime: Some(mime),
        public,
        ..Record::default()
    }
    .with_ttl(ttl, unix_now())
}

/// Streams payload chunks into a record, enforcing the size limit.
struct PayloadSink {
    writer: RecordWriter,
    max_size: u64,
}

impl PayloadSink {
    fn new(writer: RecordWriter, max_size: u64) -> Self {
        Self { writer, max_size }
    }

    async fn push(&mut self, chunk: Bytes) -> ApiResult<()> {
        let total = self.writer.bytes_written() + chunk.len() as u64;
        if total > self.max_size {
            return Err(ApiError::PayloadTooLarge {
                limit: self.max_size,
            });
        }
        self.writer.write(chunk).await?;
        Ok(())
    }

    /// Commit the record, or roll it back if `result` failed or nothing
    /// was written. Returns the payload size.
    async fn complete(self, result: ApiResult<()>) -> ApiResult<u64> {
        let id = self.writer.id().to_string();
        let outcome = match result {
            Ok(()) if self.writer.bytes_written() == 0 => Err(ApiError::EmptyPayload),
            Ok(()) => return self.writer.finish().await.map_err(ApiError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = self.writer.abort().await {
            tracing::error!(id = %id, error = %e, "failed to remove aborted record");
        }
        outcome
    }
}

fn multipart_error(err: MultipartError, max_size: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit: max_size }
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// POST / and PUT / - store a new record.
pub async fn ingest(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    headers: HeaderMap,
    req: Request,
) -> ApiResult<Response> {
    let max_size = state.config.upload.max_size;
    let client = client_address(&req, &state.throttle);
    let format = ReplyFormat::select(query.ret.as_deref(), &headers);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let is_multipart = content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"));
    let is_form = !is_multipart && query.input.as_deref() == Some("form");

    // Reject a declared oversize body before reading any of it.
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let allowed = if is_multipart || is_form {
        max_size.saturating_add(FORM_OVERHEAD)
    } else {
        max_size
    };
    if declared.is_some_and(|len| len > allowed) {
        return Err(ApiError::PayloadTooLarge { limit: max_size });
    }

    let options = query.options.or(IngestOptions::from_headers(&headers));

    let record = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        ingest_multipart(&state, multipart, options).await?
    } else if is_form {
        let Form(input) = Form::<FormInput>::from_request(req, &state)
            .await
            .map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ApiError::PayloadTooLarge { limit: max_size }
                } else {
                    ApiError::BadRequest(e.body_text())
                }
            })?;
        let options = options.or(input.options);
        let mut record = build_record(&state, &options, None);
        let writer = state.store.insert(&mut record).await?;
        let mut sink = PayloadSink::new(writer, max_size);
        let result = sink.push(Bytes::from(input.content)).await;
        record.size = sink.complete(result).await?;
        record
    } else {
        let mut record = build_record(&state, &options, content_type.as_deref());
        let writer = state.store.insert(&mut record).await?;
        let mut sink = PayloadSink::new(writer, max_size);
        let mut stream = req.into_body().into_data_stream();
        let result = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
                sink.push(chunk).await?;
            }
            Ok::<(), ApiError>(())
        }
        .await;
        record.size = sink.complete(result).await?;
        record
    };

    if record.public
        && let Err(e) = state.public.add(&record.id).await
    {
        tracing::warn!(id = %record.id, error = %e, "failed to update public listing");
    }

    RECORDS_CREATED.inc();
    BYTES_INGESTED.inc_by(record.size);
    tracing::info!(
        id = %record.id,
        size = record.size,
        client = %client,
        public = record.public,
        "record created"
    );

    let url = state.record_url(&record.id);
    Ok(reply::created(format, url, &record))
}

/// Read option fields up to the `file` field and stream the file.
async fn ingest_multipart(
    state: &AppState,
    mut multipart: Multipart,
    mut options: IngestOptions,
) -> ApiResult<Record> {
    let max_size = state.config.upload.max_size;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" {
            let value = field
                .text()
                .await
                .map_err(|e| multipart_error(e, max_size))?;
            if !options.set_field(&name, value) {
                tracing::debug!(field = %name, "ignoring unknown form field");
            }
            continue;
        }

        if options.filename.is_none() {
            options.filename = field.file_name().map(str::to_string);
        }
        let field_type = field.content_type().map(str::to_string);
        let mut record = build_record(state, &options, field_type.as_deref());

        let writer = state.store.insert(&mut record).await?;
        let mut sink = PayloadSink::new(writer, max_size);
        let result = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| multipart_error(e, max_size))?
            {
                sink.push(chunk).await?;
            }
            Ok::<(), ApiError>(())
        }
        .await;
        record.size = sink.complete(result).await?;
        return Ok(record);
    }

    Err(ApiError::BadRequest("missing file field".to_string()))
}
