//! Reply rendering: plain text, JSON or HTML.

use axum::Json;
use axum::http::HeaderMap;
use axum::http::header::ACCEPT;
use axum::response::{Html, IntoResponse, Response};
use pasta_core::Record;
use pasta_core::config::AppConfig;
use serde::Serialize;
use std::fmt::Write;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Representation of a reply, chosen by `?ret=` or the `Accept` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyFormat {
    #[default]
    Text,
    Json,
    Html,
}

impl ReplyFormat {
    /// Pick the format: an explicit `ret` value wins, then `Accept`, then text.
    pub fn select(ret: Option<&str>, headers: &HeaderMap) -> Self {
        if let Some(ret) = ret {
            match ret.trim().to_ascii_lowercase().as_str() {
                "json" => return Self::Json,
                "html" => return Self::Html,
                "text" | "txt" | "plain" => return Self::Text,
                _ => {}
            }
        }

        let accept = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if accept.contains("application/json") {
            Self::Json
        } else if accept.contains("text/html") {
            Self::Html
        } else {
            Self::Text
        }
    }
}

/// Body of a successful ingestion.
#[derive(Debug, Serialize)]
pub struct CreatedReply {
    pub url: String,
    pub token: String,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<i64>,
}

/// One resolved entry of the public listing.
#[derive(Debug, Serialize)]
pub struct PublicEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<i64>,
}

/// Reply to a successful ingestion. The token is part of every format.
pub fn created(format: ReplyFormat, url: String, record: &Record) -> Response {
    let reply = CreatedReply {
        url,
        token: record.token.clone(),
        expire: record.expire_at,
    };

    match format {
        ReplyFormat::Json => Json(reply).into_response(),
        ReplyFormat::Text => {
            let mut text = format!("url:   {}\ntoken: {}\n", reply.url, reply.token);
            if let Some(expire) = reply.expire.and_then(rfc3339) {
                let _ = writeln!(text, "expire: {expire}");
            }
            text.into_response()
        }
        ReplyFormat::Html => {
            let url = escape_html(&reply.url);
            let delete = escape_html(&format!(
                "/delete?id={}&token={}",
                record.id, reply.token
            ));
            let expire = reply
                .expire
                .and_then(rfc3339)
                .unwrap_or_else(|| "never".to_string());
            let body = format!(
                "<p>Your paste: <a href=\"{url}\">{url}</a></p>\n\
                 <p>Expires: {expire}</p>\n\
                 <p>Token: <code>{token}</code></p>\n\
                 <p><a href=\"{delete}\">Delete this paste</a></p>\n",
                token = escape_html(&reply.token),
            );
            Html(page("Paste created", &body)).into_response()
        }
    }
}

/// Reply listing public records.
pub fn listing(format: ReplyFormat, entries: Vec<PublicEntry>) -> Response {
    match format {
        ReplyFormat::Json => Json(entries).into_response(),
        ReplyFormat::Text => {
            let mut text = String::new();
            for entry in &entries {
                let _ = writeln!(
                    text,
                    "{}\t{}\t{}\t{}",
                    entry.url,
                    entry.filename.as_deref().unwrap_or("-"),
                    entry.size,
                    entry.expire.and_then(rfc3339).as_deref().unwrap_or("never"),
                );
            }
            text.into_response()
        }
        ReplyFormat::Html => {
            let mut rows = String::new();
            for entry in &entries {
                let url = escape_html(&entry.url);
                let _ = writeln!(
                    rows,
                    "<tr><td><a href=\"{url}\">{url}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape_html(entry.filename.as_deref().unwrap_or("")),
                    entry.size,
                    entry.expire.and_then(rfc3339).as_deref().unwrap_or("never"),
                );
            }
            let body = format!(
                "<table>\n<tr><th>Paste</th><th>Filename</th><th>Size</th><th>Expires</th></tr>\n\
                 {rows}</table>\n"
            );
            Html(page("Public pastes", &body)).into_response()
        }
    }
}

/// Landing page with usage and upload forms.
pub fn index_page(config: &AppConfig, public_enabled: bool) -> Html<String> {
    let base = escape_html(config.server.base_url.trim_end_matches('/'));
    let mut body = format!(
        "<p>Upload with curl:</p>\n\
         <pre>curl --data-binary @file.txt {base}/</pre>\n\
         <p>Maximum size: {max} bytes.</p>\n\
         <h2>Upload a file</h2>\n\
         <form method=\"post\" action=\"/?ret=html\" enctype=\"multipart/form-data\">\n\
         <input type=\"text\" name=\"expire\" placeholder=\"expire (seconds)\">\n\
         <label><input type=\"checkbox\" name=\"public\" value=\"true\"> public</label>\n\
         <input type=\"file\" name=\"file\">\n\
         <input type=\"submit\" value=\"Upload\">\n\
         </form>\n\
         <h2>Paste text</h2>\n\
         <form method=\"post\" action=\"/?ret=html&amp;input=form\">\n\
         <textarea name=\"content\" rows=\"20\" cols=\"80\"></textarea><br>\n\
         <input type=\"text\" name=\"filename\" placeholder=\"filename\">\n\
         <input type=\"text\" name=\"expire\" placeholder=\"expire (seconds)\">\n\
         <label><input type=\"checkbox\" name=\"public\" value=\"true\"> public</label>\n\
         <input type=\"submit\" value=\"Paste\">\n\
         </form>\n",
        max = config.upload.max_size,
    );
    if public_enabled {
        body.push_str("<p><a href=\"/public\">Public pastes</a></p>\n");
    }
    Html(page("pasta", &body))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n"
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn rfc3339(timestamp: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

/// Format a unix timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(timestamp: i64) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()?
        .format(&format)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn record() -> Record {
        Record {
            id: "abcdefgh".to_string(),
            token: "TOKENtoken123456".to_string(),
            expire_at: Some(784_111_777),
            ..Record::default()
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_select_prefers_ret() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(ReplyFormat::select(Some("json"), &headers), ReplyFormat::Json);
        assert_eq!(ReplyFormat::select(Some("TEXT"), &headers), ReplyFormat::Text);
        assert_eq!(ReplyFormat::select(Some("bogus"), &headers), ReplyFormat::Html);
        assert_eq!(ReplyFormat::select(None, &headers), ReplyFormat::Html);
        assert_eq!(ReplyFormat::select(None, &HeaderMap::new()), ReplyFormat::Text);
    }

    #[tokio::test]
    async fn test_created_text() {
        let response = created(
            ReplyFormat::Text,
            "http://localhost:8199/abcdefgh".to_string(),
            &record(),
        );
        assert_eq!(
            body_text(response).await,
            "url:   http://localhost:8199/abcdefgh\ntoken: TOKENtoken123456\n\
             expire: 1994-11-06T08:49:37Z\n"
        );
    }

    #[tokio::test]
    async fn test_created_json_omits_missing_expiry() {
        let mut record = record();
        record.expire_at = None;
        let response = created(ReplyFormat::Json, "u".to_string(), &record);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["url"], "u");
        assert_eq!(json["token"], "TOKENtoken123456");
        assert!(json.get("expire").is_none());
    }

    #[tokio::test]
    async fn test_created_html_links_delete() {
        let response = created(ReplyFormat::Html, "http://x/abcdefgh".to_string(), &record());
        let html = body_text(response).await;
        assert!(html.contains("/delete?id=abcdefgh&amp;token=TOKENtoken123456"));
        assert!(html.contains("TOKENtoken123456"));
    }

    #[test]
    fn test_http_date() {
        assert_eq!(
            http_date(784_111_777).as_deref(),
            Some("Sun, 06 Nov 1994 08:49:37 GMT")
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">&'"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }
}
