//! Search backend seam and the blocking HTTP client for an
//! Elasticsearch-compatible REST API.

use serde_json::Value;

use crate::IoResult;

/// A scroll scan: body, page size and scroll keep-alive (e.g. `30s`).
#[derive(Clone, Debug, PartialEq)]
pub struct ScanQuery {
    pub body: Value,
    pub page_size: usize,
    pub scroll: String,
}

impl ScanQuery {
    pub fn new(body: Value) -> Self {
        Self { body, page_size: 1000, scroll: "30s".to_string() }
    }

    pub fn with_page(mut self, page_size: usize, scroll: &str) -> Self {
        self.page_size = page_size;
        self.scroll = scroll.to_string();
        self
    }
}

/// Operations the report runs need from the search backend.
pub trait SearchBackend {
    /// Scroll through every hit, calling `on_hit` with its `_source`.
    /// Returns the number of hits seen.
    fn scan(&self, index: &str, query: &ScanQuery, on_hit: &mut dyn FnMut(&Value)) -> IoResult<u64>;

    /// One plain search (aggregation queries).
    fn search(&self, index: &str, body: &Value) -> IoResult<Value>;

    fn index_exists(&self, index: &str) -> IoResult<bool>;

    fn create_index(&self, index: &str, body: &Value) -> IoResult<()>;

    fn index_document(&self, index: &str, id: &str, body: &Value) -> IoResult<()>;
}

/// Cut `body` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(feature = "http")]
pub use http::HttpSearchClient;

#[cfg(feature = "http")]
mod http {
    use std::fs;
    use std::time::Duration;

    use reqwest::blocking::{Client, RequestBuilder, Response};
    use reqwest::{Method, StatusCode, Url};
    use serde_json::{json, Value};

    use super::{truncate_body, ScanQuery, SearchBackend};
    use crate::config::SearchConfig;
    use crate::{IoError, IoResult};

    const ERROR_BODY_LIMIT: usize = 512;

    pub struct HttpSearchClient {
        http: Client,
        base: Url,
        auth: Option<(String, String)>,
    }

    impl HttpSearchClient {
        pub fn new(cfg: &SearchConfig) -> IoResult<Self> {
            let base_str = cfg.base_url()?;
            let base = Url::parse(&base_str)
                .map_err(|e| IoError::Config(format!("bad search url {base_str}: {e}")))?;

            let mut builder = Client::builder().timeout(Duration::from_secs(cfg.timeout_secs));
            if cfg.use_https {
                match &cfg.ca_certs {
                    Some(path) => {
                        let pem = fs::read(path)
                            .map_err(|e| IoError::Config(format!("{}: {e}", path.display())))?;
                        let cert = reqwest::Certificate::from_pem(&pem)?;
                        builder = builder.add_root_certificate(cert);
                        tracing::info!(path = %path.display(), "using CA from file");
                    }
                    None => tracing::info!("using CA from the bundled webpki roots"),
                }
            }

            Ok(Self { http: builder.build()?, base, auth: cfg.credentials()? })
        }

        fn url(&self, segments: &[&str]) -> IoResult<Url> {
            let mut url = self.base.clone();
            url.path_segments_mut()
                .map_err(|_| IoError::Config(format!("search url cannot be a base: {}", self.base)))?
                .pop_if_empty()
                .extend(segments);
            Ok(url)
        }

        fn request(&self, method: Method, segments: &[&str]) -> IoResult<RequestBuilder> {
            let rb = self.http.request(method, self.url(segments)?);
            Ok(match &self.auth {
                Some((u, p)) => rb.basic_auth(u, Some(p)),
                None => rb,
            })
        }

        fn send_json(rb: RequestBuilder) -> IoResult<Value> {
            let resp = check(rb.send()?)?;
            Ok(resp.json::<Value>()?)
        }

        fn clear_scroll(&self, scroll_id: &str) {
            let res = self
                .request(Method::DELETE, &["_search", "scroll"])
                .and_then(|rb| Ok(rb.json(&json!({ "scroll_id": scroll_id })).send()?))
                .and_then(check);
            if let Err(e) = res {
                tracing::debug!(error = %e, "scroll clean-up failed");
            }
        }
    }

    fn check(resp: Response) -> IoResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(IoError::Http { status: status.as_u16(), body: truncate_body(&body, ERROR_BODY_LIMIT) })
    }

    fn hits(page: &Value) -> &[Value] {
        page.pointer("/hits/hits").and_then(Value::as_array).map_or(&[], Vec::as_slice)
    }

    impl SearchBackend for HttpSearchClient {
        fn scan(
            &self,
            index: &str,
            query: &ScanQuery,
            on_hit: &mut dyn FnMut(&Value),
        ) -> IoResult<u64> {
            let mut body = query.body.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.insert("size".into(), json!(query.page_size));
            }
            let rb = self
                .request(Method::POST, &[index, "_search"])?
                .query(&[("scroll", query.scroll.as_str())])
                .json(&body);
            let mut page = Self::send_json(rb)?;

            let mut seen: u64 = 0;
            let mut scroll_id: Option<String> = None;
            loop {
                if let Some(id) = page.get("_scroll_id").and_then(Value::as_str) {
                    scroll_id = Some(id.to_string());
                }
                let batch = hits(&page);
                if batch.is_empty() {
                    break;
                }
                for hit in batch {
                    if let Some(src) = hit.get("_source") {
                        on_hit(src);
                    }
                    seen += 1;
                }
                let Some(id) = scroll_id.as_deref() else {
                    break;
                };
                let rb = self
                    .request(Method::POST, &["_search", "scroll"])?
                    .json(&json!({ "scroll": query.scroll, "scroll_id": id }));
                page = Self::send_json(rb)?;
            }

            if let Some(id) = scroll_id {
                self.clear_scroll(&id);
            }
            tracing::debug!(index, hits = seen, "scan finished");
            Ok(seen)
        }

        fn search(&self, index: &str, body: &Value) -> IoResult<Value> {
            Self::send_json(self.request(Method::POST, &[index, "_search"])?.json(body))
        }

        fn index_exists(&self, index: &str) -> IoResult<bool> {
            let resp = self.request(Method::HEAD, &[index])?.send()?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(false),
                s if s.is_success() => Ok(true),
                _ => check(resp).map(|_| false),
            }
        }

        fn create_index(&self, index: &str, body: &Value) -> IoResult<()> {
            Self::send_json(self.request(Method::PUT, &[index])?.json(body)).map(|_| ())
        }

        fn index_document(&self, index: &str, id: &str, body: &Value) -> IoResult<()> {
            Self::send_json(self.request(Method::PUT, &[index, "_doc", id])?.json(body)).map(|_| ())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn url_segments_are_encoded() {
            let cfg = SearchConfig { host: "es:9201".into(), ..SearchConfig::default() };
            let c = HttpSearchClient::new(&cfg).unwrap();
            let u = c.url(&["daily_totals", "_doc", "a b_daily_2024-03-14"]).unwrap();
            assert_eq!(u.as_str(), "http://es:9201/daily_totals/_doc/a%20b_daily_2024-03-14");
            let u = c.url(&["chtc-schedd-*", "_search"]).unwrap();
            assert_eq!(u.as_str(), "http://es:9201/chtc-schedd-*/_search");
        }

        #[test]
        fn hits_pointer_tolerates_missing_keys() {
            assert!(hits(&json!({})).is_empty());
            assert_eq!(hits(&json!({"hits": {"hits": [{"_source": {}}]}})).len(), 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("short", 512), "short");
        let long = "é".repeat(400);
        let cut = truncate_body(&long, 513);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 516);
    }

    #[test]
    fn scan_query_defaults() {
        let q = ScanQuery::new(serde_json::json!({})).with_page(500, "5s");
        assert_eq!(q.page_size, 500);
        assert_eq!(q.scroll, "5s");
        assert_eq!(ScanQuery::new(serde_json::json!({})).scroll, "30s");
    }
}
