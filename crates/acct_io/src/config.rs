//! Search backend and mail configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{IoError, IoResult};

pub const DEFAULT_ES_PORT: u16 = 9200;
pub const DEFAULT_INDEX: &str = "htcondor-000001";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// `host` or `host:port`.
    #[serde(alias = "es_host")]
    pub host: String,
    /// Scheme prefix such as `http://`; ignored when `use_https` is set.
    #[serde(alias = "es_url_prefix")]
    pub url_prefix: Option<String>,
    #[serde(alias = "es_index")]
    pub index: String,
    #[serde(alias = "es_user")]
    pub user: Option<String>,
    #[serde(alias = "es_pass", alias = "es_password")]
    pub password: Option<String>,
    #[serde(alias = "es_password_file")]
    pub password_file: Option<PathBuf>,
    #[serde(alias = "es_use_https")]
    pub use_https: bool,
    #[serde(alias = "es_ca_certs")]
    pub ca_certs: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            url_prefix: None,
            index: DEFAULT_INDEX.to_string(),
            user: None,
            password: None,
            password_file: None,
            use_https: false,
            ca_certs: None,
            timeout_secs: 120,
        }
    }
}

impl SearchConfig {
    /// Load options from a JSON object (plain or `es_`-prefixed keys).
    pub fn from_json_file(path: &Path) -> IoResult<Self> {
        crate::cache::read_json(path)
    }

    /// Scheme, host and port joined into a base URL without a trailing slash.
    pub fn base_url(&self) -> IoResult<String> {
        let (host, port) = parse_host(&self.host)?;
        let scheme = if self.use_https {
            "https"
        } else {
            self.url_prefix
                .as_deref()
                .map(|p| p.trim().trim_end_matches("://"))
                .filter(|p| !p.is_empty())
                .unwrap_or("http")
        };
        Ok(format!("{scheme}://{host}:{port}"))
    }

    /// Basic-auth pair when both halves are configured.
    ///
    /// A password file wins over an inline password. A lone user or password
    /// logs a warning and the client connects anonymously.
    pub fn credentials(&self) -> IoResult<Option<(String, String)>> {
        let password = match &self.password_file {
            Some(p) => Some(read_secret(p)?),
            None => self.password.clone(),
        };
        match (&self.user, password) {
            (None, None) => Ok(None),
            (Some(u), Some(p)) => Ok(Some((u.clone(), p))),
            _ => {
                tracing::warn!("only one of the search user and password is defined");
                tracing::warn!("connecting to the search backend anonymously");
                Ok(None)
            }
        }
    }
}

/// Split `host[:port]`; the port defaults to 9200.
pub fn parse_host(raw: &str) -> IoResult<(String, u16)> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw)
        .trim_end_matches('/');
    let mut parts = raw.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(h), None, None) if !h.is_empty() => Ok((h.to_string(), DEFAULT_ES_PORT)),
        (Some(h), Some(p), None) if !h.is_empty() => {
            let port = p
                .parse::<u16>()
                .map_err(|_| IoError::Config(format!("invalid port in host: {raw}")))?;
            Ok((h.to_string(), port))
        }
        (Some(""), ..) => Err(IoError::Config("empty host".into())),
        _ => Err(IoError::Config(format!("ambiguous host:port in given host: {raw}"))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub reply_to: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Relays tried in order for every recipient.
    pub smtp_servers: Vec<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "accounting@chtc.wisc.edu".to_string(),
            reply_to: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            smtp_servers: vec!["localhost".to_string()],
            smtp_port: 25,
            smtp_username: None,
            smtp_password_file: None,
            timeout_secs: 60,
        }
    }
}

impl MailConfig {
    /// Username and password when both are configured.
    pub fn smtp_credentials(&self) -> IoResult<Option<(String, String)>> {
        match (&self.smtp_username, &self.smtp_password_file) {
            (Some(u), Some(p)) => Ok(Some((u.clone(), read_secret(p)?))),
            (None, None) => Ok(None),
            _ => {
                tracing::warn!("only one of smtp username and password file is defined, sending unauthenticated");
                Ok(None)
            }
        }
    }

    /// Every envelope recipient: To, then Cc, then Bcc.
    pub fn all_recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().chain(&self.cc).chain(&self.bcc).map(String::as_str)
    }
}

/// Split a comma list, trimming entries and dropping empties.
pub fn split_addrs(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn read_secret(path: &Path) -> IoResult<String> {
    let s = fs::read_to_string(path).map_err(|e| IoError::Config(format!("{}: {e}", path.display())))?;
    Ok(s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_parsing() {
        assert_eq!(parse_host("es.example.org").unwrap(), ("es.example.org".into(), 9200));
        assert_eq!(parse_host("es.example.org:443").unwrap(), ("es.example.org".into(), 443));
        assert_eq!(parse_host("http://localhost:9201/").unwrap(), ("localhost".into(), 9201));
        let err = parse_host("a:b:c").unwrap_err();
        assert!(err.to_string().contains("ambiguous host:port"));
        assert!(parse_host("host:notaport").is_err());
    }

    #[test]
    fn base_url_prefers_https_flag() {
        let mut c = SearchConfig { host: "es:9200".into(), ..SearchConfig::default() };
        assert_eq!(c.base_url().unwrap(), "http://es:9200");
        c.url_prefix = Some("http://".into());
        assert_eq!(c.base_url().unwrap(), "http://es:9200");
        c.use_https = true;
        assert_eq!(c.base_url().unwrap(), "https://es:9200");
    }

    #[test]
    fn lone_credential_connects_anonymously() {
        let c = SearchConfig { user: Some("u".into()), ..SearchConfig::default() };
        assert_eq!(c.credentials().unwrap(), None);
        let c = SearchConfig {
            user: Some("u".into()),
            password: Some("p".into()),
            ..SearchConfig::default()
        };
        assert_eq!(c.credentials().unwrap(), Some(("u".into(), "p".into())));
    }

    #[test]
    fn password_file_wins_and_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let pw = dir.path().join("pw");
        fs::write(&pw, "secret\n").unwrap();
        let c = SearchConfig {
            user: Some("u".into()),
            password: Some("inline".into()),
            password_file: Some(pw),
            ..SearchConfig::default()
        };
        assert_eq!(c.credentials().unwrap(), Some(("u".into(), "secret".into())));
    }

    #[test]
    fn json_file_accepts_prefixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("es.json");
        fs::write(&p, r#"{"es_host": "es:9201", "es_index": "chtc-schedd-*", "es_use_https": true}"#).unwrap();
        let c = SearchConfig::from_json_file(&p).unwrap();
        assert_eq!(c.host, "es:9201");
        assert_eq!(c.index, "chtc-schedd-*");
        assert!(c.use_https);
        assert_eq!(c.timeout_secs, 120);
    }

    #[test]
    fn addr_lists() {
        assert_eq!(split_addrs("a@x, b@y,,c@z "), vec!["a@x", "b@y", "c@z"]);
        assert!(split_addrs("").is_empty());
        let m = MailConfig {
            to: vec!["a".into()],
            cc: vec!["b".into()],
            bcc: vec!["c".into()],
            ..MailConfig::default()
        };
        assert_eq!(m.all_recipients().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
