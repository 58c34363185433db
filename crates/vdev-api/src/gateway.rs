// Gateway variable REST client
//
// Variables live in two independent numeric pools ("spaces") on the
// gateway. Reads return a small XML document; writes are plain GETs with
// the value in the path. The address table and value formatting are part
// of the wire contract and must stay bit-exact.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Variable addressing ─────────────────────────────────────────────

/// Variable type code as configured per field (1..=4).
///
/// | code | space | read tag | write tag |
/// |------|-------|----------|-----------|
/// | 1    | `2`   | `val`    | `set`     |
/// | 2    | `2`   | `init`   | `init`    |
/// | 3    | `1`   | `val`    | `set`     |
/// | 4    | `1`   | `init`   | `init`    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    StateValue,
    StateInit,
    IntegerValue,
    IntegerInit,
}

impl VarType {
    pub fn from_code(code: i64) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::StateValue),
            2 => Ok(Self::StateInit),
            3 => Ok(Self::IntegerValue),
            4 => Ok(Self::IntegerInit),
            other => Err(Error::UnknownVarType(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::StateValue => 1,
            Self::StateInit => 2,
            Self::IntegerValue => 3,
            Self::IntegerInit => 4,
        }
    }

    /// Address space on the gateway.
    pub fn space(self) -> &'static str {
        match self {
            Self::StateValue | Self::StateInit => "2",
            Self::IntegerValue | Self::IntegerInit => "1",
        }
    }

    /// XML element the current value is read from.
    pub fn read_tag(self) -> &'static str {
        match self {
            Self::StateValue | Self::IntegerValue => "val",
            Self::StateInit | Self::IntegerInit => "init",
        }
    }

    /// Path verb used when writing.
    pub fn write_tag(self) -> &'static str {
        match self {
            Self::StateValue | Self::IntegerValue => "set",
            Self::StateInit | Self::IntegerInit => "init",
        }
    }
}

/// Positive variable id. Zero means "disabled" and never gets here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(u32);

impl VarId {
    pub fn new(raw: i64) -> Result<Self, Error> {
        u32::try_from(raw)
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or_else(|| Error::InvalidVarId(raw.to_string()))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated (type, id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarAddress {
    pub var_type: VarType,
    pub id: VarId,
}

impl VarAddress {
    pub fn resolve(var_type: i64, var_id: i64) -> Result<Self, Error> {
        Ok(Self {
            var_type: VarType::from_code(var_type)?,
            id: VarId::new(var_id)?,
        })
    }

    /// `rest/vars/get/{space}/{id}`
    pub fn read_path(&self) -> String {
        format!("rest/vars/get/{}/{}", self.var_type.space(), self.id)
    }

    /// `rest/vars/{set|init}/{space}/{id}/{value}`
    pub fn write_path(&self, value: f64) -> String {
        format!(
            "rest/vars/{}/{}/{}/{}",
            self.var_type.write_tag(),
            self.var_type.space(),
            self.id,
            format_value(value)
        )
    }
}

impl fmt::Display for VarAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.var_type.code(), self.id)
    }
}

// ── Reply parsing ───────────────────────────────────────────────────

/// Parsed variable reply: the raw integer and the declared precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarReading {
    pub raw: i64,
    pub prec: Option<i64>,
}

impl VarReading {
    pub fn parse(xml: &str, var_type: VarType) -> Result<Self, Error> {
        let tag = var_type.read_tag();
        let raw = extract_tag(xml, tag)
            .and_then(|text| text.trim().parse::<i64>().ok())
            .ok_or(Error::MissingTag { tag })?;
        let prec = extract_tag(xml, "prec").and_then(|text| text.trim().parse::<i64>().ok());
        Ok(Self { raw, prec })
    }

    /// `raw / (prec * 10)` when `prec > 0`, otherwise `raw`.
    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    pub fn scaled(&self) -> f64 {
        match self.prec {
            Some(prec) if prec > 0 => self.raw as f64 / (prec as f64 * 10.0),
            _ => self.raw as f64,
        }
    }

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    pub fn unscaled(&self) -> f64 {
        self.raw as f64
    }
}

/// Text content of the first `<tag>` element (attributes allowed).
pub fn extract_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search_from = 0;

    while let Some(offset) = xml[search_from..].find(open.as_str()) {
        let start = search_from + offset;
        let after_name = &xml[start + open.len()..];
        // Reject prefixes of longer element names (`<val` vs `<value>`).
        match after_name.chars().next() {
            Some('>') => {}
            Some(c) if c.is_whitespace() => {}
            _ => {
                search_from = start + open.len();
                continue;
            }
        }
        let body_start = start + open.len() + after_name.find('>')? + 1;
        let body_len = xml[body_start..].find(close.as_str())?;
        return Some(&xml[body_start..body_start + body_len]);
    }
    None
}

/// Format a value the way the gateway expects it in a write path:
/// always a float literal (`72.0`, `0.5`, `-3.25`).
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Result of a [`GatewayClient::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The gateway already held the value; nothing was written.
    Unchanged,
    /// A write request was issued and accepted.
    Written,
    /// Addressing was invalid or the write failed. Already logged.
    Failed,
}

/// Client for the gateway's `/rest/vars` surface.
///
/// Every request carries HTTP basic auth. `pull` and `push` never return
/// errors: failures are logged and surface as "no value" / `Failed`.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
}

impl GatewayClient {
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, username, password))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            username: username.into(),
            password,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    async fn get_text(&self, url: Url) -> Result<String, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }

    /// Read and parse one variable.
    pub async fn read(&self, address: VarAddress) -> Result<VarReading, Error> {
        let url = self.url(&address.read_path())?;
        let body = self.get_text(url).await?;
        VarReading::parse(&body, address.var_type)
    }

    /// Read a variable, optionally applying its precision scale.
    pub async fn pull(&self, var_type: i64, var_id: i64, apply_scale: bool) -> Option<f64> {
        let address = match VarAddress::resolve(var_type, var_id) {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, var_type, var_id, "variable pull skipped");
                return None;
            }
        };

        match self.read(address).await {
            Ok(reading) if apply_scale => Some(reading.scaled()),
            Ok(reading) => Some(reading.unscaled()),
            Err(e) => {
                warn!(error = %e, var = %address, "variable pull failed");
                None
            }
        }
    }

    /// Write `value` unless the gateway already holds it.
    ///
    /// The comparison read and the write are not atomic; a concurrent
    /// writer on the same variable can slip in between.
    #[allow(clippy::float_cmp)]
    pub async fn push(&self, var_type: i64, var_id: i64, value: f64) -> PushOutcome {
        let address = match VarAddress::resolve(var_type, var_id) {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, var_type, var_id, "variable push skipped");
                return PushOutcome::Failed;
            }
        };

        match self.read(address).await {
            Ok(reading) if reading.scaled() == value => {
                debug!(var = %address, value, "variable already current");
                return PushOutcome::Unchanged;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, var = %address, "pre-write read failed"),
        }

        let url = match self.url(&address.write_path(value)) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, var = %address, "variable push skipped");
                return PushOutcome::Failed;
            }
        };

        match self.get_text(url).await {
            Ok(_) => {
                info!(var = %address, value, "variable written");
                PushOutcome::Written
            }
            Err(e) => {
                warn!(error = %e, var = %address, value, "variable write failed");
                PushOutcome::Failed
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
