use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::DustModel;
use crate::error::HsaError;

const DUST_URL: &str = "https://irsa.ipac.caltech.edu/cgi-bin/DUST/nph-dust";

pub trait DustClient: Send + Sync {
    /// Galactic color excess E(B-V) at a position, in magnitudes.
    fn reddening(&self, ra: f64, dec: f64, model: DustModel) -> Result<f64, HsaError>;
}

#[derive(Clone)]
pub struct DustHttpClient {
    client: Client,
}

impl DustHttpClient {
    pub fn new() -> Result<Self, HsaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hsa-fp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HsaError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HsaError::DustHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn query_url(ra: f64, dec: f64) -> String {
        format!("{DUST_URL}?locstr={ra:.4}+{dec:.4}+equ+j2000")
    }
}

impl DustClient for DustHttpClient {
    fn reddening(&self, ra: f64, dec: f64, model: DustModel) -> Result<f64, HsaError> {
        let url = Self::query_url(ra, dec);
        tracing::debug!(%url, "querying IRSA dust service");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HsaError::DustHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "IRSA dust request failed".to_string());
            return Err(HsaError::DustStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| HsaError::DustHttp(err.to_string()))?;
        parse_reddening(&body, model)
    }
}

/// Pull the reference-pixel reddening out of the XML statistics block.
///
/// The value element holds text like `0.0319 (mag)`; only the leading
/// number is meaningful.
pub fn parse_reddening(xml: &str, model: DustModel) -> Result<f64, HsaError> {
    let element = match model {
        DustModel::Sandf => "refPixelValueSandF",
        DustModel::Sfd => "refPixelValueSFD",
    };
    let document =
        roxmltree::Document::parse(xml).map_err(|err| HsaError::DustParse(err.to_string()))?;
    let node = document
        .descendants()
        .find(|node| node.has_tag_name(element))
        .ok_or_else(|| HsaError::DustParse(format!("missing element {element}")))?;
    let text = node
        .text()
        .ok_or_else(|| HsaError::DustParse(format!("empty element {element}")))?;
    let first = text
        .split_whitespace()
        .next()
        .ok_or_else(|| HsaError::DustParse(format!("empty element {element}")))?;
    first
        .parse::<f64>()
        .map_err(|_| HsaError::DustParse(format!("non-numeric value in {element}: {first}")))
}
