use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::domain::ObservationId;
use crate::error::HsaError;
use crate::products::ProductMap;
use crate::table::ObservationTable;

const INVOKE_URL: &str = "https://mast.stsci.edu/api/v0/invoke";

/// A `Mast.Bundle.Request` payload: the products of an observation table
/// packaged server-side into one tar.gz.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleRequest {
    pub url_list: Vec<String>,
    pub path_list: Vec<String>,
    pub product_types: Vec<String>,
    pub filename: String,
    pub extension: String,
}

impl BundleRequest {
    /// Build the bundle for every desired product of every table row.
    pub fn from_table(
        table: &ObservationTable,
        products: &ProductMap,
        filename: &str,
    ) -> Result<Self, HsaError> {
        let mut url_list = Vec::new();
        let mut path_list = Vec::new();
        let mut product_types = Vec::new();
        for row in table.rows() {
            let id: ObservationId = row.observation_id()?.parse()?;
            for product in products.products_for(&row.instdet()?) {
                let lower = product.to_lowercase();
                url_list.push(format!(
                    "mast:HST/product/{0}/{0}_{1}.fits",
                    id.lower(),
                    lower
                ));
                path_list.push(format!("MAST/{}_{}.fits", id.lower(), lower));
                product_types.push("image".to_string());
            }
        }
        Ok(Self {
            url_list,
            path_list,
            product_types,
            filename: filename.to_string(),
            extension: "tar.gz".to_string(),
        })
    }

    /// The JSON string sent as the `request=` form field.
    pub fn to_request_json(&self) -> Result<String, HsaError> {
        let payload = MastPayload {
            service: "Mast.Bundle.Request",
            params: BundleParams {
                url_list: self.url_list.join(","),
                filename: &self.filename,
                path_list: self.path_list.join(","),
                description_list: Vec::new(),
                product_type_list: &self.product_types,
                extension: &self.extension,
            },
            format: "json",
            page: 1,
            pagesize: 1000,
        };
        serde_json::to_string(&payload).map_err(|err| HsaError::MastHttp(err.to_string()))
    }
}

#[derive(Serialize)]
struct MastPayload<'a> {
    service: &'static str,
    params: BundleParams<'a>,
    format: &'static str,
    page: u32,
    pagesize: u32,
}

#[derive(Serialize)]
struct BundleParams<'a> {
    #[serde(rename = "urlList")]
    url_list: String,
    filename: &'a str,
    #[serde(rename = "pathList")]
    path_list: String,
    #[serde(rename = "descriptionList")]
    description_list: Vec<String>,
    #[serde(rename = "productTypeList")]
    product_type_list: &'a [String],
    extension: &'a str,
}

/// Packaged-download handle returned by the Mashup API.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    pub url: String,
    pub raw_json: Value,
}

pub trait MastClient: Send + Sync {
    fn request_bundle(&self, bundle: &BundleRequest) -> Result<BundleInfo, HsaError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), HsaError>;
}

#[derive(Clone)]
pub struct MastHttpClient {
    client: Client,
}

impl MastHttpClient {
    pub fn new() -> Result<Self, HsaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hsa-fp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HsaError::Filesystem(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HsaError::MastHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HsaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "MAST request failed".to_string());
        Err(HsaError::MastStatus { status, message })
    }
}

impl MastClient for MastHttpClient {
    fn request_bundle(&self, bundle: &BundleRequest) -> Result<BundleInfo, HsaError> {
        let request_json = bundle.to_request_json()?;
        tracing::debug!(products = bundle.url_list.len(), "requesting MAST bundle");
        let response = self
            .client
            .post(INVOKE_URL)
            .form(&[("request", request_json)])
            .send()
            .map_err(|err| HsaError::MastHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let raw_json: Value = response
            .json()
            .map_err(|err| HsaError::MastHttp(err.to_string()))?;
        let url = raw_json
            .get("url")
            .and_then(|value| value.as_str())
            .ok_or_else(|| HsaError::MastBundle(raw_json.to_string()))?
            .to_string();
        Ok(BundleInfo { url, raw_json })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), HsaError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HsaError::MastHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| HsaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObservationTable {
        ObservationTable::from_csv_str(
            "observation_id,instrument,detector\n\
             IB2U01AFQ,WFC3,IR\n\
             JCDU01AAQ,ACS,WFC\n",
        )
        .unwrap()
    }

    #[test]
    fn bundle_lists_follow_products() {
        let bundle =
            BundleRequest::from_table(&sample(), &ProductMap::default(), "mastDownload").unwrap();
        assert_eq!(
            bundle.url_list,
            vec![
                "mast:HST/product/ib2u01afq/ib2u01afq_raw.fits",
                "mast:HST/product/jcdu01aaq/jcdu01aaq_flc.fits",
            ]
        );
        assert_eq!(
            bundle.path_list,
            vec!["MAST/ib2u01afq_raw.fits", "MAST/jcdu01aaq_flc.fits"]
        );
        assert_eq!(bundle.product_types, vec!["image", "image"]);
    }

    #[test]
    fn request_json_shape() {
        let bundle =
            BundleRequest::from_table(&sample(), &ProductMap::default(), "mastDownload").unwrap();
        let json: Value = serde_json::from_str(&bundle.to_request_json().unwrap()).unwrap();
        assert_eq!(json["service"], "Mast.Bundle.Request");
        assert_eq!(json["format"], "json");
        assert_eq!(json["page"], 1);
        assert_eq!(json["pagesize"], 1000);
        assert_eq!(json["params"]["filename"], "mastDownload");
        assert_eq!(json["params"]["extension"], "tar.gz");
        assert_eq!(
            json["params"]["urlList"],
            "mast:HST/product/ib2u01afq/ib2u01afq_raw.fits,mast:HST/product/jcdu01aaq/jcdu01aaq_flc.fits"
        );
    }
}
