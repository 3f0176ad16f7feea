use std::io::Write;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::NamedTempFile;

use crate::domain::SkyBox;
use crate::error::HsaError;
use crate::table::ObservationTable;

const METADATA_URL: &str =
    "https://archives.esac.esa.int/ehst-sl-server/servlet/metadata-action";

/// Quantization scale for the JTARGNAME column added to query results.
const JTARGNAME_SCALE: f64 = 6.0;

/// AND-composed archive query; each optional predicate is OR-composed
/// internally.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub sky_box: Option<SkyBox>,
    pub proposal_ids: Vec<u32>,
    pub instruments: Vec<String>,
    pub filters: Vec<String>,
    pub extensions: Vec<String>,
    /// Raw clauses appended as-is, e.g. `OBSERVATION.INTENT LIKE 'Science'`.
    pub extra: Vec<String>,
}

impl QueryFilter {
    pub fn clauses(&self) -> Vec<String> {
        let mut clauses = Vec::new();

        if let Some(sky_box) = &self.sky_box {
            let dra = sky_box.radius_arcmin / 60.0 / sky_box.dec.to_radians().cos();
            let ddec = sky_box.radius_arcmin / 60.0;
            clauses.push(format!(
                "POSITION.RA > {} AND POSITION.RA < {} AND POSITION.DEC > {} AND POSITION.DEC < {}",
                sky_box.ra - dra,
                sky_box.ra + dra,
                sky_box.dec - ddec,
                sky_box.dec + ddec
            ));
        }

        if !self.proposal_ids.is_empty() {
            let group = self
                .proposal_ids
                .iter()
                .map(|id| format!("PROPOSAL.PROPOSAL_ID=={id}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({group})"));
        }

        for (column, values) in [
            ("INSTRUMENT.INSTRUMENT_NAME", &self.instruments),
            ("OPTICAL_ELEMENT.OPTICAL_ELEMENT_NAME", &self.filters),
            ("ARTIFACT.FILE_EXTENSION", &self.extensions),
        ] {
            if !values.is_empty() {
                let group = values
                    .iter()
                    .map(|value| format!("{column} LIKE '{value}'"))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                clauses.push(format!("({group})"));
            }
        }

        clauses.extend(self.extra.iter().cloned());
        clauses
    }
}

/// Field selection and response post-processing knobs, passed explicitly
/// instead of living as module globals.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub fields: Vec<String>,
    pub max_items: usize,
    /// Sorted by this column before renaming.
    pub sort_column: String,
    pub rename: Vec<(String, String)>,
    pub lowercase: bool,
    pub keep_tempfile: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            max_items: 100_000,
            sort_column: "OBSERVATION_ID".to_string(),
            rename: default_rename(),
            lowercase: true,
            keep_tempfile: false,
        }
    }
}

pub fn default_fields() -> Vec<String> {
    [
        "OBSERVATION.OBSERVATION_ID",
        "OBSERVATION.SET_ID",
        "OBSERVATION.EXPOSURE_DURATION",
        "TARGET.TARGET_NAME",
        "POSITION.RA",
        "POSITION.DEC",
        "POSITION.ECL_LAT",
        "POSITION.ECL_LON",
        "POSITION.GAL_LAT",
        "POSITION.GAL_LON",
        "POSITION.STC_S",
        "POSITION.FOV_SIZE",
        "POSITION.SPATIAL_RESOLUTION",
        "INSTRUMENT.INSTRUMENT_NAME",
        "DETECTOR.DETECTOR_NAME",
        "OPTICAL_ELEMENT.OPTICAL_ELEMENT_NAME",
        "PROPOSAL.PROPOSAL_ID",
        "PROPOSAL.SCIENCE_CATEGORY",
        "PROPOSAL.PI_NAME",
        "ARTIFACT.FILE_NAME",
        "ARTIFACT.FILE_EXTENSION",
    ]
    .iter()
    .map(|field| field.to_string())
    .collect()
}

pub fn default_rename() -> Vec<(String, String)> {
    [
        ("OPTICAL_ELEMENT_NAME", "FILTER"),
        ("EXPOSURE_DURATION", "EXPTIME"),
        ("INSTRUMENT_NAME", "INSTRUMENT"),
        ("DETECTOR_NAME", "DETECTOR"),
        ("STC_S", "FOOTPRINT"),
        ("SPATIAL_RESOLUTION", "PIXSCALE"),
        ("TARGET_NAME", "TARGET"),
        ("SET_ID", "VISIT"),
    ]
    .iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

pub fn request_url(filter: &QueryFilter, options: &QueryOptions) -> String {
    format!(
        "{METADATA_URL}?RESOURCE_CLASS=OBSERVATION&QUERY=({})&SELECTED_FIELDS={}&PAGE=1&PAGE_SIZE={}&RETURN_TYPE=CSV",
        filter.clauses().join(" AND "),
        options.fields.join(","),
        options.max_items
    )
    .replace(' ', "%20")
}

/// Parse the raw CSV response body into a post-processed table.
///
/// The body is staged through a tempfile with double quotes stripped, as
/// the archive emits stray quotes inside footprint fields. An empty body
/// is a typed `EmptyQuery` error carrying the composed clauses so callers
/// can report it and continue.
pub fn parse_response(
    body: &str,
    filter: &QueryFilter,
    options: &QueryOptions,
) -> Result<ObservationTable, HsaError> {
    if body.trim().is_empty() {
        return Err(HsaError::EmptyQuery(filter.clauses().join(" AND ")));
    }

    let mut tempfile =
        NamedTempFile::new().map_err(|err| HsaError::Filesystem(err.to_string()))?;
    tempfile
        .write_all(body.replace('"', "").as_bytes())
        .map_err(|err| HsaError::Filesystem(err.to_string()))?;
    tempfile
        .flush()
        .map_err(|err| HsaError::Filesystem(err.to_string()))?;

    let mut table = ObservationTable::from_csv_path(tempfile.path())?;

    if options.keep_tempfile {
        let (_, path) = tempfile
            .keep()
            .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        tracing::info!(path = %path.display(), "kept temporary CSV response");
    }

    table.sort_by_column(&options.sort_column)?;
    table.add_jtargname(JTARGNAME_SCALE)?;
    table.rename_columns(&options.rename);
    if options.lowercase {
        table.lowercase_columns();
    }
    Ok(table)
}

pub trait HsaClient: Send + Sync {
    fn search(
        &self,
        filter: &QueryFilter,
        options: &QueryOptions,
    ) -> Result<ObservationTable, HsaError>;
}

#[derive(Clone)]
pub struct HsaHttpClient {
    client: Client,
}

impl HsaHttpClient {
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
            .map_err(|err| HsaError::HsaHttp(err.to_string()))?;
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
            .unwrap_or_else(|_| "HSA request failed".to_string());
        Err(HsaError::HsaStatus { status, message })
    }
}

impl HsaClient for HsaHttpClient {
    fn search(
        &self,
        filter: &QueryFilter,
        options: &QueryOptions,
    ) -> Result<ObservationTable, HsaError> {
        let url = request_url(filter, options);
        tracing::debug!(%url, "querying HSA metadata");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HsaError::HsaHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .text()
            .map_err(|err| HsaError::HsaHttp(err.to_string()))?;
        parse_response(&body, filter, options)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn clause_composition() {
        let filter = QueryFilter {
            sky_box: None,
            proposal_ids: vec![13871, 14594],
            instruments: vec!["WFC3".to_string(), "ACS".to_string()],
            filters: vec![],
            extensions: vec!["FLT".to_string()],
            extra: vec!["OBSERVATION.INTENT LIKE 'Science'".to_string()],
        };
        let clauses = filter.clauses();
        assert_eq!(
            clauses,
            vec![
                "(PROPOSAL.PROPOSAL_ID==13871 OR PROPOSAL.PROPOSAL_ID==14594)",
                "(INSTRUMENT.INSTRUMENT_NAME LIKE 'WFC3' OR INSTRUMENT.INSTRUMENT_NAME LIKE 'ACS')",
                "(ARTIFACT.FILE_EXTENSION LIKE 'FLT')",
                "OBSERVATION.INTENT LIKE 'Science'",
            ]
        );
    }

    #[test]
    fn box_clause_at_equator() {
        let filter = QueryFilter {
            sky_box: Some(SkyBox::new(180.0, 0.0, 60.0).unwrap()),
            ..QueryFilter::default()
        };
        let clauses = filter.clauses();
        assert_eq!(clauses.len(), 1);
        assert_eq!(
            clauses[0],
            "POSITION.RA > 179 AND POSITION.RA < 181 AND POSITION.DEC > -1 AND POSITION.DEC < 1"
        );
    }

    #[test]
    fn box_clause_is_cos_corrected() {
        let filter = QueryFilter {
            sky_box: Some(SkyBox::new(180.0, 60.0, 60.0).unwrap()),
            ..QueryFilter::default()
        };
        let clause = filter.clauses().remove(0);
        let ra_min = clause
            .split_whitespace()
            .nth(2)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap();
        // at dec 60 the RA half-width doubles: 1 deg / cos(60) = 2 deg
        approx::assert_relative_eq!(ra_min, 178.0, epsilon = 1e-9);
    }

    #[test]
    fn url_encodes_spaces() {
        let filter = QueryFilter {
            proposal_ids: vec![13871],
            ..QueryFilter::default()
        };
        let url = request_url(&filter, &QueryOptions::default());
        assert!(!url.contains(' '));
        assert!(url.starts_with(METADATA_URL));
        assert!(url.contains("QUERY=((PROPOSAL.PROPOSAL_ID==13871))"));
        assert!(url.contains("PAGE_SIZE=100000"));
        assert!(url.contains("RETURN_TYPE=CSV"));
    }

    #[test]
    fn empty_body_is_typed_error() {
        let filter = QueryFilter {
            proposal_ids: vec![99999],
            ..QueryFilter::default()
        };
        let err = parse_response("  \n", &filter, &QueryOptions::default()).unwrap_err();
        assert_matches!(err, HsaError::EmptyQuery(clauses) if clauses.contains("99999"));
    }

    #[test]
    fn response_postprocessing() {
        let body = "OBSERVATION_ID,RA,DEC,EXPOSURE_DURATION,STC_S\n\
                    IB2U01A,10.0,-10.0,250.0,\"Polygon ICRS 10 0 11 0 11 1\"\n\
                    IA2U01B,11.0,-10.5,100.0,Polygon ICRS 11 0 12 0 12 1\n";
        let table =
            parse_response(body, &QueryFilter::default(), &QueryOptions::default()).unwrap();
        assert_eq!(table.len(), 2);
        // sorted pre-rename, renamed, lowercased, quotes stripped
        assert_eq!(table.value(0, "observation_id").unwrap(), "IA2U01B");
        assert!(table.has_column("exptime"));
        assert!(table.has_column("footprint"));
        assert!(table.has_column("jtargname"));
        assert_eq!(
            table.value(1, "footprint").unwrap(),
            "Polygon ICRS 10 0 11 0 11 1"
        );
    }
}
