use crate::domain::ObservationId;
use crate::error::HsaError;
use crate::table::ObservationTable;

const DATA_ACTION_URL: &str =
    "https://archives.esac.esa.int/ehst-sl-server/servlet/data-action?ARTIFACT_ID=";

/// Mapping from `INSTRUMENT/DETECTOR` to the product codes worth fetching,
/// with a single fallback default. Passed explicitly to the functions that
/// need it instead of living as a module global.
#[derive(Debug, Clone)]
pub struct ProductMap {
    entries: Vec<(String, Vec<String>)>,
    fallback: Vec<String>,
}

impl Default for ProductMap {
    fn default() -> Self {
        let entries = [
            ("WFC3/IR", vec!["RAW"]),
            ("WFPC2/WFPC2", vec!["C0M", "C1M"]),
            ("ACS/WFC", vec!["FLC"]),
            ("WFC3/UVIS", vec!["FLC"]),
        ]
        .into_iter()
        .map(|(instdet, products)| {
            (
                instdet.to_string(),
                products.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();
        Self {
            entries,
            fallback: vec!["RAW".to_string()],
        }
    }
}

impl ProductMap {
    pub fn products_for(&self, instdet: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(key, _)| key == instdet)
            .map(|(_, products)| products.as_slice())
            .unwrap_or(&self.fallback)
    }
}

fn curl_line(id: &ObservationId, product: &str) -> String {
    format!(
        "curl {DATA_ACTION_URL}{}_{} -o {}_{}.fits.gz",
        id.as_str(),
        product.to_uppercase(),
        id.lower(),
        product.to_lowercase()
    )
}

/// One `curl` command per desired product per observation. A `level`
/// overrides the per-detector mapping with a single product code for every
/// row. No check is made that the remote artifact exists.
pub fn curl_script(
    table: &ObservationTable,
    level: Option<&str>,
    products: &ProductMap,
) -> Result<Vec<String>, HsaError> {
    let mut lines = Vec::new();
    for row in table.rows() {
        let id: ObservationId = row.observation_id()?.parse()?;
        match level {
            Some(level) => lines.push(curl_line(&id, level)),
            None => {
                for product in products.products_for(&row.instdet()?) {
                    lines.push(curl_line(&id, product));
                }
            }
        }
    }
    Ok(lines)
}
