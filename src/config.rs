use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::SkyBox;
use crate::error::HsaError;
use crate::overlaps::OverlapSettings;
use crate::query::QueryFilter;

/// Optional JSON job file for batch overlap runs.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct JobConfig {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default, rename = "box")]
    pub sky_box: Option<BoxEntry>,
    #[serde(default)]
    pub proposal_ids: Vec<u32>,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub extra: Vec<String>,
    #[serde(default)]
    pub overlaps: Option<OverlapSettings>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Box entry: either the shorthand `"ra,dec,radius"` string or a detailed
/// object.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BoxEntry {
    Shorthand(String),
    Detailed(BoxEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BoxEntryObject {
    pub ra: f64,
    pub dec: f64,
    pub radius_arcmin: f64,
}

#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub schema_version: u32,
    pub filter: QueryFilter,
    pub settings: OverlapSettings,
    pub output_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedJob, HsaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("hsa-fp.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HsaError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HsaError::ConfigRead(config_path.clone()))?;
        let config: JobConfig =
            serde_json::from_str(&content).map_err(|err| HsaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: JobConfig) -> Result<ResolvedJob, HsaError> {
        let sky_box = match config.sky_box {
            None => None,
            Some(BoxEntry::Shorthand(value)) => Some(SkyBox::from_str(&value)?),
            Some(BoxEntry::Detailed(obj)) => {
                Some(SkyBox::new(obj.ra, obj.dec, obj.radius_arcmin)?)
            }
        };

        Ok(ResolvedJob {
            schema_version: config.schema_version.unwrap_or(1),
            filter: QueryFilter {
                sky_box,
                proposal_ids: config.proposal_ids,
                instruments: config.instruments,
                filters: config.filters,
                extensions: config.extensions,
                extra: config.extra,
            },
            settings: config.overlaps.unwrap_or_default(),
            output_dir: config.output_dir.map(Utf8PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn resolve_shorthand_box() {
        let config: JobConfig = serde_json::from_str(
            r#"{"box": "73.55,-3.01,3", "proposal_ids": [13871], "instruments": ["WFC3"]}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        let sky_box = resolved.filter.sky_box.unwrap();
        assert_eq!(sky_box.radius_arcmin, 3.0);
        assert_eq!(resolved.filter.proposal_ids, vec![13871]);
        assert_eq!(resolved.settings, OverlapSettings::default());
    }

    #[test]
    fn resolve_detailed_box_and_overlaps() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "box": {"ra": 150.1, "dec": 2.2, "radius_arcmin": 10},
                "overlaps": {"buffer_arcmin": 0.5, "skip_existing": true}
            }"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.filter.sky_box.unwrap().ra, 150.1);
        assert_eq!(resolved.settings.buffer_arcmin, 0.5);
        assert!(resolved.settings.skip_existing);
        // unspecified overlap fields keep their defaults
        assert_eq!(resolved.settings.refine_passes, 3);
    }

    #[test]
    fn invalid_box_is_rejected() {
        let config: JobConfig = serde_json::from_str(r#"{"box": "500,0,3"}"#).unwrap();
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, HsaError::InvalidBox(_));
    }
}
