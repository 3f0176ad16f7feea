use std::time::Duration;

use geo::{Area, BooleanOps};
use serde::Serialize;

use crate::domain::{mean_position, radec_to_targname, DustModel};
use crate::dust::DustClient;
use crate::error::HsaError;
use crate::footprint::footprint_shape;
use crate::mast::{BundleRequest, MastClient};
use crate::overlaps::{
    calib_exclusion_clauses, cluster_footprints, cluster_info_text, cluster_query_box,
    OverlapSettings,
};
use crate::plot::{render_cluster_plot, FilterPalette};
use crate::products::{curl_script, ProductMap};
use crate::query::{HsaClient, QueryFilter, QueryOptions};
use crate::store::Workspace;
use crate::table::ObservationTable;

/// Quantization scale for cluster target names.
const CLUSTER_NAME_SCALE: f64 = 1000.0;

/// File extensions requested in the secondary per-cluster query; wider
/// than the primary so WFPC2 ancillary data is picked up too.
const SECONDARY_EXTENSIONS: [&str; 2] = ["FLT", "C1M"];

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: usize,
    pub columns: Vec<String>,
    pub saved_path: Option<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlapsResult {
    pub clusters: Vec<ClusterSummary>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    pub members: usize,
    pub matched_rows: usize,
    pub action: String,
    pub info_path: Option<String>,
    pub table_path: Option<String>,
    pub plot_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurlScriptResult {
    pub commands: Vec<String>,
    pub script_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MastBundleResult {
    pub url: String,
    pub products: usize,
    pub saved_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DustResult {
    pub ra: f64,
    pub dec: f64,
    pub model: String,
    pub ebv: f64,
}

/// Criteria for the secondary query issued around each cluster.
#[derive(Debug, Clone, Default)]
pub struct OverlapParams {
    pub settings: OverlapSettings,
    pub instruments: Vec<String>,
    pub filters: Vec<String>,
    pub proposal_ids: Vec<u32>,
}

#[derive(Clone)]
pub struct App<C: HsaClient, M: MastClient, D: DustClient> {
    workspace: Workspace,
    hsa: C,
    mast: M,
    dust: D,
    palette: FilterPalette,
}

impl<C: HsaClient, M: MastClient, D: DustClient> App<C, M, D> {
    pub fn new(workspace: Workspace, hsa: C, mast: M, dust: D) -> Self {
        Self {
            workspace,
            hsa,
            mast,
            dust,
            palette: FilterPalette::default(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run one metadata query and optionally save the table as CSV.
    pub fn query(
        &self,
        filter: &QueryFilter,
        options: &QueryOptions,
        save_as: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<(ObservationTable, QueryResult), HsaError> {
        sink.event(ProgressEvent {
            message: "phase=Query; searching HSA metadata".to_string(),
            elapsed: None,
        });
        let table = self.hsa.search(filter, options)?;
        tracing::info!(rows = table.len(), "query returned");

        let saved_path = match save_as {
            Some(name) => {
                self.workspace.ensure_root()?;
                let path = self.workspace.root().join(name);
                table.write_csv(path.as_std_path())?;
                Some(path.to_string())
            }
            None => None,
        };

        let result = QueryResult {
            rows: table.len(),
            columns: table.columns().to_vec(),
            saved_path,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        Ok((table, result))
    }

    /// Cluster the footprints of a query result and write the per-cluster
    /// artifacts: `{name}_info.dat`, `{name}_footprint.csv` and
    /// `{name}_footprint.png`.
    pub fn find_overlaps(
        &self,
        table: &ObservationTable,
        params: &OverlapParams,
        sink: &dyn ProgressSink,
    ) -> Result<OverlapsResult, HsaError> {
        let mut shapes = Vec::with_capacity(table.len());
        for row in table.rows() {
            shapes.push(footprint_shape(row.footprint()?)?);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Cluster; grouping {} footprints", shapes.len()),
            elapsed: None,
        });
        let clusters = cluster_footprints(&shapes, &params.settings);
        tracing::info!(clusters = clusters.len(), "footprint clustering done");

        self.workspace.ensure_root()?;
        let mut summaries = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let mut positions = Vec::with_capacity(cluster.members.len());
            for &index in &cluster.members {
                let row = table.row(index);
                positions.push((row.ra()?, row.dec()?));
            }
            let (ra, dec) = mean_position(&positions)
                .ok_or_else(|| HsaError::InvalidBox("cluster with no members".to_string()))?;
            let name = radec_to_targname(ra, dec, CLUSTER_NAME_SCALE);

            sink.event(ProgressEvent {
                message: format!("phase=Cluster; {name} ({} members)", cluster.members.len()),
                elapsed: None,
            });

            if params.settings.skip_existing && self.workspace.is_processed(&name) {
                tracing::info!(%name, "skipping already processed cluster");
                summaries.push(ClusterSummary {
                    name,
                    ra,
                    dec,
                    members: cluster.members.len(),
                    matched_rows: 0,
                    action: "skipped-existing".to_string(),
                    info_path: None,
                    table_path: None,
                    plot_path: None,
                });
                continue;
            }

            let sky_box = cluster_query_box(cluster, ra, dec, params.settings.buffer_arcmin)?;
            let secondary_filter = QueryFilter {
                sky_box: Some(sky_box),
                proposal_ids: params.proposal_ids.clone(),
                instruments: params.instruments.clone(),
                filters: params.filters.clone(),
                extensions: SECONDARY_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
                extra: calib_exclusion_clauses(),
            };
            let secondary = match self.hsa.search(&secondary_filter, &QueryOptions::default()) {
                Ok(secondary) => secondary,
                Err(HsaError::EmptyQuery(clauses)) => {
                    tracing::warn!(%name, %clauses, "empty secondary query, skipping cluster");
                    summaries.push(ClusterSummary {
                        name,
                        ra,
                        dec,
                        members: cluster.members.len(),
                        matched_rows: 0,
                        action: "empty-secondary-query".to_string(),
                        info_path: None,
                        table_path: None,
                        plot_path: None,
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };

            // keep only ancillary rows that directly overlap the cluster
            let matched = secondary.filter_rows(|row| {
                let shape = footprint_shape(row.footprint()?)?;
                Ok(cluster.shape.intersection(&shape).unsigned_area() > 0.0)
            })?;
            tracing::debug!(%name, matched = matched.len(), total = secondary.len(), "secondary rows matched");

            let info_path = self.workspace.info_path(&name);
            Workspace::write_text_atomic(&info_path, &cluster_info_text(&name, &matched)?)?;

            let table_path = self.workspace.table_path(&name);
            matched.write_csv(table_path.as_std_path())?;

            let plot_path = self.workspace.plot_path(&name);
            let primary = table.select_rows(&cluster.members);
            render_cluster_plot(
                plot_path.as_std_path(),
                &primary,
                &matched,
                &cluster.shape,
                (sky_box.ra, sky_box.dec),
                &name,
                &self.palette,
            )?;

            summaries.push(ClusterSummary {
                name,
                ra,
                dec,
                members: cluster.members.len(),
                matched_rows: matched.len(),
                action: "written".to_string(),
                info_path: Some(info_path.to_string()),
                table_path: Some(table_path.to_string()),
                plot_path: Some(plot_path.to_string()),
            });
        }

        Ok(OverlapsResult {
            clusters: summaries,
            generated_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Emit the curl download commands for a table, optionally saving them
    /// as a shell script.
    pub fn curl_script(
        &self,
        table: &ObservationTable,
        level: Option<&str>,
        products: &ProductMap,
        script_name: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<CurlScriptResult, HsaError> {
        sink.event(ProgressEvent {
            message: format!("phase=Products; {} observations", table.len()),
            elapsed: None,
        });
        let commands = curl_script(table, level, products)?;

        let script_path = match script_name {
            Some(name) => {
                self.workspace.ensure_root()?;
                let path = self.workspace.script_path(name);
                Workspace::write_text_atomic(&path, &(commands.join("\n") + "\n"))?;
                Some(path.to_string())
            }
            None => None,
        };

        Ok(CurlScriptResult {
            commands,
            script_path,
        })
    }

    /// Request a MAST bundle for a table and optionally retrieve it.
    pub fn mast_bundle(
        &self,
        table: &ObservationTable,
        products: &ProductMap,
        filename: &str,
        retrieve: bool,
        sink: &dyn ProgressSink,
    ) -> Result<MastBundleResult, HsaError> {
        let bundle = BundleRequest::from_table(table, products, filename)?;
        sink.event(ProgressEvent {
            message: format!("phase=Bundle; {} products", bundle.url_list.len()),
            elapsed: None,
        });
        let info = self.mast.request_bundle(&bundle)?;
        tracing::info!(url = %info.url, "bundle prepared");

        let saved_path = if retrieve {
            self.workspace.ensure_root()?;
            let path = self.workspace.bundle_path(filename);
            self.mast.download(&info.url, path.as_std_path())?;
            Some(path.to_string())
        } else {
            None
        };

        Ok(MastBundleResult {
            url: info.url,
            products: bundle.url_list.len(),
            saved_path,
        })
    }

    /// Galactic dust reddening lookup at one position.
    pub fn dust(
        &self,
        ra: f64,
        dec: f64,
        model: DustModel,
        sink: &dyn ProgressSink,
    ) -> Result<DustResult, HsaError> {
        sink.event(ProgressEvent {
            message: format!("phase=Dust; querying IRSA at {ra:.4} {dec:.4}"),
            elapsed: None,
        });
        let ebv = self.dust.reddening(ra, dec, model)?;
        Ok(DustResult {
            ra,
            dec,
            model: model.to_string(),
            ebv,
        })
    }
}
