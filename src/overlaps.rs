use geo::{Area, BooleanOps, BoundingRect, ConvexHull, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::domain::SkyBox;
use crate::error::HsaError;
use crate::footprint::buffer_shape;
use crate::table::ObservationTable;

/// Knobs for the footprint clusterer. The intersection threshold is
/// compared against the intersection area in deg^2 scaled by 3600.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapSettings {
    pub buffer_arcmin: f64,
    pub area_threshold: f64,
    pub refine_passes: usize,
    pub skip_existing: bool,
}

impl Default for OverlapSettings {
    fn default() -> Self {
        Self {
            buffer_arcmin: 1.0,
            area_threshold: 0.5,
            refine_passes: 3,
            skip_existing: false,
        }
    }
}

/// One group of spatially connected observations: member indices into the
/// input plus the accumulated union of their buffered shapes.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub shape: MultiPolygon<f64>,
    pub members: Vec<usize>,
}

/// Partition observations into spatially connected groups.
///
/// Greedy first pass in input order with the scaled-area threshold, then a
/// fixed number of zero-threshold refinement passes that re-cluster the
/// cluster unions. First match wins when scanning clusters, so the result
/// is always a partition of the input indices. This is a heuristic, not
/// exact connected components; the refinement passes coalesce groups that
/// become connected transitively, but the outcome can still depend on
/// input order for pathological arrangements.
pub fn cluster_footprints(
    shapes: &[MultiPolygon<f64>],
    settings: &OverlapSettings,
) -> Vec<Cluster> {
    let buffer_deg = settings.buffer_arcmin / 60.0;
    let seeds = shapes
        .iter()
        .enumerate()
        .map(|(index, shape)| Cluster {
            shape: buffer_shape(shape, buffer_deg),
            members: vec![index],
        })
        .collect::<Vec<_>>();

    let mut clusters = cluster_pass(seeds, settings.area_threshold);
    tracing::debug!(clusters = clusters.len(), "greedy first pass done");

    for pass in 0..settings.refine_passes {
        clusters = cluster_pass(clusters, 0.0);
        tracing::debug!(pass, clusters = clusters.len(), "refinement pass done");
    }
    clusters
}

/// One greedy merge pass. A candidate joins the first existing cluster
/// whose union intersects it with scaled area above `scaled_threshold`.
fn cluster_pass(candidates: Vec<Cluster>, scaled_threshold: f64) -> Vec<Cluster> {
    let mut merged: Vec<Cluster> = Vec::new();
    for candidate in candidates {
        let mut matched = false;
        for cluster in merged.iter_mut() {
            let intersection = cluster.shape.intersection(&candidate.shape);
            let scaled_area = intersection.unsigned_area() * 3600.0;
            if scaled_area > scaled_threshold {
                tracing::trace!(scaled_area, "merging into existing cluster");
                cluster.shape = cluster.shape.union(&candidate.shape);
                cluster.members.extend(candidate.members.iter().copied());
                matched = true;
                break;
            }
        }
        if !matched {
            merged.push(candidate);
        }
    }
    merged
}

/// Calibration target names excluded from the secondary query around each
/// cluster.
pub const CALIB_TARGETS: [&str; 7] = [
    "DARK",
    "EARTH-CALIB",
    "TUNGSTEN",
    "BIAS",
    "DARK-EARTH-CALIB",
    "DARK-NM",
    "DEUTERIUM",
];

pub fn calib_exclusion_clauses() -> Vec<String> {
    CALIB_TARGETS
        .iter()
        .map(|name| format!("TARGET.TARGET_NAME NOT LIKE '{name}'"))
        .collect()
}

/// Secondary-query box around a cluster: centered on the representative
/// position, radius 1.5x the convex-hull extent (RA cos-corrected), in
/// arcminutes, clamped below by `min_radius_arcmin` so a degenerate
/// single-pointing cluster still gets a sensible box.
pub fn cluster_query_box(
    cluster: &Cluster,
    ra: f64,
    dec: f64,
    min_radius_arcmin: f64,
) -> Result<SkyBox, HsaError> {
    let hull = cluster.shape.convex_hull();
    let rect = hull
        .bounding_rect()
        .ok_or_else(|| HsaError::InvalidBox("empty cluster shape".to_string()))?;

    let xradius = (rect.max().x - ra)
        .abs()
        .max((rect.min().x - ra).abs())
        * dec.to_radians().cos()
        * 60.0;
    let yradius = (rect.max().y - dec).abs().max((rect.min().y - dec).abs()) * 60.0;

    let radius = (xradius * 1.5)
        .max(yradius * 1.5)
        .max(min_radius_arcmin);
    SkyBox::new(ra, dec, radius)
}

/// Plain-text summary for one cluster: proposal ids, target names, and
/// per instrument/filter exposure totals of the matched secondary rows.
pub fn cluster_info_text(name: &str, table: &ObservationTable) -> Result<String, HsaError> {
    let mut text = String::new();

    let mut proposals = table.str_column("proposal_id")?;
    proposals.sort_unstable();
    proposals.dedup();
    for proposal in proposals {
        text.push_str(&format!("proposal_id {name} {proposal}\n"));
    }

    let mut targets = table.str_column("target")?;
    targets.sort_unstable();
    targets.dedup();
    for target in targets {
        text.push_str(&format!("target {name} {target}\n"));
    }

    let mut filter_targets = Vec::with_capacity(table.len());
    for row in table.rows() {
        filter_targets.push(format!("{} {}", row.instdet()?, row.filter()?));
    }
    let mut unique = filter_targets.clone();
    unique.sort_unstable();
    unique.dedup();
    for filter in unique {
        let mut count = 0usize;
        let mut exptime = 0.0;
        for (index, row) in table.rows().enumerate() {
            if filter_targets[index] == filter {
                count += 1;
                exptime += row.exptime()?;
            }
        }
        text.push_str(&format!(
            "filter {name}  {filter:20}  {count:3}  {exptime:>8.1}\n"
        ));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use geo::{Coord, LineString, Polygon};

    use super::*;

    fn square(x: f64, y: f64, side: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::new(vec![
                Coord { x, y },
                Coord { x: x + side, y },
                Coord {
                    x: x + side,
                    y: y + side,
                },
                Coord { x, y: y + side },
            ]),
            Vec::new(),
        )])
    }

    fn no_buffer() -> OverlapSettings {
        OverlapSettings {
            buffer_arcmin: 0.0,
            ..OverlapSettings::default()
        }
    }

    #[test]
    fn disjoint_shapes_stay_separate() {
        let shapes = vec![square(0.0, 0.0, 0.1), square(5.0, 0.0, 0.1), square(10.0, 0.0, 0.1)];
        let clusters = cluster_footprints(&shapes, &OverlapSettings::default());
        assert_eq!(clusters.len(), 3);
        for (index, cluster) in clusters.iter().enumerate() {
            assert_eq!(cluster.members, vec![index]);
        }
    }

    #[test]
    fn touching_boundaries_do_not_merge() {
        // zero buffer, zero-area intersection at the shared edge
        let shapes = vec![square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0)];
        let clusters = cluster_footprints(&shapes, &no_buffer());
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn overlapping_pair_and_disjoint_third() {
        // A and B overlap by 0.1x0.2 deg = 72 arcsec^2 scaled; C is far away
        let shapes = vec![
            square(0.0, 0.0, 0.2),
            square(0.1, 0.0, 0.2),
            square(3.0, 0.0, 0.2),
        ];
        let clusters = cluster_footprints(&shapes, &no_buffer());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![0, 1]);
        assert_eq!(clusters[1].members, vec![2]);
    }

    #[test]
    fn below_threshold_intersection_is_ignored() {
        // intersection 0.01 x 0.01 deg^2 -> 0.36 scaled, below 0.5
        let shapes = vec![square(0.0, 0.0, 0.2), square(0.19, 0.19, 0.2)];
        let clusters = cluster_footprints(&shapes, &no_buffer());
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn partition_invariant() {
        let shapes = vec![
            square(0.0, 0.0, 0.3),
            square(0.2, 0.0, 0.3),
            square(2.0, 0.0, 0.3),
            square(0.4, 0.0, 0.3),
            square(2.2, 0.0, 0.3),
        ];
        let clusters = cluster_footprints(&shapes, &no_buffer());
        let mut seen = clusters
            .iter()
            .flat_map(|cluster| cluster.members.iter().copied())
            .collect::<Vec<_>>();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn chain_merges_for_every_permutation() {
        // five squares, each overlapping only its neighbors
        let chain = (0..5)
            .map(|i| square(i as f64 * 0.15, 0.0, 0.2))
            .collect::<Vec<_>>();

        let mut order = [0usize, 1, 2, 3, 4];
        permute(&mut order, 5, &mut |perm| {
            let shapes = perm.iter().map(|&i| chain[i].clone()).collect::<Vec<_>>();
            let clusters = cluster_footprints(&shapes, &no_buffer());
            assert_eq!(clusters.len(), 1, "order {perm:?}");
            assert_eq!(clusters[0].members.len(), 5);
        });
    }

    // Heap's algorithm, enough for the exhaustive 5-chain check.
    fn permute(items: &mut [usize; 5], k: usize, visit: &mut impl FnMut(&[usize; 5])) {
        if k == 1 {
            visit(items);
            return;
        }
        for i in 0..k {
            permute(items, k - 1, visit);
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
        }
    }

    #[test]
    fn buffered_near_touching_shapes_merge() {
        // 0.01 deg gap, closed by the default 1 arcmin buffer on each side
        let shapes = vec![square(0.0, 0.0, 0.2), square(0.21, 0.0, 0.2)];
        let clusters = cluster_footprints(&shapes, &OverlapSettings::default());
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn query_box_from_cluster_extent() {
        let cluster = Cluster {
            shape: square(10.0, 0.0, 0.4),
            members: vec![0],
        };
        let sky_box = cluster_query_box(&cluster, 10.2, 0.2, 1.0).unwrap();
        assert_eq!(sky_box.ra, 10.2);
        assert_eq!(sky_box.dec, 0.2);
        // half-extent 0.2 deg = 12 arcmin, times 1.5
        approx::assert_relative_eq!(sky_box.radius_arcmin, 18.0, epsilon = 1e-6);
    }

    #[test]
    fn query_box_clamped_for_degenerate_cluster() {
        let cluster = Cluster {
            shape: square(10.0, 0.0, 0.001),
            members: vec![0],
        };
        let sky_box = cluster_query_box(&cluster, 10.0005, 0.0005, 2.0).unwrap();
        assert_eq!(sky_box.radius_arcmin, 2.0);
    }

    #[test]
    fn info_text_totals() {
        let table = ObservationTable::from_csv_str(
            "observation_id,instrument,detector,filter,exptime,target,proposal_id\n\
             A1,WFC3,IR,F160W,200.0,MACS1149,12345\n\
             A2,WFC3,IR,F160W,300.0,MACS1149,12345\n\
             A3,WFC3,UVIS,F814W,100.0,MACS1149-PAR,13504\n",
        )
        .unwrap();
        let text = cluster_info_text("j114933+222438", &table).unwrap();
        assert!(text.contains("proposal_id j114933+222438 12345\n"));
        assert!(text.contains("proposal_id j114933+222438 13504\n"));
        assert!(text.contains("target j114933+222438 MACS1149\n"));
        assert!(text.contains("filter j114933+222438  WFC3/IR F160W"));
        assert!(text.contains("   500.0\n"));
        assert!(text.contains("   100.0\n"));
    }
}
