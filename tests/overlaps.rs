use geo::{Area, BooleanOps, MultiPolygon};

use hsa_footprints::footprint::{buffer_shape, footprint_shape};
use hsa_footprints::overlaps::{cluster_footprints, OverlapSettings};

fn shapes(footprints: &[&str]) -> Vec<MultiPolygon<f64>> {
    footprints
        .iter()
        .map(|fp| footprint_shape(fp).unwrap())
        .collect()
}

fn no_buffer() -> OverlapSettings {
    OverlapSettings {
        buffer_arcmin: 0.0,
        ..OverlapSettings::default()
    }
}

#[test]
fn two_arcsec_overlap_merges_disjoint_third_stays() {
    // A and B share a 0.005556 x 0.1 deg strip: 2 arcsec^2 on the scaled
    // area axis, above the 0.5 default threshold. C sits a degree away.
    let a = "Polygon ICRS 10.0 0.0 10.1 0.0 10.1 0.1 10.0 0.1";
    let b = "Polygon ICRS 10.094444 0.0 10.194444 0.0 10.194444 0.1 10.094444 0.1";
    let c = "Polygon ICRS 11.5 0.0 11.6 0.0 11.6 0.1 11.5 0.1";

    let parsed = shapes(&[a, b, c]);
    let intersection = parsed[0].intersection(&parsed[1]);
    let scaled = intersection.unsigned_area() * 3600.0;
    assert!((scaled - 2.0).abs() < 0.05, "scaled area was {scaled}");

    let clusters = cluster_footprints(&parsed, &no_buffer());
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].members, vec![0, 1]);
    assert_eq!(clusters[1].members, vec![2]);
}

#[test]
fn boundary_touch_with_zero_buffer_stays_separate() {
    // shared edge only: zero-area intersection, below any positive threshold
    let a = "Polygon ICRS 10.0 0.0 10.1 0.0 10.1 0.1 10.0 0.1";
    let b = "Polygon ICRS 10.1 0.0 10.2 0.0 10.2 0.1 10.1 0.1";

    let clusters = cluster_footprints(&shapes(&[a, b]), &no_buffer());
    assert_eq!(clusters.len(), 2);
}

#[test]
fn near_touching_multichip_footprints_merge_with_buffer() {
    // WFPC2-style multi-part footprints; the gap between the two
    // observations is under two buffer radii
    let a = "UNION ICRS (Polygon 10.00 0.00 10.04 0.00 10.04 0.04 10.00 0.04 \
             Polygon 10.04 0.04 10.08 0.04 10.08 0.08 10.04 0.08)";
    let b = "UNION ICRS (Polygon 10.10 0.00 10.14 0.00 10.14 0.04 10.10 0.04 \
             Polygon 10.14 0.04 10.18 0.04 10.18 0.08 10.14 0.08)";

    let parsed = shapes(&[a, b]);
    // disjoint without the buffer
    assert_eq!(
        parsed[0].intersection(&parsed[1]).unsigned_area(),
        0.0
    );

    let clusters = cluster_footprints(&parsed, &OverlapSettings::default());
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members, vec![0, 1]);
}

#[test]
fn every_observation_lands_in_exactly_one_cluster() {
    let footprints = [
        "Polygon ICRS 10.0 0.0 10.2 0.0 10.2 0.2 10.0 0.2",
        "Polygon ICRS 10.15 0.0 10.35 0.0 10.35 0.2 10.15 0.2",
        "Polygon ICRS 12.0 0.0 12.2 0.0 12.2 0.2 12.0 0.2",
        "Polygon ICRS 10.3 0.0 10.5 0.0 10.5 0.2 10.3 0.2",
        "Polygon ICRS 12.15 0.0 12.35 0.0 12.35 0.2 12.15 0.2",
        "Polygon ICRS 14.0 -0.2 14.2 -0.2 14.2 0.0 14.0 0.0",
    ];
    let clusters = cluster_footprints(&shapes(&footprints), &no_buffer());

    let mut seen = clusters
        .iter()
        .flat_map(|cluster| cluster.members.iter().copied())
        .collect::<Vec<_>>();
    seen.sort_unstable();
    assert_eq!(seen, (0..footprints.len()).collect::<Vec<_>>());
    assert_eq!(clusters.len(), 3);
}

#[test]
fn buffered_cluster_shape_contains_members() {
    let fp = "Polygon ICRS 10.0 0.0 10.1 0.0 10.1 0.1 10.0 0.1";
    let shape = footprint_shape(fp).unwrap();
    let clusters = cluster_footprints(
        std::slice::from_ref(&shape),
        &OverlapSettings::default(),
    );
    assert_eq!(clusters.len(), 1);

    // the cluster union is the buffered member shape, so intersecting with
    // the raw member gives the member back
    let back = clusters[0].shape.intersection(&shape);
    assert!((back.unsigned_area() - shape.unsigned_area()).abs() < 1e-9);

    // and the buffered shape is strictly larger than the raw footprint
    let buffered = buffer_shape(&shape, 1.0 / 60.0);
    assert!(clusters[0].shape.unsigned_area() >= buffered.unsigned_area() - 1e-12);
}
