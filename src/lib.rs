//! Thin client over the ESA Hubble Science Archive and MAST, plus a
//! footprint-overlap clusterer for grouping spatially connected pointings.

pub mod app;
pub mod config;
pub mod domain;
pub mod dust;
pub mod error;
pub mod footprint;
pub mod mast;
pub mod output;
pub mod overlaps;
pub mod plot;
pub mod products;
pub mod query;
pub mod store;
pub mod table;
