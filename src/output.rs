use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CurlScriptResult, DustResult, MastBundleResult, OverlapsResult, QueryResult,
};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_query(result: &QueryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_overlaps(result: &OverlapsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_curl_script(result: &CurlScriptResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_mast_bundle(result: &MastBundleResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_dust(result: &DustResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}

/// Sink that forwards progress messages to stderr, for plain CLI runs.
pub struct StderrProgress;

impl crate::app::ProgressSink for StderrProgress {
    fn event(&self, event: crate::app::ProgressEvent) {
        eprintln!("{}", event.message);
    }
}
