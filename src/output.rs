use std::io::{self, Write};

use serde::Serialize;

use crate::app::{RunSummary, StatusResult, ValidateResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validate(result: &ValidateResult) -> io::Result<()> {
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

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_run(result: &RunSummary) {
        println!(
            "reference files: {} (downloaded: {})",
            result.reference_files, result.reference_files_downloaded
        );
        println!(
            "entities: {} (resolved before: {}, not found before: {}, searched: {})",
            result.reference_entities,
            result.previously_resolved,
            result.previously_not_found,
            result.searched
        );
        println!(
            "search calls: {}, newly resolved: {}, newly not found: {}",
            result.searches_issued, result.newly_resolved, result.newly_not_found
        );
        println!("checkpoint: {}", result.checkpoint_key);
        println!(
            "batches: {} (downloaded: {}, reused: {})",
            result.batches, result.downloaded, result.reused
        );
        Self::print_incomplete(result.incomplete.len());
    }

    pub fn print_status(result: &StatusResult) {
        println!("checkpoint: {}", result.checkpoint_key);
        println!("resolved: {}", result.resolved);
        println!("not found: {}", result.not_found);
        println!("stored fact tables: {}", result.stored_artifacts);
    }

    pub fn print_validate(result: &ValidateResult) {
        println!("batches: {}", result.batches);
        println!("missing fact tables: {}", result.missing_artifacts.len());
        for key in &result.missing_artifacts {
            println!("  {key}");
        }
        Self::print_incomplete(result.incomplete.len());
    }

    fn print_incomplete(count: usize) {
        if count == 0 {
            println!("all fact tables cover their geographies");
        } else {
            println!("fact tables with gaps: {count} (see warnings)");
        }
    }
}
