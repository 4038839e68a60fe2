use std::io::{self, Write};

use serde::Serialize;

use crate::config::DataAvailability;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};
use crate::record::StructureRecord;
use crate::reference::OrganismClassification;
use crate::resolver::ChainInfo;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganismList {
    pub count: usize,
    pub organisms: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossRefResult {
    pub accession: String,
    pub structures: Vec<StructureRecord>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_classification(result: &OrganismClassification) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_chain(result: &ChainInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_organisms(result: &OrganismList) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cross_ref(result: &CrossRefResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_data(result: &DataAvailability) -> io::Result<()> {
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

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let cyan = "\x1b[36m";
        let reset = "\x1b[0m";
        match event.elapsed {
            Some(elapsed) => eprintln!(
                "{cyan}[{:>7.1}s]{reset} {}",
                elapsed.as_secs_f64(),
                event.message
            ),
            None => eprintln!("{cyan}[   ....]{reset} {}", event.message),
        }
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}KIRA-SR summary{reset}");
    println!(
        "{cyan}  lines read: {} (skipped by resume: {}, resumed after line {}){reset}",
        summary.lines_read, summary.skipped_by_resume, summary.checkpoint_start
    );
    println!(
        "{green}  resolved: {} of {} processed, {} rows written{reset}",
        summary.resolved, summary.processed, summary.rows_written
    );
    println!(
        "{yellow}  not found: {}, filtered out: {}, malformed: {}{reset}",
        summary.not_found, summary.filtered_out, summary.malformed
    );
    let failed_color = if summary.failed > 0 { red } else { green };
    println!("{failed_color}  failed: {}{reset}", summary.failed);
    if let Some(error) = &summary.input_error {
        println!("{red}  input stopped early: {error}{reset}");
    }
    if summary.cancelled {
        println!("{yellow}  run cancelled; rerun with --append to resume{reset}");
    }
}
