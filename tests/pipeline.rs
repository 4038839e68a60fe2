use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use kira_structure_resolver::config::{IndexPaths, PipelineConfig};
use kira_structure_resolver::domain::StructureId;
use kira_structure_resolver::error::ResolverError;
use kira_structure_resolver::output::JsonOutput;
use kira_structure_resolver::pipeline::{Pipeline, PipelineState, ProgressEvent, ProgressSink};
use kira_structure_resolver::rcsb::MetadataService;
use kira_structure_resolver::record::StructureRecord;
use kira_structure_resolver::retry::RetryPolicy;

const ENTRIES: [&str; 6] = [
    "2uxq_1_A_B",
    "1lyz_1_A",
    "1igt_2_A_B",
    "1mbn_1_A",
    "4hhb_1_A",
    "9xyz_1_A",
];

#[derive(Default)]
struct CountingService {
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingService {
    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl MetadataService for CountingService {
    fn fetch_structure(&self, id: &StructureId) -> Result<StructureRecord, ResolverError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;
        Err(ResolverError::NotFound(id.to_string()))
    }

    fn structures_for_cross_ref(
        &self,
        _accession: &str,
    ) -> Result<Vec<StructureId>, ResolverError> {
        Ok(Vec::new())
    }
}

struct CancelAfterFirstWindow<'a> {
    cancel: &'a AtomicBool,
}

impl ProgressSink for CancelAfterFirstWindow<'_> {
    fn event(&self, event: ProgressEvent) {
        if event.message.starts_with("Processed") {
            self.cancel.store(true, Ordering::SeqCst);
        }
    }
}

fn fixture(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn write_input(path: &Path, lines: &[String]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    encoder.finish().unwrap();
}

fn entry_line(entry: &str) -> String {
    format!(r#"{{"entry_id": "{entry}", "score": 0.5}}"#)
}

fn config(input: &Path, output: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(utf8(input), utf8(output), fixture("anage_mini.tsv"));
    config.index = Some(IndexPaths {
        cross_refs: fixture("pdb_chain_uniprot.tsv"),
        taxonomy: fixture("pdb_chain_taxonomy.tsv"),
    });
    config.retry = RetryPolicy::no_delay(2);
    config.workers = 4;
    config.window_size = 16;
    config
}

fn rows(path: &Path) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

fn structured_lines(path: &Path) -> Vec<String> {
    let mut text = String::new();
    MultiGzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text.lines().map(str::to_string).collect()
}

#[test]
fn single_chain_entry_yields_one_classified_row() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    write_input(&input, &[entry_line("2uxq_1_A")]);

    let pipeline = Pipeline::new(CountingService::default());
    let summary = pipeline
        .run(&config(&input, &output), &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    let rows = rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "1");
    assert_eq!(rows[0][3], "A");
    assert_eq!(rows[0][5], "Home sapiens");
    assert_eq!(rows[0][6], "Human");
    assert_eq!(rows[0][8], "Mammalia");
    assert_eq!(rows[0][10], "true");
    assert_eq!(rows[0][11], "local-index");
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn classification_filter_keeps_only_matching_rows() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);

    let mut birds = config(&input, &output);
    birds.classification = Some("Aves".to_string());
    let service = CountingService::default();
    let summary = Pipeline::new(&service)
        .run(&birds, &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    let rows = rows(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], "1lyz");
    assert_eq!(rows[0][8], "Aves");
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.resolved, 5);
    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.filtered_out, 4);
    assert_eq!(service.calls("9xyz"), 1);
    assert_eq!(service.calls("2uxq"), 0);

    let mammals_output = temp.path().join("mammals.tsv");
    let mut mammals = config(&input, &mammals_output);
    mammals.classification = Some("Mammalia".to_string());
    Pipeline::new(CountingService::default())
        .run(&mammals, &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    let structures = crate::rows(&mammals_output)
        .into_iter()
        .map(|row| row[2].clone())
        .collect::<Vec<_>>();
    // 1mbn's organism is not in the reference table, so it cannot pass.
    assert_eq!(structures, vec!["2uxq", "2uxq", "1igt", "1igt", "4hhb"]);
}

#[test]
fn organism_filter_matches_substring() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);

    let mut mice = config(&input, &output);
    mice.organism = Some("MUSCULUS".to_string());
    Pipeline::new(CountingService::default())
        .run(&mice, &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    let rows = rows(&output);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row[5] == "Mus musculus"));
}

#[test]
fn second_append_run_writes_nothing_new() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);

    let mut config = config(&input, &output);
    config.append = true;
    let first = Pipeline::new(CountingService::default())
        .run(&config, &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    let before = std::fs::read(&output).unwrap();

    let second = Pipeline::new(CountingService::default())
        .run(&config, &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    assert!(first.rows_written > 0);
    assert_eq!(second.rows_written, 0);
    assert_eq!(second.checkpoint_start, 5);
    assert_eq!(second.skipped_by_resume, 5);
    assert_eq!(std::fs::read(&output).unwrap(), before);
}

#[test]
fn interrupted_run_resumes_to_identical_output() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let lines = (0..1000)
        .map(|i| {
            if i % 97 == 13 {
                "{\"entry_id\": ".to_string()
            } else {
                entry_line(ENTRIES[i % ENTRIES.len()])
            }
        })
        .collect::<Vec<_>>();
    write_input(&input, &lines);

    let full_tsv = temp.path().join("full.tsv");
    let full_json = temp.path().join("full.jsonl.gz");
    let mut full = config(&input, &full_tsv);
    full.structured_output = Some(utf8(&full_json));
    full.batch_size = 7;
    let full_summary = Pipeline::new(CountingService::default())
        .run(&full, &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    let part_tsv = temp.path().join("part.tsv");
    let part_json = temp.path().join("part.jsonl.gz");
    let mut crashed = config(&input, &part_tsv);
    crashed.structured_output = Some(utf8(&part_json));
    crashed.batch_size = 7;
    crashed.line_filter = "1-400".parse().unwrap();
    Pipeline::new(CountingService::default())
        .run(&crashed, &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    // A row torn mid-write by the crash.
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&part_tsv)
        .unwrap();
    file.write_all(b"401\t2uxq_1_A_B\t2u").unwrap();
    drop(file);

    let mut resumed = config(&input, &part_tsv);
    resumed.structured_output = Some(utf8(&part_json));
    resumed.batch_size = 7;
    resumed.append = true;
    let resumed_summary = Pipeline::new(CountingService::default())
        .run(&resumed, &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    assert!(resumed_summary.checkpoint_start >= 395);
    assert!(resumed_summary.checkpoint_start <= 400);
    assert_eq!(full_summary.malformed, 11);
    assert_eq!(rows(&part_tsv), rows(&full_tsv));
    assert_eq!(structured_lines(&part_json), structured_lines(&full_json));
}

#[test]
fn cancelled_run_processes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    write_input(&input, &[entry_line("2uxq_1_A")]);

    let pipeline = Pipeline::new(CountingService::default());
    let summary = pipeline
        .run(&config(&input, &output), &AtomicBool::new(true), &JsonOutput)
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    assert!(rows(&output).is_empty());
}

#[test]
fn missing_reference_fails_before_any_output() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    write_input(&input, &[entry_line("2uxq_1_A")]);

    let mut config = config(&input, &output);
    config.reference = utf8(&temp.path().join("absent.tsv"));
    let pipeline = Pipeline::new(CountingService::default());
    let err = pipeline
        .run(&config, &AtomicBool::new(false), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, ResolverError::DataLoad { .. });
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!output.exists());
}

#[test]
fn cancel_between_windows_drains_and_resumes() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);

    let full_output = temp.path().join("full.tsv");
    Pipeline::new(CountingService::default())
        .run(&config(&input, &full_output), &AtomicBool::new(false), &JsonOutput)
        .unwrap();

    let output = temp.path().join("out.tsv");
    let mut interrupted = config(&input, &output);
    interrupted.window_size = 2;
    interrupted.append = true;
    let cancel = AtomicBool::new(false);
    let pipeline = Pipeline::new(CountingService::default());
    let summary = pipeline
        .run(&interrupted, &cancel, &CancelAfterFirstWindow { cancel: &cancel })
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(pipeline.state(), PipelineState::Done);

    let resumed = Pipeline::new(CountingService::default())
        .run(&interrupted, &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    assert_eq!(resumed.checkpoint_start, 2);
    assert!(!resumed.cancelled);
    assert_eq!(rows(&output), rows(&full_output));
}

#[test]
fn unwritable_output_fails_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    write_input(&input, &[entry_line("2uxq_1_A")]);
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let pipeline = Pipeline::new(CountingService::default());
    let err = pipeline
        .run(
            &config(&input, &blocker.join("out.tsv")),
            &AtomicBool::new(false),
            &JsonOutput,
        )
        .unwrap_err();
    assert_matches!(err, ResolverError::OutputWrite { .. });
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[cfg(target_os = "linux")]
#[test]
fn structured_write_failure_aborts_mid_run() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);

    let mut config = config(&input, &output);
    config.structured_output = Some(Utf8PathBuf::from("/dev/full"));
    config.batch_size = 1;
    let pipeline = Pipeline::new(CountingService::default());
    let err = pipeline
        .run(&config, &AtomicBool::new(false), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, ResolverError::OutputWrite { .. });
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(rows(&output).is_empty());
}

#[test]
fn corrupt_input_tail_keeps_the_summary() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("input.jsonl.gz");
    let output = temp.path().join("out.tsv");
    let lines = ENTRIES.iter().map(|entry| entry_line(entry)).collect::<Vec<_>>();
    write_input(&input, &lines);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&input)
        .unwrap();
    file.write_all(b"this is not a gzip member").unwrap();
    drop(file);

    let pipeline = Pipeline::new(CountingService::default());
    let summary = pipeline
        .run(&config(&input, &output), &AtomicBool::new(false), &JsonOutput)
        .unwrap();
    assert!(summary.input_error.is_some());
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.rows_written, 7);
    assert_eq!(rows(&output).len(), 7);
    assert_eq!(pipeline.state(), PipelineState::Done);
}
