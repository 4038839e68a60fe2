use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::StructureCache;
use crate::config::PipelineConfig;
use crate::domain::StructureId;
use crate::error::ResolverError;
use crate::filter::RecordFilter;
use crate::index::LocalIndex;
use crate::normalize::OrganismNormalizer;
use crate::rcsb::MetadataService;
use crate::record::{ResolvedChainResult, StructureRecord};
use crate::reference::ReferenceTable;
use crate::resolver::{MetadataResolver, Outcome};
use crate::sink::{SinkSet, read_checkpoint};
use crate::stream::{RecordStream, StreamRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    LoadingReference,
    Streaming,
    Draining,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub lines_read: u64,
    pub skipped_by_resume: u64,
    pub processed: u64,
    pub malformed: u64,
    pub resolved: u64,
    pub not_found: u64,
    pub filtered_out: u64,
    pub failed: u64,
    pub rows_written: u64,
    pub checkpoint_start: u64,
    pub cancelled: bool,
    pub input_error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

pub struct Pipeline<S: MetadataService> {
    service: S,
    state: Mutex<PipelineState>,
}

struct Context<'a, S: MetadataService> {
    resolver: MetadataResolver<&'a S>,
    table: ReferenceTable,
    normalizer: OrganismNormalizer,
    filter: RecordFilter,
    use_local_index: bool,
    workers: usize,
}

impl<S: MetadataService> Pipeline<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        debug!(?state, "pipeline state");
    }

    pub fn run(
        &self,
        config: &PipelineConfig,
        cancel: &AtomicBool,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary, ResolverError> {
        let result = self.run_inner(config, cancel, progress);
        if result.is_err() {
            self.set_state(PipelineState::Failed);
        }
        result
    }

    fn run_inner(
        &self,
        config: &PipelineConfig,
        cancel: &AtomicBool,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary, ResolverError> {
        let started = Instant::now();
        self.set_state(PipelineState::LoadingReference);
        progress.event(ProgressEvent {
            message: format!("Loading reference table {}", config.reference),
            elapsed: None,
        });
        let table = ReferenceTable::load(config.reference.as_std_path())?;
        info!(entries = table.len(), "reference table loaded");

        let mut resolver = MetadataResolver::new(
            &self.service,
            StructureCache::new(config.cache_capacity),
            config.retry,
        );
        if let Some(paths) = &config.index {
            progress.event(ProgressEvent {
                message: "Loading local index".to_string(),
                elapsed: Some(started.elapsed()),
            });
            let index = LocalIndex::load(
                paths.cross_refs.as_std_path(),
                paths.taxonomy.as_std_path(),
            )?;
            resolver = resolver.with_index(Arc::new(index));
        }

        let checkpoint = if config.append {
            read_checkpoint(config.output.as_std_path())?
        } else {
            0
        };
        if checkpoint > 0 {
            info!(checkpoint, "resuming after checkpoint");
        }

        let mut stream = RecordStream::open(
            config.input.as_std_path(),
            config.line_filter.clone(),
            &config.id_field,
        )?
        .resume_after(checkpoint);
        let mut sinks = SinkSet::open(
            config.output.as_std_path(),
            config.structured_output.as_ref().map(|path| path.as_std_path()),
            config.batch_size,
            config.append,
        )?;

        let context = Context {
            use_local_index: config.prefer_local_index && resolver.has_index(),
            resolver,
            table,
            normalizer: OrganismNormalizer::new().with_aliases(&config.aliases),
            filter: RecordFilter::new(
                config.organism.as_deref(),
                config.classification.as_deref(),
            ),
            workers: config.workers.max(1),
        };

        self.set_state(PipelineState::Streaming);
        progress.event(ProgressEvent {
            message: format!("Streaming {}", config.input),
            elapsed: Some(started.elapsed()),
        });

        let mut summary = RunSummary {
            checkpoint_start: checkpoint,
            started_at: chrono::Utc::now().to_rfc3339(),
            ..RunSummary::default()
        };
        let window_size = config.window_size.max(1);
        loop {
            let mut window = Vec::with_capacity(window_size);
            while window.len() < window_size {
                if cancel.load(Ordering::Relaxed) {
                    summary.cancelled = true;
                    break;
                }
                match stream.next() {
                    Some(item) => window.push(item),
                    None => break,
                }
            }
            if window.is_empty() {
                break;
            }
            let full = window.len() == window_size;

            if let Err(err) = self.process_window(&context, window, &mut sinks, &mut summary) {
                match err {
                    ResolverError::DataLoad { .. } => {
                        warn!(error = %err, "input stream ended early");
                        summary.input_error = Some(err.to_string());
                        break;
                    }
                    err => return Err(err),
                }
            }
            progress.event(ProgressEvent {
                message: format!(
                    "Processed {} lines, {} rows written",
                    summary.processed + summary.malformed,
                    sinks.rows_written()
                ),
                elapsed: Some(started.elapsed()),
            });
            if !full || summary.cancelled {
                break;
            }
        }
        summary.lines_read = stream.lines_read();
        summary.skipped_by_resume = stream.skipped_by_resume();

        self.set_state(PipelineState::Draining);
        summary.rows_written = sinks.finish()?;

        summary.finished_at = chrono::Utc::now().to_rfc3339();
        self.set_state(PipelineState::Done);
        info!(
            lines_read = summary.lines_read,
            processed = summary.processed,
            resolved = summary.resolved,
            not_found = summary.not_found,
            failed = summary.failed,
            malformed = summary.malformed,
            filtered_out = summary.filtered_out,
            rows_written = summary.rows_written,
            cancelled = summary.cancelled,
            "run complete"
        );
        progress.event(ProgressEvent {
            message: "Done".to_string(),
            elapsed: Some(started.elapsed()),
        });
        Ok(summary)
    }

    fn process_window(
        &self,
        context: &Context<'_, S>,
        window: Vec<Result<StreamRecord, ResolverError>>,
        sinks: &mut SinkSet,
        summary: &mut RunSummary,
    ) -> Result<(), ResolverError> {
        let mut ids = Vec::new();
        for record in window.iter().flatten() {
            if !ids.contains(&record.entry.structure) {
                ids.push(record.entry.structure.clone());
            }
        }
        let resolved = resolve_concurrently(
            &context.resolver,
            &ids,
            context.workers,
            context.use_local_index,
        );

        for item in window {
            let record = match item {
                Ok(record) => record,
                Err(err @ ResolverError::MalformedRecord { .. }) => {
                    warn!(error = %err, "skipping malformed record");
                    summary.malformed += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            summary.processed += 1;

            let Some((structure, outcome)) = resolved.get(&record.entry.structure) else {
                summary.failed += 1;
                continue;
            };
            if !structure.found {
                if *outcome == Outcome::Failed {
                    summary.failed += 1;
                } else {
                    summary.not_found += 1;
                }
                continue;
            }

            let rows = chain_rows(&record, structure, &context.table, &context.normalizer);
            if rows.is_empty() {
                debug!(line = record.line, entry = %record.entry.raw, "no selected chain in structure");
                summary.not_found += 1;
                continue;
            }
            summary.resolved += 1;

            let kept = rows
                .into_iter()
                .filter(|row| context.filter.matches(row))
                .collect::<Vec<_>>();
            if kept.is_empty() {
                summary.filtered_out += 1;
                continue;
            }
            sinks.push_line(&kept)?;
        }
        Ok(())
    }
}

fn resolve_concurrently<S: MetadataService>(
    resolver: &MetadataResolver<S>,
    ids: &[StructureId],
    workers: usize,
    use_local_index: bool,
) -> HashMap<StructureId, (StructureRecord, Outcome)> {
    if workers <= 1 || ids.len() <= 1 {
        return ids
            .iter()
            .map(|id| (id.clone(), resolver.resolve_with_outcome(id, use_local_index)))
            .collect();
    }

    let next = &AtomicUsize::new(0);
    let mut resolved = HashMap::with_capacity(ids.len());
    thread::scope(|scope| {
        let handles = (0..workers.min(ids.len()))
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let slot = next.fetch_add(1, Ordering::Relaxed);
                        let Some(id) = ids.get(slot) else {
                            break;
                        };
                        done.push((id.clone(), resolver.resolve_with_outcome(id, use_local_index)));
                    }
                    done
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            let done = handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
            resolved.extend(done);
        }
    });
    resolved
}

pub fn chain_rows(
    record: &StreamRecord,
    structure: &StructureRecord,
    table: &ReferenceTable,
    normalizer: &OrganismNormalizer,
) -> Vec<ResolvedChainResult> {
    let selected: Vec<&str> = if record.entry.chains.is_empty() {
        structure.chains().map(|(chain, _)| chain).collect()
    } else {
        record.entry.chains.iter().map(String::as_str).collect()
    };

    let mut rows: Vec<ResolvedChainResult> = Vec::with_capacity(selected.len());
    for chain in selected {
        if rows.iter().any(|row| row.chain_id == chain) {
            continue;
        }
        let Some(entity) = structure.entity_for_chain(chain) else {
            continue;
        };
        let classification = entity
            .organism
            .as_ref()
            .map(|organism| table.classify(&organism.scientific_name, normalizer));
        rows.push(ResolvedChainResult {
            line_number: record.line,
            entry_id: record.entry.raw.clone(),
            structure_id: structure.structure_id.to_string(),
            chain_id: chain.to_string(),
            protein_name: entity.description.clone(),
            organism_scientific_name: entity
                .organism
                .as_ref()
                .map(|organism| organism.scientific_name.clone()),
            taxonomy_id: entity.organism.as_ref().and_then(|organism| organism.taxonomy_id),
            normalized_organism: classification
                .as_ref()
                .map(|classification| classification.normalized.name.clone()),
            organism_common_name: classification
                .as_ref()
                .and_then(|classification| classification.common_name.clone()),
            classification: classification
                .as_ref()
                .map(|classification| classification.classification.clone())
                .unwrap_or_else(|| crate::reference::UNKNOWN_CLASSIFICATION.to_string()),
            kingdom: classification
                .as_ref()
                .and_then(|classification| classification.kingdom.clone()),
            phylum: classification
                .as_ref()
                .and_then(|classification| classification.phylum.clone()),
            max_longevity_yrs: classification
                .as_ref()
                .and_then(|classification| classification.max_longevity_yrs),
            in_reference: classification
                .as_ref()
                .is_some_and(|classification| classification.in_reference),
            cross_refs: entity.cross_refs.clone(),
            source: structure.source,
            title: structure.title.clone(),
            raw_record: record.raw.clone(),
        });
    }
    rows
}
