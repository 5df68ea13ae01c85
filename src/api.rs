use crate::engine::{self, ComposedContext, Finding, MergedRuleSet, Override, Resolution, StageMetrics};
use crate::{ComposeError, Document, DocumentId, Library, MergeError, ParseError, PipelineError, ResolveError};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

/// Thresholds used by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Line ceiling of a Rules document without a `budget` in its front matter.
    pub rules_line_budget: usize,
    /// Line count above which a Template draws a warning. `None` disables it.
    pub template_soft_limit: Option<usize>,
    /// Merged rule lines (rules, principles and patterns) allowed for one
    /// composition. `None` disables the check.
    pub merged_line_budget: Option<usize>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { rules_line_budget: 200, template_soft_limit: Some(300), merged_line_budget: None }
    }
}

/// Options that affect validation and rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub validation: ValidationConfig,
    /// Character budget of the rendered output.
    pub max_chars: Option<usize>,
    /// Render Freeform sections of the template (after Patterns).
    pub include_freeform: bool,
}

/// Result of [`load_library`].
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub library: Library,
    /// Documents that failed to parse, in ID order. They are absent from
    /// `library`.
    pub failures: Vec<ParseError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Extra information returned by [`compose_document_verbose`].
#[derive(Debug, Clone, Default)]
pub struct ComposeDetails {
    pub metrics: StageMetrics,
    /// Non-blocking findings from both validation passes.
    pub warnings: Vec<Finding>,
    /// Every resolution problem in the library, including ones outside the
    /// template's subgraph.
    pub resolution_errors: Vec<ResolveError>,
    pub overrides: Vec<Override>,
}

/// Parse one raw document.
///
/// # Example
/// ```
/// use promptloom::parse;
///
/// let doc = parse("## Must Have\n- RULE-001: Back up daily.\n", "base-backup").unwrap();
/// assert_eq!(doc.rules().count(), 1);
/// ```
pub fn parse(raw: &str, id: impl Into<DocumentId>) -> Result<Document, ParseError> {
    engine::parser::parse(raw, id.into())
}

/// Parse `(id, raw)` pairs in parallel into a [`Library`] snapshot.
///
/// A document that fails to parse is reported in [`LoadReport::failures`] and
/// left out; the rest of the load continues. When two sources share an ID the
/// later one wins.
pub fn load_library<I, K>(sources: I) -> LoadReport
where
    I: IntoIterator<Item = (K, String)>,
    K: Into<DocumentId>,
{
    let sources: Vec<(DocumentId, String)> = sources.into_iter().map(|(id, raw)| (id.into(), raw)).collect();
    let parsed: Vec<Result<Document, ParseError>> =
        sources.par_iter().map(|(id, raw)| engine::parser::parse(raw, id.clone())).collect();

    let mut documents: Vec<Document> = Vec::with_capacity(parsed.len());
    let mut failures = Vec::new();
    for result in parsed {
        match result {
            Ok(doc) => documents.push(doc),
            Err(err) => {
                tracing::debug!(%err, "document rejected");
                failures.push(err);
            }
        }
    }
    failures.sort_by(|a, b| a.document().cmp(b.document()));

    let library = documents.into_iter().fold(Library::default(), |library, doc| {
        if library.contains(&doc.id) {
            tracing::warn!(document = %doc.id, "duplicate document id, keeping the later source");
        }
        library.with(doc)
    });

    tracing::debug!(documents = library.len(), failures = failures.len(), "loaded library");
    LoadReport { library, failures }
}

/// Build the reference graph of `library` and check it.
pub fn resolve_library(library: &Library) -> Resolution {
    engine::resolve(library)
}

/// Structural and budget findings for one document.
pub fn validate(document: &Document, config: &ValidationConfig) -> Vec<Finding> {
    engine::validate_document(document, config)
}

/// Budget findings for a merged rule set and the documents it came from.
pub fn validate_merged(merged: &MergedRuleSet, library: &Library, config: &ValidationConfig) -> Vec<Finding> {
    engine::validate_merged(merged, library, config)
}

/// Merge the rules reachable from `root`.
pub fn merge_rules(root: &DocumentId, resolution: &Resolution) -> Result<MergedRuleSet, MergeError> {
    engine::merge(root, resolution)
}

pub fn compose(
    template: &Document,
    merged: &MergedRuleSet,
    variables: &HashMap<String, String>,
    max_chars: Option<usize>,
) -> Result<ComposedContext, ComposeError> {
    compose_with(template, merged, variables, &Options { max_chars, ..Options::default() })
}

pub fn compose_with(
    template: &Document,
    merged: &MergedRuleSet,
    variables: &HashMap<String, String>,
    options: &Options,
) -> Result<ComposedContext, ComposeError> {
    engine::compose(template, merged, variables, options)
}

/// Run the whole pipeline for one template: resolve, validate, merge,
/// validate again, compose.
pub fn compose_document(
    library: &Library,
    template: &DocumentId,
    variables: &HashMap<String, String>,
    options: &Options,
) -> Result<ComposedContext, PipelineError> {
    compose_document_verbose(library, template, variables, options).0
}

/// Like [`compose_document`], but also return per-stage timings, warnings and
/// override provenance.
pub fn compose_document_verbose(
    library: &Library,
    template: &DocumentId,
    variables: &HashMap<String, String>,
    options: &Options,
) -> (Result<ComposedContext, PipelineError>, ComposeDetails) {
    let start = Instant::now();
    let mut details = ComposeDetails::default();
    let result = run_pipeline(library, template, variables, options, &mut details);
    details.metrics.total = start.elapsed();

    if let Err(err) = &result {
        tracing::debug!(template = %template, %err, "composition failed");
    }
    (result, details)
}

fn run_pipeline(
    library: &Library,
    template: &DocumentId,
    variables: &HashMap<String, String>,
    options: &Options,
    details: &mut ComposeDetails,
) -> Result<ComposedContext, PipelineError> {
    let doc = library.get(template).ok_or_else(|| PipelineError::UnknownDocument(template.clone()))?;

    let started = Instant::now();
    let resolution = engine::resolve(library);
    details.metrics.resolve = started.elapsed();
    details.resolution_errors = resolution.errors.clone();

    let started = Instant::now();
    let closure = resolution.graph.closure(template);
    details.metrics.documents = closure.len();
    let (errors, warnings): (Vec<Finding>, Vec<Finding>) = closure
        .iter()
        .filter_map(|id| library.get(id))
        .flat_map(|d| engine::validate_document(d, &options.validation))
        .partition(Finding::is_error);
    details.metrics.validate = started.elapsed();
    details.warnings = warnings;
    if !errors.is_empty() {
        return Err(PipelineError::ValidationFailed(errors));
    }

    let started = Instant::now();
    let merged = engine::merge(template, &resolution)?;
    details.metrics.merge = started.elapsed();
    details.overrides = merged.overrides.clone();

    let started = Instant::now();
    let (errors, warnings): (Vec<Finding>, Vec<Finding>) =
        engine::validate_merged(&merged, library, &options.validation).into_iter().partition(Finding::is_error);
    details.metrics.validate += started.elapsed();
    // The structural pass already reported the per-document budget warnings.
    let fresh: Vec<Finding> = warnings.into_iter().filter(|w| !details.warnings.contains(w)).collect();
    details.warnings.extend(fresh);
    if !errors.is_empty() {
        return Err(PipelineError::ValidationFailed(errors));
    }

    let started = Instant::now();
    let composed = engine::compose(doc, &merged, variables, options)?;
    details.metrics.render = started.elapsed();

    Ok(composed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FindingKind, Severity};

    fn sources(docs: &[(&str, &str)]) -> Vec<(String, String)> {
        docs.iter().map(|(id, raw)| (id.to_string(), raw.to_string())).collect()
    }

    const TEMPLATE: &str = "\
---
kind: template
---
## Role
Backup operator.
## Context
Nightly jobs.
## Instructions
Check the jobs.
## Output Format
A table.
## References
- base
";

    #[test]
    fn load_library_keeps_going_past_failures() {
        let report = load_library(sources(&[
            ("base", "## Must\n- R-1: one\n"),
            ("zz-broken", "## Must\n- R-1: one\n- R-1: two\n"),
            ("also-broken", "## Must\nnot a rule\n- oops\n"),
        ]));

        assert_eq!(report.library.len(), 1);
        assert!(report.library.contains(&DocumentId::new("base")));
        let failed: Vec<&str> = report.failures.iter().map(|f| f.document().as_str()).collect();
        assert_eq!(failed, vec!["also-broken", "zz-broken"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn compose_document_runs_every_stage() {
        let report = load_library(sources(&[("base", "## Must\n- R-1: Verify checksums.\n"), ("job", TEMPLATE)]));
        let (result, details) =
            compose_document_verbose(&report.library, &DocumentId::new("job"), &HashMap::new(), &Options::default());

        let composed = result.unwrap();
        assert!(composed.text.contains("## Must Have\n- R-1: Verify checksums.\n"));
        assert_eq!(composed.sources, vec![DocumentId::new("job"), DocumentId::new("base")]);
        assert_eq!(details.metrics.documents, 2);
        assert!(details.metrics.stages() <= details.metrics.total);
        assert!(details.warnings.is_empty());
    }

    #[test]
    fn unknown_template_is_reported() {
        let err = compose_document(&Library::default(), &DocumentId::new("nope"), &HashMap::new(), &Options::default())
            .unwrap_err();
        assert_eq!(err, PipelineError::UnknownDocument(DocumentId::new("nope")));
    }

    #[test]
    fn validation_errors_block_composition() {
        let base = "---\nbudget: 2\n---\n## Must\n- R-1: x\n";
        let report = load_library(sources(&[("base", base), ("job", TEMPLATE)]));
        let err = compose_document(&report.library, &DocumentId::new("job"), &HashMap::new(), &Options::default())
            .unwrap_err();

        let PipelineError::ValidationFailed(findings) = err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[0].kind, FindingKind::BudgetExceeded { limit: 2, actual: 5 });
    }

    #[test]
    fn merged_budget_is_checked_after_merge() {
        let report = load_library(sources(&[("base", "## Must\n- R-1: x\n- R-2: y\n"), ("job", TEMPLATE)]));
        let options = Options {
            validation: ValidationConfig { merged_line_budget: Some(1), ..ValidationConfig::default() },
            ..Options::default()
        };
        let err = compose_document(&report.library, &DocumentId::new("job"), &HashMap::new(), &options).unwrap_err();
        assert_eq!(
            err,
            PipelineError::ValidationFailed(vec![Finding {
                document: DocumentId::new("job"),
                severity: Severity::Error,
                kind: FindingKind::BudgetExceeded { limit: 1, actual: 2 },
            }])
        );
    }

    #[test]
    fn compose_applies_the_char_budget() {
        let report = load_library(sources(&[("base", "## Must\n- R-1: x\n"), ("job", TEMPLATE)]));
        let resolution = resolve_library(&report.library);
        let merged = merge_rules(&DocumentId::new("job"), &resolution).unwrap();
        let template = report.library.get(&DocumentId::new("job")).unwrap();

        let err = compose(template, &merged, &HashMap::new(), Some(10)).unwrap_err();
        assert!(matches!(err, ComposeError::BudgetExceeded { limit: 10, .. }));
    }

    /// Counts events at `WARN` or above.
    struct Warnings(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Warnings {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() <= tracing::Level::WARN {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn reported_problems_are_not_logged_as_warnings() {
        use tracing_subscriber::prelude::*;

        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(Warnings(count.clone()));

        let (report, resolution) = tracing::subscriber::with_default(subscriber, || {
            let report = load_library(sources(&[
                ("base", "## Must\n- R-1: x\n## References\n- missing\n"),
                ("broken", "## Must\n- oops\n"),
            ]));
            let resolution = resolve_library(&report.library);
            (report, resolution)
        });

        assert_eq!(report.failures.len(), 1);
        assert_eq!(resolution.errors.len(), 1);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
