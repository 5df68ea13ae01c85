use promptloom::{ComposeDetails, DocumentId, Finding, LoadReport, MergeError, PipelineError, Resolution, Severity};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

fn banner(palette: &ansi::Palette, title: &str) {
    eprintln!("\n{}", palette.paint(format!("━━━ {title} ━━━"), ansi::GRAY));
}

pub fn print_check(load: &LoadReport, findings: &[Finding], resolution: &Resolution, color: bool) {
    let palette = ansi::Palette::new(color);
    eprintln!(
        "\n{}",
        palette.bold(palette.paint(format!("⚙  Checking {} document(s)", load.library.len()), ansi::CYAN))
    );

    print_failures(load, &palette);

    banner(&palette, "References");
    if resolution.errors.is_empty() {
        eprintln!("  {}", palette.paint("✓ no reference problems", ansi::GREEN));
    }
    for err in &resolution.errors {
        eprintln!("  {} {err}", palette.paint("✗", ansi::RED));
    }
    for (document, target) in resolution.graph.unresolved_optional() {
        eprintln!("  {}", palette.dim(format!("· {document} → {target} (optional, unresolved)")));
    }

    banner(&palette, "Findings");
    if findings.is_empty() {
        eprintln!("  {}", palette.paint("✓ no findings", ansi::GREEN));
    }
    for finding in findings {
        eprintln!("  {}", fmt_finding(finding, &palette));
    }
    eprintln!();
}

pub fn print_compose(
    template: &DocumentId,
    load: &LoadReport,
    details: &ComposeDetails,
    error: Option<&PipelineError>,
    verbose: bool,
    color: bool,
) {
    let palette = ansi::Palette::new(color);
    if verbose {
        eprintln!("\n{}", palette.bold(palette.paint(format!("⚙  Composing: {template}"), ansi::CYAN)));
    }

    print_failures(load, &palette);

    if !details.warnings.is_empty() {
        banner(&palette, "Warnings");
        for finding in &details.warnings {
            eprintln!("  {}", fmt_finding(finding, &palette));
        }
    }

    if verbose && !details.overrides.is_empty() {
        banner(&palette, "Overrides");
        for o in &details.overrides {
            eprintln!(
                "  {} {}  {} {} {}{}",
                palette.paint(&o.rule_id, ansi::CYAN),
                palette.dim(format!("({})", o.tier)),
                palette.paint(o.replaced.as_str(), ansi::YELLOW),
                palette.dim("→"),
                palette.paint(o.by.as_str(), ansi::GREEN),
                if o.declared { String::new() } else { palette.dim("  (undeclared)") },
            );
        }
    }

    if let Some(err) = error {
        banner(&palette, "Failed");
        eprintln!("  {} {err}", palette.paint("✗", ansi::RED));
        if let PipelineError::ValidationFailed(findings) = err {
            for finding in findings {
                eprintln!("    {}", fmt_finding(finding, &palette));
            }
        }
        if let PipelineError::Merge(MergeError::BrokenSubgraph { errors, .. }) = err {
            for problem in errors {
                eprintln!("    {}", palette.dim(problem.to_string()));
            }
        }
    }

    if verbose {
        let m = &details.metrics;
        banner(&palette, "Timing");
        eprintln!(
            "  Total: {}  │  Resolve: {}  │  Validate: {}  │  Merge: {}  │  Render: {}  │  {} document(s)",
            palette.paint(format!("{:?}", m.total), ansi::GREEN),
            palette.paint(format!("{:?}", m.resolve), ansi::CYAN),
            palette.dim(format!("{:?}", m.validate)),
            palette.dim(format!("{:?}", m.merge)),
            palette.dim(format!("{:?}", m.render)),
            palette.paint(m.documents.to_string(), ansi::BLUE),
        );
        eprintln!();
    }
}

fn print_failures(load: &LoadReport, palette: &ansi::Palette) {
    if load.failures.is_empty() {
        return;
    }
    banner(palette, "Rejected");
    for failure in &load.failures {
        eprintln!("  {} {failure}", palette.paint("✗", ansi::RED));
    }
}

fn fmt_finding(finding: &Finding, palette: &ansi::Palette) -> String {
    let color = match finding.severity {
        Severity::Error => ansi::RED,
        Severity::Warning => ansi::YELLOW,
    };
    palette.paint(finding.to_string(), color)
}
