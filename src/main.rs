mod debug_report;

use promptloom::{DocumentId, Options, ValidationConfig, compose_document_verbose, load_library, resolve_library, validate};
use std::collections::HashMap;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const LOG_ENV: &str = "PROMPTLOOM_LOG";

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_tracing(config.verbose);

    let sources = match collect_sources(&config.paths) {
        Ok(sources) => sources,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let code = match &config.template {
        Some(template) => run_compose(&config, sources, template),
        None => run_check(&config, sources),
    };
    std::process::exit(code);
}

fn run_check(config: &CliConfig, sources: Vec<(DocumentId, String)>) -> i32 {
    let load = load_library(sources);
    let findings: Vec<_> = load.library.documents().flat_map(|doc| validate(doc, &config.options.validation)).collect();
    let resolution = resolve_library(&load.library);

    debug_report::print_check(&load, &findings, &resolution, config.color);

    let failed = !load.is_clean() || !resolution.is_ok() || findings.iter().any(|f| f.is_error());
    i32::from(failed)
}

fn run_compose(config: &CliConfig, sources: Vec<(DocumentId, String)>, template: &DocumentId) -> i32 {
    let load = load_library(sources);
    let (result, details) = compose_document_verbose(&load.library, template, &config.variables, &config.options);

    debug_report::print_compose(template, &load, &details, result.as_ref().err(), config.verbose, config.color);
    match result {
        Ok(composed) => {
            print!("{}", composed.text);
            0
        }
        Err(_) => 1,
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "promptloom=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().without_time().with_target(false).with_writer(io::stderr))
        .init();
}

struct CliConfig {
    paths: Vec<PathBuf>,
    template: Option<DocumentId>,
    variables: HashMap<String, String>,
    options: Options,
    color: bool,
    verbose: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut template: Option<DocumentId> = None;
    let mut check = false;
    let mut variables = HashMap::new();
    let mut options = Options::default();
    let mut color = io::stderr().is_terminal();
    let mut verbose = false;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("promptloom {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "-v" | "--verbose" => verbose = true,
            "--check" => check = true,
            "--freeform" => options.include_freeform = true,
            "-t" | "--template" => {
                let value = args.next().ok_or_else(|| format!("error: {arg} expects a value"))?;
                set_template(&mut template, &value)?;
            }
            "--var" => {
                let value = args.next().ok_or_else(|| "error: --var expects a value".to_string())?;
                insert_var(&mut variables, &value)?;
            }
            "--max-chars" => {
                let value = args.next().ok_or_else(|| "error: --max-chars expects a value".to_string())?;
                options.max_chars = Some(parse_count("--max-chars", &value)?);
            }
            "--rules-budget" => {
                let value = args.next().ok_or_else(|| "error: --rules-budget expects a value".to_string())?;
                options.validation.rules_line_budget = parse_count("--rules-budget", &value)?;
            }
            "--" => {
                paths.extend(args.by_ref().map(PathBuf::from));
                break;
            }
            _ if arg.starts_with("--template=") => set_template(&mut template, arg.trim_start_matches("--template="))?,
            _ if arg.starts_with("--var=") => insert_var(&mut variables, arg.trim_start_matches("--var="))?,
            _ if arg.starts_with("--max-chars=") => {
                options.max_chars = Some(parse_count("--max-chars", arg.trim_start_matches("--max-chars="))?);
            }
            _ if arg.starts_with("--rules-budget=") => {
                options.validation.rules_line_budget =
                    parse_count("--rules-budget", arg.trim_start_matches("--rules-budget="))?;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }

    if paths.is_empty() {
        return Err(format!("error: no document paths provided\n\n{}", help_text()));
    }
    if check && template.is_some() {
        return Err("error: --check and --template are mutually exclusive".to_string());
    }

    Ok(CliConfig { paths, template, variables, options, color, verbose })
}

fn set_template(slot: &mut Option<DocumentId>, value: &str) -> Result<(), String> {
    if slot.is_some() {
        return Err("error: template provided multiple times".to_string());
    }
    *slot = Some(DocumentId::normalize(value));
    Ok(())
}

fn insert_var(variables: &mut HashMap<String, String>, value: &str) -> Result<(), String> {
    let (key, val) =
        value.split_once('=').ok_or_else(|| format!("error: invalid --var '{value}' (expected key=value)"))?;
    if key.trim().is_empty() {
        return Err(format!("error: invalid --var '{value}' (empty key)"));
    }
    variables.insert(key.trim().to_string(), val.to_string());
    Ok(())
}

fn parse_count(flag: &str, value: &str) -> Result<usize, String> {
    value.parse().map_err(|_| format!("error: invalid {flag} '{value}' (expected a non-negative integer)"))
}

/// Read every `*.md` file under `paths`. A directory contributes its files
/// with IDs relative to itself; a file argument is named by its stem.
fn collect_sources(paths: &[PathBuf]) -> Result<Vec<(DocumentId, String)>, String> {
    let mut sources = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files = Vec::new();
            walk(path, &mut files).map_err(|err| format!("error: failed to read {}: {err}", path.display()))?;
            files.sort();
            for file in files {
                let relative = file.strip_prefix(path).unwrap_or(&file);
                sources.push((document_id(relative), read(&file)?));
            }
        } else {
            let name = path.file_name().map(Path::new).unwrap_or(path);
            sources.push((document_id(name), read(path)?));
        }
    }
    Ok(sources)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("error: failed to read {}: {err}", path.display()))
}

fn document_id(relative: &Path) -> DocumentId {
    let joined = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
    DocumentId::normalize(&joined)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    let defaults = ValidationConfig::default();
    format!(
        "promptloom {version}

Compose prompt templates from tiered rule documents.

Usage:
  promptloom [OPTIONS] --template <id> <path>...
  promptloom [OPTIONS] --check <path>...

Paths are markdown files or directories scanned recursively for *.md.
Document IDs are paths relative to the directory, without the .md suffix.

Options:
  -t, --template <id>        Template document to compose. The result is
                             written to stdout, the report to stderr.
  --var <key=value>          Placeholder binding. Repeatable.
  --max-chars <n>            Character budget of the composed output.
  --rules-budget <n>         Line ceiling for Rules documents.
                             Default: {rules_budget}
  --check                    Validate the library without composing.
  --freeform                 Render unrecognized template sections.
  --color                    Force ANSI color in the report.
  --no-color                 Disable ANSI color in the report.
  -v, --verbose              Debug logging and stage timings.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  {log_env}             Log filter, e.g. promptloom=trace.

Exit codes:
  0  Success.
  1  Validation or composition failed.
  2  Invalid arguments or unreadable paths.
",
        version = env!("CARGO_PKG_VERSION"),
        rules_budget = defaults.rules_line_budget,
        log_env = LOG_ENV,
    )
}
