//! Composition engine.
//!
//! The engine is a chain of pure stages. Each stage consumes the output of the
//! previous one and never mutates a parsed `Document`:
//!
//! ```text
//! (id, raw text) ──▶ parser::parse               (parser.rs)
//!                     - front matter, headings (headers.rs)
//!                     - rules, references, placeholders (placeholder.rs)
//!                          │
//!                          v
//!                     Library snapshot ──▶ graph::resolve      (graph.rs)
//!                                           - arena + index graph
//!                                           - cycles, dangling targets
//!                                           - leaves-first order
//!                          │
//!                          v
//!                     validate::document       (validate.rs, structural pass)
//!                          │
//!                          v
//!                     merge::merge             (merge.rs)
//!                       - leaf-to-root walk, closer-to-root overrides
//!                          │
//!                          v
//!                     validate::merged         (validate.rs, budget pass)
//!                          │
//!                          v
//!                     render::compose          (render.rs)
//!                       - placeholder substitution + char budget
//!                          │
//!                          v
//!                     ComposedContext
//! ```
//!
//! ## Responsibilities by module
//!
//! - `headers.rs`: the header table. Recognizing a heading is the schema
//!   boundary; everything unrecognized becomes `Freeform`.
//! - `placeholder.rs`: tokenizes `{{name|default}}` slots and substitutes them.
//! - `parser.rs`: one deterministic pass from raw lines to a `Document`.
//! - `serialize.rs`: the inverse of the parser, for round-tripping.
//! - `graph.rs`: builds the reference graph, reports every problem at once and
//!   computes the dependency order.
//! - `merge.rs`: tier-ordered rule accumulation and conflict detection.
//! - `validate.rs`: findings with severities; never mutates.
//! - `render.rs`: fixed section order, substitution, budget enforcement.
//! - `metrics.rs`: per-stage timings for verbose runs.
//!
//! ## Debugging
//!
//! Every stage emits `tracing` events. The CLI reads `PROMPTLOOM_LOG` (for
//! example `PROMPTLOOM_LOG=promptloom=trace`) to show per-rule merge decisions.

#[path = "engine/graph.rs"]
mod graph;
#[path = "engine/headers.rs"]
mod headers;
#[path = "engine/merge.rs"]
mod merge;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/parser.rs"]
pub(crate) mod parser;
#[path = "engine/placeholder.rs"]
mod placeholder;
#[path = "engine/render.rs"]
mod render;
#[path = "engine/serialize.rs"]
pub(crate) mod serialize;
#[cfg(test)]
#[path = "engine/tests.rs"]
mod tests;
#[path = "engine/validate.rs"]
mod validate;

pub use graph::{DocumentGraph, Resolution};
pub use merge::{MergedRuleSet, Override};
pub use metrics::StageMetrics;
pub use render::{ComposedContext, RenderedSection};
pub use validate::{Finding, FindingKind, Severity};

pub(crate) use graph::resolve;
pub(crate) use merge::merge;
pub(crate) use render::compose;
pub(crate) use validate::{document as validate_document, merged as validate_merged};
