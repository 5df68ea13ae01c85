/// Compile a regex literal once and hand out a `&'static Regex`.
///
/// Patterns are literals checked by the unit tests of every module that uses
/// them, so the `unwrap` inside the lazy initializer cannot fire at runtime.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}
