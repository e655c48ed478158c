use std::fmt;
use std::sync::Arc;

/// HTML escaping utility used for single-brace placeholders
pub struct HtmlEscaper;

impl HtmlEscaper {
    /// Escape the HTML-significant characters `& < > " '`
    pub fn escape(input: &str) -> String {
        if !input.contains(['&', '<', '>', '"', '\'']) {
            return input.to_string();
        }

        input
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#x27;")
    }
}

/// Pluggable escaping function applied to escaped placeholders.
///
/// Defaults to [`HtmlEscaper::escape`]; hosts rendering something other than
/// HTML can swap in their own function through the engine builder.
#[derive(Clone)]
pub struct Escaper(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Escaper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// An escaper that passes text through untouched
    pub fn identity() -> Self {
        Self::new(|s| s.to_string())
    }

    pub fn escape(&self, input: &str) -> String {
        (self.0)(input)
    }
}

impl Default for Escaper {
    fn default() -> Self {
        Self::new(HtmlEscaper::escape)
    }
}

impl fmt::Debug for Escaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Escaper(..)")
    }
}
