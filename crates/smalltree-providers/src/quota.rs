/// Markers that identify quota or rate-limit failures in backend error text.
pub const DEFAULT_QUOTA_MARKERS: [&str; 3] = ["429", "quota", "rate limit"];

/// Case-insensitive substring matcher for quota exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaMatcher {
    markers: Vec<String>,
}

impl QuotaMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.into().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Whether `text` contains any marker.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for QuotaMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_MARKERS)
    }
}
