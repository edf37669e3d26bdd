/// Block source configuration

/// Default number of sectors fetched per metadata read
pub const DEFAULT_MIN_FETCH: u32 = 16;

/// Controls how the block source talks to its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Keep file content sectors in the shared sector cache
    pub cache_content: bool,
    /// Minimum sectors per metadata fetch (range-request transports benefit from larger batches)
    pub min_fetch: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cache_content: false,
            min_fetch: DEFAULT_MIN_FETCH,
        }
    }
}

impl SourceConfig {
    pub fn with_cache_content(mut self, cache_content: bool) -> Self {
        self.cache_content = cache_content;
        self
    }

    pub fn with_min_fetch(mut self, min_fetch: u32) -> Self {
        self.min_fetch = min_fetch;
        self
    }

    /// Batch size actually used, never below one sector
    pub fn effective_min_fetch(&self) -> u32 {
        self.min_fetch.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SourceConfig::default();
        assert!(!config.cache_content);
        assert_eq!(config.min_fetch, DEFAULT_MIN_FETCH);
    }

    #[test]
    fn test_zero_min_fetch_is_clamped() {
        let config = SourceConfig::default().with_min_fetch(0);
        assert_eq!(config.effective_min_fetch(), 1);
    }
}
