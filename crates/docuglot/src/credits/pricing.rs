//! Cost computation for translation work

use crate::config::PricingConfig;
use crate::providers::translator::TranslationService;

/// Per-service credit rates over a fixed page size
#[derive(Debug, Clone)]
pub struct PricingTable {
    words_per_page: u64,
    machine_rate: i64,
    llm_rate: i64,
}

impl PricingTable {
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            words_per_page: config.words_per_page.max(1),
            machine_rate: config.machine_rate,
            llm_rate: config.llm_rate,
        }
    }

    /// Credits per page for a service tier
    pub fn rate(&self, service: TranslationService) -> i64 {
        match service {
            TranslationService::GoogleTranslate => self.machine_rate,
            TranslationService::LlmEnhanced => self.llm_rate,
        }
    }

    /// Cost in credits for `words` words: ceil(words / page size) * rate.
    /// Zero words still bills one page.
    pub fn compute_cost(&self, words: u64, service: TranslationService) -> i64 {
        let pages = words.div_ceil(self.words_per_page).max(1);
        pages as i64 * self.rate(service)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(&PricingConfig::default())
    }
}

/// Count billable words in extracted text
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
