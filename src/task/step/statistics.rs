use std::fmt::Display;
use thiserror::Error;

/// Key written by the pipeline itself for every step; steps can't use it.
pub const RESERVED_TIME_KEY: &str = "time";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatisticsError {
    #[error("Statistic has empty key")]
    EmptyKey,

    #[error("Statistic with key [{0}] is not accepted")]
    ReservedKey(String),

    #[error("Statistic with key [{0}] is already present")]
    DuplicateKey(String),
}

/// Named values collected while one step runs, kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct StepStatistics {
    entries: Vec<(String, String)>,
}

impl StepStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, value: impl Display) -> Result<&mut Self, StatisticsError> {
        if key.is_empty() {
            return Err(StatisticsError::EmptyKey);
        }
        if key == RESERVED_TIME_KEY {
            return Err(StatisticsError::ReservedKey(key.to_string()));
        }
        if self.entries.iter().any(|(k, _)| k == key) {
            return Err(StatisticsError::DuplicateKey(key.to_string()));
        }
        self.entries.push((key.to_string(), value.to_string()));
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_insertion_order() {
        let mut stats = StepStatistics::new();
        stats.add("issues", 12).unwrap().add("branch", "main").unwrap();

        assert_eq!(
            stats.entries(),
            &[
                ("issues".to_string(), "12".to_string()),
                ("branch".to_string(), "main".to_string())
            ]
        );
        assert_eq!(stats.get("issues"), Some("12"));
    }

    #[test]
    fn test_add_rejects_duplicate_key() {
        let mut stats = StepStatistics::new();
        stats.add("issues", 1).unwrap();
        assert_eq!(
            stats.add("issues", 2).unwrap_err(),
            StatisticsError::DuplicateKey("issues".to_string())
        );
        assert_eq!(stats.get("issues"), Some("1"));
    }

    #[test]
    fn test_add_rejects_reserved_and_empty_keys() {
        let mut stats = StepStatistics::new();
        assert_eq!(
            stats.add("time", 5).unwrap_err(),
            StatisticsError::ReservedKey("time".to_string())
        );
        assert_eq!(stats.add("", 5).unwrap_err(), StatisticsError::EmptyKey);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut stats = StepStatistics::new();
        stats.add("a", 1).unwrap();
        stats.clear();
        assert!(stats.is_empty());
        stats.add("a", 2).unwrap();
    }
}
