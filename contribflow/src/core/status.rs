//! Pipeline type and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The recurring jobs this system knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    /// Ingest pull requests and extract normalized entities.
    EntityExtraction,
    /// Fill in repository and contributor details from GitHub.
    DataEnrichment,
    /// Compute contributor rankings.
    ContributorRanking,
    /// Publish paginated sitemap files.
    SitemapGeneration,
}

impl PipelineType {
    /// Every pipeline type, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::EntityExtraction,
        Self::DataEnrichment,
        Self::ContributorRanking,
        Self::SitemapGeneration,
    ];

    /// Returns the snake_case identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EntityExtraction => "entity_extraction",
            Self::DataEnrichment => "data_enrichment",
            Self::ContributorRanking => "contributor_ranking",
            Self::SitemapGeneration => "sitemap_generation",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown pipeline type.
#[derive(Debug, Clone, Error)]
#[error("Unknown pipeline type: {0}")]
pub struct UnknownPipelineType(pub String);

impl FromStr for PipelineType {
    type Err = UnknownPipelineType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownPipelineType(s.to_string()))
    }
}

/// The status of a recorded pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is in progress.
    Running,
    /// The run finished successfully.
    Completed,
    /// The run failed, was stopped, or was swept as stale.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_type_round_trips_through_str() {
        for t in PipelineType::ALL {
            assert_eq!(t.as_str().parse::<PipelineType>().unwrap(), t);
        }
        assert!("unknown".parse::<PipelineType>().is_err());
    }

    #[test]
    fn test_pipeline_type_serialize() {
        let json = serde_json::to_string(&PipelineType::DataEnrichment).unwrap();
        assert_eq!(json, r#""data_enrichment""#);
    }

    #[test]
    fn test_run_status_is_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }
}
