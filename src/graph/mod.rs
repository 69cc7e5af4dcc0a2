//! Graph store access, training projections and analytics backends.
//!
//! Core components talk to the store through [`GraphStore`] and only ever see
//! the typed rows defined here; Bolt values are decoded in `client`.

mod analytics;
mod client;
mod projection;

pub use analytics::{EmbedSummary, GdsAnalytics, GraphAnalytics, NativeAnalytics, ProjectionHandle};
pub use client::Neo4jStore;
pub use projection::{build_projection, Orientation, Projection, ProjectionSpec, RelationshipWeight};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;

/// Relationship types leaving a Person node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "HAS_SKILL")]
    HasSkill,
    #[serde(rename = "HAS_DEGREE")]
    HasDegree,
    #[serde(rename = "HAS_CERTIFICATION")]
    HasCertification,
    #[serde(rename = "HAS_HONOR")]
    HasHonor,
    #[serde(rename = "WORKED_AT")]
    WorkedAt,
    #[serde(rename = "SPEAKS")]
    Speaks,
    #[serde(rename = "LIVES_IN")]
    LivesIn,
    #[serde(rename = "HAS_SCHOLARSHIP")]
    HasScholarship,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 8] = [
        RelationshipType::HasSkill,
        RelationshipType::HasDegree,
        RelationshipType::HasCertification,
        RelationshipType::HasHonor,
        RelationshipType::WorkedAt,
        RelationshipType::Speaks,
        RelationshipType::LivesIn,
        RelationshipType::HasScholarship,
    ];

    /// Neo4j relationship type name
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::HasSkill => "HAS_SKILL",
            RelationshipType::HasDegree => "HAS_DEGREE",
            RelationshipType::HasCertification => "HAS_CERTIFICATION",
            RelationshipType::HasHonor => "HAS_HONOR",
            RelationshipType::WorkedAt => "WORKED_AT",
            RelationshipType::Speaks => "SPEAKS",
            RelationshipType::LivesIn => "LIVES_IN",
            RelationshipType::HasScholarship => "HAS_SCHOLARSHIP",
        }
    }

    /// Label of the reference node at the end of the relationship
    pub fn target_label(&self) -> &'static str {
        match self {
            RelationshipType::HasSkill => "Skill",
            RelationshipType::HasDegree => "DegreeProgram",
            RelationshipType::HasCertification => "Certification",
            RelationshipType::HasHonor => "Honor",
            RelationshipType::WorkedAt => "Company",
            RelationshipType::Speaks => "Language",
            RelationshipType::LivesIn => "Country",
            RelationshipType::HasScholarship => "Scholarship",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RelationshipType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown relationship type: {}", s))
    }
}

/// One `(:Person)-[rel]->(target)` edge as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRow {
    pub person_email: String,
    pub rel_type: RelationshipType,
    /// Store identity of the target node (element id for Neo4j)
    pub target_id: String,
    /// The relationship's own `weight` property, if it has one
    pub weight: Option<f64>,
}

/// A Person with a stored embedding and its scholarship links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonEmbeddingRow {
    pub email: Option<String>,
    pub embedding: Option<Vec<f32>>,
    /// Number of HAS_SCHOLARSHIP relationships
    pub scholarship_count: usize,
    /// Names of the linked scholarships (unnamed ones are absent)
    pub scholarships: Vec<String>,
}

/// Query/session contract of the graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Check that the store is reachable and credentials are accepted.
    async fn verify(&self) -> Result<()>;

    /// All relationships of the given types leaving Person nodes.
    async fn person_relationships(&self, types: &[RelationshipType]) -> Result<Vec<RelationshipRow>>;

    /// Overwrite `property` on the given persons in one transaction and remove it
    /// from every other Person. Returns the number of vectors written.
    async fn write_embeddings(&self, property: &str, embeddings: &[(String, Vec<f32>)]) -> Result<usize>;

    /// Every Person whose `property` is set, with scholarship links.
    async fn person_embeddings(&self, property: &str) -> Result<Vec<PersonEmbeddingRow>>;

    /// Stored vector of one person, `None` if the person or the vector is missing.
    async fn embedding_for(&self, email: &str, property: &str) -> Result<Option<Vec<f32>>>;
}
