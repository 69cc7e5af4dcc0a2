//! Read trained vectors back from the store and classify each person.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::graph::{GraphStore, PersonEmbeddingRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonStatus {
    Alumni,
    User,
}

impl PersonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonStatus::Alumni => "alumni",
            PersonStatus::User => "user",
        }
    }
}

impl fmt::Display for PersonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One person ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonEmbeddingRecord {
    pub email: String,
    pub vector: Vec<f32>,
    pub status: PersonStatus,
    /// Set only for alumni whose scholarship has a name
    pub scholarship_id: Option<String>,
}

/// Status and scholarship for a person with `scholarship_count` scholarship links.
///
/// Any link makes the person alumni. The smallest non-empty name is picked so
/// the choice does not depend on store ordering.
pub fn classify(scholarship_count: usize, scholarships: &[String]) -> (PersonStatus, Option<String>) {
    if scholarship_count == 0 && scholarships.is_empty() {
        return (PersonStatus::User, None);
    }
    let id = scholarships
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .min()
        .map(str::to_string);
    (PersonStatus::Alumni, id)
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub records: Vec<PersonEmbeddingRecord>,
    /// Rows dropped for a missing email or an unusable vector
    pub skipped: usize,
}

/// Turn store rows into records, skipping rows that cannot be indexed.
pub fn records_from_rows(rows: Vec<PersonEmbeddingRow>, dimension: usize) -> ExtractionReport {
    let mut report = ExtractionReport::default();

    for row in rows {
        let email = match row.email.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e.to_string(),
            _ => {
                log::warn!("Skipping person without email");
                report.skipped += 1;
                continue;
            }
        };
        let vector = match row.embedding {
            Some(v) if v.len() == dimension => v,
            Some(v) if v.is_empty() => {
                log::warn!("Skipping {}: empty embedding", email);
                report.skipped += 1;
                continue;
            }
            Some(v) => {
                log::warn!("Skipping {}: embedding has {} values, expected {}", email, v.len(), dimension);
                report.skipped += 1;
                continue;
            }
            None => {
                log::warn!("Skipping {}: no embedding", email);
                report.skipped += 1;
                continue;
            }
        };

        let (status, scholarship_id) = classify(row.scholarship_count, &row.scholarships);
        report.records.push(PersonEmbeddingRecord {
            email,
            vector,
            status,
            scholarship_id,
        });
    }

    report
}

/// Extract every person holding a vector under `property`.
pub async fn extract_embeddings(store: &dyn GraphStore, property: &str, dimension: usize) -> Result<ExtractionReport> {
    let rows = store.person_embeddings(property).await?;
    let report = records_from_rows(rows, dimension);
    let alumni = report
        .records
        .iter()
        .filter(|r| r.status == PersonStatus::Alumni)
        .count();
    log::info!(
        "Extracted {} person embeddings ({} alumni, {} users), skipped {}",
        report.records.len(),
        alumni,
        report.records.len() - alumni,
        report.skipped
    );
    Ok(report)
}
