//! Weighted training projection.
//!
//! Stored in CSR form: `offsets[i]..offsets[i + 1]` indexes the outgoing
//! edges of node `i` in `targets` / `weights`, and each node's targets are
//! sorted so adjacency checks are a binary search.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{PeermatchError, Result};
use crate::graph::{GraphStore, RelationshipRow, RelationshipType};

/// Edge direction kept in the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Person -> reference node, as stored
    Natural,
    /// Reference node -> Person
    Reverse,
    /// Both directions
    #[default]
    Undirected,
}

impl Orientation {
    /// Name used by Graph Data Science projections
    pub fn as_gds(&self) -> &'static str {
        match self {
            Orientation::Natural => "NATURAL",
            Orientation::Reverse => "REVERSE",
            Orientation::Undirected => "UNDIRECTED",
        }
    }
}

/// Default weight applied to a relationship type when the edge carries none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationshipWeight {
    pub rel_type: RelationshipType,
    pub default_weight: f64,
}

impl RelationshipWeight {
    pub fn new(rel_type: RelationshipType, default_weight: f64) -> Self {
        Self {
            rel_type,
            default_weight,
        }
    }
}

/// What to project: graph name, weighted relationship types and orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSpec {
    pub graph_name: String,
    pub weights: Vec<RelationshipWeight>,
    pub orientation: Orientation,
}

impl ProjectionSpec {
    /// Career and education signals outweigh language and geography.
    pub fn default_weights() -> Vec<RelationshipWeight> {
        vec![
            RelationshipWeight::new(RelationshipType::HasSkill, 2.0),
            RelationshipWeight::new(RelationshipType::HasDegree, 3.0),
            RelationshipWeight::new(RelationshipType::HasCertification, 2.0),
            RelationshipWeight::new(RelationshipType::HasHonor, 1.0),
            RelationshipWeight::new(RelationshipType::WorkedAt, 3.0),
            RelationshipWeight::new(RelationshipType::Speaks, 2.0),
            RelationshipWeight::new(RelationshipType::LivesIn, 1.0),
        ]
    }

    pub fn with_defaults(graph_name: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            weights: Self::default_weights(),
            orientation: Orientation::default(),
        }
    }

    /// Reject empty, duplicated or non-positive weight tables.
    pub fn validate(&self) -> Result<()> {
        if self.graph_name.trim().is_empty() {
            return Err(PeermatchError::Projection("graph name must not be empty".to_string()));
        }
        if self.weights.is_empty() {
            return Err(PeermatchError::Projection(
                "at least one relationship type must be projected".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for w in &self.weights {
            if !seen.insert(w.rel_type) {
                return Err(PeermatchError::Projection(format!(
                    "relationship type {} listed twice",
                    w.rel_type
                )));
            }
            if !w.default_weight.is_finite() || w.default_weight <= 0.0 {
                return Err(PeermatchError::Projection(format!(
                    "weight for {} must be a positive number, got {}",
                    w.rel_type, w.default_weight
                )));
            }
        }
        Ok(())
    }

    pub fn relationship_types(&self) -> Vec<RelationshipType> {
        self.weights.iter().map(|w| w.rel_type).collect()
    }

    pub fn weight_for(&self, rel_type: RelationshipType) -> Option<f64> {
        self.weights
            .iter()
            .find(|w| w.rel_type == rel_type)
            .map(|w| w.default_weight)
    }
}

/// A node in the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedNode {
    /// Email for persons, store element id for reference nodes
    pub key: String,
    pub is_person: bool,
}

/// In-memory weighted graph built from a [`ProjectionSpec`].
#[derive(Debug, Clone)]
pub struct Projection {
    name: String,
    nodes: Vec<ProjectedNode>,
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
}

impl Projection {
    /// Build from relationship rows. Rows of types without a configured weight are ignored;
    /// parallel edges between the same pair are merged by summing their weights.
    ///
    /// Rows are sorted first, so node numbering does not depend on store order.
    pub fn from_rows(spec: &ProjectionSpec, mut rows: Vec<RelationshipRow>) -> Result<Self> {
        spec.validate()?;
        rows.sort_by(|a, b| {
            (&a.person_email, a.rel_type, &a.target_id).cmp(&(&b.person_email, b.rel_type, &b.target_id))
        });

        let mut nodes: Vec<ProjectedNode> = Vec::new();
        let mut persons: HashMap<String, usize> = HashMap::new();
        let mut references: HashMap<String, usize> = HashMap::new();
        let mut edges: BTreeMap<(usize, usize), f64> = BTreeMap::new();

        for row in rows {
            let default_weight = match spec.weight_for(row.rel_type) {
                Some(w) => w,
                None => continue,
            };
            let weight = row
                .weight
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(default_weight);

            let person = *persons.entry(row.person_email.clone()).or_insert_with(|| {
                nodes.push(ProjectedNode {
                    key: row.person_email.clone(),
                    is_person: true,
                });
                nodes.len() - 1
            });
            let reference = *references.entry(row.target_id.clone()).or_insert_with(|| {
                nodes.push(ProjectedNode {
                    key: row.target_id.clone(),
                    is_person: false,
                });
                nodes.len() - 1
            });

            if matches!(spec.orientation, Orientation::Natural | Orientation::Undirected) {
                *edges.entry((person, reference)).or_insert(0.0) += weight;
            }
            if matches!(spec.orientation, Orientation::Reverse | Orientation::Undirected) {
                *edges.entry((reference, person)).or_insert(0.0) += weight;
            }
        }

        let mut offsets = vec![0usize; nodes.len() + 1];
        for &(from, _) in edges.keys() {
            offsets[from + 1] += 1;
        }
        for i in 0..nodes.len() {
            offsets[i + 1] += offsets[i];
        }
        // BTreeMap iteration is ordered by (from, to): targets land sorted per node
        let mut targets = Vec::with_capacity(edges.len());
        let mut weights = Vec::with_capacity(edges.len());
        for ((_, to), weight) in edges {
            targets.push(to);
            weights.push(weight);
        }

        Ok(Self {
            name: spec.graph_name.clone(),
            nodes,
            offsets,
            targets,
            weights,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.targets.len()
    }

    pub fn node(&self, idx: usize) -> &ProjectedNode {
        &self.nodes[idx]
    }

    pub fn out_degree(&self, idx: usize) -> usize {
        self.offsets[idx + 1] - self.offsets[idx]
    }

    /// Outgoing neighbors of a node, sorted ascending
    pub fn neighbors(&self, idx: usize) -> &[usize] {
        &self.targets[self.offsets[idx]..self.offsets[idx + 1]]
    }

    /// Weights aligned with [`Projection::neighbors`]
    pub fn neighbor_weights(&self, idx: usize) -> &[f64] {
        &self.weights[self.offsets[idx]..self.offsets[idx + 1]]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.neighbors(from).binary_search(&to).is_ok()
    }

    /// Weight of the edge `from -> to`, if present
    pub fn edge_weight(&self, from: usize, to: usize) -> Option<f64> {
        self.neighbors(from)
            .binary_search(&to)
            .ok()
            .map(|pos| self.neighbor_weights(from)[pos])
    }

    /// Indices of person nodes
    pub fn persons(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_person)
            .map(|(i, _)| i)
    }
}

/// Read the current store contents and build a fresh projection.
pub async fn build_projection(store: &dyn GraphStore, spec: &ProjectionSpec) -> Result<Projection> {
    spec.validate()?;
    let rows = store.person_relationships(&spec.relationship_types()).await?;
    let projection = Projection::from_rows(spec, rows)?;
    log::info!(
        "Projected graph '{}': {} nodes, {} relationships",
        projection.name(),
        projection.node_count(),
        projection.relationship_count()
    );
    Ok(projection)
}
