//! In-memory graph store for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{PeermatchError, Result};
use crate::graph::{GraphStore, PersonEmbeddingRow, RelationshipRow, RelationshipType};

pub const DEFAULT_PROPERTY: &str = "node2vec_emb";

#[derive(Default)]
struct Person {
    relations: Vec<(RelationshipType, String, Option<f64>)>,
    properties: HashMap<String, Vec<f32>>,
}

/// Persons keyed by email. Reference nodes are identified by label and name,
/// and a scholarship's name doubles as its `scholarship_name`.
#[derive(Default)]
pub struct MemoryGraphStore {
    persons: Mutex<BTreeMap<String, Person>>,
    offline: AtomicBool,
    embedding_reads: Mutex<usize>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_person(&self, email: &str) {
        self.persons.lock().unwrap().entry(email.to_string()).or_default();
    }

    pub fn relate(&self, email: &str, rel_type: RelationshipType, target: &str) {
        self.relate_weighted(email, rel_type, target, None);
    }

    pub fn relate_weighted(&self, email: &str, rel_type: RelationshipType, target: &str, weight: Option<f64>) {
        self.persons
            .lock()
            .unwrap()
            .entry(email.to_string())
            .or_default()
            .relations
            .push((rel_type, target.to_string(), weight));
    }

    pub fn set_embedding(&self, email: &str, vector: Vec<f32>) {
        self.persons
            .lock()
            .unwrap()
            .entry(email.to_string())
            .or_default()
            .properties
            .insert(DEFAULT_PROPERTY.to_string(), vector);
    }

    pub fn embedding(&self, email: &str) -> Option<Vec<f32>> {
        self.persons
            .lock()
            .unwrap()
            .get(email)
            .and_then(|p| p.properties.get(DEFAULT_PROPERTY).cloned())
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `embedding_for` calls served
    pub fn embedding_reads(&self) -> usize {
        *self.embedding_reads.lock().unwrap()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PeermatchError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "graph store offline",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn verify(&self) -> Result<()> {
        self.check_online()
    }

    async fn person_relationships(&self, types: &[RelationshipType]) -> Result<Vec<RelationshipRow>> {
        self.check_online()?;
        let persons = self.persons.lock().unwrap();
        let mut rows = Vec::new();
        for (email, person) in persons.iter() {
            for (rel_type, target, weight) in &person.relations {
                if types.contains(rel_type) {
                    rows.push(RelationshipRow {
                        person_email: email.clone(),
                        rel_type: *rel_type,
                        target_id: format!("{}:{}", rel_type.target_label(), target),
                        weight: *weight,
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn write_embeddings(&self, property: &str, embeddings: &[(String, Vec<f32>)]) -> Result<usize> {
        self.check_online()?;
        let mut persons = self.persons.lock().unwrap();
        for person in persons.values_mut() {
            person.properties.remove(property);
        }
        for (email, vector) in embeddings {
            if let Some(person) = persons.get_mut(email) {
                person.properties.insert(property.to_string(), vector.clone());
            }
        }
        Ok(embeddings.len())
    }

    async fn person_embeddings(&self, property: &str) -> Result<Vec<PersonEmbeddingRow>> {
        self.check_online()?;
        let persons = self.persons.lock().unwrap();
        Ok(persons
            .iter()
            .filter_map(|(email, person)| {
                let embedding = person.properties.get(property)?;
                let scholarships: Vec<String> = person
                    .relations
                    .iter()
                    .filter(|(t, _, _)| *t == RelationshipType::HasScholarship)
                    .map(|(_, name, _)| name.clone())
                    .collect();
                Some(PersonEmbeddingRow {
                    email: Some(email.clone()),
                    embedding: Some(embedding.clone()),
                    scholarship_count: scholarships.len(),
                    scholarships,
                })
            })
            .collect())
    }

    async fn embedding_for(&self, email: &str, property: &str) -> Result<Option<Vec<f32>>> {
        self.check_online()?;
        *self.embedding_reads.lock().unwrap() += 1;
        Ok(self
            .persons
            .lock()
            .unwrap()
            .get(email)
            .and_then(|p| p.properties.get(property).cloned()))
    }
}
