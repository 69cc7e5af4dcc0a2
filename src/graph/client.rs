use async_trait::async_trait;
use neo4rs::{query, BoltMap, BoltString, BoltType, ConfigBuilder, Graph, Row};

use crate::config::{is_identifier, GraphConfig};
use crate::error::{PeermatchError, Result};
use crate::graph::{GraphStore, PersonEmbeddingRow, RelationshipRow, RelationshipType};

/// Neo4j-backed [`GraphStore`] over a pooled bolt connection.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
    write_batch_size: usize,
}

impl Neo4jStore {
    /// Connect to Neo4j with the given credentials and select the configured database.
    pub async fn connect(
        config: &GraphConfig,
        user: &str,
        password: &str,
        write_batch_size: usize,
    ) -> Result<Self> {
        let neo_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(user)
            .password(password)
            .db(config.database.as_str())
            .fetch_size(config.fetch_size)
            .max_connections(config.max_connections)
            .build()?;
        let graph = Graph::connect(neo_config).await?;
        log::info!("Connected to Neo4j at {} (database '{}')", config.uri, config.database);
        Ok(Self {
            graph,
            write_batch_size: write_batch_size.max(1),
        })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

fn checked_property(property: &str) -> Result<&str> {
    if is_identifier(property) {
        Ok(property)
    } else {
        Err(PeermatchError::InvalidInput(format!(
            "embedding property is not a plain identifier: {}",
            property
        )))
    }
}

/// Decode a numeric list regardless of whether Neo4j stored floats or integers.
fn decode_vector(row: &Row, key: &str) -> Option<Vec<f32>> {
    if let Ok(values) = row.get::<Vec<f64>>(key) {
        return Some(values.into_iter().map(|v| v as f32).collect());
    }
    row.get::<Vec<i64>>(key)
        .ok()
        .map(|values| values.into_iter().map(|v| v as f32).collect())
}

fn embedding_row(email: &str, vector: &[f32]) -> BoltType {
    let values: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
    BoltType::Map(BoltMap::from_iter(vec![
        (
            BoltString::from("email"),
            BoltType::String(BoltString::from(email)),
        ),
        (BoltString::from("embedding"), BoltType::from(values)),
    ]))
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn verify(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    async fn person_relationships(&self, types: &[RelationshipType]) -> Result<Vec<RelationshipRow>> {
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        let q = query(
            "MATCH (p:Person)-[r]->(t)
             WHERE type(r) IN $types AND p.email IS NOT NULL
             RETURN p.email AS email, type(r) AS rel_type, elementId(t) AS target_id, r.weight AS weight",
        )
        .param("types", type_names);

        let mut rows = Vec::new();
        let mut stream = self.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let email: String = row.get("email").unwrap_or_default();
            let rel_name: String = row.get("rel_type").unwrap_or_default();
            let target_id: String = row.get("target_id").unwrap_or_default();
            let weight: Option<f64> = row
                .get::<f64>("weight")
                .ok()
                .or_else(|| row.get::<i64>("weight").ok().map(|w| w as f64));

            let rel_type = match rel_name.parse::<RelationshipType>() {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("Skipping relationship of {}: {}", email, e);
                    continue;
                }
            };
            if email.is_empty() || target_id.is_empty() {
                log::warn!("Skipping {} relationship with missing endpoint", rel_type);
                continue;
            }
            rows.push(RelationshipRow {
                person_email: email,
                rel_type,
                target_id,
                weight,
            });
        }

        log::debug!("Read {} person relationships", rows.len());
        Ok(rows)
    }

    async fn write_embeddings(&self, property: &str, embeddings: &[(String, Vec<f32>)]) -> Result<usize> {
        let property = checked_property(property)?;
        let mut txn = self.graph.start_txn().await?;

        for batch in embeddings.chunks(self.write_batch_size) {
            let rows: Vec<BoltType> = batch
                .iter()
                .map(|(email, vector)| embedding_row(email, vector))
                .collect();
            let q = query(&format!(
                "UNWIND $rows AS row
                 MATCH (p:Person {{email: row.email}})
                 SET p.{property} = row.embedding"
            ))
            .param("rows", rows);
            txn.run(q).await?;
        }

        // Persons that were not embedded this run lose their previous vector
        let emails: Vec<String> = embeddings.iter().map(|(email, _)| email.clone()).collect();
        let clear = query(&format!(
            "MATCH (p:Person)
             WHERE p.{property} IS NOT NULL AND NOT p.email IN $emails
             REMOVE p.{property}"
        ))
        .param("emails", emails);
        txn.run(clear).await?;

        txn.commit().await?;
        log::info!("Wrote {} embeddings to property '{}'", embeddings.len(), property);
        Ok(embeddings.len())
    }

    async fn person_embeddings(&self, property: &str) -> Result<Vec<PersonEmbeddingRow>> {
        let property = checked_property(property)?;
        let q = query(&format!(
            "MATCH (p:Person)
             WHERE p.{property} IS NOT NULL
             OPTIONAL MATCH (p)-[:HAS_SCHOLARSHIP]->(s:Scholarship)
             WITH p, count(s) AS scholarship_count, collect(s.scholarship_name) AS scholarships
             RETURN p.email AS email, p.{property} AS embedding, scholarship_count, scholarships
             ORDER BY email"
        ));

        let mut rows = Vec::new();
        let mut stream = self.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let scholarship_count: i64 = row.get("scholarship_count").unwrap_or(0);
            rows.push(PersonEmbeddingRow {
                email: row.get::<String>("email").ok(),
                embedding: decode_vector(&row, "embedding"),
                scholarship_count: scholarship_count.max(0) as usize,
                scholarships: row.get::<Vec<String>>("scholarships").unwrap_or_default(),
            });
        }

        Ok(rows)
    }

    async fn embedding_for(&self, email: &str, property: &str) -> Result<Option<Vec<f32>>> {
        let property = checked_property(property)?;
        let q = query(&format!(
            "MATCH (p:Person {{email: $email}})
             RETURN p.{property} AS embedding
             LIMIT 1"
        ))
        .param("email", email);

        let mut stream = self.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(decode_vector(&row, "embedding").filter(|v| !v.is_empty()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_property_accepts_identifier() {
        assert_eq!(checked_property("node2vec_emb").unwrap(), "node2vec_emb");
    }

    #[test]
    fn test_checked_property_rejects_cypher() {
        let err = checked_property("x} DETACH DELETE p").unwrap_err();
        assert!(matches!(err, PeermatchError::InvalidInput(_)));
    }

    #[test]
    fn test_embedding_row_shape() {
        let row = embedding_row("a@x.com", &[0.5, -1.0]);
        match row {
            BoltType::Map(map) => {
                assert_eq!(map.value.len(), 2);
                assert!(map.value.contains_key(&BoltString::from("email")));
                assert!(map.value.contains_key(&BoltString::from("embedding")));
            }
            other => panic!("expected a map, got {:?}", other),
        }
    }
}
