//! SQLite subject source for schedule triggers.
//!
//! Subjects (owners, pets, bookings) are mirrored into `enrollment_subjects`
//! by the surrounding application. A flow's trigger `audience` selects them:
//! `{"kind": "pet"}` narrows by subject kind, no audience means every subject
//! of the tenant.

use chrono::Utc;
use pawflow_core::flow::trigger::{EnrollmentSubject, SubjectSource};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::{FlowDefinition, TriggerDescriptor};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::rows::{format_datetime, from_json, query_err, to_json};

/// SQLite-backed implementation of `SubjectSource`.
pub struct SqliteSubjectSource {
    pool: DatabasePool,
}

impl SqliteSubjectSource {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a subject.
    pub async fn upsert_subject(
        &self,
        tenant_id: &Uuid,
        kind: &str,
        subject: &EnrollmentSubject,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO enrollment_subjects (tenant_id, kind, subject_id, attributes, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(tenant_id, kind, subject_id) DO UPDATE SET
                 attributes = excluded.attributes,
                 updated_at = excluded.updated_at"#,
        )
        .bind(tenant_id.to_string())
        .bind(kind)
        .bind(&subject.id)
        .bind(to_json(&subject.attributes, "subject attributes")?)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }
}

fn audience_kind(flow: &FlowDefinition) -> Option<&str> {
    match &flow.trigger {
        TriggerDescriptor::Schedule {
            audience: Some(audience),
            ..
        } => audience.get("kind").and_then(|k| k.as_str()),
        _ => None,
    }
}

impl SubjectSource for SqliteSubjectSource {
    async fn candidates(&self, flow: &FlowDefinition) -> Result<Vec<EnrollmentSubject>, RepositoryError> {
        let tenant = flow.tenant_id.to_string();
        let rows = match audience_kind(flow) {
            Some(kind) => {
                sqlx::query(
                    "SELECT subject_id, attributes FROM enrollment_subjects WHERE tenant_id = ? AND kind = ? ORDER BY subject_id",
                )
                .bind(&tenant)
                .bind(kind)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT subject_id, attributes FROM enrollment_subjects WHERE tenant_id = ? ORDER BY subject_id",
                )
                .bind(&tenant)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        let mut subjects = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("subject_id").map_err(query_err)?;
            let attributes: String = row.try_get("attributes").map_err(query_err)?;
            subjects.push(EnrollmentSubject::new(id, from_json(&attributes, "subject attributes")?));
        }
        Ok(subjects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use pawflow_types::flow::ScheduleSpec;
    use serde_json::{Value, json};

    fn flow(tenant_id: Uuid, audience: Option<Value>) -> FlowDefinition {
        FlowDefinition {
            id: Uuid::now_v7(),
            tenant_id,
            name: "birthday".to_string(),
            enabled: true,
            entry_step_id: None,
            steps: vec![],
            trigger: TriggerDescriptor::Schedule {
                schedule: ScheduleSpec::Daily { time: "08:00".into() },
                criteria: None,
                audience,
            },
            reenrollment: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_candidates_filter_by_tenant_and_kind() {
        let source = SqliteSubjectSource::new(test_pool().await);
        let tenant = Uuid::now_v7();

        source
            .upsert_subject(&tenant, "pet", &EnrollmentSubject::new("rex", json!({ "species": "dog" })))
            .await
            .unwrap();
        source
            .upsert_subject(&tenant, "owner", &EnrollmentSubject::new("ann", json!({ "email": "ann@example.com" })))
            .await
            .unwrap();
        source
            .upsert_subject(&Uuid::now_v7(), "pet", &EnrollmentSubject::new("tom", json!({})))
            .await
            .unwrap();

        let pets = source.candidates(&flow(tenant, Some(json!({ "kind": "pet" })))).await.unwrap();
        assert_eq!(pets, vec![EnrollmentSubject::new("rex", json!({ "species": "dog" }))]);

        let all = source.candidates(&flow(tenant, None)).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ann", "rex"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_attributes() {
        let source = SqliteSubjectSource::new(test_pool().await);
        let tenant = Uuid::now_v7();
        let audience = Some(json!({ "kind": "pet" }));

        source
            .upsert_subject(&tenant, "pet", &EnrollmentSubject::new("rex", json!({ "age": 3 })))
            .await
            .unwrap();
        source
            .upsert_subject(&tenant, "pet", &EnrollmentSubject::new("rex", json!({ "age": 4 })))
            .await
            .unwrap();

        let pets = source.candidates(&flow(tenant, audience)).await.unwrap();
        assert_eq!(pets.len(), 1);
        assert_eq!(pets[0].attributes["age"], 4);
    }
}
