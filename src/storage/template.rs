//! User-defined output template persistence.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{from_ns, on_unique_violation, to_ns, Storage, StorageError};

/// A named rendering template stored in the database.
#[derive(Debug, Clone)]
pub struct OutputTemplate {
    pub name: String,
    pub content: String,
    pub create_date: DateTime<Utc>,
}

impl Storage {
    pub async fn insert_template(&self, name: &str, content: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO output_template (name, content, create_date) VALUES (?, ?, ?)")
            .bind(name)
            .bind(content)
            .bind(to_ns(&Utc::now()))
            .execute(self.pool())
            .await
            .map_err(|e| {
                on_unique_violation(e, StorageError::DuplicateTemplate(name.to_string()))
            })?;
        Ok(())
    }

    pub async fn get_template(&self, name: &str) -> Result<OutputTemplate, StorageError> {
        let row = sqlx::query("SELECT * FROM output_template WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StorageError::TemplateNotFound(name.to_string()))?;

        Ok(OutputTemplate {
            name: row.try_get("name")?,
            content: row.try_get("content")?,
            create_date: from_ns(row.try_get("create_date")?),
        })
    }

    pub async fn list_templates(&self) -> Result<Vec<OutputTemplate>, StorageError> {
        let rows = sqlx::query("SELECT * FROM output_template ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(OutputTemplate {
                    name: row.try_get("name")?,
                    content: row.try_get("content")?,
                    create_date: from_ns(row.try_get("create_date")?),
                })
            })
            .collect()
    }

    pub async fn update_template(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE output_template SET content = ? WHERE name = ?")
            .bind(content)
            .bind(name)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TemplateNotFound(name.to_string()));
        }
        Ok(())
    }

    pub async fn delete_template(&self, name: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM output_template WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TemplateNotFound(name.to_string()));
        }
        Ok(())
    }
}
