use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PetSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub species: String, // "dog", "cat", ...
    pub breed: Option<String>,
    pub size: PetSize,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePetData {
    pub user_id: Uuid,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub size: PetSize,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePetData {
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub size: Option<PetSize>,
    pub notes: Option<String>,
}

impl Pet {
    pub async fn create(pool: &PgPool, data: CreatePetData) -> Result<Self, sqlx::Error> {
        let pet = sqlx::query_as::<_, Pet>(
            r#"
            INSERT INTO pets (user_id, name, species, breed, size, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(data.name)
        .bind(data.species)
        .bind(data.breed)
        .bind(data.size)
        .bind(data.notes)
        .fetch_one(pool)
        .await?;

        Ok(pet)
    }

    /// Finds a pet only if it belongs to the given user
    pub async fn find_for_user(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let pet = sqlx::query_as::<_, Pet>(
            r#"
            SELECT * FROM pets WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(pet)
    }

    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let pets = sqlx::query_as::<_, Pet>(
            r#"
            SELECT * FROM pets
            WHERE user_id = $1
            ORDER BY name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(pets)
    }

    /// Updates an owned pet. Returns `None` when the pet does not belong to the user.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        data: UpdatePetData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let pet = sqlx::query_as::<_, Pet>(
            r#"
            UPDATE pets
            SET
                name = COALESCE($3, name),
                species = COALESCE($4, species),
                breed = COALESCE($5, breed),
                size = COALESCE($6, size),
                notes = COALESCE($7, notes),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(data.name)
        .bind(data.species)
        .bind(data.breed)
        .bind(data.size)
        .bind(data.notes)
        .fetch_optional(pool)
        .await?;

        Ok(pet)
    }

    /// Deletes an owned pet. Returns whether a row was removed.
    pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM pets WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
