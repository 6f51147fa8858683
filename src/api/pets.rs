use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{auth::get_authenticated_user, session::AppState};
use crate::db;
use crate::error::{AppError, Result};
use crate::models::pet::{CreatePetData, Pet, PetSize, UpdatePetData};

#[derive(Debug, Deserialize)]
pub struct PetRequest {
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub size: PetSize,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePetRequest {
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub size: Option<PetSize>,
    pub notes: Option<String>,
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn pet_not_found() -> AppError {
    AppError::NotFound("Pet not found".to_string())
}

async fn list_pets(State(state): State<AppState>, session: Session) -> Result<Json<Vec<Pet>>> {
    let auth = get_authenticated_user(&session).await?;

    let pets = Pet::list_by_user(&state.pool, auth.user_id).await?;

    Ok(Json(pets))
}

async fn create_pet(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<PetRequest>,
) -> Result<(StatusCode, Json<Pet>)> {
    let auth = get_authenticated_user(&session).await?;

    let pet = Pet::create(
        &state.pool,
        CreatePetData {
            user_id: auth.user_id,
            name: required("Name", &request.name)?,
            species: required("Species", &request.species)?,
            breed: request.breed,
            size: request.size,
            notes: request.notes,
        },
    )
    .await?;

    tracing::info!(pet_id = %pet.id, user_id = %auth.user_id, "Pet registered");

    Ok((StatusCode::CREATED, Json(pet)))
}

async fn get_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    session: Session,
) -> Result<Json<Pet>> {
    let auth = get_authenticated_user(&session).await?;

    let pet = Pet::find_for_user(&state.pool, pet_id, auth.user_id)
        .await?
        .ok_or_else(pet_not_found)?;

    Ok(Json(pet))
}

async fn update_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    session: Session,
    Json(request): Json<UpdatePetRequest>,
) -> Result<Json<Pet>> {
    let auth = get_authenticated_user(&session).await?;

    let data = UpdatePetData {
        name: request.name.as_deref().map(|n| required("Name", n)).transpose()?,
        species: request
            .species
            .as_deref()
            .map(|s| required("Species", s))
            .transpose()?,
        breed: request.breed,
        size: request.size,
        notes: request.notes,
    };

    let pet = Pet::update(&state.pool, pet_id, auth.user_id, data)
        .await?
        .ok_or_else(pet_not_found)?;

    Ok(Json(pet))
}

async fn delete_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<Uuid>,
    session: Session,
) -> Result<StatusCode> {
    let auth = get_authenticated_user(&session).await?;

    let deleted = Pet::delete(&state.pool, pet_id, auth.user_id)
        .await
        .map_err(|e| {
            if db::is_foreign_key_violation(&e) {
                AppError::Conflict("Pet has appointments and cannot be removed".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    if !deleted {
        return Err(pet_not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/pets", get(list_pets).post(create_pet))
        .route(
            "/api/pets/:id",
            get(get_pet).put(update_pet).delete(delete_pet),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_field() {
        assert_eq!(required("Name", "  Thor ").unwrap(), "Thor");
        assert!(matches!(
            required("Name", "   "),
            Err(AppError::Validation(msg)) if msg == "Name is required"
        ));
    }

    #[test]
    fn test_pet_request_parsing() {
        let request: PetRequest = serde_json::from_value(serde_json::json!({
            "name": "Thor",
            "species": "dog",
            "size": "large"
        }))
        .unwrap();

        assert_eq!(request.size, PetSize::Large);
        assert!(request.breed.is_none());
    }
}
