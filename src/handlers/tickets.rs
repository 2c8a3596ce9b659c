use axum::extract::State;
use axum::response::Response;

use crate::auth::{AdminUser, Authenticated};
use crate::db::TicketRepository;
use crate::models::ticket::{TicketFields, UpdateTicketRequest};
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::{ApiJson, ApiPath};
use crate::utils::response::{created, empty_success, success};

pub async fn list_tickets(State(state): State<AppState>) -> AppResult<Response> {
    let tickets = TicketRepository::new(state.pool()).list().await?;
    Ok(success(tickets, "Tickets retrieved successfully"))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    _identity: Authenticated,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Response> {
    let ticket = TicketRepository::new(state.pool())
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {id} not found")))?;
    Ok(success(ticket, "Ticket retrieved successfully"))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(fields): ApiJson<TicketFields>,
) -> AppResult<Response> {
    fields.validate_new()?;

    let ticket = TicketRepository::new(state.pool()).create(&fields).await?;
    tracing::info!(admin_id = admin.id, ticket_id = ticket.id, "Ticket created");

    Ok(created(ticket, "Ticket created successfully"))
}

/// Partial update: absent fields keep their stored value, and the merged
/// record is validated as a whole against the locked row.
pub async fn update_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(update): ApiJson<UpdateTicketRequest>,
) -> AppResult<Response> {
    let ticket = TicketRepository::new(state.pool())
        .update(id, update, TicketFields::validate_update)
        .await?;
    tracing::info!(admin_id = admin.id, ticket_id = id, "Ticket updated");

    Ok(success(ticket, "Ticket updated successfully"))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Response> {
    TicketRepository::new(state.pool()).delete(id).await?;
    tracing::info!(admin_id = admin.id, ticket_id = id, "Ticket deleted");

    Ok(empty_success("Ticket deleted successfully"))
}
