use sqlx::PgPool;

use super::RepositoryError;
use crate::models::ticket::{Ticket, TicketFields, UpdateTicketRequest};

const SELECT_TICKET: &str = "SELECT id, name, price, ticket_type, description, benefits, status, \
    total_tickets, available_tickets, offer_price_with_referral, \
    offer_price_with_referral_and_youtube, created_at, updated_at FROM tickets";

const RETURNING_TICKET: &str = "RETURNING id, name, price, ticket_type, description, benefits, \
    status, total_tickets, available_tickets, offer_price_with_referral, \
    offer_price_with_referral_and_youtube, created_at, updated_at";

pub struct TicketRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> TicketRepository<'a> {
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Ticket>, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!("{SELECT_TICKET} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(ticket)
    }

    pub async fn list(&self) -> Result<Vec<Ticket>, RepositoryError> {
        let tickets = sqlx::query_as::<_, Ticket>(&format!("{SELECT_TICKET} ORDER BY id"))
            .fetch_all(self.pool)
            .await?;
        Ok(tickets)
    }

    /// Callers validate `fields` first; the table constraints back that up.
    pub async fn create(&self, fields: &TicketFields) -> Result<Ticket, RepositoryError> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "INSERT INTO tickets (name, price, ticket_type, description, benefits, status, \
             total_tickets, available_tickets, offer_price_with_referral, \
             offer_price_with_referral_and_youtube) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) {RETURNING_TICKET}"
        ))
        .bind(&fields.name)
        .bind(fields.price)
        .bind(&fields.ticket_type)
        .bind(&fields.description)
        .bind(&fields.benefits)
        .bind(&fields.status)
        .bind(fields.total_tickets)
        .bind(fields.available_tickets)
        .bind(fields.offer_price_with_referral)
        .bind(fields.offer_price_with_referral_and_youtube)
        .fetch_one(self.pool)
        .await?;

        tracing::info!(ticket_id = ticket.id, name = %ticket.name, "Ticket created");
        Ok(ticket)
    }

    /// Applies a partial update to the locked row, so reservations made
    /// since the caller last read the ticket are never written over.
    /// `validate` sees the merged record before anything is stored.
    pub async fn update<E, F>(
        &self,
        id: i64,
        update: UpdateTicketRequest,
        validate: F,
    ) -> Result<Ticket, E>
    where
        F: FnOnce(&TicketFields) -> Result<(), E>,
        E: From<RepositoryError>,
    {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let current = sqlx::query_as::<_, Ticket>(&format!("{SELECT_TICKET} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?
            .ok_or_else(|| RepositoryError::NotFound(format!("ticket {id}")))?;

        let fields = current.fields().merge(update);
        validate(&fields)?;

        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "UPDATE tickets SET name = $2, price = $3, ticket_type = $4, description = $5, \
             benefits = $6, status = $7, total_tickets = $8, available_tickets = $9, \
             offer_price_with_referral = $10, offer_price_with_referral_and_youtube = $11, \
             updated_at = NOW() WHERE id = $1 {RETURNING_TICKET}"
        ))
        .bind(id)
        .bind(&fields.name)
        .bind(fields.price)
        .bind(&fields.ticket_type)
        .bind(&fields.description)
        .bind(&fields.benefits)
        .bind(&fields.status)
        .bind(fields.total_tickets)
        .bind(fields.available_tickets)
        .bind(fields.offer_price_with_referral)
        .bind(fields.offer_price_with_referral_and_youtube)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(ticket)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    if db_err.is_foreign_key_violation() {
                        return RepositoryError::Conflict(format!("ticket {id} still has bookings"));
                    }
                }
                RepositoryError::Database(e)
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("ticket {id}")));
        }
        Ok(())
    }
}
