use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{unique_violation, RepositoryError};
use crate::models::booking::{
    Booking, BookingChanges, BookingDetails, BookingPage, BookingStats, NewBooking, PageInfo,
    PageRequest, PaymentStatus, Transition,
};
use crate::models::referral::Referral;
use crate::models::ticket::Ticket;
use crate::models::user::User;
use crate::utils::ids::{generate_booking_number, MAX_IDENTIFIER_ATTEMPTS};

const BOOKING_COLUMNS: &str = "b.id, b.booking_number, b.user_id, b.referral_id, b.ticket_id, \
    b.ticket_count, b.payment_method, b.payment_status, b.payment_link_id, b.payment_link_ids, \
    b.created_at, b.updated_at";

/// Resolves user, ticket and referral alongside each booking in one query.
const SELECT_DETAILS: &str = "SELECT b.id, b.booking_number, b.user_id, b.referral_id, \
    b.ticket_id, b.ticket_count, b.payment_method, b.payment_status, b.payment_link_id, \
    b.payment_link_ids, b.created_at, b.updated_at, \
    row_to_json(u) AS \"user\", \
    row_to_json(t) AS ticket, \
    CASE WHEN r.id IS NULL THEN NULL ELSE row_to_json(r) END AS referral \
    FROM bookings b \
    JOIN users u ON u.id = b.user_id \
    JOIN tickets t ON t.id = b.ticket_id \
    LEFT JOIN referrals r ON r.id = b.referral_id";

const BOOKING_NUMBER_CONSTRAINT: &str = "bookings_booking_number_key";

#[derive(FromRow)]
struct BookingRow {
    #[sqlx(flatten)]
    booking: Booking,
    user: Json<User>,
    ticket: Json<Ticket>,
    referral: Option<Json<Referral>>,
}

impl From<BookingRow> for BookingDetails {
    fn from(row: BookingRow) -> Self {
        BookingDetails::new(
            row.booking,
            row.user.0,
            row.ticket.0,
            row.referral.map(|r| r.0),
        )
    }
}

pub struct BookingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> BookingRepository<'a> {
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<BookingDetails>, RepositoryError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{SELECT_DETAILS} WHERE b.id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_by_number(
        &self,
        booking_number: &str,
    ) -> Result<Option<BookingDetails>, RepositoryError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_DETAILS} WHERE b.booking_number = $1"
        ))
        .bind(booking_number)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Finds the booking that any of `link_ids` was issued for, including
    /// links superseded by a newer one.
    pub async fn find_by_payment_link(
        &self,
        link_ids: &[String],
    ) -> Result<Option<BookingDetails>, RepositoryError> {
        if link_ids.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_DETAILS} WHERE b.payment_link_id = ANY($1) OR b.payment_link_ids && $1 \
             ORDER BY b.updated_at DESC LIMIT 1"
        ))
        .bind(link_ids.to_vec())
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_all(&self) -> Result<Vec<BookingDetails>, RepositoryError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_DETAILS} ORDER BY b.created_at DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<BookingDetails>, RepositoryError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_DETAILS} WHERE b.user_id = $1 ORDER BY b.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_paginated(&self, request: PageRequest) -> Result<BookingPage, RepositoryError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings")
            .fetch_one(self.pool)
            .await?;

        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_DETAILS} ORDER BY b.created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(request.page_size)
        .bind(request.offset())
        .fetch_all(self.pool)
        .await?;

        Ok(BookingPage {
            bookings: rows.into_iter().map(Into::into).collect(),
            pagination: PageInfo::new(request, total),
        })
    }

    pub async fn stats(&self) -> Result<BookingStats, RepositoryError> {
        let stats = sqlx::query_as::<_, BookingStats>(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE payment_status = 'success') AS paid, \
             COUNT(*) FILTER (WHERE payment_status = 'pending') AS pending, \
             COUNT(*) FILTER (WHERE payment_status = 'failed') AS failed \
             FROM bookings",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(stats)
    }

    /// Reserves tickets and inserts the booking in one transaction. A booking
    /// number collision rolls back and retries with a fresh number.
    pub async fn create(&self, new_booking: &NewBooking) -> Result<BookingDetails, RepositoryError> {
        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let booking_number = generate_booking_number();
            let mut tx = self.pool.begin().await?;

            reserve_tickets(&mut tx, new_booking.ticket_id, new_booking.ticket_count).await?;

            let result = sqlx::query_as::<_, (Uuid,)>(
                "INSERT INTO bookings (booking_number, user_id, referral_id, ticket_id, \
                 ticket_count, payment_method) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(&booking_number)
            .bind(new_booking.user_id)
            .bind(new_booking.referral_id)
            .bind(new_booking.ticket_id)
            .bind(new_booking.ticket_count)
            .bind(&new_booking.payment_method)
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok((id,)) => {
                    tx.commit().await?;
                    tracing::info!(
                        booking_id = %id,
                        booking_number = %booking_number,
                        ticket_id = new_booking.ticket_id,
                        ticket_count = new_booking.ticket_count,
                        "Booking created"
                    );
                    return self
                        .get_by_id(id)
                        .await?
                        .ok_or_else(|| RepositoryError::NotFound(format!("booking {id}")));
                }
                Err(e) if unique_violation(&e).as_deref() == Some(BOOKING_NUMBER_CONSTRAINT) => {
                    // Dropping the transaction rolls back the reservation.
                    tracing::debug!(attempt, booking_number = %booking_number, "Booking number collision, retrying");
                }
                Err(e) => return Err(RepositoryError::Database(e)),
            }
        }

        Err(RepositoryError::IdentifierExhausted("booking number"))
    }

    /// Applies changes to a pending booking, moving the availability delta.
    pub async fn update_pending(
        &self,
        id: Uuid,
        changes: &BookingChanges,
    ) -> Result<BookingDetails, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        if booking.payment_status != PaymentStatus::Pending {
            return Err(RepositoryError::Conflict(
                "only pending bookings can be modified".into(),
            ));
        }

        let delta = changes.ticket_count - booking.ticket_count;
        if delta > 0 {
            reserve_tickets(&mut tx, booking.ticket_id, delta).await?;
        } else if delta < 0 {
            release_tickets(&mut tx, booking.ticket_id, -delta).await?;
        }

        sqlx::query(
            "UPDATE bookings SET ticket_count = $2, payment_method = $3, referral_id = $4, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(changes.ticket_count)
        .bind(&changes.payment_method)
        .bind(changes.referral_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("booking {id}")))
    }

    /// Makes a freshly issued link current on a pending booking. Earlier
    /// links stay resolvable since the customer may still pay on them.
    pub async fn set_payment_link(&self, id: Uuid, link_id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE bookings SET payment_link_id = $2, \
             payment_link_ids = array_append(payment_link_ids, $2), updated_at = NOW() \
             WHERE id = $1 AND payment_status = 'pending'",
        )
        .bind(id)
        .bind(link_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(
                "payment links can only be created for pending bookings".into(),
            ));
        }
        Ok(())
    }

    /// Reconciles a provider-reported status under a row lock. Terminal
    /// statuses are never overwritten; a move to `failed` returns the
    /// reserved tickets.
    pub async fn apply_payment_status(
        &self,
        id: Uuid,
        incoming: PaymentStatus,
        provider_link_id: Option<&str>,
    ) -> Result<(Transition, BookingDetails), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        let transition = PaymentStatus::reconcile(booking.payment_status, incoming);

        match transition {
            Transition::Apply => {
                sqlx::query(
                    "UPDATE bookings SET payment_status = $2, \
                     payment_link_id = COALESCE($3, payment_link_id), \
                     payment_link_ids = CASE WHEN $3 IS NULL OR $3 = ANY(payment_link_ids) \
                         THEN payment_link_ids ELSE array_append(payment_link_ids, $3) END, \
                     updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(incoming)
                .bind(provider_link_id)
                .execute(&mut *tx)
                .await?;

                if incoming == PaymentStatus::Failed {
                    release_tickets(&mut tx, booking.ticket_id, booking.ticket_count).await?;
                }
                tracing::info!(
                    booking_number = %booking.booking_number,
                    from = %booking.payment_status,
                    to = %incoming,
                    "Payment status updated"
                );
            }
            Transition::Unchanged => {
                if let Some(link_id) = provider_link_id {
                    sqlx::query(
                        "UPDATE bookings SET payment_link_id = $2, \
                         payment_link_ids = CASE WHEN $2 = ANY(payment_link_ids) \
                             THEN payment_link_ids ELSE array_append(payment_link_ids, $2) END, \
                         updated_at = NOW() \
                         WHERE id = $1 AND payment_link_id IS DISTINCT FROM $2",
                    )
                    .bind(id)
                    .bind(link_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Transition::Conflict => {
                tracing::warn!(
                    booking_number = %booking.booking_number,
                    current = %booking.payment_status,
                    incoming = %incoming,
                    "Refusing conflicting payment status"
                );
            }
        }

        tx.commit().await?;

        let details = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("booking {id}")))?;
        Ok((transition, details))
    }

    /// Deletes a booking, returning its tickets unless they were already
    /// released by a failed payment.
    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, id).await?;
        if booking.payment_status != PaymentStatus::Failed {
            release_tickets(&mut tx, booking.ticket_id, booking.ticket_count).await?;
        }

        sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(booking_number = %booking.booking_number, "Booking deleted");
        Ok(())
    }
}

async fn lock_booking(conn: &mut PgConnection, id: Uuid) -> Result<Booking, RepositoryError> {
    sqlx::query_as::<_, Booking>(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings b WHERE b.id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RepositoryError::NotFound(format!("booking {id}")))
}

/// Decrements availability only if enough tickets remain.
async fn reserve_tickets(
    conn: &mut PgConnection,
    ticket_id: i64,
    count: i32,
) -> Result<(), RepositoryError> {
    let reserved = sqlx::query_as::<_, (i32,)>(
        "UPDATE tickets SET available_tickets = available_tickets - $2, updated_at = NOW() \
         WHERE id = $1 AND available_tickets >= $2 RETURNING available_tickets",
    )
    .bind(ticket_id)
    .bind(count)
    .fetch_optional(&mut *conn)
    .await?;

    if reserved.is_some() {
        return Ok(());
    }

    let available = sqlx::query_as::<_, (i32,)>("SELECT available_tickets FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_optional(&mut *conn)
        .await?;

    match available {
        Some((available,)) => Err(RepositoryError::InsufficientTickets {
            requested: count,
            available,
        }),
        None => Err(RepositoryError::NotFound(format!("ticket {ticket_id}"))),
    }
}

async fn release_tickets(
    conn: &mut PgConnection,
    ticket_id: i64,
    count: i32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE tickets SET available_tickets = LEAST(available_tickets + $2, total_tickets), \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(ticket_id)
    .bind(count)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
