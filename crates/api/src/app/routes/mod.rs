use axum::{
    Router,
    routing::{get, post},
};

pub mod leader;
pub mod payments;
pub mod system;
pub mod vault;
pub mod webhooks;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route(
            "/trips/:trip_id/vault/entries",
            post(vault::create_entry).get(vault::list_entries),
        )
        .route("/trips/:trip_id/vault/summary", get(vault::trip_summary))
        .route(
            "/trips/:trip_id/vault/leader",
            get(leader::vault_leader).post(leader::transfer_leader),
        )
        .route("/trips/:trip_id/payments/history", get(payments::transaction_history))
        .route(
            "/vault/entries/:entry_id",
            get(vault::get_entry).delete(vault::delete_entry),
        )
        .route("/vault/splits/:split_id/paid", post(vault::mark_split_paid))
        .route("/payments/intents", post(payments::create_intent))
        .route("/payments/intents/:intent_id/confirm", post(payments::confirm_payment))
        .route("/payments/unpaid-splits", get(payments::unpaid_splits))
}

/// Parse a path segment into a typed id.
pub(crate) fn parse_id<T>(what: &str, raw: &str) -> Result<T, crate::app::errors::ApiError>
where
    T: std::str::FromStr,
{
    raw.parse().map_err(|_| crate::app::errors::bad_id(what, raw))
}
