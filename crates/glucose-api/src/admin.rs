//! Operational listing and registration of customers and devices, kept apart from the import
//! pipeline and the level queries.

use crate::responses::{internal_error, not_found, FieldErrors};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json,
};

pub(super) fn routes() -> axum::Router<crate::AppState> {
    axum::Router::new()
        .route("/customers", get(customers::list).post(customers::post))
        .route("/customers/{user_id}", delete(customers::delete))
        .route("/devices", get(devices::list))
        .route("/devices/{serial_number}", delete(devices::delete))
}

pub mod customers {
    use super::*;

    #[derive(serde::Serialize)]
    pub struct Customer {
        user_id: String,
        is_active: bool,
    }

    impl From<glucose_db::models::Customer> for Customer {
        fn from(
            glucose_db::models::Customer { user_id, is_active }: glucose_db::models::Customer,
        ) -> Self {
            Self { user_id, is_active }
        }
    }

    #[derive(Debug, serde::Deserialize)]
    pub struct NewCustomer {
        user_id: String,
    }

    pub async fn list(State(app_state): State<crate::AppState>) -> Response {
        match app_state.store.list_customers().await {
            Ok(customers) => Json(
                customers
                    .into_iter()
                    .map(Customer::from)
                    .collect::<Vec<_>>(),
            )
            .into_response(),
            Err(err) => internal_error(&err),
        }
    }

    pub async fn post(
        State(app_state): State<crate::AppState>,
        Json(NewCustomer { user_id }): Json<NewCustomer>,
    ) -> Response {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return FieldErrors::single("user_id", "This field may not be blank.").into_response();
        }
        match app_state.store.get_or_create_customer(user_id).await {
            Ok((customer, true)) => {
                (StatusCode::CREATED, Json(Customer::from(customer))).into_response()
            }
            Ok((customer, false)) => (StatusCode::OK, Json(Customer::from(customer))).into_response(),
            Err(err) => internal_error(&err),
        }
    }

    pub async fn delete(
        State(app_state): State<crate::AppState>,
        Path(user_id): Path<String>,
    ) -> Response {
        match app_state.store.delete_customer(&user_id).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(glucose_db::Error::NotFound) => not_found(),
            Err(err) => internal_error(&err),
        }
    }
}

pub mod devices {
    use super::*;

    #[derive(serde::Serialize)]
    pub struct Device {
        serial_number: String,
        device_name: String,
    }

    pub async fn list(State(app_state): State<crate::AppState>) -> Response {
        match app_state.store.list_devices().await {
            Ok(devices) => Json(
                devices
                    .into_iter()
                    .map(|device| Device {
                        serial_number: device.serial_number,
                        device_name: device.device_name,
                    })
                    .collect::<Vec<_>>(),
            )
            .into_response(),
            Err(err) => internal_error(&err),
        }
    }

    pub async fn delete(
        State(app_state): State<crate::AppState>,
        Path(serial_number): Path<String>,
    ) -> Response {
        match app_state.store.delete_device(&serial_number).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(glucose_db::Error::NotFound) => not_found(),
            Err(err) => internal_error(&err),
        }
    }
}
