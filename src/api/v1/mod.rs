pub mod parcel;
pub mod payment;
pub mod rider;
pub mod user;

use axum::{routing, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;

pub async fn health() -> &'static str {
    "parcelhub server is running"
}

pub fn router(state: AppState) -> Router {
    let users = Router::new()
        .route("/", routing::post(user::login).get(user::index))
        .route("/role", routing::get(user::role))
        .route(
            "/profile",
            routing::get(user::profile).put(user::update_profile),
        )
        .route("/:email", routing::delete(user::delete));

    let parcels = Router::new()
        .route("/", routing::get(parcel::index).post(parcel::create))
        .route("/status-count", routing::get(parcel::status_count))
        .route(
            "/:id",
            routing::get(parcel::show)
                .put(parcel::update)
                .delete(parcel::delete),
        )
        .route("/:id/assign/:rider_email", routing::patch(parcel::assign))
        .route("/:id/status", routing::patch(parcel::advance));

    let riders = Router::new()
        .route("/", routing::get(rider::index))
        .route("/available", routing::get(rider::available))
        .route(
            "/applications",
            routing::post(rider::apply).get(rider::applications),
        )
        .route(
            "/applications/:email/:decision",
            routing::patch(rider::decide),
        )
        .route("/parcels", routing::get(rider::my_parcels))
        .route("/parcels/completed", routing::get(rider::completed_parcels))
        .route("/parcels/:id/cashout", routing::patch(rider::cashout))
        .route("/my-earnings", routing::get(rider::earnings));

    let payments = Router::new()
        .route("/", routing::post(payment::record).get(payment::index))
        .route("/create-intent", routing::post(payment::create_intent));

    Router::new()
        .route("/", routing::get(health))
        .nest("/users", users)
        .nest("/parcels", parcels)
        .nest("/riders", riders)
        .nest("/payments", payments)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
