use crate::server::{Result, ServerError, ServerRouter, ServerSettings, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::model::{
    ModelValidationError,
    pricing::{Cents, DiscountSchedule, PriceSchedule, Tier, TierSelection},
};
use nailnews_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_quote)
        .typed_get(get_schedule)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/pricing/quote", rejection(ServerError))]
struct QuotePath();

#[derive(Copy, Clone, Debug, Deserialize)]
struct QuoteQuery {
    tier: Tier,
    duration: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
struct Quote {
    selection: TierSelection,
    description: String,
    per_month: Cents,
    total: Cents,
}

fn quote(prices: &PriceSchedule, selection: TierSelection) -> Quote {
    Quote {
        selection,
        description: selection.describe(),
        per_month: selection
            .tier()
            .paid()
            .map_or(Cents::ZERO, |tier| prices.per_month(tier)),
        total: prices.compute_cost(selection),
    }
}

/// What checkout will charge. Stored discounts are not applied.
async fn get_quote(
    QuotePath(): QuotePath,
    Query(query): Query<QuoteQuery>,
    State(settings): State<Arc<ServerSettings>>,
) -> Result<Json<Quote>> {
    let selection =
        TierSelection::from_parts(query.tier, query.duration).map_err(ModelValidationError::from)?;

    Ok(Json(quote(&settings.prices, selection)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/pricing/schedule", rejection(ServerError))]
struct SchedulePath();

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct Schedule {
    prices: PriceSchedule,
    discounts: DiscountSchedule,
}

async fn get_schedule(
    SchedulePath(): SchedulePath,
    State(settings): State<Arc<ServerSettings>>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Schedule>> {
    let discounts = db.fetch_discount_schedule().await?;

    Ok(Json(Schedule {
        prices: settings.prices,
        discounts,
    }))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::{body_json, send};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };

    async fn get(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = send(Request::get(uri).body(Body::empty()).unwrap()).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    #[tokio::test]
    async fn vip_quote_uses_the_monthly_price() {
        let (status, body) = get("/pricing/quote?tier=vip&duration=3").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 7_500);
        assert_eq!(body["per_month"], 2_500);
        assert_eq!(body["selection"]["tier"], "vip");
        assert_eq!(body["selection"]["duration_months"], 3);
        assert_eq!(body["description"], "VIP listing, 3 months");
    }

    #[tokio::test]
    async fn free_quote_is_zero() {
        let (status, body) = get("/pricing/quote?tier=free").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        assert_eq!(body["selection"]["tier"], "free");
    }

    #[tokio::test]
    async fn unsupported_durations_are_rejected() {
        let (status, _) = get("/pricing/quote?tier=urgent&duration=4").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get("/pricing/quote?tier=urgent").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get("/pricing/quote?tier=gold&duration=3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
