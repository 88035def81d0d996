use nailnews_common::model::pricing::{Cents, PriceSchedule};
use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};
use time::Duration;

fn default_payment_api_base() -> String {
    "https://api.stripe.com".to_owned()
}

fn default_currency() -> String {
    "usd".to_owned()
}

fn default_price_urgent_cents() -> i64 {
    PriceSchedule::default().urgent_per_month.0
}

fn default_price_vip_cents() -> i64 {
    PriceSchedule::default().vip_per_month.0
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_media_base_url() -> String {
    "/files".to_owned()
}

/// Process configuration, read from the environment and an optional `.env`.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct Env {
    pub server_address: IpAddr,
    pub server_port: u16,
    pub database_url: String,
    #[serde(default)]
    pub worker_id: u8,
    #[serde(default)]
    pub process_id: u8,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    /// Prefix of the public URLs handed out for uploads.
    #[serde(default = "default_media_base_url")]
    pub media_base_url: String,
    #[serde(default = "default_payment_api_base")]
    pub payment_api_base: String,
    pub payment_secret_key: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_price_urgent_cents")]
    pub price_urgent_cents: i64,
    #[serde(default = "default_price_vip_cents")]
    pub price_vip_cents: i64,
    pub session_lifetime_days: Option<u16>,
}

impl Env {
    #[must_use]
    pub fn price_schedule(&self) -> PriceSchedule {
        PriceSchedule {
            urgent_per_month: Cents(self.price_urgent_cents),
            vip_per_month: Cents(self.price_vip_cents),
        }
    }

    /// `None` keeps sessions valid until they are rotated.
    #[must_use]
    pub fn session_lifetime(&self) -> Option<Duration> {
        self.session_lifetime_days
            .map(|days| Duration::days(i64::from(days)))
    }
}

#[cfg(test)]
mod tests {
    use super::Env;
    use nailnews_common::model::pricing::Cents;
    use time::Duration;

    fn env_from(pairs: &[(&str, &str)]) -> Result<Env, envy::Error> {
        envy::from_iter(
            pairs
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
        )
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let env = env_from(&[
            ("SERVER_ADDRESS", "127.0.0.1"),
            ("SERVER_PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/nailnews"),
            ("PAYMENT_SECRET_KEY", "sk_test_123"),
        ])
        .unwrap();

        assert_eq!(env.payment_api_base, "https://api.stripe.com");
        assert_eq!(env.currency, "usd");
        assert_eq!(env.price_schedule().urgent_per_month, Cents(1_000));
        assert_eq!(env.price_schedule().vip_per_month, Cents(2_500));
        assert_eq!(env.session_lifetime(), None);
        assert_eq!(env.worker_id, 0);
    }

    #[test]
    fn overrides_are_read() {
        let env = env_from(&[
            ("SERVER_ADDRESS", "0.0.0.0"),
            ("SERVER_PORT", "3000"),
            ("DATABASE_URL", "postgres://db/nailnews"),
            ("PAYMENT_SECRET_KEY", "sk_live"),
            ("PRICE_VIP_CENTS", "3000"),
            ("SESSION_LIFETIME_DAYS", "30"),
            ("WORKER_ID", "3"),
        ])
        .unwrap();

        assert_eq!(env.price_schedule().vip_per_month, Cents(3_000));
        assert_eq!(env.session_lifetime(), Some(Duration::days(30)));
        assert_eq!(env.worker_id, 3);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(env_from(&[("SERVER_ADDRESS", "0.0.0.0"), ("SERVER_PORT", "3000")]).is_err());
    }
}
