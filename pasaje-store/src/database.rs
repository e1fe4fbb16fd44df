use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use serde_json::Value;

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rules stored in the `business_rules` table on top of the
    /// file/env configuration. Rows look like `{"value": ...}`.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> =
            sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
                .fetch_all(&self.pool)
                .await?;

        let mut rules = defaults;
        for (key, value) in rows {
            apply_rule(&mut rules, &key, &value);
        }
        Ok(rules)
    }
}

fn apply_rule(rules: &mut BusinessRules, key: &str, raw: &Value) {
    let Some(v) = raw.get("value") else {
        return;
    };

    match key {
        "seat_hold_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.seat_hold_seconds = u;
            }
        }
        "max_hold_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.max_hold_seconds = u;
            }
        }
        "itbms_rate" => {
            // Accept "0.07" or 0.07
            if let Some(s) = v.as_str() {
                rules.itbms_rate = s.to_string();
            } else if let Some(f) = v.as_f64() {
                rules.itbms_rate = f.to_string();
            }
        }
        "cancellation_cutoff_minutes" => {
            if let Some(i) = v.as_i64() {
                rules.cancellation_cutoff_minutes = i;
            }
        }
        "allow_passenger_refunds" => {
            if let Some(b) = v.as_bool() {
                rules.allow_passenger_refunds = b;
            }
        }
        "decline_releases_seat" => {
            if let Some(b) = v.as_bool() {
                rules.decline_releases_seat = b;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> BusinessRules {
        BusinessRules {
            seat_hold_seconds: 300,
            max_hold_seconds: 1800,
            itbms_rate: "0.07".to_string(),
            cancellation_cutoff_minutes: 60,
            allow_passenger_refunds: false,
            decline_releases_seat: false,
            settlement_lease_seconds: 30,
            sweep_interval_seconds: 15,
        }
    }

    #[test]
    fn test_rule_overrides() {
        let mut r = rules();
        apply_rule(&mut r, "seat_hold_seconds", &json!({"value": 600}));
        apply_rule(&mut r, "itbms_rate", &json!({"value": 0.1}));
        apply_rule(&mut r, "decline_releases_seat", &json!({"value": true}));
        apply_rule(&mut r, "unknown_rule", &json!({"value": 1}));
        apply_rule(&mut r, "cancellation_cutoff_minutes", &json!({"other": 5}));

        assert_eq!(r.seat_hold_seconds, 600);
        assert_eq!(r.itbms_rate, "0.1");
        assert!(r.decline_releases_seat);
        assert_eq!(r.cancellation_cutoff_minutes, 60);
    }
}
