use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use secrecy::Secret;
use serde::Deserialize;

use crate::services::slot_availability::OperatingWindow;

/// Which payment gateway implementation to wire into the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    MercadoPago,
    Simulated,
}

impl PaymentProvider {
    fn parse(value: &str) -> Result<Self, config::ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mercadopago" => Ok(Self::MercadoPago),
            "simulated" => Ok(Self::Simulated),
            other => Err(config::ConfigError::Message(format!(
                "unknown payment_provider '{}' (expected 'mercadopago' or 'simulated')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,

    // Security
    pub credential_secret: Secret<String>,

    // Business hours, in local business time
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub utc_offset_minutes: i32,
    pub reminder_lead_minutes: i64,

    // Payment gateway
    pub payment_provider: PaymentProvider,
    pub mercadopago_api_url: String,
    pub mercadopago_access_token: Option<Secret<String>>,

    // Messaging providers
    pub whatsapp_api_url: Option<String>,
    pub whatsapp_access_token: Option<Secret<String>>,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<Secret<String>>,
    pub email_from: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    /// Reads and validates settings from an already built source.
    pub fn from_source(config: &config::Config) -> Result<Self, config::ConfigError> {
        let opening_time = parse_clock(
            &config
                .get::<String>("opening_time")
                .unwrap_or_else(|_| "08:00".to_string()),
        )?;
        let closing_time = parse_clock(
            &config
                .get::<String>("closing_time")
                .unwrap_or_else(|_| "18:00".to_string()),
        )?;
        if closing_time <= opening_time {
            return Err(config::ConfigError::Message(
                "closing_time must be later than opening_time".to_string(),
            ));
        }

        let utc_offset_minutes: i32 = config.get("utc_offset_minutes").unwrap_or(-180);
        if FixedOffset::east_opt(utc_offset_minutes * 60).is_none() {
            return Err(config::ConfigError::Message(format!(
                "utc_offset_minutes out of range: {}",
                utc_offset_minutes
            )));
        }

        let payment_provider = PaymentProvider::parse(
            &config
                .get::<String>("payment_provider")
                .unwrap_or_else(|_| "simulated".to_string()),
        )?;

        let mercadopago_access_token = config
            .get::<String>("mercadopago_access_token")
            .ok()
            .map(Secret::new);
        if payment_provider == PaymentProvider::MercadoPago && mercadopago_access_token.is_none() {
            return Err(config::ConfigError::Message(
                "mercadopago_access_token is required when payment_provider=mercadopago"
                    .to_string(),
            ));
        }

        Ok(Self {
            database_url: config.get("database_url")?,
            base_url: config.get("base_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            credential_secret: Secret::new(config.get("credential_secret")?),

            opening_time,
            closing_time,
            utc_offset_minutes,
            reminder_lead_minutes: config.get("reminder_lead_minutes").unwrap_or(60),

            payment_provider,
            mercadopago_api_url: config
                .get("mercadopago_api_url")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            mercadopago_access_token,

            whatsapp_api_url: config.get("whatsapp_api_url").ok(),
            whatsapp_access_token: config
                .get::<String>("whatsapp_access_token")
                .ok()
                .map(Secret::new),
            email_api_url: config.get("email_api_url").ok(),
            email_api_key: config
                .get::<String>("email_api_key")
                .ok()
                .map(Secret::new),
            email_from: config.get("email_from").ok(),
        })
    }

    /// The configured bookable window for every location.
    pub fn operating_window(&self) -> OperatingWindow {
        OperatingWindow::new(self.opening_time, self.closing_time)
    }

    /// Fixed offset of local business time from UTC.
    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime, config::ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        config::ConfigError::Message(format!("invalid clock time '{}': {}", value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(
            parse_clock("07:30").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert!(parse_clock("7h30").is_err());
        assert!(parse_clock("25:00").is_err());
    }

    #[test]
    fn test_payment_provider_parse() {
        assert_eq!(
            PaymentProvider::parse("MercadoPago").unwrap(),
            PaymentProvider::MercadoPago
        );
        assert_eq!(
            PaymentProvider::parse(" simulated ").unwrap(),
            PaymentProvider::Simulated
        );
        assert!(PaymentProvider::parse("stripe").is_err());
    }

    fn source(overrides: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder()
            .set_override("database_url", "postgres://localhost/petwash")
            .unwrap()
            .set_override("base_url", "http://localhost:3000")
            .unwrap()
            .set_override("port", 3000)
            .unwrap()
            .set_override("credential_secret", "credential")
            .unwrap();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_minimal_settings_load_with_defaults() {
        let config = Config::from_source(&source(&[])).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.opening_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(config.closing_time, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        assert_eq!(config.utc_offset_minutes, -180);
        assert_eq!(config.reminder_lead_minutes, 60);
        assert_eq!(config.payment_provider, PaymentProvider::Simulated);
        assert!(config.whatsapp_api_url.is_none());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(Config::from_source(&source(&[("closing_time", "07:00")])).is_err());
        assert!(Config::from_source(&source(&[("utc_offset_minutes", "100000")])).is_err());
        assert!(Config::from_source(&source(&[("payment_provider", "mercadopago")])).is_err());
    }
}
