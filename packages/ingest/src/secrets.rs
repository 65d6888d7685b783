//! Credential resolution.
//!
//! Secrets arrive as raw strings. A string holding a JSON object is a
//! structured credential (database host, user, password, ...); anything
//! else is kept verbatim, which is how a bare API key is stored.

use airviz_database::db::DEFAULT_DATABASE_URL;
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::{Map, Value};

use crate::IngestError;

/// Default Postgres port when a credential omits it.
pub const DEFAULT_PORT: u16 = 5432;

/// A resolved secret value.
pub enum Secret {
    /// A JSON object.
    Structured(Map<String, Value>),
    /// Any other text, kept as-is.
    Plain(SecretString),
}

impl Secret {
    /// Interprets `raw` as a JSON object if possible, otherwise as plain text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::Structured(map),
            _ => Self::Plain(SecretString::from(raw.trim().to_string())),
        }
    }

    fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Structured(map) => map.get(name),
            Self::Plain(_) => None,
        }
    }

    fn string_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

/// Postgres credentials taken from a structured secret.
#[derive(Debug)]
pub struct DbCredentials {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub username: String,
    /// Login password.
    pub password: SecretString,
    /// Database name, if the secret carries one.
    pub dbname: Option<String>,
}

impl DbCredentials {
    /// Reads `host`, `port`, `username`, `password` and `dbname` from
    /// `secret`. `port` may be a number or a numeric string.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Secret`] if the secret is plain text or a
    /// required field is missing.
    pub fn from_secret(secret: &Secret) -> Result<Self, IngestError> {
        if matches!(secret, Secret::Plain(_)) {
            return Err(IngestError::Secret {
                message: "Expected the database secret to be a JSON object".to_string(),
            });
        }

        let required = |name: &str| {
            secret
                .string_field(name)
                .map(str::to_string)
                .ok_or_else(|| IngestError::Secret {
                    message: format!("Database secret is missing '{name}'"),
                })
        };

        let port = match secret.field("port") {
            None | Some(Value::Null) => DEFAULT_PORT,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| invalid_port(n))?,
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid_port(s))?,
            Some(other) => return Err(invalid_port(other)),
        };

        Ok(Self {
            host: required("host")?,
            port,
            username: required("username")?,
            password: SecretString::from(required("password")?),
            dbname: secret.string_field("dbname").map(str::to_string),
        })
    }

    /// Builds a `postgres://` URL. `db_name` overrides the secret's own
    /// database name; `postgres` is used when neither is set.
    #[must_use]
    pub fn database_url(&self, db_name: Option<&str>) -> SecretString {
        let db_name = db_name.or(self.dbname.as_deref()).unwrap_or("postgres");
        SecretString::from(format!(
            "postgres://{}:{}@{}:{}/{db_name}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port
        ))
    }
}

fn invalid_port(value: impl std::fmt::Display) -> IngestError {
    IngestError::Secret {
        message: format!("Invalid database port: {value}"),
    }
}

/// Extracts the API key from a secret: the whole text if plain, or the
/// `apiKey` field of a JSON object.
///
/// # Errors
///
/// Returns [`IngestError::Secret`] if the key is empty or absent.
pub fn api_key(secret: &Secret) -> Result<SecretString, IngestError> {
    let key = match secret {
        Secret::Plain(key) => Some(key.expose_secret()),
        Secret::Structured(_) => secret
            .string_field("apiKey")
            .or_else(|| secret.string_field("api_key")),
    };

    match key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(SecretString::from(key.to_string())),
        _ => Err(IngestError::Secret {
            message: "Air Quality API key is empty or missing".to_string(),
        }),
    }
}

/// Resolves the database URL from `DATABASE_URL`, or from the `DB_SECRET`
/// credential plus `DB_NAME`, falling back to [`DEFAULT_DATABASE_URL`].
///
/// # Errors
///
/// Returns [`IngestError::Secret`] if `DB_SECRET` is set but unusable.
pub fn database_url_from_env() -> Result<SecretString, IngestError> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(url));
    }

    if let Ok(raw) = std::env::var("DB_SECRET") {
        let credentials = DbCredentials::from_secret(&Secret::parse(&raw))?;
        let db_name = std::env::var("DB_NAME").ok();
        return Ok(credentials.database_url(db_name.as_deref()));
    }

    log::warn!("Neither DATABASE_URL nor DB_SECRET is set; using the local default");
    Ok(SecretString::from(DEFAULT_DATABASE_URL.to_string()))
}

/// Resolves the API key from `AIR_QUALITY_API_KEY`.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if the variable is unset, or
/// [`IngestError::Secret`] if it holds no usable key.
pub fn api_key_from_env() -> Result<SecretString, IngestError> {
    let raw = std::env::var("AIR_QUALITY_API_KEY").map_err(|_| IngestError::Config {
        message: "AIR_QUALITY_API_KEY is not set".to_string(),
    })?;
    api_key(&Secret::parse(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_is_structured_and_anything_else_is_plain() {
        assert!(matches!(
            Secret::parse(r#"{"host":"db"}"#),
            Secret::Structured(_)
        ));
        assert!(matches!(Secret::parse("AIzaSyTestKey"), Secret::Plain(_)));
        assert!(matches!(Secret::parse("\"quoted\""), Secret::Plain(_)));
        assert!(matches!(Secret::parse("[1, 2]"), Secret::Plain(_)));
    }

    #[test]
    fn builds_url_from_credentials_with_string_port() {
        let secret = Secret::parse(
            r#"{"host":"db.internal","port":"6543","username":"ingest","password":"pw"}"#,
        );
        let credentials = DbCredentials::from_secret(&secret).unwrap();

        assert_eq!(credentials.port, 6543);
        assert_eq!(
            credentials.database_url(Some("airviz")).expose_secret(),
            "postgres://ingest:pw@db.internal:6543/airviz"
        );
    }

    #[test]
    fn numeric_port_and_secret_dbname() {
        let secret = Secret::parse(
            r#"{"host":"h","port":5433,"username":"u","password":"p","dbname":"aq"}"#,
        );
        let credentials = DbCredentials::from_secret(&secret).unwrap();

        assert_eq!(
            credentials.database_url(None).expose_secret(),
            "postgres://u:p@h:5433/aq"
        );
    }

    #[test]
    fn plain_database_secret_is_rejected() {
        let result = DbCredentials::from_secret(&Secret::parse("not-json"));

        assert!(matches!(result, Err(IngestError::Secret { .. })));
    }

    #[test]
    fn missing_password_is_rejected() {
        let secret = Secret::parse(r#"{"host":"h","username":"u"}"#);

        let err = DbCredentials::from_secret(&secret).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn api_key_from_plain_or_structured_secret() {
        let plain = api_key(&Secret::parse("  AIzaSyTestKey \n")).unwrap();
        assert_eq!(plain.expose_secret(), "AIzaSyTestKey");

        let structured = api_key(&Secret::parse(r#"{"apiKey":"AIzaOther"}"#)).unwrap();
        assert_eq!(structured.expose_secret(), "AIzaOther");

        assert!(api_key(&Secret::parse(r#"{"other":"x"}"#)).is_err());
        assert!(api_key(&Secret::parse("   ")).is_err());
    }
}
