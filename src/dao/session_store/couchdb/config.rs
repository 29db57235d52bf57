use std::env;

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";

/// Basic-auth pair sent with every request.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Where the session database lives and how to reach it.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub auth: Option<BasicAuth>,
}

impl CouchConfig {
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            auth: None,
        }
    }

    pub fn with_credentials(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth: Some(BasicAuth {
                username: username.into(),
                password: password.into(),
            }),
            ..self
        }
    }

    /// Read `COUCH_BASE_URL` and `COUCH_DB`; credentials are used only when
    /// both `COUCH_USERNAME` and `COUCH_PASSWORD` are set.
    pub fn from_env() -> CouchResult<Self> {
        let config = Self::new(required(BASE_URL_ENV)?, required(DATABASE_ENV)?);
        Ok(match (env::var(USERNAME_ENV), env::var(PASSWORD_ENV)) {
            (Ok(username), Ok(password)) => config.with_credentials(username, password),
            _ => config,
        })
    }
}

fn required(var: &'static str) -> CouchResult<String> {
    env::var(var).map_err(|_| CouchDaoError::MissingEnvVar { var })
}
