//! The (application, environments, datacenter, zone) fetch key.
//!
//! [`ConfigQuery`] is passed to every [`ConfigSource`](crate::sources::ConfigSource).
//! Environment order matters: later environments win on conflict, the
//! same rule that makes later sources win over earlier ones.

use std::fmt;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigQuery {
    app_name: String,
    envs: Vec<String>,
    datacenter: Option<String>,
    zone: Option<String>,
}

impl ConfigQuery {
    /// Build a query.
    ///
    /// The application name must be non-blank, environment names must be
    /// non-blank and unique. A blank datacenter or zone means absent.
    pub fn new<I, S>(
        app_name: impl Into<String>,
        envs: I,
        datacenter: Option<&str>,
        zone: Option<&str>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let app_name = app_name.into().trim().to_string();
        if app_name.is_empty() {
            return Err(ConfigError::InvalidQuery(
                "application name cannot be empty".into(),
            ));
        }

        let mut unique: Vec<String> = Vec::new();
        for env in envs {
            let env = env.into().trim().to_string();
            if env.is_empty() {
                return Err(ConfigError::InvalidQuery(
                    "environment names cannot be empty".into(),
                ));
            }
            if unique.contains(&env) {
                return Err(ConfigError::InvalidQuery(format!(
                    "environment '{env}' is listed more than once"
                )));
            }
            unique.push(env);
        }

        Ok(Self {
            app_name,
            envs: unique,
            datacenter: non_blank(datacenter),
            zone: non_blank(zone),
        })
    }

    /// Shorthand for a query with no environments, datacenter or zone.
    pub fn for_app(app_name: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(app_name, Vec::<String>::new(), None, None)
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn envs(&self) -> &[String] {
        &self.envs
    }

    #[must_use]
    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }

    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }
}

impl fmt::Display for ConfigQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app={}", self.app_name)?;
        if !self.envs.is_empty() {
            write!(f, " envs={}", self.envs.join(","))?;
        }
        if let Some(ref dc) = self.datacenter {
            write!(f, " dc={dc}")?;
        }
        if let Some(ref zone) = self.zone {
            write!(f, " zone={zone}")?;
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
