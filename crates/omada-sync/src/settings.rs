//! Process configuration.
//!
//! Read from a TOML file layered with `OMADA_`-prefixed environment
//! variables, nested with `__`, e.g. `OMADA_MO__CLIENT_SECRET`.

use std::path::{Path, PathBuf};

use omada_client::{MoConfig, OmadaConfig};
use omada_events::{Schedule, differ::DiffOptions};
use serde::Deserialize;

use crate::customer::CustomerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  pub omada:    OmadaConfig,
  pub mo:       MoConfig,
  pub events:   EventsConfig,
  pub customer: CustomerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
  /// The directory must exist; the file is created on the first cycle.
  pub snapshot_path:    PathBuf,
  #[serde(default = "default_channel_capacity")]
  pub channel_capacity: usize,
  #[serde(flatten)]
  pub schedule:         Schedule,
  #[serde(flatten)]
  pub diff:             DiffOptions,
}

fn default_channel_capacity() -> usize { 1024 }

impl Settings {
  /// Load from `path` (optional) and the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("OMADA")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()?
      .try_deserialize()
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  const TOML: &str = r#"
[omada]
url = "https://omada.example.dk/OData/DataObjects/Identity"

[mo]
url = "https://mo.example.dk"
token_url = "https://keycloak.example.dk/auth/realms/mo/protocol/openid-connect/token"
client_id = "omada"
client_secret = "hunter2"

[events]
snapshot_path = "/var/lib/omada/snapshot.json"
interval_secs = 600
ignored_fields = ["C_LASTLOGIN"]

[customer]
name = "silkeborg"
manual_identity_category = "560"
subject_key = "service_number"

[customer.addresses.email]
address_type = "EmailEmployee"

[customer.engagement]
engagement_type = "omada"
default_job_function = "not_applicable"
org_unit_it_system = "omada_org_unit"
"#;

  #[test]
  fn loads_toml_with_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(TOML.as_bytes()).unwrap();

    let settings = Settings::load(file.path()).unwrap();
    assert_eq!(settings.omada.timeout_secs, 30);
    assert_eq!(settings.mo.graphql_version, 22);
    assert_eq!(settings.events.schedule.interval_secs, 600);
    assert_eq!(settings.events.schedule.backoff_min_secs, 30);
    assert_eq!(settings.events.channel_capacity, 1024);
    assert!(settings.events.diff.ignored_fields.contains("C_LASTLOGIN"));
    assert_eq!(settings.customer.addresses.len(), 1);
  }
}
