//! GraphQL client for MO.
//!
//! Only the handful of queries and mutations the reconciler needs are
//! written out here. Authentication is OAuth2 client credentials; the token is
//! cached until shortly before it expires.

use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use omada_core::{
  api::{OrgUnitRef, SubjectKey, SubjectState, TargetApi},
  record::{
    Address, ComparableAddress, ComparableEmployee, ComparableEngagement,
    ComparableItUser, Employee, Engagement, EntityKind, ItUser,
  },
  validity::Validity,
};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Error, Result};

/// Connection settings for MO.
#[derive(Debug, Clone, Deserialize)]
pub struct MoConfig {
  /// Base URL, e.g. `https://mo.example.dk`.
  pub url:             String,
  #[serde(default = "default_graphql_version")]
  pub graphql_version: u32,
  /// Keycloak token endpoint. Requests are sent unauthenticated without it.
  pub token_url:       Option<String>,
  #[serde(default)]
  pub client_id:       String,
  #[serde(default)]
  pub client_secret:   String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:    u64,
}

fn default_graphql_version() -> u32 { 22 }
fn default_timeout_secs() -> u64 { 60 }

struct CachedToken {
  value:   String,
  expires: Instant,
}

pub struct MoClient {
  client: Client,
  config: MoConfig,
  token:  Mutex<Option<CachedToken>>,
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GraphqlResponse<T> {
  data:   Option<T>,
  #[serde(default)]
  errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
  message: String,
}

#[derive(Deserialize)]
struct Page<T> {
  objects: Vec<T>,
}

#[derive(Deserialize)]
struct Current<T> {
  current: Option<T>,
}

#[derive(Deserialize)]
struct Validities<T> {
  validities: Vec<T>,
}

#[derive(Deserialize)]
struct Uuids {
  uuid: Uuid,
}

#[derive(Deserialize)]
struct Keyed {
  uuid:     Uuid,
  user_key: String,
}

#[derive(Deserialize, Clone, Copy)]
struct WireValidity {
  from: DateTime<FixedOffset>,
  to:   Option<DateTime<FixedOffset>>,
}

impl From<WireValidity> for Validity {
  fn from(v: WireValidity) -> Self { Validity::new(v.from, v.to) }
}

#[derive(Deserialize)]
struct WireEmployee {
  uuid:                Uuid,
  cpr_number:          Option<String>,
  given_name:          String,
  surname:             String,
  nickname_given_name: Option<String>,
  nickname_surname:    Option<String>,
}

#[derive(Deserialize)]
struct WireEngagement {
  uuid:                 Uuid,
  user_key:             String,
  org_unit_uuid:        Uuid,
  employee_uuid:        Uuid,
  job_function_uuid:    Uuid,
  engagement_type_uuid: Uuid,
  primary_uuid:         Option<Uuid>,
  validity:             WireValidity,
}

#[derive(Deserialize)]
struct WireAddress {
  uuid:              Uuid,
  user_key:          String,
  value:             String,
  address_type_uuid: Uuid,
  employee_uuid:     Uuid,
  visibility_uuid:   Option<Uuid>,
  engagement_uuid:   Option<Uuid>,
  ituser_uuid:       Option<Uuid>,
  validity:          WireValidity,
}

#[derive(Deserialize)]
struct WireItUser {
  uuid:            Uuid,
  external_id:     Option<String>,
  user_key:        Option<String>,
  itsystem_uuid:   Uuid,
  employee_uuid:   Uuid,
  engagement_uuid: Option<Uuid>,
  validity:        WireValidity,
}

// ─── Documents ───────────────────────────────────────────────────────────────

const CLASSES: &str = r#"
query Classes($facet: String!) {
  classes(filter: { facet: { user_keys: [$facet] } }) {
    objects { current { uuid user_key } }
  }
}"#;

const IT_SYSTEMS: &str = r#"
query ItSystems {
  itsystems { objects { current { uuid user_key } } }
}"#;

const ORG_UNIT_BY_IT_USER: &str = r#"
query OrgUnitByItUser($it_system: String!, $user_key: String!) {
  itusers(filter: {
    itsystem: { user_keys: [$it_system] }
    user_keys: [$user_key]
  }) {
    objects { current { org_unit_uuid } }
  }
}"#;

const ORG_UNIT_BY_UUID: &str = r#"
query OrgUnitByUuid($uuid: UUID!) {
  org_units(filter: { uuids: [$uuid], from_date: null, to_date: null }) {
    objects { uuid }
  }
}"#;

const ORG_UNIT_BY_USER_KEY: &str = r#"
query OrgUnitByUserKey($user_key: String!) {
  org_units(filter: { user_keys: [$user_key] }) { objects { uuid } }
}"#;

const ORG_UNIT_VALIDITY: &str = r#"
query OrgUnitValidity($uuid: UUID!) {
  org_units(filter: { uuids: [$uuid], from_date: null, to_date: null }) {
    objects { validities { validity { from to } } }
  }
}"#;

const EMPLOYEE_BY_CPR: &str = r#"
query EmployeeByCpr($cpr: CPR!) {
  employees(filter: { cpr_numbers: [$cpr] }) { objects { uuid } }
}"#;

const EMPLOYEE_BY_ENGAGEMENT_KEY: &str = r#"
query EmployeeByEngagementKey($user_key: String!) {
  engagements(filter: { user_keys: [$user_key] }) {
    objects { current { employee_uuid } }
  }
}"#;

const EMPLOYEE: &str = r#"
query Employee($uuid: UUID!) {
  employees(filter: { uuids: [$uuid] }) {
    objects {
      current {
        uuid cpr_number given_name surname
        nickname_given_name nickname_surname
      }
    }
  }
}"#;

const SUBJECT_STATE: &str = r#"
query SubjectState($person: UUID!, $today: DateTime!) {
  engagements(filter: {
    employee: { uuids: [$person] }, from_date: $today, to_date: null
  }) {
    objects {
      validities {
        uuid user_key org_unit_uuid employee_uuid job_function_uuid
        engagement_type_uuid primary_uuid validity { from to }
      }
    }
  }
  addresses(filter: {
    employee: { uuids: [$person] }, from_date: $today, to_date: null
  }) {
    objects {
      validities {
        uuid user_key value address_type_uuid employee_uuid visibility_uuid
        engagement_uuid ituser_uuid validity { from to }
      }
    }
  }
  itusers(filter: {
    employee: { uuids: [$person] }, from_date: $today, to_date: null
  }) {
    objects {
      validities {
        uuid external_id user_key itsystem_uuid employee_uuid engagement_uuid
        validity { from to }
      }
    }
  }
}"#;

// ─── Client ──────────────────────────────────────────────────────────────────

impl MoClient {
  pub fn new(config: MoConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      config,
      token: Mutex::new(None),
    })
  }

  fn graphql_url(&self) -> String {
    format!(
      "{}/graphql/v{}",
      self.config.url.trim_end_matches('/'),
      self.config.graphql_version
    )
  }

  async fn bearer(&self) -> Result<Option<String>> {
    let Some(token_url) = &self.config.token_url else {
      return Ok(None);
    };
    let mut cached = self.token.lock().await;
    if let Some(token) = cached.as_ref().filter(|t| t.expires > Instant::now()) {
      return Ok(Some(token.value.clone()));
    }

    #[derive(Deserialize)]
    struct TokenResponse {
      access_token: String,
      expires_in:   u64,
    }

    let resp = self
      .client
      .post(token_url)
      .form(&[
        ("grant_type", "client_credentials"),
        ("client_id", self.config.client_id.as_str()),
        ("client_secret", self.config.client_secret.as_str()),
      ])
      .send()
      .await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "POST",
        url:    token_url.clone(),
        status: resp.status(),
      });
    }
    let token: TokenResponse = resp.json().await?;
    // Refresh a little early so a token never expires mid-request.
    let lifetime = Duration::from_secs(token.expires_in.saturating_sub(30));
    *cached = Some(CachedToken {
      value:   token.access_token.clone(),
      expires: Instant::now() + lifetime,
    });
    Ok(Some(token.access_token))
  }

  async fn execute<T: DeserializeOwned>(
    &self,
    document: &str,
    variables: Value,
  ) -> Result<T> {
    let url = self.graphql_url();
    let mut req = self
      .client
      .post(&url)
      .json(&json!({ "query": document, "variables": variables }));
    if let Some(token) = self.bearer().await? {
      req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "POST",
        url,
        status: resp.status(),
      });
    }
    let body: GraphqlResponse<T> = resp.json().await?;
    if !body.errors.is_empty() {
      return Err(Error::Graphql(
        body.errors.into_iter().map(|e| e.message).collect(),
      ));
    }
    body
      .data
      .ok_or_else(|| Error::Decode("response has neither data nor errors".into()))
  }

  async fn keyed(
    &self,
    document: &str,
    root: &str,
    variables: Value,
  ) -> Result<HashMap<String, Uuid>> {
    let mut data: HashMap<String, Page<Current<Keyed>>> =
      self.execute(document, variables).await?;
    let page = data
      .remove(root)
      .ok_or_else(|| Error::Decode(format!("missing {root}")))?;
    Ok(
      page
        .objects
        .into_iter()
        .filter_map(|o| o.current)
        .map(|k| (k.user_key, k.uuid))
        .collect(),
    )
  }

  async fn first_uuid(
    &self,
    document: &str,
    variables: Value,
  ) -> Result<Option<Uuid>> {
    #[derive(Deserialize)]
    struct Data {
      org_units: Page<Uuids>,
    }
    let data: Data = self.execute(document, variables).await?;
    Ok(data.org_units.objects.first().map(|o| o.uuid))
  }

  async fn create(
    &self,
    mutation: &str,
    input_type: &str,
    inputs: Vec<Value>,
  ) -> Result<Vec<Uuid>> {
    if inputs.is_empty() {
      return Ok(Vec::new());
    }
    let document = format!(
      "mutation Create($input: [{input_type}!]!) {{ {mutation}(input: $input) {{ uuid }} }}"
    );
    let mut data: HashMap<String, Vec<Uuids>> =
      self.execute(&document, json!({ "input": inputs })).await?;
    let created = data
      .remove(mutation)
      .ok_or_else(|| Error::Decode(format!("missing {mutation}")))?;
    Ok(created.into_iter().map(|o| o.uuid).collect())
  }
}

fn today() -> NaiveDate { Local::now().date_naive() }

fn validity_input(v: &Validity) -> Value {
  json!({ "from": v.from, "to": v.to })
}

/// The validity in effect today, or the next one to start.
fn current_or_next<T>(
  mut validities: Vec<T>,
  validity: impl Fn(&T) -> Validity,
) -> Option<T> {
  let today = today();
  validities.sort_by_key(|v| validity(v).from);
  validities
    .into_iter()
    .find(|v| validity(v).is_current_or_future(today))
}

fn mutation_prefix(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Employee => "employee",
    EntityKind::Engagement => "engagement",
    EntityKind::Address => "address",
    EntityKind::ItUser => "ituser",
  }
}

impl TargetApi for MoClient {
  type Error = Error;

  async fn classes(&self, facet: &str) -> Result<HashMap<String, Uuid>> {
    self.keyed(CLASSES, "classes", json!({ "facet": facet })).await
  }

  async fn it_systems(&self) -> Result<HashMap<String, Uuid>> {
    self.keyed(IT_SYSTEMS, "itsystems", json!({})).await
  }

  async fn resolve_org_unit(&self, by: OrgUnitRef) -> Result<Option<Uuid>> {
    match by {
      OrgUnitRef::ItUserKey { it_system, user_key } => {
        #[derive(Deserialize)]
        struct OrgUnitUuid {
          org_unit_uuid: Option<Uuid>,
        }
        #[derive(Deserialize)]
        struct Data {
          itusers: Page<Current<OrgUnitUuid>>,
        }
        let data: Data = self
          .execute(
            ORG_UNIT_BY_IT_USER,
            json!({ "it_system": it_system, "user_key": user_key }),
          )
          .await?;
        Ok(
          data
            .itusers
            .objects
            .into_iter()
            .filter_map(|o| o.current.and_then(|c| c.org_unit_uuid))
            .next(),
        )
      }
      OrgUnitRef::Uuid(uuid) => {
        self.first_uuid(ORG_UNIT_BY_UUID, json!({ "uuid": uuid })).await
      }
      OrgUnitRef::UserKey(user_key) => {
        self
          .first_uuid(ORG_UNIT_BY_USER_KEY, json!({ "user_key": user_key }))
          .await
      }
    }
  }

  async fn org_unit_validity(&self, uuid: Uuid) -> Result<Validity> {
    #[derive(Deserialize)]
    struct Span {
      validity: WireValidity,
    }
    #[derive(Deserialize)]
    struct Data {
      org_units: Page<Validities<Span>>,
    }
    let data: Data =
      self.execute(ORG_UNIT_VALIDITY, json!({ "uuid": uuid })).await?;
    let spans: Vec<Validity> = data
      .org_units
      .objects
      .into_iter()
      .flat_map(|o| o.validities)
      .map(|s| s.validity.into())
      .collect();
    Validity::union(&spans)
      .ok_or_else(|| Error::Decode(format!("org unit {uuid} has no validities")))
  }

  async fn resolve_subject(&self, key: SubjectKey) -> Result<Vec<Uuid>> {
    let mut uuids = match key {
      SubjectKey::Cpr(cpr) => {
        #[derive(Deserialize)]
        struct Data {
          employees: Page<Uuids>,
        }
        let data: Data =
          self.execute(EMPLOYEE_BY_CPR, json!({ "cpr": cpr })).await?;
        data.employees.objects.into_iter().map(|o| o.uuid).collect()
      }
      SubjectKey::ServiceNumber(number) => {
        #[derive(Deserialize)]
        struct EmployeeUuid {
          employee_uuid: Uuid,
        }
        #[derive(Deserialize)]
        struct Data {
          engagements: Page<Current<EmployeeUuid>>,
        }
        let data: Data = self
          .execute(EMPLOYEE_BY_ENGAGEMENT_KEY, json!({ "user_key": number }))
          .await?;
        data
          .engagements
          .objects
          .into_iter()
          .filter_map(|o| o.current.map(|c| c.employee_uuid))
          .collect::<Vec<_>>()
      }
    };
    uuids.sort();
    uuids.dedup();
    Ok(uuids)
  }

  async fn employee(&self, uuid: Uuid) -> Result<Option<Employee>> {
    #[derive(Deserialize)]
    struct Data {
      employees: Page<Current<WireEmployee>>,
    }
    let data: Data = self.execute(EMPLOYEE, json!({ "uuid": uuid })).await?;
    Ok(
      data
        .employees
        .objects
        .into_iter()
        .find_map(|o| o.current)
        .map(|e| Employee {
          uuid:                e.uuid,
          cpr_number:          e.cpr_number.unwrap_or_default(),
          given_name:          e.given_name,
          surname:             e.surname,
          nickname_given_name: e.nickname_given_name,
          nickname_surname:    e.nickname_surname,
        }),
    )
  }

  async fn subject_state(&self, person: Uuid) -> Result<SubjectState> {
    #[derive(Deserialize)]
    struct Data {
      engagements: Page<Validities<WireEngagement>>,
      addresses:   Page<Validities<WireAddress>>,
      itusers:     Page<Validities<WireItUser>>,
    }
    let data: Data = self
      .execute(
        SUBJECT_STATE,
        json!({ "person": person, "today": today() }),
      )
      .await?;

    let engagements = data
      .engagements
      .objects
      .into_iter()
      .filter_map(|o| current_or_next(o.validities, |e| e.validity.into()))
      .map(|e| Engagement {
        uuid:            e.uuid,
        user_key:        e.user_key,
        org_unit:        e.org_unit_uuid,
        person:          e.employee_uuid,
        job_function:    e.job_function_uuid,
        engagement_type: e.engagement_type_uuid,
        primary:         e.primary_uuid,
        validity:        e.validity.into(),
      })
      .collect();
    let addresses = data
      .addresses
      .objects
      .into_iter()
      .filter_map(|o| current_or_next(o.validities, |a| a.validity.into()))
      .map(|a| Address {
        uuid:         a.uuid,
        user_key:     a.user_key,
        value:        a.value,
        address_type: a.address_type_uuid,
        person:       a.employee_uuid,
        visibility:   a.visibility_uuid,
        engagement:   a.engagement_uuid,
        ituser:       a.ituser_uuid,
        validity:     a.validity.into(),
      })
      .collect();
    let it_users = data
      .itusers
      .objects
      .into_iter()
      .filter_map(|o| current_or_next(o.validities, |i| i.validity.into()))
      .map(|i| ItUser {
        uuid:        i.uuid,
        external_id: i.external_id,
        user_key:    i.user_key,
        itsystem:    i.itsystem_uuid,
        person:      i.employee_uuid,
        engagement:  i.engagement_uuid,
        validity:    i.validity.into(),
      })
      .collect();

    Ok(SubjectState { engagements, addresses, it_users })
  }

  async fn create_employee(&self, employee: ComparableEmployee) -> Result<Uuid> {
    #[derive(Deserialize)]
    struct Data {
      employee_create: Uuids,
    }
    let data: Data = self
      .execute(
        "mutation CreateEmployee($input: EmployeeCreateInput!) { \
         employee_create(input: $input) { uuid } }",
        json!({ "input": {
          "cpr_number": employee.cpr_number,
          "given_name": employee.given_name,
          "surname": employee.surname,
          "nickname_given_name": employee.nickname_given_name,
          "nickname_surname": employee.nickname_surname,
        }}),
      )
      .await?;
    Ok(data.employee_create.uuid)
  }

  async fn update_employee(
    &self,
    uuid: Uuid,
    employee: ComparableEmployee,
  ) -> Result<()> {
    let _: Value = self
      .execute(
        "mutation UpdateEmployee($input: EmployeeUpdateInput!) { \
         employee_update(input: $input) { uuid } }",
        json!({ "input": {
          "uuid": uuid,
          "validity": { "from": today() },
          "cpr_number": employee.cpr_number,
          "given_name": employee.given_name,
          "surname": employee.surname,
          "nickname_given_name": employee.nickname_given_name,
          "nickname_surname": employee.nickname_surname,
        }}),
      )
      .await?;
    Ok(())
  }

  async fn create_engagements(
    &self,
    engagements: Vec<ComparableEngagement>,
  ) -> Result<Vec<Uuid>> {
    let inputs = engagements
      .iter()
      .map(|e| {
        json!({
          "user_key": e.user_key,
          "org_unit": e.org_unit,
          "person": e.person,
          "job_function": e.job_function,
          "engagement_type": e.engagement_type,
          "primary": e.primary,
          "validity": validity_input(&e.validity),
        })
      })
      .collect();
    self
      .create("engagements_create", "EngagementCreateInput", inputs)
      .await
  }

  async fn create_addresses(
    &self,
    addresses: Vec<ComparableAddress>,
  ) -> Result<Vec<Uuid>> {
    let inputs = addresses
      .iter()
      .map(|a| {
        json!({
          "value": a.value,
          "address_type": a.address_type,
          "person": a.person,
          "visibility": a.visibility,
          "engagement": a.engagement,
          "ituser": a.ituser,
          "validity": validity_input(&a.validity),
        })
      })
      .collect();
    self
      .create("addresses_create", "AddressCreateInput", inputs)
      .await
  }

  async fn create_it_users(
    &self,
    it_users: Vec<ComparableItUser>,
  ) -> Result<Vec<Uuid>> {
    let inputs = it_users
      .iter()
      .map(|i| {
        json!({
          "external_id": i.external_id,
          "user_key": i.user_key,
          "itsystem": i.itsystem,
          "person": i.person,
          "engagement": i.engagement,
          "validity": validity_input(&i.validity),
        })
      })
      .collect();
    self.create("itusers_create", "ITUserCreateInput", inputs).await
  }

  async fn terminate(&self, kind: EntityKind, uuid: Uuid) -> Result<()> {
    let prefix = mutation_prefix(kind);
    let input_type = match kind {
      EntityKind::ItUser => "ITUserTerminateInput".to_owned(),
      _ => format!("{}TerminateInput", capitalize(prefix)),
    };
    // MO end dates are inclusive; ending yesterday removes the object from
    // today's state.
    let to = today().pred_opt().unwrap_or_else(today);
    let document = format!(
      "mutation Terminate($input: {input_type}!) {{ \
       {prefix}_terminate(input: $input) {{ uuid }} }}"
    );
    let _: Value = self
      .execute(&document, json!({ "input": { "uuid": uuid, "to": to } }))
      .await?;
    Ok(())
  }

  async fn delete(&self, kind: EntityKind, uuid: Uuid) -> Result<()> {
    let prefix = mutation_prefix(kind);
    let document = format!(
      "mutation Delete($uuid: UUID!) {{ {prefix}_delete(uuid: $uuid) {{ uuid }} }}"
    );
    let _: Value = self.execute(&document, json!({ "uuid": uuid })).await?;
    Ok(())
  }
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn graphql_url_is_versioned() {
    let client = MoClient::new(MoConfig {
      url:             "https://mo.example.dk/".into(),
      graphql_version: 22,
      token_url:       None,
      client_id:       String::new(),
      client_secret:   String::new(),
      timeout_secs:    5,
    })
    .unwrap();
    assert_eq!(client.graphql_url(), "https://mo.example.dk/graphql/v22");
  }

  #[test]
  fn wire_validity_is_truncated_to_local_date() {
    let wire: WireValidity = serde_json::from_value(json!({
      "from": "2024-01-01T00:00:00+01:00",
      "to": null,
    }))
    .unwrap();
    let validity: Validity = wire.into();
    assert_eq!(validity.from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert!(validity.is_open());
  }

  #[test]
  fn graphql_errors_are_collected() {
    let body: GraphqlResponse<Value> = serde_json::from_value(json!({
      "data": null,
      "errors": [{ "message": "boom" }, { "message": "bang" }],
    }))
    .unwrap();
    let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
    assert_eq!(Error::Graphql(messages).to_string(), "graphql errors: boom; bang");
  }

  #[test]
  fn current_or_next_skips_ended_validities() {
    let ended = Validity::from_dates(
      NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2000, 12, 31),
    );
    let open = Validity::open(NaiveDate::from_ymd_opt(2001, 1, 1).unwrap());
    let picked = current_or_next(vec![open, ended], |v| *v);
    assert_eq!(picked, Some(open));
  }

  #[test]
  fn input_type_names() {
    assert_eq!(capitalize(mutation_prefix(EntityKind::Engagement)), "Engagement");
    assert_eq!(capitalize(mutation_prefix(EntityKind::Address)), "Address");
  }
}
