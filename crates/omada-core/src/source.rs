//! Omada user records: the raw wire form and its validated projection.
//!
//! The raw form ([`RawRecord`]) is kept verbatim for snapshot diffing. The
//! typed form ([`OmadaUser`]) is what the builder works with. Conversion
//! happens once, at ingestion:
//!
//! - empty strings become absent values before anything else looks at them;
//! - a `VALIDTO` in year 9999 becomes an open end;
//! - zero-padded numbers lose their padding;
//! - AD object GUIDs are re-ordered from their little-endian wire form;
//! - the composite position field is parsed strictly.
//!
//! Whether a record is *manual* is decided by reading the identity category
//! first; the manual-only fields are then required.

use std::sync::LazyLock;

use base64::Engine as _;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result, validity::Validity};

/// One untransformed Omada record as returned by the OData view.
pub type RawRecord = serde_json::Map<String, Value>;

/// Omada's stand-in for "no end date".
pub const SENTINEL_YEAR: i32 = 9999;

/// OData field names.
pub mod fields {
  pub const ID: &str = "Id";
  pub const UID: &str = "UId";
  pub const VALID_FROM: &str = "VALIDFROM";
  pub const VALID_TO: &str = "VALIDTO";
  pub const IDENTITY_CATEGORY: &str = "IDENTITYCATEGORY";
  pub const SERVICE_NUMBER: &str = "C_TJENESTENR";
  pub const EMPLOYEE_NUMBER: &str = "C_MEDARBEJDERNR";
  pub const CPR_NUMBER: &str = "C_CPRNR";
  pub const OBJECT_GUID: &str = "C_OBJECTGUID_I_AD";
  pub const LOGIN: &str = "C_BRUGERNAVN";
  pub const EMAIL: &str = "EMAIL";
  pub const EMAIL2: &str = "EMAIL2";
  pub const PHONE: &str = "PHONE";
  pub const CELLPHONE: &str = "CELLPHONE";
  pub const DIRECT_PHONE: &str = "C_DIREKTE_TLF";
  pub const INSTITUTION_PHONE: &str = "C_INST_PHONE";
  pub const POSITION: &str = "C_STILLING";
  pub const FIRST_NAME: &str = "C_FORNAVNE";
  pub const LAST_NAME: &str = "C_EFTERNAVN";
  pub const NICKNAME_FIRST_NAME: &str = "C_KALDENAVN_FORNAVNE";
  pub const NICKNAME_LAST_NAME: &str = "C_KALDENAVN_EFTERNAVN";
  pub const ORG_UNIT: &str = "C_ORGANISATIONSKODE";
  pub const JOB_TITLE: &str = "C_STILLINGSBETEGNELSE";
}

static CPR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(?P<day>\d{2})(?P<month>\d{2})\d{2}-?(?P<serial>\d{4})$")
    .expect("CPR_REGEX is a valid regex pattern")
});

/// `"<job title> (<org unit code>) - <employment number>"`
static POSITION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^(?P<job_title>\S.*?) \((?P<org_unit>[0-9A-Za-z]+)\) - (?P<number>\d+)$",
  )
  .expect("POSITION_REGEX is a valid regex pattern")
});

// ─── Typed record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCategory {
  pub id:    String,
  pub uid:   Option<Uuid>,
  pub value: Option<String>,
}

/// The decoded composite position field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
  pub job_title:         String,
  pub org_unit:          String,
  pub employment_number: String,
}

/// Fields present on every Omada user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalUser {
  pub id:                i64,
  pub uid:               Uuid,
  pub validity:          Validity,
  pub identity_category: IdentityCategory,
  pub service_number:    Option<String>,
  pub employee_number:   Option<String>,
  pub cpr_number:        Option<String>,
  pub object_guid:       Option<Uuid>,
  pub login:             Option<String>,
  pub email:             Option<String>,
  pub email2:            Option<String>,
  pub phone:             Option<String>,
  pub cellphone:         Option<String>,
  pub direct_phone:      Option<String>,
  pub institution_phone: Option<String>,
  pub position:          Option<Position>,
}

/// Fields Omada is only authoritative for on manual users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualFields {
  pub first_name:          String,
  pub last_name:           String,
  pub nickname_first_name: Option<String>,
  pub nickname_last_name:  Option<String>,
  pub cpr_number:          String,
  pub org_unit:            String,
  pub job_title:           String,
}

/// A user whose identity and engagement are also owned by Omada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualUser {
  pub user:   NormalUser,
  pub manual: ManualFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OmadaUser {
  Normal(NormalUser),
  Manual(ManualUser),
}

impl OmadaUser {
  /// Validate `raw`, choosing the variant from its identity category.
  pub fn parse(raw: &RawRecord, manual_category: &str) -> Result<Self> {
    let raw = strip_empty(raw);
    let user = NormalUser::from_stripped(&raw)?;
    if user.identity_category.id == manual_category {
      let manual = ManualFields::from_stripped(&raw, &user)?;
      Ok(Self::Manual(ManualUser { user, manual }))
    } else {
      Ok(Self::Normal(user))
    }
  }

  pub fn user(&self) -> &NormalUser {
    match self {
      Self::Normal(user) => user,
      Self::Manual(manual) => &manual.user,
    }
  }

  pub fn manual(&self) -> Option<&ManualFields> {
    match self {
      Self::Normal(_) => None,
      Self::Manual(manual) => Some(&manual.manual),
    }
  }

  pub fn is_manual(&self) -> bool { matches!(self, Self::Manual(_)) }
}

impl NormalUser {
  pub fn parse(raw: &RawRecord) -> Result<Self> {
    Self::from_stripped(&strip_empty(raw))
  }

  fn from_stripped(raw: &RawRecord) -> Result<Self> {
    let id = match raw.get(fields::ID) {
      Some(Value::Number(n)) => n
        .as_i64()
        .ok_or_else(|| Error::invalid(fields::ID, "not an integer"))?,
      Some(Value::String(s)) => s
        .parse()
        .map_err(|_| Error::invalid(fields::ID, format!("{s:?} is not an integer")))?,
      None | Some(Value::Null) => return Err(Error::MissingField(fields::ID)),
      Some(other) => {
        return Err(Error::invalid(fields::ID, format!("unexpected {other}")));
      }
    };

    let uid = required(fields::UID, string(raw, fields::UID)?)?;
    let uid = Uuid::parse_str(&uid)
      .map_err(|e| Error::invalid(fields::UID, e.to_string()))?;

    let valid_from =
      required(fields::VALID_FROM, string(raw, fields::VALID_FROM)?)?;
    let valid_from = parse_timestamp(fields::VALID_FROM, &valid_from)?;
    let valid_to = string(raw, fields::VALID_TO)?
      .map(|s| parse_timestamp(fields::VALID_TO, &s))
      .transpose()?
      .filter(|to| to.year() != SENTINEL_YEAR);

    Ok(Self {
      id,
      uid,
      validity: Validity::from_dates(valid_from, valid_to),
      identity_category: identity_category(raw)?,
      service_number: string(raw, fields::SERVICE_NUMBER)?
        .map(|s| strip_leading_zeros(&s)),
      employee_number: string(raw, fields::EMPLOYEE_NUMBER)?
        .map(|s| strip_leading_zeros(&s)),
      cpr_number: string(raw, fields::CPR_NUMBER)?
        .map(|s| parse_cpr(&s))
        .transpose()?,
      object_guid: string(raw, fields::OBJECT_GUID)?
        .map(|s| parse_object_guid(&s))
        .transpose()?,
      login: string(raw, fields::LOGIN)?,
      email: string(raw, fields::EMAIL)?,
      email2: string(raw, fields::EMAIL2)?,
      phone: string(raw, fields::PHONE)?,
      cellphone: string(raw, fields::CELLPHONE)?,
      direct_phone: string(raw, fields::DIRECT_PHONE)?,
      institution_phone: string(raw, fields::INSTITUTION_PHONE)?,
      position: string(raw, fields::POSITION)?
        .map(|s| parse_position(&s))
        .transpose()?,
    })
  }
}

impl ManualUser {
  /// Validate `raw` as a manual user.
  ///
  /// Fails if the record's identity category is not `manual_category`, even
  /// when every manual-only field happens to be present.
  pub fn parse(raw: &RawRecord, manual_category: &str) -> Result<Self> {
    let raw = strip_empty(raw);
    let user = NormalUser::from_stripped(&raw)?;
    if user.identity_category.id != manual_category {
      return Err(Error::NotManualCategory {
        expected: manual_category.to_owned(),
        found:    user.identity_category.id,
      });
    }
    let manual = ManualFields::from_stripped(&raw, &user)?;
    Ok(Self { user, manual })
  }
}

impl ManualFields {
  fn from_stripped(raw: &RawRecord, user: &NormalUser) -> Result<Self> {
    let position = user.position.as_ref();
    let org_unit = string(raw, fields::ORG_UNIT)?
      .map(|s| org_unit_code(&s))
      .or_else(|| position.map(|p| p.org_unit.clone()));
    let job_title = string(raw, fields::JOB_TITLE)?
      .or_else(|| position.map(|p| p.job_title.clone()));

    Ok(Self {
      first_name: required(fields::FIRST_NAME, string(raw, fields::FIRST_NAME)?)?,
      last_name: required(fields::LAST_NAME, string(raw, fields::LAST_NAME)?)?,
      nickname_first_name: string(raw, fields::NICKNAME_FIRST_NAME)?,
      nickname_last_name: string(raw, fields::NICKNAME_LAST_NAME)?,
      cpr_number: required(fields::CPR_NUMBER, user.cpr_number.clone())?,
      org_unit: required(fields::ORG_UNIT, org_unit)?,
      job_title: required(fields::JOB_TITLE, job_title)?,
    })
  }
}

// ─── Raw helpers ─────────────────────────────────────────────────────────────

/// Replace every empty string in `raw` (including inside nested objects) with
/// `null`.
pub fn strip_empty(raw: &RawRecord) -> RawRecord {
  raw
    .iter()
    .map(|(key, value)| (key.clone(), strip_empty_value(value)))
    .collect()
}

fn strip_empty_value(value: &Value) -> Value {
  match value {
    Value::String(s) if s.is_empty() => Value::Null,
    Value::Object(map) => Value::Object(strip_empty(map)),
    other => other.clone(),
  }
}

/// The stable external identifier of a raw record.
pub fn record_key(raw: &RawRecord) -> Result<String> {
  match raw.get(fields::UID) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s.to_lowercase()),
    None | Some(Value::Null) | Some(Value::String(_)) => {
      Err(Error::MissingField(fields::UID))
    }
    Some(other) => {
      Err(Error::invalid(fields::UID, format!("unexpected {other}")))
    }
  }
}

fn string(raw: &RawRecord, field: &'static str) -> Result<Option<String>> {
  match raw.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.clone())),
    Some(Value::Number(n)) => Ok(Some(n.to_string())),
    Some(other) => Err(Error::invalid(field, format!("unexpected {other}"))),
  }
}

fn required<T>(field: &'static str, value: Option<T>) -> Result<T> {
  value.ok_or(Error::MissingField(field))
}

fn identity_category(raw: &RawRecord) -> Result<IdentityCategory> {
  let field = fields::IDENTITY_CATEGORY;
  let object = match raw.get(field) {
    Some(Value::Object(object)) => object,
    None | Some(Value::Null) => return Err(Error::MissingField(field)),
    Some(other) => {
      return Err(Error::invalid(field, format!("unexpected {other}")));
    }
  };
  let id = match object.get("Id") {
    Some(Value::Number(n)) => n.to_string(),
    Some(Value::String(s)) => s.clone(),
    _ => return Err(Error::invalid(field, "missing Id")),
  };
  let uid = match object.get("UId") {
    Some(Value::String(s)) => Some(
      Uuid::parse_str(s).map_err(|e| Error::invalid(field, e.to_string()))?,
    ),
    _ => None,
  };
  let value = object
    .get("Value")
    .and_then(Value::as_str)
    .map(str::to_owned);
  Ok(IdentityCategory { id, uid, value })
}

/// Parse an Omada timestamp to its calendar date.
///
/// Accepts RFC 3339 (the date is taken in the timestamp's own offset), naive
/// date-times and bare dates.
fn parse_timestamp(field: &'static str, s: &str) -> Result<NaiveDate> {
  if let Ok(at) = chrono::DateTime::parse_from_rfc3339(s) {
    return Ok(at.date_naive());
  }
  if let Ok(at) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
    return Ok(at.date());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::invalid(field, format!("{s:?}: {e}")))
}

/// `"00001337"` → `"1337"`. A string of only zeros keeps a single zero.
pub fn strip_leading_zeros(s: &str) -> String {
  let stripped = s.trim_start_matches('0');
  if stripped.is_empty() && !s.is_empty() {
    "0".to_owned()
  } else {
    stripped.to_owned()
  }
}

/// Org unit codes are zero-stripped unless they are UUIDs, which are kept
/// verbatim so they can still be looked up as such.
fn org_unit_code(s: &str) -> String {
  if Uuid::parse_str(s).is_ok() {
    s.to_owned()
  } else {
    strip_leading_zeros(s)
  }
}

/// Validate a CPR number and return it as ten digits without separator.
pub fn parse_cpr(s: &str) -> Result<String> {
  let field = fields::CPR_NUMBER;
  let caps = CPR_REGEX
    .captures(s.trim())
    .ok_or_else(|| Error::invalid(field, "expected DDMMYY-NNNN"))?;
  let day: u32 = caps["day"].parse().unwrap_or(0);
  let month: u32 = caps["month"].parse().unwrap_or(0);
  if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
    return Err(Error::invalid(field, "date part out of range"));
  }
  Ok(s.trim().replace('-', ""))
}

/// Both ways Omada may store a validated CPR number: `DDMMYYNNNN` and
/// `DDMMYY-NNNN`.
pub fn cpr_forms(cpr: &str) -> Vec<String> {
  let mut forms = vec![cpr.to_owned()];
  if let (Some(date), Some(serial)) = (cpr.get(..6), cpr.get(6..)) {
    forms.push(format!("{date}-{serial}"));
  }
  forms
}

/// Decode a base64 AD object GUID, stored little-endian, into its canonical
/// UUID.
pub fn parse_object_guid(s: &str) -> Result<Uuid> {
  let field = fields::OBJECT_GUID;
  let bytes = base64::engine::general_purpose::STANDARD
    .decode(s.trim())
    .map_err(|e| Error::invalid(field, e.to_string()))?;
  let bytes: [u8; 16] = bytes
    .try_into()
    .map_err(|b: Vec<u8>| Error::invalid(field, format!("{} bytes, expected 16", b.len())))?;
  Ok(Uuid::from_bytes_le(bytes))
}

/// Parse the composite position field; anything that does not match the
/// pattern exactly is rejected.
pub fn parse_position(s: &str) -> Result<Position> {
  let caps = POSITION_REGEX.captures(s).ok_or_else(|| {
    Error::invalid(fields::POSITION, format!("{s:?} does not match pattern"))
  })?;
  Ok(Position {
    job_title:         caps["job_title"].to_owned(),
    org_unit:          strip_leading_zeros(&caps["org_unit"]),
    employment_number: strip_leading_zeros(&caps["number"]),
  })
}
