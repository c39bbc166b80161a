use crate::error::{FieldPath, RecordError, Result};
use crate::validation::{DecodeScope, ObjectReader, Tagged};
use crate::values::PeriodicCashFlow;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const MAX_AGE: u64 = 120;
pub const MAX_OCCUPATION_CHARS: usize = 80;

pub const PROFILE_FIELDS: &[&str] = &[
    "date_of_birth",
    "gender",
    "marital_status",
    "address1",
    "address2",
    "city",
    "postcode",
    "health_status",
    "smoker",
    "nationality",
    "nationality2",
    "n_i_number",
    "target_retirement_age",
    "target_retirement_income",
    "employment_status",
    "occupation",
];

macro_rules! tagged_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $tag)] $variant, )+
        }

        impl Tagged for $name {
            const VARIANTS: &'static [Self] = &[ $( $name::$variant, )+ ];

            fn tag(self) -> &'static str {
                match self {
                    $( $name::$variant => $tag, )+
                }
            }
        }
    };
}

tagged_enum!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
    Undisclosed => "undisclosed",
});

tagged_enum!(MaritalStatus {
    Single => "single",
    Married => "married",
    CivilPartnership => "civil_partnership",
    Divorced => "divorced",
    Widowed => "widowed",
    Separated => "separated",
    Cohabiting => "cohabiting",
    Other => "other",
});

tagged_enum!(HealthStatus {
    Good => "good",
    MostlyGood => "mostly_good",
    SomeProblems => "some_problems",
    SeriousProblems => "serious_problems",
});

tagged_enum!(#[derive(Default)] YesNoUnknown {
    Yes => "yes",
    No => "no",
    #[default]
    Unknown => "unknown",
});

tagged_enum!(EmploymentStatus {
    Employed => "employed",
    SelfEmployed => "self_employed",
    Retired => "retired",
    FullTimeEducation => "full_time_education",
    IndependentMeans => "independent_means",
    Homemaker => "homemaker",
    Other => "other",
});

/// Demographics, retirement goals and work details for one person.
///
/// Independent of the balance sheet; the two are tied together only by the
/// owning person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct IdentityProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Date of birth, YYYY-MM-DD")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<MaritalStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    pub smoker: YesNoUnknown,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "National Insurance number")]
    pub n_i_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Age in years (0-120) at which the person wants to retire")]
    pub target_retirement_age: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Desired retirement income, in today's money")]
    pub target_retirement_income: Option<PeriodicCashFlow>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub employment_status: Option<EmploymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Occupation, at most 80 characters")]
    pub occupation: Option<String>,
}

impl IdentityProfile {
    /// Copies every field `newer` knows about over this profile. `smoker` only
    /// overwrites when `newer` has a definite answer.
    pub fn overlay(&mut self, newer: &IdentityProfile) {
        fn take<T: Clone>(slot: &mut Option<T>, newer: &Option<T>) {
            if newer.is_some() {
                slot.clone_from(newer);
            }
        }

        take(&mut self.date_of_birth, &newer.date_of_birth);
        take(&mut self.gender, &newer.gender);
        take(&mut self.marital_status, &newer.marital_status);
        take(&mut self.address1, &newer.address1);
        take(&mut self.address2, &newer.address2);
        take(&mut self.city, &newer.city);
        take(&mut self.postcode, &newer.postcode);
        take(&mut self.health_status, &newer.health_status);
        if newer.smoker != YesNoUnknown::Unknown {
            self.smoker = newer.smoker;
        }
        take(&mut self.nationality, &newer.nationality);
        take(&mut self.nationality2, &newer.nationality2);
        take(&mut self.n_i_number, &newer.n_i_number);
        take(&mut self.target_retirement_age, &newer.target_retirement_age);
        take(&mut self.target_retirement_income, &newer.target_retirement_income);
        take(&mut self.employment_status, &newer.employment_status);
        take(&mut self.occupation, &newer.occupation);
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(IdentityProfile)
    }

    pub fn schema_as_json() -> serde_json::Result<String> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

pub fn decode_profile(raw: &Value) -> Result<IdentityProfile> {
    decode_profile_at(raw, &FieldPath::root())
}

pub(crate) fn decode_profile_at(raw: &Value, path: &FieldPath) -> Result<IdentityProfile> {
    let r = ObjectReader::strict(raw, path, &[PROFILE_FIELDS])?;
    let scope = DecodeScope::default();

    let date_of_birth = match r.optional_str("date_of_birth")? {
        Some(text) => Some(NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| {
            RecordError::invalid_field(
                &r.field_path("date_of_birth"),
                format!("'{}' is not a YYYY-MM-DD date", text),
            )
        })?),
        None => None,
    };

    let target_retirement_age = r
        .optional_u64_in("target_retirement_age", 0..=MAX_AGE)?
        .and_then(|age| u8::try_from(age).ok());

    Ok(IdentityProfile {
        date_of_birth,
        gender: r.optional_tag("gender")?,
        marital_status: r.optional_tag("marital_status")?,
        address1: r.optional_str("address1")?,
        address2: r.optional_str("address2")?,
        city: r.optional_str("city")?,
        postcode: r.optional_str("postcode")?,
        health_status: r.optional_tag("health_status")?,
        smoker: r.optional_tag::<YesNoUnknown>("smoker")?.unwrap_or_default(),
        nationality: r.optional_str("nationality")?,
        nationality2: r.optional_str("nationality2")?,
        n_i_number: r.optional_str("n_i_number")?,
        target_retirement_age,
        target_retirement_income: r.optional("target_retirement_income", &scope)?,
        employment_status: r.optional_tag("employment_status")?,
        occupation: r.optional_str_max("occupation", MAX_OCCUPATION_CHARS)?,
    })
}

impl<'de> Deserialize<'de> for IdentityProfile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        decode_profile(&raw).map_err(serde::de::Error::custom)
    }
}
