use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::ValidationSchema;

/// Server-auto-filled field generators. A closed set rather than arbitrary
/// closures so descriptors stay serializable and auto-fill stays a pure
/// function of "now".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AutoFill {
    /// Today's date, YYYY-MM-DD
    CurrentDate,
    /// A fresh RFC 3339 timestamp
    CurrentTimestamp,
    Constant(Value),
}

impl AutoFill {
    pub fn generate(&self, now: DateTime<Utc>) -> Value {
        match self {
            AutoFill::CurrentDate => Value::String(now.format("%Y-%m-%d").to_string()),
            AutoFill::CurrentTimestamp => Value::String(now.to_rfc3339()),
            AutoFill::Constant(value) => value.clone(),
        }
    }
}

/// How a candidate field is compared against the provider's geofence entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    ExternalId,
    Description,
}

impl MatchStrategy {
    /// Key of the geofence entry this strategy compares against
    pub fn entry_key(&self) -> &'static str {
        match self {
            MatchStrategy::ExternalId => "externalId",
            MatchStrategy::Description => "description",
        }
    }
}

/// Candidate fields carrying the coordinate (and optionally accuracy and the
/// device owner) for the tracking ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingFields {
    pub lat_field: String,
    pub lng_field: String,
    pub accuracy_field: Option<String>,
    pub owner_field: Option<String>,
}

impl TrackingFields {
    pub fn new(lat_field: &str, lng_field: &str) -> Self {
        Self {
            lat_field: lat_field.to_string(),
            lng_field: lng_field.to_string(),
            accuracy_field: None,
            owner_field: None,
        }
    }

    pub fn accuracy(mut self, field: &str) -> Self {
        self.accuracy_field = Some(field.to_string());
        self
    }

    pub fn owner(mut self, field: &str) -> Self {
        self.owner_field = Some(field.to_string());
        self
    }
}

/// Copy a value out of the provider's context response into the candidate.
/// The path is dot-separated and may traverse arrays by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichMapping {
    pub target_field: String,
    pub response_path: String,
}

impl EnrichMapping {
    pub fn new(target_field: &str, response_path: &str) -> Self {
        Self {
            target_field: target_field.to_string(),
            response_path: response_path.to_string(),
        }
    }
}

/// The hard gate: the write only commits when the provider confirms the
/// coordinate lies inside a geofence matching both tag and identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredGeofence {
    pub tag: String,
    pub match_field: String,
    pub match_strategy: MatchStrategy,
    pub error_message: Option<String>,
}

impl RequiredGeofence {
    pub fn new(tag: &str, match_field: &str, match_strategy: MatchStrategy) -> Self {
        Self {
            tag: tag.to_string(),
            match_field: match_field.to_string(),
            match_strategy,
            error_message: None,
        }
    }

    pub fn message(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }
}

/// Informational nearby-geofence search attached to the create response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbySearch {
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub radius_meters: Option<u32>,
}

/// Whether and how create requests for a resource consult the geo provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPolicy {
    pub tracking: TrackingFields,
    pub enrich: Vec<EnrichMapping>,
    pub required_geofence: Option<RequiredGeofence>,
    pub nearby: Option<NearbySearch>,
}

impl GeoPolicy {
    pub fn new(tracking: TrackingFields) -> Self {
        Self {
            tracking,
            enrich: vec![],
            required_geofence: None,
            nearby: None,
        }
    }

    pub fn enrich(mut self, mapping: EnrichMapping) -> Self {
        self.enrich.push(mapping);
        self
    }

    pub fn require_geofence(mut self, gate: RequiredGeofence) -> Self {
        self.required_geofence = Some(gate);
        self
    }

    pub fn nearby(mut self, search: NearbySearch) -> Self {
        self.nearby = Some(search);
        self
    }
}

/// Static declaration binding one business entity to a storage table, a
/// validation schema and optional behaviors. Immutable once registered;
/// built at process startup only.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// URL segment the endpoints are mounted under
    pub path: String,
    /// Storage table
    pub table: String,
    /// Human name used in error messages and logs
    pub display_name: String,
    pub schema: ValidationSchema,
    /// Column the list-by-owner route filters on
    pub owner_field: String,
    /// Column used for range queries and default ordering
    pub date_field: Option<String>,
    pub auto_fields: Vec<(String, AutoFill)>,
    pub geo_policy: Option<GeoPolicy>,
}

impl ResourceDescriptor {
    pub fn new(
        path: &str,
        table: &str,
        display_name: &str,
        schema: ValidationSchema,
        owner_field: &str,
    ) -> Self {
        Self {
            path: path.to_string(),
            table: table.to_string(),
            display_name: display_name.to_string(),
            schema,
            owner_field: owner_field.to_string(),
            date_field: None,
            auto_fields: vec![],
            geo_policy: None,
        }
    }

    pub fn date_field(mut self, field: &str) -> Self {
        self.date_field = Some(field.to_string());
        self
    }

    pub fn auto_field(mut self, field: &str, generator: AutoFill) -> Self {
        self.auto_fields.push((field.to_string(), generator));
        self
    }

    pub fn geo_policy(mut self, policy: GeoPolicy) -> Self {
        self.geo_policy = Some(policy);
        self
    }
}
