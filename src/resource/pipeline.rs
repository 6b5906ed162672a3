// Geofence-gated create pipeline.
//
// Fixed, non-reorderable sequence: auto-fill, provider tracking/enrichment,
// full validation, persistence. Validation runs after enrichment so schema
// rules apply to the final record, not the caller's partial input. This
// module covers the storage-free prepare phase; the factory persists the
// result, so a rejection here provably writes nothing.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::geo::{GeoProvider, GeofenceSearch, TrackRequest};
use crate::resource::descriptor::{GeoPolicy, RequiredGeofence, ResourceDescriptor};
use crate::schema::Mode;

/// Output of the prepare phase: the validator's normalized record - the only
/// thing that may be persisted - plus the informational nearby-geofence list.
#[derive(Debug)]
pub struct PreparedCreate {
    pub record: Map<String, Value>,
    pub nearby_geofences: Option<Value>,
}

/// Run pipeline steps 1-3 (auto-fill, geo tracking/enrichment/gating, full
/// validation). Provider failures are absorbed except inside the hard gate,
/// where "not confirmed" is a rejection.
pub async fn prepare_create(
    descriptor: &ResourceDescriptor,
    geo: Option<&dyn GeoProvider>,
    payload: Value,
    now: DateTime<Utc>,
) -> Result<PreparedCreate, ApiError> {
    let Value::Object(mut candidate) = payload else {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    };

    // Step 1: auto-fill, only where the caller did not supply a value
    apply_auto_fill(&mut candidate, descriptor, now);

    // Step 2: provider tracking, enrichment, hard gate, nearby search
    let mut nearby_geofences = None;
    if let Some(policy) = &descriptor.geo_policy {
        if let Some((latitude, longitude)) = coordinate(&candidate, policy) {
            let context = track_and_fetch_context(descriptor, policy, geo, &candidate, latitude, longitude).await;

            if let Some(context) = &context {
                enrich(&mut candidate, policy, context);
            }

            if let Some(gate) = &policy.required_geofence {
                let confirmed = context
                    .as_ref()
                    .map(|ctx| geofence_confirmed(ctx, gate, &candidate))
                    .unwrap_or(false);
                if !confirmed {
                    return Err(ApiError::geofence_rejected(gate_message(gate, descriptor)));
                }
            }

            if let Some(search) = &policy.nearby {
                nearby_geofences = nearby_search(descriptor, geo, search, latitude, longitude).await;
            }
        } else {
            debug!(
                resource = %descriptor.display_name,
                "Coordinate fields absent or non-numeric, skipping geo step"
            );
        }
    }

    // Step 3: full validation of the candidate as it stands after steps 1-2
    let record = descriptor
        .schema
        .validate(&candidate, Mode::Full)
        .map_err(|errors| ApiError::validation("Validation failed", errors))?;

    Ok(PreparedCreate {
        record,
        nearby_geofences,
    })
}

/// Step 1: invoke each generator and set the field only when the caller left
/// it unset (explicit null counts as unset).
pub fn apply_auto_fill(
    candidate: &mut Map<String, Value>,
    descriptor: &ResourceDescriptor,
    now: DateTime<Utc>,
) {
    for (field, generator) in &descriptor.auto_fields {
        let supplied = matches!(candidate.get(field), Some(v) if !v.is_null());
        if !supplied {
            candidate.insert(field.clone(), generator.generate(now));
        }
    }
}

fn coordinate(candidate: &Map<String, Value>, policy: &GeoPolicy) -> Option<(f64, f64)> {
    let latitude = candidate.get(&policy.tracking.lat_field)?.as_f64()?;
    let longitude = candidate.get(&policy.tracking.lng_field)?.as_f64()?;
    Some((latitude, longitude))
}

/// Steps 2a/2b: the ping is fire-and-forget and the context fetch does not
/// consume its result, so both are issued concurrently.
async fn track_and_fetch_context(
    descriptor: &ResourceDescriptor,
    policy: &GeoPolicy,
    geo: Option<&dyn GeoProvider>,
    candidate: &Map<String, Value>,
    latitude: f64,
    longitude: f64,
) -> Option<Value> {
    let Some(geo) = geo else {
        warn!(
            resource = %descriptor.display_name,
            "Geo provider not configured, proceeding without enrichment"
        );
        return None;
    };

    let device_id = policy
        .tracking
        .owner_field
        .as_ref()
        .and_then(|f| candidate.get(f))
        .and_then(|v| v.as_str())
        .unwrap_or("anonymous")
        .to_string();
    let accuracy = policy
        .tracking
        .accuracy_field
        .as_ref()
        .and_then(|f| candidate.get(f))
        .and_then(|v| v.as_f64());

    let ping = TrackRequest {
        device_id,
        latitude,
        longitude,
        accuracy,
    };

    let (ping_result, context_result) =
        tokio::join!(geo.track(&ping), geo.context(latitude, longitude));

    if let Err(err) = ping_result {
        warn!(
            resource = %descriptor.display_name,
            "Location ping failed (non-fatal): {}", err
        );
    }

    match context_result {
        Ok(body) => Some(body),
        Err(err) => {
            warn!(
                resource = %descriptor.display_name,
                "Context fetch failed, proceeding unenriched: {}", err
            );
            None
        }
    }
}

/// Step 2c: write non-null values from the context response into the
/// candidate. Last writer wins; the validator is the final arbiter.
fn enrich(candidate: &mut Map<String, Value>, policy: &GeoPolicy, context: &Value) {
    for mapping in &policy.enrich {
        if let Some(value) = extract_path(context, &mapping.response_path) {
            if !value.is_null() {
                candidate.insert(mapping.target_field.clone(), value.clone());
            }
        }
    }
}

/// Read a dot-separated path out of a JSON body. Numeric segments index
/// into arrays.
pub fn extract_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Step 2d: scan the context response's geofence list for an entry whose tag
/// and identifier (per the configured strategy) both match the candidate.
pub fn geofence_confirmed(
    context: &Value,
    gate: &RequiredGeofence,
    candidate: &Map<String, Value>,
) -> bool {
    let Some(expected) = candidate.get(&gate.match_field).and_then(|v| v.as_str()) else {
        return false;
    };

    geofence_list(context)
        .iter()
        .any(|entry| {
            entry.get("tag").and_then(|v| v.as_str()) == Some(gate.tag.as_str())
                && entry.get(gate.match_strategy.entry_key()).and_then(|v| v.as_str())
                    == Some(expected)
        })
}

/// The provider nests the list under context.geofences; accept a top-level
/// list too so the body can be forwarded unchanged from either shape.
fn geofence_list(context: &Value) -> Vec<&Value> {
    let list = context
        .get("context")
        .and_then(|c| c.get("geofences"))
        .or_else(|| context.get("geofences"));
    match list.and_then(|v| v.as_array()) {
        Some(items) => items.iter().collect(),
        None => vec![],
    }
}

fn gate_message(gate: &RequiredGeofence, descriptor: &ResourceDescriptor) -> String {
    gate.error_message.clone().unwrap_or_else(|| {
        format!(
            "Location could not be confirmed inside a registered {} geofence for {}",
            gate.tag, descriptor.display_name
        )
    })
}

/// Step 2e: informational only - failures are absorbed
async fn nearby_search(
    descriptor: &ResourceDescriptor,
    geo: Option<&dyn GeoProvider>,
    search: &crate::resource::descriptor::NearbySearch,
    latitude: f64,
    longitude: f64,
) -> Option<Value> {
    let geo = geo?;
    let request = GeofenceSearch {
        latitude,
        longitude,
        tag: search.tag.clone(),
        limit: search.limit,
        radius_meters: search.radius_meters,
    };
    match geo.search_geofences(&request).await {
        Ok(body) => Some(body),
        Err(err) => {
            warn!(
                resource = %descriptor.display_name,
                "Nearby geofence search failed (non-fatal): {}", err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoError;
    use crate::resource::descriptor::{
        AutoFill, EnrichMapping, MatchStrategy, NearbySearch, TrackingFields,
    };
    use crate::schema::{FieldRule, ValidationSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockGeo {
        context: Option<Value>,
        nearby: Option<Value>,
        fail_track: bool,
        track_calls: AtomicUsize,
    }

    impl MockGeo {
        fn with_context(context: Value) -> Self {
            Self {
                context: Some(context),
                nearby: None,
                fail_track: false,
                track_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                context: None,
                nearby: None,
                fail_track: true,
                track_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GeoProvider for MockGeo {
        async fn track(&self, _req: &TrackRequest) -> Result<Value, GeoError> {
            self.track_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_track {
                Err(GeoError::Status(500))
            } else {
                Ok(json!({}))
            }
        }

        async fn context(&self, _lat: f64, _lng: f64) -> Result<Value, GeoError> {
            self.context.clone().ok_or(GeoError::Status(500))
        }

        async fn geocode_forward(&self, _query: &str) -> Result<Value, GeoError> {
            Ok(json!({}))
        }

        async fn geocode_reverse(&self, _lat: f64, _lng: f64) -> Result<Value, GeoError> {
            Ok(json!({}))
        }

        async fn search_geofences(&self, _search: &GeofenceSearch) -> Result<Value, GeoError> {
            self.nearby.clone().ok_or(GeoError::Status(500))
        }

        async fn route_distance(
            &self,
            _origin: (f64, f64),
            _destination: (f64, f64),
            _modes: &str,
        ) -> Result<Value, GeoError> {
            Ok(json!({}))
        }
    }

    fn visit_schema() -> ValidationSchema {
        ValidationSchema::new()
            .field("agent_id", FieldRule::string())
            .field("location_name", FieldRule::string())
            .field("visit_date", FieldRule::date())
            .field("latitude", FieldRule::number())
            .field("longitude", FieldRule::number())
            .field("place_name", FieldRule::string())
            .require(&["agent_id", "location_name", "visit_date"])
    }

    fn gated_descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new("visits", "visit_reports", "Visit report", visit_schema(), "agent_id")
            .date_field("visit_date")
            .auto_field("visit_date", AutoFill::CurrentDate)
            .geo_policy(
                crate::resource::descriptor::GeoPolicy::new(
                    TrackingFields::new("latitude", "longitude").owner("agent_id"),
                )
                .enrich(EnrichMapping::new("place_name", "context.place.name"))
                .require_geofence(
                    RequiredGeofence::new("dealer", "location_name", MatchStrategy::ExternalId)
                        .message("You are not at the reported dealer location"),
                ),
            )
    }

    fn dealer_context(external_id: &str) -> Value {
        json!({
            "context": {
                "place": { "name": "Central Plaza" },
                "geofences": [
                    { "tag": "warehouse", "externalId": external_id, "description": "WH" },
                    { "tag": "dealer", "externalId": external_id, "description": "Dealer one" }
                ]
            }
        })
    }

    #[tokio::test]
    async fn no_policy_create_never_enters_geo_step() {
        let descriptor = ResourceDescriptor::new(
            "dealers",
            "dealers",
            "Dealer",
            ValidationSchema::new()
                .field("name", FieldRule::string())
                .field("latitude", FieldRule::number())
                .field("longitude", FieldRule::number())
                .require(&["name"]),
            "name",
        );
        let geo = MockGeo::failing();

        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({ "name": "D1", "latitude": 1.0, "longitude": 2.0 }),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(geo.track_calls.load(Ordering::SeqCst), 0);
        assert_eq!(prepared.record["name"], json!("D1"));
    }

    #[tokio::test]
    async fn auto_fill_applies_only_to_missing_fields() {
        let geo = MockGeo::with_context(dealer_context("D-42"));
        let descriptor = gated_descriptor();

        // visit_date omitted: generator supplies it
        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(prepared.record.contains_key("visit_date"));

        // visit_date supplied: generator must not overwrite
        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "visit_date": "2020-01-01",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(prepared.record["visit_date"], json!("2020-01-01"));
    }

    #[tokio::test]
    async fn enrichment_writes_context_values_into_candidate() {
        let geo = MockGeo::with_context(dealer_context("D-42"));
        let prepared = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21,
                "place_name": "caller supplied"
            }),
            Utc::now(),
        )
        .await
        .unwrap();

        // Last writer wins: enrichment overwrote the caller's value
        assert_eq!(prepared.record["place_name"], json!("Central Plaza"));
    }

    #[tokio::test]
    async fn hard_gate_rejects_mismatched_geofence_with_configured_message() {
        let geo = MockGeo::with_context(dealer_context("D-42"));
        let err = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-999",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap_err();

        match err {
            ApiError::GeofenceRejected(msg) => {
                assert_eq!(msg, "You are not at the reported dealer location")
            }
            other => panic!("expected geofence rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hard_gate_requires_matching_tag_not_just_identifier() {
        // Only a warehouse-tagged geofence carries the identifier
        let context = json!({
            "context": { "geofences": [
                { "tag": "warehouse", "externalId": "D-42" }
            ]}
        });
        let geo = MockGeo::with_context(context);
        let err = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::GeofenceRejected(_)));
    }

    #[tokio::test]
    async fn provider_failure_during_hard_gate_is_a_rejection() {
        let geo = MockGeo::failing();
        let err = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::GeofenceRejected(_)));
    }

    #[tokio::test]
    async fn provider_failure_without_gate_is_absorbed() {
        let mut descriptor = gated_descriptor();
        if let Some(policy) = &mut descriptor.geo_policy {
            policy.required_geofence = None;
        }
        let geo = MockGeo::failing();

        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(prepared.record["location_name"], json!("D-42"));
    }

    #[tokio::test]
    async fn ping_failure_never_aborts_the_request() {
        let mut geo = MockGeo::with_context(dealer_context("D-42"));
        geo.fail_track = true;

        let prepared = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(geo.track_calls.load(Ordering::SeqCst), 1);
        assert_eq!(prepared.record["location_name"], json!("D-42"));
    }

    #[tokio::test]
    async fn gate_success_does_not_bypass_validation() {
        let geo = MockGeo::with_context(dealer_context("D-42"));
        // agent_id missing: gate passes, validation must still fail
        let err = prepare_create(
            &gated_descriptor(),
            Some(&geo),
            json!({
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
    }

    #[tokio::test]
    async fn non_numeric_coordinates_skip_the_geo_step() {
        let geo = MockGeo::with_context(dealer_context("D-42"));
        let mut descriptor = gated_descriptor();
        if let Some(policy) = &mut descriptor.geo_policy {
            policy.required_geofence = None;
        }

        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": "28.61",
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await;
        // Geo step skipped entirely; validation then rejects the string latitude
        assert_eq!(geo.track_calls.load(Ordering::SeqCst), 0);
        assert!(prepared.is_err());
    }

    #[tokio::test]
    async fn nearby_search_result_is_attached_when_configured() {
        let mut geo = MockGeo::with_context(dealer_context("D-42"));
        geo.nearby = Some(json!({ "geofences": [{ "tag": "dealer", "externalId": "D-43" }] }));

        let mut descriptor = gated_descriptor();
        if let Some(policy) = &mut descriptor.geo_policy {
            policy.nearby = Some(NearbySearch {
                tag: Some("dealer".to_string()),
                limit: Some(5),
                radius_meters: Some(1000),
            });
        }

        let prepared = prepare_create(
            &descriptor,
            Some(&geo),
            json!({
                "agent_id": "a1",
                "location_name": "D-42",
                "latitude": 28.61,
                "longitude": 77.21
            }),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(prepared.nearby_geofences.is_some());
    }

    #[test]
    fn extract_path_traverses_objects_and_arrays() {
        let body = json!({
            "context": {
                "geofences": [
                    { "description": "Dealer one" },
                    { "description": "Dealer two" }
                ]
            }
        });
        assert_eq!(
            extract_path(&body, "context.geofences.1.description"),
            Some(&json!("Dealer two"))
        );
        assert_eq!(extract_path(&body, "context.missing"), None);
        assert_eq!(extract_path(&body, "context.geofences.9"), None);
    }
}
