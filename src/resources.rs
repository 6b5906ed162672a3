//! Concrete resource wiring. Everything behavioral lives in the factory and
//! pipeline; this module only declares the business entities.

use serde_json::json;

use crate::resource::{
    AutoFill, EnrichMapping, GeoPolicy, MatchStrategy, NearbySearch, RequiredGeofence,
    ResourceDescriptor, TrackingFields,
};
use crate::schema::{FieldRule, ValidationSchema};

/// Every resource the service exposes, in registration order.
pub fn descriptors() -> Vec<ResourceDescriptor> {
    vec![visit_reports(), attendance(), dealers()]
}

/// Visit reports are the location-gated resource: an agent must physically
/// be inside the dealer's registered geofence for the create to commit.
fn visit_reports() -> ResourceDescriptor {
    let schema = ValidationSchema::new()
        .field("agent_id", FieldRule::string().min_length(1))
        .field("dealer_code", FieldRule::string().min_length(1))
        .field("visit_date", FieldRule::date())
        .field("latitude", FieldRule::number().minimum(-90.0).maximum(90.0))
        .field("longitude", FieldRule::number().minimum(-180.0).maximum(180.0))
        .field("accuracy", FieldRule::number().minimum(0.0))
        .field("location_name", FieldRule::string())
        .field(
            "status",
            FieldRule::string().one_of(&["planned", "completed", "cancelled"]),
        )
        .field("rating", FieldRule::integer().minimum(1.0).maximum(5.0))
        .field("notes", FieldRule::string().max_length(2000))
        .field("photos", FieldRule::array_of(FieldRule::string()))
        .require(&["agent_id", "dealer_code", "visit_date", "latitude", "longitude"]);

    let policy = GeoPolicy::new(
        TrackingFields::new("latitude", "longitude")
            .accuracy("accuracy")
            .owner("agent_id"),
    )
    .enrich(EnrichMapping::new("location_name", "context.place.name"))
    .require_geofence(
        RequiredGeofence::new("dealer", "dealer_code", MatchStrategy::ExternalId)
            .message("You must be at the dealer location to submit a visit report"),
    )
    .nearby(NearbySearch {
        tag: Some("dealer".to_string()),
        limit: Some(5),
        radius_meters: Some(1000),
    });

    ResourceDescriptor::new("visits", "visit_reports", "Visit report", schema, "agent_id")
        .date_field("visit_date")
        .auto_field("visit_date", AutoFill::CurrentDate)
        .auto_field("status", AutoFill::Constant(json!("completed")))
        .geo_policy(policy)
}

/// Attendance punches track the agent's location but are never gated; a
/// punch from outside any geofence is still a punch.
fn attendance() -> ResourceDescriptor {
    let schema = ValidationSchema::new()
        .field("agent_id", FieldRule::string().min_length(1))
        .field("punch_type", FieldRule::string().one_of(&["in", "out"]))
        .field("punch_date", FieldRule::date())
        .field("punched_at", FieldRule::timestamp())
        .field("latitude", FieldRule::number().minimum(-90.0).maximum(90.0))
        .field("longitude", FieldRule::number().minimum(-180.0).maximum(180.0))
        .field("accuracy", FieldRule::number().minimum(0.0))
        .field("address", FieldRule::string())
        .require(&["agent_id", "punch_type", "punch_date", "punched_at"]);

    let policy = GeoPolicy::new(
        TrackingFields::new("latitude", "longitude")
            .accuracy("accuracy")
            .owner("agent_id"),
    )
    .enrich(EnrichMapping::new("address", "context.address.formattedAddress"));

    ResourceDescriptor::new("attendance", "attendance_logs", "Attendance punch", schema, "agent_id")
        .date_field("punch_date")
        .auto_field("punch_date", AutoFill::CurrentDate)
        .auto_field("punched_at", AutoFill::CurrentTimestamp)
        .geo_policy(policy)
}

/// Dealer registration is plain CRUD; the geofence for a dealer is managed
/// on the provider side, not here.
fn dealers() -> ResourceDescriptor {
    let schema = ValidationSchema::new()
        .field("created_by", FieldRule::string().min_length(1))
        .field("dealer_code", FieldRule::string().min_length(1))
        .field("name", FieldRule::string().min_length(1).max_length(200))
        .field("address", FieldRule::string().max_length(500))
        .field("city", FieldRule::string().max_length(100))
        .field("phone", FieldRule::string().max_length(20))
        .field("latitude", FieldRule::number().minimum(-90.0).maximum(90.0))
        .field("longitude", FieldRule::number().minimum(-180.0).maximum(180.0))
        .require(&["created_by", "dealer_code", "name"]);

    ResourceDescriptor::new("dealers", "dealers", "Dealer", schema, "created_by")
}
