pub mod descriptor;
pub mod factory;
pub mod pipeline;

pub use descriptor::{
    AutoFill, EnrichMapping, GeoPolicy, MatchStrategy, NearbySearch, RequiredGeofence,
    ResourceDescriptor, TrackingFields,
};
pub use factory::{AppState, EndpointFactory, FactoryError};
pub use pipeline::{prepare_create, PreparedCreate};
