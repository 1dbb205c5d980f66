//! API request handlers

pub mod namespace;
pub mod register;

pub use namespace::{
    check_namespace_exists, check_namespace_status, delete_namespace, list_namespaces, well_known,
    CheckNamespaceExistsRequest, CheckNamespaceExistsResponse, CheckStatusRequest,
    CheckStatusResponse,
};
pub use register::{register, validate_prefix, ChallengeInitResponse, RegistrationData};
