use service_core::error::{AppError, ErrorBody, VALIDATION_ERROR_CODE};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No updatable field supplied")]
    MissingUpdateField,

    #[error("Node not found or inactive: {0}")]
    NodeNotFound(String),

    #[error("Accessor not found: {0}")]
    AccessorNotFound(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Namespace is disabled: {0}")]
    NamespaceDisabled(String),

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Node role not permitted: {0}")]
    RoleNotPermitted(String),

    #[error("Not enough IdPs: {found} found, {required} required")]
    NotEnoughIdps { found: usize, required: u32 },

    #[error("Invalid data request list: {0}")]
    InvalidDataRequest(String),

    #[error("Identity already onboarded by this IdP")]
    IdentityAlreadyOnboarded,

    #[error("Request is already closed")]
    RequestClosed,

    #[error("Request has timed out")]
    RequestTimedOut,

    #[error("IdP is not associated with the identity: {0}")]
    IdpNotAssociated(String),

    #[error("IdP was not requested: {0}")]
    IdpNotRequested(String),

    #[error("IdP has already responded: {0}")]
    DuplicateResponse(String),

    #[error("No data request for service {service_id} addressed to {as_id}")]
    NoDataRequest { service_id: String, as_id: String },

    #[error("IdP consent is not yet satisfied")]
    ConsentNotSatisfied,

    #[error("Assurance level below request minimum")]
    AssuranceTooLow,

    #[error("AS has already sent data for this service")]
    DuplicateAsData,

    #[error("Service data is already satisfied")]
    ServiceDataSatisfied,

    #[error("Only the requester may close a request")]
    NotRequester,

    #[error("Invalid accessor public key: {0}")]
    InvalidAccessorKey(String),

    #[error("Invalid check string")]
    InvalidCheckString,

    #[error("Identifier count limit exceeded for namespace {0}")]
    IdentifierLimitExceeded(String),

    #[error("Node key signature mismatch")]
    NodeKeySignatureMismatch,

    #[error("Master key signature mismatch")]
    MasterKeySignatureMismatch,

    #[error("Identity association mismatch: {0}")]
    IdentityMismatch(String),

    #[error("Node role does not support this update")]
    UnsupportedUpdate,

    #[error("Identity is already in mode 3")]
    AlreadyModeThree,

    #[error("Namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Service already exists: {0}")]
    ServiceAlreadyExists(String),

    #[error("Node already exists: {0}")]
    NodeAlreadyExists(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> u32 {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidParameter(_) => {
                VALIDATION_ERROR_CODE
            }
            ServiceError::MissingUpdateField => 20003,
            ServiceError::NodeNotFound(_) => 20005,
            ServiceError::AccessorNotFound(_) => 20011,
            ServiceError::RequestNotFound(_) => 20012,
            ServiceError::NamespaceDisabled(_) => 20013,
            ServiceError::IdentityNotFound => 20014,
            ServiceError::ServiceNotFound(_) => 20015,
            ServiceError::RoleNotPermitted(_) => 20016,
            ServiceError::NotEnoughIdps { .. } => 20017,
            ServiceError::InvalidDataRequest(_) => 20018,
            ServiceError::IdentityAlreadyOnboarded => 20019,
            ServiceError::RequestClosed => 20025,
            ServiceError::RequestTimedOut => 20026,
            ServiceError::IdpNotAssociated(_) => 20038,
            ServiceError::IdpNotRequested(_) => 20039,
            ServiceError::DuplicateResponse(_) => 20042,
            ServiceError::NoDataRequest { .. } => 20043,
            ServiceError::ConsentNotSatisfied => 20044,
            ServiceError::AssuranceTooLow => 20045,
            ServiceError::DuplicateAsData => 20046,
            ServiceError::ServiceDataSatisfied => 20047,
            ServiceError::NotRequester => 20048,
            ServiceError::InvalidAccessorKey(_) => 20049,
            ServiceError::InvalidCheckString => 20050,
            ServiceError::IdentifierLimitExceeded(_) => 20060,
            ServiceError::NodeKeySignatureMismatch => 20063,
            ServiceError::MasterKeySignatureMismatch => 20064,
            ServiceError::IdentityMismatch(_) => 20071,
            ServiceError::UnsupportedUpdate => 20072,
            ServiceError::AlreadyModeThree => 20073,
            ServiceError::NamespaceExists(_) => 25013,
            ServiceError::NamespaceNotFound(_) => 25014,
            ServiceError::ServiceAlreadyExists(_) => 25015,
            ServiceError::NodeAlreadyExists(_) => 25016,
            ServiceError::Internal(_) => service_core::error::INTERNAL_ERROR_CODE,
        }
    }

    /// The `error` object carried by failed callback results.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::RequestNotFound(_)
            | ServiceError::NamespaceNotFound(_)
            | ServiceError::NodeNotFound(_) => AppError::not_found(code, err.to_string()),
            other => AppError::bad_request(code, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_request_not_found_is_404() {
        let err: AppError = ServiceError::RequestNotFound("abc".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), 20012);
    }

    #[test]
    fn test_business_rule_is_400() {
        let err: AppError = ServiceError::DuplicateResponse("idp1".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), 20042);
    }

    #[test]
    fn test_error_body_carries_code_and_message() {
        let body = ServiceError::RequestTimedOut.to_body();
        assert_eq!(body.code, 20026);
        assert_eq!(body.message, "Request has timed out");
    }
}
