// Error taxonomy shared by every orchestrator in the engine

use std::fmt;
use thiserror::Error;

// Entities that can be looked up and not found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Hotel,
    Order,
    City,
    Amenity,
    AmenityCategory,
    Badge,
    Faq,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Hotel => "hotel",
            Entity::Order => "order",
            Entity::City => "city",
            Entity::Amenity => "amenity",
            Entity::AmenityCategory => "amenity category",
            Entity::Badge => "badge",
            Entity::Faq => "faq",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} cannot be found")]
    NotFound(Entity),

    #[error("app already trying to sync")]
    AlreadyInSyncing,

    #[error("app already trying to update hotels")]
    AlreadyUpdatingHotels,

    #[error("reserving this hotel is only possible in production")]
    HotelReserveForbidden,

    #[error("the requested room is not available")]
    RoomNotAvailable,

    #[error(
        "check-in/check-out dates do not match: requested {requested_check_in}..{requested_check_out}, supplier returned {supplier_check_in}..{supplier_check_out}"
    )]
    DatesNotMatch {
        requested_check_in: String,
        requested_check_out: String,
        supplier_check_in: String,
        supplier_check_out: String,
    },

    #[error("maximum tries reached after {attempts} attempts")]
    MaxTriesReached { attempts: usize },

    #[error("supplier error: {0}")]
    Upstream(String),

    #[error("lock broker error: {0}")]
    LockBroker(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

// Closed classification used at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyRunning,
    Forbidden,
    Inconsistent,
    Exhausted,
    UpstreamUnavailable,
    ValidationFailed,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyInSyncing | EngineError::AlreadyUpdatingHotels => {
                ErrorKind::AlreadyRunning
            }
            EngineError::HotelReserveForbidden => ErrorKind::Forbidden,
            EngineError::DatesNotMatch { .. } => ErrorKind::Inconsistent,
            EngineError::MaxTriesReached { .. } => ErrorKind::Exhausted,
            EngineError::Upstream(_) | EngineError::LockBroker(_) => {
                ErrorKind::UpstreamUnavailable
            }
            EngineError::Validation(_) | EngineError::RoomNotAvailable => {
                ErrorKind::ValidationFailed
            }
            EngineError::Persistence(_) | EngineError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Status code the HTTP layer answers with. The message itself is kept
    /// by the caller for diagnostics.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            _ => 400,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Upstream(format!("invalid supplier payload: {}", err))
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::LockBroker(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(EngineError::NotFound(Entity::Order), 404)]
    #[test_case(EngineError::NotFound(Entity::City), 404)]
    #[test_case(EngineError::HotelReserveForbidden, 403)]
    #[test_case(EngineError::AlreadyInSyncing, 400)]
    #[test_case(EngineError::MaxTriesReached { attempts: 3 }, 400)]
    #[test_case(EngineError::Upstream("timeout".to_string()), 400)]
    fn maps_errors_to_http_status(err: EngineError, status: u16) {
        assert_eq!(err.http_status(), status);
    }

    #[test]
    fn keeps_message_for_diagnostics() {
        let err = EngineError::NotFound(Entity::AmenityCategory);
        assert_eq!(err.to_string(), "amenity category cannot be found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
