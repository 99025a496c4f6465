use thiserror::Error;

/// A resource could not be built from its initialization payload.
///
/// Construction is all-or-nothing: when one of these is returned no node was
/// inserted into the graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("{resource} created without an initial {field}")]
    MissingField { resource: String, field: String },

    #[error("{resource} created with an invalid {field}: {reason}")]
    InvalidField {
        resource: String,
        field: String,
        reason: String,
    },

    #[error("{resource} created without an initialization payload")]
    NoInitPayload { resource: String },

    #[error("{resource} initialization payload is not usable: {reason}")]
    InvalidPayload { resource: String, reason: String },
}

/// The fetch collaborator failed. A resource that does not exist is not a
/// failure; fetchers report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("fetching {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_message_names_resource_and_field() {
        let err = ConstructionError::MissingField {
            resource: "Server \"localhost,/wlp/usr,server1\"".to_string(),
            field: "apps.up tally".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Server \"localhost,/wlp/usr,server1\" created without an initial apps.up tally"
        );
    }
}
