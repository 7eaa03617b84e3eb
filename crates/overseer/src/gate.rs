//! Version Compatibility Gate
//!
//! Every message declares the wire protocol it was written with. Anything
//! older than the configured minimum is refused before its body is decoded
//! or any handler runs, so a refused message can never leave partial state
//! behind.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use tessera_common::constants::headers::{X_CLIENT_VERSION, X_PROTOCOL_VERSION};
use tessera_common::protocol::EnvelopeHeader;
use tessera_common::{ClientBuildIdentity, Envelope, ProtocolVersion, TesseraError};

use crate::routes::ApiError;

/// Gate admitting messages at or above a minimum protocol version
#[derive(Debug, Clone, Copy)]
pub struct VersionGate {
    minimum: ProtocolVersion,
}

/// Why a datagram was not admitted
#[derive(Debug)]
pub struct Refusal {
    /// Request id, when the header was readable
    pub request_id: Option<u64>,
    pub error: TesseraError,
}

impl VersionGate {
    pub fn new(minimum: ProtocolVersion) -> Self {
        Self { minimum }
    }

    pub fn minimum(&self) -> ProtocolVersion {
        self.minimum
    }

    /// Check a declared protocol version
    pub fn check(&self, declared: ProtocolVersion) -> Result<(), TesseraError> {
        if declared < self.minimum {
            return Err(TesseraError::IncompatibleProtocol {
                declared,
                minimum: self.minimum,
            });
        }
        Ok(())
    }

    /// Decode a datagram, checking its header before touching the body
    pub fn admit_datagram<T: DeserializeOwned>(&self, data: &[u8]) -> Result<Envelope<T>, Refusal> {
        let header: EnvelopeHeader = serde_json::from_slice(data).map_err(|e| Refusal {
            request_id: None,
            error: e.into(),
        })?;

        self.check(header.protocol_version).map_err(|error| Refusal {
            request_id: Some(header.request_id),
            error,
        })?;

        serde_json::from_slice(data).map_err(|e| Refusal {
            request_id: Some(header.request_id),
            error: e.into(),
        })
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new(ProtocolVersion::MIN_COMPATIBLE)
    }
}

/// Axum middleware enforcing the gate on HTTP calls
pub async fn require_protocol(
    State(gate): State<VersionGate>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();

    let declared = match headers.get(X_PROTOCOL_VERSION).map(|v| v.to_str()) {
        Some(Ok(raw)) => match raw.parse::<ProtocolVersion>() {
            Ok(version) => version,
            Err(err) => return ApiError(err).into_response(),
        },
        Some(Err(_)) => {
            return ApiError(TesseraError::InvalidInput(format!(
                "{} is not valid text",
                X_PROTOCOL_VERSION
            )))
            .into_response();
        }
        None => {
            return ApiError(TesseraError::InvalidInput(format!(
                "missing {} header",
                X_PROTOCOL_VERSION
            )))
            .into_response();
        }
    };

    if let Err(err) = gate.check(declared) {
        tracing::warn!(
            declared = %declared,
            minimum = %gate.minimum(),
            path = %request.uri().path(),
            "Rejected request from incompatible protocol"
        );
        return ApiError(err).into_response();
    }

    // Advisory only; malformed values become the Unknown sentinel
    let client = headers
        .get(X_CLIENT_VERSION)
        .and_then(|v| v.to_str().ok())
        .map(ClientBuildIdentity::parse)
        .unwrap_or_default();
    tracing::trace!(client = %client, protocol = %declared, "Admitted request");

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::{FailureMonitoringRequest, PeerIdentity};

    fn datagram(version: &str) -> Vec<u8> {
        format!(
            r#"{{"protocol_version":"{}","request_id":3,"body":{{"addresses":["127.0.0.1:1"]}}}}"#,
            version
        )
        .into_bytes()
    }

    #[test]
    fn test_check_boundaries() {
        let gate = VersionGate::new(ProtocolVersion::new(100));
        assert!(gate.check(ProtocolVersion::new(100)).is_ok());
        assert!(gate.check(ProtocolVersion::new(101)).is_ok());
        assert!(matches!(
            gate.check(ProtocolVersion::new(99)),
            Err(TesseraError::IncompatibleProtocol { .. })
        ));
    }

    #[test]
    fn test_admits_current_datagram() {
        let gate = VersionGate::default();
        let envelope: Envelope<FailureMonitoringRequest> =
            gate.admit_datagram(&datagram("0fdb00b063010001")).unwrap();

        assert_eq!(envelope.request_id, 3);
        assert_eq!(envelope.body.addresses, PeerIdentity::single("127.0.0.1:1".parse().unwrap()));
    }

    #[test]
    fn test_old_datagram_refused_before_body() {
        let gate = VersionGate::default();
        // The body would not even decode; the refusal must be about the version
        let raw = br#"{"protocol_version":"0000000000000001","request_id":9,"body":"garbage"}"#;
        let refusal = gate.admit_datagram::<FailureMonitoringRequest>(raw).unwrap_err();

        assert_eq!(refusal.request_id, Some(9));
        assert!(matches!(refusal.error, TesseraError::IncompatibleProtocol { .. }));
    }

    #[test]
    fn test_unreadable_header() {
        let gate = VersionGate::default();
        let refusal = gate.admit_datagram::<FailureMonitoringRequest>(b"not json").unwrap_err();
        assert_eq!(refusal.request_id, None);
        assert!(matches!(refusal.error, TesseraError::Codec(_)));
    }
}
