//! JSON control envelopes returned by the polling endpoints.

use serde::{Deserialize, Serialize};

/// Body text of a generic rejection.
pub const INVALID_REQUEST: &str = "Invalid Request";

/// Acknowledgement returned by CONNECT and SEND, and by any request naming
/// an unknown connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Whether the operation succeeded.
    pub success: bool,

    /// The assigned identifier (CONNECT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,

    /// Set when the connection is unknown or already closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
}

impl Ack {
    /// `{"success":true}`
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            conn_id: None,
            closed: None,
        }
    }

    /// `{"success":true,"connId":"..."}`
    #[must_use]
    pub fn connected(conn_id: String) -> Self {
        Self {
            success: true,
            conn_id: Some(conn_id),
            closed: None,
        }
    }

    /// `{"success":false,"closed":true}`
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            success: false,
            conn_id: None,
            closed: Some(true),
        }
    }

    /// Whether the server reported the connection as closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        assert_eq!(serde_json::to_string(&Ack::ok()).expect("json"), r#"{"success":true}"#);
        assert_eq!(
            serde_json::to_string(&Ack::connected("ab".into())).expect("json"),
            r#"{"success":true,"connId":"ab"}"#
        );
        assert_eq!(
            serde_json::to_string(&Ack::closed()).expect("json"),
            r#"{"success":false,"closed":true}"#
        );
    }

    #[test]
    fn rejection_string_is_not_an_ack() {
        let body = serde_json::to_string(INVALID_REQUEST).expect("json");
        assert!(serde_json::from_str::<Ack>(&body).is_err());
    }
}
