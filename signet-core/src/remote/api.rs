//! Wire types of the send-as settings API.

use serde::{Deserialize, Serialize};

/// One send-as identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAs {
    pub send_as_email: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub is_primary: bool,

    #[serde(default)]
    pub signature: String,
}

/// Response of the list call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAsList {
    #[serde(default)]
    pub send_as: Vec<SendAs>,
}

/// Body of the patch call.
#[derive(Debug, Clone, Serialize)]
pub struct SignaturePatch<'a> {
    pub signature: &'a str,
}

/// Identity echoed back by the patch call. Only the stored signature matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchEcho {
    pub signature: Option<String>,
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_as_list_parses_partial_records() {
        let body = r#"{"sendAs": [
            {"sendAsEmail": "user@x.com", "displayName": "User", "isPrimary": true, "signature": "<p>A</p>"},
            {"sendAsEmail": "sales@x.com"}
        ]}"#;
        let list: SendAsList = serde_json::from_str(body).unwrap();
        assert_eq!(list.send_as.len(), 2);
        assert!(list.send_as[0].is_primary);
        assert_eq!(list.send_as[1].signature, "");
    }

    #[test]
    fn test_error_envelope() {
        let env: ErrorEnvelope =
            serde_json::from_str(r#"{"error": {"code": 404, "message": "Requested entity was not found."}}"#)
                .unwrap();
        assert_eq!(env.error.message, "Requested entity was not found.");
    }
}
