use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The wire envelope exchanged between every pair of linked endpoints.
///
/// A message is exactly one of: fresh request, streaming-request
/// continuation, response, streaming-response continuation, or cancel. See
/// [`RpcMessage::kind`] for the classification rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cont: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Classification of a [`RpcMessage`] along the axes the router and the RPC
/// endpoint actually branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// First frame of a call: carries `command`, optionally `reqId`.
    FreshRequest,
    /// A later frame of a streaming request body (rare in this fabric, kept
    /// for symmetry with streaming responses): `reqId` set, no `resId`.
    RequestContinuation,
    /// A response frame, terminal or not: `resId` set.
    Response,
    /// A cancel frame: `cancel` is set; carries exactly one of `reqId`/`resId`.
    Cancel,
}

/// A [`RpcMessage`] that failed the validation rules in the spec's data
/// model section.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MessageValidationError {
    #[error("message carries both reqId and resId")]
    BothReqAndResId,
    #[error("command frame must not carry resId or error")]
    CommandFrameCarriesResponseFields,
    #[error("cancel frame must carry exactly one of reqId/resId")]
    CancelMissingId,
    #[error("cancel frame must not carry data")]
    CancelCarriesData,
    #[error("frame has neither command, reqId, nor resId")]
    Empty,
}

impl RpcMessage {
    pub fn validate(&self) -> Result<FrameKind, MessageValidationError> {
        if self.req_id.is_some() && self.res_id.is_some() {
            return Err(MessageValidationError::BothReqAndResId);
        }
        if self.cancel {
            match (&self.req_id, &self.res_id) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => return Err(MessageValidationError::CancelMissingId),
            }
            if self.data.is_some() {
                return Err(MessageValidationError::CancelCarriesData);
            }
            return Ok(FrameKind::Cancel);
        }
        if let Some(command) = &self.command {
            if !command.is_empty() {
                if self.res_id.is_some() || self.error.is_some() {
                    return Err(MessageValidationError::CommandFrameCarriesResponseFields);
                }
                return Ok(FrameKind::FreshRequest);
            }
        }
        if self.res_id.is_some() {
            return Ok(FrameKind::Response);
        }
        if self.req_id.is_some() {
            return Ok(FrameKind::RequestContinuation);
        }
        Err(MessageValidationError::Empty)
    }

    /// Build a fresh request frame. `timeout_ms <= 0` is normalized away by
    /// callers in `wsh-rpc`; this constructor stores whatever it is given.
    pub fn request(
        command: impl Into<String>,
        req_id: impl Into<String>,
        route: Option<String>,
        data: Option<Value>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            command: Some(command.into()),
            req_id: Some(req_id.into()),
            route,
            timeout: timeout_ms,
            data,
            ..Default::default()
        }
    }

    /// Build a fire-and-forget frame (no `reqId`, no response expected).
    pub fn fire_and_forget(
        command: impl Into<String>,
        route: Option<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            command: Some(command.into()),
            route,
            data,
            ..Default::default()
        }
    }

    pub fn response(req_id: impl Into<String>, data: Option<Value>, cont: bool) -> Self {
        Self {
            res_id: Some(req_id.into()),
            cont,
            data,
            ..Default::default()
        }
    }

    pub fn error_response(req_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            res_id: Some(req_id.into()),
            cont: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn cancel_request(req_id: impl Into<String>) -> Self {
        Self {
            req_id: Some(req_id.into()),
            cancel: true,
            ..Default::default()
        }
    }

    pub fn cancel_response(res_id: impl Into<String>) -> Self {
        Self {
            res_id: Some(res_id.into()),
            cancel: true,
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.res_id.is_some() && (!self.cont || self.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_fresh_request() {
        let msg = RpcMessage::request("echo", "r1", None, None, None);
        assert_eq!(msg.validate().unwrap(), FrameKind::FreshRequest);
    }

    #[test]
    fn classifies_response() {
        let msg = RpcMessage::response("r1", Some(Value::from("hi")), false);
        assert_eq!(msg.validate().unwrap(), FrameKind::Response);
        assert!(msg.is_terminal());
    }

    #[test]
    fn streaming_response_is_not_terminal_until_cont_false() {
        let msg = RpcMessage::response("r1", Some(Value::from(1)), true);
        assert!(!msg.is_terminal());
    }

    #[test]
    fn rejects_both_ids() {
        let mut msg = RpcMessage::request("echo", "r1", None, None, None);
        msg.res_id = Some("r1".to_string());
        assert_eq!(
            msg.validate().unwrap_err(),
            MessageValidationError::BothReqAndResId
        );
    }

    #[test]
    fn rejects_cancel_without_id() {
        let msg = RpcMessage {
            cancel: true,
            ..Default::default()
        };
        assert_eq!(
            msg.validate().unwrap_err(),
            MessageValidationError::CancelMissingId
        );
    }

    #[test]
    fn rejects_cancel_with_data() {
        let mut msg = RpcMessage::cancel_request("r1");
        msg.data = Some(Value::from(1));
        assert_eq!(
            msg.validate().unwrap_err(),
            MessageValidationError::CancelCarriesData
        );
    }

    #[test]
    fn wire_format_omits_defaults() {
        let msg = RpcMessage::request("echo", "r1", None, Some(Value::from("hi")), None);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "echo", "reqId": "r1", "data": "hi"})
        );
    }

    #[test]
    fn round_trips_through_json() {
        let msg = RpcMessage::request(
            "echo",
            "r1",
            Some("conn:abc".to_string()),
            Some(Value::from(42)),
            Some(500),
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: RpcMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
