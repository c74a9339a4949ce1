//! Wire protocol types for both legs of the proxy.
//!
//! Three vocabularies, each a single tag-discriminated enum so the
//! translation table in [`crate::session`] is exhaustively checkable:
//!
//! - [`ClientEvent`] — what the client may send us.
//! - [`UpstreamEvent`] — what the upstream service sends us.
//! - [`ServerEvent`] — what we send the client.
//! - [`UpstreamCommand`] — what we send the upstream service.
//!
//! Unknown `type` discriminators fail deserialization; callers log and
//! drop them rather than treating them as fatal.

use parley_types::Usage;
use serde::{Deserialize, Serialize};

/// Messages accepted from the client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio {
        /// Base64-encoded audio chunk.
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    CommitAudio,
    #[serde(rename = "input_audio_buffer.clear")]
    ClearAudio,
    #[serde(rename = "conversation.item.create")]
    CreateItem { item: serde_json::Value },
    #[serde(rename = "response.create")]
    CreateResponse,
    #[serde(rename = "response.cancel")]
    CancelResponse,
    #[serde(rename = "ping")]
    Ping,
}

/// Token accounting block attached to upstream completion events.
///
/// Field names follow the upstream convention; absent fields default to
/// zero so partial reports still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_token_details: TokenDetails,
    #[serde(default)]
    pub output_token_details: TokenDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub audio_tokens: u64,
}

impl UsageReport {
    /// Flattens the report into the session's counter shape.
    pub fn to_usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            input_audio_tokens: self.input_token_details.audio_tokens,
            output_audio_tokens: self.output_token_details.audio_tokens,
        }
    }
}

/// Events received from the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: serde_json::Value },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: serde_json::Value },
    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: serde_json::Value },
    #[serde(rename = "input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated { response: serde_json::Value },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone,
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        usage: UsageReport,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: serde_json::Value },
    #[serde(rename = "error")]
    Error { message: String },
}

impl UpstreamEvent {
    /// Type-for-type translation to the client wire. Exhaustive by
    /// construction: adding an upstream variant without deciding its
    /// client-side shape fails to compile.
    pub fn into_server_event(self) -> ServerEvent {
        match self {
            Self::SessionCreated { session } => ServerEvent::SessionCreated { session },
            Self::SessionUpdated { session } => ServerEvent::SessionUpdated { session },
            Self::ItemCreated { item } => ServerEvent::ItemCreated { item },
            Self::TranscriptionCompleted { item_id, transcript } => {
                ServerEvent::TranscriptionCompleted { item_id, transcript }
            }
            Self::ResponseCreated { response } => ServerEvent::ResponseCreated { response },
            Self::AudioDelta { delta } => ServerEvent::AudioDelta { delta },
            Self::AudioDone => ServerEvent::AudioDone,
            Self::TextDelta { delta } => ServerEvent::TextDelta { delta },
            Self::TextDone { text } => ServerEvent::TextDone { text },
            Self::FunctionCallArgumentsDelta { call_id, delta } => {
                ServerEvent::FunctionCallArgumentsDelta { call_id, delta }
            }
            Self::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            },
            Self::ResponseDone { usage } => ServerEvent::ResponseDone { usage },
            Self::RateLimitsUpdated { rate_limits } => {
                ServerEvent::RateLimitsUpdated { rate_limits }
            }
            Self::Error { message } => ServerEvent::Error { message },
        }
    }
}

/// Events sent to the client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: serde_json::Value },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: serde_json::Value },
    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: serde_json::Value },
    #[serde(rename = "input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated { response: serde_json::Value },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone,
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone { usage: UsageReport },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated { rate_limits: serde_json::Value },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "disconnected")]
    Disconnected { reason: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Session configuration sent to the upstream service as the first frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionProfile {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<serde_json::Value>,
    /// Tool declarations, as produced by the registry's specs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
}

/// Commands sent to the upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionProfile },
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    CommitAudio,
    #[serde(rename = "input_audio_buffer.clear")]
    ClearAudio,
    #[serde(rename = "conversation.item.create")]
    CreateItem { item: serde_json::Value },
    #[serde(rename = "response.create")]
    CreateResponse,
    #[serde(rename = "response.cancel")]
    CancelResponse,
}

impl UpstreamCommand {
    /// Builds the result item for a completed tool call. The upstream
    /// protocol requires a response to every call, so this is the only
    /// way tool outcomes leave the proxy.
    pub fn function_call_output(call_id: &str, output: String) -> Self {
        Self::CreateItem {
            item: serde_json::json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_from_wire_json() {
        let append: ClientEvent =
            serde_json::from_value(json!({"type": "input_audio_buffer.append", "audio": "AAAA"}))
                .unwrap();
        assert_eq!(
            append,
            ClientEvent::AppendAudio {
                audio: "AAAA".to_string()
            }
        );

        let commit: ClientEvent =
            serde_json::from_value(json!({"type": "input_audio_buffer.commit"})).unwrap();
        assert_eq!(commit, ClientEvent::CommitAudio);

        let ping: ClientEvent = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn unknown_client_type_fails_to_parse() {
        let result = serde_json::from_value::<ClientEvent>(json!({"type": "warp.speed"}));
        assert!(result.is_err());
    }

    #[test]
    fn upstream_response_done_parses_partial_usage() {
        let event: UpstreamEvent = serde_json::from_value(json!({
            "type": "response.done",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        let UpstreamEvent::ResponseDone { usage } = event else {
            panic!("expected response.done");
        };
        let usage = usage.to_usage();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.input_audio_tokens, 0);
        assert_eq!(usage.output_audio_tokens, 0);
    }

    #[test]
    fn upstream_response_done_parses_audio_token_details() {
        let event: UpstreamEvent = serde_json::from_value(json!({
            "type": "response.done",
            "usage": {
                "input_tokens": 5,
                "output_tokens": 9,
                "input_token_details": {"audio_tokens": 4},
                "output_token_details": {"audio_tokens": 8}
            }
        }))
        .unwrap();

        let UpstreamEvent::ResponseDone { usage } = event else {
            panic!("expected response.done");
        };
        let usage = usage.to_usage();
        assert_eq!(usage.input_audio_tokens, 4);
        assert_eq!(usage.output_audio_tokens, 8);
    }

    #[test]
    fn upstream_events_ignore_extra_fields() {
        let event: UpstreamEvent = serde_json::from_value(json!({
            "type": "response.audio.delta",
            "event_id": "ev_123",
            "response_id": "resp_1",
            "delta": "b64audio"
        }))
        .unwrap();
        assert_eq!(
            event,
            UpstreamEvent::AudioDelta {
                delta: "b64audio".to_string()
            }
        );
    }

    #[test]
    fn translation_preserves_the_wire_type_tag() {
        let upstream: UpstreamEvent = serde_json::from_value(json!({
            "type": "response.text.delta",
            "delta": "hel"
        }))
        .unwrap();

        let server = upstream.into_server_event();
        let wire = serde_json::to_value(&server).unwrap();
        assert_eq!(wire["type"], "response.text.delta");
        assert_eq!(wire["delta"], "hel");
    }

    #[test]
    fn function_call_output_item_shape() {
        let cmd = UpstreamCommand::function_call_output("call_7", r#"{"success":true}"#.into());
        let wire = serde_json::to_value(&cmd).unwrap();
        assert_eq!(wire["type"], "conversation.item.create");
        assert_eq!(wire["item"]["type"], "function_call_output");
        assert_eq!(wire["item"]["call_id"], "call_7");
        assert_eq!(wire["item"]["output"], r#"{"success":true}"#);
    }

    #[test]
    fn session_profile_omits_unset_fields() {
        let profile = SessionProfile {
            modalities: vec!["audio".into(), "text".into()],
            ..SessionProfile::default()
        };
        let wire =
            serde_json::to_value(&UpstreamCommand::SessionUpdate { session: profile }).unwrap();
        assert_eq!(wire["type"], "session.update");
        assert_eq!(wire["session"]["modalities"][0], "audio");
        assert!(wire["session"].get("voice").is_none());
        assert!(wire["session"].get("tools").is_none());
    }
}
