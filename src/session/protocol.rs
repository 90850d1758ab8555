//! Wire messages for the bidirectional realtime session.
//!
//! The transport speaks the `BidiGenerateContent` JSON protocol: one `setup`
//! message configures the connection, then `realtimeInput` carries outbound
//! audio and `toolResponse` acknowledges tool calls; inbound frames are
//! `setupComplete`, `serverContent` and `toolCall` messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSpec;

// ==========================================
// 1. Outbound (client -> server)
// ==========================================

#[derive(Serialize, Debug)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolDeclarations>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    pub function_declarations: Vec<ToolSpec>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub tool_response: ToolResponsePayload,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponsePayload {
    pub function_responses: Vec<FunctionResponse>,
}

/// Exactly one of these goes back per dispatched request id.
#[derive(Serialize, Debug, Clone)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl SetupMessage {
    pub fn new(
        model: &str,
        voice: &str,
        system_instruction: String,
        declarations: Vec<ToolSpec>,
    ) -> Self {
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content::text(system_instruction),
                tools: vec![ToolDeclarations {
                    function_declarations: declarations,
                }],
            },
        }
    }
}

impl RealtimeInputMessage {
    /// Wrap one encoded PCM16 chunk as realtime input.
    pub fn pcm_chunk(data_b64: String, sample_rate: u32) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: format!("audio/pcm;rate={}", sample_rate),
                    data: data_b64,
                }],
            },
        }
    }
}

// ==========================================
// 2. Shared content shapes
// ==========================================

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: String) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text),
                inline_data: None,
            }],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

// ==========================================
// 3. Inbound (server -> client)
// ==========================================

/// One inbound frame. A single message may carry several independent parts
/// (audio and a tool call batch, for instance); each is handled on its own.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_message_shape() {
        let msg = SetupMessage::new(
            "models/test-model",
            "Kore",
            "Be brief.".to_string(),
            vec![],
        );
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["setup"]["model"], "models/test-model");
        assert_eq!(
            v["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            v["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
    }

    #[test]
    fn realtime_input_carries_the_mime_rate() {
        let msg = RealtimeInputMessage::pcm_chunk("QUJD".to_string(), 16000);
        let v = serde_json::to_value(&msg).unwrap();
        let chunk = &v["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "QUJD");
    }

    #[test]
    fn parses_audio_server_content() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{
                        "inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}
                    }]
                }
            }
        }))
        .unwrap();
        let content = msg.server_content.unwrap();
        let part = &content.model_turn.unwrap().parts[0];
        let inline = part.inline_data.as_ref().unwrap();
        assert!(inline.mime_type.starts_with("audio/pcm"));
        assert_eq!(inline.data, "AAAA");
    }

    #[test]
    fn parses_tool_call_batch_and_markers() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {"turnComplete": true, "interrupted": true},
            "toolCall": {"functionCalls": [
                {"id": "call-1", "name": "switchContext", "args": {"appName": "Spotify"}},
                {"id": "call-2", "name": "edit_file", "args": {}}
            ]}
        }))
        .unwrap();
        let content = msg.server_content.as_ref().unwrap();
        assert_eq!(content.turn_complete, Some(true));
        assert_eq!(content.interrupted, Some(true));
        let calls = &msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].args["appName"], "Spotify");
    }

    #[test]
    fn parses_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }
}
