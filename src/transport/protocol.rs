//! Live session wire protocol
//!
//! JSON messages exchanged with the bidirectional live speech endpoint.
//! The first client frame is a setup message; after the server replies with
//! `setupComplete`, the client streams `realtimeInput` audio and answers tool
//! calls with `toolResponse`.

use serde::Serialize;
use serde_json::{Value, json};

use super::TransportEvent;
use crate::Result;
use crate::config::LiveConfig;
use crate::conversation::Mood;

/// Name of the single declared tool
pub const SET_MOOD_TOOL: &str = "setMood";

/// Top-level setup message
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Empty object enabling transcription of one audio direction
#[derive(Debug, Default, Serialize)]
pub struct TranscriptionConfig {}

/// Build the setup message for a session
#[must_use]
pub fn build_setup_message(config: &LiveConfig) -> SetupMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            tools: vec![Tool {
                function_declarations: vec![set_mood_declaration()],
            }],
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
        },
    }
}

fn set_mood_declaration() -> FunctionDeclaration {
    let moods: Vec<&str> = Mood::ALL.iter().map(|m| m.as_str()).collect();
    FunctionDeclaration {
        name: SET_MOOD_TOOL.to_string(),
        description: "Set the avatar mood to match the emotional tone of the conversation"
            .to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "mood": {
                    "type": "STRING",
                    "enum": moods,
                    "description": "The mood to display"
                }
            },
            "required": ["mood"]
        }),
    }
}

/// Audio input message
#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// Audio chunk with MIME type and base64-encoded data
#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// MIME type for 16-bit PCM at `sample_rate`
#[must_use]
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Wrap an encoded frame for sending
///
/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
#[must_use]
pub fn build_audio_message(payload: String, mime_type: &str) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data: payload,
            }],
        },
    }
}

/// Acknowledge a tool call with the fixed success payload
#[must_use]
pub fn build_tool_response(id: &str, name: &str) -> Value {
    json!({
        "toolResponse": {
            "functionResponses": [{
                "id": id,
                "name": name,
                "response": { "result": "ok" }
            }]
        }
    })
}

/// Tell the server the microphone stopped
#[must_use]
pub fn build_audio_stream_end_message() -> Value {
    json!({
        "realtimeInput": {
            "audioStreamEnd": true
        }
    })
}

/// Parse one server frame into events, in the order they should be handled
///
/// # Errors
///
/// Returns error if the frame is not JSON
pub fn parse_server_message(text: &str) -> Result<Vec<TransportEvent>> {
    let value: Value = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(TransportEvent::Opened);
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        for call in calls {
            let Some(name) = call.get("name").and_then(Value::as_str) else {
                tracing::warn!(call = %call, "tool call without a name");
                continue;
            };
            events.push(TransportEvent::ToolCall {
                id: str_field(call, "id"),
                name: name.to_string(),
                args: call.get("args").cloned().unwrap_or(Value::Null),
            });
        }
    }

    if let Some(content) = value.get("serverContent") {
        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            events.push(TransportEvent::Interrupted);
        }

        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                let Some(inline) = part.get("inlineData") else {
                    continue;
                };
                let is_audio = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .is_none_or(|mime| mime.starts_with("audio/"));
                if let (true, Some(data)) = (is_audio, inline.get("data").and_then(Value::as_str))
                {
                    events.push(TransportEvent::Audio(data.to_string()));
                }
            }
        }

        push_transcripts(content, &mut events);

        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(TransportEvent::TurnComplete);
        }
    }

    // Some revisions of the API send transcriptions at the top level
    push_transcripts(&value, &mut events);

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        events.push(TransportEvent::Error(message.to_string()));
    }

    Ok(events)
}

fn push_transcripts(container: &Value, events: &mut Vec<TransportEvent>) {
    if let Some(text) = transcript_text(container, "inputTranscription") {
        events.push(TransportEvent::InputTranscript(text));
    }
    if let Some(text) = transcript_text(container, "outputTranscription") {
        events.push(TransportEvent::OutputTranscript(text));
    }
}

fn transcript_text(container: &Value, key: &str) -> Option<String> {
    container
        .get(key)?
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_declares_audio_voice_tool_and_transcription() {
        let setup = serde_json::to_value(build_setup_message(&LiveConfig::default())).unwrap();
        let payload = &setup["setup"];

        assert!(payload["model"].as_str().unwrap().starts_with("models/"));
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Aoede"
        );
        assert_eq!(payload["inputAudioTranscription"], json!({}));
        assert_eq!(payload["outputAudioTranscription"], json!({}));

        let declarations = payload["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0]["name"], SET_MOOD_TOOL);
        assert_eq!(declarations[0]["parameters"]["required"], json!(["mood"]));
        let moods = declarations[0]["parameters"]["properties"]["mood"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(moods.len(), 8);
        assert!(moods.contains(&json!("NEUTRAL")));
    }

    #[test]
    fn audio_message_wire_format() {
        let msg = serde_json::to_value(build_audio_message("AAA=".to_string(), &pcm_mime(16_000)))
            .unwrap();
        assert_eq!(
            msg,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}]}})
        );
    }

    #[test]
    fn tool_response_carries_id_and_ok() {
        let msg = build_tool_response("call-1", SET_MOOD_TOOL);
        let response = &msg["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "call-1");
        assert_eq!(response["response"]["result"], "ok");
    }

    #[test]
    fn parses_setup_complete() {
        let events = parse_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![TransportEvent::Opened]);
    }

    #[test]
    fn parses_tool_calls() {
        let events = parse_server_message(
            r#"{"toolCall": {"functionCalls": [
                {"id": "a", "name": "setMood", "args": {"mood": "HAPPY"}},
                {"id": "b", "name": "setMood", "args": {"mood": "FURIOUS"}}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            TransportEvent::ToolCall {
                id: "a".to_string(),
                name: "setMood".to_string(),
                args: json!({"mood": "HAPPY"}),
            }
        );
    }

    #[test]
    fn server_content_ordering() {
        let events = parse_server_message(
            r#"{"serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "thinking"}
                ]},
                "outputTranscription": {"text": "Hola"},
                "inputTranscription": {"text": "Hello"},
                "turnComplete": true
            }}"#,
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                TransportEvent::Interrupted,
                TransportEvent::Audio("AAAA".to_string()),
                TransportEvent::InputTranscript("Hello".to_string()),
                TransportEvent::OutputTranscript("Hola".to_string()),
                TransportEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn top_level_transcription_and_error() {
        let events = parse_server_message(
            r#"{"outputTranscription": {"text": "Bonjour"}, "error": {"message": "503 UNAVAILABLE"}}"#,
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                TransportEvent::OutputTranscript("Bonjour".to_string()),
                TransportEvent::Error("503 UNAVAILABLE".to_string()),
            ]
        );
    }

    #[test]
    fn empty_transcripts_are_skipped() {
        let events =
            parse_server_message(r#"{"serverContent": {"inputTranscription": {"text": ""}}}"#)
                .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn non_json_is_error() {
        assert!(parse_server_message("not json").is_err());
    }
}
