//! Wire frames exchanged with the remote model service
//!
//! Every logical frame is one JSON object. Outbound frames are typed and
//! serialized with serde; inbound frames are parsed into [`InboundFrame`].
//! Field spellings follow the service exactly, including its mix of
//! `camelCase` and `snake_case` keys (audio chunks carry `mimeType`, image
//! chunks carry `mime_type`).

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::DEFAULT_MODEL;
use crate::error::ProtocolError;

/// MIME type of outbound microphone chunks
pub const AUDIO_PCM_MIME: &str = "audio/pcm";

/// MIME type of outbound camera frames
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

// =============================================================================
// Setup
// =============================================================================

/// Session setup parameters sent once per connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub model: String,
    pub system_instruction: String,
    /// Function declarations as JSON schema objects
    pub function_declarations: Vec<Value>,
    pub code_execution: bool,
    pub google_search: bool,
    pub response_modalities: Vec<String>,
    pub language_code: String,
    pub voice_name: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: "You are a helpful assistant.".to_string(),
            function_declarations: Vec::new(),
            code_execution: true,
            google_search: true,
            response_modalities: vec!["audio".to_string()],
            language_code: "en-US".to_string(),
            voice_name: "Puck".to_string(),
        }
    }
}

impl SetupConfig {
    /// Build the outbound setup frame
    pub fn to_frame(&self) -> OutboundFrame {
        let mut tools = vec![ToolDeclaration::FunctionDeclarations(
            self.function_declarations.clone(),
        )];
        if self.code_execution {
            tools.push(ToolDeclaration::CodeExecution {});
        }
        if self.google_search {
            tools.push(ToolDeclaration::GoogleSearch {});
        }

        OutboundFrame::Setup(SetupPayload {
            model: self.model.clone(),
            system_instruction: Content {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: self.system_instruction.clone(),
                }],
            },
            tools,
            generation_config: GenerationConfig {
                response_modalities: self.response_modalities.clone(),
                speech_config: SpeechConfig {
                    language_code: self.language_code.clone(),
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice_name.clone(),
                        },
                    },
                },
            },
        })
    }
}

// =============================================================================
// Outbound frames
// =============================================================================

/// A frame sent to the service
#[derive(Debug, Clone, Serialize)]
pub enum OutboundFrame {
    #[serde(rename = "setup")]
    Setup(SetupPayload),
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput),
    #[serde(rename = "client_content")]
    ClientContent(ClientContent),
    #[serde(rename = "toolResponse")]
    ToolResponse(ToolResponse),
}

impl OutboundFrame {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Setup(_) => "setup",
            OutboundFrame::RealtimeInput(input) if input.media_chunks.is_empty() => "end-of-audio",
            OutboundFrame::RealtimeInput(input) => match input.media_chunks.first() {
                Some(MediaChunk::Image { .. }) => "frame",
                _ => "audio",
            },
            OutboundFrame::ClientContent(_) => "text",
            OutboundFrame::ToolResponse(_) => "tool-response",
        }
    }

    /// One PCM16 microphone chunk
    pub fn audio_chunk(pcm: &[u8]) -> Self {
        OutboundFrame::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk::Audio {
                mime_type: AUDIO_PCM_MIME.to_string(),
                data: BASE64_STANDARD.encode(pcm),
            }],
        })
    }

    /// One encoded camera frame
    pub fn image(mime_type: &str, bytes: &[u8]) -> Self {
        OutboundFrame::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk::Image {
                mime_type: mime_type.to_string(),
                data: BASE64_STANDARD.encode(bytes),
            }],
        })
    }

    /// Signals that the microphone stream has ended
    pub fn end_of_audio() -> Self {
        OutboundFrame::RealtimeInput(RealtimeInput {
            media_chunks: Vec::new(),
        })
    }

    /// A user text turn
    pub fn text(text: &str, turn_complete: bool) -> Self {
        OutboundFrame::ClientContent(ClientContent {
            turns: vec![Content {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }],
            turn_complete,
        })
    }

    /// Results for one tool-call batch, in invocation order
    pub fn tool_response(results: &[ToolResult]) -> Self {
        OutboundFrame::ToolResponse(ToolResponse {
            function_responses: results
                .iter()
                .map(|r| FunctionResponse {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    response: FunctionResponseBody {
                        result: FunctionResultValue {
                            object_value: r.output.clone(),
                        },
                    },
                })
                .collect(),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupPayload {
    pub model: String,
    pub system_instruction: Content,
    pub tools: Vec<ToolDeclaration>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum ToolDeclaration {
    #[serde(rename = "functionDeclarations")]
    FunctionDeclarations(Vec<Value>),
    #[serde(rename = "codeExecution")]
    CodeExecution {},
    #[serde(rename = "googleSearch")]
    GoogleSearch {},
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    pub language_code: String,
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MediaChunk {
    Audio {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
    Image {
        mime_type: String,
        data: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    #[serde(rename = "functionResponses")]
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: FunctionResponseBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponseBody {
    pub result: FunctionResultValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResultValue {
    pub object_value: Value,
}

// =============================================================================
// Tool invocation / result
// =============================================================================

/// A tool call requested by the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The answer to exactly one [`ToolInvocation`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub output: Value,
}

impl ToolResult {
    pub fn success(invocation: &ToolInvocation, output: Value) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            output,
        }
    }

    /// Failure payload; the peer still gets an answer for the id
    pub fn failure(invocation: &ToolInvocation, message: impl Into<String>) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            output: serde_json::json!({
                "status": "error",
                "error": message.into(),
            }),
        }
    }
}

// =============================================================================
// Inbound frames
// =============================================================================

/// A parsed frame received from the service
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    SetupComplete,
    ToolCall(Vec<ToolInvocation>),
    ServerContent(ServerContent),
    /// A well-formed frame this client has no use for (keys listed)
    Other(Vec<String>),
}

/// Content of a `serverContent` frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub interrupted: bool,
    pub turn_complete: bool,
    pub parts: Vec<ModelPart>,
}

/// One part of a model turn
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    /// Base64 PCM16 speech (`audio/pcm*`)
    Audio { mime_type: String, data: String },
    /// Inline data of any other type
    InlineData { mime_type: String },
    Text(String),
    Unknown,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "setupComplete")]
    setup_complete: Option<Value>,
    #[serde(rename = "toolCall")]
    tool_call: Option<RawToolCall>,
    #[serde(rename = "serverContent")]
    server_content: Option<RawServerContent>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawToolCall {
    #[serde(rename = "functionCalls", default)]
    function_calls: Vec<ToolInvocation>,
}

#[derive(Deserialize, Default)]
struct RawServerContent {
    #[serde(default)]
    interrupted: bool,
    #[serde(rename = "turnComplete", default)]
    turn_complete: bool,
    #[serde(rename = "modelTurn")]
    model_turn: Option<RawModelTurn>,
}

#[derive(Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize)]
struct RawPart {
    #[serde(rename = "inlineData")]
    inline_data: Option<RawInlineData>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawInlineData {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

impl InboundFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound = serde_json::from_str(text)?;

        if raw.setup_complete.is_some() {
            return Ok(InboundFrame::SetupComplete);
        }
        if let Some(call) = raw.tool_call {
            return Ok(InboundFrame::ToolCall(call.function_calls));
        }
        if let Some(content) = raw.server_content {
            let parts = content
                .model_turn
                .map(|turn| turn.parts.into_iter().map(ModelPart::from).collect())
                .unwrap_or_default();
            return Ok(InboundFrame::ServerContent(ServerContent {
                interrupted: content.interrupted,
                turn_complete: content.turn_complete,
                parts,
            }));
        }

        Ok(InboundFrame::Other(raw.rest.keys().cloned().collect()))
    }

    /// Parse a binary frame carrying the same JSON text
    pub fn parse_binary(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(text)
    }
}

impl From<RawPart> for ModelPart {
    fn from(part: RawPart) -> Self {
        match (part.inline_data, part.text) {
            (Some(inline), _) if inline.mime_type.starts_with(AUDIO_PCM_MIME) => ModelPart::Audio {
                mime_type: inline.mime_type,
                data: inline.data,
            },
            (Some(inline), _) => ModelPart::InlineData {
                mime_type: inline.mime_type,
            },
            (None, Some(text)) => ModelPart::Text(text),
            (None, None) => ModelPart::Unknown,
        }
    }
}
