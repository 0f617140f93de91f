use super::messages::{ClientEvent, ConversationItem, SessionParams, Transcription, TurnDetection};
use crate::collaborators::SessionDescriptor;
use crate::config::EngineConfig;

/// Everything the connector sends before the session goes active
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSetup {
    pub instructions: String,
    pub voice: String,
    pub greeting: Option<String>,
    pub temperature: f32,
    pub vad_threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub transcription_model: String,
    pub transcription_language: String,
}

impl EngineSetup {
    pub fn new(descriptor: &SessionDescriptor, config: &EngineConfig) -> Self {
        Self {
            instructions: descriptor.instructions.clone(),
            voice: voice_for(&descriptor.voice_type).to_string(),
            greeting: Some(descriptor.greeting()),
            temperature: config.temperature,
            vad_threshold: config.vad_threshold,
            prefix_padding_ms: config.prefix_padding_ms,
            silence_duration_ms: config.silence_duration_ms,
            transcription_model: config.transcription_model.clone(),
            transcription_language: config.transcription_language.clone(),
        }
    }

    /// Session configuration followed by the greeting request, if any
    pub fn initial_events(&self) -> Vec<ClientEvent> {
        let mut events = vec![ClientEvent::SessionUpdate {
            session: SessionParams {
                turn_detection: TurnDetection {
                    kind: "server_vad".to_string(),
                    threshold: self.vad_threshold,
                    prefix_padding_ms: self.prefix_padding_ms,
                    silence_duration_ms: self.silence_duration_ms,
                    create_response: true,
                    interrupt_response: true,
                },
                input_audio_format: "pcm16".to_string(),
                output_audio_format: "pcm16".to_string(),
                input_audio_transcription: Transcription {
                    model: self.transcription_model.clone(),
                    language: self.transcription_language.clone(),
                },
                voice: self.voice.clone(),
                instructions: self.instructions.clone(),
                modalities: vec!["text".to_string(), "audio".to_string()],
                temperature: self.temperature,
            },
        }];

        if let Some(greeting) = &self.greeting {
            events.push(ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(format!(
                    "Greet the user with exactly: '{}'",
                    greeting
                )),
            });
            events.push(ClientEvent::ResponseCreate);
        }

        events
    }
}

/// Engine voice for an assistant's configured voice type
pub fn voice_for(voice_type: &str) -> &'static str {
    if voice_type.eq_ignore_ascii_case("male") {
        "alloy"
    } else {
        "coral"
    }
}
