//! Typed directives
//!
//! Each namespace/name pair the client understands decodes into its own
//! variant with typed payload fields. Anything else becomes
//! [`Directive::Unrecognized`] so callers can log it and move on.

use super::messages::Message;
use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header fields shared by every directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveMeta {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectiveHeader {
    namespace: String,
    name: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    dialog_request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakPayload {
    pub url: String,
    pub format: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectSpeechPayload {
    pub timeout_in_milliseconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub offset_in_milliseconds: Option<u64>,
    #[serde(default)]
    pub expected_previous_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioItem {
    #[serde(default)]
    pub audio_item_id: Option<String>,
    pub stream: AudioStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayPayload {
    #[serde(default)]
    pub play_behavior: Option<String>,
    pub audio_item: AudioItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearQueuePayload {
    pub clear_behavior: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAlertPayload {
    pub token: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub scheduled_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAlertPayload {
    pub token: String,
}

/// Payload of both `SetVolume` (absolute) and `AdjustVolume` (relative)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePayload {
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMutePayload {
    pub mute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub code: String,
    pub description: String,
}

/// A decoded server directive
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `SpeechSynthesizer.Speak`, with the merged speech audio
    Speak {
        meta: DirectiveMeta,
        payload: SpeakPayload,
        audio: Option<Bytes>,
    },
    /// `SpeechRecognizer.ExpectSpeech`
    ExpectSpeech {
        meta: DirectiveMeta,
        payload: ExpectSpeechPayload,
    },
    /// `SpeechRecognizer.StopCapture`
    StopCapture { meta: DirectiveMeta },
    /// `AudioPlayer.Play`; `audio` is set when the stream URL is a `cid:` reference
    Play {
        meta: DirectiveMeta,
        payload: PlayPayload,
        audio: Option<Bytes>,
    },
    /// `AudioPlayer.Stop`
    Stop { meta: DirectiveMeta },
    /// `AudioPlayer.ClearQueue`
    ClearQueue {
        meta: DirectiveMeta,
        payload: ClearQueuePayload,
    },
    /// `Alerts.SetAlert`
    SetAlert {
        meta: DirectiveMeta,
        payload: SetAlertPayload,
    },
    /// `Alerts.DeleteAlert`
    DeleteAlert {
        meta: DirectiveMeta,
        payload: DeleteAlertPayload,
    },
    /// `Speaker.SetVolume`
    SetVolume {
        meta: DirectiveMeta,
        payload: VolumePayload,
    },
    /// `Speaker.AdjustVolume`
    AdjustVolume {
        meta: DirectiveMeta,
        payload: VolumePayload,
    },
    /// `Speaker.SetMute`
    SetMute {
        meta: DirectiveMeta,
        payload: SetMutePayload,
    },
    /// `System.ResetUserInactivity`
    ResetUserInactivity { meta: DirectiveMeta },
    /// `System.Exception`
    Exception {
        meta: DirectiveMeta,
        payload: ExceptionPayload,
    },
    Unrecognized { namespace: String, name: String },
}

impl Directive {
    /// Decode a received message
    ///
    /// Fails when the message has no header or when a known directive's
    /// payload does not have the expected shape.
    pub fn from_message(message: &Message) -> Result<Self, serde_json::Error> {
        let header = message
            .header()
            .ok_or_else(|| serde_json::Error::custom("message has no header"))?;
        let DirectiveHeader {
            namespace,
            name,
            message_id,
            dialog_request_id,
        } = DirectiveHeader::deserialize(header)?;
        // Only known directives require a messageId
        let meta = || -> Result<DirectiveMeta, serde_json::Error> {
            Ok(DirectiveMeta {
                message_id: message_id
                    .clone()
                    .ok_or_else(|| serde_json::Error::missing_field("messageId"))?,
                dialog_request_id: dialog_request_id.clone(),
            })
        };
        let payload = message.payload().cloned().unwrap_or(Value::Null);
        let audio = message.attachment().cloned();

        let directive = match (namespace.as_str(), name.as_str()) {
            ("SpeechSynthesizer", "Speak") => Directive::Speak {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
                audio,
            },
            ("SpeechRecognizer", "ExpectSpeech") => Directive::ExpectSpeech {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("SpeechRecognizer", "StopCapture") => Directive::StopCapture { meta: meta()? },
            ("AudioPlayer", "Play") => Directive::Play {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
                audio,
            },
            ("AudioPlayer", "Stop") => Directive::Stop { meta: meta()? },
            ("AudioPlayer", "ClearQueue") => Directive::ClearQueue {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("Alerts", "SetAlert") => Directive::SetAlert {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("Alerts", "DeleteAlert") => Directive::DeleteAlert {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("Speaker", "SetVolume") => Directive::SetVolume {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("Speaker", "AdjustVolume") => Directive::AdjustVolume {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("Speaker", "SetMute") => Directive::SetMute {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            ("System", "ResetUserInactivity") => Directive::ResetUserInactivity { meta: meta()? },
            ("System", "Exception") => Directive::Exception {
                meta: meta()?,
                payload: serde_json::from_value(payload)?,
            },
            _ => Directive::Unrecognized {
                namespace: namespace.clone(),
                name: name.clone(),
            },
        };
        Ok(directive)
    }

    /// `(namespace, name)` of this directive
    pub fn kind(&self) -> (&str, &str) {
        match self {
            Directive::Speak { .. } => ("SpeechSynthesizer", "Speak"),
            Directive::ExpectSpeech { .. } => ("SpeechRecognizer", "ExpectSpeech"),
            Directive::StopCapture { .. } => ("SpeechRecognizer", "StopCapture"),
            Directive::Play { .. } => ("AudioPlayer", "Play"),
            Directive::Stop { .. } => ("AudioPlayer", "Stop"),
            Directive::ClearQueue { .. } => ("AudioPlayer", "ClearQueue"),
            Directive::SetAlert { .. } => ("Alerts", "SetAlert"),
            Directive::DeleteAlert { .. } => ("Alerts", "DeleteAlert"),
            Directive::SetVolume { .. } => ("Speaker", "SetVolume"),
            Directive::AdjustVolume { .. } => ("Speaker", "AdjustVolume"),
            Directive::SetMute { .. } => ("Speaker", "SetMute"),
            Directive::ResetUserInactivity { .. } => ("System", "ResetUserInactivity"),
            Directive::Exception { .. } => ("System", "Exception"),
            Directive::Unrecognized { namespace, name } => (namespace.as_str(), name.as_str()),
        }
    }

    pub fn meta(&self) -> Option<&DirectiveMeta> {
        match self {
            Directive::Speak { meta, .. }
            | Directive::ExpectSpeech { meta, .. }
            | Directive::StopCapture { meta }
            | Directive::Play { meta, .. }
            | Directive::Stop { meta }
            | Directive::ClearQueue { meta, .. }
            | Directive::SetAlert { meta, .. }
            | Directive::DeleteAlert { meta, .. }
            | Directive::SetVolume { meta, .. }
            | Directive::AdjustVolume { meta, .. }
            | Directive::SetMute { meta, .. }
            | Directive::ResetUserInactivity { meta }
            | Directive::Exception { meta, .. } => Some(meta),
            Directive::Unrecognized { .. } => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Directive::Unrecognized { .. })
    }
}
