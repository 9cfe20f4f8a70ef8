//! The closed catalog of prebuilt voices the Live API can speak with.

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Identifier sent in the session's voice config.
    pub name: &'static str,
    pub description: &'static str,
    pub personality_fit: &'static str,
}

const fn voice(
    name: &'static str,
    description: &'static str,
    personality_fit: &'static str,
) -> VoiceInfo {
    VoiceInfo {
        name,
        description,
        personality_fit,
    }
}

pub const VOICE_CATALOG: [VoiceInfo; 30] = [
    voice("Achird", "Friendly", "Default warm assistant"),
    voice("Sulafat", "Warm", "Caring, empathetic"),
    voice("Puck", "Upbeat", "Energetic, fun"),
    voice("Zephyr", "Bright", "Cheerful, positive"),
    voice("Kore", "Firm", "Professional, authoritative"),
    voice("Charon", "Informative", "Educational, factual"),
    voice("Fenrir", "Excitable", "Enthusiastic, animated"),
    voice("Leda", "Youthful", "Young, casual"),
    voice("Aoede", "Breezy", "Relaxed, easy-going"),
    voice("Gacrux", "Mature", "Serious, experienced"),
    voice("Sadaltager", "Knowledgeable", "Expert, teacher-like"),
    voice("Vindemiatrix", "Gentle", "Soft, calming"),
    voice("Sadachbia", "Lively", "Spirited, engaging"),
    voice("Zubenelgenubi", "Casual", "Laid-back, informal"),
    voice("Pulcherrima", "Forward", "Direct, confident"),
    voice("Solaria", "Crisp", "Clear, articulate"),
    voice("Umbriel", "Easy-going", "Relaxed, approachable"),
    voice("Algieba", "Smooth", "Polished, refined"),
    voice("Despina", "Smooth", "Polished, pleasant"),
    voice("Erinome", "Clear", "Precise, well-spoken"),
    voice("Algenib", "Gravelly", "Rugged, distinctive"),
    voice("Rasalgethi", "Informative", "Thoughtful, measured"),
    voice("Laomedeia", "Upbeat", "Positive, cheerful"),
    voice("Achernar", "Soft", "Gentle, soothing"),
    voice("Enceladus", "Breathy", "Intimate, quiet"),
    voice("Iapetus", "Clear", "Bright, transparent"),
    voice("Callirrhoe", "Easy-going", "Calm, comfortable"),
    voice("Autonoe", "Bright", "Vivid, engaging"),
    voice("Orus", "Firm", "Strong, decisive"),
    voice("Schedar", "Even", "Balanced, steady"),
];

/// Looks a voice up by name, ignoring case.
pub fn get_voice(name: &str) -> Result<&'static VoiceInfo, Error> {
    VOICE_CATALOG
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::UnknownVoice {
            name: name.to_string(),
            available: VOICE_CATALOG
                .iter()
                .map(|v| v.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

pub fn list_voices() -> &'static [VoiceInfo] {
    &VOICE_CATALOG
}
