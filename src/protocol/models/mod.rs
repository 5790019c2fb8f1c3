pub mod audio;
pub mod common;
pub mod items;
pub mod session;
pub mod tools;

pub use audio::{AudioFormat, TurnDetection};
pub use common::{
    ArbitraryJson, DEFAULT_MODEL, DEFAULT_VOICE, Eagerness, ItemStatus, JsonSchema, Modality,
    Temperature, TemperatureError, Voice,
};
pub use items::Item;
pub use session::{Response, Session, SessionUpdate};
pub use tools::{Tool, ToolChoice, ToolChoiceMode};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_update_omits_unset_fields() {
        let update = SessionUpdate {
            input_audio_format: Some(AudioFormat::Pcm16),
            tool_choice: Some(ToolChoice::default()),
            ..SessionUpdate::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({ "input_audio_format": "pcm16", "tool_choice": "auto" }));
    }

    #[test]
    fn temperature_rejects_out_of_range() {
        assert!(Temperature::new(2.5).is_err());
        assert!(serde_json::from_value::<Temperature>(json!(-0.1)).is_err());
        assert!((Temperature::new(1.0).unwrap().value() - 1.0).abs() < f32::EPSILON);
    }
}
