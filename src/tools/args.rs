//! Typed argument shapes for each tool.
//!
//! Arguments arrive as an untyped JSON object. Each tool deserializes into its
//! own struct; a wrong type, an unknown enum value or a field the tool does
//! not take is an error that the caller turns into an error response.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::bridge::{
    ItemAction, OutputSettings, QueueAction, ScrollDirection, UiCommand, UiStateAction,
};

fn parse<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    // Missing args and `null` both mean "no arguments"
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for {}: {}", tool, e))
}

/// Models send indices as either `"2"` or `2`.
fn index_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Index {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Index>::deserialize(d)?.map(|i| match i {
        Index::Text(s) => s.trim().to_string(),
        Index::Number(n) => n.to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScrollArgs {
    direction: ScrollDirection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SettingsArgs {
    prompt: Option<String>,
    aspect_ratio: Option<String>,
    resolution: Option<String>,
    format: Option<String>,
}

impl From<SettingsArgs> for OutputSettings {
    fn from(a: SettingsArgs) -> Self {
        Self {
            prompt: a.prompt,
            aspect_ratio: a.aspect_ratio,
            resolution: a.resolution,
            format: a.format,
        }
    }
}

// serde cannot combine `flatten` with `deny_unknown_fields`, so the settings are repeated here
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DashboardArgs {
    prompt: Option<String>,
    aspect_ratio: Option<String>,
    resolution: Option<String>,
    format: Option<String>,
    #[serde(default, deserialize_with = "index_string")]
    target_index: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ItemActionArgs {
    action: ItemAction,
    #[serde(default, deserialize_with = "index_string")]
    target_index: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UiStateArgs {
    action: UiStateAction,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueueArgs {
    action: QueueAction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CompositeArgs {
    prompt: Option<String>,
    layout: Option<String>,
    aspect_ratio: Option<String>,
    resolution: Option<String>,
}

pub fn scroll_viewport(args: Value) -> Result<UiCommand, String> {
    let a: ScrollArgs = parse("scroll_viewport", args)?;
    Ok(UiCommand::ScrollViewport { scroll_action: a.direction })
}

pub fn update_dashboard(args: Value) -> Result<UiCommand, String> {
    let a: DashboardArgs = parse("update_dashboard", args)?;
    Ok(UiCommand::UpdateDashboard {
        settings: OutputSettings {
            prompt: a.prompt,
            aspect_ratio: a.aspect_ratio,
            resolution: a.resolution,
            format: a.format,
        },
        target_index: a.target_index,
    })
}

pub fn update_native_input(args: Value) -> Result<UiCommand, String> {
    let a: SettingsArgs = parse("update_native_input", args)?;
    Ok(UiCommand::UpdateNativeInput { settings: a.into() })
}

pub fn trigger_native_generation(args: Value) -> Result<UiCommand, String> {
    let a: SettingsArgs = parse("trigger_native_generation", args)?;
    Ok(UiCommand::TriggerNativeGeneration { settings: a.into() })
}

pub fn perform_item_action(args: Value) -> Result<UiCommand, String> {
    let a: ItemActionArgs = parse("perform_item_action", args)?;
    match a.target_index {
        Some(target_index) if !target_index.is_empty() => Ok(UiCommand::PerformItemAction {
            action: a.action,
            target_index,
        }),
        _ => Err("perform_item_action requires targetIndex".to_string()),
    }
}

pub fn apply_settings_globally(args: Value) -> Result<UiCommand, String> {
    parse::<NoArgs>("apply_settings_globally", args)?;
    Ok(UiCommand::ApplySettingsGlobally)
}

pub fn start_processing_queue(args: Value) -> Result<UiCommand, String> {
    parse::<NoArgs>("start_processing_queue", args)?;
    Ok(UiCommand::StartProcessingQueue)
}

pub fn analyze_images(args: Value) -> Result<UiCommand, String> {
    parse::<NoArgs>("analyze_images", args)?;
    Ok(UiCommand::AnalyzeImages)
}

pub fn manage_ui_state(args: Value) -> Result<UiCommand, String> {
    let a: UiStateArgs = parse("manage_ui_state", args)?;
    if a.action.requires_value() && a.value.as_deref().is_none_or(|v| v.trim().is_empty()) {
        return Err(format!("{:?} requires a value", a.action));
    }
    Ok(UiCommand::ManageUiState {
        action: a.action,
        value: a.value,
    })
}

pub fn manage_queue_actions(args: Value) -> Result<UiCommand, String> {
    let a: QueueArgs = parse("manage_queue_actions", args)?;
    Ok(UiCommand::ManageQueueActions { action: a.action })
}

pub fn set_composite_config(args: Value) -> Result<UiCommand, String> {
    let a: CompositeArgs = parse("set_composite_config", args)?;
    Ok(UiCommand::SetCompositeConfig {
        prompt: a.prompt,
        layout: a.layout,
        aspect_ratio: a.aspect_ratio,
        resolution: a.resolution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scroll_direction_is_validated() {
        assert_eq!(
            scroll_viewport(json!({ "direction": "DOWN" })).unwrap(),
            UiCommand::ScrollViewport { scroll_action: ScrollDirection::Down }
        );
        assert!(scroll_viewport(json!({ "direction": "SIDEWAYS" })).is_err());
        assert!(scroll_viewport(json!({})).is_err());
        assert!(scroll_viewport(Value::Null).is_err());
    }

    #[test]
    fn target_index_accepts_number_or_string() {
        let by_string = perform_item_action(json!({ "action": "REMOVE", "targetIndex": "2" })).unwrap();
        let by_number = perform_item_action(json!({ "action": "REMOVE", "targetIndex": 2 })).unwrap();
        assert_eq!(by_string, by_number);
        assert!(perform_item_action(json!({ "action": "REMOVE" })).is_err());
        assert!(perform_item_action(json!({ "action": "EXPLODE", "targetIndex": "1" })).is_err());
    }

    #[test]
    fn optional_settings_may_be_absent() {
        assert_eq!(
            update_native_input(Value::Null).unwrap(),
            UiCommand::UpdateNativeInput { settings: OutputSettings::default() }
        );
        match update_dashboard(json!({ "resolution": "4K", "targetIndex": 3 })).unwrap() {
            UiCommand::UpdateDashboard { settings, target_index } => {
                assert_eq!(settings.resolution.as_deref(), Some("4K"));
                assert_eq!(target_index.as_deref(), Some("3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(update_dashboard(json!({ "prompt": 42 })).is_err());
        assert!(manage_queue_actions(json!({ "action": "SHRED" })).is_err());
    }

    #[test]
    fn change_lang_needs_a_value() {
        assert!(manage_ui_state(json!({ "action": "CHANGE_LANG" })).is_err());
        assert!(manage_ui_state(json!({ "action": "CHANGE_LANG", "value": "fr" })).is_ok());
        assert!(manage_ui_state(json!({ "action": "OPEN_SETTINGS" })).is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(scroll_viewport(json!({ "direction": "UP", "speed": 3 })).is_err());
        assert!(update_dashboard(json!({ "resolution": "4K", "colour": "red" })).is_err());
        assert!(update_native_input(json!({ "prompt": "sky", "seed": 7 })).is_err());
        assert!(perform_item_action(json!({ "action": "EDIT", "targetIndex": 1, "all": true })).is_err());
        assert!(set_composite_config(json!({ "layout": "grid", "columns": 2 })).is_err());
        assert!(analyze_images(json!({ "deep": true })).is_err());
        assert!(analyze_images(json!({})).is_ok());
        assert!(apply_settings_globally(Value::Null).is_ok());
    }
}
