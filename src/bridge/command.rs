//! Commands understood by the UI collaborator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemAction {
    Remove,
    Edit,
    Download,
    Remaster,
    CreateVariants,
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueAction {
    ClearAll,
    DownloadZip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiStateAction {
    OpenSettings,
    CloseSettings,
    OpenHelp,
    CloseHelp,
    OpenHistory,
    CloseHistory,
    OpenGallery,
    CloseGallery,
    OpenNativeGeneration,
    CloseNativeGeneration,
    OpenComposite,
    CloseComposite,
    CloseAllModals,
    ChangeLang,
    ToggleTheme,
}

impl UiStateAction {
    /// Actions that are meaningless without a `value`.
    pub fn requires_value(self) -> bool {
        matches!(self, Self::ChangeLang)
    }
}

/// Output settings shared by the dashboard, the native generator and composites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// The closed set of actions the session may ask the UI to perform.
///
/// Serialized with a `command` tag and camelCase fields, e.g.
/// `{"command":"scroll_viewport","scrollAction":"DOWN"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UiCommand {
    ScrollViewport {
        scroll_action: ScrollDirection,
    },
    UpdateDashboard {
        #[serde(flatten)]
        settings: OutputSettings,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_index: Option<String>,
    },
    UpdateNativeInput {
        #[serde(flatten)]
        settings: OutputSettings,
    },
    TriggerNativeGeneration {
        #[serde(flatten)]
        settings: OutputSettings,
    },
    PerformItemAction {
        action: ItemAction,
        target_index: String,
    },
    ApplySettingsGlobally,
    StartProcessingQueue,
    AnalyzeImages,
    ManageUiState {
        action: UiStateAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    ManageQueueActions {
        action: QueueAction,
    },
    SetCompositeConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        layout: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },
}

impl UiCommand {
    /// Short confirmation the model can repeat to the user.
    pub fn acknowledgement(&self) -> String {
        match self {
            Self::ScrollViewport { scroll_action } => format!("Scrolled {:?}.", scroll_action),
            Self::UpdateDashboard { target_index: Some(i), .. } => format!("Updated settings for item {}.", i),
            Self::UpdateDashboard { .. } => "Dashboard updated.".to_string(),
            Self::UpdateNativeInput { .. } => "Generation input updated.".to_string(),
            Self::TriggerNativeGeneration { .. } => "Generation started.".to_string(),
            Self::PerformItemAction { action, target_index } => {
                format!("{:?} requested for item {}.", action, target_index)
            }
            Self::ApplySettingsGlobally => "Settings applied to all items.".to_string(),
            Self::StartProcessingQueue => "Queue processing started.".to_string(),
            Self::AnalyzeImages => "Image analysis started.".to_string(),
            Self::ManageUiState { action, value: Some(v) } => format!("{:?} set to {}.", action, v),
            Self::ManageUiState { action, .. } => format!("{:?} done.", action),
            Self::ManageQueueActions { action } => format!("{:?} done.", action),
            Self::SetCompositeConfig { .. } => "Composite configuration updated.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn scroll_uses_scroll_action_field() {
        let cmd = UiCommand::ScrollViewport { scroll_action: ScrollDirection::Down };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v, json!({ "command": "scroll_viewport", "scrollAction": "DOWN" }));
    }

    #[test]
    fn dashboard_flattens_settings() {
        let cmd = UiCommand::UpdateDashboard {
            settings: OutputSettings {
                aspect_ratio: Some("16:9".into()),
                ..Default::default()
            },
            target_index: Some("2".into()),
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["command"], "update_dashboard");
        assert_eq!(v["aspectRatio"], "16:9");
        assert_eq!(v["targetIndex"], "2");
        assert_eq!(v.get("prompt"), None::<&Value>);
    }

    #[test]
    fn enums_use_wire_names() {
        let cmd = UiCommand::PerformItemAction {
            action: ItemAction::CreateVariants,
            target_index: "1".into(),
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["action"], "CREATE_VARIANTS");
        assert_eq!(
            serde_json::to_value(UiCommand::ManageQueueActions { action: QueueAction::DownloadZip })
                .unwrap()["action"],
            "DOWNLOAD_ZIP"
        );
        assert_eq!(
            serde_json::to_value(UiCommand::ApplySettingsGlobally).unwrap(),
            json!({ "command": "apply_settings_globally" })
        );
    }

    #[test]
    fn acknowledgements_name_the_action() {
        let ack = UiCommand::PerformItemAction {
            action: ItemAction::Remove,
            target_index: "3".into(),
        }
        .acknowledgement();
        assert!(ack.contains('3'));
    }
}
