use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One queued image as the UI reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueItemSummary {
    /// 1-based position shown to the user
    pub index: usize,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Read-only projection of UI state the model grounds its answers on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSnapshot {
    pub language: String,
    pub open_modals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_prompt: Option<String>,
    pub queue_size: usize,
    pub processing: bool,
    pub queue: Vec<QueueItemSummary>,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            open_modals: Vec::new(),
            pending_prompt: None,
            queue_size: 0,
            processing: false,
            queue: Vec::new(),
        }
    }
}

impl ContextSnapshot {
    /// Plain-text summary for the model.
    pub fn to_context_text(&self) -> String {
        let mut lines = vec![format!("Interface language: {}", self.language)];

        if self.open_modals.is_empty() {
            lines.push("Open modals: none".to_string());
        } else {
            lines.push(format!("Open modals: {}", self.open_modals.join(", ")));
        }

        match self.pending_prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => lines.push(format!("Pending prompt: \"{}\"", p.trim())),
            _ => lines.push("Pending prompt: empty".to_string()),
        }

        let state = if self.processing { "processing" } else { "idle" };
        lines.push(format!("Queue: {} image(s), {}", self.queue_size, state));
        for item in &self.queue {
            match &item.name {
                Some(name) => lines.push(format!("  #{} {} ({})", item.index, name, item.status)),
                None => lines.push(format!("  #{} ({})", item.index, item.status)),
            }
        }
        lines.join("\n")
    }

    /// Payload used whenever the snapshot travels as a tool response.
    pub fn to_payload(&self) -> Value {
        json!({
            "state": self,
            "summary": self.to_context_text(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContextSnapshot {
        ContextSnapshot {
            language: "de".into(),
            open_modals: vec!["settings".into()],
            pending_prompt: Some("  warm light ".into()),
            queue_size: 2,
            processing: true,
            queue: vec![
                QueueItemSummary { index: 1, status: "done".into(), name: Some("cat.png".into()) },
                QueueItemSummary { index: 2, status: "pending".into(), name: None },
            ],
        }
    }

    #[test]
    fn summary_lists_everything_the_model_needs() {
        let text = sample().to_context_text();
        assert!(text.contains("Interface language: de"));
        assert!(text.contains("Open modals: settings"));
        assert!(text.contains("Pending prompt: \"warm light\""));
        assert!(text.contains("Queue: 2 image(s), processing"));
        assert!(text.contains("#1 cat.png (done)"));
        assert!(text.contains("#2 (pending)"));
    }

    #[test]
    fn empty_state_reads_naturally() {
        let text = ContextSnapshot::default().to_context_text();
        assert!(text.contains("Open modals: none"));
        assert!(text.contains("Pending prompt: empty"));
        assert!(text.contains("Queue: 0 image(s), idle"));
    }

    #[test]
    fn ui_json_is_camel_case_and_lenient() {
        let snap: ContextSnapshot =
            serde_json::from_str(r#"{"language":"fr","openModals":["help"],"queueSize":4}"#).unwrap();
        assert_eq!(snap.language, "fr");
        assert_eq!(snap.open_modals, vec!["help".to_string()]);
        assert_eq!(snap.queue_size, 4);
        assert!(snap.queue.is_empty());

        let payload = snap.to_payload();
        assert_eq!(payload["state"]["queueSize"], 4);
        assert!(payload["summary"].as_str().unwrap().contains("fr"));
    }
}
