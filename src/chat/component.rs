//! Chat components in their JSON wire form.
//!
//! A component is one content kind plus shared formatting and an ordered
//! list of children (`extra`). Content kinds are told apart by which key is
//! present, so the content enum is untagged and flattened into the object.

use serde::{Deserialize, Serialize};

/// Structured text sent to the client for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatComponent {
    #[serde(flatten)]
    pub content: Content,

    #[serde(flatten)]
    pub style: Style,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<ChatComponent>,
}

/// What a component displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text {
        text: String,
    },
    Translate {
        translate: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        with: Vec<TranslationArg>,
    },
    Score {
        score: Score,
    },
    Selector {
        selector: String,
    },
    Keybind {
        keybind: String,
    },
    Nbt {
        nbt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interpret: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Positional argument of a translation component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslationArg {
    Int(i64),
    Float(f64),
    Text(String),
    Component(Box<ChatComponent>),
}

impl TranslationArg {
    /// Whether `%d` placeholders draw from this argument
    pub fn is_number(&self) -> bool {
        matches!(self, TranslationArg::Int(_) | TranslationArg::Float(_))
    }

    /// Text substituted for this argument
    pub fn render(&self) -> String {
        match self {
            TranslationArg::Int(n) => n.to_string(),
            TranslationArg::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            TranslationArg::Float(f) => f.to_string(),
            TranslationArg::Text(s) => s.clone(),
            TranslationArg::Component(c) => c.to_plain_text(),
        }
    }
}

impl From<&str> for TranslationArg {
    fn from(value: &str) -> Self {
        TranslationArg::Text(value.to_string())
    }
}

impl From<String> for TranslationArg {
    fn from(value: String) -> Self {
        TranslationArg::Text(value)
    }
}

impl From<i64> for TranslationArg {
    fn from(value: i64) -> Self {
        TranslationArg::Int(value)
    }
}

impl From<i32> for TranslationArg {
    fn from(value: i32) -> Self {
        TranslationArg::Int(value as i64)
    }
}

impl From<ChatComponent> for TranslationArg {
    fn from(value: ChatComponent) -> Self {
        TranslationArg::Component(Box::new(value))
    }
}

/// Formatting shared by every content kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlined: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfuscated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion: Option<String>,
    #[serde(rename = "clickEvent", default, skip_serializing_if = "Option::is_none")]
    pub click_event: Option<ClickEvent>,
    #[serde(rename = "hoverEvent", default, skip_serializing_if = "Option::is_none")]
    pub hover_event: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub action: String,
    pub value: String,
}

impl ChatComponent {
    fn with_content(content: Content) -> Self {
        Self {
            content,
            style: Style::default(),
            extra: Vec::new(),
        }
    }

    /// Plain text component
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_content(Content::Text { text: text.into() })
    }

    /// Translation component; see [`crate::chat::masking::from_key`] for the
    /// variant that checks the key against the locale table.
    pub fn translate(key: impl Into<String>, with: Vec<TranslationArg>) -> Self {
        Self::with_content(Content::Translate {
            translate: key.into(),
            with,
        })
    }

    pub fn keybind(key: impl Into<String>) -> Self {
        Self::with_content(Content::Keybind {
            keybind: key.into(),
        })
    }

    pub fn selector(pattern: impl Into<String>) -> Self {
        Self::with_content(Content::Selector {
            selector: pattern.into(),
        })
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.style.color = Some(color.into());
        self
    }

    pub fn bold(mut self) -> Self {
        self.style.bold = Some(true);
        self
    }

    pub fn italic(mut self) -> Self {
        self.style.italic = Some(true);
        self
    }

    pub fn append(mut self, child: ChatComponent) -> Self {
        self.extra.push(child);
        self
    }

    /// Translation key, if this is a translation component
    pub fn translation_key(&self) -> Option<&str> {
        match &self.content {
            Content::Translate { translate, .. } => Some(translate),
            _ => None,
        }
    }

    /// Flatten to unformatted text. Unresolved content renders as its key.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out);
        out
    }

    fn write_plain(&self, out: &mut String) {
        match &self.content {
            Content::Text { text } => out.push_str(text),
            Content::Translate { translate, .. } => out.push_str(translate),
            Content::Score { score } => {
                out.push_str(score.value.as_deref().unwrap_or(&score.name));
            }
            Content::Selector { selector } => out.push_str(selector),
            Content::Keybind { keybind } => out.push_str(keybind),
            Content::Nbt { nbt, .. } => out.push_str(nbt),
        }
        for child in &self.extra {
            child.write_plain(out);
        }
    }
}

impl From<&str> for ChatComponent {
    fn from(value: &str) -> Self {
        ChatComponent::text(value)
    }
}

impl From<String> for ChatComponent {
    fn from(value: String) -> Self {
        ChatComponent::text(value)
    }
}
