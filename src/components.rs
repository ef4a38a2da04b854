//! Discord message components (the "components v2" layout family).
//!
//! Messages carrying any of the layout components (`Container`, `Section`,
//! `TextDisplay`, `MediaGallery`, `Separator`) must be sent with
//! [`MessageFlags::IS_COMPONENTS_V2`](crate::types::MessageFlags) and may not
//! set `content`.
//!
//! Every struct carries its own `type` discriminator so the untagged
//! [`Component`] enum serialises to exactly the shape Discord expects.

use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ComponentType {
    ActionRow = 1,
    Button = 2,
    Section = 9,
    TextDisplay = 10,
    Thumbnail = 11,
    MediaGallery = 12,
    Separator = 14,
    Container = 17,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ButtonStyle {
    Primary = 1,
    Secondary = 2,
    Success = 3,
    Danger = 4,
    Link = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SeparatorSpacing {
    Small = 1,
    Large = 2,
}

// ---------------------------------------------------------------------------
// Component enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Component {
    ActionRow(ActionRow),
    Button(Button),
    Section(Section),
    TextDisplay(TextDisplay),
    Thumbnail(Thumbnail),
    MediaGallery(MediaGallery),
    Separator(Separator),
    Container(Container),
}

impl Component {
    pub fn kind(&self) -> ComponentType {
        match self {
            Component::ActionRow(c) => c.kind,
            Component::Button(c) => c.kind,
            Component::Section(c) => c.kind,
            Component::TextDisplay(c) => c.kind,
            Component::Thumbnail(c) => c.kind,
            Component::MediaGallery(c) => c.kind,
            Component::Separator(c) => c.kind,
            Component::Container(c) => c.kind,
        }
    }
}

macro_rules! into_component {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Component::$ty(value)
                }
            }
        )*
    };
}

into_component!(
    ActionRow,
    Button,
    Section,
    TextDisplay,
    Thumbnail,
    MediaGallery,
    Separator,
    Container
);

// ---------------------------------------------------------------------------
// Interactive
// ---------------------------------------------------------------------------

/// A row of up to five buttons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub components: Vec<Component>,
}

impl ActionRow {
    pub fn new(components: Vec<Component>) -> Self {
        Self {
            kind: ComponentType::ActionRow,
            components,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub style: ButtonStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl Button {
    pub fn new(style: ButtonStyle, label: impl Into<String>, custom_id: impl Into<String>) -> Self {
        Self {
            kind: ComponentType::Button,
            style,
            label: Some(label.into()),
            custom_id: Some(custom_id.into()),
            url: None,
            disabled: None,
        }
    }

    /// Link buttons open `url` and never produce an interaction.
    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: ComponentType::Button,
            style: ButtonStyle::Link,
            label: Some(label.into()),
            custom_id: None,
            url: Some(url.into()),
            disabled: None,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Up to three text displays with an accessory (button or thumbnail) beside
/// them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub components: Vec<Component>,
    pub accessory: Box<Component>,
}

impl Section {
    pub fn new(text: TextDisplay, accessory: impl Into<Component>) -> Self {
        Self {
            kind: ComponentType::Section,
            components: vec![text.into()],
            accessory: Box::new(accessory.into()),
        }
    }
}

/// Markdown text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextDisplay {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub content: String,
}

impl TextDisplay {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            kind: ComponentType::TextDisplay,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnfurledMedia {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thumbnail {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub media: UnfurledMedia,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Thumbnail {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            kind: ComponentType::Thumbnail,
            media: UnfurledMedia { url: url.into() },
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaGalleryItem {
    pub media: UnfurledMedia,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaGallery {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub items: Vec<MediaGalleryItem>,
}

impl MediaGallery {
    pub fn new() -> Self {
        Self {
            kind: ComponentType::MediaGallery,
            items: Vec::new(),
        }
    }

    pub fn item(mut self, url: impl Into<String>) -> Self {
        self.items.push(MediaGalleryItem {
            media: UnfurledMedia { url: url.into() },
            description: None,
        });
        self
    }
}

impl Default for MediaGallery {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Separator {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<SeparatorSpacing>,
}

impl Separator {
    pub fn new() -> Self {
        Self {
            kind: ComponentType::Separator,
            divider: None,
            spacing: None,
        }
    }
}

impl Default for Separator {
    fn default() -> Self {
        Self::new()
    }
}

/// A box around other components with an optional coloured left edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub components: Vec<Component>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoiler: Option<bool>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            kind: ComponentType::Container,
            components: Vec::new(),
            accent_color: None,
            spoiler: None,
        }
    }

    pub fn push(mut self, component: impl Into<Component>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn extend(mut self, components: impl IntoIterator<Item = Component>) -> Self {
        self.components.extend(components);
        self
    }

    pub fn accent_color(mut self, color: u32) -> Self {
        self.accent_color = Some(color);
        self
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}
