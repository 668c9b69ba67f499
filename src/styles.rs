use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de};
use tracing::warn;

/// Parsed form of a cell's serialized style. Every field is optional; an
/// absent sub-object means "not set", which shallow merging preserves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StyleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<FontDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borders: Option<BordersDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FontDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FillDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BordersDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<BorderSideDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<BorderSideDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<BorderSideDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<BorderSideDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BorderSideDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlignmentDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
}

pub fn parse_style(serialized: &str) -> Result<StyleDescriptor> {
    serde_json::from_str(serialized).context("malformed serialized style")
}

pub fn serialize_style(descriptor: &StyleDescriptor) -> String {
    serde_json::to_string(descriptor).unwrap_or_default()
}

/// Shallow merge per sub-object: within each of font, fill, borders and
/// alignment a field set on the patch wins, everything else keeps the base.
/// Sub-objects the patch does not mention are untouched.
pub fn merge_styles(base: &StyleDescriptor, patch: &StyleDescriptor) -> StyleDescriptor {
    StyleDescriptor {
        font: merge_fonts(base.font.as_ref(), patch.font.as_ref()),
        fill: merge_fills(base.fill.as_ref(), patch.fill.as_ref()),
        borders: merge_borders(base.borders.as_ref(), patch.borders.as_ref()),
        alignment: merge_alignments(base.alignment.as_ref(), patch.alignment.as_ref()),
        number_format: patch
            .number_format
            .clone()
            .or_else(|| base.number_format.clone()),
    }
}

/// Merge a style patch into a cell's serialized style and re-serialize.
/// An unparsable existing style is logged and treated as absent.
pub fn merge_serialized(existing: Option<&str>, patch: &StyleDescriptor) -> String {
    let base = match existing {
        Some(raw) => match parse_style(raw) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("dropping unparsable cell style: {err:#}");
                StyleDescriptor::default()
            }
        },
        None => StyleDescriptor::default(),
    };
    serialize_style(&merge_styles(&base, patch))
}

fn merge_fonts(
    base: Option<&FontDescriptor>,
    patch: Option<&FontDescriptor>,
) -> Option<FontDescriptor> {
    match (base, patch) {
        (base, None) => base.cloned(),
        (None, Some(patch)) => Some(patch.clone()),
        (Some(base), Some(patch)) => Some(FontDescriptor {
            name: patch.name.clone().or_else(|| base.name.clone()),
            size: patch.size.or(base.size),
            bold: patch.bold.or(base.bold),
            italic: patch.italic.or(base.italic),
            underline: patch.underline.clone().or_else(|| base.underline.clone()),
            strikethrough: patch.strikethrough.or(base.strikethrough),
            color: patch.color.clone().or_else(|| base.color.clone()),
        }),
    }
}

fn merge_fills(
    base: Option<&FillDescriptor>,
    patch: Option<&FillDescriptor>,
) -> Option<FillDescriptor> {
    match (base, patch) {
        (base, None) => base.cloned(),
        (None, Some(patch)) => Some(patch.clone()),
        (Some(base), Some(patch)) => Some(FillDescriptor {
            color: patch.color.clone().or_else(|| base.color.clone()),
            pattern: patch.pattern.clone().or_else(|| base.pattern.clone()),
        }),
    }
}

fn merge_borders(
    base: Option<&BordersDescriptor>,
    patch: Option<&BordersDescriptor>,
) -> Option<BordersDescriptor> {
    match (base, patch) {
        (base, None) => base.cloned(),
        (None, Some(patch)) => Some(patch.clone()),
        (Some(base), Some(patch)) => Some(BordersDescriptor {
            left: patch.left.clone().or_else(|| base.left.clone()),
            right: patch.right.clone().or_else(|| base.right.clone()),
            top: patch.top.clone().or_else(|| base.top.clone()),
            bottom: patch.bottom.clone().or_else(|| base.bottom.clone()),
        }),
    }
}

fn merge_alignments(
    base: Option<&AlignmentDescriptor>,
    patch: Option<&AlignmentDescriptor>,
) -> Option<AlignmentDescriptor> {
    match (base, patch) {
        (base, None) => base.cloned(),
        (None, Some(patch)) => Some(patch.clone()),
        (Some(base), Some(patch)) => Some(AlignmentDescriptor {
            horizontal: patch
                .horizontal
                .clone()
                .or_else(|| base.horizontal.clone()),
            vertical: patch.vertical.clone().or_else(|| base.vertical.clone()),
            wrap_text: patch.wrap_text.or(base.wrap_text),
        }),
    }
}

/// Named presets resolvable by `smart_format_cells`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StylePreset {
    Currency,
    Percentage,
    Date,
    Accounting,
    Number,
    Header,
    Total,
}

impl StylePreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Currency => "currency",
            Self::Percentage => "percentage",
            Self::Date => "date",
            Self::Accounting => "accounting",
            Self::Number => "number",
            Self::Header => "header",
            Self::Total => "total",
        }
    }

    /// Concrete style the preset expands to before merging.
    pub fn descriptor(self) -> StyleDescriptor {
        match self {
            Self::Currency => number_format("$#,##0.00"),
            Self::Percentage => number_format("0.00%"),
            Self::Date => number_format("yyyy-mm-dd"),
            Self::Accounting => {
                number_format("_($* #,##0.00_);_($* (#,##0.00);_($* \"-\"??_);_(@_)")
            }
            Self::Number => number_format("#,##0.00"),
            Self::Header => StyleDescriptor {
                font: Some(FontDescriptor {
                    bold: Some(true),
                    ..FontDescriptor::default()
                }),
                fill: Some(FillDescriptor {
                    color: Some("#EFEFEF".to_string()),
                    pattern: Some("solid".to_string()),
                }),
                borders: Some(BordersDescriptor {
                    bottom: Some(BorderSideDescriptor {
                        style: Some("medium".to_string()),
                        color: Some("#000000".to_string()),
                    }),
                    ..BordersDescriptor::default()
                }),
                ..StyleDescriptor::default()
            },
            Self::Total => StyleDescriptor {
                font: Some(FontDescriptor {
                    bold: Some(true),
                    ..FontDescriptor::default()
                }),
                borders: Some(BordersDescriptor {
                    top: Some(BorderSideDescriptor {
                        style: Some("double".to_string()),
                        color: Some("#000000".to_string()),
                    }),
                    ..BordersDescriptor::default()
                }),
                number_format: Some("#,##0.00".to_string()),
                ..StyleDescriptor::default()
            },
        }
    }
}

fn number_format(code: &str) -> StyleDescriptor {
    StyleDescriptor {
        number_format: Some(code.to_string()),
        ..StyleDescriptor::default()
    }
}

impl<'de> Deserialize<'de> for StylePreset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_ascii_lowercase().as_str() {
            "currency" => Ok(Self::Currency),
            "percentage" | "percent" => Ok(Self::Percentage),
            "date" => Ok(Self::Date),
            "accounting" => Ok(Self::Accounting),
            "number" => Ok(Self::Number),
            "header" => Ok(Self::Header),
            "total" => Ok(Self::Total),
            other => Err(de::Error::unknown_variant(
                other,
                &[
                    "currency",
                    "percentage",
                    "date",
                    "accounting",
                    "number",
                    "header",
                    "total",
                ],
            )),
        }
    }
}
