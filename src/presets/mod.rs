//! Preset & Condition Resolver.
//!
//! Merges process defaults, a named preset, and per-item overrides into an
//! effective configuration, then — once extractor metadata is available —
//! applies matching conditions in ascending priority order. The merge shape
//! mirrors `config.rs`'s layered defaults-over-file-over-env precedence,
//! generalized from "config layers" to "defaults < preset < item".

pub mod filter;

use std::collections::HashMap;

use crate::config::DefaultsConfig;
use crate::db::models::{Condition, Preset};
use crate::queue::Item;
use filter::Ast;

/// The effective, fully-merged configuration for one item, ready to hand to
/// the Download Driver.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub folder: String,
    pub template: String,
    pub cli: String,
    pub cookies: Option<String>,
    pub download_archive: String,
}

/// A condition with its filter pre-parsed, so it's parsed once at load time
/// and evaluated once per candidate item rather than per-item-per-evaluation.
pub struct CompiledCondition {
    pub condition: Condition,
    pub ast: Ast,
}

impl CompiledCondition {
    pub fn compile(condition: Condition) -> Result<Self, filter::ParseError> {
        let ast = filter::parse(&condition.filter)?;
        Ok(Self { condition, ast })
    }
}

pub struct Resolver;

impl Resolver {
    /// Merges defaults, preset and per-item fields: unset fields fall
    /// through; scalar fields are replaced entirely, not unioned; cli
    /// fields are concatenated in precedence order.
    pub fn merge(defaults: &DefaultsConfig, preset: Option<&Preset>, item: &Item) -> EffectiveConfig {
        let mut folder = String::new();
        let mut template = defaults.output_template.clone();
        let mut cli_parts: Vec<String> = Vec::new();
        let mut download_archive = String::new();

        if let Some(preset) = preset {
            if !preset.folder.is_empty() {
                folder = preset.folder.clone();
            }
            if !preset.template.is_empty() {
                template = preset.template.clone();
            }
            if !preset.cli.is_empty() {
                cli_parts.push(preset.cli.clone());
            }
            if !preset.download_archive.is_empty() {
                download_archive = preset.download_archive.clone();
            }
        }

        let mut cookies = preset.and_then(|p| p.cookies.clone());

        if !item.folder.is_empty() {
            folder = item.folder.clone();
        }
        if !item.template.is_empty() {
            template = item.template.clone();
        }
        if !item.cli.is_empty() {
            cli_parts.push(item.cli.clone());
        }
        if item.cookies.is_some() {
            cookies = item.cookies.clone();
        }

        EffectiveConfig {
            folder,
            template,
            cli: cli_parts.join(" "),
            cookies,
            download_archive,
        }
    }

    /// Applies enabled conditions, ascending priority, appending `cli` to
    /// `effective` on each match. `info` is the extractor's metadata mapping.
    pub fn apply_conditions(effective: &mut EffectiveConfig, conditions: &[CompiledCondition], info: &serde_json::Map<String, serde_json::Value>) {
        let mut sorted: Vec<&CompiledCondition> = conditions.iter().filter(|c| c.condition.enabled).collect();
        sorted.sort_by_key(|c| c.condition.priority);
        for compiled in sorted {
            if filter::evaluate(&compiled.ast, info) {
                if !compiled.condition.cli.is_empty() {
                    if !effective.cli.is_empty() {
                        effective.cli.push(' ');
                    }
                    effective.cli.push_str(&compiled.condition.cli);
                }
            }
        }
    }
}

/// Looks up a preset by name, falling back to the configured default preset
/// name when the item's `preset` field is empty.
pub fn resolve_preset_name<'a>(item_preset: &'a str, default_preset: &'a str) -> &'a str {
    if item_preset.is_empty() {
        default_preset
    } else {
        item_preset
    }
}

pub type PresetsByName = HashMap<String, Preset>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::queue::ItemSpec;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn preset(folder: &str, template: &str, cli: &str) -> Preset {
        Preset {
            id: 1,
            name: "p".into(),
            description: String::new(),
            folder: folder.into(),
            template: template.into(),
            cookies: None,
            cli: cli.into(),
            default: false,
            priority: 0,
            download_archive: String::new(),
        }
    }

    fn item(folder: &str, template: &str, cli: &str) -> Item {
        Item::new(
            "id".into(),
            ItemSpec {
                url: "https://example.com".into(),
                preset: None,
                folder: if folder.is_empty() { None } else { Some(folder.into()) },
                template: if template.is_empty() { None } else { Some(template.into()) },
                cli: if cli.is_empty() { None } else { Some(cli.into()) },
                cookies: None,
                auto_start: true,
                extras: Map::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn item_overrides_win_over_preset() {
        let defaults = Config::default().defaults;
        let p = preset("movies", "%(title)s.%(ext)s", "--no-part");
        let it = item("tv", "", "--write-thumbnail");
        let eff = Resolver::merge(&defaults, Some(&p), &it);
        assert_eq!(eff.folder, "tv");
        assert_eq!(eff.template, "%(title)s.%(ext)s");
        assert_eq!(eff.cli, "--no-part --write-thumbnail");
    }

    #[test]
    fn unset_item_fields_fall_through_to_preset() {
        let defaults = Config::default().defaults;
        let p = preset("movies", "%(title)s.%(ext)s", "--no-part");
        let it = item("", "", "");
        let eff = Resolver::merge(&defaults, Some(&p), &it);
        assert_eq!(eff.folder, "movies");
        assert_eq!(eff.cli, "--no-part");
    }

    #[test]
    fn conditions_apply_in_ascending_priority_and_append_cli() {
        let mut eff = EffectiveConfig { folder: String::new(), template: String::new(), cli: "--base".into(), cookies: None, download_archive: String::new() };
        let conditions = vec![
            CompiledCondition::compile(Condition { id: 1, name: "hi-res".into(), filter: "height>=1080".into(), cli: "--prefer-hd".into(), extras: Map::new(), priority: 5, enabled: true }).unwrap(),
            CompiledCondition::compile(Condition { id: 2, name: "low-pri".into(), filter: "height>=1080".into(), cli: "--low".into(), extras: Map::new(), priority: 1, enabled: true }).unwrap(),
        ];
        let mut info = serde_json::Map::new();
        info.insert("height".into(), serde_json::json!(1080));
        Resolver::apply_conditions(&mut eff, &conditions, &info);
        assert_eq!(eff.cli, "--base --low --prefer-hd");
    }

    #[test]
    fn disabled_conditions_are_skipped() {
        let mut eff = EffectiveConfig { folder: String::new(), template: String::new(), cli: "--base".into(), cookies: None, download_archive: String::new() };
        let conditions = vec![CompiledCondition::compile(Condition { id: 1, name: "off".into(), filter: "height?".into(), cli: "--x".into(), extras: Map::new(), priority: 1, enabled: false }).unwrap()];
        let mut info = serde_json::Map::new();
        info.insert("height".into(), serde_json::json!(1080));
        Resolver::apply_conditions(&mut eff, &conditions, &info);
        assert_eq!(eff.cli, "--base");
    }

    #[test]
    fn resolve_preset_name_falls_back_to_default() {
        assert_eq!(resolve_preset_name("", "default"), "default");
        assert_eq!(resolve_preset_name("mine", "default"), "mine");
    }
}
