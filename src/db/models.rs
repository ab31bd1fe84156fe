//! Row types for the Persistence Store tables that aren't
//! already modeled elsewhere: `Item` (queue/history) lives in
//! `crate::queue::item`; these are presets, conditions, tasks and
//! notification targets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::EventKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub cli: String,
    /// System-provided, immutable; never set by the user API.
    pub default: bool,
    pub priority: i64,
    /// Path, relative to `config_path`, naming the archive file consulted
    /// for items using this preset. Empty means no archive check.
    #[serde(default)]
    pub download_archive: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub download_archive: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub name: String,
    pub filter: String,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub extras: HashMap<String, serde_json::Value>,
    pub priority: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    pub name: String,
    pub filter: String,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub extras: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// 5-field cron expression, or empty ("no schedule, handler-only").
    #[serde(default)]
    pub timer: String,
    #[serde(default)]
    pub preset: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub handler_enabled: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub timer: String,
    #[serde(default)]
    pub preset: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub handler_enabled: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub on: Vec<EventKind>,
    #[serde(default)]
    pub presets: Vec<String>,
    pub enabled: bool,
    pub request: NotificationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body_type: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub data_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTargetSpec {
    pub name: String,
    #[serde(default)]
    pub on: Vec<EventKind>,
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub request: NotificationRequest,
}

fn default_true() -> bool {
    true
}
