// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 应用配置 - 通过JSON文件管理模型注册表、ROI 配置和规则集
//!
//! `roi_configs` 和 `logic_rules` 都是有序数组, 数组顺序就是未指定规则时
//! ROI 回退查找的顺序

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{RoiConfiguration, RuleSet, RuleStore};
use crate::error::ConfigError;
use crate::models::{ModelType, DEFAULT_CONF_THRESHOLD, DEFAULT_IOU_THRESHOLD};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// 检测参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub conf_threshold: f32, // 置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    pub current_model: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            current_model: None,
        }
    }
}

/// 模型注册表中的一项
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub path: String,
    /// `yolov8` / `yolov11` / `yolov5`; 为空或无法识别时加载时自动判断
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            model_type: None,
            description: String::new(),
        }
    }

    pub fn with_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type.as_str().to_string());
        self
    }

    /// 显式声明的模型类型; 写成 `unknown` 或无法解析都视为未声明
    pub fn declared_type(&self) -> Option<ModelType> {
        let raw = self.model_type.as_deref()?;
        match raw.parse::<ModelType>() {
            Ok(ModelType::Unknown) => None,
            Ok(t) => Some(t),
            Err(e) => {
                warn!(model = %self.name, error = %e, "ignoring unrecognised model type");
                None
            }
        }
    }
}

/// 文件目录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub upload_dir: String,
    pub result_dir: String,
    /// 标签字体 (TTF); 不配置时用内置字体
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: "static/uploads".to_string(),
            result_dir: "static/results".to_string(),
            font: None,
        }
    }
}

/// 应用配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub models: Vec<ModelEntry>,
    pub roi_configs: Vec<RoiConfiguration>,
    pub logic_rules: Vec<RuleSet>,
    pub paths: PathsConfig,
}

impl AppConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "config not found, default config written");
            return Ok(config);
        }

        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        for roi_config in &mut config.roi_configs {
            normalize_roi_config(roi_config);
        }
        info!(
            path = %path.display(),
            models = config.models.len(),
            roi_configs = config.roi_configs.len(),
            rule_sets = config.logic_rules.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, json).map_err(write_err)?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    // ========== 模型注册表 ==========

    pub fn find_model(&self, name: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.name == name)
    }

    /// 同名则替换, 否则追加; 返回是否替换了已有项
    pub fn upsert_model(&mut self, entry: ModelEntry) -> bool {
        upsert_by_name(&mut self.models, entry, |m| &m.name)
    }

    /// 删除模型; 如果是当前模型, 一并清空 `current_model`
    pub fn remove_model(&mut self, name: &str) -> Option<ModelEntry> {
        let removed = remove_by_name(&mut self.models, name, |m| &m.name)?;
        if self.model.current_model.as_deref() == Some(name) {
            self.model.current_model = None;
        }
        Some(removed)
    }

    pub fn current_model(&self) -> Option<&ModelEntry> {
        self.model
            .current_model
            .as_deref()
            .and_then(|name| self.find_model(name))
    }

    pub fn set_current_model(&mut self, name: &str) -> Result<&ModelEntry, ConfigError> {
        if self.find_model(name).is_none() {
            return Err(ConfigError::UnknownModel(name.to_string()));
        }
        self.model.current_model = Some(name.to_string());
        self.find_model(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    pub fn set_thresholds(&mut self, conf_threshold: f32, iou_threshold: f32) {
        self.model.conf_threshold = conf_threshold;
        self.model.iou_threshold = iou_threshold;
    }

    // ========== ROI 配置 ==========

    pub fn find_roi_config(&self, name: &str) -> Option<&RoiConfiguration> {
        self.roi_configs.iter().find(|c| c.name == name)
    }

    /// 写入前把倒置的矩形角点排好序
    pub fn upsert_roi_config(&mut self, mut config: RoiConfiguration) -> bool {
        normalize_roi_config(&mut config);
        upsert_by_name(&mut self.roi_configs, config, |c| &c.name)
    }

    pub fn remove_roi_config(&mut self, name: &str) -> Option<RoiConfiguration> {
        remove_by_name(&mut self.roi_configs, name, |c| &c.name)
    }

    // ========== 规则集 ==========

    pub fn find_rule_set(&self, name: &str) -> Option<&RuleSet> {
        self.logic_rules.iter().find(|r| r.name == name)
    }

    pub fn upsert_rule_set(&mut self, rule_set: RuleSet) -> bool {
        upsert_by_name(&mut self.logic_rules, rule_set, |r| &r.name)
    }

    pub fn remove_rule_set(&mut self, name: &str) -> Option<RuleSet> {
        remove_by_name(&mut self.logic_rules, name, |r| &r.name)
    }
}

fn normalize_roi_config(config: &mut RoiConfiguration) {
    let fixed = config.normalize();
    if !fixed.is_empty() {
        warn!(config = %config.name, rois = ?fixed, "inverted rectangle corners reordered");
    }
}

impl RuleStore for AppConfig {
    fn rule_set(&self, name: &str) -> Option<&RuleSet> {
        self.find_rule_set(name)
    }

    fn roi_config(&self, name: &str) -> Option<&RoiConfiguration> {
        self.find_roi_config(name)
    }

    fn rule_sets(&self) -> &[RuleSet] {
        &self.logic_rules
    }
}

fn upsert_by_name<T>(items: &mut Vec<T>, item: T, name: impl Fn(&T) -> &String) -> bool {
    match items.iter().position(|x| name(x) == name(&item)) {
        Some(idx) => {
            items[idx] = item;
            true
        }
        None => {
            items.push(item);
            false
        }
    }
}

fn remove_by_name<T>(items: &mut Vec<T>, target: &str, name: impl Fn(&T) -> &String) -> Option<T> {
    let idx = items.iter().position(|x| name(x) == target)?;
    Some(items.remove(idx))
}

/// 相对路径按配置根目录解析, 绝对路径原样返回
pub fn resolve_path(root: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.as_ref().join(path)
    }
}

// ========== 命令行参数 ==========

/// YOLOv8 ROI 检测工具
#[derive(Parser, Debug)]
#[command(author, version, about = "YOLOv8 目标检测 + ROI 规则校验", long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// 使用 CUDA 推理 (设备号)
    #[arg(long)]
    pub cuda: Option<i32>,

    /// 使用 TensorRT 推理 (设备号)
    #[arg(long)]
    pub trt: Option<i32>,

    /// TensorRT 启用 FP16
    #[arg(long, default_value_t = false)]
    pub fp16: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 检测一张图片
    Detect {
        image: PathBuf,
        /// 规则集名称
        #[arg(short, long)]
        rule: Option<String>,
        /// 以 JSON 输出结果
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// 生成 ROI 绘制用的 letterbox 背景图
    Preview { image: PathBuf },
    /// 列出已注册模型
    Models,
    /// 切换当前模型
    UseModel { name: String },
}
