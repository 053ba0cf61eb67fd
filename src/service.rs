// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 服务层: 把检测器、配置存储和图片读写连在一起
//!
//! 检测入口 (文件 → 检测 → 结果图) / 模型切换 / ROI 背景预览 / 规则校验

use std::io;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{resolve_path, AppConfig};
use crate::detection::{validate, Detection, Detector, RuleStore, ValidationOutcome};
use crate::error::{ConfigError, DetectError, Result};
use crate::gen_time_string;
use crate::models::{letterbox_image, ModelMetadata, DEFAULT_INPUT_SIZE};
use crate::renderer::Renderer;

/// 结果图文件名前缀
pub const RESULT_PREFIX: &str = "result_";
/// ROI 背景上传文件名前缀
pub const ROI_BG_PREFIX: &str = "roi_bg_";
/// letterbox 后的 ROI 背景文件名前缀
pub const ROI_BG_RESIZED_PREFIX: &str = "roi_bg_resized_";

/// 一次检测的对外结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub success: bool,
    pub results: Vec<Detection>,
    /// 结果图路径
    pub result_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi_config: Option<String>,
    pub timestamp: String,
}

pub struct DetectionService {
    detector: Detector,
    config: AppConfig,
    config_path: PathBuf,
    root: PathBuf,
}

impl DetectionService {
    /// 相对路径 (模型、目录、字体) 都按配置文件所在目录解析
    pub fn new(detector: Detector, config: AppConfig, config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let detector = match &config.paths.font {
            Some(font) => {
                detector.with_renderer(Renderer::new().with_font_file(resolve_path(&root, font)))
            }
            None => detector,
        };
        Self {
            detector,
            config,
            config_path,
            root,
        }
    }

    /// 读取配置 (不存在则写出默认配置) 并构造服务
    pub fn open(detector: Detector, config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = AppConfig::load(&config_path)?;
        Ok(Self::new(detector, config, config_path))
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 修改后需要调用 [`DetectionService::save_config`] 持久化
    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_path(&self.root, path)
    }

    // ========== 模型 ==========

    /// 加载注册表中的模型并记为当前模型; 加载失败时配置不变
    pub fn use_model(&mut self, name: &str) -> Result<ModelMetadata> {
        let entry = self
            .config
            .find_model(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?;
        let path = self.resolve(&entry.path);
        info!(model = %name, path = %path.display(), "loading model");

        let metadata = self.detector.load_model(
            &path,
            entry.declared_type(),
            self.config.model.conf_threshold,
            self.config.model.iou_threshold,
        )?;
        self.config.set_current_model(name)?;
        self.save_config()?;
        Ok(metadata)
    }

    /// 启动时加载配置里记录的当前模型; 没有记录时返回 `None`
    pub fn restore_current_model(&self) -> Result<Option<ModelMetadata>> {
        let Some(name) = self.config.model.current_model.clone() else {
            info!("no current model configured");
            return Ok(None);
        };
        let entry = self.config.find_model(&name).ok_or_else(|| {
            warn!(model = %name, "current model missing from registry");
            ConfigError::UnknownModel(name.clone())
        })?;
        let metadata = self.detector.load_model(
            self.resolve(&entry.path),
            entry.declared_type(),
            self.config.model.conf_threshold,
            self.config.model.iou_threshold,
        )?;
        Ok(Some(metadata))
    }

    /// 更新并保存阈值; 已加载模型时同时发布新的模型快照
    pub fn set_thresholds(&mut self, conf_threshold: f32, iou_threshold: f32) -> Result<()> {
        self.config.set_thresholds(conf_threshold, iou_threshold);
        self.save_config()?;
        if self.detector.current().is_some() {
            self.detector.set_thresholds(conf_threshold, iou_threshold)?;
        }
        Ok(())
    }

    // ========== 检测 ==========

    /// 检测一张图片文件, 结果图写入 `<result_dir>/result_<文件名>`
    pub fn detect_file(
        &self,
        image_path: impl AsRef<Path>,
        rule_name: Option<&str>,
    ) -> Result<DetectionResponse> {
        let image_path = image_path.as_ref();
        let image = read_image(image_path)?;
        let output = self.detector.detect(&image, &self.config, rule_name)?;

        let result_dir = self.resolve(&self.config.paths.result_dir);
        let result_path = result_dir.join(prefixed_file_name(RESULT_PREFIX, image_path));
        write_image(&output.annotated, &result_path)?;
        info!(
            image = %image_path.display(),
            result = %result_path.display(),
            detections = output.detections.len(),
            "detection result saved"
        );

        Ok(DetectionResponse {
            success: true,
            results: output.detections,
            result_image: result_path.display().to_string(),
            validation: output.verdict,
            roi_config: output.roi_config_name,
            timestamp: gen_time_string("-"),
        })
    }

    /// 按名称校验已分配好 ROI 的检测结果; 规则集不存在时软通过
    pub fn validate(&self, detections: &[Detection], rule_name: &str) -> ValidationOutcome {
        match self.config.rule_set(rule_name) {
            Some(rule_set) => validate(detections, rule_set),
            None => ValidationOutcome::missing_rule_set(rule_name),
        }
    }

    // ========== ROI ==========

    /// 把背景图 letterbox 到当前模型输入尺寸 (未加载模型时 640x640),
    /// 写入上传目录并返回路径; ROI 就画在这张图上
    pub fn roi_background_preview(&self, image_path: impl AsRef<Path>) -> Result<PathBuf> {
        let image_path = image_path.as_ref();
        let image = read_image(image_path)?;
        let (width, height) = self
            .detector
            .metadata()
            .map(|m| m.input_size())
            .unwrap_or((DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE));
        let (resized, _) = letterbox_image(&image, width, height)?;

        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file_name.strip_prefix(ROI_BG_PREFIX).unwrap_or(&file_name);
        let out_path = self
            .resolve(&self.config.paths.upload_dir)
            .join(format!("{}{}", ROI_BG_RESIZED_PREFIX, stem));
        write_image(&resized, &out_path)?;
        info!(path = %out_path.display(), width, height, "roi background written");
        Ok(out_path)
    }
}

fn prefixed_file_name(prefix: &str, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", prefix, name)
}

fn read_image(path: &Path) -> Result<RgbImage> {
    if !path.is_file() {
        return Err(DetectError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "image file not found"),
        });
    }
    let image = image::open(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "failed to decode image");
        DetectError::ImageDecode(format!("{}: {}", path.display(), e))
    })?;
    Ok(image.to_rgb8())
}

fn write_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| DetectError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    image.save(path).map_err(|e| DetectError::ImageEncode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
