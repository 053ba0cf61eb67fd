// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 检测器 (Detector)
//! 职责: 持有当前模型 → 预处理 → 推理 → 后处理 → ROI 分配 / 规则校验 → 渲染
//!
//! 当前模型是一个整体快照 (引擎 + 元数据), 切换模型或阈值时构造新快照再整体替换,
//! 正在进行的 detect 调用继续使用开始时拿到的快照

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info};

use crate::detection::{
    assign_roi, assign_roi_first_match, validate, Detection, DetectionOutput, RoiConfiguration,
    RuleSet, ValidationOutcome,
};
use crate::error::{DetectError, PostprocessError, Result};
use crate::models::{
    preprocess, ChannelOrder, ClassNames, InferenceEngine, ModelMetadata, ModelType, Postprocessor,
};
use crate::renderer::Renderer;

/// 推理引擎加载器 (ONNX Runtime 或测试用实现)
pub trait EngineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn InferenceEngine>>;
}

/// ROI 配置与规则集的只读来源
pub trait RuleStore {
    fn rule_set(&self, name: &str) -> Option<&RuleSet>;
    fn roi_config(&self, name: &str) -> Option<&RoiConfiguration>;
    /// 全部规则集, 按配置顺序
    fn rule_sets(&self) -> &[RuleSet];
}

/// 一个完整构造好的模型快照
pub struct LoadedModel {
    pub path: PathBuf,
    pub model_type: ModelType,
    pub metadata: ModelMetadata,
    engine: Arc<dyn InferenceEngine>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("path", &self.path)
            .field("model_type", &self.model_type)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl LoadedModel {
    /// 由引擎推导元数据 (输入尺寸、类别名称) 并确定模型类型
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        path: impl Into<PathBuf>,
        model_type: Option<ModelType>,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Self {
        let path = path.into();
        let model_type = model_type
            .filter(|t| *t != ModelType::Unknown)
            .unwrap_or_else(|| detect_model_type(engine.as_ref(), &path));
        let (input_width, input_height) = engine.input_size();
        let class_names = ClassNames::resolve(engine.as_ref(), &path);

        Self {
            path,
            model_type,
            metadata: ModelMetadata {
                input_width,
                input_height,
                class_names,
                conf_threshold,
                iou_threshold,
            },
            engine,
        }
    }

    /// 共享同一个引擎, 仅替换阈值
    fn with_thresholds(&self, conf_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            path: self.path.clone(),
            model_type: self.model_type,
            metadata: ModelMetadata {
                conf_threshold,
                iou_threshold,
                ..self.metadata.clone()
            },
            engine: Arc::clone(&self.engine),
        }
    }
}

/// 文件名 → 内嵌元数据键 → 默认 v8
fn detect_model_type(engine: &dyn InferenceEngine, path: &Path) -> ModelType {
    match ModelType::from_path(path) {
        ModelType::Unknown => match ModelType::from_metadata_keys(&engine.metadata_keys()) {
            ModelType::Unknown => ModelType::YOLOv8,
            t => t,
        },
        t => t,
    }
}

/// 检测编排器
pub struct Detector {
    loader: Box<dyn EngineLoader>,
    current: RwLock<Option<Arc<LoadedModel>>>,
    channel_order: ChannelOrder,
    renderer: Renderer,
}

impl Detector {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            current: RwLock::new(None),
            channel_order: ChannelOrder::default(),
            renderer: Renderer::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    /// 当前模型快照
    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.current().map(|m| m.metadata.clone())
    }

    fn publish(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let model = Arc::new(model);
        match self.current.write() {
            Ok(mut guard) => *guard = Some(Arc::clone(&model)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&model)),
        }
        model
    }

    /// 加载模型; 失败时之前的模型保持生效
    pub fn load_model(
        &self,
        path: impl AsRef<Path>,
        model_type: Option<ModelType>,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<ModelMetadata> {
        let path = path.as_ref();
        let t = Instant::now();
        let engine = self.loader.load(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "model load failed, keeping previous model");
            match e {
                DetectError::ModelLoad { .. } => e,
                other => DetectError::ModelLoad {
                    path: path.to_path_buf(),
                    reason: other.to_string(),
                },
            }
        })?;
        let model = self.install_engine(engine, path, model_type, conf_threshold, iou_threshold);
        info!(elapsed = ?t.elapsed(), "model ready");
        Ok(model.metadata.clone())
    }

    /// 用已经打开的引擎构造快照并发布
    pub fn install_engine(
        &self,
        engine: Arc<dyn InferenceEngine>,
        path: impl Into<PathBuf>,
        model_type: Option<ModelType>,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Arc<LoadedModel> {
        let model = LoadedModel::new(engine, path, model_type, conf_threshold, iou_threshold);
        info!(
            path = %model.path.display(),
            model_type = %model.model_type,
            input = ?model.metadata.input_size(),
            classes = model.metadata.class_names.len(),
            conf = conf_threshold,
            iou = iou_threshold,
            "model loaded"
        );
        self.publish(model)
    }

    /// 更新阈值: 构造共享引擎的新快照后发布
    pub fn set_thresholds(&self, conf_threshold: f32, iou_threshold: f32) -> Result<ModelMetadata> {
        let current = self.current().ok_or(DetectError::NoModelLoaded)?;
        let model = self.publish(current.with_thresholds(conf_threshold, iou_threshold));
        info!(conf = conf_threshold, iou = iou_threshold, "thresholds updated");
        Ok(model.metadata.clone())
    }

    /// 检测一张图片
    ///
    /// 指定规则集时按其 ROI 配置分配并校验; 否则按规则集顺序在所有 ROI 配置里找第一个命中
    pub fn detect(
        &self,
        image: &RgbImage,
        store: &dyn RuleStore,
        rule_name: Option<&str>,
    ) -> Result<DetectionOutput> {
        let model = self.current().ok_or(DetectError::NoModelLoaded)?;
        if !model.model_type.supports_detect() {
            return Err(DetectError::UnsupportedModelType(model.model_type));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::ImageDecode("empty image".to_string()));
        }
        let meta = &model.metadata;

        let t_pre = Instant::now();
        let (xs, params) = preprocess(image, meta.input_width, meta.input_height, self.channel_order)?;
        debug!(elapsed = ?t_pre.elapsed(), "[Model Preprocess]");

        let t_run = Instant::now();
        let ys = model.engine.run(xs).map_err(|e| {
            error!(error = %e, "inference failed");
            e
        })?;
        debug!(elapsed = ?t_run.elapsed(), "[Model Inference]");

        let output = ys.first().ok_or(PostprocessError::MissingOutput)?;
        let postprocessor = Postprocessor::new(meta.conf_threshold, meta.iou_threshold);
        let mut detections = postprocessor
            .postprocess(output, &params, &meta.class_names)
            .map_err(|e| {
                error!(error = %e, shape = ?output.shape(), "postprocess failed after inference");
                e
            })?;

        let (verdict, applied) = match rule_name {
            Some(name) => self.apply_rule(&mut detections, store, name),
            None => {
                let configs = store
                    .rule_sets()
                    .iter()
                    .filter_map(|rs| store.roi_config(&rs.roi_config_name));
                assign_roi_first_match(&mut detections, configs);
                (None, None)
            }
        };

        let rois = applied.map(|c| c.rois.as_slice()).unwrap_or(&[]);
        let annotated = self.renderer.annotate(image, &detections, rois);

        info!(
            detections = detections.len(),
            rule = rule_name.unwrap_or("-"),
            passed = verdict.as_ref().map(|v| v.passed),
            "detect done"
        );
        Ok(DetectionOutput {
            detections,
            annotated,
            verdict,
            roi_config_name: applied.map(|c| c.name.clone()),
        })
    }

    fn apply_rule<'s>(
        &self,
        detections: &mut [Detection],
        store: &'s dyn RuleStore,
        name: &str,
    ) -> (Option<ValidationOutcome>, Option<&'s RoiConfiguration>) {
        let Some(rule_set) = store.rule_set(name) else {
            return (Some(ValidationOutcome::missing_rule_set(name)), None);
        };
        let Some(config) = store.roi_config(&rule_set.roi_config_name) else {
            return (
                Some(ValidationOutcome::missing_roi_config(
                    name,
                    &rule_set.roi_config_name,
                )),
                None,
            );
        };
        assign_roi(detections, config);
        (Some(validate(detections, rule_set)), Some(config))
    }
}
