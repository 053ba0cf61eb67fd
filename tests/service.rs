//! 服务层集成测试: 配置文件 + 图片文件 + 模拟推理引擎

mod common;

use std::path::{Path, PathBuf};

use common::{channels_first, gray_image, MockEngine, MockLoader};
use tempfile::TempDir;
use yolov8_roi_rs::config::{AppConfig, ModelEntry};
use yolov8_roi_rs::detection::{CompareOp, LogicRule};
use yolov8_roi_rs::{
    DetectError, DetectionResponse, DetectionService, Detector, ModelType, RoiConfiguration,
    RoiShape, RuleSet,
};

struct Fixture {
    dir: TempDir,
    service: DetectionService,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.upsert_model(
            ModelEntry::new("people", "models/yolov8n.onnx").with_type(ModelType::YOLOv8),
        );
        config.upsert_model(ModelEntry::new("small", "models/tiny.onnx"));
        config.upsert_model(ModelEntry::new("ghost", "models/missing.onnx"));
        config.upsert_roi_config(RoiConfiguration::new(
            "door",
            vec![RoiShape::rect(0., 0., 100., 100.)],
        ));
        config.upsert_rule_set(RuleSet {
            name: "gate".into(),
            roi_config_name: "door".into(),
            model_name: "people".into(),
            rules: vec![LogicRule::new(0, "person", CompareOp::Eq, 1)],
        });
        config.save(&config_path).unwrap();

        let loader = MockLoader::default();
        loader.register(
            "yolov8n.onnx",
            MockEngine::new(channels_first(&[vec![50., 50., 20., 20., 0.9, 1.0, 0.0]], 32))
                .with_names(&["person", "car"]),
        );
        loader.register(
            "tiny.onnx",
            MockEngine::new(channels_first(&[vec![10., 10., 4., 4., 0.9]], 4)).with_size(320, 256),
        );

        let service = DetectionService::open(Detector::new(loader), &config_path).unwrap();
        Self { dir, service }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write_image(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(name);
        gray_image(width, height).save(&path).unwrap();
        path
    }

    fn reload_config(&self) -> AppConfig {
        AppConfig::load(self.path("config.json")).unwrap()
    }
}

#[test]
fn test_detect_file_writes_result_image() {
    let mut fx = Fixture::new();
    fx.service.use_model("people").unwrap();
    let image = fx.write_image("cam1.png", 640, 640);

    let response = fx.service.detect_file(&image, Some("gate")).unwrap();
    assert!(response.success);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].class_name, "person");
    assert_eq!(response.results[0].roi_id, Some(0));
    assert_eq!(response.roi_config.as_deref(), Some("door"));
    assert!(response.validation.as_ref().unwrap().passed);

    let result_path = fx.path("static/results/result_cam1.png");
    assert_eq!(Path::new(&response.result_image), result_path);
    let written = image::open(&result_path).unwrap();
    assert_eq!((written.width(), written.height()), (640, 640));
}

#[test]
fn test_response_json_shape() {
    let mut fx = Fixture::new();
    fx.service.use_model("people").unwrap();
    let image = fx.write_image("cam2.png", 640, 640);
    let response = fx.service.detect_file(&image, None).unwrap();

    let json = serde_json::to_value(&response).unwrap();
    let det = &json["results"][0];
    assert_eq!(det["bbox"].as_array().unwrap().len(), 4);
    assert_eq!(det["class_id"], 0);
    assert_eq!(det["class_name"], "person");
    assert!(json.get("validation").is_none());

    let back: DetectionResponse = serde_json::from_value(json).unwrap();
    assert_eq!(back, response);
}

#[test]
fn test_detect_file_errors() {
    let mut fx = Fixture::new();

    let image = fx.write_image("cam3.png", 32, 32);
    assert!(matches!(
        fx.service.detect_file(&image, None),
        Err(DetectError::NoModelLoaded)
    ));

    fx.service.use_model("people").unwrap();
    assert!(matches!(
        fx.service.detect_file(fx.path("nope.png"), None),
        Err(DetectError::Io { .. })
    ));

    let broken = fx.path("broken.jpg");
    std::fs::write(&broken, b"not an image").unwrap();
    assert!(matches!(
        fx.service.detect_file(&broken, None),
        Err(DetectError::ImageDecode(_))
    ));
}

#[test]
fn test_use_model_records_current_model() {
    let mut fx = Fixture::new();
    let meta = fx.service.use_model("small").unwrap();
    assert_eq!(meta.input_size(), (320, 256));
    assert_eq!(meta.class_names.len(), 80);
    assert_eq!(fx.reload_config().model.current_model.as_deref(), Some("small"));

    // 加载失败: 配置和当前模型都不变
    let err = fx.service.use_model("ghost").unwrap_err();
    assert!(matches!(err, DetectError::ModelLoad { .. }));
    assert_eq!(fx.reload_config().model.current_model.as_deref(), Some("small"));
    assert!(fx.service.detector().current().unwrap().path.ends_with("tiny.onnx"));

    assert!(matches!(
        fx.service.use_model("unregistered"),
        Err(DetectError::Config(_))
    ));
}

#[test]
fn test_restore_current_model() {
    let mut fx = Fixture::new();
    assert!(fx.service.restore_current_model().unwrap().is_none());

    fx.service.use_model("people").unwrap();
    let restarted = DetectionService::open(
        Detector::new({
            let loader = MockLoader::default();
            loader.register("yolov8n.onnx", MockEngine::new(channels_first(&[vec![0.; 5]], 1)));
            loader
        }),
        fx.path("config.json"),
    )
    .unwrap();
    let meta = restarted.restore_current_model().unwrap().unwrap();
    assert_eq!(meta.conf_threshold, 0.25);
    assert!(restarted.detector().current().unwrap().path.ends_with("yolov8n.onnx"));
}

#[test]
fn test_set_thresholds_persists_and_applies() {
    let mut fx = Fixture::new();
    fx.service.use_model("people").unwrap();
    fx.service.set_thresholds(0.95, 0.5).unwrap();

    let saved = fx.reload_config();
    assert_eq!(saved.model.conf_threshold, 0.95);
    assert_eq!(saved.model.iou_threshold, 0.5);
    assert_eq!(fx.service.detector().metadata().unwrap().conf_threshold, 0.95);

    let image = fx.write_image("cam4.png", 640, 640);
    assert!(fx.service.detect_file(&image, None).unwrap().results.is_empty());
}

#[test]
fn test_roi_background_preview() {
    let mut fx = Fixture::new();
    let bg = fx.write_image("roi_bg_gate.png", 1280, 720);

    // 未加载模型: 640x640
    let out = fx.service.roi_background_preview(&bg).unwrap();
    assert_eq!(out, fx.path("static/uploads/roi_bg_resized_gate.png"));
    let img = image::open(&out).unwrap();
    assert_eq!((img.width(), img.height()), (640, 640));

    fx.service.use_model("small").unwrap();
    let other = fx.write_image("lobby.png", 100, 100);
    let out = fx.service.roi_background_preview(&other).unwrap();
    assert!(out.ends_with("roi_bg_resized_lobby.png"));
    let img = image::open(&out).unwrap();
    assert_eq!((img.width(), img.height()), (320, 256));
}

#[test]
fn test_validate_by_name() {
    let fx = Fixture::new();
    let outcome = fx.service.validate(&[], "gate");
    assert!(!outcome.passed);
    assert_eq!(outcome.message, "ROI 1 person == 1, actual: 0");

    let outcome = fx.service.validate(&[], "unknown-rule");
    assert!(outcome.passed);
}
