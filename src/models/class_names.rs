// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 类别名称解析
// 按顺序尝试: 模型内嵌元数据 → 模型旁的类别文件 → 文件名推断 → COCO 默认列表,
// 第一个非空结果生效

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::InferenceEngine;

/// 字典形式的类别表里允许的最大下标
const MAX_CLASS_INDEX: usize = 100_000;

/// 可能存放类别名称的元数据键
const METADATA_KEYS: [&str; 4] = ["names", "classes", "labels", "class_names"];

/// COCO 数据集 80 类
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// `{0: 'person', 1: "car"}` 这种导出器常写的字典字面量
static DICT_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+)\s*:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
        .unwrap()
});

/// 有序的类别名称表, 下标即 class id
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn coco() -> Self {
        Self(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    /// 越界的 id 显示为 `Unknown-<id>`
    pub fn name(&self, class_id: usize) -> String {
        self.0
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("Unknown-{}", class_id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// 按顺序执行解析链
    pub fn resolve(engine: &dyn InferenceEngine, model_path: &Path) -> Self {
        let strategies: [(&str, Strategy); 3] = [
            ("metadata", from_metadata),
            ("sidecar file", from_sidecar_file),
            ("file name", from_file_name),
        ];
        for (label, strategy) in strategies {
            if let Some(names) = strategy(engine, model_path).filter(|n| !n.is_empty()) {
                info!(source = label, count = names.len(), "class names resolved");
                return Self(names);
            }
        }
        info!("no class names found, using COCO defaults");
        Self::coco()
    }
}

impl From<Vec<String>> for ClassNames {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

type Strategy = fn(&dyn InferenceEngine, &Path) -> Option<Vec<String>>;

/// 1. 模型内嵌元数据
fn from_metadata(engine: &dyn InferenceEngine, _: &Path) -> Option<Vec<String>> {
    METADATA_KEYS.iter().find_map(|key| {
        let value = engine.metadata_value(key)?;
        debug!(key, "found class metadata");
        let names = parse_class_list(&value);
        if names.is_none() {
            warn!(key, "class metadata present but not decodable");
        }
        names
    })
}

/// 依次尝试: 下标→名称字典, JSON 列表, 逗号分隔, 换行分隔
pub fn parse_class_list(value: &str) -> Option<Vec<String>> {
    parse_index_dict(value)
        .or_else(|| serde_json::from_str::<Vec<String>>(value).ok())
        .or_else(|| split_list(value, ','))
        .or_else(|| split_list(value, '\n'))
        .filter(|names| !names.is_empty())
}

fn parse_index_dict(value: &str) -> Option<Vec<String>> {
    let value = value.trim();
    if !value.starts_with('{') {
        return None;
    }

    let entries: BTreeMap<usize, String> =
        match serde_json::from_str::<BTreeMap<String, String>>(value) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(k, v)| Some((k.trim().parse().ok()?, v)))
                .collect(),
            Err(_) => DICT_ENTRY
                .captures_iter(value)
                .filter_map(|cap| {
                    let idx = cap.get(1)?.as_str().parse().ok()?;
                    let name = cap.get(2).or_else(|| cap.get(3))?.as_str();
                    Some((idx, name.replace("\\'", "'").replace("\\\"", "\"")))
                })
                .collect(),
        };

    let max_idx = *entries.keys().next_back()?;
    if max_idx > MAX_CLASS_INDEX {
        warn!(max_idx, "class index out of range, ignoring dict metadata");
        return None;
    }
    let mut names = vec![String::new(); max_idx.checked_add(1)?];
    for (idx, name) in entries {
        names[idx] = name;
    }
    Some(names)
}

fn split_list(value: &str, sep: char) -> Option<Vec<String>> {
    if !value.contains(sep) {
        return None;
    }
    let names: Vec<String> = value
        .split(sep)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Some(names)
}

/// 2. 模型旁的类别文件
fn from_sidecar_file(_: &dyn InferenceEngine, model_path: &Path) -> Option<Vec<String>> {
    let dir = model_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = model_path.file_stem()?.to_string_lossy();
    let candidates = [
        "classes.txt".to_string(),
        "labels.txt".to_string(),
        format!("{stem}_classes.txt"),
        format!("{stem}.names"),
        format!("{stem}_names.txt"),
        "coco.names".to_string(),
        "coco_names.txt".to_string(),
    ];

    candidates.iter().find_map(|name| {
        let path = dir.join(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read class file");
                return None;
            }
        };
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if names.is_empty() {
            None
        } else {
            debug!(path = %path.display(), "class names read from file");
            Some(names)
        }
    })
}

/// 3. 根据文件名和输出形状推断
fn from_file_name(engine: &dyn InferenceEngine, model_path: &Path) -> Option<Vec<String>> {
    let basename = model_path.file_name()?.to_string_lossy().to_lowercase();
    if basename.contains("qr") {
        return Some(vec!["qrcode".to_string()]);
    }
    if basename.contains("face") {
        return Some(vec!["face".to_string()]);
    }

    // (1, 5, N) 的单类别模型, 用文件名当类别名
    if engine.output_channels() == Some(5) {
        let stem = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = stem.replace("yolov8", "").replace('_', " ").trim().to_string();
        if name.chars().count() > 1 && !name.chars().all(|c| c.is_ascii_digit()) {
            return Some(vec![name]);
        }
        return Some(vec!["object".to_string()]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use ndarray::ArrayD;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MetaOnly {
        meta: HashMap<String, String>,
        channels: Option<usize>,
    }

    impl InferenceEngine for MetaOnly {
        fn input_size(&self) -> (u32, u32) {
            (640, 640)
        }
        fn run(&self, _: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
            Ok(vec![])
        }
        fn metadata_value(&self, key: &str) -> Option<String> {
            self.meta.get(key).cloned()
        }
        fn output_channels(&self) -> Option<usize> {
            self.channels
        }
    }

    fn with_meta(key: &str, value: &str) -> MetaOnly {
        MetaOnly {
            meta: HashMap::from([(key.to_string(), value.to_string())]),
            channels: None,
        }
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(
            parse_class_list(r#"{"0": "cat", "2": "dog"}"#).unwrap(),
            vec!["cat", "", "dog"]
        );
        assert_eq!(
            parse_class_list("{0: 'person', 1: 'bicycle'}").unwrap(),
            vec!["person", "bicycle"]
        );
        assert_eq!(
            parse_class_list(r#"["a", "b"]"#).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(parse_class_list("a, b ,c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(parse_class_list("a\nb\n\n").unwrap(), vec!["a", "b"]);
        assert!(parse_class_list("single").is_none());
        assert!(parse_class_list("{}").is_none());
    }

    #[test]
    fn test_huge_dict_index_is_rejected() {
        assert!(parse_index_dict(r#"{"18446744073709551615": "x"}"#).is_none());
        assert!(parse_index_dict("{4000000000: 'x'}").is_none());
        assert_eq!(parse_class_list(r#"{"18446744073709551615": "x"}"#), None);

        // 字典无效时退回后续策略
        let mut engine = with_meta("names", "{4000000000: 'x'}");
        engine.meta.insert("classes".to_string(), "a,b".to_string());
        let names = ClassNames::resolve(&engine, Path::new("/nonexistent/m.onnx"));
        assert_eq!(names.as_slice(), ["a", "b"]);
    }

    #[test]
    fn test_metadata_key_order() {
        let mut engine = with_meta("labels", "x,y");
        engine
            .meta
            .insert("names".to_string(), "{0: 'person'}".to_string());
        let names = ClassNames::resolve(&engine, Path::new("m.onnx"));
        assert_eq!(names.as_slice(), ["person"]);
    }

    #[test]
    fn test_sidecar_file() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("helmet.onnx");
        fs::write(dir.path().join("helmet.names"), "hat\n  head \n\n").unwrap();
        let names = ClassNames::resolve(&MetaOnly::default(), &model);
        assert_eq!(names.as_slice(), ["hat", "head"]);
    }

    #[test]
    fn test_file_name_heuristics() {
        let engine = MetaOnly::default();
        let names = ClassNames::resolve(&engine, Path::new("/nonexistent/QRCode_v2.onnx"));
        assert_eq!(names.as_slice(), ["qrcode"]);

        let single = MetaOnly {
            channels: Some(5),
            ..Default::default()
        };
        let names = ClassNames::resolve(&single, Path::new("/nonexistent/yolov8_fire_extinguisher.onnx"));
        assert_eq!(names.as_slice(), ["fire extinguisher"]);
        let names = ClassNames::resolve(&single, Path::new("/nonexistent/yolov8_1.onnx"));
        assert_eq!(names.as_slice(), ["object"]);
    }

    #[test]
    fn test_default_and_unknown() {
        let names = ClassNames::resolve(&MetaOnly::default(), Path::new("/nonexistent/best.onnx"));
        assert_eq!(names.len(), 80);
        assert_eq!(names.name(0), "person");
        assert_eq!(names.name(80), "Unknown-80");
    }
}
