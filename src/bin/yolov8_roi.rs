// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// YOLOv8 ROI 检测工具
///
/// 1. detect:    检测图片, 可选按规则集校验 ROI 内的目标数量
/// 2. preview:   生成画 ROI 用的 letterbox 背景图
/// 3. models:    列出注册表中的模型
/// 4. use-model: 切换当前模型并写回配置
use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use yolov8_roi_rs::{Args, Command, DetectionService, Detector, OrtConfig, OrtEP, OrtLoader};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let ep = match (args.trt, args.cuda) {
        (Some(id), _) => OrtEP::Trt(id),
        (None, Some(id)) => OrtEP::CUDA(id),
        (None, None) => OrtEP::CPU,
    };
    let loader = OrtLoader::new(OrtConfig {
        ep,
        trt_fp16: args.fp16,
        ..Default::default()
    });
    let mut service = DetectionService::open(Detector::new(loader), &args.config)
        .with_context(|| format!("failed to open config {}", args.config.display()))?;

    match args.command {
        Command::Detect { image, rule, json } => {
            service
                .restore_current_model()
                .context("failed to load current model")?;
            let response = service
                .detect_file(&image, rule.as_deref())
                .with_context(|| format!("detection failed for {}", image.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for det in response.results.iter() {
                    let [x1, y1, x2, y2] = det.bbox.to_xyxy();
                    let roi = det
                        .roi_id
                        .map(|id| format!("ROI {}", id + 1))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<16} {:.2}  [{:.0}, {:.0}, {:.0}, {:.0}]  {}",
                        det.class_name, det.score, x1, y1, x2, y2, roi
                    );
                }
                if let Some(verdict) = &response.validation {
                    let mark = if verdict.passed { "PASS" } else { "FAIL" };
                    println!("{}: {}", mark, verdict.message);
                }
                println!("result image: {}", response.result_image);
            }
        }
        Command::Preview { image } => {
            // 有当前模型时按模型输入尺寸, 否则 640x640
            if service.config().model.current_model.is_some() {
                service
                    .restore_current_model()
                    .context("failed to load current model")?;
            }
            let path = service
                .roi_background_preview(&image)
                .with_context(|| format!("failed to build roi background from {}", image.display()))?;
            println!("{}", path.display());
        }
        Command::Models => {
            let current = service.config().model.current_model.as_deref();
            for entry in service.config().models.iter() {
                let mark = if Some(entry.name.as_str()) == current { "*" } else { " " };
                println!(
                    "{} {:<20} {:<8} {}  {}",
                    mark,
                    entry.name,
                    entry.model_type.as_deref().unwrap_or("auto"),
                    entry.path,
                    entry.description
                );
            }
        }
        Command::UseModel { name } => {
            let metadata = service
                .use_model(&name)
                .with_context(|| format!("failed to switch to model {}", name))?;
            info!(
                model = %name,
                input = ?metadata.input_size(),
                classes = metadata.class_names.len(),
                "current model switched"
            );
        }
    }

    Ok(())
}
