// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 结果渲染: 在输入图片的副本上画检测框、标签和 ROI 区域

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::warn;

use crate::detection::{Detection, RoiShape};

/// 框线宽度 (像素)
const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 内置标签字体 (DejaVu Sans)
static DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// 按类别 id 固定种子生成颜色, 同一类别每次都相同
pub fn class_color(class_id: usize) -> Rgb<u8> {
    let mut rng = StdRng::seed_from_u64(class_id as u64);
    Rgb([rng.gen(), rng.gen(), rng.gen()])
}

/// 标注渲染器
///
/// 默认使用内置字体画标签; 可用 `paths.font` 换成其他 TTF
#[derive(Clone)]
pub struct Renderer {
    font: Option<FontArc>,
    font_scale: PxScale,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("font", &self.font.is_some())
            .field("font_scale", &self.font_scale.x)
            .finish()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let font = FontArc::try_from_slice(DEFAULT_FONT)
            .map_err(|e| warn!(error = %e, "built-in label font invalid, labels disabled"))
            .ok();
        Self {
            font,
            font_scale: PxScale::from(LABEL_FONT_SIZE),
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// 只画框, 不画文字
    pub fn without_labels(mut self) -> Self {
        self.font = None;
        self
    }

    /// 从 TTF 文件加载字体, 失败时记录警告并保留当前字体
    pub fn with_font_file(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => self.with_font(font),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load label font, keeping built-in font");
                self
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 返回画好的副本, 不修改输入图片
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection], rois: &[RoiShape]) -> RgbImage {
        let mut canvas = image.clone();
        for (idx, roi) in rois.iter().enumerate() {
            self.draw_roi(&mut canvas, idx, roi);
        }
        for det in detections {
            self.draw_detection(&mut canvas, det);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, det: &Detection) {
        let color = class_color(det.class_id);
        let [x1, y1, x2, y2] = det.bbox.to_xyxy().map(|v| v as i32);
        draw_thick_rect(canvas, x1, y1, x2, y2, color);

        let mut label = format!("{}: {:.2}", det.class_name, det.score);
        if let Some(roi_id) = det.roi_id {
            label.push_str(&format!(" ROI {}", roi_id + 1));
        }
        self.draw_label(canvas, x1, y1, &label, color);
    }

    fn draw_roi(&self, canvas: &mut RgbImage, idx: usize, roi: &RoiShape) {
        let color = Rgb(roi.rgb());
        let anchor = match roi {
            RoiShape::Rectangle { x1, y1, x2, y2, .. } => {
                let (l, r) = (x1.min(*x2) as i32, x1.max(*x2) as i32);
                let (t, b) = (y1.min(*y2) as i32, y1.max(*y2) as i32);
                draw_thick_rect(canvas, l, t, r, b, color);
                Some((l, t))
            }
            RoiShape::Polygon { points, .. } => {
                let n = points.len();
                for i in 0..n {
                    let (a, b) = (points[i], points[(i + 1) % n]);
                    draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), color);
                }
                points.first().map(|p| (p.x as i32, p.y as i32))
            }
        };
        if let Some((x, y)) = anchor {
            self.draw_label(canvas, x, y, &format!("ROI {}", idx + 1), color);
        }
    }

    /// 标签画在框的上方, 放不下时画在框内
    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let (tw, th) = text_size(self.font_scale, font, text);
        let h = th as i32 + 2 * LABEL_PADDING;
        let top = if y - h >= 0 { y - h } else { y.max(0) };
        let left = x.max(0);

        let rect = Rect::at(left, top).of_size(tw + 2 * LABEL_PADDING as u32, h as u32);
        draw_filled_rect_mut(canvas, rect, color);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            left + LABEL_PADDING,
            top + LABEL_PADDING,
            self.font_scale,
            font,
            text,
        );
    }
}

fn draw_thick_rect(canvas: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    for t in 0..BOX_THICKNESS {
        let (w, h) = (x2 - x1 - 2 * t, y2 - y1 - 2 * t);
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(w as u32 + 1, h as u32 + 1);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bbox;

    #[test]
    fn test_class_color_is_deterministic() {
        assert_eq!(class_color(3), class_color(3));
        assert_ne!(class_color(0), class_color(1));
    }

    #[test]
    fn test_annotate_draws_on_copy() {
        let image = RgbImage::new(100, 100);
        let det = Detection::new(Bbox::new(10., 10., 50., 50.), 0.9, 2, "car");
        let roi = RoiShape::Rectangle {
            x1: 60.,
            y1: 60.,
            x2: 90.,
            y2: 90.,
            color: "#ff0000".into(),
        };
        let out = Renderer::new()
            .without_labels()
            .annotate(&image, &[det], &[roi]);

        // 原图不变
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(*out.get_pixel(10, 10), class_color(2));
        assert_eq!(*out.get_pixel(11, 30), class_color(2));
        assert_eq!(*out.get_pixel(30, 30), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(60, 75), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_labels_drawn_with_built_in_font() {
        let image = RgbImage::new(100, 100);
        let det = Detection::new(Bbox::new(10., 40., 50., 80.), 0.9, 2, "car");
        let roi = RoiShape::rect(60., 60., 90., 90.);

        let renderer = Renderer::new();
        assert!(renderer.has_font());
        let labeled = renderer.annotate(&image, &[det.clone()], &[roi.clone()]);
        let plain = renderer.without_labels().annotate(&image, &[det], &[roi]);
        // 标签画在框上方
        let above_box = |img: &RgbImage| (10..50).map(|x| *img.get_pixel(x, 30)).collect::<Vec<_>>();
        assert_ne!(above_box(&labeled), above_box(&plain));
        assert!(above_box(&plain).iter().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_missing_font_file_keeps_built_in_font() {
        let r = Renderer::new().with_font_file("/nonexistent/font.ttf");
        assert!(r.has_font());
        assert!(!r.without_labels().has_font());
    }
}
