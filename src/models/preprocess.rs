// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// letterbox 预处理
// 等比缩放 → 居中贴到全零画布 → 归一化到 [0,1] → NCHW (batch = 1)

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};
use crate::utils::AffineMatrix;

/// 推理引擎期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// ultralytics 导出的模型都是 RGB 输入
    #[default]
    Rgb,
    Bgr,
}

/// 预处理参数, 后处理用它把框映射回原图
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessParams {
    pub offset_x: u32,
    pub offset_y: u32,
    pub scale: f32,
    pub original_width: u32,
    pub original_height: u32,
}

impl PreprocessParams {
    /// 原图 (w, h) 放进 (target_w, target_h) 画布时的参数
    pub fn compute(width: u32, height: u32, target_width: u32, target_height: u32) -> Self {
        let (scale, scaled_w, scaled_h) = scale_wh(width, height, target_width, target_height);
        Self {
            offset_x: (target_width - scaled_w) / 2,
            offset_y: (target_height - scaled_h) / 2,
            scale,
            original_width: width,
            original_height: height,
        }
    }

    /// 原图坐标 → 模型输入坐标
    pub fn forward(&self) -> AffineMatrix {
        AffineMatrix::letterbox(self.scale, self.offset_x as f32, self.offset_y as f32)
    }

    /// 模型输入坐标 → 原图坐标; 缩放为 0 (退化参数) 时为 None
    pub fn inverse(&self) -> Option<AffineMatrix> {
        self.forward().inverse()
    }

    /// 角点框映射回原图, 裁剪到 [0, W-1] x [0, H-1], 并保证 x1<=x2, y1<=y2
    pub fn rescale_box(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let [x1, y1, x2, y2] = self.inverse().unwrap_or_default().transform_box(xyxy);
        let max_x = self.original_width.saturating_sub(1) as f32;
        let max_y = self.original_height.saturating_sub(1) as f32;
        let (x1, x2) = (x1.clamp(0.0, max_x), x2.clamp(0.0, max_x));
        let (y1, y2) = (y1.clamp(0.0, max_y), y2.clamp(0.0, max_y));
        [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]
    }
}

/// 缩放比例与缩放后尺寸 (四舍五入, 不超过画布, 至少 1 像素)
fn scale_wh(w0: u32, h0: u32, w1: u32, h1: u32) -> (f32, u32, u32) {
    let r = (w1 as f32 / w0 as f32).min(h1 as f32 / h0 as f32);
    let w = ((w0 as f32 * r).round() as u32).clamp(1, w1);
    let h = ((h0 as f32 * r).round() as u32).clamp(1, h1);
    (r, w, h)
}

/// letterbox 后的画布 (u8) 与参数, ROI 背景预览也用它
pub fn letterbox_image(
    image: &RgbImage,
    target_width: u32,
    target_height: u32,
) -> Result<(RgbImage, PreprocessParams)> {
    let (w0, h0) = image.dimensions();
    if w0 == 0 || h0 == 0 || target_width == 0 || target_height == 0 {
        return Err(DetectError::ImageDecode(format!(
            "cannot letterbox {}x{} into {}x{}",
            w0, h0, target_width, target_height
        )));
    }

    let params = PreprocessParams::compute(w0, h0, target_width, target_height);
    let (_, w_new, h_new) = scale_wh(w0, h0, target_width, target_height);

    let mut canvas = RgbImage::new(target_width, target_height);
    if (w_new, h_new) == (w0, h0) {
        imageops::overlay(
            &mut canvas,
            image,
            params.offset_x as i64,
            params.offset_y as i64,
        );
    } else {
        let resized = imageops::resize(image, w_new, h_new, FilterType::Triangle);
        imageops::overlay(
            &mut canvas,
            &resized,
            params.offset_x as i64,
            params.offset_y as i64,
        );
    }

    Ok((canvas, params))
}

/// 预处理: 图片 → (1, 3, H, W) 张量 + 反变换参数
pub fn preprocess(
    image: &RgbImage,
    target_width: u32,
    target_height: u32,
    order: ChannelOrder,
) -> Result<(ArrayD<f32>, PreprocessParams)> {
    let (canvas, params) = letterbox_image(image, target_width, target_height)?;

    let mut ys = Array::zeros((1, 3, target_height as usize, target_width as usize));
    for (x, y, rgb) in canvas.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        let (c0, c2) = match order {
            ChannelOrder::Rgb => (r, b),
            ChannelOrder::Bgr => (b, r),
        };
        ys[[0, 0, y, x]] = c0 as f32 / 255.0;
        ys[[0, 1, y, x]] = g as f32 / 255.0;
        ys[[0, 2, y, x]] = c2 as f32 / 255.0;
    }

    Ok((ys.into_dyn(), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    #[test]
    fn test_square_image_is_identity() {
        let img = RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]));
        let (x, params) = preprocess(&img, 64, 64, ChannelOrder::Rgb).unwrap();
        assert_eq!(x.shape(), &[1, 3, 64, 64]);
        assert_eq!(params.scale, 1.0);
        assert_eq!((params.offset_x, params.offset_y), (0, 0));
        assert_eq!(x[[0, 0, 10, 10]], 1.0);
        assert_eq!(x[[0, 2, 10, 10]], 0.0);
    }

    #[test]
    fn test_wide_image_is_padded_vertically() {
        let img = RgbImage::from_pixel(1280, 720, Rgb([0, 0, 255]));
        let (x, params) = preprocess(&img, 640, 640, ChannelOrder::Rgb).unwrap();
        assert_abs_diff_eq!(params.scale, 0.5);
        assert_eq!((params.offset_x, params.offset_y), (0, 140));
        assert_eq!((params.original_width, params.original_height), (1280, 720));
        // 上方填充区为 0, 中间是图片
        assert_eq!(x[[0, 2, 10, 320]], 0.0);
        assert_abs_diff_eq!(x[[0, 2, 320, 320]], 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_bgr_order_swaps_channels() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 128, 0]));
        let (x, _) = preprocess(&img, 8, 8, ChannelOrder::Bgr).unwrap();
        assert_eq!(x[[0, 0, 0, 0]], 0.0);
        assert_eq!(x[[0, 2, 0, 0]], 1.0);
    }

    #[test]
    fn test_rescale_box_inverts_forward() {
        let params = PreprocessParams::compute(1280, 720, 640, 640);
        let original = [100.0, 200.0, 300.0, 400.0];
        let model_space = params.forward().transform_box(original);
        assert_eq!(model_space, [50.0, 240.0, 150.0, 340.0]);
        let back = params.rescale_box(model_space);
        for (a, b) in back.iter().zip(original.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_rescale_box_clips() {
        let params = PreprocessParams::compute(100, 50, 100, 50);
        assert_eq!(
            params.rescale_box([-10.0, -5.0, 150.0, 70.0]),
            [0.0, 0.0, 99.0, 49.0]
        );
    }

    #[test]
    fn test_inverse_undoes_letterbox() {
        let params = PreprocessParams::compute(1280, 720, 640, 640);
        let inv = params.inverse().unwrap();
        let (x, y) = inv.transform_point(0.0, 140.0);
        assert_abs_diff_eq!(x, 0.0);
        assert_abs_diff_eq!(y, 0.0);
        let (x, y) = inv.transform_point(640.0, 500.0);
        assert_abs_diff_eq!(x, 1280.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 720.0, epsilon = 1e-3);

        let degenerate = PreprocessParams { scale: 0.0, ..params };
        assert!(degenerate.inverse().is_none());
    }

    #[test]
    fn test_rescale_box_orders_corners() {
        // 负宽高的框 (x1 > x2, y1 > y2) 也要输出有序角点
        let params = PreprocessParams::compute(1280, 720, 640, 640);
        let [x1, y1, x2, y2] = params.rescale_box([150.0, 340.0, 50.0, 240.0]);
        assert!(x1 <= x2 && y1 <= y2);
        assert_abs_diff_eq!(x1, 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y1, 200.0, epsilon = 1e-3);
        assert_abs_diff_eq!(x2, 300.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y2, 400.0, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_image_rejected() {
        let img = RgbImage::new(0, 10);
        assert!(preprocess(&img, 640, 640, ChannelOrder::Rgb).is_err());
    }
}
