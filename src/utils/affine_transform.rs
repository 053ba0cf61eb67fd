// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 仿射变换工具模块
/// letterbox 的正向映射 (原图 → 模型输入) 与反向映射 (模型输入 → 原图)
/// 都表示成 2x3 仿射矩阵, 保证两个方向使用同一组参数

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMatrix {
    pub fn identity() -> Self {
        Self::scale(1.0, 1.0)
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            b1: dx,
            b2: dy,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: sy,
            b2: 0.0,
        }
    }

    /// letterbox 正向变换: 先等比缩放, 再平移到画布中央
    pub fn letterbox(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self::translation(offset_x, offset_y).compose(&Self::scale(scale, scale))
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a11 * x + self.a12 * y + self.b1,
            self.a21 * x + self.a22 * y + self.b2,
        )
    }

    /// 对角点格式的框做变换 (只适用于不含旋转的矩阵)
    pub fn transform_box(&self, b: [f32; 4]) -> [f32; 4] {
        let (x1, y1) = self.transform_point(b[0], b[1]);
        let (x2, y2) = self.transform_point(b[2], b[3]);
        [x1, y1, x2, y2]
    }

    /// 逆矩阵, 行列式为 0 时返回 None
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }

    /// 矩阵组合 (self * other), 即先应用 other 再应用 self
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let matrix = AffineMatrix::identity();
        assert_eq!(matrix.transform_point(10.0, 20.0), (10.0, 20.0));
    }

    #[test]
    fn test_letterbox_forward() {
        // 1280x720 → 640x640: scale 0.5, 上下各留 140 像素
        let matrix = AffineMatrix::letterbox(0.5, 0.0, 140.0);
        assert_eq!(matrix.transform_point(0.0, 0.0), (0.0, 140.0));
        assert_eq!(matrix.transform_point(1280.0, 720.0), (640.0, 500.0));
    }

    #[test]
    fn test_letterbox_inverse_maps_canvas_back() {
        // 1280x720 → 640x640 的逆变换: 画布有效区域的角点回到原图角点
        let inv = AffineMatrix::letterbox(0.5, 0.0, 140.0).inverse().unwrap();
        assert_eq!(inv.transform_point(0.0, 140.0), (0.0, 0.0));
        assert_eq!(inv.transform_point(640.0, 500.0), (1280.0, 720.0));
        assert_eq!(inv.transform_box([50.0, 240.0, 150.0, 340.0]), [100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn test_zero_scale_letterbox_has_no_inverse() {
        assert!(AffineMatrix::letterbox(0.0, 10.0, 10.0).inverse().is_none());
    }
}
