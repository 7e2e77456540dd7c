//! 物体検出の結果を保持するモジュール

use ndarray::{Array1, Array2};

use crate::img_proc::Letterbox;

/// 1つの検出結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionData {
    /// クラス
    pub class: usize,
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
    /// コンフィデンス
    pub confidence: f32,
}

impl DetectionData {
    /// (x1, y1, x2, y2) の配列から新しい `DetectionData` を作成します。
    pub fn new(class: usize, bbox: [f32; 4], confidence: f32) -> Self {
        Self {
            class,
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            confidence,
        }
    }

    pub fn bbox(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    /// 座標とコンフィデンスがすべて有限か
    pub fn is_finite(&self) -> bool {
        self.bbox().iter().all(|v| v.is_finite()) && self.confidence.is_finite()
    }

    /// YOLOの出力した検出結果の座標を元の画像の座標系に戻します。
    ///
    /// # Args
    ///
    /// * `lb` - 入力作成時のレターボックスのパラメータ
    /// * `box_scale` - ボックス座標の単位 (ピクセル座標なら入力サイズ、正規化座標なら 1.0)
    /// * `width` - 元画像の幅
    /// * `height` - 元画像の高さ
    ///
    /// # Return
    /// * 新たなDetectionDataインスタンス
    pub fn reverse_transform(
        &self,
        lb: &Letterbox,
        box_scale: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let size = [width as f32, height as f32];
        let map =
            |v: f32, axis: usize| (v / box_scale - lb.offset[axis]) / lb.scale[axis] * size[axis];
        Self {
            x1: map(self.x1, 0),
            y1: map(self.y1, 1),
            x2: map(self.x2, 0),
            y2: map(self.y2, 1),
            ..*self
        }
    }
}

/// 最終的な検出結果。3つの並列配列として呼び出し側に渡します。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSet {
    /// (x1, y1, x2, y2)。shape: (N, 4)
    pub boxes: Array2<f32>,
    /// コンフィデンス。shape: (N,)
    pub scores: Array1<f32>,
    /// クラス番号。shape: (N,)
    pub class_indices: Array1<usize>,
}

impl DetectionSet {
    pub fn empty() -> Self {
        Self {
            boxes: Array2::zeros((0, 4)),
            scores: Array1::zeros(0),
            class_indices: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// 行ごとの `DetectionData` に戻します。
    pub fn to_detections(&self) -> Vec<DetectionData> {
        self.boxes
            .rows()
            .into_iter()
            .zip(self.scores.iter().zip(self.class_indices.iter()))
            .map(|(b, (&score, &class))| DetectionData::new(class, [b[0], b[1], b[2], b[3]], score))
            .collect()
    }
}

impl From<&[DetectionData]> for DetectionSet {
    fn from(detections: &[DetectionData]) -> Self {
        let n = detections.len();
        let boxes = Array2::from_shape_fn((n, 4), |(i, j)| detections[i].bbox()[j]);
        let scores = detections.iter().map(|d| d.confidence).collect();
        let class_indices = detections.iter().map(|d| d.class).collect();
        Self {
            boxes,
            scores,
            class_indices,
        }
    }
}

impl From<Vec<DetectionData>> for DetectionSet {
    fn from(detections: Vec<DetectionData>) -> Self {
        Self::from(detections.as_slice())
    }
}
