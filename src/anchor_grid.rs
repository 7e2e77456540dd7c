//! 各スケールのグリッドセルのオフセットとアンカーサイズを前計算するモジュール

use itertools::iproduct;
use log::{info, warn};
use ndarray::Array3;

use crate::config::{validate_scales, ScaleConfig};
use crate::error::Result;

/// 1スケール分のグリッドとアンカーのテーブル
#[derive(Debug, Clone)]
pub struct GridTable {
    /// ストライド
    pub stride: u32,
    /// 特徴マップの高さ
    pub fmp_h: usize,
    /// 特徴マップの幅
    pub fmp_w: usize,
    /// セルのオフセット (x, y)。shape: (cells, 1, 2)
    pub grid_xy: Array3<f32>,
    /// アンカーの (w, h)。shape: (cells, K, 2)
    pub anchor_wh: Array3<f32>,
}

impl GridTable {
    fn new(img_size: u32, scale: &ScaleConfig) -> Result<Self> {
        if img_size % scale.stride != 0 {
            warn!(
                "image size {} is not divisible by stride {}, the grid is floored",
                img_size, scale.stride
            );
        }
        let fmp_w = (img_size / scale.stride) as usize;
        let fmp_h = fmp_w;
        let cells = fmp_h * fmp_w;

        // 行優先, x が先
        let offsets: Vec<f32> = iproduct!(0..fmp_h, 0..fmp_w)
            .flat_map(|(r, c)| [c as f32, r as f32])
            .collect();
        let grid_xy = Array3::from_shape_vec((cells, 1, 2), offsets)?;

        let anchor_wh = Array3::from_shape_fn((cells, scale.anchors.len(), 2), |(_, k, d)| {
            scale.anchors[k][d]
        });

        Ok(Self {
            stride: scale.stride,
            fmp_h,
            fmp_w,
            grid_xy,
            anchor_wh,
        })
    }

    /// グリッドセルの数
    pub fn cells(&self) -> usize {
        self.fmp_h * self.fmp_w
    }

    /// セルあたりのアンカー数 K
    pub fn anchor_num(&self) -> usize {
        self.anchor_wh.dim().1
    }
}

/// 全スケールのグリッドテーブル。画像サイズごとのメモ化キャッシュ
#[derive(Debug, Clone)]
pub struct AnchorGrid {
    img_size: u32,
    scales: Vec<ScaleConfig>,
    tables: Vec<GridTable>,
}

impl AnchorGrid {
    /// 新しい `AnchorGrid` を作成します。
    ///
    /// # Args
    /// * `img_size` - 入力画像の一辺の長さ
    /// * `scales` - スケールの設定 (ストライドの昇順)
    ///
    /// # Return
    /// * 全スケールのテーブルを計算済みの `AnchorGrid`
    pub fn new(img_size: u32, scales: &[ScaleConfig]) -> Result<Self> {
        validate_scales(scales)?;
        let tables = Self::create_grid(img_size, scales)?;
        Ok(Self {
            img_size,
            scales: scales.to_vec(),
            tables,
        })
    }

    fn create_grid(img_size: u32, scales: &[ScaleConfig]) -> Result<Vec<GridTable>> {
        let tables = scales
            .iter()
            .map(|s| GridTable::new(img_size, s))
            .collect::<Result<Vec<_>>>()?;
        let dims: Vec<_> = tables.iter().map(|t| (t.fmp_h, t.fmp_w)).collect();
        info!("anchor grid built for image size {}: {:?}", img_size, dims);
        Ok(tables)
    }

    /// 画像サイズを変更し、テーブルを丸ごと作り直します。
    /// サイズが変わらない場合は何もしません。
    pub fn set_image_size(&mut self, img_size: u32) -> Result<()> {
        if img_size == self.img_size {
            return Ok(());
        }
        self.tables = Self::create_grid(img_size, &self.scales)?;
        self.img_size = img_size;
        Ok(())
    }

    pub fn img_size(&self) -> u32 {
        self.img_size
    }

    pub fn tables(&self) -> &[GridTable] {
        &self.tables
    }

    pub fn scales(&self) -> &[ScaleConfig] {
        &self.scales
    }

    /// 全スケールの予測数 N = Σ cells * K
    pub fn prediction_num(&self) -> usize {
        self.tables.iter().map(|t| t.cells() * t.anchor_num()).sum()
    }
}
