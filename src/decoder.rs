//! ネットワークの生出力をオブジェクトネス、クラス確率、バウンディングボックスに変換するモジュール
//!
//! 1スケールの生出力は (grid_h, grid_w, K * (1 + C + 4)) の配列で、
//! チャネルは [objectness (K), class logits (K * C), box params (K * 4)] の順に並びます。

use itertools::iproduct;
use log::debug;
use ndarray::{concatenate, s, Array2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::anchor_grid::{AnchorGrid, GridTable};
use crate::config::BoxSpace;
use crate::error::{Error, Result};

/// 全スケールを結合したデコード結果
#[derive(Debug, Clone)]
pub struct DecodedOutput {
    /// オブジェクトネス確率。shape: (N, 1)
    pub objectness: Array2<f32>,
    /// クラス確率分布。shape: (N, C)
    pub class_prob: Array2<f32>,
    /// (x1, y1, x2, y2)。shape: (N, 4)
    pub boxes: Array2<f32>,
}

impl DecodedOutput {
    pub fn len(&self) -> usize {
        self.objectness.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cls_num(&self) -> usize {
        self.class_prob.ncols()
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// スライスに対してソフトマックスをその場で適用します。
pub fn softmax_in_place(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in logits.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in logits.iter_mut() {
        *v /= sum;
    }
}

/// 生出力の形がグリッドとチャネル構成に合っているか確認します。
fn check_shape(
    table: &GridTable,
    pred: &ArrayView3<f32>,
    cls_num: usize,
    scale_idx: usize,
) -> Result<()> {
    if cls_num == 0 {
        return Err(Error::InvalidConfig("cls_num must be positive".into()));
    }
    let (h, w, ch_num) = pred.dim();
    if (h, w) != (table.fmp_h, table.fmp_w) {
        return Err(Error::GridShape {
            scale: scale_idx,
            expected_h: table.fmp_h,
            expected_w: table.fmp_w,
            got_h: h,
            got_w: w,
        });
    }
    let expected = table.anchor_num() * (1 + cls_num + 4);
    if ch_num != expected {
        return Err(Error::ChannelCount {
            scale: scale_idx,
            expected,
            got: ch_num,
        });
    }
    Ok(())
}

/// 1スケール分の生出力をデコードします。
///
/// # Args
/// * `table` - このスケールのグリッドとアンカーのテーブル
/// * `pred` - 生出力 (grid_h, grid_w, K * (1 + C + 4))
/// * `cls_num` - クラス数
/// * `scale_idx` - スケール番号 (エラー表示用)
///
/// # Return
/// * (cells * K) 行のデコード結果。並びはセル優先、次にアンカー
pub fn decode_scale(
    table: &GridTable,
    pred: ArrayView3<f32>,
    cls_num: usize,
    scale_idx: usize,
) -> Result<DecodedOutput> {
    check_shape(table, &pred, cls_num, scale_idx)?;
    let (h, w, _) = pred.dim();
    let ka = table.anchor_num();

    let n = table.cells() * ka;
    let stride = table.stride as f32;
    let reg_base = ka * (1 + cls_num);

    let mut objectness = Vec::with_capacity(n);
    let mut class_prob = Vec::with_capacity(n * cls_num);
    let mut boxes = Vec::with_capacity(n * 4);

    for (cell, (r, c)) in iproduct!(0..h, 0..w).enumerate() {
        let channels = pred.slice(s![r, c, ..]);
        let gx = table.grid_xy[[cell, 0, 0]];
        let gy = table.grid_xy[[cell, 0, 1]];

        for k in 0..ka {
            objectness.push(sigmoid(channels[k]));

            let start = class_prob.len();
            let cls_base = ka + k * cls_num;
            class_prob.extend((0..cls_num).map(|j| channels[cls_base + j]));
            softmax_in_place(&mut class_prob[start..]);

            let reg = reg_base + 4 * k;
            let (tx, ty, tw, th) = (
                channels[reg],
                channels[reg + 1],
                channels[reg + 2],
                channels[reg + 3],
            );

            // 中心はセル境界を少しはみ出せる (sigmoid * 2 - 1)
            let cx = (sigmoid(tx) * 2.0 - 1.0 + gx) * stride;
            let cy = (sigmoid(ty) * 2.0 - 1.0 + gy) * stride;
            // exp のオーバーフローは inf のまま通す (スコアフィルタで落ちる)
            let bw = tw.exp() * table.anchor_wh[[cell, k, 0]];
            let bh = th.exp() * table.anchor_wh[[cell, k, 1]];

            boxes.extend([cx - bw / 2., cy - bh / 2., cx + bw / 2., cy + bh / 2.]);
        }
    }

    Ok(DecodedOutput {
        objectness: Array2::from_shape_vec((n, 1), objectness)?,
        class_prob: Array2::from_shape_vec((n, cls_num), class_prob)?,
        boxes: Array2::from_shape_vec((n, 4), boxes)?,
    })
}

/// 全スケールの生出力をデコードし、スケール順に結合します。
///
/// # Args
/// * `grid` - 前計算済みのグリッド
/// * `preds` - スケールごとの生出力 (ストライドの昇順)
/// * `cls_num` - クラス数
/// * `box_space` - 出力するボックスの座標系
///
/// # Return
/// * N = Σ cells * K 行のデコード結果
pub fn decode(
    grid: &AnchorGrid,
    preds: &[ArrayView3<f32>],
    cls_num: usize,
    box_space: BoxSpace,
) -> Result<DecodedOutput> {
    let tables = grid.tables();
    if preds.len() != tables.len() {
        return Err(Error::ScaleCount {
            expected: tables.len(),
            got: preds.len(),
        });
    }

    // 計算を始める前にすべてのスケールを確認する
    for (i, (table, pred)) in tables.iter().zip(preds).enumerate() {
        check_shape(table, pred, cls_num, i)?;
    }

    let per_scale = tables
        .par_iter()
        .zip(preds.par_iter())
        .enumerate()
        .map(|(i, (table, pred))| decode_scale(table, pred.view(), cls_num, i))
        .collect::<Result<Vec<_>>>()?;

    let objectness: Vec<_> = per_scale.iter().map(|d| d.objectness.view()).collect();
    let class_prob: Vec<_> = per_scale.iter().map(|d| d.class_prob.view()).collect();
    let boxes: Vec<_> = per_scale.iter().map(|d| d.boxes.view()).collect();

    let mut decoded = DecodedOutput {
        objectness: concatenate(Axis(0), &objectness)?,
        class_prob: concatenate(Axis(0), &class_prob)?,
        boxes: concatenate(Axis(0), &boxes)?,
    };

    if box_space == BoxSpace::Normalized {
        let size = grid.img_size() as f32;
        decoded.boxes.mapv_inplace(|v| (v / size).clamp(0., 1.));
    }

    debug!("decoded {} predictions over {} scales", decoded.len(), tables.len());
    Ok(decoded)
}
