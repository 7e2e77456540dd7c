//! YOLOv4 の後処理 (デコード → スコアフィルタ → NMS) をまとめて実行するモジュール

use std::sync::Arc;

use log::debug;
use ndarray::ArrayView3;

use crate::anchor_grid::AnchorGrid;
use crate::config::{check_threshold, BoxSpace, YoloV4Config};
use crate::decoder;
use crate::detection_result::{DetectionData, DetectionSet};
use crate::error::{Error, Result};
use crate::nms::nms_process;
use crate::score_filter::score_filter;
use crate::tta;

/// YOLOv4 の後処理をコントロールする構造体
///
/// 画像サイズごとのグリッドテーブルを保持し、サイズが変わったときだけ作り直します。
pub struct YoloV4 {
    cfg: YoloV4Config,
    grid: Arc<AnchorGrid>,
}

impl YoloV4 {
    /// 新しい `YoloV4` インスタンスを作成します。
    ///
    /// # Args
    /// * `cfg` - 後処理の設定
    ///
    /// # Return
    /// * 設定の画像サイズでグリッドを計算済みのインスタンス
    pub fn new(cfg: YoloV4Config) -> Result<Self> {
        cfg.validate()?;
        let grid = Arc::new(AnchorGrid::new(cfg.img_size, &cfg.scales)?);
        Ok(Self { cfg, grid })
    }

    pub fn config(&self) -> &YoloV4Config {
        &self.cfg
    }

    /// 現在のグリッドテーブルのスナップショット
    pub fn grid(&self) -> Arc<AnchorGrid> {
        Arc::clone(&self.grid)
    }

    /// 入力画像のサイズを変更します。グリッドは丸ごと作り直され、
    /// `grid()` で取得済みのスナップショットには影響しません。
    pub fn set_image_size(&mut self, img_size: u32) -> Result<()> {
        if img_size == 0 {
            return Err(Error::InvalidConfig("img_size must be positive".into()));
        }
        if img_size == self.grid.img_size() {
            return Ok(());
        }
        self.grid = Arc::new(AnchorGrid::new(img_size, &self.cfg.scales)?);
        self.cfg.img_size = img_size;
        Ok(())
    }

    /// NMS の前までを実行します。
    ///
    /// # Args
    /// * `preds` - スケールごとの生出力 (grid_h, grid_w, K * (1 + C + 4))
    /// * `conf_threshold` - コンフィデンスの閾値
    ///
    /// # Return
    /// * 閾値を超えた検出結果 (スケール、セル、アンカーの順)
    pub fn pre_nms(
        &self,
        preds: &[ArrayView3<f32>],
        conf_threshold: f32,
    ) -> Result<Vec<DetectionData>> {
        let decoded = decoder::decode(&self.grid, preds, self.cfg.cls_num, self.cfg.box_space)?;
        Ok(score_filter(&decoded, conf_threshold))
    }

    /// 設定の閾値で推論結果の後処理を行います。
    pub fn infer(&mut self, preds: &[ArrayView3<f32>], img_size: u32) -> Result<DetectionSet> {
        let (conf, nms) = (self.cfg.conf_threshold, self.cfg.nms_threshold);
        self.infer_with_thresholds(preds, img_size, conf, nms)
    }

    /// 推論結果の後処理を行います。
    ///
    /// # Args
    /// * `preds` - スケールごとの生出力
    /// * `img_size` - ネットワーク入力の一辺の長さ
    /// * `conf_threshold` - コンフィデンスの閾値
    /// * `nms_threshold` - NMS の IoU 閾値
    ///
    /// # Return
    /// * 最終的な検出結果。閾値を超える検出がなければ空
    pub fn infer_with_thresholds(
        &mut self,
        preds: &[ArrayView3<f32>],
        img_size: u32,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<DetectionSet> {
        self.check_inputs(preds, conf_threshold, nms_threshold)?;
        self.set_image_size(img_size)?;

        let dets = self.pre_nms(preds, conf_threshold)?;
        let kept = nms_process(&dets, nms_threshold);
        debug!("{} detections after nms", kept.len());
        Ok(DetectionSet::from(kept))
    }

    /// 元画像と左右反転画像の推論結果を統合します。
    ///
    /// # Args
    /// * `preds` - 元画像の生出力
    /// * `flipped_preds` - 左右反転した画像の生出力
    /// * `img_size` - ネットワーク入力の一辺の長さ
    ///
    /// # Return
    /// * 両方の検出結果をまとめて NMS したもの
    pub fn infer_flip_tta(
        &mut self,
        preds: &[ArrayView3<f32>],
        flipped_preds: &[ArrayView3<f32>],
        img_size: u32,
    ) -> Result<DetectionSet> {
        let (conf, nms) = (self.cfg.conf_threshold, self.cfg.nms_threshold);
        self.check_inputs(preds, conf, nms)?;
        self.check_inputs(flipped_preds, conf, nms)?;
        self.set_image_size(img_size)?;

        let dets = self.pre_nms(preds, conf)?;
        let flipped = self.pre_nms(flipped_preds, conf)?;
        let width = match self.cfg.box_space {
            BoxSpace::Pixels => img_size as f32,
            BoxSpace::Normalized => 1.0,
        };
        Ok(DetectionSet::from(tta::fuse_flipped(&dets, &flipped, width, nms)))
    }

    fn check_inputs(
        &self,
        preds: &[ArrayView3<f32>],
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<()> {
        check_threshold("conf_threshold", conf_threshold)?;
        check_threshold("nms_threshold", nms_threshold)?;
        if preds.len() != self.cfg.scales.len() {
            return Err(Error::ScaleCount {
                expected: self.cfg.scales.len(),
                got: preds.len(),
            });
        }
        Ok(())
    }
}
