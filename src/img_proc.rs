//! YOLO の入力を作る画像処理モジュール

use std::path::Path;

use anyhow::{ensure, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array3;

/// 正規化に使う画素の平均 (RGB)
pub const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// 正規化に使う画素の標準偏差 (RGB)
pub const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// レターボックス変換のパラメータ。どちらも入力サイズで割った正規化単位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// リサイズ後の画像の大きさ / 入力サイズ (x, y)
    pub scale: [f32; 2],
    /// パディングの大きさ / 入力サイズ (x, y)
    pub offset: [f32; 2],
}

/// 画像をアスペクト比を保ったままリサイズし、中央に配置した正方形の入力テンソルを作成します。
///
/// # Args
/// * `img` - 入力画像
/// * `size` - 入力テンソルの一辺の長さ
/// * `mean` - 正規化に使う平均 (RGB)
/// * `std` - 正規化に使う標準偏差 (RGB)
///
/// # Return
/// * (3, size, size) の入力テンソルとレターボックスのパラメータ
///
/// パディング部分は正規化後の 0 で埋めます。
pub fn letterbox(
    img: &DynamicImage,
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> (Array3<f32>, Letterbox) {
    let resized = img.resize(size, size, FilterType::Triangle).to_rgb8();
    let (nw, nh) = resized.dimensions();

    let pad_w = (size - nw) / 2;
    let pad_h = (size - nh) / 2;

    let mut input = Array3::zeros((3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (px, py) = ((x + pad_w) as usize, (y + pad_h) as usize);
        for ch in 0..3 {
            input[[ch, py, px]] = (f32::from(pixel[ch]) / 255. - mean[ch]) / std[ch];
        }
    }

    let s = size as f32;
    let lb = Letterbox {
        scale: [nw as f32 / s, nh as f32 / s],
        offset: [pad_w as f32 / s, pad_h as f32 / s],
    };
    (input, lb)
}

/// 画像ファイルを読み込み、レターボックス変換します。
///
/// # Return
/// * 入力テンソル、レターボックスのパラメータ、元画像の (幅, 高さ)
pub fn letterbox_from_path<P: AsRef<Path>>(
    path: P,
    size: u32,
) -> Result<(Array3<f32>, Letterbox, (u32, u32))> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    ensure!(img.width() > 0 && img.height() > 0, "empty image: {}", path.display());

    let (input, lb) = letterbox(&img, size, PIXEL_MEAN, PIXEL_STD);
    Ok((input, lb, (img.width(), img.height())))
}
