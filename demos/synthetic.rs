use anyhow::Result;
use log::info;
use ndarray::{s, Array3};
use std::time::Instant;

use yolo_v4_postprocess::config::YoloV4Config;
use yolo_v4_postprocess::img_proc::Letterbox;
use yolo_v4_postprocess::yolov4::YoloV4;

fn main() -> Result<()> {
    env_logger::init();

    // 設定ファイルが指定されていればそれを使う
    let cfg = match std::env::args().nth(1) {
        Some(path) => YoloV4Config::from_json_file(path)?,
        None => YoloV4Config::yolov4_coco(416),
    };
    let img_size = cfg.img_size;
    let ka = cfg.anchor_num();
    let cls_num = cfg.cls_num;

    // 背景だけの出力を作り、いくつか物体を埋め込む
    let mut preds: Vec<Array3<f32>> = cfg
        .scales
        .iter()
        .map(|sc| {
            let g = (img_size / sc.stride) as usize;
            let mut a = Array3::zeros((g, g, cfg.channel_num()));
            a.slice_mut(s![.., .., ..ka]).fill(-10.);
            a
        })
        .collect();
    let objects: [(usize, usize, usize, usize); 3] = [(0, 10, 20, 0), (1, 6, 3, 16), (2, 4, 9, 2)];
    for &(scale, row, col, class) in &objects {
        if scale >= preds.len() {
            continue;
        }
        let pred = &mut preds[scale];
        if row >= pred.dim().0 || col >= pred.dim().1 || class >= cls_num {
            continue;
        }
        pred[[row, col, 0]] = 6.;
        pred[[row, col, ka + class]] = 8.;
    }

    let mut yolo = YoloV4::new(cfg)?;
    let views: Vec<_> = preds.iter().map(|p| p.view()).collect();

    let start = Instant::now();
    let result = yolo.infer(&views, img_size)?;
    let t = start.elapsed().as_secs_f64() * 1000.0;

    // 640x480 の画像をレターボックスしたものとして元の座標に戻す
    let (w, h) = (640, 480);
    let lb = Letterbox {
        scale: [1.0, 0.75],
        offset: [0.0, 0.125],
    };
    for d in result.to_detections() {
        let r = d.reverse_transform(&lb, img_size as f32, w, h);
        info!(
            "class {:>2} conf {:.3} box ({:.1}, {:.1}, {:.1}, {:.1})",
            r.class, r.confidence, r.x1, r.y1, r.x2, r.y2
        );
    }
    println!("{} detections", result.len());
    println!("Processing time:{:.03}ms", t);

    Ok(())
}
