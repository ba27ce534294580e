use crate::frame::{BoundingBox, Region};

/// Greedy per-class non-maximum suppression. Keeps the highest-confidence
/// region of every same-label group whose IoU exceeds `iou_threshold`.
pub fn non_max_suppression(regions: &mut Vec<Region>, iou_threshold: f32) {
    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..regions.len() {
        let suppressed = (0..kept).any(|prev| {
            regions[prev].label == regions[index].label
                && iou(&regions[prev].bbox, &regions[index].bbox) > iou_threshold
        });
        if !suppressed {
            regions.swap(kept, index);
            kept += 1;
        }
    }
    regions.truncate(kept);
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let inter_area = inter.area() as f32;
    let union = a.area() as f32 + b.area() as f32 - inter_area;
    if union <= 0.0 {
        0.0
    } else {
        inter_area / union
    }
}
