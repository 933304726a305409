// Region fusion: merges the color and grayscale detection passes into one
// de-duplicated region list.

use crate::core::config::FusionConfig;
use crate::core::types::{FusedRegion, Quad, Rect, TextRegion};
use tracing::{debug, trace};

/// Regions below this confidence never reach the output
pub const CONF_FLOOR: f32 = 0.4;

/// Two regions with a rectangle IOU above this are the same text
pub const IOU_THRESHOLD: f32 = 0.5;

/// Intersection-over-union of the bounding rectangles of two quads.
///
/// Always in [0, 1]; returns 0 when the union is empty.
pub fn iou(a: &Quad, b: &Quad) -> f32 {
    rect_iou(&Rect::from_quad(a), &Rect::from_quad(b))
}

fn rect_iou(a: &Rect, b: &Rect) -> f32 {
    let inter_w = (a.x1.min(b.x1) - a.x0.max(b.x0)).max(0.0);
    let inter_h = (a.y1.min(b.y1) - a.y0.max(b.y0)).max(0.0);
    let intersection = inter_w * inter_h;
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        (intersection / union).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Greedy, order-preserving de-duplication of two detection passes
#[derive(Debug, Clone, Copy)]
pub struct RegionFuser {
    confidence_floor: f32,
    iou_threshold: f32,
}

impl Default for RegionFuser {
    fn default() -> Self {
        Self {
            confidence_floor: CONF_FLOOR,
            iou_threshold: IOU_THRESHOLD,
        }
    }
}

impl RegionFuser {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            iou_threshold: config.iou_threshold,
        }
    }

    /// Fuse two passes. Pass A candidates are visited before pass B.
    ///
    /// A candidate overlapping an accepted region (first match in accepted
    /// order) displaces it in place only with strictly higher confidence;
    /// otherwise it is dropped. Non-overlapping candidates are appended, so
    /// the output keeps first-insertion order.
    pub fn fuse(&self, pass_a: Vec<TextRegion>, pass_b: Vec<TextRegion>) -> Vec<FusedRegion> {
        let total = pass_a.len() + pass_b.len();
        let floor = self.confidence_floor;

        let mut accepted: Vec<TextRegion> = Vec::with_capacity(total);
        let mut replaced = 0usize;
        let mut dropped = 0usize;

        for candidate in pass_a
            .into_iter()
            .chain(pass_b)
            .filter(|r| r.confidence() >= floor)
        {
            let rect = candidate.rect();
            let overlap = accepted
                .iter()
                .position(|kept| rect_iou(&rect, &kept.rect()) > self.iou_threshold);

            match overlap {
                Some(idx) if candidate.confidence() > accepted[idx].confidence() => {
                    trace!(
                        "Replacing region {} ({:.2}) with '{}' ({:.2})",
                        idx,
                        accepted[idx].confidence(),
                        candidate.text(),
                        candidate.confidence()
                    );
                    accepted[idx] = candidate;
                    replaced += 1;
                }
                Some(_) => dropped += 1,
                None => accepted.push(candidate),
            }
        }

        debug!(
            "Fusion: {} candidates -> {} regions ({} replaced, {} duplicates dropped)",
            total,
            accepted.len(),
            replaced,
            dropped
        );

        accepted.into_iter().map(FusedRegion::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point;

    fn region(bbox: [f32; 4], text: &str, conf: f32) -> TextRegion {
        TextRegion::from_box(bbox, text, conf)
    }

    fn quad(bbox: [f32; 4]) -> Quad {
        *region(bbox, "", 1.0).quad()
    }

    #[test]
    fn test_iou_symmetric() {
        let a = quad([0.0, 0.0, 10.0, 10.0]);
        let b = quad([5.0, 2.0, 20.0, 8.0]);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn test_iou_range() {
        let a = quad([0.0, 0.0, 10.0, 10.0]);
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &quad([20.0, 20.0, 30.0, 30.0])), 0.0);
        let partial = iou(&a, &quad([5.0, 0.0, 15.0, 10.0]));
        assert!((partial - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area_is_zero_not_nan() {
        let point = quad([3.0, 3.0, 3.0, 3.0]);
        assert_eq!(iou(&point, &point), 0.0);
        let line = quad([0.0, 0.0, 10.0, 0.0]);
        assert_eq!(iou(&line, &quad([0.0, 0.0, 10.0, 10.0])), 0.0);
    }

    #[test]
    fn test_iou_uses_bounding_rect_of_rotated_quads() {
        let diamond = [
            Point::new(5.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 5.0),
        ];
        assert_eq!(iou(&diamond, &quad([0.0, 0.0, 10.0, 10.0])), 1.0);
    }

    #[test]
    fn test_sub_floor_never_survives() {
        let fuser = RegionFuser::default();
        let out = fuser.fuse(
            vec![region([0.0, 0.0, 10.0, 10.0], "low", 0.39)],
            vec![region([50.0, 50.0, 60.0, 60.0], "also low", 0.1)],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_floor_is_inclusive() {
        let fuser = RegionFuser::default();
        let out = fuser.fuse(vec![region([0.0, 0.0, 10.0, 10.0], "edge", 0.4)], vec![]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_overlap_keeps_higher_confidence() {
        // IOU of these two boxes is 0.7
        let a = region([0.0, 0.0, 10.0, 10.0], "color", 0.6);
        let b = region([0.0, 0.0, 10.0, 7.0], "gray", 0.9);
        assert!((iou(a.quad(), b.quad()) - 0.7).abs() < 1e-6);

        let out = RegionFuser::default().fuse(vec![a], vec![b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence(), 0.9);
        assert_eq!(out[0].text(), "gray");
    }

    #[test]
    fn test_equal_confidence_keeps_incumbent() {
        let a = region([0.0, 0.0, 10.0, 10.0], "first", 0.8);
        let b = region([1.0, 0.0, 10.0, 10.0], "second", 0.8);
        let out = RegionFuser::default().fuse(vec![a], vec![b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "first");
    }

    #[test]
    fn test_disjoint_regions_both_survive() {
        let a = region([0.0, 0.0, 10.0, 10.0], "left", 0.5);
        let b = region([100.0, 0.0, 110.0, 10.0], "right", 0.5);
        let out = RegionFuser::default().fuse(vec![a], vec![b]);
        let texts: Vec<_> = out.iter().map(|r| r.text()).collect();
        assert_eq!(texts, ["left", "right"]);
    }

    #[test]
    fn test_replacement_keeps_position() {
        let out = RegionFuser::default().fuse(
            vec![
                region([0.0, 0.0, 10.0, 10.0], "one", 0.5),
                region([100.0, 0.0, 110.0, 10.0], "two", 0.5),
            ],
            vec![region([0.0, 0.0, 10.0, 9.0], "one better", 0.95)],
        );
        let texts: Vec<_> = out.iter().map(|r| r.text()).collect();
        assert_eq!(texts, ["one better", "two"]);
    }

    #[test]
    fn test_within_pass_duplicates_are_fused() {
        let out = RegionFuser::default().fuse(
            vec![
                region([0.0, 0.0, 10.0, 10.0], "a", 0.5),
                region([0.0, 0.0, 10.0, 10.0], "a'", 0.7),
            ],
            vec![],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "a'");
    }

    #[test]
    fn test_threshold_is_strict() {
        // IOU exactly 0.5 is not an overlap
        let a = region([0.0, 0.0, 10.0, 10.0], "a", 0.5);
        let b = region([0.0, 0.0, 10.0, 5.0], "b", 0.9);
        assert!((iou(a.quad(), b.quad()) - 0.5).abs() < 1e-6);
        let out = RegionFuser::default().fuse(vec![a], vec![b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_custom_config() {
        let fuser = RegionFuser::new(&FusionConfig {
            confidence_floor: 0.0,
            iou_threshold: 0.9,
        });
        let out = fuser.fuse(
            vec![region([0.0, 0.0, 10.0, 10.0], "a", 0.1)],
            vec![region([0.0, 0.0, 10.0, 8.0], "b", 0.9)],
        );
        assert_eq!(out.len(), 2);
    }
}
