use std::cmp::Ordering;

use super::geom::{Rect, horizontal_overlap, horizontal_overlap_ratio, vertical_gap};
use super::{Line, Segment};

const ROW_CENTER_FACTOR: f64 = 0.60;
const ROW_MAX_GAP_PX: f64 = 40.0;

const BLOCK_OVERLAP_STRICT: f64 = 0.65;
const BLOCK_OVERLAP_RELAXED: f64 = 0.45;
const BLOCK_HEIGHT_RATIO: f64 = 0.6;
const BLOCK_ALWAYS_MERGE_GAP_PX: f64 = 10.0;
const BLOCK_MAX_GAP_PX: f64 = 12.0;
const BLOCK_GAP_FACTOR: f64 = 0.3;

const ROW_BREAK_MIN_PX: f64 = 8.0;
const ROW_BREAK_FACTOR: f64 = 0.35;

#[derive(Clone)]
struct Placed {
    segment: Segment,
    rect: Rect,
}

struct Cluster {
    rect: Rect,
    members: Vec<Placed>,
}

struct Block {
    rect: Rect,
    last: Rect,
    members: Vec<Placed>,
}

/// Groups segments into reading-order lines.
///
/// Rows are found first (same vertical band, small horizontal gap), rows are then
/// folded into multi-row blocks when they are stacked tightly with enough
/// horizontal overlap, and each block is turned back into text row by row.
pub fn merge_segments(segments: &[Segment]) -> Vec<Line> {
    let mut placed = segments
        .iter()
        .filter_map(|segment| {
            Rect::from_quad(&segment.bbox).map(|rect| Placed {
                segment: segment.clone(),
                rect,
            })
        })
        .collect::<Vec<_>>();
    placed.sort_by(compare_placed);

    let clusters = cluster_rows(placed);
    let blocks = fold_blocks(clusters);
    let mut lines = blocks.into_iter().map(block_to_line).collect::<Vec<_>>();
    lines.sort_by(|a, b| {
        let ra = Rect::from_quad(&a.bbox);
        let rb = Rect::from_quad(&b.bbox);
        match (ra, rb) {
            (Some(ra), Some(rb)) => ra
                .y_min
                .total_cmp(&rb.y_min)
                .then(ra.x_min.total_cmp(&rb.x_min)),
            _ => Ordering::Equal,
        }
    });
    lines
}

fn compare_placed(a: &Placed, b: &Placed) -> Ordering {
    a.rect
        .y_min
        .total_cmp(&b.rect.y_min)
        .then(a.rect.x_min.total_cmp(&b.rect.x_min))
        .then(a.rect.y_max.total_cmp(&b.rect.y_max))
        .then(a.rect.x_max.total_cmp(&b.rect.x_max))
        .then_with(|| a.segment.text.cmp(&b.segment.text))
        .then(a.segment.confidence.total_cmp(&b.segment.confidence))
}

fn same_row(a: &Rect, b: &Rect) -> bool {
    (a.mid_y() - b.mid_y()).abs() <= ROW_CENTER_FACTOR * a.height().max(b.height())
}

fn horizontal_distance(a: &Rect, b: &Rect) -> f64 {
    (-horizontal_overlap(a, b)).max(0.0)
}

fn cluster_rows(placed: Vec<Placed>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for item in placed {
        let found = clusters.iter().position(|cluster| {
            same_row(&item.rect, &cluster.rect)
                && horizontal_distance(&item.rect, &cluster.rect) <= ROW_MAX_GAP_PX
                && cluster
                    .members
                    .iter()
                    .all(|member| same_row(&item.rect, &member.rect))
        });
        match found {
            Some(idx) => {
                let cluster = &mut clusters[idx];
                cluster.rect = cluster.rect.union(&item.rect);
                cluster.members.push(item);
            }
            None => clusters.push(Cluster {
                rect: item.rect,
                members: vec![item],
            }),
        }
    }
    clusters
}

fn should_stack(upper: &Rect, lower: &Rect) -> bool {
    if horizontal_overlap(upper, lower) <= 0.0 {
        return false;
    }
    let height_ratio = upper.height().min(lower.height()) / upper.height().max(lower.height());
    let required = if height_ratio < BLOCK_HEIGHT_RATIO {
        BLOCK_OVERLAP_STRICT
    } else {
        BLOCK_OVERLAP_RELAXED
    };
    if horizontal_overlap_ratio(upper, lower) <= required {
        return false;
    }
    let gap = vertical_gap(upper, lower);
    if gap < 0.0 || gap < BLOCK_ALWAYS_MERGE_GAP_PX {
        return true;
    }
    let cap = BLOCK_MAX_GAP_PX.min(BLOCK_GAP_FACTOR * upper.height().max(lower.height()));
    gap <= cap
}

fn fold_blocks(mut clusters: Vec<Cluster>) -> Vec<Block> {
    clusters.sort_by(|a, b| {
        a.rect
            .y_min
            .total_cmp(&b.rect.y_min)
            .then(a.rect.x_min.total_cmp(&b.rect.x_min))
    });
    let mut blocks: Vec<Block> = Vec::new();
    for cluster in clusters {
        let target = blocks
            .iter()
            .rposition(|block| should_stack(&block.last, &cluster.rect));
        match target {
            Some(idx) => {
                let block = &mut blocks[idx];
                block.rect = block.rect.union(&cluster.rect);
                block.last = cluster.rect;
                block.members.extend(cluster.members);
            }
            None => blocks.push(Block {
                rect: cluster.rect,
                last: cluster.rect,
                members: cluster.members,
            }),
        }
    }
    blocks
}

fn block_to_line(mut block: Block) -> Line {
    block.members.sort_by(compare_placed);
    let threshold = ROW_BREAK_MIN_PX.max(ROW_BREAK_FACTOR * block.rect.height());

    let mut rows: Vec<Vec<&Placed>> = Vec::new();
    let mut row_center = 0.0;
    for member in &block.members {
        let mid = member.rect.mid_y();
        let starts_row = rows.is_empty() || (mid - row_center).abs() > threshold;
        if starts_row {
            rows.push(vec![member]);
            row_center = mid;
        } else if let Some(row) = rows.last_mut() {
            row.push(member);
            row_center =
                row.iter().map(|item| item.rect.mid_y()).sum::<f64>() / row.len() as f64;
        }
    }

    let text = rows
        .iter_mut()
        .map(|row| {
            row.sort_by(|a, b| a.rect.x_min.total_cmp(&b.rect.x_min));
            row.iter()
                .map(|item| item.segment.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let children = block
        .members
        .iter()
        .map(|item| item.segment.clone())
        .collect::<Vec<_>>();
    let confidence = children.iter().map(|child| child.confidence).sum::<f64>()
        / children.len().max(1) as f64;

    Line {
        text,
        bbox: block.rect.to_quad(),
        confidence,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{quad, segment};

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|line| line.text.as_str()).collect()
    }

    #[test]
    fn adjacent_words_form_one_line() {
        let segments = vec![
            segment("Hello", 0.0, 0.0, 50.0, 20.0, 0.9),
            segment("World", 60.0, 0.0, 50.0, 20.0, 0.9),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["Hello World"]);
        assert_eq!(lines[0].bbox, quad(0.0, 0.0, 110.0, 20.0));
        assert!((lines[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(lines[0].children.len(), 2);
    }

    #[test]
    fn row_members_are_joined_left_to_right() {
        let segments = vec![
            segment("World", 60.0, 0.0, 50.0, 20.0, 0.8),
            segment("Hello", 0.0, 2.0, 50.0, 20.0, 0.6),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["Hello World"]);
        assert!((lines[0].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn wide_horizontal_gap_splits_rows() {
        let segments = vec![
            segment("Left", 0.0, 0.0, 50.0, 20.0, 0.9),
            segment("Right", 200.0, 0.0, 50.0, 20.0, 0.9),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["Left", "Right"]);
    }

    #[test]
    fn tight_stacked_rows_become_one_block() {
        let segments = vec![
            segment("Grand", 0.0, 0.0, 80.0, 20.0, 0.9),
            segment("Opening", 90.0, 0.0, 110.0, 20.0, 0.9),
            segment("Every", 0.0, 25.0, 80.0, 20.0, 0.8),
            segment("weekend", 90.0, 25.0, 100.0, 20.0, 0.8),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["Grand Opening\nEvery weekend"]);
        assert_eq!(lines[0].children.len(), 4);
    }

    #[test]
    fn short_title_merges_with_taller_subtitle() {
        let segments = vec![
            segment("SALE", 40.0, 0.0, 60.0, 10.0, 0.9),
            segment("Everything must go", 0.0, 12.0, 140.0, 30.0, 0.9),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["SALE\nEverything must go"]);
    }

    #[test]
    fn paragraphs_separated_by_whitespace_stay_apart() {
        let segments = vec![
            segment("First paragraph", 0.0, 0.0, 150.0, 20.0, 0.9),
            segment("Second paragraph", 0.0, 50.0, 160.0, 20.0, 0.9),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["First paragraph", "Second paragraph"]);
    }

    #[test]
    fn small_overlap_does_not_stack() {
        let segments = vec![
            segment("Column one", 0.0, 0.0, 100.0, 20.0, 0.9),
            segment("Column two", 80.0, 22.0, 100.0, 20.0, 0.9),
        ];
        let lines = merge_segments(&segments);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn malformed_boxes_are_skipped() {
        let mut bad = segment("Ghost", 0.0, 0.0, 10.0, 10.0, 0.9);
        bad.bbox[1][1] = f64::INFINITY;
        let segments = vec![bad, segment("Real", 0.0, 40.0, 40.0, 20.0, 0.9)];
        let lines = merge_segments(&segments);
        assert_eq!(texts(&lines), vec!["Real"]);
    }

    fn scattered() -> Vec<Segment> {
        vec![
            segment("Menu", 120.0, 10.0, 60.0, 24.0, 0.95),
            segment("Coffee", 20.0, 60.0, 70.0, 20.0, 0.9),
            segment("3.50", 100.0, 61.0, 40.0, 20.0, 0.85),
            segment("Tea", 20.0, 84.0, 40.0, 20.0, 0.7),
            segment("2.80", 100.0, 85.0, 40.0, 20.0, 0.75),
            segment("Open daily", 300.0, 200.0, 100.0, 18.0, 0.6),
            segment("Cash only", 20.0, 200.0, 90.0, 18.0, 0.65),
        ]
    }

    #[test]
    fn lines_are_sorted_and_cover_every_segment_once() {
        let segments = scattered();
        let lines = merge_segments(&segments);
        for pair in lines.windows(2) {
            let a = Rect::from_quad(&pair[0].bbox).unwrap();
            let b = Rect::from_quad(&pair[1].bbox).unwrap();
            assert!(a.y_min < b.y_min || (a.y_min == b.y_min && a.x_min <= b.x_min));
        }
        let mut seen = lines
            .iter()
            .flat_map(|line| line.children.iter().map(|child| child.text.clone()))
            .collect::<Vec<_>>();
        seen.sort();
        let mut expected = segments.iter().map(|s| s.text.clone()).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn merging_ignores_input_order() {
        let segments = scattered();
        let baseline = merge_segments(&segments);
        let mut reversed = segments.clone();
        reversed.reverse();
        let mut rotated = segments.clone();
        rotated.rotate_left(3);
        assert_eq!(merge_segments(&reversed), baseline);
        assert_eq!(merge_segments(&rotated), baseline);
    }

    #[test]
    fn distant_centres_never_share_a_row_cluster() {
        // Each step is within tolerance of the previous one, but not of the first.
        let segments = vec![
            segment("one", 0.0, 0.0, 40.0, 20.0, 0.9),
            segment("two", 45.0, 11.0, 40.0, 20.0, 0.9),
            segment("three", 90.0, 22.0, 40.0, 20.0, 0.9),
        ];
        let placed = segments
            .iter()
            .map(|segment| Placed {
                segment: segment.clone(),
                rect: Rect::from_quad(&segment.bbox).unwrap(),
            })
            .collect::<Vec<_>>();
        let clusters = cluster_rows(placed);
        for cluster in &clusters {
            for a in &cluster.members {
                for b in &cluster.members {
                    let limit = ROW_CENTER_FACTOR * a.rect.height().max(b.rect.height());
                    assert!((a.rect.mid_y() - b.rect.mid_y()).abs() <= limit);
                }
            }
        }
        assert!(clusters.len() >= 2);
    }
}
