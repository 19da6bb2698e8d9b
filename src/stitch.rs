/// 视频中一段与查询匹配的连续时间范围
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start_time: i64,
    pub end_time: i64,
    pub score: f32,
}

/// 将逐帧匹配分数拼接为时间片段
///
/// `frame_times` 为升序采样时间戳，`scores` 为对应帧的匹配分数（0 表示不匹配）。
/// 相邻命中帧序号差不超过 2 的归入同一片段，即允许中间空一帧。
/// 片段边界向两侧各延长半个采样间隔：起点取与前一帧的中点，
/// 终点取与后一帧的中点并向上取整；位于首尾的帧不延长。
pub fn stitch(frame_times: &[i64], scores: &[f32]) -> Vec<Segment> {
    debug_assert_eq!(frame_times.len(), scores.len());

    let hits: Vec<usize> =
        (0..scores.len()).filter(|&i| scores[i] != 0.0).collect();

    let mut runs: Vec<(usize, usize)> = vec![];
    let mut start = None;
    for (k, &i) in hits.iter().enumerate() {
        match start {
            None => start = Some(i),
            Some(s) => {
                if i - hits[k - 1] > 2 {
                    runs.push((s, hits[k - 1]));
                    start = Some(i);
                }
            }
        }
    }
    if let Some(s) = start {
        runs.push((s, *hits.last().unwrap()));
    }

    runs.into_iter()
        .map(|(a, b)| {
            let score = scores[a..=b].iter().cloned().fold(f32::MIN, f32::max);
            let start_time = if a > 0 {
                (frame_times[a] + frame_times[a - 1]) / 2
            } else {
                frame_times[a]
            };
            let end_time = if b < frame_times.len() - 1 {
                // 向上取整
                (frame_times[b] + frame_times[b + 1] + 1) / 2
            } else {
                frame_times[b]
            };
            Segment { start_time, end_time, score }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_runs_with_boundary_extension() {
        let times = [0, 2, 4, 6, 8, 10];
        let scores = [0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let segments = stitch(&times, &scores);
        assert_eq!(
            segments,
            vec![
                Segment { start_time: 1, end_time: 5, score: 1.0 },
                Segment { start_time: 9, end_time: 10, score: 1.0 },
            ]
        );
    }

    #[test]
    fn single_gap_is_tolerated() {
        // 命中帧 0、2 中间空一帧，归入同一片段
        let times = [0, 2, 4, 6];
        let scores = [0.8, 0.0, 0.9, 0.0];
        let segments = stitch(&times, &scores);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_time, 0);
        assert_eq!(segments[0].end_time, 5);
        assert_eq!(segments[0].score, 0.9);
    }

    #[test]
    fn no_hits_yields_no_segments() {
        assert!(stitch(&[0, 2, 4], &[0.0, 0.0, 0.0]).is_empty());
    }

    #[test]
    fn full_match_spans_whole_video() {
        let segments = stitch(&[0, 2, 4], &[0.5, 0.6, 0.7]);
        assert_eq!(
            segments,
            vec![Segment { start_time: 0, end_time: 4, score: 0.7 }]
        );
    }
}
