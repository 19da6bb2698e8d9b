use bytemuck::pod_collect_to_vec;
use rayon::prelude::*;

/// 并行计算的最小候选数量，小批量并行反而更慢
const PARALLEL_THRESHOLD: usize = 1024;

/// 将向量原地归一化为单位长度
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// 两个归一化向量的点积，即余弦相似度
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 单对文字/图片向量的相似度评分，不做阈值过滤
pub fn match_one(text_vec: &[f32], image_vec: &[f32]) -> f32 {
    let mut a = text_vec.to_vec();
    let mut b = image_vec.to_vec();
    normalize(&mut a);
    normalize(&mut b);
    dot(&a, &b)
}

/// 批量匹配候选向量并按双阈值过滤
///
/// 候选向量假定已在写入时归一化。分数低于正向阈值记 0；
/// 若提供反向向量，分数高于反向阈值的同样记 0。
/// 正向向量缺失时（纯反向过滤模式）正向分数视为 1。
/// 阈值按百分制传入，内部除以 100。
pub fn match_batch(
    positive: Option<&[f32]>,
    negative: Option<&[f32]>,
    candidates: &[Vec<f32>],
    positive_threshold: u32,
    negative_threshold: u32,
) -> Vec<f32> {
    let positive = positive.map(|v| {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    });
    let negative = negative.map(|v| {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    });
    let pos_thr = positive_threshold as f32 / 100.0;
    let neg_thr = negative_threshold as f32 / 100.0;

    let score_one = |candidate: &Vec<f32>| -> f32 {
        let mut score = match &positive {
            Some(p) => {
                let s = dot(candidate, p);
                if s < pos_thr { 0.0 } else { s }
            }
            None => 1.0,
        };
        if score != 0.0 {
            if let Some(n) = &negative {
                if dot(candidate, n) > neg_thr {
                    score = 0.0;
                }
            }
        }
        score
    };

    if candidates.len() > PARALLEL_THRESHOLD {
        candidates.par_iter().map(score_one).collect()
    } else {
        candidates.iter().map(score_one).collect()
    }
}

/// 将数据库中的特征 blob 解码为 f32 向量
///
/// 长度不是 4 的倍数说明记录已损坏，返回 None 由调用方清理。
pub fn features_from_blob(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    Some(pod_collect_to_vec(blob))
}

/// 将 f32 向量编码为小端字节序 blob
pub fn features_to_blob(features: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(features).to_vec()
}

/// 对分数列表做 softmax，用于展示相对置信度
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return vec![];
    }
    let max = scores.iter().cloned().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let mut v = v;
        normalize(&mut v);
        v
    }

    #[test]
    fn positive_threshold_filters_low_scores() {
        let positive = vec![1.0, 0.0];
        let candidates = vec![
            unit(vec![1.0, 0.0]),  // cos = 1.0
            unit(vec![1.0, 1.0]),  // cos ≈ 0.707
            unit(vec![0.0, 1.0]),  // cos = 0.0
            unit(vec![-1.0, 0.0]), // cos = -1.0
        ];
        let scores = match_batch(Some(&positive), None, &candidates, 80, 10);
        assert!(scores[0] > 0.99);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn negative_vector_zeroes_matches() {
        let positive = vec![1.0, 0.0];
        let negative = vec![1.0, 0.0];
        let candidates = vec![unit(vec![1.0, 0.0]), unit(vec![0.0, 1.0])];
        // 第一个候选正向达标但与反向向量相似度 1.0 > 0.5，被过滤
        let scores = match_batch(Some(&positive), Some(&negative), &candidates, 10, 50);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn pure_negative_filter_defaults_positive_to_one() {
        let negative = vec![0.0, 1.0];
        let candidates = vec![unit(vec![1.0, 0.0]), unit(vec![0.0, 1.0])];
        let scores = match_batch(None, Some(&negative), &candidates, 10, 50);
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn match_one_ignores_thresholds() {
        let score = match_one(&[1.0, 0.0], &[1.0, 1.0]);
        assert!((score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn blob_round_trip_and_corruption() {
        let v = vec![0.5f32, -1.0, 2.0];
        let blob = features_to_blob(&v);
        assert_eq!(features_from_blob(&blob).unwrap(), v);
        assert!(features_from_blob(&blob[..5]).is_none());
        assert!(features_from_blob(&[]).is_none());
    }

    #[test]
    fn softmax_sums_to_one() {
        let s = softmax(&[0.9, 0.5, 0.1]);
        assert!((s.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(s[0] > s[1] && s[1] > s[2]);
    }
}
