use anyhow::Result;
use image::imageops::FilterType;

pub type DHash = [u8; 8];

/// 图片解码后得到的属性，用于去重与元数据入库
pub struct ImageProps {
    pub phash: DHash,
    pub width: u32,
    pub height: u32,
}

/// 计算图片的 64 位感知哈希（dHash）
///
/// 缩放到 9x8 灰度图后逐行比较相邻像素梯度，
/// 对缩放、压缩等轻微变化不敏感，与内容校验和互补。
pub fn d_hash_bytes(data: &[u8]) -> Result<ImageProps> {
    let img = image::load_from_memory(data)?;
    let (width, height) = (img.width(), img.height());

    let gray = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();
    let pixels = gray.as_raw();
    debug_assert_eq!(pixels.len(), 72);

    let mut phash = [0u8; 8];
    for (i, row) in pixels.chunks_exact(9).enumerate() {
        let mut b = 0u8;
        for j in 0..8 {
            b <<= 1;
            b |= (row[j] < row[j + 1]) as u8;
        }
        phash[i] = b;
    }

    Ok(ImageProps { phash, width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// 两个感知哈希的汉明距离
    fn hamming_distance(a: &DHash, b: &DHash) -> u32 {
        a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
    }

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(vec![]);
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn identical_content_same_hash() {
        let data = encode_png(&gradient_image(64, 48));
        let a = d_hash_bytes(&data).unwrap();
        let b = d_hash_bytes(&data).unwrap();
        assert_eq!(a.phash, b.phash);
        assert_eq!((a.width, a.height), (64, 48));
    }

    #[test]
    fn resized_copy_is_near_duplicate() {
        let original = encode_png(&gradient_image(64, 48));
        let resized = encode_png(&gradient_image(32, 24));
        let a = d_hash_bytes(&original).unwrap();
        let b = d_hash_bytes(&resized).unwrap();
        assert!(hamming_distance(&a.phash, &b.phash) <= 4);
    }

    #[test]
    fn invalid_bytes_error() {
        assert!(d_hash_bytes(b"not an image").is_err());
    }

    #[test]
    fn hamming_distance_counts_bits() {
        let a = [0u8; 8];
        let mut b = [0u8; 8];
        b[0] = 0b1010_1010;
        assert_eq!(hamming_distance(&a, &b), 4);
    }
}
