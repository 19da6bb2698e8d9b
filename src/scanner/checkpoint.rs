use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

const MAGIC: &[u8; 4] = b"MSCP";
const VERSION: u32 = 2;

// 单个条目的长度上限，防止损坏文件导致超大分配
const MAX_PATH_LEN: u32 = 64 * 1024;

/// 保存扫描断点：目标素材库与剩余待处理的路径集合
///
/// 先写临时文件再原地重命名，任何时刻磁盘上都是完整的断点。
pub fn save(path: &Path, library: &str, remaining: &BTreeSet<String>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)
            .with_context(|| format!("创建断点临时文件失败: {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        write_string(&mut writer, library)?;
        writer.write_u32::<LittleEndian>(remaining.len() as u32)?;
        for entry in remaining {
            write_string(&mut writer, entry)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("替换断点文件失败: {}", path.display()))?;
    Ok(())
}

/// 读取扫描断点，文件不存在或无法解析时返回 None
///
/// 损坏或旧版本的断点视同不存在，本轮退化为全量扫描。
pub fn load(path: &Path) -> Option<(String, BTreeSet<String>)> {
    if !path.exists() {
        return None;
    }
    match read(path) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("断点文件无法解析，忽略: {} ({e})", path.display());
            None
        }
    }
}

fn read(path: &Path) -> Result<(String, BTreeSet<String>)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        bail!("断点文件头不匹配");
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != VERSION {
        bail!("不支持的断点版本: {version}");
    }

    let library = read_string(&mut reader)?;
    let count = reader.read_u32::<LittleEndian>()?;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        set.insert(read_string(&mut reader)?);
    }
    Ok((library, set))
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_PATH_LEN {
        bail!("断点条目长度异常: {len}");
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).context("断点条目不是合法 UTF-8")
}

/// 扫描完成后删除断点
pub fn remove(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("删除断点文件失败: {} ({e})", path.display());
        }
    }
}
