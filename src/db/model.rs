use sqlx::FromRow;

/// 图片记录，一张图片一行
#[derive(Debug, Clone, FromRow)]
pub struct ImageRecord {
    pub id: i64,
    /// 文件路径，库内唯一
    pub path: String,
    /// 文件修改时间（Unix 秒）
    pub modify_time: i64,
    /// 内容校验和，启用校验和指纹时存在
    pub checksum: Option<Vec<u8>>,
    /// 归一化后的特征向量，小端 f32 blob
    pub features: Vec<u8>,
    /// 感知哈希，用于近重复检测
    pub phash: Option<Vec<u8>>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub file_size: Option<i64>,
    /// 是否已归档到永久库
    pub archived: bool,
    /// 归档后在永久库中的记录 ID
    pub archived_to_id: Option<i64>,
}

/// 视频帧记录，视频按采样间隔拆成多行，以路径聚合
#[derive(Debug, Clone, FromRow)]
pub struct VideoFrameRecord {
    pub id: i64,
    pub path: String,
    /// 该帧所在秒数
    pub frame_time: i64,
    pub modify_time: i64,
    pub checksum: Option<Vec<u8>>,
    pub features: Vec<u8>,
}

/// 项目元数据，存储在永久库的 project 表中
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    /// active / completed / archived
    pub status: String,
    pub is_deleted: bool,
    pub image_count: i64,
    pub video_count: i64,
    pub created_time: i64,
    pub updated_time: i64,
    pub database_path: Option<String>,
}
