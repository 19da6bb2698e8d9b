mod common;

use std::sync::atomic::Ordering;

use clap::Parser;

use common::{MockEmbedder, TestEnv, png_bytes};
use mediasearch::config::SearchOptions;
use mediasearch::db::crud;
use mediasearch::embed::FrameEmbedding;
use mediasearch::library::LibraryKey;
use mediasearch::matcher;
use mediasearch::search::{ImageSubject, SearchEngine, SearchFilters};

#[derive(Parser)]
struct Wrapper {
    #[command(flatten)]
    search: SearchOptions,
}

fn make_engine(env: &TestEnv) -> SearchEngine {
    let wrapper = Wrapper::parse_from(["test"]);
    SearchEngine::new(
        env.libraries.clone(),
        env.embedder.clone(),
        env.caches.clone(),
        wrapper.search,
    )
}

async fn seed_image(env: &TestEnv, path: &str, seed: &[u8], modify_time: i64) -> i64 {
    let pool = env.libraries.permanent().await.unwrap();
    crud::upsert_image(
        &pool,
        path,
        modify_time,
        None,
        &matcher::features_to_blob(&MockEmbedder::feature_for(seed)),
        None,
        None,
        None,
        None,
    )
    .await
    .unwrap()
}

/// 相同查询第二次命中缓存，不再调用向量化服务
#[tokio::test]
async fn repeated_text_search_hits_cache() {
    let env = TestEnv::new();
    seed_image(&env, "/lib/a.png", b"a", 1).await;
    seed_image(&env, "/lib/b.png", b"b", 2).await;
    let engine = make_engine(&env);

    let first = engine
        .search_image_by_text(&LibraryKey::Permanent, "red", "", 10, 10, SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(env.embedder.text_calls.load(Ordering::SeqCst), 1);

    let second = engine
        .search_image_by_text(&LibraryKey::Permanent, "red", "", 10, 10, SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(env.embedder.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);

    // 阈值不同属于不同缓存条目
    engine
        .search_image_by_text(&LibraryKey::Permanent, "red", "", 20, 10, SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(env.embedder.text_calls.load(Ordering::SeqCst), 2);
}

/// 上传同内容图片时相似度为 1，按图搜图可召回
#[tokio::test]
async fn image_search_finds_identical_content() {
    let env = TestEnv::new();
    let bytes = png_bytes(200, 100, 50);
    // 入库特征与向量化桩对该内容的输出一致
    seed_image(&env, "/lib/target.png", &bytes, 1).await;
    seed_image(&env, "/lib/other.png", b"unrelated", 2).await;
    let engine = make_engine(&env);

    let results = engine
        .search_image_by_image(
            &LibraryKey::Permanent,
            ImageSubject::Upload(bytes),
            85,
            SearchFilters::default(),
        )
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].path, "/lib/target.png");
    assert!(results[0].score.unwrap() > 0.999);
}

/// 库内图片 ID 作为查询主体
#[tokio::test]
async fn stored_image_search_by_id() {
    let env = TestEnv::new();
    let id = seed_image(&env, "/lib/a.png", b"same", 1).await;
    seed_image(&env, "/lib/twin.png", b"same", 2).await;
    let engine = make_engine(&env);

    let results = engine
        .search_image_by_image(
            &LibraryKey::Permanent,
            ImageSubject::Stored(id),
            85,
            SearchFilters::default(),
        )
        .await
        .unwrap();
    // 自身与孪生图都以 1.0 命中
    assert_eq!(results.len(), 2);
    assert_eq!(env.embedder.image_calls.load(Ordering::SeqCst), 0);
}

/// 损坏的特征记录在搜索时被删除且不进入结果
#[tokio::test]
async fn corrupt_feature_row_is_deleted() {
    let env = TestEnv::new();
    let pool = env.libraries.permanent().await.unwrap();
    crud::upsert_image(&pool, "/lib/bad.png", 1, None, &[1u8, 2, 3], None, None, None, None)
        .await
        .unwrap();
    seed_image(&env, "/lib/good.png", b"good", 2).await;
    let engine = make_engine(&env);

    let results = engine
        .search_image_by_text(&LibraryKey::Permanent, "查询", "", 0, 10, SearchFilters::default())
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.path != "/lib/bad.png"));
    assert_eq!(crud::image_count(&pool).await.unwrap(), 1);
}

/// 路径与修改时间过滤
#[tokio::test]
async fn filters_restrict_results() {
    let env = TestEnv::new();
    seed_image(&env, "/photos/a.png", b"x", 100).await;
    seed_image(&env, "/videos/b.png", b"y", 100).await;
    seed_image(&env, "/photos/c.png", b"z", 999).await;
    let engine = make_engine(&env);

    let filters = SearchFilters {
        path: Some("photos".to_string()),
        start_time: Some(50),
        end_time: Some(200),
    };
    let results = engine
        .search_image_by_text(&LibraryKey::Permanent, "任意", "", 0, 10, filters)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "/photos/a.png");
}

/// 视频搜索按帧拼接片段并给出时间范围
#[tokio::test]
async fn video_search_returns_stitched_segment() {
    let env = TestEnv::new();
    let pool = env.libraries.permanent().await.unwrap();
    let hit = MockEmbedder::feature_for(b"clip query");
    // 零向量与任何查询的点积为 0，必然落在阈值之下
    let miss = vec![0.0f32; common::DIM];
    let frames = vec![
        FrameEmbedding { frame_time: 0, features: hit.clone() },
        FrameEmbedding { frame_time: 2, features: hit.clone() },
        FrameEmbedding { frame_time: 4, features: hit.clone() },
        FrameEmbedding { frame_time: 6, features: miss.clone() },
        FrameEmbedding { frame_time: 8, features: miss },
    ];
    crud::replace_video(&pool, "/lib/clip.mp4", 1, None, &frames).await.unwrap();
    let engine = make_engine(&env);

    let results = engine
        .search_video_by_text(
            &LibraryKey::Permanent,
            "clip query",
            "",
            90,
            10,
            SearchFilters::default(),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "/lib/clip.mp4");
    // 命中 0-4 帧，终点取与下一帧的中点并向上取整
    assert_eq!(results[0].start_time, Some(0));
    assert_eq!(results[0].end_time, Some(5));
    assert!(results[0].score.unwrap() > 0.999);
    assert!(results[0].url.contains("api/get_video/"));
}

/// 路径子串搜索
#[tokio::test]
async fn path_keyword_search() {
    let env = TestEnv::new();
    seed_image(&env, "/photos/summer/a.png", b"a", 1).await;
    seed_image(&env, "/other/b.png", b"b", 2).await;
    let engine = make_engine(&env);

    let results = engine
        .search_images_by_path_keyword(&LibraryKey::Permanent, "summer")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "/photos/summer/a.png");
    assert!(results[0].score.is_none());
}
