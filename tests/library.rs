mod common;

use common::{MockEmbedder, TestEnv};
use mediasearch::db::crud;
use mediasearch::library::LibraryKey;
use mediasearch::matcher;

/// 项目 ID 形如 proj_<年份>_<slug>_<序号>，同名项目序号递增
#[tokio::test]
async fn project_id_format_and_serial() {
    let env = TestEnv::new();
    let first = env.libraries.create_project("Demo Reel").await.unwrap();
    let second = env.libraries.create_project("Demo Reel").await.unwrap();

    assert!(first.id.starts_with("proj_"));
    assert!(first.id.contains("demo_reel"));
    assert!(first.id.ends_with("_01"));
    assert!(second.id.ends_with("_02"));
    assert_eq!(first.status, "active");
}

/// 软删除仅隐藏项目，硬删除移除数据库文件
#[tokio::test]
async fn soft_and_hard_delete() {
    let env = TestEnv::new();
    let project = env.libraries.create_project("temp").await.unwrap();
    let db_path = env.data_dir().project_db(&project.id);
    assert!(db_path.exists());

    env.libraries.delete_project(&project.id, false).await.unwrap();
    assert!(env.libraries.get_project(&project.id).await.unwrap().is_none());
    assert!(db_path.exists());
    // include_deleted 时仍可见
    let all = env.libraries.list_projects(None, true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_deleted);

    env.libraries.delete_project(&project.id, true).await.unwrap();
    assert!(!db_path.exists());
    assert!(env.libraries.list_projects(None, true).await.unwrap().is_empty());
}

/// 归档把特征字节原样复制到永久库，不重新向量化
#[tokio::test]
async fn archive_preserves_embedding_bytes() {
    let env = TestEnv::new();
    let project = env.libraries.create_project("shoot").await.unwrap();
    let project_key = LibraryKey::Project(project.id.clone());
    let pool = env.libraries.pool(&project_key).await.unwrap();

    let blob = matcher::features_to_blob(&MockEmbedder::feature_for(b"asset"));
    let id = crud::upsert_image(
        &pool,
        "/proj/a.png",
        42,
        None,
        &blob,
        Some(&[1u8; 8]),
        Some(16),
        Some(16),
        Some(128),
    )
    .await
    .unwrap();

    let outcome = env.libraries.archive_images(&project.id, &[id]).await.unwrap();
    assert_eq!(outcome.archived, 1);
    assert_eq!(outcome.failed, 0);

    // 永久库中的副本字节完全一致
    let permanent = env.libraries.permanent().await.unwrap();
    let copies = crud::all_images(&permanent).await.unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].features, blob);

    // 项目侧被标记为已归档
    let source = crud::get_image_by_id(&pool, id).await.unwrap().unwrap();
    assert!(source.archived);
    assert_eq!(source.archived_to_id, Some(copies[0].id));

    // 重复归档跳过
    let again = env.libraries.archive_images(&project.id, &[id]).await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(again.archived, 0);
}

/// 取消归档仅清除项目侧标记，永久库中的副本保留
#[tokio::test]
async fn unarchive_keeps_permanent_copy() {
    let env = TestEnv::new();
    let project = env.libraries.create_project("shoot").await.unwrap();
    let project_key = LibraryKey::Project(project.id.clone());
    let pool = env.libraries.pool(&project_key).await.unwrap();

    let blob = matcher::features_to_blob(&MockEmbedder::feature_for(b"asset"));
    let id = crud::upsert_image(&pool, "/proj/a.png", 42, None, &blob, None, None, None, None)
        .await
        .unwrap();
    env.libraries.archive_images(&project.id, &[id]).await.unwrap();

    let count = env.libraries.unarchive_images(&project.id, &[id]).await.unwrap();
    assert_eq!(count, 1);

    let permanent = env.libraries.permanent().await.unwrap();
    let copies = crud::all_images(&permanent).await.unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].features, blob);

    let source = crud::get_image_by_id(&pool, id).await.unwrap().unwrap();
    assert!(!source.archived);
    assert_eq!(source.archived_to_id, None);

    // 未归档条目再次取消归档不计数
    assert_eq!(env.libraries.unarchive_images(&project.id, &[id]).await.unwrap(), 0);
}

/// 项目库隔离：项目里的素材不会出现在永久库
#[tokio::test]
async fn libraries_are_isolated() {
    let env = TestEnv::new();
    let project = env.libraries.create_project("iso").await.unwrap();
    let pool = env.libraries.pool(&LibraryKey::Project(project.id.clone())).await.unwrap();
    crud::upsert_image(&pool, "/proj/only.png", 1, None, &[0u8; 16], None, None, None, None)
        .await
        .unwrap();

    let permanent = env.libraries.permanent().await.unwrap();
    assert_eq!(crud::image_count(&permanent).await.unwrap(), 0);
    assert_eq!(crud::image_count(&pool).await.unwrap(), 1);

    env.libraries.refresh_project_stats(&project.id).await.unwrap();
    let refreshed = env.libraries.get_project(&project.id).await.unwrap().unwrap();
    assert_eq!(refreshed.image_count, 1);
}

/// 访问不存在的项目报错
#[tokio::test]
async fn unknown_project_is_rejected() {
    let env = TestEnv::new();
    let result = env.libraries.pool(&LibraryKey::Project("proj_2026_nope_01".into())).await;
    assert!(result.is_err());
}
