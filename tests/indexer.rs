mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use uuid::Uuid;

use common::{TestEnv, png_bytes};
use mediasearch::db::crud;
use mediasearch::indexer::{BatchIndexer, DuplicateAction, DuplicateStrategy, TaskSnapshot, TaskStatus};
use mediasearch::library::LibraryKey;
use mediasearch::phash;

fn make_indexer(env: &TestEnv) -> Arc<BatchIndexer> {
    Arc::new(BatchIndexer::new(
        env.libraries.clone(),
        env.embedder.clone(),
        env.caches.clone(),
        "jpg,jpeg,png,gif,webp",
        "mp4,flv,mov,mkv",
        2,
        false,
    ))
}

async fn wait_terminal(indexer: &BatchIndexer, id: Uuid) -> TaskSnapshot {
    for _ in 0..200 {
        if let Some(snapshot) = indexer.snapshot(&id) {
            if matches!(
                snapshot.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("任务未在预期时间内结束");
}

/// 预先登记一张与 bytes 内容相同的图片，返回其路径
async fn seed_duplicate(env: &TestEnv, bytes: &[u8]) -> String {
    let existing = env.dir.path().join("existing.png");
    std::fs::write(&existing, bytes).unwrap();
    let existing_path = existing.to_string_lossy().into_owned();

    let props = phash::d_hash_bytes(bytes).unwrap();
    let pool = env.libraries.permanent().await.unwrap();
    crud::upsert_image(
        &pool,
        &existing_path,
        1000,
        None,
        &[0u8; 32],
        Some(&props.phash),
        Some(props.width as i64),
        Some(props.height as i64),
        Some(bytes.len() as i64),
    )
    .await
    .unwrap();
    existing_path
}

#[rstest]
#[case::skip(DuplicateStrategy::Skip, "已跳过", 0)]
#[case::overwrite(DuplicateStrategy::Overwrite, "已覆盖", 1)]
#[tokio::test]
async fn duplicate_strategy_applies(
    #[case] strategy: DuplicateStrategy,
    #[case] expected_action: &str,
    #[case] expected_success: usize,
) {
    let env = TestEnv::new();
    let bytes = png_bytes(120, 40, 40);
    let existing_path = seed_duplicate(&env, &bytes).await;

    let duplicate = env.dir.path().join("duplicate.png");
    std::fs::write(&duplicate, &bytes).unwrap();
    let duplicate_path = duplicate.to_string_lossy().into_owned();

    let indexer = make_indexer(&env);
    let id = indexer.submit(LibraryKey::Permanent, vec![duplicate_path.clone()], strategy).unwrap();
    let snapshot = wait_terminal(&indexer, id).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.success, expected_success);
    assert_eq!(snapshot.duplicates.len(), 1);
    assert_eq!(snapshot.duplicates[0].action, expected_action);
    assert_eq!(snapshot.duplicates[0].existing_path, existing_path);

    // 覆盖时旧记录被替换为新路径
    let pool = env.libraries.permanent().await.unwrap();
    let props = phash::d_hash_bytes(&bytes).unwrap();
    let record = crud::find_image_by_phash(&pool, &props.phash).await.unwrap().unwrap();
    match strategy {
        DuplicateStrategy::Skip => assert_eq!(record.path, existing_path),
        DuplicateStrategy::Overwrite => assert_eq!(record.path, duplicate_path),
        DuplicateStrategy::Ask => unreachable!(),
    }
}

/// ask 模式下无人决策时超时按跳过处理，任务继续推进
#[tokio::test]
async fn ask_timeout_defaults_to_skip() {
    let env = TestEnv::new();
    let bytes = png_bytes(10, 120, 40);
    seed_duplicate(&env, &bytes).await;

    let duplicate = env.dir.path().join("duplicate.png");
    std::fs::write(&duplicate, &bytes).unwrap();
    // 第二个文件确认超时后任务能继续
    let fresh = env.dir.path().join("fresh.png");
    std::fs::write(&fresh, png_bytes(1, 1, 200)).unwrap();

    let indexer = Arc::new(
        BatchIndexer::new(
            env.libraries.clone(),
            env.embedder.clone(),
            env.caches.clone(),
            "png",
            "mp4",
            2,
            false,
        )
        .with_decision_timeout(Duration::from_millis(100)),
    );
    let id = indexer
        .submit(
            LibraryKey::Permanent,
            vec![
                duplicate.to_string_lossy().into_owned(),
                fresh.to_string_lossy().into_owned(),
            ],
            DuplicateStrategy::Ask,
        )
        .unwrap();
    let snapshot = wait_terminal(&indexer, id).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.duplicates.len(), 1);
    // 超时兜底是自动跳过，不能记成用户决策
    assert_eq!(snapshot.duplicates[0].action, "已跳过");
    assert_eq!(snapshot.success, 1);
    assert!(snapshot.pending_duplicate.is_none());
}

/// 决策接口唤醒等待中的任务
#[tokio::test]
async fn decision_resumes_waiting_task() {
    let env = TestEnv::new();
    let bytes = png_bytes(90, 90, 10);
    seed_duplicate(&env, &bytes).await;

    let duplicate = env.dir.path().join("duplicate.png");
    std::fs::write(&duplicate, &bytes).unwrap();
    let duplicate_path = duplicate.to_string_lossy().into_owned();

    let indexer = make_indexer(&env);
    let id = indexer
        .submit(LibraryKey::Permanent, vec![duplicate_path.clone()], DuplicateStrategy::Ask)
        .unwrap();

    // 等任务挂起后提交覆盖决策
    for _ in 0..200 {
        if let Some(snapshot) = indexer.snapshot(&id) {
            if snapshot.status == TaskStatus::WaitingDuplicate {
                assert!(snapshot.pending_duplicate.is_some());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    indexer.decide(&id, DuplicateAction::Overwrite, false).unwrap();

    let snapshot = wait_terminal(&indexer, id).await;
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.success, 1);
    assert_eq!(snapshot.duplicates[0].action, "用户覆盖");

    let pool = env.libraries.permanent().await.unwrap();
    let props = phash::d_hash_bytes(&bytes).unwrap();
    let record = crud::find_image_by_phash(&pool, &props.phash).await.unwrap().unwrap();
    assert_eq!(record.path, duplicate_path);
}

/// 不存在的文件记入 failed，任务不中断
#[tokio::test]
async fn missing_file_is_recorded_as_failed() {
    let env = TestEnv::new();
    let fresh = env.dir.path().join("fresh.png");
    std::fs::write(&fresh, png_bytes(7, 7, 7)).unwrap();

    let indexer = make_indexer(&env);
    let id = indexer
        .submit(
            LibraryKey::Permanent,
            vec!["/no/such/file.png".to_string(), fresh.to_string_lossy().into_owned()],
            DuplicateStrategy::Skip,
        )
        .unwrap();
    let snapshot = wait_terminal(&indexer, id).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.failed.len(), 1);
    assert_eq!(snapshot.failed[0].path, "/no/such/file.png");
    assert_eq!(snapshot.success, 1);
}
