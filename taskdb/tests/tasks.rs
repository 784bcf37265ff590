use std::path::Path;

use taskdb::{
    AttachmentStore, ChangeKind, NewTask, StatusFilter, Store, StoreError, TaskPatch, TaskService,
    Upload,
};

fn service(dir: &Path) -> TaskService {
    let store = Store::open(dir.join("data"));
    TaskService::new(
        store.collection("tasks"),
        AttachmentStore::new(dir.join("uploads")),
    )
}

#[tokio::test]
async fn test_owner_scenario_with_filters() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    let milk = tasks
        .create(Some("alice"), NewTask::titled("Buy milk"))
        .await
        .expect("Failed to create");
    let call = tasks
        .create(Some("alice"), NewTask::titled("Call mom"))
        .await
        .expect("Failed to create");
    tasks
        .create(Some("bob"), NewTask::titled("Bob's task"))
        .await
        .expect("Failed to create");

    assert_ne!(milk.id, call.id);
    assert!(!milk.completed);
    assert!(milk.updated_at.is_none());

    let toggled = tasks.toggle(&milk.id, Some("alice")).await.unwrap();
    assert!(toggled.completed);

    let active = tasks.list(Some("alice"), StatusFilter::Active).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].title, "Call mom");

    let completed = tasks
        .list(Some("alice"), StatusFilter::Completed)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].title, "Buy milk");

    assert_eq!(tasks.list(Some("alice"), StatusFilter::All).await.unwrap().len(), 2);
    assert_eq!(tasks.list(Some("bob"), StatusFilter::All).await.unwrap().len(), 1);

    // Bob cannot see, change or delete Alice's tasks.
    assert!(matches!(
        tasks.get(&milk.id, Some("bob")).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        tasks.toggle(&milk.id, Some("bob")).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        tasks.delete(&milk.id, Some("bob")).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_anonymous_caller_sees_only_ownerless_tasks() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let owned = tasks
        .create(Some("alice"), NewTask::titled("private"))
        .await
        .expect("Failed to create");

    assert!(tasks.list(None, StatusFilter::All).await.unwrap().is_empty());
    assert!(matches!(
        tasks.get(&owned.id, None).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        tasks.update(&owned.id, None, TaskPatch::default()).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        tasks
            .attach(&owned.id, None, vec![Upload::new("a.txt", b"a".to_vec())])
            .await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        tasks.delete(&owned.id, None).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(!dir.path().join("uploads").exists());

    // The owner's view is unchanged and the owner-less task stays separate.
    let shared = tasks.create(None, NewTask::titled("shared")).await.unwrap();
    let anonymous = tasks.list(None, StatusFilter::All).await.unwrap();
    assert_eq!(anonymous, vec![shared]);
    let alice = tasks.list(Some("alice"), StatusFilter::All).await.unwrap();
    assert_eq!(alice, vec![owned]);
}

#[tokio::test]
async fn test_returned_records_equal_stored_records() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    let created = tasks.create(Some("alice"), NewTask::titled("x")).await.unwrap();
    assert_eq!(tasks.get(&created.id, Some("alice")).await.unwrap(), created);

    let toggled = tasks.toggle(&created.id, Some("alice")).await.unwrap();
    assert_eq!(tasks.get(&created.id, Some("alice")).await.unwrap(), toggled);
}

#[tokio::test]
async fn test_toggle_twice_restores_completed() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks.create(None, NewTask::titled("x")).await.unwrap();

    let once = tasks.toggle(&task.id, None).await.unwrap();
    let twice = tasks.toggle(&task.id, None).await.unwrap();
    assert!(once.completed);
    assert!(!twice.completed);
    let (first, second) = (once.updated_at.unwrap(), twice.updated_at.unwrap());
    assert!(second >= first);
}

#[tokio::test]
async fn test_create_validates_and_normalizes() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    assert!(matches!(
        tasks.create(Some("alice"), NewTask::titled("   ")).await,
        Err(StoreError::Validation(_))
    ));
    assert!(
        !dir.path().join("data").join("tasks.json").exists(),
        "validation failures must not touch storage"
    );

    let task = tasks
        .create(
            Some("alice"),
            NewTask {
                title: "  Read book ".into(),
                description: Some("  chapter 3  ".into()),
                due_date: Some(String::new()),
                attachments: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(task.title, "Read book");
    assert_eq!(task.description, "chapter 3");
    assert!(task.due_date.is_none());
}

#[tokio::test]
async fn test_update_applies_patch() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks
        .create(
            Some("alice"),
            NewTask {
                title: "Plan trip".into(),
                due_date: Some("2024-07-01".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Absent dueDate keeps the current value.
    let renamed = tasks
        .update(
            &task.id,
            Some("alice"),
            TaskPatch {
                title: Some("Plan holiday".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.title, "Plan holiday");
    assert_eq!(renamed.due_date.as_deref(), Some("2024-07-01"));
    assert!(renamed.updated_at.is_some());

    // Explicit null clears it.
    let cleared = tasks
        .update(
            &task.id,
            Some("alice"),
            TaskPatch {
                due_date: Some(None),
                completed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.due_date.is_none());
    assert!(cleared.completed);

    assert!(matches!(
        tasks
            .update(
                &task.id,
                Some("alice"),
                TaskPatch {
                    title: Some(" ".into()),
                    ..Default::default()
                },
            )
            .await,
        Err(StoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_delete_removes_attachment_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks
        .create(Some("alice"), NewTask::titled("With files"))
        .await
        .unwrap();

    let (task, added) = tasks
        .attach(
            &task.id,
            Some("alice"),
            vec![
                Upload::new("a.txt", b"a".to_vec()),
                Upload::new("b.txt", b"b".to_vec()),
            ],
        )
        .await
        .expect("Failed to attach");
    assert_eq!(task.attachments.len(), 2);
    assert_eq!(added, task.attachments);

    let owner_dir = dir.path().join("uploads").join("alice");
    let files: Vec<_> = added.iter().map(|a| owner_dir.join(&a.filename)).collect();
    assert!(files.iter().all(|f| f.exists()));

    let removed = tasks.delete(&task.id, Some("alice")).await.unwrap();
    assert_eq!(removed.id, task.id);
    assert!(files.iter().all(|f| !f.exists()));
    assert!(tasks.list(Some("alice"), StatusFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_survives_missing_attachment_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks.create(Some("alice"), NewTask::titled("x")).await.unwrap();
    let (_, added) = tasks
        .attach(&task.id, Some("alice"), vec![Upload::new("a.txt", b"a".to_vec())])
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("uploads/alice").join(&added[0].filename)).unwrap();

    tasks.delete(&task.id, Some("alice")).await.expect("delete should still succeed");
}

#[tokio::test]
async fn test_attach_to_foreign_task_writes_no_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks.create(Some("alice"), NewTask::titled("x")).await.unwrap();

    assert!(matches!(
        tasks
            .attach(&task.id, Some("bob"), vec![Upload::new("a.txt", b"a".to_vec())])
            .await,
        Err(StoreError::NotFound(_))
    ));
    assert!(!dir.path().join("uploads").exists());
}

#[tokio::test]
async fn test_detach_removes_entry_and_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());
    let task = tasks.create(Some("alice"), NewTask::titled("x")).await.unwrap();
    let (_, added) = tasks
        .attach(
            &task.id,
            Some("alice"),
            vec![Upload::new("a.txt", b"a".to_vec()), Upload::new("b.txt", b"b".to_vec())],
        )
        .await
        .unwrap();

    let updated = tasks
        .detach(&task.id, Some("alice"), &added[0].filename)
        .await
        .unwrap();
    assert_eq!(updated.attachments, vec![added[1].clone()]);
    assert!(!dir.path().join("uploads/alice").join(&added[0].filename).exists());

    assert!(matches!(
        tasks.detach(&task.id, Some("alice"), "missing.txt").await,
        Err(StoreError::AttachmentNotFound(_))
    ));
}

#[tokio::test]
async fn test_unbound_upload_then_create() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    let stored = tasks
        .upload(Some("alice"), vec![Upload::new("notes.md", b"# hi".to_vec())])
        .await
        .unwrap();
    let task = tasks
        .create(
            Some("alice"),
            NewTask {
                title: "With upload".into(),
                attachments: stored.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(task.attachments, stored);

    let mut bad = stored[0].clone();
    bad.filename = "../escape".into();
    assert!(matches!(
        tasks
            .create(
                Some("alice"),
                NewTask {
                    title: "bad".into(),
                    attachments: vec![bad],
                    ..Default::default()
                },
            )
            .await,
        Err(StoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_mutations_emit_change_notifications() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    // Subscribe to changes before writing
    let mut rx = tasks.subscribe();

    let task = tasks.create(Some("alice"), NewTask::titled("x")).await.unwrap();
    tasks.toggle(&task.id, Some("alice")).await.unwrap();
    tasks.delete(&task.id, Some("alice")).await.unwrap();

    let created = rx.try_recv().expect("Should have received created");
    assert_eq!(created.kind, ChangeKind::Created);
    assert_eq!(created.task.as_ref().map(|t| t.id.as_str()), Some(task.id.as_str()));
    assert!(created.is_visible_to(Some("alice")));
    assert!(!created.is_visible_to(Some("bob")));

    let updated = rx.try_recv().expect("Should have received updated");
    assert_eq!(updated.kind, ChangeKind::Updated);
    assert!(updated.task.unwrap().completed);

    let deleted = rx.try_recv().expect("Should have received deleted");
    assert_eq!(deleted.kind, ChangeKind::Deleted);
    assert_eq!(deleted.task_id, task.id);
    assert!(deleted.task.is_none());
}

#[tokio::test]
async fn test_create_with_uploads() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tasks = service(dir.path());

    // A blank title is rejected before any file is written.
    assert!(matches!(
        tasks
            .create_with_uploads(
                Some("alice"),
                NewTask::titled(""),
                vec![Upload::new("a.txt", b"a".to_vec())],
            )
            .await,
        Err(StoreError::Validation(_))
    ));
    assert!(!dir.path().join("uploads").exists());

    let task = tasks
        .create_with_uploads(
            Some("alice"),
            NewTask::titled("Report"),
            vec![Upload::new("report v2.pdf", b"%PDF".to_vec())],
        )
        .await
        .unwrap();
    assert_eq!(task.attachments.len(), 1);
    assert_eq!(task.attachments[0].original_name, "report v2.pdf");
    assert!(
        dir.path()
            .join("uploads/alice")
            .join(&task.attachments[0].filename)
            .exists()
    );
}
