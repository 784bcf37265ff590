use tokio::sync::broadcast;
use uuid::Uuid;

use crate::attachments::{AttachmentStore, is_plain_name};
use crate::error::{Result, StoreError};
use crate::messages::ChangeNotification;
use crate::store::{self, Collection, Scope};
use crate::types::{Attachment, NewTask, StatusFilter, Task, TaskPatch, Upload};

const CHANGE_CAPACITY: usize = 256;

/// Owner-scoped task operations shared by every front-end.
///
/// `owner` is matched exactly: `Some(id)` sees only that user's tasks and
/// `None` sees only owner-less tasks.
///
/// Every mutation goes through the task collection's lock and, once saved,
/// is announced on the change channel.
#[derive(Debug, Clone)]
pub struct TaskService {
    tasks: Collection<Task>,
    files: AttachmentStore,
    change_tx: broadcast::Sender<ChangeNotification>,
}

impl TaskService {
    pub fn new(tasks: Collection<Task>, files: AttachmentStore) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            tasks,
            files,
            change_tx,
        }
    }

    pub fn files(&self) -> &AttachmentStore {
        &self.files
    }

    /// Get a handle to the change notification broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.change_tx.subscribe()
    }

    pub async fn list(&self, owner: Option<&str>, filter: StatusFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.load_all().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.owner_id.as_deref() == owner)
            .filter(|t| filter.matches(t))
            .collect())
    }

    pub async fn get(&self, id: &str, owner: Option<&str>) -> Result<Task> {
        self.tasks.find_by_id(id, Scope::Owner(owner)).await
    }

    pub async fn create(&self, owner: Option<&str>, new: NewTask) -> Result<Task> {
        let task = build_task(owner, new)?;
        self.store_new(task).await
    }

    /// Create a task whose files arrive with the request. The title is
    /// validated before any file is written, and the files are removed again
    /// if the task cannot be saved.
    pub async fn create_with_uploads(
        &self,
        owner: Option<&str>,
        new: NewTask,
        uploads: Vec<Upload>,
    ) -> Result<Task> {
        let mut task = build_task(owner, new)?;
        if uploads.is_empty() {
            return self.store_new(task).await;
        }

        let added = self.files.save(owner, uploads).await?;
        task.attachments.extend(added.iter().cloned());
        match self.store_new(task).await {
            Ok(task) => Ok(task),
            Err(e) => {
                for attachment in &added {
                    self.files.delete(owner, &attachment.filename).await;
                }
                Err(e)
            }
        }
    }

    async fn store_new(&self, task: Task) -> Result<Task> {
        let task = self.tasks.insert(task).await?;
        log::info!("Created task {}", task.id);
        self.notify(ChangeNotification::created(&task));
        Ok(task)
    }

    pub async fn update(&self, id: &str, owner: Option<&str>, patch: TaskPatch) -> Result<Task> {
        let title = match patch.title.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::validation("Title cannot be empty")),
            other => other.map(str::to_string),
        };

        let task = self
            .tasks
            .update(id, Scope::Owner(owner), |task| {
                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = patch.description {
                    task.description = description.trim().to_string();
                }
                if let Some(due_date) = patch.due_date {
                    task.due_date = non_empty(due_date);
                }
                if let Some(completed) = patch.completed {
                    task.completed = completed;
                }
                Ok(())
            })
            .await?;
        self.notify(ChangeNotification::updated(&task));
        Ok(task)
    }

    pub async fn toggle(&self, id: &str, owner: Option<&str>) -> Result<Task> {
        let task = self
            .tasks
            .update(id, Scope::Owner(owner), |task| {
                task.completed = !task.completed;
                Ok(())
            })
            .await?;
        self.notify(ChangeNotification::updated(&task));
        Ok(task)
    }

    /// Remove the task, then its attachment files. A file that cannot be
    /// deleted never blocks the task removal.
    pub async fn delete(&self, id: &str, owner: Option<&str>) -> Result<Task> {
        let removed = self.tasks.remove(id, Scope::Owner(owner)).await?;
        for attachment in &removed.attachments {
            self.files
                .delete(removed.owner_id.as_deref(), &attachment.filename)
                .await;
        }
        log::info!("Deleted task {id}");
        self.notify(ChangeNotification::deleted(&removed));
        Ok(removed)
    }

    /// Store `uploads` and append them to the task's attachments.
    pub async fn attach(
        &self,
        id: &str,
        owner: Option<&str>,
        uploads: Vec<Upload>,
    ) -> Result<(Task, Vec<Attachment>)> {
        // Fail before writing any file if the task is not visible to `owner`.
        let existing = self.tasks.find_by_id(id, Scope::Owner(owner)).await?;
        let added = self.files.save(existing.owner_id.as_deref(), uploads).await?;

        let appended = added.clone();
        match self
            .tasks
            .update(id, Scope::Owner(owner), move |task| {
                task.attachments.extend(appended);
                Ok(())
            })
            .await
        {
            Ok(task) => {
                self.notify(ChangeNotification::updated(&task));
                Ok((task, added))
            }
            Err(e) => {
                for attachment in &added {
                    self.files
                        .delete(existing.owner_id.as_deref(), &attachment.filename)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Drop one attachment from the task and delete its file.
    pub async fn detach(&self, id: &str, owner: Option<&str>, filename: &str) -> Result<Task> {
        let task = self
            .tasks
            .update(id, Scope::Owner(owner), |task| {
                let before = task.attachments.len();
                task.attachments.retain(|a| a.filename != filename);
                if task.attachments.len() == before {
                    return Err(StoreError::AttachmentNotFound(filename.to_string()));
                }
                Ok(())
            })
            .await?;
        self.files.delete(task.owner_id.as_deref(), filename).await;
        self.notify(ChangeNotification::updated(&task));
        Ok(task)
    }

    /// Store files that are not bound to a task yet. The returned triples
    /// can be passed in [`NewTask::attachments`].
    pub async fn upload(&self, owner: Option<&str>, uploads: Vec<Upload>) -> Result<Vec<Attachment>> {
        self.files.save(owner, uploads).await
    }

    fn notify(&self, notification: ChangeNotification) {
        // No receivers is fine; nobody is listening.
        let _ = self.change_tx.send(notification);
    }
}

fn build_task(owner: Option<&str>, new: NewTask) -> Result<Task> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(StoreError::validation("Title is required"));
    }
    if let Some(bad) = new.attachments.iter().find(|a| !is_plain_name(&a.filename)) {
        return Err(StoreError::validation(format!(
            "Invalid attachment name {:?}",
            bad.filename
        )));
    }

    Ok(Task {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.map(str::to_string),
        title: title.to_string(),
        description: new
            .description
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        due_date: non_empty(new.due_date),
        completed: false,
        created_at: store::now(),
        updated_at: None,
        attachments: new.attachments,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
