//! Confirmation step for destructive operations.

use async_trait::async_trait;

/// What the user is asked before a destructive operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
}

impl ConfirmRequest {
    pub fn remove_attachment(file_name: &str) -> Self {
        Self {
            title: "Delete attachment".into(),
            message: format!(
                "Remove \"{file_name}\" from workspace embedding? It will no longer be used as context."
            ),
            confirm_label: "Delete".into(),
        }
    }
}

/// Asks the user. Returning `false` means the operation is skipped.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest) -> bool;
}

/// Answers every request the same way. For headless callers and tests.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm(&self, _request: &ConfirmRequest) -> bool {
        self.0
    }
}
