//! Client-side designer state: the last loaded forest, its token, and the
//! ops staged since.

use std::collections::BTreeSet;

use uuid::Uuid;

use super::{ConcurrencyToken, Designer, DesignerCommit, DesignerOp, PublishOutcome, RestoreOutcome};
use crate::db::generate_key;
use crate::error::{PageError, Result};
use crate::models::{Page, PageComponent};
use crate::tree::TreeNode;

/// One editor's working copy of a page.
///
/// Edits are staged locally and pushed with [`save`](Self::save). A save that
/// loses the token race fails with `Conflict` and keeps everything staged, so
/// the caller can [`reload`](Self::reload) and try again.
pub struct DesignerSession {
    designer: Designer,
    page: Page,
    token: ConcurrencyToken,
    forest: Vec<TreeNode<PageComponent>>,
    pending: Vec<DesignerOp>,
    dirty: BTreeSet<String>,
}

impl DesignerSession {
    pub fn open(designer: Designer, page_id: Uuid) -> Result<Self> {
        let view = designer.load(page_id)?;
        Ok(Self {
            designer,
            page: view.page,
            token: view.token,
            forest: view.forest,
            pending: Vec::new(),
            dirty: BTreeSet::new(),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn token(&self) -> ConcurrencyToken {
        self.token
    }

    pub fn forest(&self) -> &[TreeNode<PageComponent>] {
        &self.forest
    }

    pub fn pending(&self) -> &[DesignerOp] {
        &self.pending
    }

    /// Queue an op and return the key it touches.
    ///
    /// Creates without a key get one assigned here, so later ops in the same
    /// batch can refer to the new component before it is saved.
    pub fn stage(&mut self, mut op: DesignerOp) -> String {
        if let DesignerOp::Create(input) = &mut op {
            if input.key.is_none() {
                input.key = Some(generate_key(&input.component_type));
            }
        }
        let key = op.key().unwrap_or_default().to_string();
        self.dirty.insert(key.clone());
        self.pending.push(op);
        key
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn dirty_keys(&self) -> Vec<String> {
        self.dirty.iter().cloned().collect()
    }

    /// Push staged ops under the current token.
    pub fn save(&mut self) -> Result<DesignerCommit> {
        let commit = self
            .designer
            .apply(self.page.id, self.token, self.pending.clone())?;
        self.token = commit.token;
        self.forest = commit.forest.clone();
        self.pending.clear();
        self.dirty.clear();
        Ok(commit)
    }

    /// Refresh the forest and token from the server. Staged ops are kept.
    pub fn reload(&mut self) -> Result<()> {
        let view = self.designer.load(self.page.id)?;
        self.page = view.page;
        self.token = view.token;
        self.forest = view.forest;
        Ok(())
    }

    pub fn discard(&mut self) {
        self.pending.clear();
        self.dirty.clear();
    }

    /// Save anything staged, then publish the result.
    pub fn publish(&mut self, notes: Option<String>) -> Result<PublishOutcome> {
        if self.is_dirty() {
            self.save()?;
        }
        let outcome = self.designer.publish(self.page.id, self.token, notes)?;
        self.reload()?;
        Ok(outcome)
    }

    /// Restore an earlier version. Refused while edits are staged.
    pub fn restore(&mut self, version: i64) -> Result<RestoreOutcome> {
        if self.is_dirty() {
            return Err(PageError::Conflict(
                "save or discard staged changes before restoring".to_string(),
            ));
        }
        let outcome = self.designer.restore(self.page.id, self.token, version)?;
        self.reload()?;
        Ok(outcome)
    }
}
