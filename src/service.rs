//! Service layer API for document workflow operations
use super::config::EngineConfig;
use super::document::{self, Document, DocumentDraft, DocumentTimeline, LedgerEntry, TradeTimeline};
use super::error::{Corruption, StoreError, WorkflowError};
use super::policy;
use super::projector;
use super::store::LedgerStore;
use super::types::{Action, Actor, DocumentId, Role, Status};
use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Linear backoff, saturating instead of overflowing on absurd settings.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

fn corrupt(document_id: DocumentId, reason: Corruption) -> WorkflowError {
    tracing::error!(document_id, %reason, "corrupt ledger");
    WorkflowError::CorruptLedger { document_id, reason }
}

pub struct DocumentWorkflowEngine {
    store: LedgerStore,
    config: EngineConfig,
}

impl DocumentWorkflowEngine {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Self::with_config(instance, EngineConfig::default())
    }

    pub fn with_config(instance: Arc<sled::Db>, config: EngineConfig) -> Result<Self, WorkflowError> {
        let store = LedgerStore::open(instance)?;
        Ok(Self { store, config })
    }

    /// Opens (or creates) the database at `config.db_path`.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.db_path)
            .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?;
        tracing::info!(path = %config.db_path.display(), "ledger database opened");

        Ok(Self::with_config(Arc::new(db), config)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads a document and checks its seal before anyone trusts its fields.
    fn load_document(&self, document_id: DocumentId) -> Result<Document, WorkflowError> {
        let document = self
            .store
            .document(document_id)?
            .ok_or(WorkflowError::DocumentNotFound(document_id))?;
        document
            .verify_seal()
            .map_err(|reason| corrupt(document_id, reason))?;

        Ok(document)
    }

    /// Checks the chain and folds it. Any disagreement is fatal for the document.
    fn derive_status(&self, document: &Document, entries: &[LedgerEntry]) -> Result<Status, WorkflowError> {
        document::verify_chain(document, entries)
            .and_then(|()| projector::project(document.doc_type, entries))
            .map_err(|reason| corrupt(document.id, reason))
    }

    /// Register an uploaded file as a new document. The content is hashed
    /// here, once; the engine never reads the bytes again.
    pub fn register_document(
        &self,
        draft: DocumentDraft,
        content: &[u8],
        uploader: &Actor,
    ) -> Result<Document, WorkflowError> {
        let doc_type = draft.doc_type();
        if !policy::can_upload(uploader.role, doc_type) {
            tracing::warn!(role = %uploader.role, %doc_type, "upload rejected");
            return Err(WorkflowError::UploadNotPermitted {
                role: uploader.role,
                doc_type,
            });
        }

        if let Some(parent_id) = draft.parent() {
            let parent = match self.load_document(parent_id) {
                Err(WorkflowError::DocumentNotFound(id)) => return Err(WorkflowError::ParentNotFound(id)),
                other => other?,
            };
            if !policy::can_link(doc_type, parent.doc_type) {
                return Err(WorkflowError::InvalidParent {
                    doc_type,
                    parent_type: parent.doc_type,
                });
            }
        }

        let draft = draft.validate_and_finalise(content)?;
        let document = Document::from_draft(self.store.generate_id()?, uploader.id, draft)?;
        self.store.insert_document(&document)?;

        tracing::info!(
            document_id = document.id,
            doc_number = %document.doc_number,
            %doc_type,
            uploader_id = uploader.id,
            parent_id = ?document.parent_id,
            content_hash = %document.content_hash,
            "document registered"
        );

        Ok(document)
    }

    /// Validate `action` against the document's current status and record it.
    ///
    /// Load, derive, check and append run as one optimistic unit: if another
    /// writer extends the ledger in between, the append is refused by the store
    /// and the whole unit is re-run against the new history, up to
    /// `max_retries` extra times.
    pub fn perform_action(
        &self,
        document_id: DocumentId,
        actor: &Actor,
        action: Action,
        metadata: Option<String>,
    ) -> Result<LedgerEntry, WorkflowError> {
        let request_id = uuid7::uuid7();
        let span = tracing::info_span!(
            "perform_action",
            %request_id,
            document_id,
            actor_id = actor.id,
            role = %actor.role,
            %action
        );
        let _enter = span.enter();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let document = self.load_document(document_id)?;
            let entries = self.store.entries(document_id)?;
            let status = self.derive_status(&document, &entries)?;

            if !policy::is_allowed(actor.role, document.doc_type, status, action) {
                tracing::warn!(%status, doc_type = %document.doc_type, "action not permitted");
                return Err(WorkflowError::ActionNotPermitted {
                    role: actor.role,
                    doc_type: document.doc_type,
                    status,
                    action,
                });
            }

            let entry = LedgerEntry::next(
                &document,
                entries.last(),
                self.store.generate_id()?,
                actor,
                action,
                metadata.clone(),
            )?;

            match self.store.append(&entry, self.config.flush_on_append) {
                Ok(()) => {
                    tracing::info!(
                        sequence = entry.sequence,
                        entry_id = entry.id,
                        from = %status,
                        "ledger entry appended"
                    );
                    return Ok(entry);
                }
                Err(StoreError::Conflict { sequence, .. }) if attempt <= self.config.max_retries => {
                    tracing::debug!(attempt, sequence, "lost append race, retrying");
                    std::thread::sleep(backoff(self.config.retry_backoff, attempt));
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::warn!(attempts = attempt, "giving up after repeated append conflicts");
                    return Err(WorkflowError::ConcurrentModification {
                        document_id,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read-only view of what `actor` could do right now. A hint only:
    /// [`Self::perform_action`] re-checks on every call.
    pub fn list_permitted_actions(
        &self,
        document_id: DocumentId,
        actor: &Actor,
    ) -> Result<BTreeSet<Action>, WorkflowError> {
        let document = self.load_document(document_id)?;
        let entries = self.store.entries(document_id)?;
        let status = self.derive_status(&document, &entries)?;

        Ok(policy::allowed_actions(actor.role, document.doc_type, status))
    }

    pub fn get_document_with_ledger(&self, document_id: DocumentId) -> Result<DocumentTimeline, WorkflowError> {
        let document = self.load_document(document_id)?;
        let entries = self.store.entries(document_id)?;
        let status = self.derive_status(&document, &entries)?;

        Ok(DocumentTimeline {
            document,
            entries,
            status,
        })
    }

    /// Current status of a document, re-derived from its ledger.
    pub fn status(&self, document_id: DocumentId) -> Result<Status, WorkflowError> {
        Ok(self.get_document_with_ledger(document_id)?.status)
    }

    /// Full integrity check of a document: its record seal, chain links, entry
    /// hashes, sequence and timestamps, and that every entry was a legal transition.
    pub fn audit_ledger(&self, document_id: DocumentId) -> Result<Status, WorkflowError> {
        let status = self.status(document_id)?;
        tracing::info!(document_id, %status, "ledger audit passed");
        Ok(status)
    }

    /// Every document of the trade `document_id` belongs to, with their ledgers.
    ///
    /// Parent links are walked up to the document registered without one, then
    /// every document issued against it (directly or not) is collected.
    pub fn trade_timeline(&self, document_id: DocumentId) -> Result<TradeTimeline, WorkflowError> {
        let mut root = self.load_document(document_id)?;
        while let Some(parent_id) = root.parent_id {
            // parents always predate their children, so this terminates
            if parent_id >= root.id {
                return Err(corrupt(root.id, Corruption::DocumentTampered { document_id: root.id }));
            }
            root = self.load_document(parent_id)?;
        }

        let mut ids = vec![root.id];
        let mut next = 0;
        while next < ids.len() {
            ids.extend(self.store.children(ids[next])?);
            next += 1;
        }
        ids.sort_unstable();

        let documents = ids
            .into_iter()
            .map(|id| self.get_document_with_ledger(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TradeTimeline {
            root: root.id,
            documents,
        })
    }

    /// Documents visible to `actor`. Buyers see their own uploads, sellers also
    /// see documents naming them as counterparty, auditors and banks see all.
    /// A record that fails its seal fails the whole listing.
    pub fn list_documents(&self, actor: &Actor) -> Result<Vec<Document>, WorkflowError> {
        let mut visible = Vec::new();
        for doc in self.store.documents()? {
            doc.verify_seal().map_err(|reason| corrupt(doc.id, reason))?;
            let sees = match actor.role {
                Role::Buyer => doc.uploader_id == actor.id,
                Role::Seller => doc.uploader_id == actor.id || doc.counterparty_id == Some(actor.id),
                Role::Auditor | Role::Bank => true,
            };
            if sees {
                visible.push(doc);
            }
        }

        Ok(visible)
    }

    /// Whether `content` is byte-for-byte the file the document was registered with.
    pub fn verify_document_content(&self, document_id: DocumentId, content: &[u8]) -> Result<bool, WorkflowError> {
        let document = self.load_document(document_id)?;
        let matches = document.verify_content(content)?;
        if !matches {
            tracing::warn!(document_id, "supplied content does not match recorded hash");
        }
        Ok(matches)
    }
}
