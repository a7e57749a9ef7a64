use super::types::{Action, DocType, DocumentId, Role, Status, UserId};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseVocabularyError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("Refusing to hash empty file content")]
    Empty,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("Document number is not set")]
    MissingDocNumber,
    #[error("File reference is not set")]
    MissingFileReference,
    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Ways a stored ledger can disagree with itself. Any of these means the
/// document's history can no longer be trusted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("Document {document_id} record does not match its seal")]
    DocumentTampered { document_id: DocumentId },
    #[error("Entry {sequence} belongs to document {found}")]
    ForeignEntry { sequence: u64, found: DocumentId },
    #[error("Expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
    #[error("Entry {sequence} is timestamped before its predecessor")]
    TimestampRegression { sequence: u64 },
    #[error("Entry {sequence} does not link to its predecessor")]
    BrokenLink { sequence: u64 },
    #[error("Entry {sequence} hash does not match its contents")]
    HashMismatch { sequence: u64 },
    #[error("Entry {sequence} applies {action} to a {doc_type} in status {status}")]
    InvalidTransition {
        sequence: u64,
        doc_type: DocType,
        status: Status,
        action: Action,
    },
    #[error("Entry {sequence} could not be re-encoded: {message}")]
    Unencodable { sequence: u64, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Document {0} does not exist")]
    DocumentNotFound(DocumentId),
    #[error("Uploader {uploader_id} already registered document number '{doc_number}'")]
    DuplicateDocumentNumber { uploader_id: UserId, doc_number: String },
    #[error("Ledger slot {sequence} of document {document_id} was taken concurrently")]
    Conflict { document_id: DocumentId, sequence: u64 },
    #[error("Parent document {0} does not exist")]
    ParentNotFound(DocumentId),
    #[error("Malformed key in index tree")]
    MalformedKey,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("Action {action} is not permitted for role {role} on {doc_type} in status {status}")]
    ActionNotPermitted {
        role: Role,
        doc_type: DocType,
        status: Status,
        action: Action,
    },
    #[error("Invalid content: {0}")]
    InvalidContent(#[from] ContentError),
    #[error("Invalid document draft: {0}")]
    InvalidDraft(DraftError),
    #[error("Role {role} may not upload {doc_type} documents")]
    UploadNotPermitted { role: Role, doc_type: DocType },
    #[error("Parent document {0} not found")]
    ParentNotFound(DocumentId),
    #[error("A {doc_type} cannot be issued against a {parent_type}")]
    InvalidParent { doc_type: DocType, parent_type: DocType },
    #[error("Uploader {uploader_id} already registered document number '{doc_number}'")]
    DuplicateDocumentNumber { uploader_id: UserId, doc_number: String },
    #[error("Document {document_id} was modified concurrently, gave up after {attempts} attempts")]
    ConcurrentModification { document_id: DocumentId, attempts: u32 },
    #[error("Ledger of document {document_id} is corrupt: {reason}")]
    CorruptLedger {
        document_id: DocumentId,
        #[source]
        reason: Corruption,
    },
    #[error(transparent)]
    Storage(StoreError),
}

impl From<DraftError> for WorkflowError {
    fn from(value: DraftError) -> Self {
        match value {
            DraftError::Content(e) => WorkflowError::InvalidContent(e),
            other => WorkflowError::InvalidDraft(other),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DocumentNotFound(id) => WorkflowError::DocumentNotFound(id),
            StoreError::ParentNotFound(id) => WorkflowError::ParentNotFound(id),
            StoreError::DuplicateDocumentNumber {
                uploader_id,
                doc_number,
            } => WorkflowError::DuplicateDocumentNumber {
                uploader_id,
                doc_number,
            },
            other => WorkflowError::Storage(other),
        }
    }
}

impl WorkflowError {
    /// Whether the caller can reasonably retry with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkflowError::DocumentNotFound(_)
                | WorkflowError::ActionNotPermitted { .. }
                | WorkflowError::InvalidContent(_)
                | WorkflowError::InvalidDraft(_)
                | WorkflowError::UploadNotPermitted { .. }
                | WorkflowError::ParentNotFound(_)
                | WorkflowError::InvalidParent { .. }
                | WorkflowError::DuplicateDocumentNumber { .. }
                | WorkflowError::ConcurrentModification { .. }
        )
    }
}
