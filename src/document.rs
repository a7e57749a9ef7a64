//! Documents, their drafts, and the hash-chained ledger entries recorded against them
use super::error::{ContentError, Corruption, DraftError, StoreError};
use super::hashing;
use super::types::{Action, Actor, DocType, DocumentId, EntryId, Role, Status, TimeStamp, UserId};
use chrono::Utc;

// Used for constructing uploads before they are registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDraft {
    doc_type: DocType,
    doc_number: Option<String>,
    file_reference: Option<String>, // handed back by file storage
    counterparty_id: Option<UserId>,
    parent_id: Option<DocumentId>, // document this one was issued against
}

/// A draft that passed validation, bound to the digest of its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDraft {
    pub doc_type: DocType,
    pub doc_number: String,
    pub file_reference: String,
    pub counterparty_id: Option<UserId>,
    pub parent_id: Option<DocumentId>,
    pub content_hash: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Document {
    #[n(0)]
    pub id: DocumentId,
    #[n(1)]
    pub doc_number: String, // unique per uploader
    #[n(2)]
    pub doc_type: DocType,
    #[n(3)]
    pub content_hash: String, // hex sha256 of the uploaded bytes
    #[n(4)]
    pub file_reference: String,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub uploader_id: UserId,
    #[n(7)]
    pub counterparty_id: Option<UserId>,
    #[n(8)]
    pub parent_id: Option<DocumentId>,
    #[n(9)]
    pub record_hash: String, // seals every field above
}

/// One immutable record of an action taken on a document.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    #[n(0)]
    pub id: EntryId,
    #[n(1)]
    pub document_id: DocumentId,
    #[n(2)]
    pub sequence: u64, // 1-based, gap free per document
    #[n(3)]
    pub action: Action,
    #[n(4)]
    pub actor_id: UserId,
    #[n(5)]
    pub actor_role: Role, // role held when the action was taken
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub metadata: Option<String>,
    #[n(8)]
    pub prev_hash: String, // record hash of the document for the first entry
    #[n(9)]
    pub entry_hash: String,
}

/// A document together with its full history, for timeline rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTimeline {
    pub document: Document,
    pub entries: Vec<LedgerEntry>,
    pub status: Status,
}

/// Every document linked to one trade, starting from the document that was
/// registered without a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTimeline {
    pub root: DocumentId,
    pub documents: Vec<DocumentTimeline>, // in id order
}

impl DocumentDraft {
    pub fn new(doc_type: DocType) -> Self {
        Self {
            doc_type,
            doc_number: None,
            file_reference: None,
            counterparty_id: None,
            parent_id: None,
        }
    }
    pub fn set_doc_number(mut self, doc_number: &str) -> Self {
        self.doc_number = Some(doc_number.trim().to_string());
        self
    }
    pub fn set_file_reference(mut self, file_reference: &str) -> Self {
        self.file_reference = Some(file_reference.trim().to_string());
        self
    }
    pub fn set_counterparty(mut self, counterparty_id: UserId) -> Self {
        self.counterparty_id = Some(counterparty_id);
        self
    }
    pub fn set_parent(mut self, parent_id: DocumentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
    pub fn doc_type(&self) -> DocType {
        self.doc_type
    }
    pub fn parent(&self) -> Option<DocumentId> {
        self.parent_id
    }
    /// Checks fields and binds the draft to the hash of `content`.
    pub fn validate_and_finalise(self, content: &[u8]) -> Result<FinalDraft, DraftError> {
        let doc_number = match self.doc_number {
            Some(n) if !n.is_empty() => n,
            _ => return Err(DraftError::MissingDocNumber),
        };
        let file_reference = match self.file_reference {
            Some(r) if !r.is_empty() => r,
            _ => return Err(DraftError::MissingFileReference),
        };
        let content_hash = hashing::hash_content(content)?;

        Ok(FinalDraft {
            doc_type: self.doc_type,
            doc_number,
            file_reference,
            counterparty_id: self.counterparty_id,
            parent_id: self.parent_id,
            content_hash,
        })
    }
}

impl Document {
    /// Builds the stored record and seals it.
    pub fn from_draft(id: DocumentId, uploader_id: UserId, draft: FinalDraft) -> Result<Self, StoreError> {
        let mut document = Self {
            id,
            doc_number: draft.doc_number,
            doc_type: draft.doc_type,
            content_hash: draft.content_hash,
            file_reference: draft.file_reference,
            created_at: TimeStamp::new(),
            uploader_id,
            counterparty_id: draft.counterparty_id,
            parent_id: draft.parent_id,
            record_hash: String::new(),
        };
        document.record_hash = document
            .compute_hash()
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        Ok(document)
    }

    /// sha256 over the CBOR encoding of the record with `record_hash` blanked
    pub fn compute_hash(&self) -> Result<String, minicbor::encode::Error<std::convert::Infallible>> {
        let unsealed = Self {
            record_hash: String::new(),
            ..self.clone()
        };
        let cbor = minicbor::to_vec(&unsealed)?;

        Ok(sha256::digest(&cbor))
    }

    pub fn verify_seal(&self) -> Result<(), Corruption> {
        match self.compute_hash() {
            Ok(hash) if hash == self.record_hash => Ok(()),
            _ => Err(Corruption::DocumentTampered {
                document_id: self.id,
            }),
        }
    }

    pub fn verify_content(&self, content: &[u8]) -> Result<bool, ContentError> {
        if content.is_empty() {
            return Err(ContentError::Empty);
        }
        Ok(hashing::verify_content(content, &self.content_hash))
    }
}

impl LedgerEntry {
    /// Builds and seals the entry that follows `previous` in `document`'s ledger.
    pub fn next(
        document: &Document,
        previous: Option<&LedgerEntry>,
        id: EntryId,
        actor: &Actor,
        action: Action,
        metadata: Option<String>,
    ) -> Result<Self, StoreError> {
        let now = TimeStamp::new();
        let (sequence, prev_hash, created_at) = match previous {
            Some(prev) => (
                prev.sequence + 1,
                prev.entry_hash.clone(),
                // clocks can step backwards, history can't
                if prev.created_at.to_datetime_utc() > now.to_datetime_utc() {
                    prev.created_at.clone()
                } else {
                    now
                },
            ),
            None => (1, document.record_hash.clone(), now),
        };

        let mut entry = Self {
            id,
            document_id: document.id,
            sequence,
            action,
            actor_id: actor.id,
            actor_role: actor.role,
            created_at,
            metadata,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry
            .compute_hash()
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        Ok(entry)
    }

    /// sha256 over the CBOR encoding of the entry with `entry_hash` blanked
    pub fn compute_hash(&self) -> Result<String, minicbor::encode::Error<std::convert::Infallible>> {
        let unsealed = Self {
            entry_hash: String::new(),
            ..self.clone()
        };
        let cbor = minicbor::to_vec(&unsealed)?;

        Ok(sha256::digest(&cbor))
    }
}

/// Checks that `document` still matches its seal and that `entries` form an
/// unbroken, untampered chain anchored on it.
pub fn verify_chain(document: &Document, entries: &[LedgerEntry]) -> Result<(), Corruption> {
    document.verify_seal()?;

    let mut prev_hash = document.record_hash.as_str();
    let mut prev_time: Option<&TimeStamp<Utc>> = None;

    for (i, entry) in entries.iter().enumerate() {
        let expected = i as u64 + 1;
        if entry.document_id != document.id {
            return Err(Corruption::ForeignEntry {
                sequence: entry.sequence,
                found: entry.document_id,
            });
        }
        if entry.sequence != expected {
            return Err(Corruption::SequenceGap {
                expected,
                found: entry.sequence,
            });
        }
        if prev_time.is_some_and(|t| entry.created_at.to_datetime_utc() < t.to_datetime_utc()) {
            return Err(Corruption::TimestampRegression {
                sequence: entry.sequence,
            });
        }
        if entry.prev_hash != prev_hash {
            return Err(Corruption::BrokenLink {
                sequence: entry.sequence,
            });
        }
        let recomputed = entry.compute_hash().map_err(|e| Corruption::Unencodable {
            sequence: entry.sequence,
            message: e.to_string(),
        })?;
        if recomputed != entry.entry_hash {
            return Err(Corruption::HashMismatch {
                sequence: entry.sequence,
            });
        }

        prev_hash = &entry.entry_hash;
        prev_time = Some(&entry.created_at);
    }

    Ok(())
}
