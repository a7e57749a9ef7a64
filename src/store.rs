//! Append-only persistence for documents and their ledgers, backed by sled
//!
//! # Trees
//!
//! - `documents` - document records (key: document id)
//! - `doc_numbers` - uniqueness index (key: uploader id || doc number)
//! - `doc_children` - trade links (key: parent id || child id)
//! - `ledger` - ledger entries (key: document id || sequence)
//!
//! Integer key parts are big-endian so sled's byte ordering is numeric
//! ordering, which keeps a document's entries contiguous and in sequence.
use super::document::{Document, LedgerEntry};
use super::error::StoreError;
use super::types::{DocumentId, UserId};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::sync::Arc;

const TREE_DOCUMENTS: &str = "documents";
const TREE_DOC_NUMBERS: &str = "doc_numbers";
const TREE_DOC_CHILDREN: &str = "doc_children";
const TREE_LEDGER: &str = "ledger";

pub struct LedgerStore {
    instance: Arc<Db>,
    documents: Tree,
    doc_numbers: Tree,
    doc_children: Tree,
    ledger: Tree,
}

fn pair_key(high: u64, low: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&high.to_be_bytes());
    key.extend_from_slice(&low.to_be_bytes());
    key
}

fn ledger_key(document_id: DocumentId, sequence: u64) -> Vec<u8> {
    pair_key(document_id, sequence)
}

fn doc_number_key(uploader_id: UserId, doc_number: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + doc_number.len());
    key.extend_from_slice(&uploader_id.to_be_bytes());
    key.extend_from_slice(doc_number.as_bytes());
    key
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn unwrap_transaction<T>(result: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StoreError::Storage(e)),
    }
}

impl LedgerStore {
    pub fn open(instance: Arc<Db>) -> Result<Self, StoreError> {
        let documents = instance.open_tree(TREE_DOCUMENTS)?;
        let doc_numbers = instance.open_tree(TREE_DOC_NUMBERS)?;
        let doc_children = instance.open_tree(TREE_DOC_CHILDREN)?;
        let ledger = instance.open_tree(TREE_LEDGER)?;

        tracing::debug!(trees = 4, "opened ledger store");

        Ok(Self {
            instance,
            documents,
            doc_numbers,
            doc_children,
            ledger,
        })
    }

    /// Monotonic id shared by documents and entries.
    pub fn generate_id(&self) -> Result<u64, StoreError> {
        Ok(self.instance.generate_id()?)
    }

    /// Persists a new document, refusing a doc number its uploader already used
    /// or a parent that does not exist.
    pub fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let id_key = document.id.to_be_bytes();
        let number_key = doc_number_key(document.uploader_id, &document.doc_number);
        let record = encode(document)?;

        let trees = (&self.documents, &self.doc_numbers, &self.doc_children);
        let result = trees.transaction(|(documents, doc_numbers, doc_children)| {
            if let Some(parent_id) = document.parent_id {
                if documents.get(parent_id.to_be_bytes())?.is_none() {
                    return Err(ConflictableTransactionError::Abort(
                        StoreError::ParentNotFound(parent_id),
                    ));
                }
                doc_children.insert(pair_key(parent_id, document.id), &id_key[..])?;
            }
            if doc_numbers.get(number_key.as_slice())?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    StoreError::DuplicateDocumentNumber {
                        uploader_id: document.uploader_id,
                        doc_number: document.doc_number.clone(),
                    },
                ));
            }
            doc_numbers.insert(number_key.as_slice(), &id_key[..])?;
            documents.insert(&id_key[..], record.as_slice())?;
            Ok(())
        });

        unwrap_transaction(result)
    }

    pub fn document(&self, document_id: DocumentId) -> Result<Option<Document>, StoreError> {
        match self.documents.get(document_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every document, in id order.
    pub fn documents(&self) -> Result<Vec<Document>, StoreError> {
        self.documents
            .iter()
            .values()
            .map(|bytes| -> Result<Document, StoreError> { Ok(minicbor::decode(&bytes?)?) })
            .collect()
    }

    /// Ids of documents registered against `parent_id`, ascending.
    pub fn children(&self, parent_id: DocumentId) -> Result<Vec<DocumentId>, StoreError> {
        self.doc_children
            .scan_prefix(parent_id.to_be_bytes())
            .keys()
            .map(|key| -> Result<DocumentId, StoreError> {
                let key = key?;
                let child: [u8; 8] = key
                    .get(8..)
                    .and_then(|tail| tail.try_into().ok())
                    .ok_or(StoreError::MalformedKey)?;
                Ok(u64::from_be_bytes(child))
            })
            .collect()
    }

    /// A document's ledger in ascending sequence order.
    pub fn entries(&self, document_id: DocumentId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.ledger
            .scan_prefix(document_id.to_be_bytes())
            .values()
            .map(|bytes| -> Result<LedgerEntry, StoreError> { Ok(minicbor::decode(&bytes?)?) })
            .collect()
    }

    pub fn ledger_len(&self, document_id: DocumentId) -> Result<u64, StoreError> {
        Ok(self.ledger.scan_prefix(document_id.to_be_bytes()).count() as u64)
    }

    /// Appends `entry` if and only if it extends the ledger exactly as read by
    /// the caller: slot `sequence` must be empty and slot `sequence - 1` taken.
    /// Anything else means another writer got there first.
    pub fn append(&self, entry: &LedgerEntry, flush: bool) -> Result<(), StoreError> {
        let document_id = entry.document_id;
        let sequence = entry.sequence;
        let doc_key = document_id.to_be_bytes();
        let key = ledger_key(document_id, sequence);
        let prev_key = ledger_key(document_id, sequence.saturating_sub(1));
        let record = encode(entry)?;

        let result = (&self.documents, &self.ledger).transaction(|(documents, ledger)| {
            if documents.get(&doc_key[..])?.is_none() {
                return Err(ConflictableTransactionError::Abort(
                    StoreError::DocumentNotFound(document_id),
                ));
            }
            let slot_taken = ledger.get(key.as_slice())?.is_some();
            let prev_missing = sequence > 1 && ledger.get(prev_key.as_slice())?.is_none();
            if sequence == 0 || slot_taken || prev_missing {
                return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
                    document_id,
                    sequence,
                }));
            }
            ledger.insert(key.as_slice(), record.as_slice())?;
            Ok(())
        });
        unwrap_transaction(result)?;

        if flush {
            self.instance.flush()?;
        }

        Ok(())
    }
}
