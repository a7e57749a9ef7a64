//! Derives a document's status by folding its ledger
use super::document::LedgerEntry;
use super::error::Corruption;
use super::types::{Action, DocType, Status};

pub fn initial_status(doc_type: DocType) -> Status {
    match doc_type {
        DocType::BillOfLading => Status::BolIssued,
        DocType::PurchaseOrder | DocType::LetterOfCredit | DocType::Invoice => Status::Created,
    }
}

/// The lifecycle of every document type. `None` means `action` cannot be
/// applied to a `doc_type` sitting in `from`.
pub fn transition(doc_type: DocType, from: Status, action: Action) -> Option<Status> {
    match (doc_type, from, action) {
        // an amended order goes back through verification before anything else
        (DocType::PurchaseOrder, Status::Created | Status::Amended, Action::Verify) => {
            Some(Status::Verified)
        }
        (DocType::PurchaseOrder, Status::Created | Status::Verified, Action::Amend) => {
            Some(Status::Amended)
        }
        (DocType::PurchaseOrder, Status::Created | Status::Verified, Action::IssueLoc) => {
            Some(Status::LocIssued)
        }
        (DocType::PurchaseOrder, Status::LocIssued, Action::IssueBol) => Some(Status::BolIssued),

        (DocType::LetterOfCredit, Status::Created, Action::Verify) => Some(Status::Verified),
        (
            DocType::LetterOfCredit,
            Status::Created | Status::Verified | Status::LocIssued,
            Action::IssueLoc,
        ) => Some(Status::LocIssued),
        (DocType::LetterOfCredit, Status::LocIssued, Action::IssueBol) => Some(Status::BolIssued),

        (DocType::BillOfLading, Status::BolIssued, Action::Shipped) => Some(Status::Shipped),
        (DocType::BillOfLading, Status::Shipped, Action::IssueInvoice) => {
            Some(Status::InvoiceIssued)
        }
        (DocType::BillOfLading, Status::InvoiceIssued, Action::Received) => Some(Status::Received),

        (DocType::Invoice, Status::Created, Action::Paid) => Some(Status::Paid),

        _ => None,
    }
}

/// A status is terminal once no action can move the document out of it.
pub fn is_terminal(doc_type: DocType, status: Status) -> bool {
    Action::ALL
        .iter()
        .all(|action| transition(doc_type, status, *action).is_none())
}

/// Left fold of `entries` (ascending sequence) from the doc type's initial
/// status. The ledger should only ever hold valid transitions, so an entry
/// that doesn't fit means the history was tampered with or a bug let it in.
pub fn project(doc_type: DocType, entries: &[LedgerEntry]) -> Result<Status, Corruption> {
    entries
        .iter()
        .try_fold(initial_status(doc_type), |status, entry| {
            transition(doc_type, status, entry.action).ok_or(Corruption::InvalidTransition {
                sequence: entry.sequence,
                doc_type,
                status,
                action: entry.action,
            })
        })
}
