//! Shared vocabulary: roles, document types, actions, statuses and timestamps
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

use super::error::ParseVocabularyError;

pub type DocumentId = u64;
pub type EntryId = u64;
pub type UserId = u64; // issued by the authentication collaborator

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cbor(index_only)]
pub enum Role {
    #[n(0)]
    Buyer,
    #[n(1)]
    Seller,
    #[n(2)]
    Auditor,
    #[n(3)]
    Bank,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cbor(index_only)]
pub enum DocType {
    #[n(0)]
    PurchaseOrder,
    #[n(1)]
    BillOfLading,
    #[n(2)]
    LetterOfCredit,
    #[n(3)]
    Invoice,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cbor(index_only)]
pub enum Action {
    #[n(0)]
    Amend,
    #[n(1)]
    Verify,
    #[n(2)]
    IssueLoc,
    #[n(3)]
    IssueBol,
    #[n(4)]
    Shipped,
    #[n(5)]
    IssueInvoice,
    #[n(6)]
    Received,
    #[n(7)]
    Paid,
}

/// Lifecycle stage of a document. Never persisted, always folded from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Created,
    Amended,
    Verified,
    LocIssued,
    BolIssued,
    Shipped,
    InvoiceIssued,
    Received,
    Paid,
}

/// The caller on whose behalf an operation runs, as vouched for by authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Buyer, Role::Seller, Role::Auditor, Role::Bank];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Auditor => "auditor",
            Role::Bank => "bank",
        }
    }
}

impl DocType {
    pub const ALL: [DocType; 4] = [
        DocType::PurchaseOrder,
        DocType::BillOfLading,
        DocType::LetterOfCredit,
        DocType::Invoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::PurchaseOrder => "PO",
            DocType::BillOfLading => "BOL",
            DocType::LetterOfCredit => "LOC",
            DocType::Invoice => "INVOICE",
        }
    }
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Amend,
        Action::Verify,
        Action::IssueLoc,
        Action::IssueBol,
        Action::Shipped,
        Action::IssueInvoice,
        Action::Received,
        Action::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Amend => "AMEND",
            Action::Verify => "VERIFY",
            Action::IssueLoc => "ISSUE_LOC",
            Action::IssueBol => "ISSUE_BOL",
            Action::Shipped => "SHIPPED",
            Action::IssueInvoice => "ISSUE_INVOICE",
            Action::Received => "RECEIVED",
            Action::Paid => "PAID",
        }
    }
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Created,
        Status::Amended,
        Status::Verified,
        Status::LocIssued,
        Status::BolIssued,
        Status::Shipped,
        Status::InvoiceIssued,
        Status::Received,
        Status::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "CREATED",
            Status::Amended => "AMENDED",
            Status::Verified => "VERIFIED",
            Status::LocIssued => "LOC_ISSUED",
            Status::BolIssued => "BOL_ISSUED",
            Status::Shipped => "SHIPPED",
            Status::InvoiceIssued => "INVOICE_ISSUED",
            Status::Received => "RECEIVED",
            Status::Paid => "PAID",
        }
    }
}

macro_rules! wire_names {
    ($ty:ty, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseVocabularyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| ParseVocabularyError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

wire_names!(Role, "role");
wire_names!(DocType, "document type");
wire_names!(Action, "action");
wire_names!(Status, "status");

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
