use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, Address, CryptoError, DigitalSignature, KeyPair};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Represents a value transfer in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawTransaction")]
pub struct Transaction {
    /// Sender's address
    pub sender: Address,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00.000000Z")]
    pub timestamp: DateTime<Utc>,

    /// Digital signature over the sender, recipient and amount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<DigitalSignature>,
}

/// Wire shape of a transaction before its amount has been checked
#[derive(Deserialize)]
struct RawTransaction {
    sender: Address,
    recipient: Address,
    amount: f64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    signature: Option<DigitalSignature>,
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = TransactionError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        Ok(Transaction {
            sender: raw.sender,
            recipient: raw.recipient,
            amount: validate_amount(raw.amount)?,
            timestamp: raw.timestamp,
            signature: raw.signature,
        })
    }
}

/// Checks that `amount` is finite and not negative, folding `-0.0` into `0.0`
/// so every amount has one canonical encoding
pub fn validate_amount(amount: f64) -> Result<f64, TransactionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(TransactionError::InvalidAmount(format!(
            "Amount must be finite and non-negative: {}",
            amount
        )));
    }

    Ok(if amount == 0.0 { 0.0 } else { amount })
}

/// The signed part of a transaction. Field order is the wire format.
#[derive(Serialize)]
struct SignedFields<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
}

/// The full record as it is committed into a block hash.
#[derive(Serialize)]
pub(crate) struct CanonicalRecord<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
    timestamp: String,
    signature: Option<&'a str>,
}

/// Renders a timestamp the way every canonical payload does
pub(crate) fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Transaction {
    /// Creates a new unsigned, pending transaction
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer, finite and not negative
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        let amount = validate_amount(amount)?;

        Ok(Transaction {
            sender,
            recipient,
            amount,
            // Micros are all the canonical encoding keeps
            timestamp: Utc::now().trunc_subsecs(6),
            signature: None,
        })
    }

    /// Gets the signature, if the transaction has been signed
    pub fn signature(&self) -> Option<&DigitalSignature> {
        self.signature.as_ref()
    }

    /// Re-checks the amount of a transaction that may have been edited
    /// after construction. `-0.0` is refused here since construction never
    /// produces it.
    pub fn check_amount(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount.is_sign_negative() {
            return Err(TransactionError::InvalidAmount(format!(
                "Amount must be finite and non-negative: {}",
                self.amount
            )));
        }

        Ok(())
    }

    /// Signs the transaction with the given keypair. Signatures are write-once.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        let message = self.canonical_payload()?;
        let signature = keypair.sign(&message)?;
        self.signature = Some(signature);

        Ok(())
    }

    /// Attaches a signature produced elsewhere by the sender
    pub fn attach_signature(&mut self, signature: DigitalSignature) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        self.signature = Some(signature);
        Ok(())
    }

    /// Checks the signature against `public_key`.
    ///
    /// Unsigned transactions are never valid. Malformed keys or signature
    /// bytes surface as errors rather than `false`.
    pub fn is_valid(&self, public_key: &Address) -> Result<bool, TransactionError> {
        let signature = match &self.signature {
            Some(signature) => signature,
            None => return Ok(false),
        };

        let message = self.canonical_payload()?;
        Ok(crypto::verify(public_key, &message, signature)?)
    }

    /// The signed payload: `{"sender":..,"recipient":..,"amount":..}`
    pub fn canonical_payload(&self) -> Result<Vec<u8>, TransactionError> {
        let fields = SignedFields {
            sender: &self.sender.0,
            recipient: &self.recipient.0,
            amount: self.amount,
        };

        serde_json::to_vec(&fields).map_err(|e| TransactionError::EncodingError(e.to_string()))
    }

    pub(crate) fn canonical_record(&self) -> CanonicalRecord<'_> {
        CanonicalRecord {
            sender: &self.sender.0,
            recipient: &self.recipient.0,
            amount: self.amount,
            timestamp: canonical_timestamp(&self.timestamp),
            signature: self.signature.as_ref().map(|s| s.0.as_str()),
        }
    }

    /// Identifier of the full record, timestamp and signature included
    pub fn id(&self) -> Result<String, TransactionError> {
        let bytes = serde_json::to_vec(&self.canonical_record())
            .map_err(|e| TransactionError::EncodingError(e.to_string()))?;

        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(amount: f64) -> (KeyPair, KeyPair, Transaction) {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();
        let transaction =
            Transaction::new(sender.address().clone(), recipient.address().clone(), amount).unwrap();
        (sender, recipient, transaction)
    }

    #[test]
    fn test_new_transaction() {
        let (sender, recipient, transaction) = transfer(10.5);

        assert_eq!(transaction.sender, *sender.address());
        assert_eq!(transaction.recipient, *recipient.address());
        assert_eq!(transaction.amount, 10.5);
        assert!(transaction.signature().is_none());
    }

    #[test]
    fn test_invalid_amounts_rejected_at_construction() {
        let a = Address("a".to_string());
        let b = Address("b".to_string());

        for amount in [-1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                Transaction::new(a.clone(), b.clone(), amount),
                Err(TransactionError::InvalidAmount(_))
            ));
        }

        assert!(Transaction::new(a, b, 0.0).is_ok());
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        let transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            -0.0,
        )
        .unwrap();

        assert!(transaction.amount.is_sign_positive());
        assert!(transaction.check_amount().is_ok());

        let payload = String::from_utf8(transaction.canonical_payload().unwrap()).unwrap();
        assert_eq!(payload, r#"{"sender":"alice","recipient":"bob","amount":0.0}"#);
    }

    #[test]
    fn test_deserialize_checks_amount() {
        let (sender, _, mut transaction) = transfer(50.0);
        transaction.sign(&sender).unwrap();
        let json = serde_json::to_value(&transaction).unwrap();

        let restored: Transaction = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(restored, transaction);

        let mut negative = json.clone();
        negative["amount"] = serde_json::json!(-50.0);
        assert!(serde_json::from_value::<Transaction>(negative).is_err());

        let mut negative_zero = json;
        negative_zero["amount"] = serde_json::json!(-0.0);
        let normalized: Transaction = serde_json::from_value(negative_zero).unwrap();
        assert!(normalized.amount.is_sign_positive());
    }

    #[test]
    fn test_check_amount_catches_edits() {
        let (_, _, mut transaction) = transfer(5.0);
        assert!(transaction.check_amount().is_ok());

        for amount in [-5.0, -0.0, f64::NAN, f64::INFINITY] {
            transaction.amount = amount;
            assert!(matches!(
                transaction.check_amount(),
                Err(TransactionError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn test_canonical_payload_layout() {
        let transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            10.0,
        )
        .unwrap();

        let payload = String::from_utf8(transaction.canonical_payload().unwrap()).unwrap();
        assert_eq!(payload, r#"{"sender":"alice","recipient":"bob","amount":10.0}"#);
    }

    #[test]
    fn test_sign_and_verify() {
        let (sender, recipient, mut transaction) = transfer(3.25);

        assert!(!transaction.is_valid(sender.address()).unwrap());

        transaction.sign(&sender).unwrap();
        assert!(transaction.signature().is_some());
        assert!(transaction.is_valid(sender.address()).unwrap());
        assert!(!transaction.is_valid(recipient.address()).unwrap());

        transaction.amount = 300.0;
        assert!(!transaction.is_valid(sender.address()).unwrap());
    }

    #[test]
    fn test_signature_is_write_once() {
        let (sender, recipient, mut transaction) = transfer(1.0);
        transaction.sign(&sender).unwrap();

        assert!(matches!(transaction.sign(&sender), Err(TransactionError::AlreadySigned)));
        assert!(matches!(transaction.sign(&recipient), Err(TransactionError::AlreadySigned)));

        let foreign = recipient.sign(b"anything").unwrap();
        assert!(matches!(
            transaction.attach_signature(foreign),
            Err(TransactionError::AlreadySigned)
        ));
    }

    #[test]
    fn test_attach_external_signature() {
        let (sender, _, mut transaction) = transfer(2.0);
        let signature = sender.sign(&transaction.canonical_payload().unwrap()).unwrap();

        transaction.attach_signature(signature).unwrap();
        assert!(transaction.is_valid(sender.address()).unwrap());
    }

    #[test]
    fn test_timestamp_not_signed() {
        let (sender, _, mut transaction) = transfer(4.0);
        transaction.sign(&sender).unwrap();

        transaction.timestamp = transaction.timestamp + chrono::Duration::seconds(30);
        assert!(transaction.is_valid(sender.address()).unwrap());
    }

    #[test]
    fn test_id_covers_timestamp() {
        let (sender, _, mut transaction) = transfer(4.0);
        transaction.sign(&sender).unwrap();
        let id = transaction.id().unwrap();

        let mut later = transaction.clone();
        later.timestamp = later.timestamp + chrono::Duration::milliseconds(1);

        assert_eq!(id.len(), 64);
        assert_eq!(id, transaction.id().unwrap());
        assert_ne!(id, later.id().unwrap());
    }
}
