use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, IVec};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ChatMessage, ChatTurn, Note, Recording, User};
use crate::usage::{LimitReached, UsageKind, UsageLimits};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    LimitReached(#[from] LimitReached),
}

type TxResult<T> = Result<T, ConflictableTransactionError<StorageError>>;

/// Subscription fields synchronized from the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionUpdate {
    pub fn is_premium(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

/// Document store on top of Sled.
///
/// Every document is a JSON value in its own tree:
/// - `users`: user id -> [`User`]
/// - `emails`: normalized email -> user id (uniqueness index)
/// - `verification_tokens`: token -> user id
/// - `customers`: payment customer id -> user id
/// - `recordings`: recording id -> [`Recording`]
/// - `audio`: recording id -> raw audio bytes
/// - `chats`: recording id -> [`ChatMessage`]
/// - `notes`: `{user_id}/{note_id}` -> [`Note`]
///
/// Writes touching more than one document run inside a Sled transaction.
#[derive(Clone)] // Sled handles are cheap to clone and thread-safe
pub struct Storage {
    db: Db,
    users: sled::Tree,
    emails: sled::Tree,
    verification_tokens: sled::Tree,
    customers: sled::Tree,
    recordings: sled::Tree,
    audio: sled::Tree,
    chats: sled::Tree,
    notes: sled::Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop; used by tests and tooling.
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            users: db.open_tree("users")?,
            emails: db.open_tree("emails")?,
            verification_tokens: db.open_tree("verification_tokens")?,
            customers: db.open_tree("customers")?,
            recordings: db.open_tree("recordings")?,
            audio: db.open_tree("audio")?,
            chats: db.open_tree("chats")?,
            notes: db.open_tree("notes")?,
            db,
        })
    }

    pub async fn flush(&self) -> Result<usize, StorageError> {
        Ok(self.db.flush_async().await?)
    }

    // --- Users ---

    /// Inserts a new user; fails with [`StorageError::UserExists`] if the
    /// email is taken. The email index is written in the same transaction.
    pub fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(user)?;
        (&self.users, &self.emails, &self.verification_tokens)
            .transaction(|(users, emails, tokens)| {
                if emails.get(user.email.as_bytes())?.is_some() {
                    return abort(StorageError::UserExists);
                }
                emails.insert(user.email.as_bytes(), user.id.as_bytes())?;
                users.insert(user.id.as_bytes(), bytes.as_slice())?;
                if let Some(token) = &user.verification_token {
                    tokens.insert(token.as_bytes(), user.id.as_bytes())?;
                }
                Ok(())
            })
            .map_err(flatten)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        get_json(&self.users, id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        match self.emails.get(email.as_bytes())? {
            Some(id) => self.get_user(&ivec_to_string(&id)),
            None => Ok(None),
        }
    }

    pub fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<User>, StorageError> {
        match self.customers.get(customer_id.as_bytes())? {
            Some(id) => self.get_user(&ivec_to_string(&id)),
            None => Ok(None),
        }
    }

    /// Applies `f` to the stored user atomically and returns the new value.
    /// `f` may run more than once if the transaction conflicts.
    pub fn update_user<F>(&self, id: &str, f: F) -> Result<User, StorageError>
    where
        F: Fn(&mut User) -> Result<(), StorageError>,
    {
        self.users
            .transaction(|users| {
                let mut user = tx_get_user(users, id)?;
                f(&mut user).map_err(ConflictableTransactionError::Abort)?;
                tx_put(users, id, &user)?;
                Ok(user)
            })
            .map_err(flatten)
    }

    /// Atomic conditional increment: counts one `kind` use only if the user
    /// is below its tier limit, otherwise fails with `LimitReached`.
    pub fn reserve_usage(
        &self,
        user_id: &str,
        kind: UsageKind,
        limits: &UsageLimits,
    ) -> Result<User, StorageError> {
        self.update_user(user_id, |user| Ok(limits.reserve(user, kind)?))
    }

    pub fn release_usage(&self, user_id: &str, kind: UsageKind) -> Result<User, StorageError> {
        self.update_user(user_id, |user| {
            UsageLimits::release(user, kind);
            Ok(())
        })
    }

    /// Marks the owner of `token` verified. Returns `None` for unknown tokens.
    pub fn verify_email(&self, token: &str) -> Result<Option<User>, StorageError> {
        let result = (&self.users, &self.verification_tokens).transaction(|(users, tokens)| {
            let Some(id) = tokens.remove(token.as_bytes())? else {
                return Ok(None);
            };
            let id = ivec_to_string(&id);
            let mut user = tx_get_user(users, &id)?;
            user.is_verified = true;
            user.verification_token = None;
            tx_put(users, &id, &user)?;
            Ok(Some(user))
        });
        result.map_err(flatten)
    }

    /// Records the payment customer id on the user and indexes it.
    pub fn link_customer(&self, user_id: &str, customer_id: &str) -> Result<User, StorageError> {
        (&self.users, &self.customers)
            .transaction(|(users, customers)| {
                let mut user = tx_get_user(users, user_id)?;
                if let Some(previous) = &user.stripe_customer_id {
                    if previous != customer_id {
                        customers.remove(previous.as_bytes())?;
                    }
                }
                if let Some(owner) = customers.get(customer_id.as_bytes())? {
                    let owner = ivec_to_string(&owner);
                    if owner != user_id {
                        if let Some(raw) = users.get(owner.as_bytes())? {
                            let mut previous_owner: User = decode(&raw)?;
                            previous_owner.stripe_customer_id = None;
                            tx_put(users, &owner, &previous_owner)?;
                        }
                    }
                }
                user.stripe_customer_id = Some(customer_id.to_string());
                customers.insert(customer_id.as_bytes(), user_id.as_bytes())?;
                tx_put(users, user_id, &user)?;
                Ok(user)
            })
            .map_err(flatten)
    }

    pub fn apply_subscription(
        &self,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<User, StorageError> {
        self.update_user(user_id, |user| {
            user.is_premium = update.is_premium();
            user.subscription_status = update.status.clone();
            user.subscription_end_date = update.current_period_end;
            user.cancel_at_period_end = update.cancel_at_period_end;
            Ok(())
        })
    }

    // --- Recordings ---

    /// Persists an analyzed answer in one transaction: reserves an audio
    /// submission for the user, stores the recording and its audio, and
    /// appends the id to the user's list. Any failure leaves nothing behind.
    pub fn save_recording(
        &self,
        user_id: &str,
        recording: &Recording,
        audio: &[u8],
        limits: &UsageLimits,
    ) -> Result<User, StorageError> {
        let bytes = serde_json::to_vec(recording)?;
        (&self.users, &self.recordings, &self.audio)
            .transaction(|(users, recordings, audio_tree)| {
                let mut user = tx_get_user(users, user_id)?;
                limits
                    .reserve(&mut user, UsageKind::AudioSubmission)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;
                user.recordings.push(recording.id.clone());

                recordings.insert(recording.id.as_bytes(), bytes.as_slice())?;
                audio_tree.insert(recording.id.as_bytes(), audio)?;
                tx_put(users, user_id, &user)?;
                Ok(user)
            })
            .map_err(flatten)
    }

    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>, StorageError> {
        get_json(&self.recordings, id)
    }

    pub fn get_audio(&self, recording_id: &str) -> Result<Option<IVec>, StorageError> {
        Ok(self.audio.get(recording_id.as_bytes())?)
    }

    /// The user's recordings, newest first. Dangling ids are skipped.
    pub fn recordings_for(&self, user: &User) -> Result<Vec<Recording>, StorageError> {
        let mut recordings = Vec::with_capacity(user.recordings.len());
        for id in &user.recordings {
            if let Some(recording) = self.get_recording(id)? {
                recordings.push(recording);
            }
        }
        recordings.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(recordings)
    }

    /// Deletes a recording owned by `user_id` together with its audio, its
    /// chat document and the owner's reference.
    pub fn delete_recording(&self, user_id: &str, recording_id: &str) -> Result<(), StorageError> {
        (&self.users, &self.recordings, &self.audio, &self.chats)
            .transaction(|(users, recordings, audio, chats)| {
                let mut user = tx_get_user(users, user_id)?;
                if !user.owns_recording(recording_id) {
                    return abort(StorageError::NotFound("Recording"));
                }
                user.recordings.retain(|id| id != recording_id);

                recordings.remove(recording_id.as_bytes())?;
                audio.remove(recording_id.as_bytes())?;
                chats.remove(recording_id.as_bytes())?;
                tx_put(users, user_id, &user)?;
                Ok(())
            })
            .map_err(flatten)
    }

    // --- Chat ---

    pub fn get_chat(&self, recording_id: &str) -> Result<Option<ChatMessage>, StorageError> {
        get_json(&self.chats, recording_id)
    }

    /// Appends turns to the recording's chat document, creating it if needed.
    /// Fails with `NotFound` once the recording has been deleted.
    pub fn append_chat(
        &self,
        recording_id: &str,
        turns: &[ChatTurn],
    ) -> Result<ChatMessage, StorageError> {
        (&self.recordings, &self.chats)
            .transaction(|(recordings, chats)| {
                if recordings.get(recording_id.as_bytes())?.is_none() {
                    return abort(StorageError::NotFound("Recording"));
                }
                let mut chat = match chats.get(recording_id.as_bytes())? {
                    Some(raw) => decode::<ChatMessage>(&raw)?,
                    None => ChatMessage {
                        recording_id: recording_id.to_string(),
                        messages: vec![],
                    },
                };
                chat.messages.extend_from_slice(turns);
                tx_put(chats, recording_id, &chat)?;
                Ok(chat)
            })
            .map_err(flatten)
    }

    // --- Notes ---

    pub fn create_note(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Note, StorageError> {
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.notes
            .insert(note_key(user_id, &note.id), serde_json::to_vec(&note)?)?;
        Ok(note)
    }

    /// Notes of one user, oldest first.
    pub fn list_notes(&self, user_id: &str) -> Result<Vec<Note>, StorageError> {
        let mut notes = vec![];
        for item in self.notes.scan_prefix(format!("{user_id}/")) {
            let (_, value) = item?;
            notes.push(serde_json::from_slice::<Note>(&value)?);
        }
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(notes)
    }

    pub fn update_note(
        &self,
        user_id: &str,
        note_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Option<Note>, StorageError> {
        let key = note_key(user_id, note_id);
        self.notes
            .transaction(|notes| {
                let Some(raw) = notes.get(key.as_bytes())? else {
                    return Ok(None);
                };
                let mut note = decode::<Note>(&raw)?;
                note.title = title.to_string();
                note.content = content.to_string();
                note.updated_at = Utc::now();
                tx_put(notes, &key, &note)?;
                Ok(Some(note))
            })
            .map_err(flatten)
    }

    pub fn delete_note(&self, user_id: &str, note_id: &str) -> Result<bool, StorageError> {
        Ok(self.notes.remove(note_key(user_id, note_id))?.is_some())
    }
}

fn note_key(user_id: &str, note_id: &str) -> String {
    format!("{user_id}/{note_id}")
}

fn ivec_to_string(value: &IVec) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> Result<Option<T>, StorageError> {
    match tree.get(key.as_bytes())? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

fn abort<T>(err: StorageError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> TxResult<T> {
    serde_json::from_slice(raw).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_get_user(users: &TransactionalTree, id: &str) -> TxResult<User> {
    match users.get(id.as_bytes())? {
        Some(raw) => decode(&raw),
        None => abort(StorageError::UserNotFound),
    }
}

fn tx_put<T: Serialize>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn flatten(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Sled(e),
    }
}
